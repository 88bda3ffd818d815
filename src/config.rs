use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Discord bot configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    /// Bot token
    pub token: String,
    /// Prefix that lets the bot's own messages through the link handler.
    /// Self-test probes are posted with it.
    #[serde(default = "default_debug_prefix")]
    pub debug_prefix: String,
}

fn default_debug_prefix() -> String {
    "!debug".to_string()
}

/// Spotify Web API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_accounts_url")]
    pub accounts_url: String,
    /// Window size for paginated playlist reads (Spotify caps this at 100)
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Market used for artist top tracks
    #[serde(default = "default_market")]
    pub market: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_accounts_url() -> String {
    "https://accounts.spotify.com".to_string()
}

fn default_page_size() -> usize {
    100
}

fn default_market() -> String {
    "US".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl SpotifyConfig {
    pub fn endpoint(&self, path: &str) -> String {
        join_url(&self.api_url, path)
    }

    pub fn authorize_url(&self) -> String {
        join_url(&self.accounts_url, "authorize")
    }

    pub fn token_url(&self) -> String {
        join_url(&self.accounts_url, "api/token")
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{}/{}", base, path)
}

/// Deployment key pair used to wrap cached tokens.
///
/// Either a path or inline PEM may be given for each half. The public half
/// is derived from the private key when omitted.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct KeysConfig {
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub private_key_pem: Option<String>,
    #[serde(default)]
    pub public_key_path: Option<String>,
    #[serde(default)]
    pub public_key_pem: Option<String>,
    /// Reject cached tokens sealed longer ago than this. Unset means cached
    /// tokens live until they are replaced.
    #[serde(default)]
    pub token_max_age_secs: Option<u64>,
}

impl KeysConfig {
    pub fn token_max_age(&self) -> Option<Duration> {
        self.token_max_age_secs.map(Duration::from_secs)
    }
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Cron cadences for the scheduled jobs
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    pub playlist_update_cron: String,
    pub self_test_cron: String,
}

/// Connection self-test settings
#[derive(Debug, Deserialize, Clone)]
pub struct SelfTestConfig {
    /// Wait after wiping before posting a probe link
    #[serde(default = "default_wait_secs")]
    pub settle_secs: u64,
    /// Wait after posting for the link handler to process the message
    #[serde(default = "default_wait_secs")]
    pub processing_secs: u64,
    /// Known links posted by the probe, one per link type
    #[serde(default = "default_probes")]
    pub probes: Vec<String>,
}

fn default_wait_secs() -> u64 {
    5
}

fn default_probes() -> Vec<String> {
    vec![
        "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC".to_string(),
        "https://open.spotify.com/album/6N9PS4QXF1D0OWPk0Sxtb4".to_string(),
        "https://open.spotify.com/artist/0gxyHStUsqpMadRV0Di1Qt".to_string(),
    ]
}

impl Default for SelfTestConfig {
    fn default() -> Self {
        Self {
            settle_secs: default_wait_secs(),
            processing_secs: default_wait_secs(),
            probes: default_probes(),
        }
    }
}

impl SelfTestConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn processing(&self) -> Duration {
        Duration::from_secs(self.processing_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human-readable format
    #[serde(default)]
    pub json: bool,
}

/// Root application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub discord: DiscordConfig,
    pub spotify: SpotifyConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    pub database: DatabaseConfig,
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub self_test: SelfTestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default config file
            .add_source(File::with_name("config/default").required(false))
            // Override with local config if present
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (prefix: TUNEBRIDGE_)
            // e.g., TUNEBRIDGE_DISCORD__TOKEN, TUNEBRIDGE_SPOTIFY__CLIENT_SECRET
            .add_source(
                Environment::with_prefix("TUNEBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
