use crate::chat::ChatTransport;
use crate::config::{AppConfig, KeysConfig};
use crate::credentials::{CredentialCache, KeyPair, SqliteCredentialStore};
use crate::db::{self, DbPool, ScopeRegistry, SqliteScopeRegistry};
use crate::error::{AppError, AppResult};
use crate::spotify::{
    OAuthRefresher, PlaylistApi, PlaylistClient, PlaylistOps, SpotifyApi, TokenProvider,
    TokenRefresher, TrackRef,
};
use crate::sync::{Ingestor, Reconciler, ScopeLocks, Scheduler, SelfTest};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tracing::info;

/// Everything the engines share, built once at startup and passed down.
pub struct AppContext {
    pub config: AppConfig,
    pub pool: DbPool,
    pub keys: Arc<KeyPair>,
    pub cache: Arc<CredentialCache>,
    pub playlists: Arc<dyn PlaylistOps>,
    pub registry: Arc<dyn ScopeRegistry>,
    pub locks: ScopeLocks,
}

impl AppContext {
    /// Connect the database, load the key pair and wire the Spotify client.
    ///
    /// A key pair that cannot be loaded is fatal.
    pub async fn build(config: AppConfig) -> AppResult<Self> {
        let keys = load_keys(&config.keys)?;
        info!("Loaded credential key {}", keys.public().fingerprint_hex());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await?;
        info!("Database connected: {}", config.database.url);
        db::init_db(&pool).await?;

        let api: Arc<dyn PlaylistApi> = Arc::new(SpotifyApi::new(&config.spotify)?);
        let refresher: Arc<dyn TokenRefresher> = Arc::new(OAuthRefresher::new(&config.spotify)?);

        Ok(Self::from_parts(config, pool, Arc::new(keys), api, refresher))
    }

    pub fn from_parts(
        config: AppConfig,
        pool: DbPool,
        keys: Arc<KeyPair>,
        api: Arc<dyn PlaylistApi>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        let store = Arc::new(SqliteCredentialStore::new(pool.clone()));
        let cache = Arc::new(
            CredentialCache::new(store, keys.clone()).with_max_age(config.keys.token_max_age()),
        );
        let tokens = Arc::new(TokenProvider::new(cache.clone(), refresher));
        let playlists: Arc<dyn PlaylistOps> = Arc::new(PlaylistClient::new(
            api,
            tokens,
            config.spotify.page_size,
            config.spotify.market.clone(),
        ));
        let registry: Arc<dyn ScopeRegistry> = Arc::new(SqliteScopeRegistry::new(pool.clone()));

        Self {
            config,
            pool,
            keys,
            cache,
            playlists,
            registry,
            locks: ScopeLocks::new(),
        }
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            self.registry.clone(),
            self.playlists.clone(),
            self.locks.clone(),
            self.config.discord.debug_prefix.clone(),
        )
    }

    pub fn reconciler(&self, transport: Arc<dyn ChatTransport>) -> Reconciler {
        Reconciler::new(
            self.registry.clone(),
            self.playlists.clone(),
            transport,
            self.locks.clone(),
        )
    }

    pub fn self_test(&self, transport: Arc<dyn ChatTransport>) -> AppResult<SelfTest> {
        let probes = self
            .config
            .self_test
            .probes
            .iter()
            .map(|link| {
                TrackRef::parse(link).ok_or_else(|| {
                    AppError::Config(::config::ConfigError::Message(format!(
                        "self_test.probes: '{}' is not a track, album or artist link",
                        link
                    )))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(SelfTest::new(
            self.registry.clone(),
            self.playlists.clone(),
            transport,
            self.locks.clone(),
            probes,
            self.config.discord.debug_prefix.clone(),
            self.config.self_test.settle(),
            self.config.self_test.processing(),
        ))
    }

    /// Both cron jobs, validated. Invalid expressions or probe links fail here.
    pub fn scheduler(&self, transport: Arc<dyn ChatTransport>) -> AppResult<Scheduler> {
        let schedule = &self.config.schedule;
        Scheduler::new()
            .add(&schedule.playlist_update_cron, Arc::new(self.reconciler(transport.clone())))?
            .add(&schedule.self_test_cron, Arc::new(self.self_test(transport)?))
    }
}

/// Load the deployment key pair from inline PEM or files.
pub fn load_keys(config: &KeysConfig) -> AppResult<KeyPair> {
    let private_pem = match (&config.private_key_pem, &config.private_key_path) {
        (Some(pem), _) => pem.clone(),
        (None, Some(path)) => read_pem(path)?,
        (None, None) => {
            return Err(AppError::key_material(
                "no private key configured (keys.private_key_path or keys.private_key_pem)",
            ))
        }
    };

    let public_pem = match (&config.public_key_pem, &config.public_key_path) {
        (Some(pem), _) => Some(pem.clone()),
        (None, Some(path)) => Some(read_pem(path)?),
        (None, None) => None,
    };

    let keys = match public_pem {
        Some(public_pem) => KeyPair::from_pems(&private_pem, &public_pem)?,
        None => KeyPair::from_private_pem(&private_pem)?,
    };
    Ok(keys)
}

fn read_pem(path: &str) -> AppResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| AppError::key_material(format!("cannot read {}: {}", path, e)))
}
