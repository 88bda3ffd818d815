use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Identity that owns one delegated Spotify credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Discord user ID
    pub id: String,
    pub display_name: String,
}

impl Principal {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// OAuth bearer credential as returned by the Spotify authorization flow.
///
/// Only ever persisted through the envelope-encrypted credential cache.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Token {
    /// Build a token from a grant response's relative lifetime.
    pub fn issued_now(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: std::time::Duration,
        scope: Option<String>,
    ) -> Self {
        let lifetime = Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1));
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            refresh_token,
            expires_at: Utc::now() + lifetime,
            scope,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_SKEW_SECS) <= Utc::now()
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        self.access_token.zeroize();
        if let Some(ref mut token) = self.refresh_token {
            token.zeroize();
        }
    }
}
