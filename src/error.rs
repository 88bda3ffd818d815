use crate::credentials::CryptoError;
use crate::spotify::ApiError;
use thiserror::Error;

/// Application-wide error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Discord error: {0}")]
    Discord(#[from] serenity::Error),

    #[error("Credential crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Spotify API error: {0}")]
    Api(#[from] ApiError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error("Key material error: {0}")]
    KeyMaterial(String),

    #[error("Unknown guild: {0}")]
    UnknownScope(String),

    #[error("Discord channel not found: {0}")]
    MissingChannel(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    pub fn key_material<S: Into<String>>(msg: S) -> Self {
        Self::KeyMaterial(msg.into())
    }

    /// Crypto failures on a stored credential mean corruption or a key
    /// rotation mismatch. They must reach an operator, never degrade silently.
    pub fn is_credential_corruption(&self) -> bool {
        matches!(
            self,
            Self::Crypto(CryptoError::KeyMismatch | CryptoError::IntegrityError)
        )
    }

    /// The remote API rejected the owner's token; re-authorization is needed.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Api(ApiError::AuthExpired))
    }

    /// Rate limits and transient remote failures clear up on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_retryable())
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_corruption_classification() {
        assert!(AppError::from(CryptoError::KeyMismatch).is_credential_corruption());
        assert!(AppError::from(CryptoError::IntegrityError).is_credential_corruption());
        assert!(!AppError::from(CryptoError::PayloadExpired).is_credential_corruption());
        assert!(!AppError::internal("boom").is_credential_corruption());
    }

    #[test]
    fn test_auth_expired_classification() {
        assert!(AppError::from(ApiError::AuthExpired).is_auth_expired());
        assert!(!AppError::from(ApiError::Transient("reset".into())).is_auth_expired());
    }

    #[test]
    fn test_retryable_classification() {
        let limited = AppError::from(ApiError::RateLimited {
            retry_after: Some(std::time::Duration::from_secs(30)),
        });
        assert!(limited.is_retryable());
        assert!(limited.to_string().ends_with("rate limited, retry after 30s"));
        assert!(!AppError::from(ApiError::AuthExpired).is_retryable());
        assert!(!AppError::internal("boom").is_retryable());
    }
}
