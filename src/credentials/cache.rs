use crate::credentials::crypto::{self, KeyPair};
use crate::credentials::store::CredentialStore;
use crate::credentials::token::{Principal, Token};
use crate::error::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use zeroize::Zeroizing;

/// Maps each principal to its current OAuth token, encrypted at rest.
///
/// There is no eviction: an entry is either absent or the single current
/// version, and a refresh simply overwrites it.
pub struct CredentialCache {
    store: Arc<dyn CredentialStore>,
    keys: Arc<KeyPair>,
    max_age: Option<Duration>,
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("key", self.keys.public())
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl CredentialCache {
    pub fn new(store: Arc<dyn CredentialStore>, keys: Arc<KeyPair>) -> Self {
        Self {
            store,
            keys,
            max_age: None,
        }
    }

    /// Reject entries sealed longer ago than `max_age`.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Look up and decrypt the principal's token.
    ///
    /// Returns `Ok(None)` when nothing has been cached yet. Crypto failures
    /// are returned as errors, never as "no token".
    pub async fn get_cached_token(&self, principal: &Principal) -> AppResult<Option<Token>> {
        let Some(envelope) = self.store.get(&principal.id).await? else {
            debug!("No cached token for {}", principal);
            return Ok(None);
        };

        let plaintext = crypto::unwrap_fresh(&envelope, self.keys.private(), self.max_age)
            .map(Zeroizing::new)
            .map_err(|e| {
                error!(
                    "Cached token for {} could not be decrypted with key {}: {}",
                    principal,
                    self.keys.public().fingerprint_hex(),
                    e
                );
                AppError::from(e)
            })?;

        let token: Token = serde_json::from_slice(&plaintext).map_err(|e| {
            error!("Cached token for {} decrypted but is not a token: {}", principal, e);
            AppError::from(e)
        })?;

        Ok(Some(token))
    }

    /// Encrypt the token under a fresh key and replace the stored entry.
    pub async fn save_token_to_cache(&self, principal: &Principal, token: &Token) -> AppResult<()> {
        let plaintext = Zeroizing::new(serde_json::to_vec(token)?);
        let envelope = crypto::wrap(&plaintext, self.keys.public())?;

        self.store.put(&principal.id, envelope).await?;
        info!("Saved refreshed token for {}", principal);
        Ok(())
    }
}
