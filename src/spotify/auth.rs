use crate::config::SpotifyConfig;
use crate::credentials::{CredentialCache, Principal, Token};
use crate::error::{AppError, AppResult};
use crate::spotify::api::{ApiError, ApiResult};
use async_trait::async_trait;
use oauth2::basic::{BasicClient, BasicErrorResponseType};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, RedirectUrl, RefreshToken, RequestTokenError, TokenResponse,
    TokenUrl,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> ApiResult<Token>;
}

/// Refresh-token grant against the Spotify accounts service
pub struct OAuthRefresher {
    client: BasicClient,
}

impl std::fmt::Debug for OAuthRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthRefresher").finish_non_exhaustive()
    }
}

impl OAuthRefresher {
    pub fn new(config: &SpotifyConfig) -> AppResult<Self> {
        let bad_url = |e: oauth2::url::ParseError| {
            AppError::Config(::config::ConfigError::Message(format!("invalid Spotify URL: {}", e)))
        };

        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(config.authorize_url()).map_err(bad_url)?,
            Some(TokenUrl::new(config.token_url()).map_err(bad_url)?),
        )
        .set_redirect_uri(RedirectUrl::new(config.redirect_uri.clone()).map_err(bad_url)?);

        Ok(Self { client })
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, refresh_token: &str) -> ApiResult<Token> {
        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(resp) => match resp.error() {
                    BasicErrorResponseType::InvalidGrant => ApiError::AuthExpired,
                    other => ApiError::Terminal {
                        status: 400,
                        message: resp
                            .error_description()
                            .cloned()
                            .unwrap_or_else(|| other.to_string()),
                    },
                },
                RequestTokenError::Request(e) => ApiError::Transient(e.to_string()),
                RequestTokenError::Parse(e, _) => {
                    ApiError::Transient(format!("malformed token response: {}", e))
                }
                RequestTokenError::Other(msg) => ApiError::Transient(msg),
            })?;

        let scope = response.scopes().map(|scopes| {
            scopes
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        });

        Ok(Token::issued_now(
            response.access_token().secret().clone(),
            response.refresh_token().map(|t| t.secret().clone()),
            response.expires_in().unwrap_or(DEFAULT_LIFETIME),
            scope,
        ))
    }
}

/// Hands out usable bearer tokens, refreshing through the cache as needed.
pub struct TokenProvider {
    cache: Arc<CredentialCache>,
    refresher: Arc<dyn TokenRefresher>,
}

impl TokenProvider {
    pub fn new(cache: Arc<CredentialCache>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { cache, refresher }
    }

    /// Current access token for the owner.
    ///
    /// An expired token is refreshed once and written back. A rejected refresh
    /// surfaces as `AuthExpired` and is not retried.
    pub async fn bearer(&self, owner: &Principal) -> AppResult<String> {
        let token = self
            .cache
            .get_cached_token(owner)
            .await?
            .ok_or_else(|| ApiError::NotAuthorized(owner.to_string()))?;

        if !token.is_expired() {
            return Ok(token.access_token.clone());
        }

        let Some(refresh_token) = token.refresh_token.as_deref() else {
            warn!("Token for {} expired and has no refresh token", owner);
            return Err(ApiError::AuthExpired.into());
        };

        info!("Refreshing access token for {}", owner);
        let mut fresh = self.refresher.refresh(refresh_token).await.map_err(|e| {
            error!("Token refresh for {} failed: {}", owner, e);
            AppError::from(e)
        })?;

        if fresh.refresh_token.is_none() {
            fresh.refresh_token = token.refresh_token.clone();
        }

        self.cache.save_token_to_cache(owner, &fresh).await?;
        Ok(fresh.access_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::testing::{expired_token, fresh_token, owner, test_keys, StubRefresher};

    fn provider(refresher: Arc<StubRefresher>) -> (TokenProvider, Arc<CredentialCache>) {
        let cache = Arc::new(CredentialCache::new(
            Arc::new(MemoryCredentialStore::new()),
            test_keys(),
        ));
        (TokenProvider::new(cache.clone(), refresher), cache)
    }

    #[tokio::test]
    async fn test_unauthorized_owner() {
        let (tokens, _) = provider(Arc::new(StubRefresher::issuing("new")));
        let err = tokens.bearer(&owner()).await.unwrap_err();
        assert!(matches!(err, AppError::Api(ApiError::NotAuthorized(_))));
    }

    #[tokio::test]
    async fn test_fresh_token_is_used_as_is() {
        let refresher = Arc::new(StubRefresher::issuing("new"));
        let (tokens, cache) = provider(refresher.clone());
        cache.save_token_to_cache(&owner(), &fresh_token("current")).await.unwrap();

        assert_eq!(tokens.bearer(&owner()).await.unwrap(), "current");
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_saved() {
        let refresher = Arc::new(StubRefresher::issuing("renewed"));
        let (tokens, cache) = provider(refresher.clone());
        cache.save_token_to_cache(&owner(), &expired_token("stale", "refresh-1")).await.unwrap();

        assert_eq!(tokens.bearer(&owner()).await.unwrap(), "renewed");
        assert_eq!(refresher.calls(), 1);

        let cached = cache.get_cached_token(&owner()).await.unwrap().unwrap();
        assert_eq!(cached.access_token, "renewed");
        // The grant response omitted a refresh token, so the old one is kept.
        assert_eq!(cached.refresh_token.as_deref(), Some("refresh-1"));

        // Subsequent calls reuse the saved token.
        assert_eq!(tokens.bearer(&owner()).await.unwrap(), "renewed");
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_auth_expired() {
        let refresher = Arc::new(StubRefresher::failing(ApiError::AuthExpired));
        let (tokens, cache) = provider(refresher.clone());
        cache.save_token_to_cache(&owner(), &expired_token("stale", "revoked")).await.unwrap();

        let err = tokens.bearer(&owner()).await.unwrap_err();
        assert!(err.is_auth_expired());
        assert_eq!(refresher.calls(), 1);

        let cached = cache.get_cached_token(&owner()).await.unwrap().unwrap();
        assert_eq!(cached.access_token, "stale");
    }
}
