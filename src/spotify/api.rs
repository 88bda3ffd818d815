use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single remote playlist call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The bearer token was rejected. Never retried with the same token.
    #[error("access token rejected, re-authorization required")]
    AuthExpired,

    #[error("rate limited{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request failed with status {status}: {message}")]
    Terminal { status: u16, message: String },

    /// The owner has never completed authorization
    #[error("{0} has not authorized Spotify access")]
    NotAuthorized(String),
}

impl ApiError {
    /// Whether a later attempt with the same token may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(", retry after {}s", wait.as_secs()),
        None => String::new(),
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// One window of a playlist read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistPage {
    /// Track ids in playlist order. Local files and removed tracks are skipped.
    pub track_ids: Vec<String>,
    /// Number of raw items in the window, including skipped ones
    pub window: usize,
}

impl PlaylistPage {
    pub fn is_empty(&self) -> bool {
        self.window == 0
    }
}

/// Remote playlist API, scoped per call by a bearer token.
#[async_trait]
pub trait PlaylistApi: Send + Sync {
    async fn playlist_items(
        &self,
        token: &str,
        playlist_id: &str,
        offset: usize,
        limit: usize,
    ) -> ApiResult<PlaylistPage>;

    async fn add_items(&self, token: &str, playlist_id: &str, track_ids: &[String]) -> ApiResult<()>;

    async fn remove_all_occurrences(
        &self,
        token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> ApiResult<()>;

    async fn album_tracks(&self, token: &str, album_id: &str) -> ApiResult<Vec<String>>;

    async fn artist_top_tracks(&self, token: &str, artist_id: &str, market: &str) -> ApiResult<Vec<String>>;
}
