use crate::credentials::Principal;
use crate::error::AppResult;
use crate::spotify::api::{ApiError, PlaylistApi};
use crate::spotify::auth::TokenProvider;
use crate::spotify::links::{LinkKind, TrackRef};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Playlist primitives used by ingestion, rotation and the self-test.
///
/// Every call resolves a bearer token for the owning principal first.
#[async_trait]
pub trait PlaylistOps: Send + Sync {
    /// Append the ids not already in the playlist. Returns how many were appended.
    async fn add_if_unique(&self, owner: &Principal, playlist: &str, track_ids: &[String]) -> AppResult<usize>;

    /// Drain the playlist page by page. Returns how many tracks were removed.
    async fn wipe(&self, owner: &Principal, playlist: &str) -> AppResult<usize>;

    async fn copy_all(&self, owner: &Principal, source: &str, dest: &str) -> AppResult<usize>;

    /// Every track id in the playlist, in order.
    async fn track_ids(&self, owner: &Principal, playlist: &str) -> AppResult<Vec<String>>;

    /// Resolve a shared link to the track ids it stands for.
    async fn expand(&self, owner: &Principal, link: &TrackRef) -> AppResult<Vec<String>>;
}

/// Paginating facade over a [`PlaylistApi`]
pub struct PlaylistClient {
    api: Arc<dyn PlaylistApi>,
    tokens: Arc<TokenProvider>,
    page_size: usize,
    market: String,
}

impl PlaylistClient {
    pub fn new(api: Arc<dyn PlaylistApi>, tokens: Arc<TokenProvider>, page_size: usize, market: impl Into<String>) -> Self {
        Self {
            api,
            tokens,
            page_size: page_size.clamp(1, 100),
            market: market.into(),
        }
    }

    async fn read_all(&self, token: &str, playlist: &str) -> AppResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut offset = 0;

        loop {
            let page = self
                .api
                .playlist_items(token, playlist, offset, self.page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.window;
            ids.extend(page.track_ids);
            if offset % self.page_size != 0 {
                break;
            }
        }

        Ok(ids)
    }
}

#[async_trait]
impl PlaylistOps for PlaylistClient {
    async fn add_if_unique(&self, owner: &Principal, playlist: &str, track_ids: &[String]) -> AppResult<usize> {
        let token = self.tokens.bearer(owner).await?;

        let existing: HashSet<String> = self.read_all(&token, playlist).await.map_err(|e| {
            error!("add_if_unique: reading playlist {} failed, nothing appended: {}", playlist, e);
            e
        })?.into_iter().collect();

        let mut seen = HashSet::new();
        let missing = track_ids
            .iter()
            .filter(|id| !existing.contains(*id) && seen.insert(id.as_str()))
            .cloned()
            .collect::<Vec<_>>();

        if missing.is_empty() {
            debug!("add_if_unique: all {} tracks already in {}", track_ids.len(), playlist);
            return Ok(0);
        }

        self.api.add_items(&token, playlist, &missing).await.map_err(|e| {
            error!("add_if_unique: appending {} tracks to {} failed: {}", missing.len(), playlist, e);
            e
        })?;

        info!("Appended {} new tracks to {}", missing.len(), playlist);
        Ok(missing.len())
    }

    async fn wipe(&self, owner: &Principal, playlist: &str) -> AppResult<usize> {
        let token = self.tokens.bearer(owner).await?;
        let mut removed = 0;
        let mut pages = 0;
        let mut previous: Option<Vec<String>> = None;

        loop {
            let page = match self.api.playlist_items(&token, playlist, 0, self.page_size).await {
                Ok(page) => page,
                Err(e) => {
                    error!("wipe: read of {} failed after {} pages drained: {}", playlist, pages, e);
                    return Err(e.into());
                }
            };
            if page.is_empty() {
                break;
            }

            let mut unique = HashSet::new();
            let ids = page
                .track_ids
                .into_iter()
                .filter(|id| unique.insert(id.clone()))
                .collect::<Vec<_>>();
            if ids.is_empty() || previous.as_ref() == Some(&ids) {
                warn!("wipe: {} stopped shrinking after {} pages drained", playlist, pages);
                return Err(ApiError::Terminal {
                    status: 0,
                    message: format!("playlist {} holds items that cannot be removed", playlist),
                }
                .into());
            }

            if let Err(e) = self.api.remove_all_occurrences(&token, playlist, &ids).await {
                error!("wipe: removal from {} failed after {} pages drained: {}", playlist, pages, e);
                return Err(e.into());
            }

            removed += ids.len();
            pages += 1;
            previous = Some(ids);
        }

        debug!("Wiped {} ({} tracks, {} pages)", playlist, removed, pages);
        Ok(removed)
    }

    async fn copy_all(&self, owner: &Principal, source: &str, dest: &str) -> AppResult<usize> {
        let token = self.tokens.bearer(owner).await?;
        let mut offset = 0;
        let mut copied = 0;

        loop {
            let page = self
                .api
                .playlist_items(&token, source, offset, self.page_size)
                .await
                .map_err(|e| {
                    error!("copy_all: read of {} at offset {} failed: {}", source, offset, e);
                    e
                })?;
            if page.is_empty() {
                break;
            }

            if !page.track_ids.is_empty() {
                self.api.add_items(&token, dest, &page.track_ids).await.map_err(|e| {
                    error!("copy_all: append to {} at offset {} failed: {}", dest, offset, e);
                    e
                })?;
                copied += page.track_ids.len();
            }
            offset += page.window;
        }

        debug!("Copied {} tracks from {} to {}", copied, source, dest);
        Ok(copied)
    }

    async fn track_ids(&self, owner: &Principal, playlist: &str) -> AppResult<Vec<String>> {
        let token = self.tokens.bearer(owner).await?;
        self.read_all(&token, playlist).await
    }

    async fn expand(&self, owner: &Principal, link: &TrackRef) -> AppResult<Vec<String>> {
        let ids = match link.kind {
            LinkKind::Track => vec![link.id.clone()],
            LinkKind::Album => {
                let token = self.tokens.bearer(owner).await?;
                self.api.album_tracks(&token, &link.id).await?
            }
            LinkKind::Artist => {
                let token = self.tokens.bearer(owner).await?;
                self.api.artist_top_tracks(&token, &link.id, &self.market).await?
            }
        };
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::spotify::memory::{ApiOperation, InMemoryPlaylistApi};
    use crate::testing::{ids, owner, token_provider};

    fn client(api: Arc<InMemoryPlaylistApi>, page_size: usize) -> PlaylistClient {
        PlaylistClient::new(api, token_provider(), page_size, "US")
    }

    #[tokio::test]
    async fn test_add_if_unique_appends_only_missing() {
        let api = Arc::new(InMemoryPlaylistApi::new().with_playlist("p", &["A"]));
        let playlists = client(api.clone(), 100);

        let added = playlists.add_if_unique(&owner(), "p", &ids(&["A", "B"])).await.unwrap();
        assert_eq!(added, 1);
        assert_eq!(api.track_ids("p"), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_add_if_unique_is_idempotent() {
        let api = Arc::new(InMemoryPlaylistApi::new().with_playlist("p", &[]));
        let playlists = client(api.clone(), 2);
        let batch = ids(&["A", "B", "C", "B"]);

        assert_eq!(playlists.add_if_unique(&owner(), "p", &batch).await.unwrap(), 3);
        assert_eq!(playlists.add_if_unique(&owner(), "p", &batch).await.unwrap(), 0);
        assert_eq!(api.track_ids("p"), vec!["A", "B", "C"]);
        assert_eq!(api.call_count(ApiOperation::AddItems), 1);
    }

    #[tokio::test]
    async fn test_add_if_unique_reads_past_first_page() {
        let existing: Vec<String> = (0..7).map(|i| format!("t{}", i)).collect();
        let refs: Vec<&str> = existing.iter().map(String::as_str).collect();
        let api = Arc::new(InMemoryPlaylistApi::new().with_playlist("p", &refs));
        let playlists = client(api.clone(), 3);

        let added = playlists.add_if_unique(&owner(), "p", &ids(&["t6", "new"])).await.unwrap();
        assert_eq!(added, 1);
        assert_eq!(api.track_ids("p").len(), 8);
    }

    #[tokio::test]
    async fn test_add_if_unique_failed_read_appends_nothing() {
        let api = Arc::new(InMemoryPlaylistApi::new().with_playlist("p", &["A"]));
        api.fail_next(ApiOperation::PlaylistItems, ApiError::RateLimited { retry_after: None });
        let playlists = client(api.clone(), 100);

        let err = playlists.add_if_unique(&owner(), "p", &ids(&["B"])).await.unwrap_err();
        assert!(matches!(err, AppError::Api(ApiError::RateLimited { .. })));
        assert_eq!(api.track_ids("p"), vec!["A"]);
        assert_eq!(api.call_count(ApiOperation::AddItems), 0);
    }

    #[tokio::test]
    async fn test_wipe_drains_in_pages() {
        let tracks: Vec<String> = (0..5).map(|i| format!("t{}", i)).collect();
        let refs: Vec<&str> = tracks.iter().map(String::as_str).collect();
        let api = Arc::new(InMemoryPlaylistApi::new().with_playlist("p", &refs));
        let playlists = client(api.clone(), 2);

        assert_eq!(playlists.wipe(&owner(), "p").await.unwrap(), 5);
        assert!(api.track_ids("p").is_empty());
        assert_eq!(api.call_count(ApiOperation::RemoveItems), 3);
    }

    #[tokio::test]
    async fn test_wipe_failure_leaves_partial_state() {
        let api = Arc::new(InMemoryPlaylistApi::new().with_playlist("p", &["a", "b", "c", "d"]));
        let playlists = client(api.clone(), 2);
        api.fail_after(ApiOperation::RemoveItems, 1, ApiError::Transient("reset".into()));

        assert!(playlists.wipe(&owner(), "p").await.is_err());
        assert_eq!(api.track_ids("p"), vec!["c", "d"]);

        // The next run finishes the job.
        assert_eq!(playlists.wipe(&owner(), "p").await.unwrap(), 2);
        assert!(api.track_ids("p").is_empty());
    }

    #[tokio::test]
    async fn test_wipe_reads_past_items_without_track_id() {
        let api = Arc::new(InMemoryPlaylistApi::new());
        api.insert_items("p", &[None, Some("t1"), Some("t2"), None, None, Some("t3")]);
        let playlists = client(api.clone(), 2);

        assert_eq!(playlists.wipe(&owner(), "p").await.unwrap(), 3);
        assert_eq!(api.items("p"), vec![None, None, None]);

        // Leftover local files do not block later runs.
        assert_eq!(playlists.wipe(&owner(), "p").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wipe_errors_when_removal_has_no_effect() {
        let api = Arc::new(InMemoryPlaylistApi::new().with_playlist("p", &["a", "b"]));
        api.pin("a");
        let playlists = client(api.clone(), 2);

        let err = playlists.wipe(&owner(), "p").await.unwrap_err();
        assert!(matches!(err, AppError::Api(ApiError::Terminal { status: 0, .. })));
        assert_eq!(api.track_ids("p"), vec!["a"]);
    }

    #[tokio::test]
    async fn test_copy_all_transplants_without_dedup() {
        let api = Arc::new(
            InMemoryPlaylistApi::new()
                .with_playlist("src", &["a", "b", "c"])
                .with_playlist("dst", &["a"]),
        );
        let playlists = client(api.clone(), 2);

        assert_eq!(playlists.copy_all(&owner(), "src", "dst").await.unwrap(), 3);
        assert_eq!(api.track_ids("dst"), vec!["a", "a", "b", "c"]);
        assert_eq!(api.track_ids("src"), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_expand_links() {
        let api = Arc::new(
            InMemoryPlaylistApi::new()
                .with_album("alb", &["a1", "a2"])
                .with_artist("art", &["top1", "top2"]),
        );
        let playlists = client(api, 100);

        let track = TrackRef::new(LinkKind::Track, "t1");
        assert_eq!(playlists.expand(&owner(), &track).await.unwrap(), vec!["t1"]);
        let album = TrackRef::new(LinkKind::Album, "alb");
        assert_eq!(playlists.expand(&owner(), &album).await.unwrap(), vec!["a1", "a2"]);
        let artist = TrackRef::new(LinkKind::Artist, "art");
        assert_eq!(playlists.expand(&owner(), &artist).await.unwrap(), vec!["top1", "top2"]);
    }

    #[tokio::test]
    async fn test_revoked_token_is_auth_expired() {
        let api = Arc::new(InMemoryPlaylistApi::new().with_playlist("p", &[]));
        api.revoke(crate::testing::TEST_ACCESS_TOKEN);
        let playlists = client(api.clone(), 100);

        let err = playlists.add_if_unique(&owner(), "p", &ids(&["A"])).await.unwrap_err();
        assert!(err.is_auth_expired());
    }
}
