use crate::spotify::api::{ApiError, ApiResult, PlaylistApi, PlaylistPage};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::VecDeque;

/// Remote calls the in-memory API can count and fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOperation {
    PlaylistItems,
    AddItems,
    RemoveItems,
    AlbumTracks,
    ArtistTopTracks,
}

#[derive(Debug)]
struct ScheduledFailure {
    /// Successful calls to let through first
    after: usize,
    error: ApiError,
}

/// In-process stand-in for the Spotify Web API.
///
/// Used by tests and offline runs. Playlist items are track ids, or `None` for
/// entries without one such as local files.
#[derive(Debug, Default)]
pub struct InMemoryPlaylistApi {
    playlists: DashMap<String, Vec<Option<String>>>,
    albums: DashMap<String, Vec<String>>,
    artists: DashMap<String, Vec<String>>,
    failures: DashMap<ApiOperation, VecDeque<ScheduledFailure>>,
    calls: DashMap<ApiOperation, usize>,
    revoked: DashSet<String>,
    pinned: DashSet<String>,
}

impl InMemoryPlaylistApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_playlist(self, id: &str, tracks: &[&str]) -> Self {
        self.insert_playlist(id, tracks);
        self
    }

    pub fn with_album(self, id: &str, tracks: &[&str]) -> Self {
        self.albums.insert(id.to_string(), to_ids(tracks));
        self
    }

    pub fn with_artist(self, id: &str, top_tracks: &[&str]) -> Self {
        self.artists.insert(id.to_string(), to_ids(top_tracks));
        self
    }

    pub fn insert_playlist(&self, id: &str, tracks: &[&str]) {
        self.playlists
            .insert(id.to_string(), tracks.iter().map(|t| Some(t.to_string())).collect());
    }

    /// Replace a playlist with raw items. `None` is an item without a track id.
    pub fn insert_items(&self, id: &str, items: &[Option<&str>]) {
        self.playlists.insert(
            id.to_string(),
            items.iter().map(|t| t.map(str::to_string)).collect(),
        );
    }

    /// Track ids of a playlist in order; empty if it does not exist
    pub fn track_ids(&self, id: &str) -> Vec<String> {
        self.items(id).into_iter().flatten().collect()
    }

    /// Raw items of a playlist, including those without a track id
    pub fn items(&self, id: &str) -> Vec<Option<String>> {
        self.playlists.get(id).map(|p| p.clone()).unwrap_or_default()
    }

    /// Fail the next call of `op` with `error`
    pub fn fail_next(&self, op: ApiOperation, error: ApiError) {
        self.fail_after(op, 0, error);
    }

    /// Let `after` calls of `op` succeed, then fail one with `error`
    pub fn fail_after(&self, op: ApiOperation, after: usize, error: ApiError) {
        self.failures
            .entry(op)
            .or_default()
            .push_back(ScheduledFailure { after, error });
    }

    /// Reject every call made with this bearer token
    pub fn revoke(&self, token: &str) {
        self.revoked.insert(token.to_string());
    }

    /// Removals of this track report success but leave it in place
    pub fn pin(&self, track_id: &str) {
        self.pinned.insert(track_id.to_string());
    }

    pub fn call_count(&self, op: ApiOperation) -> usize {
        self.calls.get(&op).map(|c| *c).unwrap_or(0)
    }

    fn enter(&self, op: ApiOperation, token: &str) -> ApiResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;

        if self.revoked.contains(token) {
            return Err(ApiError::AuthExpired);
        }

        let mut queue = match self.failures.get_mut(&op) {
            Some(queue) => queue,
            None => return Ok(()),
        };
        let Some(front) = queue.front_mut() else {
            return Ok(());
        };
        if front.after > 0 {
            front.after -= 1;
            return Ok(());
        }
        match queue.pop_front() {
            Some(failure) => Err(failure.error),
            None => Ok(()),
        }
    }

    fn playlist_mut(&self, id: &str) -> ApiResult<dashmap::mapref::one::RefMut<'_, String, Vec<Option<String>>>> {
        self.playlists.get_mut(id).ok_or_else(|| not_found("playlist", id))
    }
}

fn to_ids(tracks: &[&str]) -> Vec<String> {
    tracks.iter().map(|t| t.to_string()).collect()
}

fn not_found(kind: &str, id: &str) -> ApiError {
    ApiError::Terminal {
        status: 404,
        message: format!("{} {} not found", kind, id),
    }
}

#[async_trait]
impl PlaylistApi for InMemoryPlaylistApi {
    async fn playlist_items(
        &self,
        token: &str,
        playlist_id: &str,
        offset: usize,
        limit: usize,
    ) -> ApiResult<PlaylistPage> {
        self.enter(ApiOperation::PlaylistItems, token)?;
        let playlist = self
            .playlists
            .get(playlist_id)
            .ok_or_else(|| not_found("playlist", playlist_id))?;

        let items = playlist.iter().skip(offset).take(limit).collect::<Vec<_>>();
        Ok(PlaylistPage {
            window: items.len(),
            track_ids: items.into_iter().flatten().cloned().collect(),
        })
    }

    async fn add_items(&self, token: &str, playlist_id: &str, track_ids: &[String]) -> ApiResult<()> {
        self.enter(ApiOperation::AddItems, token)?;
        self.playlist_mut(playlist_id)?
            .extend(track_ids.iter().cloned().map(Some));
        Ok(())
    }

    async fn remove_all_occurrences(
        &self,
        token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> ApiResult<()> {
        self.enter(ApiOperation::RemoveItems, token)?;
        self.playlist_mut(playlist_id)?
            .retain(|t| {
                t.as_ref()
                    .map_or(true, |t| self.pinned.contains(t) || !track_ids.contains(t))
            });
        Ok(())
    }

    async fn album_tracks(&self, token: &str, album_id: &str) -> ApiResult<Vec<String>> {
        self.enter(ApiOperation::AlbumTracks, token)?;
        self.albums
            .get(album_id)
            .map(|a| a.clone())
            .ok_or_else(|| not_found("album", album_id))
    }

    async fn artist_top_tracks(&self, token: &str, artist_id: &str, _market: &str) -> ApiResult<Vec<String>> {
        self.enter(ApiOperation::ArtistTopTracks, token)?;
        self.artists
            .get(artist_id)
            .map(|a| a.clone())
            .ok_or_else(|| not_found("artist", artist_id))
    }
}
