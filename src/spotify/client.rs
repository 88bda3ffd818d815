use crate::config::SpotifyConfig;
use crate::error::AppResult;
use crate::spotify::api::{ApiError, ApiResult, PlaylistApi, PlaylistPage};
use crate::spotify::links::track_uri;
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Spotify accepts at most this many tracks per add or remove request.
const MUTATION_CHUNK: usize = 100;
const ALBUM_PAGE: usize = 50;

#[derive(Debug, Deserialize)]
struct Paging<T> {
    items: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemObject {
    #[serde(default)]
    track: Option<TrackObject>,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TopTracks {
    tracks: Vec<TrackObject>,
}

#[derive(Debug, Serialize)]
struct AddItemsRequest<'a> {
    uris: &'a [String],
}

#[derive(Debug, Serialize)]
struct UriObject {
    uri: String,
}

#[derive(Debug, Serialize)]
struct RemoveItemsRequest {
    tracks: Vec<UriObject>,
}

/// Web API client for playlist reads and mutations
pub struct SpotifyApi {
    http: Client,
    config: SpotifyConfig,
}

impl std::fmt::Debug for SpotifyApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyApi")
            .field("api_url", &self.config.api_url)
            .finish_non_exhaustive()
    }
}

impl SpotifyApi {
    pub fn new(config: &SpotifyConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    async fn send(&self, request: RequestBuilder, token: &str) -> ApiResult<Response> {
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, retry_after.as_deref(), body))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, token: &str) -> ApiResult<T> {
        debug!("GET {}", url);
        let response = self.send(self.http.get(url), token).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Transient(format!("malformed response: {}", e)))
    }
}

/// Map a failed response onto the API error taxonomy.
pub fn classify(status: StatusCode, retry_after: Option<&str>, body: String) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED => ApiError::AuthExpired,
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited {
            retry_after: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        },
        s if s.is_server_error() => ApiError::Transient(format!("{}: {}", s, body)),
        s => ApiError::Terminal {
            status: s.as_u16(),
            message: body,
        },
    }
}

#[async_trait]
impl PlaylistApi for SpotifyApi {
    async fn playlist_items(
        &self,
        token: &str,
        playlist_id: &str,
        offset: usize,
        limit: usize,
    ) -> ApiResult<PlaylistPage> {
        let url = format!(
            "{}?offset={}&limit={}&fields=items(track(id)),next",
            self.config.endpoint(&format!("playlists/{}/tracks", playlist_id)),
            offset,
            limit
        );
        let page: Paging<PlaylistItemObject> = self.get_json(&url, token).await?;

        let window = page.items.len();
        let track_ids = page
            .items
            .into_iter()
            .filter_map(|item| item.track.and_then(|t| t.id))
            .collect::<Vec<_>>();
        if track_ids.len() < window {
            warn!(
                "Playlist {} has {} unplayable items at offset {}",
                playlist_id,
                window - track_ids.len(),
                offset
            );
        }

        Ok(PlaylistPage { track_ids, window })
    }

    async fn add_items(&self, token: &str, playlist_id: &str, track_ids: &[String]) -> ApiResult<()> {
        let url = self.config.endpoint(&format!("playlists/{}/tracks", playlist_id));
        for chunk in track_ids.chunks(MUTATION_CHUNK) {
            let uris = chunk.iter().map(|id| track_uri(id)).collect::<Vec<_>>();
            let request = self.http.post(&url).json(&AddItemsRequest { uris: &uris });
            self.send(request, token).await?;
        }
        Ok(())
    }

    async fn remove_all_occurrences(
        &self,
        token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> ApiResult<()> {
        let url = self.config.endpoint(&format!("playlists/{}/tracks", playlist_id));
        for chunk in track_ids.chunks(MUTATION_CHUNK) {
            let body = RemoveItemsRequest {
                tracks: chunk.iter().map(|id| UriObject { uri: track_uri(id) }).collect(),
            };
            self.send(self.http.delete(&url).json(&body), token).await?;
        }
        Ok(())
    }

    async fn album_tracks(&self, token: &str, album_id: &str) -> ApiResult<Vec<String>> {
        let mut url = Some(format!(
            "{}?limit={}",
            self.config.endpoint(&format!("albums/{}/tracks", album_id)),
            ALBUM_PAGE
        ));
        let mut ids = Vec::new();

        while let Some(next) = url {
            let page: Paging<TrackObject> = self.get_json(&next, token).await?;
            ids.extend(page.items.into_iter().filter_map(|t| t.id));
            url = page.next;
        }
        Ok(ids)
    }

    async fn artist_top_tracks(&self, token: &str, artist_id: &str, market: &str) -> ApiResult<Vec<String>> {
        let url = format!(
            "{}?market={}",
            self.config.endpoint(&format!("artists/{}/top-tracks", artist_id)),
            market
        );
        let top: TopTracks = self.get_json(&url, token).await?;
        Ok(top.tracks.into_iter().filter_map(|t| t.id).collect())
    }
}
