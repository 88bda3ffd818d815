pub mod api;
pub mod auth;
pub mod client;
pub mod links;
pub mod memory;
pub mod playlist;

pub use api::{ApiError, ApiResult, PlaylistApi, PlaylistPage};
pub use auth::{OAuthRefresher, TokenProvider, TokenRefresher};
pub use client::SpotifyApi;
pub use links::{extract_links, playlist_id, playlist_url, LinkKind, TrackRef};
pub use memory::{ApiOperation, InMemoryPlaylistApi};
pub use playlist::{PlaylistClient, PlaylistOps};
