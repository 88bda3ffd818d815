use crate::credentials::Principal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Discord user who may own a delegated Spotify credential
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    /// Sealed token, absent until the user has authorized Spotify once
    pub token_ciphertext: Option<Vec<u8>>,
    /// Wrapped sealing key, present iff `token_ciphertext` is
    pub wrapped_key: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn principal(&self) -> Principal {
        Principal::new(self.id.clone(), self.username.clone())
    }

    pub fn has_credentials(&self) -> bool {
        self.token_ciphertext.is_some()
    }
}

/// Guild (server) row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Guild {
    pub guild_id: String,
    pub name: String,
    pub owner_id: String,
    pub all_time_playlist: Option<String>,
    pub recent_playlist: Option<String>,
    pub buffer_playlist: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Channel role flags
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: String,
    pub guild_id: String,
    /// Links posted here are collected
    pub monitor: bool,
    /// Digest announcements go here
    pub notify: bool,
    /// Self-test probes are posted here
    pub test: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The three playlist roles every guild owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaylistRole {
    AllTime,
    Recent,
    Buffer,
}

impl PlaylistRole {
    pub const ALL: [PlaylistRole; 3] = [Self::AllTime, Self::Recent, Self::Buffer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllTime => "all_time",
            Self::Recent => "recent",
            Self::Buffer => "buffer",
        }
    }
}

impl std::fmt::Display for PlaylistRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Playlist identifiers for a fully configured guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSlots {
    pub all_time: String,
    pub recent: String,
    pub buffer: String,
}

impl PlaylistSlots {
    pub fn get(&self, role: PlaylistRole) -> &str {
        match role {
            PlaylistRole::AllTime => &self.all_time,
            PlaylistRole::Recent => &self.recent,
            PlaylistRole::Buffer => &self.buffer,
        }
    }
}

/// A guild with its owner, playlists and channel roles resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub guild_id: String,
    pub name: String,
    pub owner: Principal,
    /// `None` until all three playlists are configured
    pub playlists: Option<PlaylistSlots>,
    pub monitor_channels: Vec<String>,
    pub notify_channels: Vec<String>,
    pub test_channels: Vec<String>,
}

impl Scope {
    pub fn from_rows(guild: Guild, owner: &User, channels: &[Channel]) -> Self {
        let playlists = match (guild.all_time_playlist, guild.recent_playlist, guild.buffer_playlist) {
            (Some(all_time), Some(recent), Some(buffer)) => Some(PlaylistSlots {
                all_time,
                recent,
                buffer,
            }),
            _ => None,
        };

        let ids = |pred: fn(&Channel) -> bool| {
            channels
                .iter()
                .filter(|c| pred(c))
                .map(|c| c.channel_id.clone())
                .collect::<Vec<_>>()
        };

        Self {
            guild_id: guild.guild_id,
            name: guild.name,
            owner: owner.principal(),
            playlists,
            monitor_channels: ids(|c: &Channel| c.monitor),
            notify_channels: ids(|c: &Channel| c.notify),
            test_channels: ids(|c: &Channel| c.test),
        }
    }

    pub fn is_monitored(&self, channel_id: &str) -> bool {
        self.monitor_channels.iter().any(|c| c == channel_id)
    }

    /// Channel used by the connection self-test, if this is a test scope.
    pub fn test_channel(&self) -> Option<&str> {
        self.test_channels.first().map(String::as_str)
    }
}

/// New guild registration
#[derive(Debug, Clone)]
pub struct NewGuild {
    pub guild_id: String,
    pub name: String,
    pub owner_id: String,
    /// Display name, when known. `None` leaves a stored name untouched.
    pub owner_name: Option<String>,
}

/// Channel role update
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelFlags {
    pub monitor: bool,
    pub notify: bool,
    pub test: bool,
}
