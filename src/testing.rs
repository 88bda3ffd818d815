//! Shared fixtures for unit tests.

use crate::chat::{ChatTransport, InboundMessage};
use crate::credentials::{crypto, CredentialCache, KeyPair, MemoryCredentialStore, Principal, Token};
use crate::db::{
    setup_test_db, ChannelFlags, ChannelRepo, DbPool, GuildRepo, NewGuild, PlaylistSlots, Scope,
    ScopeRegistry, SqliteScopeRegistry,
};
use crate::error::{AppError, AppResult};
use crate::spotify::{
    ApiError, ApiResult, InMemoryPlaylistApi, LinkKind, PlaylistClient, TokenProvider,
    TokenRefresher, TrackRef,
};
use crate::sync::{Ingestor, Reconciler, ScopeLocks, SelfTest};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

pub const TEST_ACCESS_TOKEN: &str = "test-access-token";
pub const GUILD: &str = "g1";
pub const TRACK: &str = "4uLU6hMCjMI75M1A2tKUQC";
pub const ALBUM: &str = "6N9PS4QXF1D0OWPk0Sxtb4";
pub const ARTIST: &str = "0gxyHStUsqpMadRV0Di1Qt";

/// Deployment key pair for tests. Small modulus keeps key generation fast.
pub fn test_keys() -> Arc<KeyPair> {
    static KEYS: OnceLock<Arc<KeyPair>> = OnceLock::new();
    KEYS.get_or_init(|| Arc::new(KeyPair::generate(1024).unwrap()))
        .clone()
}

/// A second, unrelated key pair
pub fn other_keys() -> Arc<KeyPair> {
    static KEYS: OnceLock<Arc<KeyPair>> = OnceLock::new();
    KEYS.get_or_init(|| Arc::new(KeyPair::generate(1024).unwrap()))
        .clone()
}

pub fn owner() -> Principal {
    Principal::new("u-owner", "owner")
}

pub fn fresh_token(access: &str) -> Token {
    Token::issued_now(
        access,
        Some("refresh-token".to_string()),
        Duration::from_secs(3600),
        Some("playlist-modify-public".to_string()),
    )
}

pub fn expired_token(access: &str, refresh: &str) -> Token {
    let mut token = Token::issued_now(access, Some(refresh.to_string()), Duration::from_secs(3600), None);
    token.expires_at = Utc::now() - chrono::Duration::hours(1);
    token
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn message(channel_id: &str, text: &str) -> InboundMessage {
    InboundMessage {
        sender_id: "u-member".to_string(),
        channel_id: channel_id.to_string(),
        scope_id: GUILD.to_string(),
        text: text.to_string(),
        from_self: false,
    }
}

/// Refresher returning a fixed result and counting calls
pub struct StubRefresher {
    result: ApiResult<String>,
    calls: AtomicUsize,
}

impl StubRefresher {
    pub fn issuing(access: &str) -> Self {
        Self {
            result: Ok(access.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: ApiError) -> Self {
        Self {
            result: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for StubRefresher {
    async fn refresh(&self, _refresh_token: &str) -> ApiResult<Token> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let access = self.result.clone()?;
        Ok(Token::issued_now(access, None, Duration::from_secs(3600), None))
    }
}

/// Token provider whose cache already holds a valid token for [`owner`]
pub fn token_provider() -> Arc<TokenProvider> {
    let store = Arc::new(MemoryCredentialStore::new());
    let plaintext = serde_json::to_vec(&fresh_token(TEST_ACCESS_TOKEN)).unwrap();
    store.overwrite(&owner().id, crypto::wrap(&plaintext, test_keys().public()).unwrap());

    let cache = Arc::new(CredentialCache::new(store, test_keys()));
    Arc::new(TokenProvider::new(cache, Arc::new(StubRefresher::issuing("refreshed"))))
}

/// Chat transport that records posts and can hand them to the link handler
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    rejected: DashSet<String>,
    forward: OnceLock<(Arc<Ingestor>, String)>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Sends to this channel fail as if it did not exist
    pub fn reject(&self, channel_id: &str) {
        self.rejected.insert(channel_id.to_string());
    }

    /// Deliver every post back to `ingestor` as the bot's own message
    pub fn forward_to(&self, ingestor: Arc<Ingestor>, scope_id: &str) {
        let _ = self.forward.set((ingestor, scope_id.to_string()));
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send(&self, channel_id: &str, text: &str) -> AppResult<()> {
        if self.rejected.contains(channel_id) {
            return Err(AppError::MissingChannel(channel_id.to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));

        if let Some((ingestor, scope_id)) = self.forward.get() {
            let echo = InboundMessage {
                sender_id: "bot".to_string(),
                channel_id: channel_id.to_string(),
                scope_id: scope_id.clone(),
                text: text.to_string(),
                from_self: true,
            };
            ingestor.handle_message(&echo).await?;
        }
        Ok(())
    }
}

/// One registered guild with monitor, notify and test channels, backed by
/// in-memory SQLite and an in-memory Spotify API.
pub struct Fixture {
    pub pool: DbPool,
    pub registry: Arc<SqliteScopeRegistry>,
    pub api: Arc<InMemoryPlaylistApi>,
    pub playlists: Arc<PlaylistClient>,
    pub transport: Arc<RecordingTransport>,
    pub locks: ScopeLocks,
    pub guild_id: String,
    pub slots: PlaylistSlots,
}

impl Fixture {
    pub async fn new() -> Self {
        let pool = setup_test_db().await;
        let slots = PlaylistSlots {
            all_time: "pl-all-time".to_string(),
            recent: "pl-recent".to_string(),
            buffer: "pl-buffer".to_string(),
        };
        register_guild(&pool, GUILD, &slots).await;
        for (channel, flags) in [
            ("c-monitor", ChannelFlags { monitor: true, ..Default::default() }),
            ("c-notify", ChannelFlags { notify: true, ..Default::default() }),
            ("c-test", ChannelFlags { test: true, ..Default::default() }),
        ] {
            ChannelRepo::set_flags(&pool, GUILD, channel, flags).await.unwrap();
        }

        let api = Arc::new(
            InMemoryPlaylistApi::new()
                .with_playlist(&slots.all_time, &[])
                .with_playlist(&slots.recent, &[])
                .with_playlist(&slots.buffer, &[])
                .with_album(ALBUM, &["album-t1", "album-t2"])
                .with_artist(ARTIST, &["artist-t1", "artist-t2"]),
        );
        let playlists = Arc::new(PlaylistClient::new(api.clone(), token_provider(), 2, "US"));

        Self {
            registry: Arc::new(SqliteScopeRegistry::new(pool.clone())),
            pool,
            api,
            playlists,
            transport: Arc::new(RecordingTransport::default()),
            locks: ScopeLocks::new(),
            guild_id: GUILD.to_string(),
            slots,
        }
    }

    /// Register another guild whose playlists do not exist remotely
    pub async fn add_guild(&self, guild_id: &str, prefix: &str) {
        let slots = PlaylistSlots {
            all_time: format!("{}-all-time", prefix),
            recent: format!("{}-recent", prefix),
            buffer: format!("{}-buffer", prefix),
        };
        register_guild(&self.pool, guild_id, &slots).await;
    }

    pub async fn scope(&self) -> Scope {
        self.registry.scope(&self.guild_id).await.unwrap().unwrap()
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(self.registry.clone(), self.playlists.clone(), self.locks.clone(), "!debug")
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.registry.clone(),
            self.playlists.clone(),
            self.transport.clone(),
            self.locks.clone(),
        )
    }

    pub fn self_test(&self) -> SelfTest {
        SelfTest::new(
            self.registry.clone(),
            self.playlists.clone(),
            self.transport.clone(),
            self.locks.clone(),
            vec![
                TrackRef::new(LinkKind::Track, TRACK),
                TrackRef::new(LinkKind::Album, ALBUM),
                TrackRef::new(LinkKind::Artist, ARTIST),
            ],
            "!debug",
            Duration::ZERO,
            Duration::ZERO,
        )
    }

    /// Probes posted by the self-test reach the link handler
    pub fn forward_probes(&self) {
        self.transport.forward_to(Arc::new(self.ingestor()), &self.guild_id);
    }
}

async fn register_guild(pool: &DbPool, guild_id: &str, slots: &PlaylistSlots) {
    let owner = owner();
    GuildRepo::upsert(
        pool,
        NewGuild {
            guild_id: guild_id.to_string(),
            name: format!("Guild {}", guild_id),
            owner_id: owner.id,
            owner_name: Some(owner.display_name),
        },
    )
    .await
    .unwrap();
    GuildRepo::set_playlists(pool, guild_id, slots).await.unwrap();
}
