use crate::credentials::Envelope;
use crate::db::models::*;
use crate::error::{AppError, AppResult};
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tracing::{error, info};

pub type DbPool = Pool<Sqlite>;

/// Database operations for users and their sealed credentials
pub struct UserRepo;

impl UserRepo {
    pub async fn get(pool: &DbPool, user_id: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;

        Ok(user)
    }

    /// Create the user or refresh its display name. Never touches credentials.
    pub async fn upsert(pool: &DbPool, user_id: &str, username: &str) -> AppResult<User> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (id, username, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(username)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::get(pool, user_id)
            .await?
            .ok_or_else(|| AppError::internal("Failed to retrieve created user"))
    }

    /// Create the user if missing, keeping any stored display name.
    pub async fn ensure(pool: &DbPool, user_id: &str, fallback_name: &str) -> AppResult<User> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (id, username, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(fallback_name)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::get(pool, user_id)
            .await?
            .ok_or_else(|| AppError::internal("Failed to retrieve created user"))
    }

    /// Read the sealed credential pair, if the user has authorized.
    pub async fn get_credentials(pool: &DbPool, user_id: &str) -> AppResult<Option<Envelope>> {
        let row = sqlx::query_as::<_, (Option<Vec<u8>>, Option<Vec<u8>>)>(
            "SELECT token_ciphertext, wrapped_key FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        match row {
            None | Some((None, None)) => Ok(None),
            Some((Some(ciphertext), Some(wrapped_key))) => Ok(Some(Envelope {
                ciphertext,
                wrapped_key,
            })),
            Some(_) => {
                error!("User {} has a half-written credential pair", user_id);
                Err(AppError::internal(format!(
                    "credential pair for user {} is incomplete",
                    user_id
                )))
            }
        }
    }

    /// Replace both halves of the credential pair in a single statement.
    pub async fn set_credentials(pool: &DbPool, user_id: &str, record: &Envelope) -> AppResult<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (id, username, token_ciphertext, wrapped_key, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                token_ciphertext = excluded.token_ciphertext,
                wrapped_key = excluded.wrapped_key,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(&record.ciphertext)
        .bind(&record.wrapped_key)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(())
    }
}

/// Database operations for guilds
pub struct GuildRepo;

impl GuildRepo {
    /// Get guild by Discord guild ID
    pub async fn get_by_guild_id(pool: &DbPool, guild_id: &str) -> AppResult<Option<Guild>> {
        let guild = sqlx::query_as::<_, Guild>("SELECT * FROM guilds WHERE guild_id = ?")
            .bind(guild_id)
            .fetch_optional(pool)
            .await?;

        Ok(guild)
    }

    pub async fn list(pool: &DbPool) -> AppResult<Vec<Guild>> {
        let guilds = sqlx::query_as::<_, Guild>("SELECT * FROM guilds ORDER BY guild_id")
            .fetch_all(pool)
            .await?;

        Ok(guilds)
    }

    /// Create or update guild, registering its owner as a user
    pub async fn upsert(pool: &DbPool, new_guild: NewGuild) -> AppResult<Guild> {
        match &new_guild.owner_name {
            Some(name) => UserRepo::upsert(pool, &new_guild.owner_id, name).await?,
            None => UserRepo::ensure(pool, &new_guild.owner_id, &new_guild.owner_id).await?,
        };

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO guilds (guild_id, name, owner_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                name = excluded.name,
                owner_id = excluded.owner_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&new_guild.guild_id)
        .bind(&new_guild.name)
        .bind(&new_guild.owner_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::get_by_guild_id(pool, &new_guild.guild_id)
            .await?
            .ok_or_else(|| AppError::internal("Failed to retrieve created guild"))
    }

    /// Set the three playlist identifiers
    pub async fn set_playlists(pool: &DbPool, guild_id: &str, slots: &PlaylistSlots) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE guilds
            SET all_time_playlist = ?, recent_playlist = ?, buffer_playlist = ?, updated_at = ?
            WHERE guild_id = ?
            "#,
        )
        .bind(&slots.all_time)
        .bind(&slots.recent)
        .bind(&slots.buffer)
        .bind(Utc::now())
        .bind(guild_id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::UnknownScope(guild_id.to_string()));
        }
        Ok(())
    }

    /// Remove a guild and its channels
    pub async fn delete(pool: &DbPool, guild_id: &str) -> AppResult<()> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM channels WHERE guild_id = ?")
            .bind(guild_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM guilds WHERE guild_id = ?")
            .bind(guild_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Database operations for channel roles
pub struct ChannelRepo;

impl ChannelRepo {
    pub async fn list_for_guild(pool: &DbPool, guild_id: &str) -> AppResult<Vec<Channel>> {
        let channels = sqlx::query_as::<_, Channel>(
            "SELECT * FROM channels WHERE guild_id = ? ORDER BY channel_id",
        )
        .bind(guild_id)
        .fetch_all(pool)
        .await?;

        Ok(channels)
    }

    /// Set a channel's roles. A channel with no roles left is removed.
    pub async fn set_flags(
        pool: &DbPool,
        guild_id: &str,
        channel_id: &str,
        flags: ChannelFlags,
    ) -> AppResult<()> {
        if !(flags.monitor || flags.notify || flags.test) {
            sqlx::query("DELETE FROM channels WHERE channel_id = ? AND guild_id = ?")
                .bind(channel_id)
                .bind(guild_id)
                .execute(pool)
                .await?;
            return Ok(());
        }

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO channels (channel_id, guild_id, monitor, notify, test, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(channel_id) DO UPDATE SET
                guild_id = excluded.guild_id,
                monitor = excluded.monitor,
                notify = excluded.notify,
                test = excluded.test,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(channel_id)
        .bind(guild_id)
        .bind(flags.monitor)
        .bind(flags.notify)
        .bind(flags.test)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(())
    }
}

/// Load a guild with its owner and channels resolved.
pub async fn load_scope(pool: &DbPool, guild: Guild) -> AppResult<Scope> {
    let owner = UserRepo::get(pool, &guild.owner_id)
        .await?
        .ok_or_else(|| AppError::internal(format!("guild {} has no owner row", guild.guild_id)))?;
    let channels = ChannelRepo::list_for_guild(pool, &guild.guild_id).await?;
    Ok(Scope::from_rows(guild, &owner, &channels))
}

#[cfg(test)]
pub async fn setup_test_db() -> DbPool {
    use sqlx::sqlite::SqlitePoolOptions;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    init_db(&pool).await.expect("Failed to init database");
    pool
}

/// Initialize database with migrations
pub async fn init_db(pool: &DbPool) -> AppResult<()> {
    info!("Running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY NOT NULL,
            username TEXT NOT NULL,
            token_ciphertext BLOB,
            wrapped_key BLOB,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            CHECK ((token_ciphertext IS NULL) = (wrapped_key IS NULL))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS guilds (
            guild_id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            owner_id TEXT NOT NULL REFERENCES users(id),
            all_time_playlist TEXT,
            recent_playlist TEXT,
            buffer_playlist TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            channel_id TEXT PRIMARY KEY NOT NULL,
            guild_id TEXT NOT NULL REFERENCES guilds(guild_id),
            monitor BOOLEAN NOT NULL DEFAULT false,
            notify BOOLEAN NOT NULL DEFAULT false,
            test BOOLEAN NOT NULL DEFAULT false,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_channels_guild ON channels(guild_id)")
        .execute(pool)
        .await?;

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_guild(guild_id: &str) -> NewGuild {
        NewGuild {
            guild_id: guild_id.to_string(),
            name: "Test Guild".to_string(),
            owner_id: "u1".to_string(),
            owner_name: Some("owner".to_string()),
        }
    }

    fn envelope(tag: u8) -> Envelope {
        Envelope {
            ciphertext: vec![tag; 40],
            wrapped_key: vec![tag.wrapping_add(1); 24],
        }
    }

    // --- UserRepo tests ---

    #[tokio::test]
    async fn test_credentials_absent_for_unknown_user() {
        let pool = setup_test_db().await;
        assert!(UserRepo::get_credentials(&pool, "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credentials_absent_before_authorization() {
        let pool = setup_test_db().await;
        UserRepo::upsert(&pool, "u1", "owner").await.unwrap();
        assert!(UserRepo::get_credentials(&pool, "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_credentials_replaces_pair() {
        let pool = setup_test_db().await;
        UserRepo::upsert(&pool, "u1", "owner").await.unwrap();

        UserRepo::set_credentials(&pool, "u1", &envelope(1)).await.unwrap();
        UserRepo::set_credentials(&pool, "u1", &envelope(7)).await.unwrap();

        let stored = UserRepo::get_credentials(&pool, "u1").await.unwrap().unwrap();
        assert_eq!(stored, envelope(7));

        // Display name survives a credential write.
        let user = UserRepo::get(&pool, "u1").await.unwrap().unwrap();
        assert_eq!(user.username, "owner");
        assert!(user.has_credentials());
    }

    #[tokio::test]
    async fn test_set_credentials_creates_missing_user() {
        let pool = setup_test_db().await;
        UserRepo::set_credentials(&pool, "u2", &envelope(3)).await.unwrap();
        assert_eq!(
            UserRepo::get_credentials(&pool, "u2").await.unwrap(),
            Some(envelope(3))
        );
    }

    #[tokio::test]
    async fn test_upsert_preserves_credentials() {
        let pool = setup_test_db().await;
        UserRepo::set_credentials(&pool, "u1", &envelope(5)).await.unwrap();
        UserRepo::upsert(&pool, "u1", "renamed").await.unwrap();

        assert_eq!(
            UserRepo::get_credentials(&pool, "u1").await.unwrap(),
            Some(envelope(5))
        );
    }

    #[tokio::test]
    async fn test_half_written_pair_is_rejected_by_schema() {
        let pool = setup_test_db().await;
        let result = sqlx::query(
            "INSERT INTO users (id, username, token_ciphertext, created_at, updated_at) VALUES ('u9', 'x', x'00', 0, 0)",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }

    // --- GuildRepo tests ---

    #[tokio::test]
    async fn test_guild_upsert_registers_owner() {
        let pool = setup_test_db().await;
        let guild = GuildRepo::upsert(&pool, new_guild("g1")).await.unwrap();
        assert_eq!(guild.owner_id, "u1");
        assert!(guild.all_time_playlist.is_none());
        assert!(UserRepo::get(&pool, "u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_guild_upsert_without_owner_name_keeps_username() {
        let pool = setup_test_db().await;
        GuildRepo::upsert(&pool, new_guild("g1")).await.unwrap();

        let mut uncached = new_guild("g1");
        uncached.owner_name = None;
        GuildRepo::upsert(&pool, uncached).await.unwrap();

        let user = UserRepo::get(&pool, "u1").await.unwrap().unwrap();
        assert_eq!(user.username, "owner");
    }

    #[tokio::test]
    async fn test_guild_upsert_without_owner_name_falls_back_to_id() {
        let pool = setup_test_db().await;
        let mut uncached = new_guild("g1");
        uncached.owner_name = None;
        GuildRepo::upsert(&pool, uncached).await.unwrap();

        let user = UserRepo::get(&pool, "u1").await.unwrap().unwrap();
        assert_eq!(user.username, "u1");
    }

    #[tokio::test]
    async fn test_guild_get_nonexistent_returns_none() {
        let pool = setup_test_db().await;
        let result = GuildRepo::get_by_guild_id(&pool, "nonexistent").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_set_playlists() {
        let pool = setup_test_db().await;
        GuildRepo::upsert(&pool, new_guild("g1")).await.unwrap();

        let slots = PlaylistSlots {
            all_time: "a".to_string(),
            recent: "r".to_string(),
            buffer: "b".to_string(),
        };
        GuildRepo::set_playlists(&pool, "g1", &slots).await.unwrap();

        let guild = GuildRepo::get_by_guild_id(&pool, "g1").await.unwrap().unwrap();
        let scope = load_scope(&pool, guild).await.unwrap();
        assert_eq!(scope.playlists, Some(slots));
    }

    #[tokio::test]
    async fn test_set_playlists_unknown_guild() {
        let pool = setup_test_db().await;
        let slots = PlaylistSlots {
            all_time: "a".to_string(),
            recent: "r".to_string(),
            buffer: "b".to_string(),
        };
        let err = GuildRepo::set_playlists(&pool, "ghost", &slots).await.unwrap_err();
        assert!(matches!(err, AppError::UnknownScope(_)));
    }

    #[tokio::test]
    async fn test_guild_delete_removes_channels() {
        let pool = setup_test_db().await;
        GuildRepo::upsert(&pool, new_guild("g1")).await.unwrap();
        ChannelRepo::set_flags(&pool, "g1", "c1", ChannelFlags { monitor: true, ..Default::default() })
            .await
            .unwrap();

        GuildRepo::delete(&pool, "g1").await.unwrap();
        assert!(GuildRepo::get_by_guild_id(&pool, "g1").await.unwrap().is_none());
        assert!(ChannelRepo::list_for_guild(&pool, "g1").await.unwrap().is_empty());
    }

    // --- ChannelRepo tests ---

    #[tokio::test]
    async fn test_channel_flags_update_and_clear() {
        let pool = setup_test_db().await;
        GuildRepo::upsert(&pool, new_guild("g1")).await.unwrap();

        ChannelRepo::set_flags(&pool, "g1", "c1", ChannelFlags { monitor: true, ..Default::default() })
            .await
            .unwrap();
        ChannelRepo::set_flags(
            &pool,
            "g1",
            "c1",
            ChannelFlags { monitor: true, notify: true, test: false },
        )
        .await
        .unwrap();

        let channels = ChannelRepo::list_for_guild(&pool, "g1").await.unwrap();
        assert_eq!(channels.len(), 1);
        assert!(channels[0].monitor && channels[0].notify && !channels[0].test);

        ChannelRepo::set_flags(&pool, "g1", "c1", ChannelFlags::default()).await.unwrap();
        assert!(ChannelRepo::list_for_guild(&pool, "g1").await.unwrap().is_empty());
    }
}
