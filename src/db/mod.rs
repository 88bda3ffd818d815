pub mod models;
pub mod queries;

pub use models::*;
pub use queries::{init_db, load_scope, ChannelRepo, DbPool, GuildRepo, UserRepo};

#[cfg(test)]
pub use queries::setup_test_db;

use crate::error::AppResult;
use async_trait::async_trait;
use tracing::warn;

/// Read access to the registered guilds.
#[async_trait]
pub trait ScopeRegistry: Send + Sync {
    async fn scopes(&self) -> AppResult<Vec<Scope>>;

    async fn scope(&self, guild_id: &str) -> AppResult<Option<Scope>>;

    /// Scopes flagged for the connection self-test.
    async fn test_scopes(&self) -> AppResult<Vec<Scope>> {
        Ok(self
            .scopes()
            .await?
            .into_iter()
            .filter(|s| s.test_channel().is_some())
            .collect())
    }
}

/// Registry backed by the `guilds` and `channels` tables.
#[derive(Debug, Clone)]
pub struct SqliteScopeRegistry {
    pool: DbPool,
}

impl SqliteScopeRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScopeRegistry for SqliteScopeRegistry {
    async fn scopes(&self) -> AppResult<Vec<Scope>> {
        let mut scopes = Vec::new();
        for guild in GuildRepo::list(&self.pool).await? {
            let guild_id = guild.guild_id.clone();
            match load_scope(&self.pool, guild).await {
                Ok(scope) => scopes.push(scope),
                Err(e) => warn!("Skipping guild {}: {}", guild_id, e),
            }
        }
        Ok(scopes)
    }

    async fn scope(&self, guild_id: &str) -> AppResult<Option<Scope>> {
        match GuildRepo::get_by_guild_id(&self.pool, guild_id).await? {
            Some(guild) => Ok(Some(load_scope(&self.pool, guild).await?)),
            None => Ok(None),
        }
    }
}
