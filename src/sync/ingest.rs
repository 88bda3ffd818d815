use crate::chat::InboundMessage;
use crate::db::ScopeRegistry;
use crate::error::AppResult;
use crate::spotify::{extract_links, PlaylistOps};
use crate::sync::locks::ScopeLocks;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What the link handler did with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Bot message without the debug prefix, or a non-monitored channel
    Ignored,
    NoLinks,
    UnknownScope,
    /// The guild has not configured all three playlists
    NotConfigured,
    Processed {
        links: usize,
        all_time_added: usize,
        buffer_added: usize,
        failures: usize,
    },
}

/// Collects shared links into a guild's ALL_TIME and BUFFER playlists.
pub struct Ingestor {
    registry: Arc<dyn ScopeRegistry>,
    playlists: Arc<dyn PlaylistOps>,
    locks: ScopeLocks,
    debug_prefix: String,
}

impl Ingestor {
    pub fn new(
        registry: Arc<dyn ScopeRegistry>,
        playlists: Arc<dyn PlaylistOps>,
        locks: ScopeLocks,
        debug_prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            playlists,
            locks,
            debug_prefix: debug_prefix.into(),
        }
    }

    fn is_probe(&self, msg: &InboundMessage) -> bool {
        msg.from_self && msg.text.starts_with(&self.debug_prefix)
    }

    pub async fn handle_message(&self, msg: &InboundMessage) -> AppResult<IngestOutcome> {
        let probe = self.is_probe(msg);
        if msg.from_self && !probe {
            return Ok(IngestOutcome::Ignored);
        }

        let links = extract_links(&msg.text);
        if links.is_empty() {
            return Ok(IngestOutcome::NoLinks);
        }

        let Some(scope) = self.registry.scope(&msg.scope_id).await? else {
            warn!("Message in unknown guild {}, skipping {} links", msg.scope_id, links.len());
            return Ok(IngestOutcome::UnknownScope);
        };

        let accepted = scope.is_monitored(&msg.channel_id)
            || (probe && scope.test_channels.contains(&msg.channel_id));
        if !accepted {
            return Ok(IngestOutcome::Ignored);
        }

        let Some(slots) = scope.playlists.as_ref() else {
            warn!("Guild {} has links but no playlists configured", scope.guild_id);
            return Ok(IngestOutcome::NotConfigured);
        };

        // Probes run inside the self-test, which already holds the lock.
        let _guard = if probe {
            None
        } else {
            Some(self.locks.acquire(&scope.guild_id).await)
        };

        let mut all_time_added = 0;
        let mut buffer_added = 0;
        let mut failures = 0;

        for link in &links {
            let ids = match self.playlists.expand(&scope.owner, link).await {
                Ok(ids) => ids,
                Err(e) => {
                    error!(
                        "Expanding {} {} for guild {} failed, dropping the rest of the message: {}",
                        link.kind, link.id, scope.guild_id, e
                    );
                    failures += 1;
                    break;
                }
            };
            debug!("{} {} expands to {} tracks", link.kind, link.id, ids.len());

            match self.playlists.add_if_unique(&scope.owner, &slots.all_time, &ids).await {
                Ok(n) => all_time_added += n,
                Err(e) => {
                    error!("Adding {} {} to all-time playlist of guild {} failed: {}", link.kind, link.id, scope.guild_id, e);
                    failures += 1;
                    if e.is_auth_expired() {
                        break;
                    }
                    continue;
                }
            }

            match self.playlists.add_if_unique(&scope.owner, &slots.buffer, &ids).await {
                Ok(n) => buffer_added += n,
                Err(e) => {
                    error!("Adding {} {} to buffer playlist of guild {} failed: {}", link.kind, link.id, scope.guild_id, e);
                    failures += 1;
                    if e.is_auth_expired() {
                        break;
                    }
                }
            }
        }

        info!(
            "Guild {}: {} links from {}, {} new all-time, {} new buffered",
            scope.guild_id,
            links.len(),
            msg.sender_id,
            all_time_added,
            buffer_added
        );

        Ok(IngestOutcome::Processed {
            links: links.len(),
            all_time_added,
            buffer_added,
            failures,
        })
    }
}
