use crate::chat::ChatTransport;
use crate::db::{PlaylistSlots, Scope, ScopeRegistry};
use crate::error::{AppError, AppResult};
use crate::spotify::{playlist_url, PlaylistOps};
use crate::sync::locks::ScopeLocks;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Steps of the rotation, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStep {
    WipeRecent,
    CopyBuffer,
    WipeBuffer,
}

impl std::fmt::Display for RotationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::WipeRecent => "wipe recent",
            Self::CopyBuffer => "copy buffer to recent",
            Self::WipeBuffer => "wipe buffer",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Rotated { moved: usize, notified: usize },
    NotConfigured,
    /// Another cycle held the guild's lock
    Busy,
    Failed { step: RotationStep, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub scope_id: String,
    pub outcome: CycleOutcome,
}

/// Rotates BUFFER into RECENT for every guild and announces the result.
pub struct Reconciler {
    registry: Arc<dyn ScopeRegistry>,
    playlists: Arc<dyn PlaylistOps>,
    transport: Arc<dyn ChatTransport>,
    locks: ScopeLocks,
}

impl Reconciler {
    pub fn new(
        registry: Arc<dyn ScopeRegistry>,
        playlists: Arc<dyn PlaylistOps>,
        transport: Arc<dyn ChatTransport>,
        locks: ScopeLocks,
    ) -> Self {
        Self {
            registry,
            playlists,
            transport,
            locks,
        }
    }

    /// One scheduled firing: every guild in turn, failures isolated per guild.
    pub async fn run(&self) -> AppResult<Vec<CycleReport>> {
        let scopes = self.registry.scopes().await?;
        info!("Starting playlist rotation for {} guilds", scopes.len());

        let mut reports = Vec::with_capacity(scopes.len());
        for scope in &scopes {
            let outcome = self.reconcile_scope(scope).await;
            reports.push(CycleReport {
                scope_id: scope.guild_id.clone(),
                outcome,
            });
        }
        Ok(reports)
    }

    pub async fn reconcile_scope(&self, scope: &Scope) -> CycleOutcome {
        let Some(slots) = scope.playlists.as_ref() else {
            info!("Guild {} has no playlists configured, skipping rotation", scope.guild_id);
            return CycleOutcome::NotConfigured;
        };

        let Some(_guard) = self.locks.try_acquire(&scope.guild_id) else {
            warn!("Guild {} is busy, skipping this rotation", scope.guild_id);
            return CycleOutcome::Busy;
        };

        match self.rotate(scope, slots).await {
            Ok(moved) => {
                let notified = self.notify(scope, slots).await;
                info!("Guild {}: rotated {} tracks into recent", scope.guild_id, moved);
                CycleOutcome::Rotated { moved, notified }
            }
            Err((step, e)) => {
                if e.is_retryable() {
                    warn!("Guild {}: rotation stopped at '{}', next cycle retries: {}", scope.guild_id, step, e);
                } else {
                    error!("Guild {}: rotation stopped at '{}': {}", scope.guild_id, step, e);
                }
                CycleOutcome::Failed {
                    step,
                    error: e.to_string(),
                }
            }
        }
    }

    /// wipe(RECENT), copy(BUFFER -> RECENT), wipe(BUFFER). Stops at the first
    /// failed step so BUFFER is only cleared once its copy landed.
    async fn rotate(&self, scope: &Scope, slots: &PlaylistSlots) -> Result<usize, (RotationStep, AppError)> {
        let owner = &scope.owner;

        self.playlists
            .wipe(owner, &slots.recent)
            .await
            .map_err(|e| (RotationStep::WipeRecent, e))?;

        let moved = self
            .playlists
            .copy_all(owner, &slots.buffer, &slots.recent)
            .await
            .map_err(|e| (RotationStep::CopyBuffer, e))?;

        self.playlists
            .wipe(owner, &slots.buffer)
            .await
            .map_err(|e| (RotationStep::WipeBuffer, e))?;

        Ok(moved)
    }

    /// Post the digest to each notify channel. Returns how many were sent.
    pub async fn notify(&self, scope: &Scope, slots: &PlaylistSlots) -> usize {
        if scope.notify_channels.is_empty() {
            error!("Guild {} has no notify channel, digest not sent", scope.guild_id);
            return 0;
        }

        let text = digest(slots);
        let mut sent = 0;
        for channel in &scope.notify_channels {
            if let Err(e) = self.transport.send(channel, &text).await {
                error!(
                    "Cannot post digest to channel {} of guild {}, stopping notification: {}",
                    channel, scope.guild_id, e
                );
                break;
            }
            sent += 1;
        }
        sent
    }
}

fn digest(slots: &PlaylistSlots) -> String {
    format!(
        "Check out all the songs shared recently!\n{}\n\nYou can also find all songs ever shared here:\n{}",
        playlist_url(&slots.recent),
        playlist_url(&slots.all_time)
    )
}
