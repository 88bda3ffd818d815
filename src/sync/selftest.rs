use crate::chat::ChatTransport;
use crate::db::{PlaylistRole, PlaylistSlots, Scope, ScopeRegistry};
use crate::error::AppResult;
use crate::spotify::{LinkKind, PlaylistOps, TrackRef};
use crate::sync::locks::ScopeLocks;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Passed,
    /// ALL_TIME still held tracks after the wipe and settle wait
    WipeIncomplete { leftover: usize },
    /// Nothing landed in ALL_TIME after posting the probe
    Empty,
    Mismatch { expected: String, found: String },
    Error(String),
    NoTestChannel,
    NotConfigured,
    Busy,
}

impl ProbeOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Result of one probe. `kind` is `None` when the whole guild was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub scope_id: String,
    pub kind: Option<LinkKind>,
    pub outcome: ProbeOutcome,
}

/// Connection self-test: posts known links and checks they reach ALL_TIME.
pub struct SelfTest {
    registry: Arc<dyn ScopeRegistry>,
    playlists: Arc<dyn PlaylistOps>,
    transport: Arc<dyn ChatTransport>,
    locks: ScopeLocks,
    probes: Vec<TrackRef>,
    debug_prefix: String,
    settle: Duration,
    processing: Duration,
}

impl SelfTest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn ScopeRegistry>,
        playlists: Arc<dyn PlaylistOps>,
        transport: Arc<dyn ChatTransport>,
        locks: ScopeLocks,
        probes: Vec<TrackRef>,
        debug_prefix: impl Into<String>,
        settle: Duration,
        processing: Duration,
    ) -> Self {
        Self {
            registry,
            playlists,
            transport,
            locks,
            probes,
            debug_prefix: debug_prefix.into(),
            settle,
            processing,
        }
    }

    pub async fn run(&self) -> AppResult<Vec<ProbeReport>> {
        let scopes = self.registry.test_scopes().await?;
        if scopes.is_empty() {
            info!("No guild has a test channel, self-test skipped");
        }

        let mut reports = Vec::new();
        for scope in &scopes {
            reports.extend(self.run_scope(scope).await);
        }

        let passed = reports.iter().filter(|r| r.outcome.passed()).count();
        info!("Self-test finished: {}/{} probes passed", passed, reports.len());
        Ok(reports)
    }

    pub async fn run_scope(&self, scope: &Scope) -> Vec<ProbeReport> {
        let skipped = |outcome| {
            vec![ProbeReport {
                scope_id: scope.guild_id.clone(),
                kind: None,
                outcome,
            }]
        };

        let Some(channel) = scope.test_channel() else {
            error!("Guild {} has no test channel, probes skipped", scope.guild_id);
            return skipped(ProbeOutcome::NoTestChannel);
        };
        let Some(slots) = scope.playlists.as_ref() else {
            warn!("Guild {} has no playlists configured, probes skipped", scope.guild_id);
            return skipped(ProbeOutcome::NotConfigured);
        };
        let Some(_guard) = self.locks.try_acquire(&scope.guild_id) else {
            warn!("Guild {} is busy, self-test skipped", scope.guild_id);
            return skipped(ProbeOutcome::Busy);
        };

        let mut reports = Vec::with_capacity(self.probes.len());
        for probe in &self.probes {
            let outcome = self.probe(scope, slots, channel, probe).await;
            match &outcome {
                ProbeOutcome::Passed => info!("Self-test {} probe passed for guild {}", probe.kind, scope.guild_id),
                other => error!("Self-test {} probe failed for guild {}: {:?}", probe.kind, scope.guild_id, other),
            }
            reports.push(ProbeReport {
                scope_id: scope.guild_id.clone(),
                kind: Some(probe.kind),
                outcome,
            });
        }
        reports
    }

    async fn probe(&self, scope: &Scope, slots: &PlaylistSlots, channel: &str, probe: &TrackRef) -> ProbeOutcome {
        let owner = &scope.owner;

        for role in PlaylistRole::ALL {
            if let Err(e) = self.playlists.wipe(owner, slots.get(role)).await {
                return ProbeOutcome::Error(format!("wiping {} playlist: {}", role, e));
            }
        }

        tokio::time::sleep(self.settle).await;

        match self.playlists.track_ids(owner, &slots.all_time).await {
            Ok(left) if !left.is_empty() => {
                warn!("All-time playlist of guild {} not empty after wipe: {:?}", scope.guild_id, left);
                return ProbeOutcome::WipeIncomplete { leftover: left.len() };
            }
            Ok(_) => {}
            Err(e) => return ProbeOutcome::Error(format!("verifying wipe: {}", e)),
        }

        let expected = match self.playlists.expand(owner, probe).await {
            Ok(ids) => match ids.into_iter().next() {
                Some(id) => id,
                None => return ProbeOutcome::Error(format!("{} {} has no tracks", probe.kind, probe.id)),
            },
            Err(e) => return ProbeOutcome::Error(format!("resolving probe: {}", e)),
        };

        let text = format!("{} {}", self.debug_prefix, probe.url());
        if let Err(e) = self.transport.send(channel, &text).await {
            return ProbeOutcome::Error(format!("posting probe: {}", e));
        }

        tokio::time::sleep(self.processing).await;

        match self.playlists.track_ids(owner, &slots.all_time).await {
            Ok(ids) => match ids.first() {
                None => ProbeOutcome::Empty,
                Some(found) if *found == expected => ProbeOutcome::Passed,
                Some(found) => ProbeOutcome::Mismatch {
                    expected,
                    found: found.clone(),
                },
            },
            Err(e) => ProbeOutcome::Error(format!("reading all-time playlist: {}", e)),
        }
    }
}
