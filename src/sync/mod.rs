//! Playlist maintenance: link ingestion, the weekly rotation, the connection
//! self-test and the cron scheduler that drives them.
//!
//! All playlist mutations for a guild happen under that guild's entry in
//! [`ScopeLocks`]. Scheduled cycles skip a busy guild; ingestion waits.

pub mod ingest;
pub mod locks;
pub mod reconcile;
pub mod scheduler;
pub mod selftest;

pub use ingest::{IngestOutcome, Ingestor};
pub use locks::ScopeLocks;
pub use reconcile::{CycleOutcome, CycleReport, Reconciler, RotationStep};
pub use scheduler::{CronSchedule, Job, Scheduler};
pub use selftest::{ProbeOutcome, ProbeReport, SelfTest};
