//! # Migration Orchestrator
//!
//! Drives a run over a discovered [`Plan`]:
//!
//! 1. **Phase 1**: levels are processed in order. Each level's items are
//!    extracted, rewritten against a snapshot of the mapping tables and
//!    cloned on a worker pool. Results are committed to the mapping store
//!    on the calling thread, in level order, before the next level starts.
//!    References the snapshot could not satisfy become pending updates on
//!    the newly created item.
//! 2. **Phase 2**: the pending queue is drained repeatedly against the
//!    now-complete tables until a pass makes no progress. What is left is
//!    reported as permanently unresolved.
//!
//! A clone failure either aborts the run and rolls back what was created
//! ([`FailurePolicy::Rollback`]) or blocks the failed item's dependents
//! and carries on ([`FailurePolicy::Continue`]). Every other problem ends
//! up as a warning in the [`RunReport`].

mod discovery;
mod report;
mod run;

pub use discovery::{ExtractionFailure, Plan, UnresolvedDependency, UrlIndex};
pub use report::{
    AmbiguousReference, BlockedItem, CloneFailure, ItemOutcome, RollbackFailure, RunReport,
    UnresolvedReference, UpdateFailure,
};
pub use run::{Orchestrator, RunOutcome};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cloner::{ClonerError, DestinationContext};
use crate::domain::{ItemId, ItemState};
use crate::mapping::MappingError;
use crate::storage::{ArtifactStore, FailurePolicy, RunConfig};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Run aborted: {item} failed to clone")]
    Aborted {
        item: ItemId,
        #[source]
        cause: ClonerError,
        report: Box<RunReport>,
    },

    #[error("Mapping conflict while committing {item}")]
    Mapping {
        item: ItemId,
        #[source]
        source: MappingError,
    },

    #[error("Invalid seed mapping")]
    Seed(#[source] MappingError),

    #[error("Invalid state transition for {item}: {from} -> {to}")]
    InvalidTransition {
        item: ItemId,
        from: ItemState,
        to: ItemState,
    },

    #[error("Failed to build worker pool")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl RunError {
    /// Report of an aborted run, if this error carries one
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunError::Aborted { report, .. } => Some(report.as_ref()),
            _ => None,
        }
    }
}

/// Everything one run needs, built once and passed to every component
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub config: RunConfig,
    pub destination: DestinationContext,

    /// `None` when artifacts are disabled
    pub artifacts: Option<ArtifactStore>,
}

impl RunContext {
    /// Creates a context with a fresh run id
    pub fn new(config: RunConfig) -> Self {
        let started_at = Utc::now();
        let nonce = ItemId::derive(&[
            started_at.to_rfc3339().as_str(),
            std::process::id().to_string().as_str(),
        ]);
        let run_id = format!(
            "{}_{}",
            started_at.format("%Y%m%d_%H%M%S"),
            &nonce.as_str()[..8]
        );
        Self::with_run_id(config, run_id, started_at)
    }

    /// Creates a context with a caller-chosen run id
    pub fn with_run_id(
        config: RunConfig,
        run_id: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let run_id = run_id.into();
        let destination = DestinationContext {
            account: config.destination.account.clone(),
            folder: config.destination.folder.clone(),
            hostname: config.destination.hostname.clone(),
            run_id: run_id.clone(),
        };
        let artifacts = ArtifactStore::from_config(&config.artifacts, &run_id);

        Self {
            run_id,
            started_at,
            config,
            destination,
            artifacts,
        }
    }

    /// Drops artifact output for this run
    pub fn without_artifacts(mut self) -> Self {
        self.artifacts = None;
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.config.failure_policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_carries_destination_and_run_id() {
        let mut config = RunConfig::default();
        config.destination.account = "parks".into();
        config.destination.hostname = Some("dst.example.com".into());

        let ctx = RunContext::with_run_id(config, "run-7", Utc::now());

        assert_eq!(ctx.destination.run_id, "run-7");
        assert_eq!(ctx.destination.account, "parks");
        assert_eq!(ctx.destination.hostname.as_deref(), Some("dst.example.com"));
        assert!(ctx.artifacts.as_ref().unwrap().root().ends_with("run-7"));
    }

    #[test]
    fn fresh_run_ids_are_timestamped() {
        let ctx = RunContext::new(RunConfig::default()).without_artifacts();

        let (stamp, nonce) = ctx.run_id.rsplit_once('_').unwrap();
        assert_eq!(stamp, ctx.started_at.format("%Y%m%d_%H%M%S").to_string());
        assert_eq!(nonce.len(), 8);
        assert!(ctx.artifacts.is_none());
    }
}
