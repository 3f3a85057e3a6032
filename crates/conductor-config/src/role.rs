//! Process role selection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which loops a Conductor process runs.
///
/// Every loop only talks to the shared stores, so roles can be split across
/// processes or combined in one without changing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Orchestrator and worker in one process.
    #[default]
    All,
    /// Scheduler, result reconciler, retry/dead-letter and recovery sweeps.
    Orchestrator,
    /// Task executor pool and heartbeat.
    Worker,
}

impl NodeRole {
    /// Returns true if this role runs the orchestration loops.
    #[must_use]
    pub const fn runs_orchestrator(&self) -> bool {
        matches!(self, Self::All | Self::Orchestrator)
    }

    /// Returns true if this role runs the executor pool.
    #[must_use]
    pub const fn runs_worker(&self) -> bool {
        matches!(self, Self::All | Self::Worker)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Orchestrator => write!(f, "orchestrator"),
            Self::Worker => write!(f, "worker"),
        }
    }
}
