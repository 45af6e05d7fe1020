//! Progress events emitted by long-running operations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of stages a progress event can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Scanning,
    Rendering,
    Collecting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scanning => "scanning",
            Stage::Rendering => "rendering",
            Stage::Collecting => "collecting",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress update. `total` may be an estimate that grows while a
/// scan discovers more entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub stage: Stage,
    pub current: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(stage: Stage, current: u64, total: u64) -> Self {
        Self {
            stage,
            current,
            total,
        }
    }
}

/// Receives progress events. Reporting is fire-and-forget: an implementation
/// must never block the operation, and a dropped consumer is not an error.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, progress: Progress) {
        self(progress)
    }
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: Progress) {}
}
