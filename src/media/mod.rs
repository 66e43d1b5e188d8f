// Media tooling around the external encoder
//
// - Commands: invocation builder and conversion plans
// - Planner: maps a conversion request to a plan
// - Probe: duration lookup and tool availability checks

pub mod commands;
pub mod planner;
pub mod probe;

use async_trait::async_trait;
use std::path::Path;

pub use commands::*;
pub use planner::*;
pub use probe::*;

/// Source of the total media duration used to turn elapsed time into a
/// percentage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Duration in seconds, or `None` when it cannot be determined
    async fn probe_duration(&self, path: &Path) -> Option<f64>;
}
