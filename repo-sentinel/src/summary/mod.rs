//! Per-cycle summary types and helpers.

mod cycle_summary;
mod result;

pub use cycle_summary::CycleSummary;
pub use result::RepoOutcome;
