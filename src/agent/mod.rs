//! The fare analysis agent.
//!
//! - [`FareAgent`]: runs the staged analysis and returns an [`AnalysisResult`]
//! - [`StepLog`]: the append-only Thought/Action/Observation trace of a run
//! - [`analyze_trips`]: usage aggregates computed through the trip query tool
//! - [`extract_pricing`]: first-match pricing facts from policy passages
//! - [`calculate_costs`]: pay-per-use vs membership comparison
//!
//! Each stage takes the run's [`StepLog`] by mutable reference; nothing is
//! shared between runs except the retriever's passage cache.

mod analysis;
mod costs;
mod orchestrator;
mod pricing;
mod report;
mod steps;

pub use analysis::*;
pub use costs::*;
pub use orchestrator::*;
pub use pricing::*;
pub use report::*;
pub use steps::*;
