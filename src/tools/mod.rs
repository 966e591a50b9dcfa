//! Tools the agent calls during a run.
//!
//! - [`evaluate`]: safe arithmetic evaluator used to audit cost formulas
//! - [`TripStore`]: read-only SQL over the uploaded trip records
//! - [`PolicyRetriever`]: ranked, cached passages from a pricing policy page

mod calculator;
mod policy;
mod trips;

pub use calculator::*;
pub use policy::*;
pub use trips::*;
