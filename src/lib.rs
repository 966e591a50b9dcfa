//! # Fare Advisor
//!
//! A tool-using reasoning agent that decides whether a bike-share rider
//! should buy a monthly membership or keep paying per ride, from their
//! trip history and the operator's published pricing page.
//!
//! ## Tools
//!
//! - **Expression Evaluator**: safe `+ - * / ( )` arithmetic for auditing cost formulas
//! - **Trip Query Tool**: read-only SQL over uploaded trips in an in-memory SQLite database
//! - **Policy Retriever**: fetches the pricing page and ranks passages per query, with a cache
//!
//! ## Architecture
//!
//! ```text
//! Caller → FareAgent → TripStore (SQLite, per run)
//!              ↓
//!        PolicyRetriever (HTTP, cached) → pricing extraction → cost model → decision
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use fare_advisor::{AnalysisRequest, Config, FareAgent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let agent = FareAgent::new(config)?;
//!     let request = AnalysisRequest::new(trips, "https://bikes.example.com/pricing");
//!     let result = agent.analyze(&request).await?;
//!     println!("{}", result.decision);
//!     Ok(())
//! }
//! ```

/// The staged analysis agent and its result types.
pub mod agent;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Evaluator, trip query and policy retrieval tools.
pub mod tools;

pub use agent::{AnalysisRequest, AnalysisResult, Decision, FareAgent, StopReason};
pub use config::Config;
pub use error::{AppError, AppResult};
