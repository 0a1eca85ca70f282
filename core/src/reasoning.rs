//! Calls to the external reasoning service.
//!
//! Both calls are opaque to the pipeline: the planner turns a target into a
//! [`ScanPlan`] and the analyzer turns documents into free text. Neither one
//! lets an error escape its boundary.

pub mod analyzer;
pub mod client;
pub mod planner;

pub use analyzer::{Analyzer, ReasoningAnalyzer};
pub use client::{ReasoningClient, ReasoningError};
pub use planner::{Planner, ReasoningPlanner, ScanPlan};
