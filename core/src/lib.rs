//! # scanai core
//!
//! Planned reconnaissance scans over one or more IPv4 ranges.
//!
//! * **[`orchestrator`]**: one pipeline per target, plus the tunnel lifecycle.
//! * **[`pipeline`]**: the per-target state machine.
//! * **[`runner`]**, **[`parser`]**, **[`extractor`]**: scanner invocation,
//!   XML conversion and open-port extraction.
//! * **[`tunnel`]**: SSH dynamic forwarding and the proxy-chain file.
//! * **[`reasoning`]**: the planning and analysis calls.

pub mod extractor;
pub mod orchestrator;
pub mod parser;
pub mod pipeline;
pub mod reasoning;
pub mod runner;
pub mod tunnel;
