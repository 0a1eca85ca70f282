pub mod config;
pub mod network;

mod macros;

#[doc(hidden)]
pub use tracing;
