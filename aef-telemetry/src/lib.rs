//! # aef-telemetry
//!
//! Structured logging and tracing for evaluation runs.
//!
//! ## Features
//! - Console or JSON log lines through `tracing`
//! - Optional OTLP span export through OpenTelemetry
//! - Span helpers so every log line inside a run carries its run id
//!
//! ## Usage
//!
//! ```rust
//! use aef_telemetry::{eval_run_span, info, init_telemetry};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_telemetry("agent-eval")?;
//!
//!     let span = eval_run_span("3f1c", "default-agent-evals");
//!     let _enter = span.enter();
//!     info!("run started");
//!     Ok(())
//! }
//! ```

pub mod init;
pub mod spans;

// Re-export tracing macros for convenience
pub use tracing::{Instrument, Span, debug, error, info, instrument, trace, warn};

pub use spans::*;

pub use init::{init_json_telemetry, init_telemetry, init_with_otlp, shutdown_telemetry};
