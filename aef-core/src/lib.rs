//! # aef-core
//!
//! Core types and traits for the agent evaluation framework.
//!
//! ## Overview
//!
//! - [`AgentAdapter`] - the single capability every evaluated agent exposes
//! - [`AdapterFactory`] - builds an adapter from opaque configuration parameters
//! - [`ToolCall`] / [`AgentResponse`] / [`DatasetRecord`] - the data model
//! - [`MetricValue`] / [`MetricResult`] - per-record scores
//! - [`EvalError`] / [`Result`] - the error taxonomy
//!
//! ## Adapter contract
//!
//! ```rust,ignore
//! #[async_trait]
//! pub trait AgentAdapter: Send + Sync {
//!     fn name(&self) -> &str;
//!     async fn get_response(&self, prompt: &str) -> Result<AgentResponse>;
//! }
//! ```
//!
//! Two tool calls are equal when their names match and their inputs hold the
//! same keys with equal values, in any order:
//!
//! ```rust
//! use aef_core::ToolCall;
//!
//! let a: ToolCall = serde_json::from_str(r#"{"tool_name":"x","tool_input":{"a":1,"b":2}}"#).unwrap();
//! let b: ToolCall = serde_json::from_str(r#"{"tool_name":"x","tool_input":{"b":2,"a":1}}"#).unwrap();
//! assert_eq!(a, b);
//! ```

pub mod adapter;
pub mod error;
pub mod types;

pub use adapter::{AdapterFactory, AdapterParams, AdapterParamsExt, AgentAdapter, FnAdapterFactory};
pub use error::{EvalError, Result};
pub use types::{
    AgentResponse, DatasetRecord, MetricResult, MetricValue, ToolCall, ToolInput, inputs_equal,
    tool_input_from_value, values_equal,
};
