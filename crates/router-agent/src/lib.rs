//! Router agent
//!
//! CLI-side pieces around the `routing` core: environment and TOML
//! configuration, the OpenAI-compatible HTTP adapter, and stack wiring.

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod http_adapter;
pub mod stack;

pub use config::{AgentConfig, EndpointConfig, ProfilesFile};
pub use http_adapter::HttpAdapter;
pub use stack::{build_executor, load_task_file, parse_task_file, simulated_adapter};
