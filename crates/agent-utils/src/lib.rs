//! Shared utilities for agent-rs
//!
//! This crate provides common functionality used across the agent-rs workspace:
//! logging setup and typed configuration parsing from the environment.

pub mod config;
pub mod logging;

pub use config::{ConfigError, process_env};
pub use logging::{LogFormat, init_tracing, init_tracing_with};
