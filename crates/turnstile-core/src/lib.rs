//! Turnstile Core - shared foundations for the Turnstile task coordinator
//!
//! This crate provides the error types, configuration loading and the
//! scenario file model used by the scheduling crate and the CLI.

pub mod config;
pub mod error;
pub mod scenario;

pub use config::{Config, CoordinatorConfig, RequeueOrder, RunnerConfig};
pub use error::{ConfigError, Result, ScenarioError, TurnstileError};
pub use scenario::{ConditionSpec, ContextSpec, Scenario, TaskSpec};
