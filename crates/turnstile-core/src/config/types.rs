//! Configuration types

use serde::{Deserialize, Serialize};

/// Main configuration for Turnstile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator behaviour
    pub coordinator: CoordinatorConfig,

    /// Scenario runner settings
    pub runner: RunnerConfig,
}

/// Order in which deferred tasks are retried once they become admissible
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequeueOrder {
    /// Oldest deferral first
    #[default]
    Fifo,
    /// Most recent deferral first
    Lifo,
}

impl std::fmt::Display for RequeueOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fifo => write!(f, "fifo"),
            Self::Lifo => write!(f, "lifo"),
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Retry order for deferred tasks after a completion
    pub requeue_order: RequeueOrder,
}

impl CoordinatorConfig {
    /// Set the requeue order
    pub fn with_requeue_order(mut self, order: RequeueOrder) -> Self {
        self.requeue_order = order;
        self
    }
}

/// Scenario runner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// How long to wait for every task to settle before giving up
    pub timeout_ms: u64,

    /// Granularity at which simulated work polls for cancellation
    pub poll_interval_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            poll_interval_ms: 5,
        }
    }
}
