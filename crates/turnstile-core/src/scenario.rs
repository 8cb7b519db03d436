//! Scenario files
//!
//! A scenario describes a set of simulated tasks, the serial contexts they
//! run on and the conditions relating them. The CLI feeds scenarios through
//! the coordinator to show how each task is admitted.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, ScenarioError};

/// A complete scenario
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Serial execution contexts tasks may be posted to
    pub contexts: Vec<ContextSpec>,

    /// Tasks, submitted in declaration order
    pub tasks: Vec<TaskSpec>,
}

/// A named serial execution context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSpec {
    /// Context name
    pub name: String,
}

/// A simulated task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    /// Task name, unique within the scenario
    pub name: String,

    /// Context to post the task to; runs on the coordinator's shared context if unset
    pub context: Option<String>,

    /// How long the simulated work takes
    pub duration_ms: u64,

    /// Delay before the task is submitted, relative to the previous submission
    pub delay_ms: u64,

    /// Cancel this task if any of these are executing
    pub cancel_if_executing: Vec<String>,

    /// Defer this task while any of these are executing
    pub defer_if_executing: Vec<String>,

    /// Cancel these tasks if they are executing when this one is admitted
    pub make_way_by_cancelling: Vec<String>,
}

impl TaskSpec {
    /// Create a task spec with the given name and no conditions
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the simulated work duration
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Post the task to a named context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Every condition, grouped by kind: cancel, then defer, then make-way
    pub fn conditions(&self) -> impl Iterator<Item = ConditionSpec<'_>> {
        let cancel = self
            .cancel_if_executing
            .iter()
            .map(|t| ConditionSpec::CancelIfExecuting(t.as_str()));
        let defer = self
            .defer_if_executing
            .iter()
            .map(|t| ConditionSpec::DeferIfExecuting(t.as_str()));
        let make_way = self
            .make_way_by_cancelling
            .iter()
            .map(|t| ConditionSpec::MakeWayByCancelling(t.as_str()));
        cancel.chain(defer).chain(make_way)
    }
}

/// A single condition reference in a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionSpec<'a> {
    CancelIfExecuting(&'a str),
    DeferIfExecuting(&'a str),
    MakeWayByCancelling(&'a str),
}

impl<'a> ConditionSpec<'a> {
    /// Name of the referenced task
    pub fn target(&self) -> &'a str {
        match self {
            Self::CancelIfExecuting(t) | Self::DeferIfExecuting(t) | Self::MakeWayByCancelling(t) => t,
        }
    }
}

impl Scenario {
    /// Parse a scenario from YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(content).map_err(ScenarioError::Yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from TOML
    pub fn from_toml(content: &str) -> Result<Self> {
        let scenario: Scenario = toml::from_str(content).map_err(ScenarioError::Toml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Load a scenario file, picking the format from its extension
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ScenarioError::NotFound(path.to_path_buf()).into());
        }
        info!(path = %path.display(), "loading scenario");

        let content = std::fs::read_to_string(path).map_err(ScenarioError::Io)?;
        if path.extension().is_some_and(|e| e == "toml") {
            Self::from_toml(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Look up a task by name
    pub fn task(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Check names and references
    pub fn validate(&self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(ScenarioError::Empty.into());
        }

        let mut contexts = HashSet::new();
        for (index, context) in self.contexts.iter().enumerate() {
            if context.name.trim().is_empty() {
                return Err(ScenarioError::EmptyName {
                    kind: "context",
                    index,
                }
                .into());
            }
            if !contexts.insert(context.name.as_str()) {
                return Err(ScenarioError::DuplicateName {
                    kind: "context",
                    name: context.name.clone(),
                }
                .into());
            }
        }

        let mut tasks = HashSet::new();
        for (index, task) in self.tasks.iter().enumerate() {
            if task.name.trim().is_empty() {
                return Err(ScenarioError::EmptyName { kind: "task", index }.into());
            }
            if !tasks.insert(task.name.as_str()) {
                return Err(ScenarioError::DuplicateName {
                    kind: "task",
                    name: task.name.clone(),
                }
                .into());
            }
        }

        for task in &self.tasks {
            if let Some(context) = &task.context {
                if !contexts.contains(context.as_str()) {
                    return Err(ScenarioError::UnknownContext {
                        task: task.name.clone(),
                        context: context.clone(),
                    }
                    .into());
                }
            }

            for condition in task.conditions() {
                let target = condition.target();
                if target == task.name {
                    return Err(ScenarioError::SelfReference(task.name.clone()).into());
                }
                if !tasks.contains(target) {
                    return Err(ScenarioError::UnknownTask {
                        task: task.name.clone(),
                        reference: target.to_string(),
                    }
                    .into());
                }
            }
        }

        debug!(
            tasks = self.tasks.len(),
            contexts = self.contexts.len(),
            "scenario validated"
        );
        Ok(())
    }
}
