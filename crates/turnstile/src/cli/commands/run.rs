//! Run command

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, ValueEnum};
use console::style;
use tracing::info;

use turnstile_core::config::{load_config_or_default, validate_config, RequeueOrder};
use turnstile_core::Scenario;
use turnstile_tasks::{ScenarioReport, ScenarioRunner};

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Run a scenario through the coordinator
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Scenario file (YAML or TOML)
    pub scenario: PathBuf,

    /// Override the configured requeue order
    #[arg(long, value_enum)]
    pub requeue_order: Option<RequeueOrderArg>,

    /// Override the runner timeout, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Print the event timeline
    #[arg(long)]
    pub timeline: bool,
}

/// Requeue order accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RequeueOrderArg {
    /// Oldest deferral first
    Fifo,
    /// Most recent deferral first
    Lifo,
}

impl From<RequeueOrderArg> for RequeueOrder {
    fn from(arg: RequeueOrderArg) -> Self {
        match arg {
            RequeueOrderArg::Fifo => RequeueOrder::Fifo,
            RequeueOrderArg::Lifo => RequeueOrder::Lifo,
        }
    }
}

impl RunCommand {
    /// Execute the run command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(
            scenario = %self.scenario.display(),
            requeue_order = ?self.requeue_order,
            "executing run command"
        );
        let cwd = std::env::current_dir()?;

        let (mut config, config_path) = load_config_or_default(&cwd);
        if let Some(order) = self.requeue_order {
            config.coordinator.requeue_order = order.into();
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.runner.timeout_ms = timeout_ms;
        }
        validate_config(&config)?;

        let scenario = Scenario::load(&self.scenario)
            .with_context(|| format!("failed to load scenario {}", self.scenario.display()))?;

        if cli.verbose && !cli.quiet && cli.format == OutputFormat::Text {
            match config_path {
                Some(ref path) => output::info(&format!(
                    "Using config {}",
                    output::path_style().apply_to(path.display())
                )),
                None => output::info("No config found, using defaults"),
            }
        }

        let report = ScenarioRunner::new(config).run(&scenario)?;

        match cli.format {
            OutputFormat::Json => println!("{}", report.to_json()?),
            OutputFormat::Text => {
                if !cli.quiet {
                    for line in render_report(&report, self.timeline || cli.verbose) {
                        println!("{}", line);
                    }
                }
            }
        }

        if report.timed_out {
            output::error("Scenario did not settle before the runner timeout");
            std::process::exit(exit_codes::TIMED_OUT);
        }

        Ok(())
    }
}

/// Render a report as text lines
fn render_report(report: &ScenarioReport, with_timeline: bool) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(output::header("Scenario Results"));
    lines.push(output::key_value(
        "requeue order",
        &report.requeue_order.to_string(),
    ));
    lines.push(output::key_value(
        "elapsed",
        &format!("{}ms", report.elapsed_ms),
    ));
    lines.push(String::new());

    let width = report
        .tasks
        .iter()
        .map(|t| t.name.len())
        .max()
        .unwrap_or(0);

    for task in &report.tasks {
        let decision = format!("{:10}", task.decision.to_string());
        let state = format!("{:10}", task.final_state.to_string());
        let mut notes = Vec::new();
        if task.completed {
            notes.push("completed");
        } else if task.saw_cancellation {
            notes.push("stopped early");
        } else if !task.started {
            notes.push("never ran");
        }

        lines.push(format!(
            "  {:width$}  {} {} {}",
            task.name,
            output::decision_style(task.decision).apply_to(decision),
            output::state_style(task.final_state).apply_to(state),
            style(notes.join(", ")).dim(),
            width = width
        ));
    }

    if with_timeline && !report.timeline.is_empty() {
        lines.push(String::new());
        lines.push(output::header("Timeline"));
        for entry in &report.timeline {
            lines.push(format!(
                "  {:>6}ms  {:width$}  {}",
                entry.at_ms,
                entry.task,
                output::event_style(entry.event).apply_to(entry.event),
                width = width
            ));
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_tasks::{Decision, TaskOutcome, TaskState, TimelineEntry};

    fn report() -> ScenarioReport {
        ScenarioReport {
            requeue_order: RequeueOrder::Lifo,
            tasks: vec![
                TaskOutcome {
                    name: "sync".to_string(),
                    decision: Decision::Executing,
                    final_state: TaskState::Cancelled,
                    started: true,
                    completed: false,
                    saw_cancellation: true,
                },
                TaskOutcome {
                    name: "prefetch".to_string(),
                    decision: Decision::Cancelled,
                    final_state: TaskState::Cancelled,
                    started: false,
                    completed: false,
                    saw_cancellation: false,
                },
            ],
            timeline: vec![TimelineEntry {
                at_ms: 3,
                task: "sync".to_string(),
                event: "executing",
            }],
            elapsed_ms: 42,
            timed_out: false,
        }
    }

    #[test]
    fn test_requeue_order_arg_conversion() {
        assert_eq!(RequeueOrder::from(RequeueOrderArg::Fifo), RequeueOrder::Fifo);
        assert_eq!(RequeueOrder::from(RequeueOrderArg::Lifo), RequeueOrder::Lifo);
    }

    #[test]
    fn test_render_lists_every_task() {
        console::set_colors_enabled(false);
        let lines = render_report(&report(), false);
        let text = lines.join("\n");

        assert!(text.contains("lifo"));
        assert!(text.contains("42ms"));
        assert!(text.contains("stopped early"));
        assert!(text.contains("never ran"));
        assert!(!text.contains("Timeline"));
    }

    #[test]
    fn test_render_timeline_on_request() {
        console::set_colors_enabled(false);
        let text = render_report(&report(), true).join("\n");
        assert!(text.contains("Timeline"));
        assert!(text.contains("3ms"));
    }
}
