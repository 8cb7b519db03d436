//! Output formatting utilities

use console::{style, Style};

use turnstile_tasks::{Decision, TaskState};

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Style for an admission decision
pub fn decision_style(decision: Decision) -> Style {
    match decision {
        Decision::Executing => Style::new().green().bold(),
        Decision::Deferred => Style::new().yellow(),
        Decision::Cancelled => Style::new().red(),
    }
}

/// Style for a task's final state
pub fn state_style(state: TaskState) -> Style {
    match state {
        TaskState::Idle => Style::new().green(),
        TaskState::Executing | TaskState::Deferred => Style::new().yellow(),
        TaskState::Cancelled => Style::new().red(),
    }
}

/// Style for timeline event names
pub fn event_style(event: &str) -> Style {
    match event {
        "executing" => Style::new().green(),
        "finished" => Style::new().dim(),
        "deferred" => Style::new().yellow(),
        "cancelled" => Style::new().red(),
        _ => Style::new(),
    }
}

/// Style for paths
pub fn path_style() -> Style {
    Style::new().cyan()
}
