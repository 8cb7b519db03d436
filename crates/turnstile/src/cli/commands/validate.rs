//! Validate command

use std::path::PathBuf;

use clap::Args;
use console::style;
use tracing::info;

use turnstile_core::config::{find_config, load_config, validate_config};
use turnstile_core::Scenario;

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Validate scenarios and configuration
#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Scenario files to validate
    pub scenarios: Vec<PathBuf>,

    /// Only validate the configuration file
    #[arg(long)]
    pub config_only: bool,
}

/// Outcome of checking one file
#[derive(Debug)]
struct Check {
    path: PathBuf,
    error: Option<String>,
}

impl ValidateCommand {
    /// Execute the validate command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(
            scenarios = self.scenarios.len(),
            config_only = self.config_only,
            "executing validate command"
        );
        let cwd = std::env::current_dir()?;

        let config_check = find_config(&cwd).map(|path| {
            let error = load_config(&path)
                .and_then(|config| validate_config(&config))
                .err()
                .map(|e| e.to_string());
            Check { path, error }
        });

        let text = cli.format == OutputFormat::Text && !cli.quiet;
        if text && self.scenarios.is_empty() && !self.config_only {
            output::warning("No scenario files given, checking configuration only");
        }

        let scenario_checks: Vec<Check> = if self.config_only {
            Vec::new()
        } else {
            self.scenarios.iter().map(|path| check_scenario(path)).collect()
        };

        let errors = config_check
            .iter()
            .chain(&scenario_checks)
            .filter(|c| c.error.is_some())
            .count();
        let passed = errors == 0;

        match cli.format {
            OutputFormat::Json => {
                let describe = |c: &Check| {
                    serde_json::json!({
                        "path": c.path.to_string_lossy(),
                        "valid": c.error.is_none(),
                        "error": c.error,
                    })
                };
                let output = serde_json::json!({
                    "valid": passed,
                    "config": config_check.as_ref().map(describe),
                    "scenarios": scenario_checks.iter().map(describe).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    println!("{}", style("Validation Results").bold());
                    println!();

                    match config_check {
                        Some(ref check) => print_check("Config", check),
                        None => println!(
                            "  {} Config: {}",
                            style("-").dim(),
                            style("none found, defaults apply").dim()
                        ),
                    }
                    for check in &scenario_checks {
                        print_check("Scenario", check);
                    }
                    println!();

                    if passed {
                        println!("{}", style("✓ All checks passed").green().bold());
                    } else {
                        println!(
                            "{} with {} error(s)",
                            style("✗ Validation failed").red().bold(),
                            errors
                        );
                    }
                }
            }
        }

        if !passed {
            std::process::exit(exit_codes::VALIDATION_ERROR);
        }

        Ok(())
    }
}

fn check_scenario(path: &std::path::Path) -> Check {
    let error = Scenario::load(path)
        .and_then(|scenario| scenario.validate())
        .err()
        .map(|e| e.to_string());
    Check {
        path: path.to_path_buf(),
        error,
    }
}

fn print_check(kind: &str, check: &Check) {
    match check.error {
        None => println!(
            "  {} {}: {}",
            style("✓").green(),
            kind,
            style(check.path.display()).cyan()
        ),
        Some(ref error) => println!(
            "  {} {}: {} - {}",
            style("✗").red(),
            kind,
            style(check.path.display()).cyan(),
            error
        ),
    }
}
