//! Init command

use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use dialoguer::{Confirm, Select};
use tracing::info;

use turnstile_core::config::{
    Config, DEFAULT_CONFIG_TEMPLATE, DEFAULT_CONFIG_YAML, EXAMPLE_SCENARIO_TEMPLATE,
};

use crate::cli::Cli;

/// File name used for the example scenario
const EXAMPLE_SCENARIO_FILE: &str = "scenario.yaml";

/// Initialize a new Turnstile configuration
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Force overwrite existing files
    #[arg(short, long)]
    pub force: bool,

    /// Use defaults without prompting
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also write an example scenario
    #[arg(long)]
    pub scenario: bool,
}

impl InitCommand {
    /// Execute the init command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(force = self.force, yes = self.yes, "executing init command");
        let cwd = std::env::current_dir()?;
        let config_path = self
            .output
            .clone()
            .unwrap_or_else(|| cwd.join(DEFAULT_CONFIG_YAML));

        let format = if self.yes {
            "yaml"
        } else {
            let formats = ["yaml", "toml"];
            let selection = Select::new()
                .with_prompt("Configuration format")
                .items(&formats[..])
                .default(0)
                .interact()?;
            formats[selection]
        };

        let config_path =
            if format == "toml" && config_path.extension().is_some_and(|e| e == "yaml") {
                config_path.with_extension("toml")
            } else {
                config_path
            };

        if self.confirm_write(&config_path)? {
            std::fs::write(&config_path, render_config(format)?)?;
            if !cli.quiet {
                println!(
                    "{} Created {}",
                    style("✓").green().bold(),
                    style(config_path.display()).cyan()
                );
            }
        } else if !cli.quiet {
            println!("{}", style("Skipped configuration.").yellow());
        }

        if self.scenario {
            let scenario_path = cwd.join(EXAMPLE_SCENARIO_FILE);
            if self.confirm_write(&scenario_path)? {
                std::fs::write(&scenario_path, EXAMPLE_SCENARIO_TEMPLATE)?;
                if !cli.quiet {
                    println!(
                        "{} Created {}",
                        style("✓").green().bold(),
                        style(scenario_path.display()).cyan()
                    );
                    println!();
                    println!(
                        "Try it with: {}",
                        style(format!("turnstile run {} --timeline", EXAMPLE_SCENARIO_FILE))
                            .bold()
                    );
                }
            } else if !cli.quiet {
                println!("{}", style("Skipped example scenario.").yellow());
            }
        }

        Ok(())
    }

    /// Whether `path` may be written, asking before overwriting
    fn confirm_write(&self, path: &Path) -> anyhow::Result<bool> {
        if !path.exists() || self.force {
            return Ok(true);
        }
        if self.yes {
            anyhow::bail!(
                "{} already exists. Use --force to overwrite.",
                path.display()
            );
        }
        let overwrite = Confirm::new()
            .with_prompt(format!("{} already exists. Overwrite?", path.display()))
            .default(false)
            .interact()?;
        Ok(overwrite)
    }
}

/// Default configuration in the requested format
fn render_config(format: &str) -> anyhow::Result<String> {
    if format == "toml" {
        let config: Config = serde_yaml::from_str(DEFAULT_CONFIG_TEMPLATE)?;
        Ok(toml::to_string_pretty(&config)?)
    } else {
        Ok(DEFAULT_CONFIG_TEMPLATE.to_string())
    }
}
