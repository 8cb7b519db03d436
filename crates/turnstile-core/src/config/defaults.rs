//! Default configuration values

use super::types::Config;

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "turnstile.yaml";

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "turnstile.toml";

/// Alternative configuration file name
pub const ALT_CONFIG_FILE: &str = ".turnstile.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_YAML,
        DEFAULT_CONFIG_TOML,
        ALT_CONFIG_FILE,
        ".turnstile.toml",
    ]
}

/// Generate default configuration YAML
pub fn default_config_yaml() -> String {
    let config = Config::default();
    serde_yaml::to_string(&config).unwrap_or_else(|_| DEFAULT_CONFIG_TEMPLATE.to_string())
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Turnstile Configuration

coordinator:
  # Retry order for deferred tasks once they become admissible: fifo | lifo
  requeue_order: fifo

runner:
  timeout_ms: 30000
  poll_interval_ms: 5
"#;

/// Example scenario written by `turnstile init --scenario`
pub const EXAMPLE_SCENARIO_TEMPLATE: &str = r#"# Turnstile scenario
contexts:
  - name: network

tasks:
  - name: sync
    context: network
    duration_ms: 200

  - name: refresh
    duration_ms: 50
    defer_if_executing: [sync]

  - name: prefetch
    duration_ms: 50
    cancel_if_executing: [sync]

  - name: logout
    delay_ms: 20
    duration_ms: 10
    make_way_by_cancelling: [sync]
"#;
