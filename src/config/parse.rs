use super::types::*;
use crate::config::{env_var_pattern, expand_env_vars, expand_tilde};
use std::path::Path;
use thiserror::Error;

/// Largest `limit` the history endpoint accepts per page.
pub const MAX_PAGE_SIZE: usize = 1000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate a config from YAML text.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml_string = expand_env_vars(yaml);

    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let mut unexpanded_vars: Vec<String> = yaml_string
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| env_var_pattern().captures_iter(line))
        .map(|cap| cap[1].to_string())
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables (e.g., export SLACK_BOT_TOKEN=xoxb-...)\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

/// Expands tilde (~) in all PathBuf fields in the config.
fn expand_paths(config: &mut Config) {
    config.whitelist = expand_tilde(&config.whitelist);
    config.output = expand_tilde(&config.output);
    config.state_dir = expand_tilde(&config.state_dir);
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.slack.token.trim().is_empty() {
        errors.push("slack.token must not be empty".to_string());
    }

    if config.slack.api_base.trim().is_empty() {
        errors.push("slack.api_base must not be empty".to_string());
    }

    validate_sync(&config.sync, &mut errors);

    if let Some(publish) = &config.publish {
        if publish.command.is_empty() || publish.command[0].trim().is_empty() {
            errors.push("publish.command must name a program to run".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_sync(sync: &SyncConfig, errors: &mut Vec<String>) {
    if sync.poll_interval.is_zero() {
        errors.push("sync.poll_interval must be greater than zero".to_string());
    }

    if sync.page_size == 0 || sync.page_size > MAX_PAGE_SIZE {
        errors.push(format!(
            "sync.page_size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, sync.page_size
        ));
    }

    if sync.directory_page_size == 0 || sync.directory_page_size > MAX_PAGE_SIZE {
        errors.push(format!(
            "sync.directory_page_size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, sync.directory_page_size
        ));
    }

    if let Some(cap) = sync.max_rate_limit_wait {
        if cap.is_zero() {
            errors.push("sync.max_rate_limit_wait must be greater than zero when set".to_string());
        }
    }
}
