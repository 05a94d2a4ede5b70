//! Configuration validation utilities.

use serde_json::Value;

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, MigrationsConfig, ServerConfig, TrellisConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &TrellisConfig) -> ConfigResult<()> {
    validate_server_config(&config.server)?;
    validate_logging_config(&config.logging)?;
    validate_migrations_config(&config.migrations)?;

    for (name, section) in &config.plugins {
        if !matches!(section, Value::Object(_) | Value::Null) {
            return Err(ConfigError::validation(format!(
                "plugins.{name} must be a table"
            )));
        }
    }
    Ok(())
}

fn validate_server_config(server: &ServerConfig) -> ConfigResult<()> {
    if server.port == 0 {
        return Err(ConfigError::InvalidPort(server.port));
    }
    if server.host.is_empty() {
        return Err(ConfigError::validation("server.host must not be empty"));
    }
    if !server.base_path.starts_with('/') {
        return Err(ConfigError::validation("server.base_path must start with '/'"));
    }
    if server.base_path.contains(char::is_whitespace) {
        return Err(ConfigError::validation(
            "server.base_path must not contain whitespace",
        ));
    }
    if server.max_body_bytes == 0 {
        return Err(ConfigError::validation(
            "server.max_body_bytes must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output = \"file\"",
        ));
    }
    Ok(())
}

fn validate_migrations_config(migrations: &MigrationsConfig) -> ConfigResult<()> {
    if !migrations.enabled {
        return Ok(());
    }
    if let Some(dir) = &migrations.directory
        && !dir.is_dir()
    {
        return Err(ConfigError::validation(format!(
            "migrations.directory '{}' does not exist",
            dir.display()
        )));
    }
    Ok(())
}
