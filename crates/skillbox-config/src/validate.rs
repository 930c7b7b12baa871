//! Post-merge validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json"];

/// Check a merged configuration.
///
/// # Errors
///
/// Returns the first [`ConfigError::ValidationError`] found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_paths(config)?;
    validate_sandbox(config)?;
    validate_manager(config)?;
    validate_logging(config)
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_paths(config: &Config) -> ConfigResult<()> {
    let p = &config.paths;
    for (field, path) in [
        ("paths.skills_dir", &p.skills_dir),
        ("paths.registry_file", &p.registry_file),
        ("paths.temp_dir", &p.temp_dir),
    ] {
        if path.as_os_str().is_empty() {
            return Err(invalid(field, "path must not be empty"));
        }
    }
    Ok(())
}

fn validate_sandbox(config: &Config) -> ConfigResult<()> {
    let s = &config.sandbox;
    if s.timeout_ms == 0 {
        return Err(invalid("sandbox.timeout_ms", "must be greater than 0"));
    }
    if s.eval_timeout_ms == 0 {
        return Err(invalid("sandbox.eval_timeout_ms", "must be greater than 0"));
    }
    if s.max_payload_bytes == 0 {
        return Err(invalid("sandbox.max_payload_bytes", "must be greater than 0"));
    }
    if s.allowed_dirs.iter().any(|d| d.as_os_str().is_empty()) {
        return Err(invalid("sandbox.allowed_dirs", "entries must not be empty"));
    }
    for (ext, command) in &s.interpreters {
        if ext.is_empty() || ext.starts_with('.') {
            return Err(invalid(
                "sandbox.interpreters",
                format!("extension '{ext}' must be non-empty and given without a dot"),
            ));
        }
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(invalid(
                &format!("sandbox.interpreters.{ext}"),
                "interpreter command must not be empty",
            ));
        }
    }
    Ok(())
}

fn validate_manager(config: &Config) -> ConfigResult<()> {
    let m = &config.manager;
    if m.dependency_timeout_secs == 0 {
        return Err(invalid("manager.dependency_timeout_secs", "must be greater than 0"));
    }
    if m.install_packages && m.npm_command.trim().is_empty() {
        return Err(invalid(
            "manager.npm_command",
            "must be set when install_packages is enabled",
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !LOG_LEVELS.contains(&l.level.to_ascii_lowercase().as_str()) {
        return Err(invalid(
            "logging.level",
            format!("'{}' is not one of {}", l.level, LOG_LEVELS.join(", ")),
        ));
    }
    if !LOG_FORMATS.contains(&l.format.to_ascii_lowercase().as_str()) {
        return Err(invalid(
            "logging.format",
            format!("'{}' is not one of {}", l.format, LOG_FORMATS.join(", ")),
        ));
    }
    Ok(())
}
