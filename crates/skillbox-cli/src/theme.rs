//! CLI theme and styling.

use colored::Colorize;
use skillbox_plugins::LoadStatus;

/// CLI theme.
pub(crate) struct Theme;

impl Theme {
    /// Format a header.
    pub(crate) fn header(text: &str) -> String {
        format!("{}", text.bold().cyan())
    }

    /// Format a success message.
    pub(crate) fn success(text: &str) -> String {
        format!("{} {}", "✓".green(), text)
    }

    /// Format an error message.
    pub(crate) fn error(text: &str) -> String {
        format!("{} {}", "✗".red(), text.red())
    }

    /// Format a warning message.
    pub(crate) fn warning(text: &str) -> String {
        format!("{} {}", "!".yellow(), text.yellow())
    }

    /// Format an info message.
    pub(crate) fn info(text: &str) -> String {
        format!("{} {}", "i".blue(), text)
    }

    /// Format a dimmed message.
    pub(crate) fn dimmed(text: &str) -> String {
        format!("{}", text.dimmed())
    }

    /// Format a separator line.
    pub(crate) fn separator() -> String {
        "━".repeat(50).dimmed().to_string()
    }

    /// Format a key-value pair.
    pub(crate) fn kv(key: &str, value: &str) -> String {
        format!("  {}: {}", key.bold(), value)
    }

    /// Format a skill ID.
    pub(crate) fn skill_id(id: &str) -> String {
        format!("{}", id.cyan())
    }

    /// Format a load status.
    pub(crate) fn status(status: Option<LoadStatus>) -> String {
        match status {
            Some(LoadStatus::Loaded) => "loaded".green().to_string(),
            Some(LoadStatus::Error) => "error".red().to_string(),
            Some(LoadStatus::Unloaded) => "unloaded".yellow().to_string(),
            None => "sandboxed".dimmed().to_string(),
        }
    }

    /// Format a health status string.
    pub(crate) fn health(status: &str) -> String {
        match status {
            "ok" | "healthy" => status.green().to_string(),
            "error" | "unhealthy" => status.red().to_string(),
            _ => status.yellow().to_string(),
        }
    }
}
