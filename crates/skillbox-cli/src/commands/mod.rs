//! Subcommand implementations.

pub(crate) mod exec;
pub(crate) mod inspect;
pub(crate) mod skills;

use anyhow::{Context, bail};
use serde::Serialize;
use serde_json::Value;
use skillbox_plugins::OperationReport;

use crate::theme::Theme;

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse a `--params`-style argument; absent means `{}`.
pub(crate) fn parse_object_arg(raw: Option<&str>, flag: &str) -> anyhow::Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(serde_json::Map::new()));
    };
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))?;
    if !value.is_object() {
        bail!("{flag} must be a JSON object");
    }
    Ok(value)
}

/// Print an operation report and fail the command if it did not succeed.
pub(crate) fn finish_report(report: &OperationReport, verb: &str, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(report)?;
    } else if report.success {
        let mut line = format!("{verb} {}", Theme::skill_id(&report.skill_id));
        if let Some(version) = &report.version {
            line.push_str(&format!(" v{version}"));
        }
        if let Some(previous) = &report.previous_version {
            line.push_str(&Theme::dimmed(&format!(" (was v{previous})")));
        }
        println!("{}", Theme::success(&line));
        if let Some(path) = &report.path {
            println!("{}", Theme::kv("path", &path.display().to_string()));
        }
        if let Some(reason) = &report.reason {
            println!("{}", Theme::info(reason));
        }
        for warning in &report.warnings {
            println!("{}", Theme::warning(warning));
        }
    }

    if report.success {
        return Ok(());
    }
    let message = report.error.as_deref().unwrap_or("unknown error");
    if report.rolled_back {
        bail!("{verb} of '{}' failed and was rolled back: {message}", report.skill_id);
    }
    bail!("{verb} of '{}' failed: {message}", report.skill_id)
}
