//! Read-only views: health, status, featured, export, validate.

use anyhow::{anyhow, bail};
use serde_json::json;
use skillbox_config::ResolvedConfig;
use skillbox_plugins::SkillRuntime;
use skillbox_plugins::registry::ExportFormat;

use super::print_json;
use crate::theme::Theme;

/// Health of every in-process skill.
pub(crate) async fn health(rt: &SkillRuntime, json: bool) -> anyhow::Result<()> {
    let report = rt.manager().health_check_all().await;
    if json {
        return print_json(&report);
    }
    if report.is_empty() {
        println!("{}", Theme::info("No skills loaded."));
        return Ok(());
    }
    println!("{}", Theme::header("Health"));
    println!("{}", Theme::separator());
    for (id, h) in &report {
        println!(
            "  {:<24} {} {}",
            Theme::skill_id(id),
            Theme::health(&h.status),
            Theme::dimmed(h.message.as_deref().unwrap_or_default()),
        );
    }
    Ok(())
}

/// Manager and sandbox counters.
pub(crate) fn status(rt: &SkillRuntime, json: bool) -> anyhow::Result<()> {
    let manager = rt.manager().status();
    let sandbox = rt.sandbox().stats();
    if json {
        return print_json(&json!({ "manager": manager, "sandbox": sandbox }));
    }

    println!("{}", Theme::header("Skill runtime"));
    println!("{}", Theme::separator());
    println!("{}", Theme::kv("loaded", &manager.loaded.to_string()));
    println!("{}", Theme::kv("installed", &manager.installed.to_string()));
    println!("{}", Theme::kv("registered", &manager.registered.to_string()));
    println!("{}", Theme::kv("categories", &manager.categories.join(", ")));
    println!("{}", Theme::kv("pid", &manager.process.pid.to_string()));
    if let Some(rss) = manager.process.resident_memory_bytes {
        println!("{}", Theme::kv("memory", &format!("{} KiB", rss.saturating_div(1024))));
    }
    println!("{}", Theme::header("Sandbox"));
    println!("{}", Theme::kv("active", &sandbox.active.to_string()));
    println!("{}", Theme::kv("timeout", &format!("{} ms", sandbox.timeout_ms)));
    println!("{}", Theme::kv("network", &sandbox.network.to_string()));
    println!(
        "{}",
        Theme::kv(
            "memory limit",
            &sandbox
                .memory_limit_bytes
                .map_or_else(|| "none".to_owned(), |b| format!("{} MiB", b.saturating_div(1024 * 1024))),
        )
    );
    Ok(())
}

/// Featured marketplace skills.
pub(crate) async fn featured(rt: &SkillRuntime, limit: usize, json: bool) -> anyhow::Result<()> {
    let market = rt
        .manager()
        .marketplace()
        .ok_or_else(|| anyhow!("no marketplace index configured (set [marketplace] index)"))?;
    let entries = market.featured(limit).await?;
    if json {
        return print_json(&entries);
    }
    println!("{}", Theme::header("Featured skills"));
    println!("{}", Theme::separator());
    for e in &entries {
        println!(
            "  {:<24} {:>5.1}★ {:>8} {}",
            Theme::skill_id(&e.id),
            e.rating,
            e.downloads,
            e.description,
        );
    }
    Ok(())
}

/// Render installed skills.
pub(crate) fn export(rt: &SkillRuntime, format: &str) -> anyhow::Result<()> {
    let format = match format.to_ascii_lowercase().as_str() {
        "json" => ExportFormat::Json,
        "markdown" | "md" => ExportFormat::Markdown,
        other => bail!("unknown export format '{other}': expected json or markdown"),
    };
    println!("{}", rt.manager().registry().export(format)?);
    Ok(())
}

/// Check registry entries against the disk and report config provenance.
pub(crate) fn validate(
    rt: &SkillRuntime,
    resolved: Option<&ResolvedConfig>,
    json: bool,
) -> anyhow::Result<()> {
    let issues = rt.manager().registry().validate();

    if json {
        let rows: Vec<_> = issues
            .iter()
            .map(|i| json!({ "id": i.id, "problems": i.problems }))
            .collect();
        let files: Vec<String> = resolved
            .map(|r| r.loaded_files.iter().map(|p| p.display().to_string()).collect())
            .unwrap_or_default();
        print_json(&json!({ "configFiles": files, "issues": rows }))?;
    } else {
        if let Some(resolved) = resolved {
            println!("{}", Theme::success("Configuration is valid"));
            for file in &resolved.loaded_files {
                println!("{}", Theme::kv("loaded", &file.display().to_string()));
            }
        }
        if issues.is_empty() {
            println!("{}", Theme::success("All registry entries are consistent"));
        }
        for issue in &issues {
            println!("{}", Theme::error(&issue.id));
            for problem in &issue.problems {
                println!("    {problem}");
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        bail!("{} registry entr(ies) failed validation", issues.len())
    }
}
