//! Registry and lifecycle commands: list, search, info, install, uninstall, update.

use anyhow::{anyhow, bail};
use serde_json::json;
use skillbox_plugins::registry::{ListFilter, SearchOptions};
use skillbox_plugins::{
    InstallOptions, SkillKind, SkillRuntime, UninstallOptions, UpdateOptions,
};

use super::{finish_report, print_json};
use crate::theme::Theme;

/// Show registered skills.
pub(crate) fn list(
    rt: &SkillRuntime,
    category: Option<String>,
    all: bool,
    json: bool,
) -> anyhow::Result<()> {
    let filter = ListFilter {
        installed: if all { None } else { Some(true) },
        category,
        ..ListFilter::default()
    };
    let manager = rt.manager();
    let entries = manager.registry().list(&filter);

    if json {
        let rows: Vec<_> = entries
            .iter()
            .map(|e| {
                json!({
                    "id": e.id(),
                    "name": e.manifest.name,
                    "version": e.manifest.version,
                    "kind": e.kind,
                    "category": e.category,
                    "installed": e.installed,
                    "status": manager.loader().status(e.id()),
                })
            })
            .collect();
        return print_json(&rows);
    }

    if entries.is_empty() {
        println!("{}", Theme::info("No skills installed."));
        return Ok(());
    }
    println!("{}", Theme::header("Skills"));
    println!("{}", Theme::separator());
    for e in &entries {
        println!(
            "  {:<24} {:<10} {:<12} {:<11} {}",
            Theme::skill_id(e.id()),
            e.manifest.version,
            e.category,
            e.kind,
            Theme::status(manager.loader().status(e.id())),
        );
    }
    println!("{}", Theme::dimmed(&format!("{} skill(s)", entries.len())));
    Ok(())
}

/// Search installed skills and the marketplace.
pub(crate) async fn search(
    rt: &SkillRuntime,
    query: &str,
    category: Option<String>,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let opts = SearchOptions { category, limit };
    let found = rt.manager().search_available(query, &opts).await;
    if json {
        return print_json(&found);
    }

    println!("{}", Theme::header(&format!("Results for '{query}'")));
    println!("{}", Theme::separator());
    if found.local.is_empty() && found.remote.is_empty() {
        println!("{}", Theme::info("Nothing matched."));
        return Ok(());
    }
    for e in &found.local {
        println!(
            "  {:<24} {} {}",
            Theme::skill_id(e.id()),
            Theme::dimmed("installed"),
            e.manifest.description.as_deref().unwrap_or_default(),
        );
    }
    for e in &found.remote {
        println!(
            "  {:<24} {} {}",
            Theme::skill_id(&e.id),
            Theme::dimmed("marketplace"),
            e.description,
        );
    }
    Ok(())
}

/// Show one skill's registry entry and load state.
pub(crate) fn info(rt: &SkillRuntime, id: &str, json: bool) -> anyhow::Result<()> {
    let manager = rt.manager();
    let entry = manager
        .registry()
        .get(id)
        .ok_or_else(|| anyhow!("skill '{id}' is not registered"))?;
    let loaded = manager.loader().get(id);

    if json {
        return print_json(&json!({
            "entry": entry,
            "status": loaded.map(|l| l.status),
            "error": loaded.and_then(|l| l.error.as_deref()),
            "route": rt.route(id).map(|r| format!("{r:?}").to_lowercase()),
        }));
    }

    let m = &entry.manifest;
    println!("{} {}", Theme::header(&m.name), Theme::dimmed(&format!("v{}", m.version)));
    println!("{}", Theme::separator());
    println!("{}", Theme::kv("id", entry.id()));
    if let Some(desc) = &m.description {
        println!("{}", Theme::kv("description", desc));
    }
    println!("{}", Theme::kv("author", entry.author()));
    println!("{}", Theme::kv("license", entry.license()));
    println!("{}", Theme::kv("kind", &entry.kind.to_string()));
    println!("{}", Theme::kv("category", &entry.category));
    println!("{}", Theme::kv("path", &entry.path.display().to_string()));
    if let Some(source) = &entry.source {
        println!("{}", Theme::kv("source", source));
    }
    println!("{}", Theme::kv("checksum", &entry.checksum));
    println!(
        "{}",
        Theme::kv("installed", &entry.installed_at.format("%Y-%m-%d %H:%M").to_string())
    );
    println!(
        "{}",
        Theme::kv("status", &Theme::status(loaded.map(|l| l.status)))
    );
    if let Some(err) = loaded.and_then(|l| l.error.as_deref()) {
        println!("{}", Theme::error(err));
    }
    Ok(())
}

/// Install from a source string.
pub(crate) async fn install(
    rt: &mut SkillRuntime,
    id: &str,
    source: &str,
    kind: &str,
    force: bool,
    json: bool,
) -> anyhow::Result<()> {
    let kind: SkillKind = kind.parse()?;
    if kind == SkillKind::Builtin {
        bail!("builtin skills ship with the host and cannot be installed");
    }
    let report = rt
        .manager_mut()
        .install(id, source, InstallOptions { kind, force })
        .await;
    rt.refresh_tools();
    finish_report(&report, "Installed", json)
}

/// Unregister and optionally delete a skill.
pub(crate) async fn uninstall(
    rt: &mut SkillRuntime,
    id: &str,
    keep_files: bool,
    json: bool,
) -> anyhow::Result<()> {
    let report = rt
        .manager_mut()
        .uninstall(
            id,
            UninstallOptions {
                delete_files: !keep_files,
            },
        )
        .await;
    rt.refresh_tools();
    finish_report(&report, "Uninstalled", json)
}

/// Reinstall from the recorded or given source.
pub(crate) async fn update(
    rt: &mut SkillRuntime,
    id: &str,
    source: Option<String>,
    no_backup: bool,
    json: bool,
) -> anyhow::Result<()> {
    let report = rt
        .manager_mut()
        .update(
            id,
            UpdateOptions {
                source,
                backup: !no_backup,
            },
        )
        .await;
    rt.refresh_tools();
    finish_report(&report, "Updated", json)
}
