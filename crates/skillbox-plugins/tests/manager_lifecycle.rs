//! Install, update and uninstall against a real skill tree.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Value, json};
use skillbox_plugins::{
    InstallOptions, ListFilter, LoadStatus, ManagerConfig, Skill, SkillCatalog, SkillError,
    SkillInit, SkillKind, SkillManager, SkillResult, SkillSource, SourceFetcher,
    UninstallOptions, UpdateOptions,
};
use skillbox_test::prelude::*;

struct Echo;

#[async_trait]
impl Skill for Echo {
    async fn execute(&self, params: Value, _context: Value) -> SkillResult<Value> {
        Ok(json!({ "echo": params["text"] }))
    }
}

struct BrokenInit;

#[async_trait]
impl Skill for BrokenInit {
    async fn init(&mut self) -> SkillResult<()> {
        Err(SkillError::Execution("cannot start".into()))
    }

    async fn execute(&self, _params: Value, _context: Value) -> SkillResult<Value> {
        Ok(Value::Null)
    }
}

struct FailingFetcher;

#[async_trait]
impl SourceFetcher for FailingFetcher {
    async fn fetch(&self, source: &SkillSource, _staging: &Path) -> SkillResult<std::path::PathBuf> {
        Err(SkillError::Fetch(format!("{source}: network unreachable")))
    }
}

fn catalog() -> SkillCatalog {
    let catalog = SkillCatalog::new();
    catalog.register("Echo", |_init: SkillInit| -> SkillResult<Box<dyn Skill>> {
        Ok(Box::new(Echo))
    });
    catalog.register("BrokenInit", |_init: SkillInit| -> SkillResult<Box<dyn Skill>> {
        Ok(Box::new(BrokenInit))
    });
    catalog
}

fn manager(ctx: &TestContext) -> SkillManager {
    setup_test_logging_default();
    SkillManager::new(ManagerConfig::rooted_at(ctx.path()), catalog()).unwrap()
}

fn echo_source(ctx: &TestContext, dir_name: &str, version: &str) -> String {
    let dir = ManifestBuilder::new("echo")
        .version(version)
        .main("Echo")
        .required_param("text", "string")
        .write_as(&ctx.sources_dir().join(dir_name));
    format!("local:{}", dir.display())
}

#[tokio::test]
async fn install_loads_and_executes() {
    let ctx = TestContext::new();
    let mut mgr = manager(&ctx);

    let report = mgr
        .install("echo", &echo_source(&ctx, "echo-v1", "1.0.0"), InstallOptions::default())
        .await;
    assert!(report.success, "{report:?}");
    assert!(report.loaded);
    assert_eq!(report.version.as_deref(), Some("1.0.0"));
    assert!(ctx.skills_dir().join("community/echo/skill.json").is_file());

    let out = mgr
        .execute("echo", json!({"text": "hi"}), json!({}))
        .await
        .unwrap();
    assert_eq!(out.result, json!({"echo": "hi"}));

    let err = mgr.execute("echo", json!({}), json!({})).await.unwrap_err();
    assert_eq!(err.to_string(), "Missing required parameter: text");
}

#[tokio::test]
async fn second_install_is_refused_without_force() {
    let ctx = TestContext::new();
    let mut mgr = manager(&ctx);
    let source = echo_source(&ctx, "echo-v1", "1.0.0");

    assert!(mgr.install("echo", &source, InstallOptions::default()).await.success);
    let again = mgr.install("echo", &source, InstallOptions::default()).await;
    assert!(!again.success);
    assert_eq!(again.reason.as_deref(), Some("already_installed"));

    let forced = mgr
        .install(
            "echo",
            &source,
            InstallOptions {
                force: true,
                ..InstallOptions::default()
            },
        )
        .await;
    assert!(forced.success, "{forced:?}");
    assert_eq!(mgr.loader().status("echo"), Some(LoadStatus::Loaded));
}

#[tokio::test]
async fn forced_reinstall_without_factory_drops_the_old_instance() {
    let ctx = TestContext::new();
    let mut mgr = manager(&ctx);
    mgr.install("echo", &echo_source(&ctx, "echo-v1", "1.0.0"), InstallOptions::default())
        .await;
    assert!(mgr.loader().is_loaded("echo"));

    let sandboxed = ManifestBuilder::new("echo")
        .version("2.0.0")
        .main("NoFactory")
        .write_as(&ctx.sources_dir().join("echo-v2"));
    let report = mgr
        .install_from_local(
            "echo",
            &sandboxed,
            InstallOptions {
                force: true,
                ..InstallOptions::default()
            },
        )
        .await;
    assert!(report.success, "{report:?}");
    assert!(!report.loaded);
    assert_eq!(mgr.registry().get("echo").unwrap().manifest.version, "2.0.0");
    assert!(mgr.loader().get("echo").is_none());

    let err = mgr
        .execute("echo", json!({"text": "hi"}), json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn id_mismatch_leaves_no_files() {
    let ctx = TestContext::new();
    let mut mgr = manager(&ctx);
    let dir = ManifestBuilder::new("not-weather").write_as(&ctx.sources_dir().join("weather"));

    let report = mgr
        .install_from_local("weather", &dir, InstallOptions::default())
        .await;
    assert!(!report.success);
    assert_eq!(report.error_kind, Some("mismatch"));

    assert_eq!(count_files(&mgr.skill_dir(SkillKind::Community, "weather")), 0);
    assert_eq!(count_files(&ctx.path().join("temp")), 0);
    assert!(!mgr.registry().has("weather"));
}

#[tokio::test]
async fn fetch_failure_is_reported_and_not_listed() {
    let ctx = TestContext::new();
    let mut mgr = manager(&ctx).with_fetcher(FailingFetcher);

    let report = mgr
        .install("weather", "github:org/weather-skill", InstallOptions::default())
        .await;
    assert!(!report.success);
    assert_eq!(report.skill_id, "weather");
    assert!(report.error.as_deref().unwrap_or_default().contains("network unreachable"));

    assert!(
        mgr.registry()
            .list(&ListFilter::default())
            .iter()
            .all(|e| e.id() != "weather")
    );
    assert!(mgr.list_installed().iter().all(|s| s.id != "weather"));
}

#[tokio::test]
async fn skill_without_factory_is_registered_for_sandbox() {
    let ctx = TestContext::new();
    let mut mgr = manager(&ctx);
    let dir = write_script_skill(&ctx.sources_dir(), "script", &ScriptBehavior::Echo);

    let report = mgr
        .install_from_local("script", &dir, InstallOptions::default())
        .await;
    assert!(report.success, "{report:?}");
    assert!(!report.loaded);
    assert!(mgr.registry().has("script"));
    assert!(!mgr.loader().is_loaded("script"));
}

#[tokio::test]
async fn update_replaces_version() {
    let ctx = TestContext::new();
    let mut mgr = manager(&ctx);
    mgr.install("echo", &echo_source(&ctx, "echo-v1", "1.0.0"), InstallOptions::default())
        .await;

    let report = mgr
        .update(
            "echo",
            UpdateOptions {
                source: Some(echo_source(&ctx, "echo-v2", "2.0.0")),
                ..UpdateOptions::default()
            },
        )
        .await;
    assert!(report.success, "{report:?}");
    assert_eq!(report.previous_version.as_deref(), Some("1.0.0"));
    assert_eq!(mgr.registry().get("echo").unwrap().manifest.version, "2.0.0");
    assert_eq!(mgr.loader().status("echo"), Some(LoadStatus::Loaded));
}

#[tokio::test]
async fn failed_update_before_swap_restores_previous_version() {
    let ctx = TestContext::new();
    let mut mgr = manager(&ctx);
    mgr.install("echo", &echo_source(&ctx, "echo-v1", "1.0.0"), InstallOptions::default())
        .await;

    let wrong = ManifestBuilder::new("other")
        .version("2.0.0")
        .write_as(&ctx.sources_dir().join("other"));
    let report = mgr
        .update(
            "echo",
            UpdateOptions {
                source: Some(format!("local:{}", wrong.display())),
                ..UpdateOptions::default()
            },
        )
        .await;

    assert!(!report.success);
    assert!(report.rolled_back);
    assert_eq!(mgr.registry().get("echo").unwrap().manifest.version, "1.0.0");
    assert_eq!(mgr.loader().status("echo"), Some(LoadStatus::Loaded));
    assert!(
        mgr.execute("echo", json!({"text": "still here"}), json!({}))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn failed_update_after_swap_restores_files() {
    let ctx = TestContext::new();
    let mut mgr = manager(&ctx);
    mgr.install("echo", &echo_source(&ctx, "echo-v1", "1.0.0"), InstallOptions::default())
        .await;

    let broken = ManifestBuilder::new("echo")
        .version("2.0.0")
        .main("BrokenInit")
        .write_as(&ctx.sources_dir().join("echo-broken"));
    let report = mgr
        .update(
            "echo",
            UpdateOptions {
                source: Some(format!("local:{}", broken.display())),
                ..UpdateOptions::default()
            },
        )
        .await;

    assert!(!report.success);
    assert!(report.rolled_back);
    let installed = std::fs::read_to_string(
        mgr.skill_dir(SkillKind::Community, "echo").join("skill.json"),
    )
    .unwrap();
    assert!(installed.contains("\"1.0.0\""));
    assert_eq!(mgr.registry().get("echo").unwrap().manifest.version, "1.0.0");
    assert_eq!(mgr.loader().status("echo"), Some(LoadStatus::Loaded));
}

#[tokio::test]
async fn update_of_unknown_skill_fails() {
    let ctx = TestContext::new();
    let mut mgr = manager(&ctx);
    let report = mgr.update("ghost", UpdateOptions::default()).await;
    assert!(!report.success);
    assert_eq!(report.error_kind, Some("not_found"));
}

#[tokio::test]
async fn uninstall_removes_everything_and_is_idempotent() {
    let ctx = TestContext::new();
    let mut mgr = manager(&ctx);
    mgr.install("echo", &echo_source(&ctx, "echo-v1", "1.0.0"), InstallOptions::default())
        .await;

    let report = mgr.uninstall("echo", UninstallOptions::default()).await;
    assert!(report.success);
    assert!(!mgr.registry().has("echo"));
    assert!(!mgr.loader().is_loaded("echo"));
    assert!(!mgr.skill_dir(SkillKind::Community, "echo").exists());

    assert!(mgr.uninstall("echo", UninstallOptions::default()).await.success);
}

#[tokio::test]
async fn uninstall_can_keep_files() {
    let ctx = TestContext::new();
    let mut mgr = manager(&ctx);
    mgr.install("echo", &echo_source(&ctx, "echo-v1", "1.0.0"), InstallOptions::default())
        .await;

    let report = mgr
        .uninstall("echo", UninstallOptions { delete_files: false })
        .await;
    assert!(report.success);
    assert!(mgr.skill_dir(SkillKind::Community, "echo").join("skill.json").is_file());
}

#[tokio::test]
async fn registry_survives_restart() {
    let ctx = TestContext::new();
    {
        let mut mgr = manager(&ctx);
        mgr.install("echo", &echo_source(&ctx, "echo-v1", "1.0.0"), InstallOptions::default())
            .await;
    }
    let mgr = manager(&ctx);
    let entry = mgr.registry().get("echo").unwrap();
    assert_eq!(entry.manifest.version, "1.0.0");
    assert!(entry.source.as_deref().unwrap().starts_with("local:"));
}
