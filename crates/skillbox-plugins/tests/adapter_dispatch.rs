//! Tool-calling dispatch through the runtime facade.

use async_trait::async_trait;
use serde_json::{Value, json};
use skillbox_plugins::{
    InstallOptions, ManagerConfig, Route, SandboxConfig, Skill, SkillCatalog, SkillError,
    SkillInit, SkillResult, SkillRuntime,
};
use skillbox_test::prelude::*;

struct Echo;

#[async_trait]
impl Skill for Echo {
    async fn execute(&self, params: Value, context: Value) -> SkillResult<Value> {
        Ok(json!({ "echo": params["text"], "tool": context["tool"] }))
    }
}

fn runtime(ctx: &TestContext) -> SkillRuntime {
    setup_test_logging_default();
    let catalog = SkillCatalog::new();
    catalog.register("Echo", |_init: SkillInit| -> SkillResult<Box<dyn Skill>> {
        Ok(Box::new(Echo))
    });
    SkillRuntime::new(
        ManagerConfig::rooted_at(ctx.path()),
        SandboxConfig {
            allowed_dirs: Vec::new(),
            ..SandboxConfig::default()
        },
        catalog,
    )
    .unwrap()
}

async fn install_echo(rt: &mut SkillRuntime, ctx: &TestContext) {
    let dir = ManifestBuilder::new("echo")
        .main("Echo")
        .description("Repeats its input")
        .required_param("text", "string")
        .write_to(&ctx.sources_dir());
    let report = rt
        .manager_mut()
        .install_from_local("echo", &dir, InstallOptions::default())
        .await;
    assert!(report.success, "{report:?}");
    assert_eq!(rt.refresh_tools(), 1);
}

#[tokio::test]
async fn tools_list_describes_loaded_skills() {
    let ctx = TestContext::new();
    let mut rt = runtime(&ctx);
    install_echo(&mut rt, &ctx).await;

    let listed = rt.handle_request("tools/list", json!({})).await.unwrap();
    let tools = listed["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "echo_execute");
    assert_eq!(tools[0]["description"], "Repeats its input");
    assert_eq!(tools[0]["inputSchema"]["required"], json!(["text"]));

    let manifest = rt.adapter().server_manifest();
    assert_eq!(manifest["tools"][0]["name"], "echo_execute");
}

#[tokio::test]
async fn tools_call_returns_text_content() {
    let ctx = TestContext::new();
    let mut rt = runtime(&ctx);
    install_echo(&mut rt, &ctx).await;

    let response = rt
        .handle_request(
            "tools/call",
            json!({"name": "echo_execute", "arguments": {"text": "hi"}}),
        )
        .await
        .unwrap();
    assert_eq!(response["content"][0]["type"], "text");
    let text = response["content"][0]["text"].as_str().unwrap();
    let output: Value = serde_json::from_str(text).unwrap();
    assert_eq!(output["skill_id"], "echo");
    assert_eq!(output["result"]["echo"], "hi");
    assert_eq!(output["result"]["tool"], "echo_execute");
}

#[tokio::test]
async fn bad_calls_fail_with_the_right_kind() {
    let ctx = TestContext::new();
    let mut rt = runtime(&ctx);
    install_echo(&mut rt, &ctx).await;

    let err = rt
        .handle_request("tools/call", json!({"name": "echo", "arguments": {}}))
        .await
        .unwrap_err();
    assert!(matches!(err, SkillError::Format(_)));

    let err = rt
        .handle_request("tools/call", json!({"name": "weather_execute"}))
        .await
        .unwrap_err();
    assert!(matches!(err, SkillError::NotFound(_)));

    let err = rt
        .handle_request("tools/call", json!({"name": "echo_execute", "arguments": {}}))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Missing required parameter: text");
}

#[tokio::test]
async fn uninstalled_skill_drops_out_after_refresh() {
    let ctx = TestContext::new();
    let mut rt = runtime(&ctx);
    install_echo(&mut rt, &ctx).await;

    rt.manager_mut()
        .uninstall("echo", skillbox_plugins::UninstallOptions::default())
        .await;
    assert_eq!(rt.refresh_tools(), 0);
    let err = rt
        .handle_request("tools/call", json!({"name": "echo_execute"}))
        .await
        .unwrap_err();
    assert!(matches!(err, SkillError::NotFound(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn registered_script_skill_runs_sandboxed() {
    let ctx = TestContext::new();
    let mut rt = runtime(&ctx);
    let dir = write_script_skill(&ctx.sources_dir(), "script", &ScriptBehavior::Echo);
    let report = rt
        .manager_mut()
        .install_from_local("script", &dir, InstallOptions::default())
        .await;
    assert!(report.success, "{report:?}");
    assert_eq!(rt.route("script"), Some(Route::Sandboxed));

    let out = rt
        .execute("script", json!({"q": "x"}), json!({}))
        .await
        .unwrap();
    assert_eq!(out.skill_id, "script");
    assert_eq!(out.result["method"], "execute");
    assert_eq!(out.result["params"]["q"], "x");
    assert_eq!(rt.sandbox().active_count(), 0);

    rt.shutdown().await;
}
