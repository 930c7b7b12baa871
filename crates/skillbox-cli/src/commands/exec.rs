//! Execution commands: run, sandbox, tools.

use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};
use skillbox_plugins::SkillRuntime;
use skillbox_telemetry::RequestContext;

use super::{parse_object_arg, print_json};
use crate::theme::Theme;

/// Execute a skill through the runtime's router.
pub(crate) async fn run(
    rt: &SkillRuntime,
    ctx: &RequestContext,
    id: &str,
    params: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let params = parse_object_arg(params, "--params")?;
    let context = json!({ "requestId": ctx.request_id.to_string(), "source": "cli" });
    let output = rt.execute(id, params, context).await?;

    if json {
        return print_json(&output);
    }
    println!(
        "{}",
        Theme::success(&format!(
            "{} finished in {} ms",
            Theme::skill_id(&output.skill_id),
            output.latency.as_millis()
        ))
    );
    println!("{}", render(&output.result)?);
    Ok(())
}

/// Execute one method of the skill at `path` in a subprocess.
pub(crate) async fn sandbox(
    rt: &SkillRuntime,
    path: &Path,
    method: &str,
    params: Option<&str>,
    timeout_ms: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let params = parse_object_arg(params, "--params")?;
    let result = rt
        .sandbox()
        .execute_with_timeout(
            path,
            method,
            params,
            json!({}),
            timeout_ms.map(Duration::from_millis),
        )
        .await?;
    if json {
        return print_json(&result);
    }
    println!("{}", render(&result)?);
    Ok(())
}

/// Evaluate a snippet with the configured evaluator.
pub(crate) async fn eval(
    rt: &SkillRuntime,
    code: &str,
    context: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let context = parse_object_arg(context, "--context")?;
    let result = rt.sandbox().eval(code, context).await?;
    if json {
        return print_json(&result);
    }
    println!("{}", render(&result)?);
    Ok(())
}

/// List tools published by the protocol adapter.
pub(crate) fn tools(rt: &SkillRuntime, json: bool) -> anyhow::Result<()> {
    let tools = rt.adapter().tools();
    if json {
        return print_json(&tools);
    }
    if tools.is_empty() {
        println!("{}", Theme::info("No tools published; no skills are loaded in-process."));
        return Ok(());
    }
    println!("{}", Theme::header("Tools"));
    println!("{}", Theme::separator());
    for tool in tools {
        println!("  {:<32} {}", Theme::skill_id(&tool.name), tool.description);
    }
    Ok(())
}

fn render(value: &Value) -> anyhow::Result<String> {
    Ok(match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other)?,
    })
}
