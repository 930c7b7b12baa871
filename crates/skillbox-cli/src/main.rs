//! skillbox - skill plugin runtime CLI
//!
//! Installs, inspects and runs skill plugins. Every invocation resolves the
//! layered configuration, opens the registry under the workspace, loads
//! builtin skills and then runs one subcommand.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skillbox_config::{Config, ResolvedConfig};
use skillbox_plugins::{SkillCatalog, SkillRuntime};
use skillbox_telemetry::{LogConfig, LogFormat, RequestContext, RequestGuard};

mod commands;
mod config_bridge;
mod theme;

use commands::{exec, inspect, skills};
use theme::Theme;

/// skillbox - install, inspect and run skill plugins
#[derive(Parser)]
#[command(name = "skillbox")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Use this config file instead of the layered lookup
    #[arg(short, long, global = true, env = "SKILLBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Workspace root (defaults to the current directory)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered skills
    List {
        /// Only this category
        #[arg(long)]
        category: Option<String>,
        /// Include entries that are registered but not installed
        #[arg(long)]
        all: bool,
    },

    /// Search installed skills and the marketplace
    Search {
        /// Text matched against names, descriptions and keywords
        query: String,
        /// Only this category
        #[arg(long)]
        category: Option<String>,
        /// Maximum results per source
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one skill
    Info {
        /// Skill ID
        id: String,
    },

    /// Install a skill
    Install {
        /// Skill ID; must match the manifest
        id: String,
        /// Local path, `github:owner/repo[@ref]`, git URL, or tarball URL
        source: String,
        /// Install subtree: community or custom
        #[arg(long, default_value = "community")]
        kind: String,
        /// Reinstall if already installed
        #[arg(long)]
        force: bool,
    },

    /// Remove a skill
    Uninstall {
        /// Skill ID
        id: String,
        /// Unregister but leave the files in place
        #[arg(long)]
        keep_files: bool,
    },

    /// Update a skill from its recorded or a new source
    Update {
        /// Skill ID
        id: String,
        /// Source to update from
        #[arg(long)]
        source: Option<String>,
        /// Skip the pre-update snapshot
        #[arg(long)]
        no_backup: bool,
    },

    /// Execute a skill
    Run {
        /// Skill ID
        id: String,
        /// Parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },

    /// Execute a method of the skill at a path in a subprocess
    Sandbox {
        /// Skill directory
        path: PathBuf,
        /// Method name sent to the skill
        #[arg(long, default_value = "execute")]
        method: String,
        /// Parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
        /// Override the configured timeout
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Evaluate a one-off snippet in a subprocess
    Eval {
        /// Code passed to the evaluator
        code: String,
        /// Context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },

    /// Run health checks on loaded skills
    Health,

    /// Show runtime counters
    Status,

    /// List published tools
    Tools,

    /// Show featured marketplace skills
    Featured {
        /// Maximum entries
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Export installed skills
    Export {
        /// json or markdown
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Check configuration and registry consistency
    Validate,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::List { .. } => "list",
            Self::Search { .. } => "search",
            Self::Info { .. } => "info",
            Self::Install { .. } => "install",
            Self::Uninstall { .. } => "uninstall",
            Self::Update { .. } => "update",
            Self::Run { .. } => "run",
            Self::Sandbox { .. } => "sandbox",
            Self::Eval { .. } => "eval",
            Self::Health => "health",
            Self::Status => "status",
            Self::Tools => "tools",
            Self::Featured { .. } => "featured",
            Self::Export { .. } => "export",
            Self::Validate => "validate",
        }
    }
}

fn load_config(cli: &Cli, workspace: &Path) -> Result<(Config, Option<ResolvedConfig>)> {
    if let Some(path) = &cli.config {
        let config = Config::load_file(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?;
        return Ok((config, None));
    }
    let resolved = Config::load(Some(workspace)).context("failed to load configuration")?;
    Ok((resolved.config.clone(), Some(resolved)))
}

fn build_runtime(config: &Config, workspace: &Path) -> Result<SkillRuntime> {
    let runtime = SkillRuntime::new(
        config_bridge::to_manager_config(config, workspace),
        config_bridge::to_sandbox_config(config, workspace),
        SkillCatalog::new(),
    )
    .context("failed to open the skill registry")?;
    Ok(match config_bridge::to_marketplace(config, workspace) {
        Some(market) => runtime.with_marketplace(market),
        None => runtime,
    })
}

async fn dispatch(
    command: Commands,
    rt: &mut SkillRuntime,
    ctx: &RequestContext,
    resolved: Option<&ResolvedConfig>,
    json: bool,
) -> Result<()> {
    match command {
        Commands::List { category, all } => skills::list(rt, category, all, json),
        Commands::Search {
            query,
            category,
            limit,
        } => skills::search(rt, &query, category, limit, json).await,
        Commands::Info { id } => skills::info(rt, &id, json),
        Commands::Install {
            id,
            source,
            kind,
            force,
        } => skills::install(rt, &id, &source, &kind, force, json).await,
        Commands::Uninstall { id, keep_files } => {
            skills::uninstall(rt, &id, keep_files, json).await
        },
        Commands::Update {
            id,
            source,
            no_backup,
        } => skills::update(rt, &id, source, no_backup, json).await,
        Commands::Run { id, params } => exec::run(rt, ctx, &id, params.as_deref(), json).await,
        Commands::Sandbox {
            path,
            method,
            params,
            timeout_ms,
        } => exec::sandbox(rt, &path, &method, params.as_deref(), timeout_ms, json).await,
        Commands::Eval { code, context } => exec::eval(rt, &code, context.as_deref(), json).await,
        Commands::Health => inspect::health(rt, json).await,
        Commands::Status => inspect::status(rt, json),
        Commands::Tools => exec::tools(rt, json),
        Commands::Featured { limit } => inspect::featured(rt, limit, json).await,
        Commands::Export { format } => inspect::export(rt, &format),
        Commands::Validate => inspect::validate(rt, resolved, json),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let workspace = match &cli.workspace {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to get current directory")?,
    };

    let (config, resolved) = match load_config(&cli, &workspace) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", Theme::error(&format!("{e:#}")));
            return Err(e);
        },
    };

    let log_config = config_bridge::to_log_config(&config, &workspace, cli.verbose);
    if let Err(e) = skillbox_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
        let fallback = LogConfig::new("info").with_format(LogFormat::Compact);
        let _ = skillbox_telemetry::setup_logging(&fallback);
    }

    let ctx = RequestContext::new("cli").with_operation(cli.command.name());
    let _guard = RequestGuard::new(ctx.clone());

    let mut rt = build_runtime(&config, &workspace)?;
    if config.manager.auto_load_builtin {
        let summary = rt.start().await;
        for (path, error) in &summary.failed {
            tracing::warn!(path = %path.display(), %error, "Builtin skill failed to load");
        }
    } else {
        rt.refresh_tools();
    }

    let outcome = dispatch(cli.command, &mut rt, &ctx, resolved.as_ref(), cli.json).await;
    rt.shutdown().await;

    if let Err(e) = &outcome {
        eprintln!("{}", Theme::error(&format!("{e:#}")));
    }
    outcome
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "skillbox",
            "install",
            "weather",
            "github:acme/weather@v1",
            "--kind",
            "custom",
            "--json",
            "-w",
            "/work",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.workspace, Some(PathBuf::from("/work")));
        match cli.command {
            Commands::Install {
                id, kind, force, ..
            } => {
                assert_eq!(id, "weather");
                assert_eq!(kind, "custom");
                assert!(!force);
            },
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn sandbox_defaults_to_execute() {
        let cli = Cli::try_parse_from(["skillbox", "sandbox", "skills/community/echo"]).unwrap();
        assert_eq!(cli.command.name(), "sandbox");
        assert!(matches!(
            cli.command,
            Commands::Sandbox { ref method, timeout_ms: None, .. } if method == "execute"
        ));
    }

    #[test]
    fn eval_takes_code_and_optional_context() {
        let cli = Cli::try_parse_from(["skillbox", "eval", "1 + 1", "--context", "{}"]).unwrap();
        assert_eq!(cli.command.name(), "eval");
        assert!(matches!(
            cli.command,
            Commands::Eval { ref code, context: Some(_) } if code == "1 + 1"
        ));
    }

    #[test]
    fn runtime_builds_from_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = build_runtime(&Config::default(), tmp.path()).unwrap();
        assert!(rt.manager().marketplace().is_none());
        assert!(tmp.path().join("skills").is_dir());
        assert!(
            rt.sandbox()
                .config()
                .allowed_dirs
                .contains(&tmp.path().join("skills"))
        );
    }
}
