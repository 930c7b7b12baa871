//! Conversion from `skillbox_config::Config` sections to runtime options.
//!
//! Relative paths in the config are resolved against the workspace root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use skillbox_config::Config;
use skillbox_plugins::{
    DependencyOptions, IndexLocation, ManagerConfig, Marketplace, ResourceLimits, SandboxConfig,
};
use skillbox_telemetry::{LogConfig, LogFormat};

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Log file prefix when file logging is configured.
pub(crate) const LOG_FILE_PREFIX: &str = "skillbox.log";

fn resolve(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

/// Manager layout and dependency handling.
pub(crate) fn to_manager_config(cfg: &Config, workspace: &Path) -> ManagerConfig {
    ManagerConfig {
        skills_dir: resolve(workspace, &cfg.paths.skills_dir),
        registry_file: resolve(workspace, &cfg.paths.registry_file),
        temp_dir: resolve(workspace, &cfg.paths.temp_dir),
        dependencies: DependencyOptions {
            install_packages: cfg.manager.install_packages,
            npm_command: cfg.manager.npm_command.clone(),
            timeout: Duration::from_secs(cfg.manager.dependency_timeout_secs),
        },
    }
}

/// Sandbox settings. The evaluator command keeps its built-in default.
pub(crate) fn to_sandbox_config(cfg: &Config, workspace: &Path) -> SandboxConfig {
    let s = &cfg.sandbox;
    let resource_limits = (s.memory_limit_mb > 0).then(|| ResourceLimits {
        max_memory_bytes: s.memory_limit_mb.saturating_mul(BYTES_PER_MIB),
        ..ResourceLimits::default()
    });
    SandboxConfig {
        timeout: Duration::from_millis(s.timeout_ms),
        eval_timeout: Duration::from_millis(s.eval_timeout_ms),
        allowed_dirs: s
            .allowed_dirs
            .iter()
            .map(|dir| resolve(workspace, dir))
            .collect(),
        max_payload_bytes: usize::try_from(s.max_payload_bytes).unwrap_or(usize::MAX),
        network: s.network,
        resource_limits,
        restrict_filesystem: s.restrict_filesystem,
        interpreters: s.interpreters.clone(),
        env_passthrough: s.env_passthrough.clone(),
        ..SandboxConfig::default()
    }
}

/// Marketplace client, if an index is configured.
pub(crate) fn to_marketplace(cfg: &Config, workspace: &Path) -> Option<Marketplace> {
    let location = match IndexLocation::parse(cfg.marketplace.index()?) {
        IndexLocation::File(path) => IndexLocation::File(resolve(workspace, &path)),
        url @ IndexLocation::Url(_) => url,
    };
    let cache_dir = resolve(workspace, &cfg.paths.temp_dir).join("marketplace");
    Some(Marketplace::new(location).with_cache_dir(cache_dir))
}

/// Logging, with `verbose` forcing `debug`.
pub(crate) fn to_log_config(cfg: &Config, workspace: &Path, verbose: bool) -> LogConfig {
    let level = if verbose {
        "debug"
    } else {
        cfg.logging.level.as_str()
    };
    let format = cfg
        .logging
        .format
        .parse::<LogFormat>()
        .unwrap_or(LogFormat::Compact);
    let log = LogConfig::new(level).with_format(format);
    match cfg.logging.directory() {
        Some(dir) => log.with_file_logging(resolve(workspace, &dir), LOG_FILE_PREFIX),
        None => log,
    }
}

#[cfg(test)]
mod tests {
    use skillbox_telemetry::LogTarget;

    use super::*;

    #[test]
    fn relative_paths_join_the_workspace() {
        let cfg = Config::default();
        let manager = to_manager_config(&cfg, Path::new("/work"));
        assert_eq!(manager.skills_dir, PathBuf::from("/work/skills"));
        assert_eq!(
            manager.registry_file,
            PathBuf::from("/work/skills/registry.json")
        );
        assert_eq!(manager.temp_dir, PathBuf::from("/work/temp/skills"));
        assert_eq!(manager.dependencies.timeout, Duration::from_secs(180));
    }

    #[test]
    fn sandbox_settings_carry_over() {
        let mut cfg = Config::default();
        cfg.sandbox.timeout_ms = 1500;
        cfg.sandbox.memory_limit_mb = 2048;
        cfg.sandbox.allowed_dirs = vec![PathBuf::from("plugins"), PathBuf::from("/srv/skills")];

        let sandbox = to_sandbox_config(&cfg, Path::new("/work"));
        assert_eq!(sandbox.timeout, Duration::from_millis(1500));
        assert_eq!(
            sandbox.allowed_dirs,
            vec![PathBuf::from("/work/plugins"), PathBuf::from("/srv/skills")]
        );
        assert_eq!(
            sandbox.resource_limits.map(|l| l.max_memory_bytes),
            Some(2048 * BYTES_PER_MIB)
        );
        assert_eq!(sandbox.interpreters["py"], vec!["python3".to_owned()]);
        assert!(!sandbox.eval_command.is_empty());
    }

    #[test]
    fn zero_memory_limit_means_none() {
        let sandbox = to_sandbox_config(&Config::default(), Path::new("/work"));
        assert!(sandbox.resource_limits.is_none());
    }

    #[test]
    fn marketplace_only_when_configured() {
        let mut cfg = Config::default();
        assert!(to_marketplace(&cfg, Path::new("/work")).is_none());

        cfg.marketplace.index = "index.json".into();
        let market = to_marketplace(&cfg, Path::new("/work")).unwrap();
        assert_eq!(
            market.location(),
            &IndexLocation::File(PathBuf::from("/work/index.json"))
        );

        cfg.marketplace.index = "https://example.com/index.json".into();
        let market = to_marketplace(&cfg, Path::new("/work")).unwrap();
        assert!(matches!(market.location(), IndexLocation::Url(_)));
    }

    #[test]
    fn log_config_honours_verbose_and_directory() {
        let mut cfg = Config::default();
        let log = to_log_config(&cfg, Path::new("/work"), true);
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, LogFormat::Compact);
        assert_eq!(log.target, LogTarget::Stderr);

        cfg.logging.directory = "logs".into();
        cfg.logging.format = "json".into();
        let log = to_log_config(&cfg, Path::new("/work"), false);
        assert_eq!(log.level, "info");
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(
            log.target,
            LogTarget::File {
                directory: PathBuf::from("/work/logs"),
                prefix: LOG_FILE_PREFIX.to_owned(),
            }
        );
    }
}
