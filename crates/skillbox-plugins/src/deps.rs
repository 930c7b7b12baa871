//! Dependency checks for staged skills.
//!
//! Nothing here fails an install. Declared skill dependencies are checked
//! against the registry and reported as warnings, and the package install
//! step only warns when it fails.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::SkillError;
use crate::manifest::SkillManifest;
use crate::registry::SkillRegistry;
use crate::version::VersionReq;

/// Default budget for the package install step.
pub const DEFAULT_PACKAGE_INSTALL_TIMEOUT: Duration = Duration::from_secs(180);

/// Package install settings.
#[derive(Debug, Clone)]
pub struct DependencyOptions {
    /// Run the package manager when the skill ships a `package.json`.
    pub install_packages: bool,
    /// Package manager program.
    pub npm_command: String,
    /// Budget for one package install.
    pub timeout: Duration,
}

impl Default for DependencyOptions {
    fn default() -> Self {
        Self {
            install_packages: true,
            npm_command: "npm".to_string(),
            timeout: DEFAULT_PACKAGE_INSTALL_TIMEOUT,
        }
    }
}

/// Check each declared dependency against the registry.
///
/// Returns one [`SkillError::Dependency`] per dependency that is missing,
/// too old, or declared with an unparsable requirement.
pub fn check_declared(manifest: &SkillManifest, registry: &SkillRegistry) -> Vec<SkillError> {
    let mut problems = Vec::new();
    for (dep_id, requirement) in &manifest.dependencies {
        let req = match VersionReq::parse(requirement) {
            Ok(req) => req,
            Err(e) => {
                problems.push(SkillError::Dependency(format!(
                    "{dep_id}: invalid requirement '{requirement}': {e}"
                )));
                continue;
            },
        };

        let Some(entry) = registry.get(dep_id).filter(|e| e.installed) else {
            problems.push(SkillError::Dependency(format!(
                "{dep_id} {requirement} is not installed"
            )));
            continue;
        };

        match entry.manifest.parsed_version() {
            Ok(installed) if req.matches(&installed) => {},
            Ok(installed) => problems.push(SkillError::Dependency(format!(
                "{dep_id} {requirement} required, {installed} installed"
            ))),
            Err(e) => problems.push(SkillError::Dependency(format!(
                "{dep_id}: installed version unreadable: {e}"
            ))),
        }
    }
    problems
}

/// Install the skill's packages if it ships a `package.json`.
///
/// Runs `npm ci --prefer-offline --no-audit` in `dir`.
///
/// # Errors
///
/// Returns [`SkillError::Dependency`] if the package manager is missing,
/// fails, or exceeds its budget. Callers treat this as a warning.
pub async fn install_packages(dir: &Path, opts: &DependencyOptions) -> Result<bool, SkillError> {
    if !opts.install_packages || !dir.join("package.json").is_file() {
        return Ok(false);
    }

    let program = which::which(&opts.npm_command).map_err(|e| {
        SkillError::Dependency(format!("{} not available: {e}", opts.npm_command))
    })?;

    info!(dir = %dir.display(), "Installing skill packages");
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(["ci", "--prefer-offline", "--no-audit"])
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(opts.timeout, cmd.output())
        .await
        .map_err(|_| {
            SkillError::Dependency(format!(
                "package install timed out after {}s",
                opts.timeout.as_secs()
            ))
        })?
        .map_err(|e| SkillError::Dependency(format!("failed to run package install: {e}")))?;

    if output.status.success() {
        debug!(dir = %dir.display(), "Skill packages installed");
        Ok(true)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(dir = %dir.display(), status = %output.status, "Package install failed");
        Err(SkillError::Dependency(format!(
            "package install failed: {}",
            stderr.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::registry::RegisterOptions;
    use crate::skill::SkillKind;

    fn opts(dir: &Path) -> RegisterOptions {
        RegisterOptions {
            path: dir.join("base"),
            kind: SkillKind::Community,
            source: None,
        }
    }

    fn manifest(id: &str, version: &str, deps: &[(&str, &str)]) -> SkillManifest {
        SkillManifest {
            id: id.into(),
            name: id.into(),
            version: version.into(),
            entry: "index.js".into(),
            main: "Main".into(),
            dependencies: deps
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
            ..SkillManifest::default()
        }
    }

    #[test]
    fn reports_missing_and_outdated() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = SkillRegistry::open(tmp.path().join("registry.json")).unwrap();
        registry
            .register(&manifest("base", "1.2.0", &[]), opts(tmp.path()))
            .unwrap();

        let skill = manifest(
            "app",
            "1.0.0",
            &[("base", "^1.0.0"), ("missing", "*"), ("strict", "bogus")],
        );
        let problems = check_declared(&skill, &registry);
        assert_eq!(problems.len(), 2);
        assert!(problems.iter().all(|p| matches!(p, SkillError::Dependency(_))));

        let newer = manifest("app", "1.0.0", &[("base", ">=2.0.0")]);
        let problems = check_declared(&newer, &registry);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].to_string().contains("1.2.0 installed"));
    }

    #[test]
    fn exact_requirement() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = SkillRegistry::open(tmp.path().join("registry.json")).unwrap();
        registry
            .register(&manifest("base", "1.2.0", &[]), opts(tmp.path()))
            .unwrap();

        assert!(check_declared(&manifest("a", "1.0.0", &[("base", "=1.2.0")]), &registry).is_empty());
        assert_eq!(
            check_declared(&manifest("a", "1.0.0", &[("base", "=1.1.0")]), &registry).len(),
            1
        );
    }

    #[tokio::test]
    async fn no_package_json_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let ran = install_packages(tmp.path(), &DependencyOptions::default())
            .await
            .unwrap();
        assert!(!ran);
    }

    #[tokio::test]
    async fn missing_package_manager_is_a_dependency_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("package.json"), "{}").unwrap();
        let opts = DependencyOptions {
            npm_command: "definitely-not-a-package-manager".into(),
            ..DependencyOptions::default()
        };
        let err = install_packages(tmp.path(), &opts).await.unwrap_err();
        assert!(matches!(err, SkillError::Dependency(_)));
    }
}
