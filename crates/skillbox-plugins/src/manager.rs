//! Skill lifecycle manager.
//!
//! Orchestrates install, uninstall and update across the source fetcher,
//! the on-disk skill tree, the [`SkillRegistry`] and the [`SkillLoader`].
//! Failures are caught here and turned into an [`OperationReport`]; the
//! live skill directory is only replaced once the staged copy validates,
//! and every later failure puts the previous state back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::SkillCatalog;
use crate::deps::{self, DependencyOptions};
use crate::error::{SkillError, SkillResult};
use crate::loader::{ExecutionOutput, LoadSummary, SkillHealth, SkillLoader, SkillSummary};
use crate::manifest::{SkillManifest, is_valid_skill_id, load_manifest};
use crate::marketplace::{DEFAULT_MARKETPLACE_LIMIT, Marketplace, MarketplaceEntry};
use crate::registry::{RegisterOptions, RegistryEntry, SearchOptions, SkillRegistry};
use crate::skill::SkillKind;
use crate::source::{DefaultFetcher, SkillSource, SourceFetcher};
use crate::staging::{self, Backup, DirSwap};

/// Report reason when installing an ID that is already registered.
pub const REASON_ALREADY_INSTALLED: &str = "already_installed";

/// Filesystem layout and install behaviour.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root of the skill tree (`builtin/`, `community/`, `custom/`).
    pub skills_dir: PathBuf,
    /// Persisted registry file.
    pub registry_file: PathBuf,
    /// Staging and backup area.
    pub temp_dir: PathBuf,
    /// Package install step.
    pub dependencies: DependencyOptions,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            skills_dir: PathBuf::from("./skills"),
            registry_file: PathBuf::from("./skills/registry.json"),
            temp_dir: PathBuf::from("./temp/skills"),
            dependencies: DependencyOptions::default(),
        }
    }
}

impl ManagerConfig {
    /// Layout rooted at `root`: `root/skills`, `root/skills/registry.json`
    /// and `root/temp`.
    #[must_use]
    pub fn rooted_at(root: &Path) -> Self {
        let skills_dir = root.join("skills");
        Self {
            registry_file: skills_dir.join("registry.json"),
            skills_dir,
            temp_dir: root.join("temp"),
            dependencies: DependencyOptions::default(),
        }
    }
}

/// Options for [`SkillManager::install`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Subtree to install into.
    pub kind: SkillKind,
    /// Reinstall even if the ID is already registered.
    pub force: bool,
}

/// Options for [`SkillManager::uninstall`].
#[derive(Debug, Clone, Copy)]
pub struct UninstallOptions {
    /// Remove the skill directory.
    pub delete_files: bool,
}

impl Default for UninstallOptions {
    fn default() -> Self {
        Self { delete_files: true }
    }
}

/// Options for [`SkillManager::update`].
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Source to update from; defaults to the recorded install source.
    pub source: Option<String>,
    /// Snapshot the current files before updating.
    pub backup: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            source: None,
            backup: true,
        }
    }
}

/// Options for [`SkillManager::install_from_github`].
#[derive(Debug, Clone, Default)]
pub struct GitHubInstallOptions {
    /// Tag, branch or commit.
    pub git_ref: Option<String>,
    /// Directory within the repository holding the skill.
    pub subpath: Option<String>,
    /// Install options.
    pub install: InstallOptions,
}

/// Outcome of an install, uninstall or update.
///
/// Expected failures are reported here rather than returned as errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationReport {
    /// Whether the operation took effect.
    pub success: bool,
    /// The skill operated on.
    pub skill_id: String,
    /// Installed version after the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Version before an update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    /// Install subtree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<SkillKind>,
    /// Install directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Whether the skill was loaded in-process.
    pub loaded: bool,
    /// Machine-readable reason for an expected refusal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error kind, see [`SkillError::kind`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    /// Whether a failed update restored the previous version.
    pub rolled_back: bool,
    /// Non-fatal problems (dependencies, package install).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl OperationReport {
    fn new(skill_id: &str, success: bool) -> Self {
        Self {
            success,
            skill_id: skill_id.to_string(),
            version: None,
            previous_version: None,
            kind: None,
            path: None,
            loaded: false,
            reason: None,
            error: None,
            error_kind: None,
            rolled_back: false,
            warnings: Vec::new(),
        }
    }

    fn failed(skill_id: &str, error: &SkillError) -> Self {
        Self {
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            ..Self::new(skill_id, false)
        }
    }

    fn installed(skill_id: &str, done: Installed, kind: SkillKind) -> Self {
        Self {
            version: Some(done.manifest.version),
            kind: Some(kind),
            path: Some(done.path),
            loaded: done.loaded,
            warnings: done.warnings,
            ..Self::new(skill_id, true)
        }
    }
}

/// Result of [`SkillManager::search_available`].
#[derive(Debug, Clone, Serialize)]
pub struct AvailableSkills {
    /// Matches among installed skills.
    pub local: Vec<RegistryEntry>,
    /// Matches in the marketplace.
    pub remote: Vec<MarketplaceEntry>,
}

/// Host process statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessStats {
    /// Process ID.
    pub pid: u32,
    /// Seconds since the manager was created.
    pub uptime_secs: u64,
    /// Resident set size (Linux only).
    pub resident_memory_bytes: Option<u64>,
}

/// Aggregate view returned by [`SkillManager::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerStatus {
    /// Skills loaded in-process.
    pub loaded: usize,
    /// Registry entries flagged installed.
    pub installed: usize,
    /// All registry entries.
    pub registered: usize,
    /// Distinct categories.
    pub categories: Vec<String>,
    /// Host process stats.
    pub process: ProcessStats,
}

struct Installed {
    manifest: SkillManifest,
    path: PathBuf,
    loaded: bool,
    warnings: Vec<String>,
}

/// Installs, removes and updates skills.
pub struct SkillManager {
    config: ManagerConfig,
    registry: SkillRegistry,
    loader: SkillLoader,
    fetcher: Arc<dyn SourceFetcher>,
    marketplace: Option<Marketplace>,
    started: Instant,
}

impl std::fmt::Debug for SkillManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillManager")
            .field("config", &self.config)
            .field("registry", &self.registry.path())
            .field("loaded", &self.loader.loaded_count())
            .finish_non_exhaustive()
    }
}

impl SkillManager {
    /// Create the directory layout and open the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created or the registry
    /// cannot be opened.
    pub fn new(config: ManagerConfig, catalog: SkillCatalog) -> SkillResult<Self> {
        std::fs::create_dir_all(&config.skills_dir)?;
        for kind in SkillKind::ALL {
            std::fs::create_dir_all(config.skills_dir.join(kind.dir_name()))?;
        }
        std::fs::create_dir_all(&config.temp_dir)?;

        let registry = SkillRegistry::open(&config.registry_file)?;
        let loader = SkillLoader::new(&config.skills_dir, catalog);
        debug!(skills_dir = %config.skills_dir.display(), "Skill manager ready");

        Ok(Self {
            config,
            registry,
            loader,
            fetcher: Arc::new(DefaultFetcher::default()),
            marketplace: None,
            started: Instant::now(),
        })
    }

    /// Replace the source fetcher.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: impl SourceFetcher + 'static) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    /// Attach a marketplace for [`SkillManager::search_available`].
    #[must_use]
    pub fn with_marketplace(mut self, marketplace: Marketplace) -> Self {
        self.marketplace = Some(marketplace);
        self
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The registry.
    #[must_use]
    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    /// The loader.
    #[must_use]
    pub fn loader(&self) -> &SkillLoader {
        &self.loader
    }

    /// The marketplace, if configured.
    #[must_use]
    pub fn marketplace(&self) -> Option<&Marketplace> {
        self.marketplace.as_ref()
    }

    /// Install directory for `id` in the `kind` subtree.
    #[must_use]
    pub fn skill_dir(&self, kind: SkillKind, id: &str) -> PathBuf {
        self.config.skills_dir.join(kind.dir_name()).join(id)
    }

    /// Install `id` from `source`.
    ///
    /// Already-registered IDs are refused with reason `already_installed`
    /// unless `force` is set. Skills whose exported symbol is in the catalog
    /// are loaded in-process; others are registered for sandboxed execution.
    pub async fn install(&mut self, id: &str, source: &str, opts: InstallOptions) -> OperationReport {
        info!(skill_id = %id, source = %source, kind = %opts.kind, "Installing skill");

        if self.registry.has(id) && !opts.force {
            info!(skill_id = %id, "Skill already installed");
            return OperationReport {
                reason: Some(REASON_ALREADY_INSTALLED.to_string()),
                ..OperationReport::new(id, false)
            };
        }

        let target = self.skill_dir(opts.kind, id);
        match self.try_install(id, source, opts.kind, &target).await {
            Ok(done) => {
                info!(skill_id = %id, version = %done.manifest.version, "Skill installed");
                OperationReport::installed(id, done, opts.kind)
            },
            Err(e) => {
                warn!(skill_id = %id, error = %e, "Skill install failed");
                OperationReport::failed(id, &e)
            },
        }
    }

    async fn try_install(
        &mut self,
        id: &str,
        source: &str,
        kind: SkillKind,
        target: &Path,
    ) -> SkillResult<Installed> {
        if !is_valid_skill_id(id) {
            return Err(SkillError::Validation(format!("invalid skill id: '{id}'")));
        }
        let source = SkillSource::parse(source)?;

        let staging = staging::staging_dir(&self.config.temp_dir, id)?;
        let root = self.fetcher.fetch(&source, staging.path()).await?;

        let manifest = load_manifest(&root)?;
        manifest.validate()?;
        if manifest.id != id {
            return Err(SkillError::Mismatch {
                expected: id.to_string(),
                actual: manifest.id,
            });
        }
        if !root.join(&manifest.entry).is_file() {
            return Err(SkillError::EntryNotFound {
                id: manifest.id,
                entry: manifest.entry,
            });
        }

        let mut warnings: Vec<String> = deps::check_declared(&manifest, &self.registry)
            .into_iter()
            .map(|e| e.to_string())
            .collect();
        if let Err(e) = deps::install_packages(&root, &self.config.dependencies).await {
            warnings.push(e.to_string());
        }
        for warning in &warnings {
            warn!(skill_id = %id, warning = %warning, "Install warning");
        }

        let previously_loaded = self.loader.is_loaded(id);
        let swap = DirSwap::install(&root, target).await?;

        let in_process = self.loader.catalog().resolve(&manifest.main).is_some();
        if !in_process && previously_loaded {
            // The new version runs sandboxed; the old instance must not keep
            // answering in-process.
            self.loader.unload(id).await;
        }
        let committed = self
            .activate(&manifest, target, kind, &source, in_process)
            .await;
        if let Err(e) = committed {
            self.loader.unload(id).await;
            if let Err(rollback) = swap.rollback().await {
                warn!(skill_id = %id, error = %rollback, "Failed to restore previous skill directory");
            } else if previously_loaded && let Err(reload) = self.loader.load(target).await {
                warn!(skill_id = %id, error = %reload, "Failed to reload previous version");
            }
            return Err(e);
        }
        swap.commit().await;
        drop(staging);

        Ok(Installed {
            manifest,
            path: target.to_path_buf(),
            loaded: in_process,
            warnings,
        })
    }

    /// Load (when in-process) and register the swapped-in directory.
    async fn activate(
        &mut self,
        manifest: &SkillManifest,
        target: &Path,
        kind: SkillKind,
        source: &SkillSource,
        in_process: bool,
    ) -> SkillResult<()> {
        if in_process {
            self.loader.load(target).await?;
        } else {
            debug!(skill_id = %manifest.id, symbol = %manifest.main, "No catalog factory, registering for sandboxed execution");
        }
        self.registry.register(
            manifest,
            RegisterOptions {
                path: target.to_path_buf(),
                kind,
                source: Some(source.to_string()),
            },
        )?;
        Ok(())
    }

    /// Remove a skill.
    ///
    /// Unloading and unregistering are idempotent, so removing a skill that
    /// was never loaded or installed succeeds.
    pub async fn uninstall(&mut self, id: &str, opts: UninstallOptions) -> OperationReport {
        info!(skill_id = %id, delete_files = opts.delete_files, "Uninstalling skill");
        match self.try_uninstall(id, opts).await {
            Ok(path) => OperationReport {
                path,
                ..OperationReport::new(id, true)
            },
            Err(e) => {
                warn!(skill_id = %id, error = %e, "Skill uninstall failed");
                OperationReport::failed(id, &e)
            },
        }
    }

    async fn try_uninstall(&mut self, id: &str, opts: UninstallOptions) -> SkillResult<Option<PathBuf>> {
        let path = self.find_skill_path(id);
        self.loader.unload(id).await;
        self.registry.unregister(id)?;

        if opts.delete_files
            && let Some(path) = &path
        {
            staging::remove_dir_if_exists(path).await?;
            info!(skill_id = %id, path = %path.display(), "Deleted skill files");
        }
        Ok(path)
    }

    /// Update a skill in place.
    ///
    /// All-or-nothing: if the new version cannot be installed the previous
    /// files, registry entry and load state are restored.
    pub async fn update(&mut self, id: &str, opts: UpdateOptions) -> OperationReport {
        info!(skill_id = %id, "Updating skill");

        let Some(current) = self.registry.get(id).cloned() else {
            let err = SkillError::NotFound(id.to_string());
            warn!(skill_id = %id, "Cannot update a skill that is not installed");
            return OperationReport::failed(id, &err);
        };
        let previous_version = Some(current.manifest.version.clone());

        let source = opts
            .source
            .clone()
            .or_else(|| current.source.clone())
            .unwrap_or_else(|| format!("local:{}", current.path.display()));

        let backup = if opts.backup {
            match Backup::snapshot(&current.path, &self.config.temp_dir, id).await {
                Ok(backup) => Some(backup),
                Err(e) => {
                    warn!(skill_id = %id, error = %e, "Backup failed, update aborted");
                    return OperationReport {
                        previous_version,
                        ..OperationReport::failed(id, &e)
                    };
                },
            }
        } else {
            None
        };

        let was_loaded = self.loader.is_loaded(id);
        self.loader.unload(id).await;
        if let Err(e) = self.registry.unregister(id) {
            self.restore_after_failed_update(&current, backup.as_ref(), was_loaded)
                .await;
            return OperationReport {
                previous_version,
                rolled_back: true,
                ..OperationReport::failed(id, &e)
            };
        }

        match self
            .try_install(id, &source, current.kind, &current.path)
            .await
        {
            Ok(done) => {
                info!(
                    skill_id = %id,
                    from = %current.manifest.version,
                    to = %done.manifest.version,
                    "Skill updated"
                );
                OperationReport {
                    previous_version,
                    ..OperationReport::installed(id, done, current.kind)
                }
            },
            Err(e) => {
                warn!(skill_id = %id, error = %e, "Update failed, rolling back");
                let restored = self
                    .restore_after_failed_update(&current, backup.as_ref(), was_loaded)
                    .await;
                OperationReport {
                    previous_version,
                    version: restored.then(|| current.manifest.version.clone()),
                    loaded: restored && was_loaded,
                    rolled_back: restored,
                    ..OperationReport::failed(id, &e)
                }
            },
        }
    }

    /// Put back the files, registry entry and load state captured before an
    /// update. Returns whether the registry entry was restored.
    async fn restore_after_failed_update(
        &mut self,
        previous: &RegistryEntry,
        backup: Option<&Backup>,
        was_loaded: bool,
    ) -> bool {
        let id = previous.id().to_string();
        self.loader.unload(&id).await;

        if let Some(backup) = backup
            && let Err(e) = backup.restore_to(&previous.path).await
        {
            warn!(skill_id = %id, error = %e, "Failed to restore skill files from backup");
        }

        let restored = match load_manifest(&previous.path) {
            Ok(manifest) if manifest == previous.manifest => {
                self.registry.restore(previous.clone())
            },
            Ok(manifest) => self
                .registry
                .register(
                    &manifest,
                    RegisterOptions {
                        path: previous.path.clone(),
                        kind: previous.kind,
                        source: previous.source.clone(),
                    },
                )
                .map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = &restored {
            warn!(skill_id = %id, error = %e, "Failed to re-register previous version");
        }

        if was_loaded && let Err(e) = self.loader.load(&previous.path).await {
            warn!(skill_id = %id, error = %e, "Failed to reload previous version");
        }
        restored.is_ok()
    }

    /// Install from `github:owner/repo[/subpath][@ref]`.
    ///
    /// The skill ID is derived from the repository name, or from the last
    /// subpath segment when one is given.
    pub async fn install_from_github(
        &mut self,
        owner: &str,
        repo: &str,
        opts: GitHubInstallOptions,
    ) -> OperationReport {
        let mut source = format!("github:{owner}/{repo}");
        if let Some(sub) = opts.subpath.as_deref().filter(|s| !s.is_empty()) {
            source.push('/');
            source.push_str(sub.trim_matches('/'));
        }
        if let Some(r) = &opts.git_ref {
            source.push('@');
            source.push_str(r);
        }

        let id = match SkillSource::parse(&source) {
            Ok(parsed) => parsed.id_hint(),
            Err(e) => return OperationReport::failed(repo, &e),
        };
        self.install(&id, &source, opts.install).await
    }

    /// Install `id` from a local directory.
    pub async fn install_from_local(
        &mut self,
        id: &str,
        path: &Path,
        opts: InstallOptions,
    ) -> OperationReport {
        let source = format!("local:{}", path.display());
        self.install(id, &source, opts).await
    }

    /// Reload an in-process skill from its directory.
    ///
    /// # Errors
    ///
    /// See [`SkillLoader::reload`].
    pub async fn reload(&mut self, id: &str) -> SkillResult<()> {
        self.loader.reload(id).await
    }

    /// The loader's view of in-process skills.
    #[must_use]
    pub fn list_installed(&self) -> Vec<SkillSummary> {
        self.loader.list()
    }

    /// Search installed skills and, when configured, the marketplace.
    ///
    /// A marketplace failure yields no remote results and a warning.
    pub async fn search_available(&self, query: &str, opts: &SearchOptions) -> AvailableSkills {
        let local = self
            .registry
            .search(query, opts)
            .into_iter()
            .cloned()
            .collect();

        let remote = match &self.marketplace {
            Some(market) => {
                let limit = if opts.limit == 0 {
                    DEFAULT_MARKETPLACE_LIMIT
                } else {
                    opts.limit
                };
                match market.search(query, &[], limit).await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(error = %e, "Marketplace search failed");
                        Vec::new()
                    },
                }
            },
            None => Vec::new(),
        };

        AvailableSkills { local, remote }
    }

    /// Load every skill in the `builtin` subtree.
    pub async fn load_builtin(&mut self) -> LoadSummary {
        info!("Loading builtin skills");
        self.loader.load_all(SkillKind::Builtin).await
    }

    /// Loaded and registered counts, categories and process stats.
    #[must_use]
    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            loaded: self.loader.loaded_count(),
            installed: self.registry.installed_count(),
            registered: self.registry.len(),
            categories: self.registry.categories(),
            process: ProcessStats {
                pid: std::process::id(),
                uptime_secs: self.started.elapsed().as_secs(),
                resident_memory_bytes: resident_memory_bytes(),
            },
        }
    }

    /// Run a loaded skill in-process.
    ///
    /// # Errors
    ///
    /// See [`SkillLoader::execute`].
    pub async fn execute(
        &self,
        id: &str,
        params: Value,
        context: Value,
    ) -> SkillResult<ExecutionOutput> {
        self.loader.execute(id, params, context).await
    }

    /// Run every loaded skill's health check.
    pub async fn health_check_all(&self) -> BTreeMap<String, SkillHealth> {
        self.loader.health_check_all().await
    }

    /// Unload every in-process skill.
    pub async fn shutdown(&mut self) -> usize {
        let unloaded = self.loader.unload_all().await;
        info!(unloaded, "Skill manager shut down");
        unloaded
    }

    fn find_skill_path(&self, id: &str) -> Option<PathBuf> {
        if let Some(entry) = self.registry.get(id) {
            return Some(entry.path.clone());
        }
        if !is_valid_skill_id(id) {
            return None;
        }
        SkillKind::ALL
            .into_iter()
            .map(|kind| self.skill_dir(kind, id))
            .find(|p| p.is_dir())
    }
}

/// `VmRSS` from `/proc/self/status`.
#[cfg(target_os = "linux")]
fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_bytes() -> Option<u64> {
    None
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kib.saturating_mul(1024))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_rss_parsing() {
        let status = "Name:\tskillbox\nVmPeak:\t  9000 kB\nVmRSS:\t  1234 kB\n";
        assert_eq!(parse_vm_rss(status), Some(1234 * 1024));
        assert_eq!(parse_vm_rss("Name: x\n"), None);
    }

    #[test]
    fn new_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ManagerConfig::rooted_at(tmp.path());
        let manager = SkillManager::new(config.clone(), SkillCatalog::new()).unwrap();

        for kind in SkillKind::ALL {
            assert!(config.skills_dir.join(kind.dir_name()).is_dir());
        }
        assert!(config.temp_dir.is_dir());
        let status = manager.status();
        assert_eq!(status.loaded, 0);
        assert_eq!(status.registered, 0);
        assert_eq!(status.process.pid, std::process::id());
    }

    #[tokio::test]
    async fn uninstall_unknown_skill_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager =
            SkillManager::new(ManagerConfig::rooted_at(tmp.path()), SkillCatalog::new()).unwrap();
        let report = manager.uninstall("ghost", UninstallOptions::default()).await;
        assert!(report.success);
        assert!(report.path.is_none());
    }

    #[tokio::test]
    async fn update_of_unknown_skill_reports_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager =
            SkillManager::new(ManagerConfig::rooted_at(tmp.path()), SkillCatalog::new()).unwrap();
        let report = manager.update("ghost", UpdateOptions::default()).await;
        assert!(!report.success);
        assert_eq!(report.error_kind, Some("not_found"));
    }

    #[tokio::test]
    async fn invalid_ids_and_sources_are_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager =
            SkillManager::new(ManagerConfig::rooted_at(tmp.path()), SkillCatalog::new()).unwrap();

        let report = manager
            .install("../escape", "local:/tmp", InstallOptions::default())
            .await;
        assert_eq!(report.error_kind, Some("validation"));

        let report = manager
            .install("echo", "ftp://nope", InstallOptions::default())
            .await;
        assert_eq!(report.error_kind, Some("invalid_source"));
    }
}
