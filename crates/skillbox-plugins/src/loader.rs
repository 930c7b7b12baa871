//! In-process skill loader.
//!
//! Trusted skills are instantiated inside the host from the
//! [`SkillCatalog`]. The loader owns every instance and tracks a
//! [`LoadStatus`] per skill. A failed load still leaves an `Error` record
//! behind so callers can see why a skill is unavailable.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::{SkillCatalog, SkillInit};
use crate::error::{SkillError, SkillResult};
use crate::manifest::{
    MANIFEST_FILE_NAME, ParameterSchema, SkillManifest, load_manifest, load_skill_config,
};
use crate::skill::{LoadStatus, Skill, SkillKind};

/// A skill tracked by the loader.
pub struct LoadedSkill {
    /// Skill ID (the directory name if the manifest could not be read).
    pub id: String,
    /// The manifest, when it could be read.
    pub manifest: Option<SkillManifest>,
    /// Current status.
    pub status: LoadStatus,
    /// When the skill reached `Loaded`.
    pub loaded_at: Option<DateTime<Utc>>,
    /// Directory the skill was loaded from.
    pub path: PathBuf,
    /// Failure message for `Error` records.
    pub error: Option<String>,
    instance: Option<Box<dyn Skill>>,
}

impl std::fmt::Debug for LoadedSkill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedSkill")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("path", &self.path)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Public view of a tracked skill.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillSummary {
    /// Skill ID.
    pub id: String,
    /// Display name, if known.
    pub name: Option<String>,
    /// Version, if known.
    pub version: Option<String>,
    /// Current status.
    pub status: LoadStatus,
    /// When the skill was loaded.
    pub loaded_at: Option<DateTime<Utc>>,
    /// Source directory.
    pub path: PathBuf,
    /// Failure message for `Error` records.
    pub error: Option<String>,
}

/// A loaded skill as exposed to tool-calling adapters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutableSkill {
    /// Skill ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Description, if any.
    pub description: Option<String>,
    /// Parameter schema, if any.
    pub parameters: Option<ParameterSchema>,
}

/// Successful result of [`SkillLoader::execute`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutput {
    /// The skill that ran.
    pub skill_id: String,
    /// Value returned by the skill.
    pub result: Value,
    /// Wall-clock time spent in the skill.
    #[serde(serialize_with = "serialize_millis")]
    pub latency: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Outcome of one skill's health check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillHealth {
    /// `skipped`, `error`, or the status the skill reported.
    pub status: String,
    /// Skip reason or error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Details reported by the skill.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Result of a best-effort batch load.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    /// IDs that loaded.
    pub loaded: Vec<String>,
    /// Directories that failed, with the error message.
    pub failed: Vec<(PathBuf, String)>,
}

/// Loads trusted skills into the host process.
#[derive(Debug)]
pub struct SkillLoader {
    skills_dir: PathBuf,
    catalog: SkillCatalog,
    skills: BTreeMap<String, LoadedSkill>,
}

impl SkillLoader {
    /// Create a loader rooted at `skills_dir`.
    #[must_use]
    pub fn new(skills_dir: impl Into<PathBuf>, catalog: SkillCatalog) -> Self {
        Self {
            skills_dir: skills_dir.into(),
            catalog,
            skills: BTreeMap::new(),
        }
    }

    /// Root directory containing one subdirectory per [`SkillKind`].
    #[must_use]
    pub fn skills_dir(&self) -> &Path {
        &self.skills_dir
    }

    /// The factory catalog used to resolve exported symbols.
    #[must_use]
    pub fn catalog(&self) -> &SkillCatalog {
        &self.catalog
    }

    /// Load the skill in `path`.
    ///
    /// Reads and validates the manifest, checks the entry file, resolves the
    /// exported symbol in the catalog, builds the instance with its
    /// `config.json` and runs `init`. If the ID is already loaded it is
    /// unloaded first. Any failure records an `Error` entry and is returned.
    ///
    /// # Errors
    ///
    /// Returns the first failure encountered.
    pub async fn load(&mut self, path: &Path) -> SkillResult<String> {
        let manifest = match load_manifest(path).and_then(|m| m.validate().map(|()| m)) {
            Ok(m) => m,
            Err(e) => {
                let fallback_id = dir_name(path);
                self.record_failure(&fallback_id, path, None, &e).await;
                return Err(e);
            },
        };
        let id = manifest.id.clone();

        if self.skills.contains_key(&id) {
            self.unload(&id).await;
        }

        match self.instantiate(path, &manifest).await {
            Ok(instance) => {
                info!(skill_id = %id, version = %manifest.version, path = %path.display(), "Loaded skill");
                self.skills.insert(
                    id.clone(),
                    LoadedSkill {
                        id: id.clone(),
                        manifest: Some(manifest),
                        status: LoadStatus::Loaded,
                        loaded_at: Some(Utc::now()),
                        path: path.to_path_buf(),
                        error: None,
                        instance: Some(instance),
                    },
                );
                Ok(id)
            },
            Err(e) => {
                self.record_failure(&id, path, Some(manifest), &e).await;
                Err(e)
            },
        }
    }

    async fn instantiate(
        &self,
        path: &Path,
        manifest: &SkillManifest,
    ) -> SkillResult<Box<dyn Skill>> {
        if !path.join(&manifest.entry).is_file() {
            return Err(SkillError::EntryNotFound {
                id: manifest.id.clone(),
                entry: manifest.entry.clone(),
            });
        }

        // Resolved on every load so a replaced factory is picked up.
        let factory =
            self.catalog
                .resolve(&manifest.main)
                .ok_or_else(|| SkillError::EntryNotFound {
                    id: manifest.id.clone(),
                    entry: manifest.main.clone(),
                })?;

        let config = load_skill_config(path)?;
        let mut instance = factory.create(SkillInit {
            manifest: manifest.clone(),
            config,
            root: path.to_path_buf(),
        })?;

        match AssertUnwindSafe(instance.init()).catch_unwind().await {
            Ok(result) => result?,
            Err(panic) => return Err(panic_error("init", &*panic)),
        }
        Ok(instance)
    }

    /// Record `id` as failed. A live instance already under that ID is
    /// unloaded first so its `destroy` hook still runs.
    async fn record_failure(
        &mut self,
        id: &str,
        path: &Path,
        manifest: Option<SkillManifest>,
        error: &SkillError,
    ) {
        warn!(skill_id = %id, path = %path.display(), error = %error, "Failed to load skill");
        if self.skills.get(id).is_some_and(|s| s.instance.is_some()) {
            self.unload(id).await;
        }
        self.skills.insert(
            id.to_string(),
            LoadedSkill {
                id: id.to_string(),
                manifest,
                status: LoadStatus::Error,
                loaded_at: None,
                path: path.to_path_buf(),
                error: Some(error.to_string()),
                instance: None,
            },
        );
    }

    /// Unload a skill, running its `destroy` hook.
    ///
    /// A `destroy` failure is logged and the skill is still removed. Returns
    /// whether the ID was tracked.
    pub async fn unload(&mut self, id: &str) -> bool {
        let Some(mut skill) = self.skills.remove(id) else {
            return false;
        };
        if let Some(mut instance) = skill.instance.take() {
            match AssertUnwindSafe(instance.destroy()).catch_unwind().await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    warn!(skill_id = %id, error = %e, "Skill destroy hook failed");
                },
                Err(panic) => {
                    warn!(skill_id = %id, error = %panic_error("destroy", &*panic), "Skill destroy hook panicked");
                },
            }
        }
        info!(skill_id = %id, "Unloaded skill");
        true
    }

    /// Unload every tracked skill. Returns how many were tracked.
    pub async fn unload_all(&mut self) -> usize {
        let ids: Vec<String> = self.skills.keys().cloned().collect();
        for id in &ids {
            self.unload(id).await;
        }
        ids.len()
    }

    /// Unload and load a skill from the directory it was loaded from.
    ///
    /// On failure the skill is left in `Error`, never silently unloaded.
    ///
    /// # Errors
    ///
    /// Returns [`SkillError::NotFound`] if the ID is not tracked,
    /// [`SkillError::Mismatch`] if the directory now declares another ID, or
    /// the load error.
    pub async fn reload(&mut self, id: &str) -> SkillResult<()> {
        let path = self
            .skills
            .get(id)
            .map(|s| s.path.clone())
            .ok_or_else(|| SkillError::NotFound(id.to_string()))?;
        let previous_manifest = self.skills.get(id).and_then(|s| s.manifest.clone());

        self.unload(id).await;

        match self.load(&path).await {
            Ok(new_id) if new_id == id => {
                debug!(skill_id = %id, "Reloaded skill");
                Ok(())
            },
            Ok(new_id) => {
                self.unload(&new_id).await;
                let err = SkillError::Mismatch {
                    expected: id.to_string(),
                    actual: new_id,
                };
                self.record_failure(id, &path, previous_manifest, &err).await;
                Err(err)
            },
            Err(e) => {
                if self.status(id) != Some(LoadStatus::Error) {
                    self.record_failure(id, &path, previous_manifest, &e).await;
                }
                Err(e)
            },
        }
    }

    /// Execute a loaded skill.
    ///
    /// Parameters are validated against the manifest schema before the skill
    /// runs. Errors returned by the skill pass through unmodified; a panic is
    /// reported as an execution error for this call only.
    ///
    /// # Errors
    ///
    /// [`SkillError::NotFound`], [`SkillError::NotReady`],
    /// [`SkillError::Validation`], or the skill's own error.
    pub async fn execute(
        &self,
        id: &str,
        params: Value,
        context: Value,
    ) -> SkillResult<ExecutionOutput> {
        let skill = self
            .skills
            .get(id)
            .ok_or_else(|| SkillError::NotFound(id.to_string()))?;

        let (Some(instance), Some(manifest), LoadStatus::Loaded) =
            (skill.instance.as_ref(), skill.manifest.as_ref(), skill.status)
        else {
            return Err(SkillError::NotReady {
                id: id.to_string(),
                status: skill.status.to_string(),
            });
        };

        manifest.validate_params(&params)?;

        let started = Instant::now();
        let result = match AssertUnwindSafe(instance.execute(params, context))
            .catch_unwind()
            .await
        {
            Ok(result) => result?,
            Err(panic) => return Err(panic_error("execute", &*panic)),
        };
        let latency = started.elapsed();
        debug!(skill_id = %id, latency_ms = latency.as_millis(), "Executed skill");

        Ok(ExecutionOutput {
            skill_id: id.to_string(),
            result,
            latency,
        })
    }

    /// Load every skill directory under `<skills_dir>/<kind>`, in name order.
    ///
    /// Failures are collected; they never stop the sweep.
    pub async fn load_all(&mut self, kind: SkillKind) -> LoadSummary {
        let dir = self.skills_dir.join(kind.dir_name());
        let mut summary = LoadSummary::default();

        let Ok(read_dir) = std::fs::read_dir(&dir) else {
            debug!(dir = %dir.display(), "Skill directory does not exist, nothing to load");
            return summary;
        };
        let mut candidates: Vec<PathBuf> = read_dir
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.join(MANIFEST_FILE_NAME).is_file())
            .collect();
        candidates.sort();

        for path in candidates {
            match self.load(&path).await {
                Ok(id) => summary.loaded.push(id),
                Err(e) => summary.failed.push((path, e.to_string())),
            }
        }

        info!(
            kind = %kind,
            loaded = summary.loaded.len(),
            failed = summary.failed.len(),
            "Batch load finished"
        );
        summary
    }

    /// Run every loaded skill's health check.
    ///
    /// Each check is isolated: an error or panic in one skill is reported
    /// for that skill only.
    pub async fn health_check_all(&self) -> BTreeMap<String, SkillHealth> {
        let mut results = BTreeMap::new();
        for (id, skill) in &self.skills {
            let health = match (&skill.instance, skill.status) {
                (Some(instance), LoadStatus::Loaded) => {
                    match AssertUnwindSafe(instance.health_check())
                        .catch_unwind()
                        .await
                    {
                        Ok(Ok(report)) => SkillHealth {
                            status: report.status,
                            message: None,
                            details: report.details,
                        },
                        Ok(Err(e)) => SkillHealth {
                            status: "error".to_string(),
                            message: Some(e.to_string()),
                            details: None,
                        },
                        Err(panic) => SkillHealth {
                            status: "error".to_string(),
                            message: Some(panic_error("health_check", &*panic).to_string()),
                            details: None,
                        },
                    }
                },
                _ => SkillHealth {
                    status: "skipped".to_string(),
                    message: Some(skill.status.to_string()),
                    details: None,
                },
            };
            results.insert(id.clone(), health);
        }
        results
    }

    /// Look up a tracked skill.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&LoadedSkill> {
        self.skills.get(id)
    }

    /// Status of a tracked skill.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<LoadStatus> {
        self.skills.get(id).map(|s| s.status)
    }

    /// Whether the skill is tracked and `Loaded`.
    #[must_use]
    pub fn is_loaded(&self, id: &str) -> bool {
        self.status(id) == Some(LoadStatus::Loaded)
    }

    /// Number of skills in `Loaded` status.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.skills
            .values()
            .filter(|s| s.status == LoadStatus::Loaded)
            .count()
    }

    /// Forget an `Error` record without touching a loaded skill.
    pub fn clear_error(&mut self, id: &str) -> bool {
        if self.status(id) == Some(LoadStatus::Error) {
            self.skills.remove(id);
            return true;
        }
        false
    }

    /// Summaries of every tracked skill, sorted by ID.
    #[must_use]
    pub fn list(&self) -> Vec<SkillSummary> {
        self.skills
            .values()
            .map(|s| SkillSummary {
                id: s.id.clone(),
                name: s.manifest.as_ref().map(|m| m.name.clone()),
                version: s.manifest.as_ref().map(|m| m.version.clone()),
                status: s.status,
                loaded_at: s.loaded_at,
                path: s.path.clone(),
                error: s.error.clone(),
            })
            .collect()
    }

    /// Loaded skills with their parameter schemas.
    #[must_use]
    pub fn executable(&self) -> Vec<ExecutableSkill> {
        self.skills
            .values()
            .filter(|s| s.status == LoadStatus::Loaded)
            .filter_map(|s| s.manifest.as_ref())
            .map(|m| ExecutableSkill {
                id: m.id.clone(),
                name: m.name.clone(),
                description: m.description.clone(),
                parameters: m.parameters.clone(),
            })
            .collect()
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

fn panic_error(hook: &str, panic: &(dyn Any + Send)) -> SkillError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    SkillError::Execution(format!("skill panicked in {hook}: {message}"))
}
