//! Durable skill registry.
//!
//! The registry is the catalog of installed skills, independent of whether
//! they are currently loaded. It is persisted as a pretty-printed JSON array
//! and rewritten in full on every mutation. Writes go through a temp file in
//! the same directory that is fsynced and atomically renamed into place,
//! under an advisory lock on a `.lk` sibling.
//!
//! A registry file that cannot be parsed is moved aside to
//! `<name>.corrupt-<timestamp>` and the registry starts empty, so the next
//! write does not silently destroy it.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SkillError, SkillResult};
use crate::manifest::SkillManifest;
use crate::skill::SkillKind;
use crate::version::Version;

/// Default number of search results.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Category assigned when no keyword matches.
pub const DEFAULT_CATEGORY: &str = "general";

/// Keyword patterns per category, checked in order.
const CATEGORY_PATTERNS: &[(&str, &[&str])] = &[
    (
        "development",
        &["git", "docker", "code", "database", "devops", "programming"],
    ),
    (
        "productivity",
        &["calendar", "mail", "note", "todo", "task", "reminder"],
    ),
    (
        "data",
        &["excel", "csv", "pdf", "database", "analytics", "chart"],
    ),
    (
        "communication",
        &["slack", "discord", "telegram", "teams", "wechat", "imessage"],
    ),
    (
        "ai",
        &["openai", "anthropic", "llm", "ml", "nlp", "embedding"],
    ),
    (
        "lifestyle",
        &["weather", "news", "translation", "travel", "food", "music"],
    ),
    (
        "finance",
        &["stock", "crypto", "market", "trading", "bitcoin", "finance"],
    ),
    (
        "system",
        &["file", "shell", "command", "system", "process", "network"],
    ),
];

/// Infer a category from manifest keywords.
///
/// The keywords are joined and lower-cased; the first category with a
/// pattern contained in that string wins.
#[must_use]
pub fn infer_category(keywords: &[String]) -> &'static str {
    let haystack = keywords.join(" ").to_lowercase();
    if haystack.is_empty() {
        return DEFAULT_CATEGORY;
    }
    CATEGORY_PATTERNS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| haystack.contains(p)))
        .map_or(DEFAULT_CATEGORY, |(category, _)| *category)
}

/// A persisted registry record: the manifest plus install metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    /// The manifest as installed.
    #[serde(flatten)]
    pub manifest: SkillManifest,
    /// Install directory.
    pub path: PathBuf,
    /// Install category.
    #[serde(default)]
    pub kind: SkillKind,
    /// Source identifier the skill was installed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Inferred category.
    pub category: String,
    /// Manifest checksum (`blake3:<hex>`).
    pub checksum: String,
    /// Whether the skill counts as installed.
    #[serde(default = "default_true")]
    pub installed: bool,
    /// First registration time.
    pub installed_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Download counter.
    #[serde(default)]
    pub downloads: u64,
    /// User rating.
    #[serde(default)]
    pub rating: f64,
}

fn default_true() -> bool {
    true
}

impl RegistryEntry {
    /// Skill ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    /// Author, or `Unknown`.
    #[must_use]
    pub fn author(&self) -> &str {
        self.manifest.author.as_deref().unwrap_or("Unknown")
    }

    /// License, or `MIT`.
    #[must_use]
    pub fn license(&self) -> &str {
        self.manifest.license.as_deref().unwrap_or("MIT")
    }

    fn parsed_version(&self) -> Version {
        self.manifest
            .parsed_version()
            .unwrap_or(Version::new(0, 0, 0))
    }
}

/// Install metadata supplied to [`SkillRegistry::register`].
#[derive(Debug, Clone)]
pub struct RegisterOptions {
    /// Install directory.
    pub path: PathBuf,
    /// Install category.
    pub kind: SkillKind,
    /// Source identifier.
    pub source: Option<String>,
}

/// Sort key for [`SkillRegistry::list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    /// By display name.
    #[default]
    Name,
    /// By numeric version.
    Version,
    /// By download count.
    Downloads,
    /// By rating.
    Rating,
    /// By first install time.
    InstalledAt,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// Filter and ordering for [`SkillRegistry::list`].
#[derive(Debug, Clone)]
pub struct ListFilter {
    /// Keep only entries with this installed flag (`None` keeps all).
    pub installed: Option<bool>,
    /// Keep only this category.
    pub category: Option<String>,
    /// Sort key.
    pub sort_by: SortKey,
    /// Sort direction.
    pub order: SortOrder,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            installed: Some(true),
            category: None,
            sort_by: SortKey::default(),
            order: SortOrder::default(),
        }
    }
}

/// Options for [`SkillRegistry::search`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Keep only this category.
    pub category: Option<String>,
    /// Maximum number of results.
    pub limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            category: None,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

/// Export format for [`SkillRegistry::export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Pretty JSON array.
    Json,
    /// Human-readable Markdown.
    Markdown,
}

/// Problems found in one entry by [`SkillRegistry::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryIssue {
    /// Offending skill ID.
    pub id: String,
    /// Problem descriptions.
    pub problems: Vec<String>,
}

/// Durable catalog of installed skills.
#[derive(Debug)]
pub struct SkillRegistry {
    path: PathBuf,
    entries: BTreeMap<String, RegistryEntry>,
}

impl SkillRegistry {
    /// Open the registry stored at `path`.
    ///
    /// A missing file yields an empty registry. An unparsable file is
    /// quarantined and the registry starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or quarantined.
    pub fn open(path: impl Into<PathBuf>) -> SkillResult<Self> {
        let path = path.into();
        let entries = {
            let _lock_guard = acquire_lock_file(&path, LockMode::Shared)?;
            match std::fs::read_to_string(&path) {
                Ok(content) => parse_entries(&path, &content)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
                Err(e) => {
                    return Err(SkillError::Registry {
                        path,
                        message: format!("failed to read registry: {e}"),
                    });
                },
            }
        };

        debug!(path = %path.display(), entries = entries.len(), "Opened skill registry");
        Ok(Self { path, entries })
    }

    /// Path of the persisted registry file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register or overwrite a skill.
    ///
    /// Re-registering an ID keeps its first install time and usage stats.
    ///
    /// # Errors
    ///
    /// Returns [`SkillError::Validation`] for an invalid manifest, or a
    /// registry error if persisting fails (the in-memory state is unchanged).
    pub fn register(
        &mut self,
        manifest: &SkillManifest,
        opts: RegisterOptions,
    ) -> SkillResult<&RegistryEntry> {
        manifest.validate()?;

        let now = Utc::now();
        let previous = self.entries.get(&manifest.id);
        let entry = RegistryEntry {
            manifest: manifest.clone(),
            path: opts.path,
            kind: opts.kind,
            source: opts.source,
            category: infer_category(&manifest.keywords).to_string(),
            checksum: manifest.checksum(),
            installed: true,
            installed_at: previous.map_or(now, |p| p.installed_at),
            updated_at: now,
            downloads: previous.map_or(0, |p| p.downloads),
            rating: previous.map_or(0.0, |p| p.rating),
        };

        let id = manifest.id.clone();
        let mut next = self.entries.clone();
        next.insert(id.clone(), entry);
        self.commit(next)?;

        info!(skill_id = %id, version = %manifest.version, "Registered skill");
        self.entries
            .get(&id)
            .ok_or_else(|| SkillError::NotFound(id.clone()))
    }

    /// Remove a skill. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Returns a registry error if persisting fails.
    pub fn unregister(&mut self, id: &str) -> SkillResult<bool> {
        if !self.entries.contains_key(id) {
            return Ok(false);
        }
        let mut next = self.entries.clone();
        next.remove(id);
        self.commit(next)?;
        info!(skill_id = %id, "Unregistered skill");
        Ok(true)
    }

    /// Apply a mutation to an existing entry and persist it.
    ///
    /// The ID and checksum are recomputed from the mutated manifest's
    /// perspective: the ID may not change.
    ///
    /// # Errors
    ///
    /// Returns [`SkillError::NotFound`] if absent, [`SkillError::Validation`]
    /// if the mutation changed the ID, or a registry error if persisting fails.
    pub fn update<F>(&mut self, id: &str, mutate: F) -> SkillResult<&RegistryEntry>
    where
        F: FnOnce(&mut RegistryEntry),
    {
        let mut next = self.entries.clone();
        let entry = next
            .get_mut(id)
            .ok_or_else(|| SkillError::NotFound(id.to_string()))?;
        mutate(entry);
        if entry.manifest.id != id {
            return Err(SkillError::Validation(format!(
                "registry update may not change the skill id ({id} -> {})",
                entry.manifest.id
            )));
        }
        entry.checksum = entry.manifest.checksum();
        entry.category = infer_category(&entry.manifest.keywords).to_string();
        entry.updated_at = Utc::now();
        self.commit(next)?;

        self.entries
            .get(id)
            .ok_or_else(|| SkillError::NotFound(id.to_string()))
    }

    /// Re-insert a previously captured entry exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns a registry error if persisting fails.
    pub fn restore(&mut self, entry: RegistryEntry) -> SkillResult<()> {
        let id = entry.id().to_string();
        let mut next = self.entries.clone();
        next.insert(id.clone(), entry);
        self.commit(next)?;
        debug!(skill_id = %id, "Restored registry entry");
        Ok(())
    }

    /// Look up an entry.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&RegistryEntry> {
        self.entries.get(id)
    }

    /// Whether an entry exists.
    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries flagged installed.
    #[must_use]
    pub fn installed_count(&self) -> usize {
        self.entries.values().filter(|e| e.installed).count()
    }

    /// List entries with filtering and sorting.
    #[must_use]
    pub fn list(&self, filter: &ListFilter) -> Vec<&RegistryEntry> {
        let mut out: Vec<&RegistryEntry> = self
            .entries
            .values()
            .filter(|e| filter.installed.is_none_or(|flag| e.installed == flag))
            .filter(|e| {
                filter
                    .category
                    .as_deref()
                    .is_none_or(|c| e.category == c)
            })
            .collect();

        out.sort_by(|a, b| {
            let ord = match filter.sort_by {
                SortKey::Name => a.manifest.name.cmp(&b.manifest.name),
                SortKey::Version => a.parsed_version().cmp(&b.parsed_version()),
                SortKey::Downloads => a.downloads.cmp(&b.downloads),
                SortKey::Rating => a.rating.partial_cmp(&b.rating).unwrap_or(Ordering::Equal),
                SortKey::InstalledAt => a.installed_at.cmp(&b.installed_at),
            };
            match filter.order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            }
        });
        out
    }

    /// Search entries by relevance.
    ///
    /// Matching is a case-insensitive substring test over name, description,
    /// keywords and author. Scores: name +10, exact keyword +5,
    /// description +2, author +1.
    #[must_use]
    pub fn search(&self, query: &str, opts: &SearchOptions) -> Vec<&RegistryEntry> {
        let q = query.trim().to_lowercase();

        let mut scored: Vec<(u32, &RegistryEntry)> = self
            .entries
            .values()
            .filter(|e| opts.category.as_deref().is_none_or(|c| e.category == c))
            .filter_map(|e| {
                let score = relevance(e, &q);
                (score > 0).then_some((score, e))
            })
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa)
                .then_with(|| a.manifest.name.cmp(&b.manifest.name))
        });
        scored
            .into_iter()
            .take(opts.limit)
            .map(|(_, e)| e)
            .collect()
    }

    /// Distinct categories of current entries, sorted.
    #[must_use]
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> =
            self.entries.values().map(|e| e.category.clone()).collect();
        categories.sort();
        categories.dedup();
        categories
    }

    /// Entries in one category, sorted by ID.
    #[must_use]
    pub fn by_category(&self, category: &str) -> Vec<&RegistryEntry> {
        self.entries
            .values()
            .filter(|e| e.category == category)
            .collect()
    }

    /// Report entries with missing fields or missing install directories.
    #[must_use]
    pub fn validate(&self) -> Vec<RegistryIssue> {
        self.entries
            .values()
            .filter_map(|e| {
                let mut problems = Vec::new();
                if e.manifest.name.trim().is_empty() {
                    problems.push("missing name".to_string());
                }
                if e.manifest.version.trim().is_empty() {
                    problems.push("missing version".to_string());
                } else if e.manifest.parsed_version().is_err() {
                    problems.push(format!("invalid version '{}'", e.manifest.version));
                }
                if e.manifest.entry.trim().is_empty() {
                    problems.push("missing entry".to_string());
                }
                if !e.path.is_dir() {
                    problems.push(format!("install path missing: {}", e.path.display()));
                }
                (!problems.is_empty()).then(|| RegistryIssue {
                    id: e.id().to_string(),
                    problems,
                })
            })
            .collect()
    }

    /// Render installed entries.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if serialization fails.
    pub fn export(&self, format: ExportFormat) -> SkillResult<String> {
        let installed = self.list(&ListFilter::default());
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&installed)?),
            ExportFormat::Markdown => {
                let mut out = String::from("# Installed Skills\n");
                for e in installed {
                    let _ = write!(
                        out,
                        "\n## {} (`{}`)\n\n- Version: {}\n- Category: {}\n- Author: {}\n- License: {}\n",
                        e.manifest.name,
                        e.id(),
                        e.manifest.version,
                        e.category,
                        e.author(),
                        e.license(),
                    );
                    if let Some(desc) = &e.manifest.description {
                        let _ = write!(out, "\n{desc}\n");
                    }
                }
                Ok(out)
            },
        }
    }

    /// Swap in a new entry map after persisting it.
    fn commit(&mut self, next: BTreeMap<String, RegistryEntry>) -> SkillResult<()> {
        save_entries(&self.path, &next)?;
        self.entries = next;
        Ok(())
    }
}

fn relevance(entry: &RegistryEntry, q: &str) -> u32 {
    let m = &entry.manifest;
    let mut score = 0u32;
    if m.name.to_lowercase().contains(q) {
        score = score.saturating_add(10);
    }
    if m.keywords.iter().any(|k| k.to_lowercase() == q) {
        score = score.saturating_add(5);
    }
    if m
        .description
        .as_deref()
        .is_some_and(|d| d.to_lowercase().contains(q))
    {
        score = score.saturating_add(2);
    }
    if m
        .author
        .as_deref()
        .is_some_and(|a| a.to_lowercase().contains(q))
    {
        score = score.saturating_add(1);
    }
    // A partial keyword hit still makes the entry a match.
    if score == 0 && m.keywords.iter().any(|k| k.to_lowercase().contains(q)) {
        score = 1;
    }
    score
}

fn parse_entries(path: &Path, content: &str) -> SkillResult<BTreeMap<String, RegistryEntry>> {
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    match serde_json::from_str::<Vec<RegistryEntry>>(content) {
        Ok(list) => Ok(list
            .into_iter()
            .map(|e| (e.manifest.id.clone(), e))
            .collect()),
        Err(e) => {
            let quarantine = quarantine_path(path);
            std::fs::rename(path, &quarantine).map_err(|io| SkillError::Registry {
                path: path.to_path_buf(),
                message: format!("registry is corrupt ({e}) and could not be moved aside: {io}"),
            })?;
            warn!(
                path = %path.display(),
                moved_to = %quarantine.display(),
                error = %e,
                "Registry file is corrupt, starting with an empty registry"
            );
            Ok(BTreeMap::new())
        },
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let name = path
        .file_name()
        .map_or_else(|| "registry".into(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!("{name}.corrupt-{stamp}"))
}

fn save_entries(path: &Path, entries: &BTreeMap<String, RegistryEntry>) -> SkillResult<()> {
    let registry_err = |message: String| SkillError::Registry {
        path: path.to_path_buf(),
        message,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| registry_err(format!("failed to create parent directory: {e}")))?;
    }

    let _lock_guard = acquire_lock_file(path, LockMode::Exclusive)?;

    let list: Vec<&RegistryEntry> = entries.values().collect();
    let body = serde_json::to_string_pretty(&list)
        .map_err(|e| registry_err(format!("failed to serialize registry: {e}")))?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| registry_err(format!("failed to create temp file for atomic write: {e}")))?;
    tmp.write_all(body.as_bytes())
        .map_err(|e| registry_err(format!("failed to write temp registry: {e}")))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| registry_err(format!("failed to sync temp registry to disk: {e}")))?;
    tmp.persist(path)
        .map_err(|e| registry_err(format!("failed to atomically replace registry: {e}")))?;

    debug!(path = %path.display(), entries = entries.len(), "Saved skill registry");
    Ok(())
}

/// Whether to acquire a shared (read) or exclusive (write) lock.
#[derive(Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Acquire an advisory lock on a `.lk` sibling of the registry file.
///
/// Shared mode does not create the lock file; with no lock file there is
/// no writer to coordinate with.
fn acquire_lock_file(registry_path: &Path, mode: LockMode) -> SkillResult<Option<std::fs::File>> {
    let lock_path = registry_path.with_extension("lk");
    let lock_err = |message: String| SkillError::Registry {
        path: registry_path.to_path_buf(),
        message,
    };

    match mode {
        LockMode::Shared => match std::fs::OpenOptions::new().read(true).open(&lock_path) {
            Ok(lock_file) => {
                lock_file
                    .lock_shared()
                    .map_err(|e| lock_err(format!("failed to acquire shared file lock: {e}")))?;
                Ok(Some(lock_file))
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(lock_err(format!("failed to open lock file: {e}"))),
        },
        LockMode::Exclusive => {
            let lock_file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .read(true)
                .open(&lock_path)
                .map_err(|e| lock_err(format!("failed to open lock file: {e}")))?;
            lock_file
                .lock_exclusive()
                .map_err(|e| lock_err(format!("failed to acquire exclusive file lock: {e}")))?;
            Ok(Some(lock_file))
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn manifest(id: &str, name: &str, version: &str, keywords: &[&str]) -> SkillManifest {
        serde_json::from_value(json!({
            "id": id,
            "name": name,
            "version": version,
            "entry": "index.js",
            "main": "Main",
            "keywords": keywords,
        }))
        .unwrap()
    }

    fn opts(dir: &Path) -> RegisterOptions {
        RegisterOptions {
            path: dir.to_path_buf(),
            kind: SkillKind::Community,
            source: None,
        }
    }

    fn open_temp() -> (TempDir, SkillRegistry) {
        let dir = TempDir::new().unwrap();
        let reg = SkillRegistry::open(dir.path().join("registry.json")).unwrap();
        (dir, reg)
    }

    #[test]
    fn register_then_get_round_trips() {
        let (dir, mut reg) = open_temp();
        let m = manifest("weather", "Weather", "1.2.0", &["weather"]);
        reg.register(&m, opts(dir.path())).unwrap();

        let e = reg.get("weather").unwrap();
        assert_eq!(e.manifest.id, "weather");
        assert_eq!(e.manifest.name, "Weather");
        assert_eq!(e.manifest.version, "1.2.0");
        assert_eq!(e.category, "lifestyle");
        assert!(e.checksum.starts_with("blake3:"));
    }

    #[test]
    fn register_persists_and_reopens() {
        let (dir, mut reg) = open_temp();
        reg.register(&manifest("git-tools", "Git", "0.1.0", &["git"]), opts(dir.path()))
            .unwrap();

        let reopened = SkillRegistry::open(reg.path()).unwrap();
        let e = reopened.get("git-tools").unwrap();
        assert_eq!(e.category, "development");
        assert_eq!(e, reg.get("git-tools").unwrap());
    }

    #[test]
    fn register_rejects_missing_fields() {
        let (dir, mut reg) = open_temp();
        let mut m = manifest("x", "X", "1.0.0", &[]);
        m.main.clear();
        let err = reg.register(&m, opts(dir.path())).unwrap_err();
        assert!(matches!(err, SkillError::Validation(_)));
        assert!(reg.is_empty());
        assert!(!reg.path().exists());
    }

    #[test]
    fn re_register_overwrites_and_keeps_install_time() {
        let (dir, mut reg) = open_temp();
        reg.register(&manifest("a", "A", "1.0.0", &[]), opts(dir.path()))
            .unwrap();
        let first = reg.get("a").unwrap().installed_at;
        reg.register(&manifest("a", "A", "2.0.0", &[]), opts(dir.path()))
            .unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("a").unwrap().manifest.version, "2.0.0");
        assert_eq!(reg.get("a").unwrap().installed_at, first);
    }

    #[test]
    fn unregister_is_idempotent() {
        let (dir, mut reg) = open_temp();
        reg.register(&manifest("a", "A", "1.0.0", &[]), opts(dir.path()))
            .unwrap();
        assert!(reg.unregister("a").unwrap());
        assert!(!reg.unregister("a").unwrap());
        assert!(!reg.unregister("a").unwrap());
        assert!(SkillRegistry::open(reg.path()).unwrap().is_empty());
    }

    #[test]
    fn update_mutates_and_rejects_id_change() {
        let (dir, mut reg) = open_temp();
        reg.register(&manifest("a", "A", "1.0.0", &[]), opts(dir.path()))
            .unwrap();
        reg.update("a", |e| e.downloads = 7).unwrap();
        assert_eq!(reg.get("a").unwrap().downloads, 7);

        let err = reg.update("a", |e| e.manifest.id = "b".into()).unwrap_err();
        assert!(matches!(err, SkillError::Validation(_)));
        assert!(reg.has("a"));
        assert!(matches!(
            reg.update("zzz", |_| {}),
            Err(SkillError::NotFound(_))
        ));
    }

    #[test]
    fn restore_keeps_timestamps() {
        let (dir, mut reg) = open_temp();
        reg.register(&manifest("a", "A", "1.0.0", &[]), opts(dir.path()))
            .unwrap();
        let snapshot = reg.get("a").unwrap().clone();
        reg.unregister("a").unwrap();
        reg.restore(snapshot.clone()).unwrap();
        assert_eq!(reg.get("a").unwrap(), &snapshot);
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{ not json").unwrap();

        let reg = SkillRegistry::open(&path).unwrap();
        assert!(reg.is_empty());
        assert!(!path.exists());
        let moved: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .collect();
        assert_eq!(moved.len(), 1);
    }

    #[test]
    fn category_inference_order() {
        assert_eq!(infer_category(&["Docker".into()]), "development");
        // "database" appears under development and data; development wins.
        assert_eq!(infer_category(&["database".into()]), "development");
        assert_eq!(infer_category(&["csv".into()]), "data");
        assert_eq!(infer_category(&["bitcoin".into()]), "finance");
        assert_eq!(infer_category(&["misc".into()]), "general");
        assert_eq!(infer_category(&[]), "general");
    }

    #[test]
    fn search_ranks_by_relevance() {
        let (dir, mut reg) = open_temp();
        let mut by_desc = manifest("notes", "Notes", "1.0.0", &["note"]);
        by_desc.description = Some("keeps weather journals".into());
        reg.register(&by_desc, opts(dir.path())).unwrap();
        reg.register(
            &manifest("weather", "Weather", "1.0.0", &["weather"]),
            opts(dir.path()),
        )
        .unwrap();
        reg.register(&manifest("calc", "Calc", "1.0.0", &["math"]), opts(dir.path()))
            .unwrap();

        let hits = reg.search("weather", &SearchOptions::default());
        let ids: Vec<&str> = hits.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["weather", "notes"]);

        let limited = reg.search(
            "weather",
            &SearchOptions {
                limit: 1,
                ..SearchOptions::default()
            },
        );
        assert_eq!(limited.len(), 1);

        let filtered = reg.search(
            "weather",
            &SearchOptions {
                category: Some("productivity".into()),
                ..SearchOptions::default()
            },
        );
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id(), "notes");
    }

    #[test]
    fn list_sorts_and_filters() {
        let (dir, mut reg) = open_temp();
        reg.register(&manifest("b", "Beta", "1.10.0", &["git"]), opts(dir.path()))
            .unwrap();
        reg.register(&manifest("a", "Alpha", "1.9.0", &["csv"]), opts(dir.path()))
            .unwrap();

        let by_name: Vec<&str> = reg
            .list(&ListFilter::default())
            .iter()
            .map(|e| e.id())
            .collect();
        assert_eq!(by_name, vec!["a", "b"]);

        let by_version_desc: Vec<&str> = reg
            .list(&ListFilter {
                sort_by: SortKey::Version,
                order: SortOrder::Descending,
                ..ListFilter::default()
            })
            .iter()
            .map(|e| e.id())
            .collect();
        assert_eq!(by_version_desc, vec!["b", "a"]);

        let data_only = reg.list(&ListFilter {
            category: Some("data".into()),
            ..ListFilter::default()
        });
        assert_eq!(data_only.len(), 1);
        assert_eq!(reg.categories(), vec!["data", "development"]);
        assert_eq!(reg.by_category("development").len(), 1);
    }

    #[test]
    fn validate_reports_missing_install_dir() {
        let (dir, mut reg) = open_temp();
        reg.register(
            &manifest("a", "A", "1.0.0", &[]),
            RegisterOptions {
                path: dir.path().join("nope"),
                kind: SkillKind::Custom,
                source: None,
            },
        )
        .unwrap();
        let issues = reg.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, "a");
    }

    #[test]
    fn export_formats() {
        let (dir, mut reg) = open_temp();
        let mut m = manifest("a", "Alpha", "1.0.0", &[]);
        m.description = Some("First skill".into());
        reg.register(&m, opts(dir.path())).unwrap();

        let md = reg.export(ExportFormat::Markdown).unwrap();
        assert!(md.contains("## Alpha (`a`)"));
        assert!(md.contains("- Author: Unknown"));
        assert!(md.contains("- License: MIT"));
        assert!(md.contains("First skill"));

        let json: serde_json::Value =
            serde_json::from_str(&reg.export(ExportFormat::Json).unwrap()).unwrap();
        assert_eq!(json[0]["id"], "a");
        assert!(json[0].get("installedAt").is_some());
    }
}
