//! Skill source identifiers and fetching.
//!
//! Supported formats:
//! - `github:org/repo[/sub/path][@ref]`: GitHub tarball (or clone without
//!   the `http` feature)
//! - `git:https://host/path.git[@ref]`: `git clone --depth=1`
//! - `local:<path>`, or a bare absolute or `./` path: copied from disk
//! - `https://…/skill.tar.gz`: gzip tarball download
//!
//! A fetch writes into a staging directory owned by the caller and returns
//! the path of the skill root inside it.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{SkillError, SkillResult};
#[cfg(feature = "http")]
use crate::manifest::MANIFEST_FILE_NAME;
use crate::staging;

/// Maximum download size (100 MB).
pub const MAX_DOWNLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// Timeout for git clone operations (5 minutes).
pub const GIT_CLONE_TIMEOUT: Duration = Duration::from_secs(300);

/// Parsed source identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillSource {
    /// `github:org/repo[/sub/path][@ref]`.
    GitHub {
        /// Organization or user.
        owner: String,
        /// Repository name.
        repo: String,
        /// Directory within the repository holding the skill.
        subpath: Option<String>,
        /// Tag, branch or commit.
        git_ref: Option<String>,
    },
    /// `git:<https or ssh url>[@ref]`.
    Git {
        /// Repository URL.
        url: String,
        /// Tag, branch or commit.
        git_ref: Option<String>,
    },
    /// A directory on the local filesystem.
    Local(PathBuf),
    /// A gzip tarball served over HTTP(S).
    Archive {
        /// Download URL.
        url: String,
    },
}

impl SkillSource {
    /// Parse a source identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SkillError::InvalidSource`] for unknown schemes, blocked URL
    /// schemes, or GitHub components and refs that fail validation.
    pub fn parse(source: &str) -> SkillResult<Self> {
        let source = source.trim();
        if let Some(rest) = source.strip_prefix("github:") {
            return parse_github(rest);
        }
        if let Some(rest) = source.strip_prefix("git:") {
            let (url, git_ref) = split_ref(rest);
            validate_url_scheme(&url)?;
            if let Some(r) = &git_ref {
                validate_git_ref(r)?;
            }
            return Ok(Self::Git { url, git_ref });
        }
        if let Some(rest) = source.strip_prefix("local:") {
            if rest.is_empty() {
                return Err(SkillError::InvalidSource("empty local path".into()));
            }
            return Ok(Self::Local(PathBuf::from(rest)));
        }
        if let Some(rest) = source.strip_prefix("file://") {
            return Ok(Self::Local(PathBuf::from(rest)));
        }
        if source.starts_with("https://") || source.starts_with("http://") {
            return Ok(Self::Archive {
                url: source.to_string(),
            });
        }
        if source.starts_with('/') || source.starts_with("./") || source.starts_with("../") {
            return Ok(Self::Local(PathBuf::from(source)));
        }
        Err(SkillError::InvalidSource(format!(
            "'{source}'. Expected 'github:org/repo[@ref]', 'git:URL[@ref]', 'local:PATH' or an archive URL"
        )))
    }

    /// A skill ID derived from the source: the repository or directory
    /// name, lowercased, with other characters replaced by `-`.
    #[must_use]
    pub fn id_hint(&self) -> String {
        let raw = match self {
            Self::GitHub {
                repo,
                subpath: None,
                ..
            } => repo.clone(),
            Self::GitHub {
                subpath: Some(sub), ..
            } => last_segment(sub),
            Self::Git { url, .. } => last_segment(url),
            Self::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Self::Archive { url } => last_segment(url.split(['?', '#']).next().unwrap_or(url)),
        };
        let raw = raw
            .trim_end_matches(".git")
            .trim_end_matches(".tar.gz")
            .trim_end_matches(".tgz");
        let hint: String = raw
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let hint = hint.trim_matches('-');
        if hint.is_empty() {
            "skill".to_string()
        } else {
            hint.to_string()
        }
    }

    /// Whether fetching requires network access.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Local(_))
    }
}

impl fmt::Display for SkillSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitHub {
                owner,
                repo,
                subpath,
                git_ref,
            } => {
                write!(f, "github:{owner}/{repo}")?;
                if let Some(sub) = subpath {
                    write!(f, "/{sub}")?;
                }
                if let Some(r) = git_ref {
                    write!(f, "@{r}")?;
                }
                Ok(())
            },
            Self::Git { url, git_ref: None } => write!(f, "git:{url}"),
            Self::Git {
                url,
                git_ref: Some(r),
            } => write!(f, "git:{url}@{r}"),
            Self::Local(path) => write!(f, "local:{}", path.display()),
            Self::Archive { url } => f.write_str(url),
        }
    }
}

impl std::str::FromStr for SkillSource {
    type Err = SkillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn last_segment(s: &str) -> String {
    s.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn parse_github(rest: &str) -> SkillResult<SkillSource> {
    let (path, git_ref) = split_ref(rest);

    let mut parts = path.splitn(3, '/');
    let owner = parts.next().unwrap_or_default();
    let repo = parts.next().unwrap_or_default();
    if owner.is_empty() || repo.is_empty() {
        return Err(SkillError::InvalidSource(format!(
            "invalid GitHub specifier: '{rest}'. Expected 'org/repo[/path][@ref]'"
        )));
    }
    validate_github_component(owner, "org")?;
    validate_github_component(repo, "repo")?;

    let subpath = match parts.next().map(|s| s.trim_matches('/')) {
        Some("") | None => None,
        Some(sub) => {
            validate_subpath(sub)?;
            Some(sub.to_string())
        },
    };

    if let Some(r) = &git_ref {
        validate_git_ref(r)?;
    }

    Ok(SkillSource::GitHub {
        owner: owner.to_string(),
        repo: repo.to_string(),
        subpath,
        git_ref,
    })
}

/// Split `value@ref`. For URLs only the path portion is searched so the `@`
/// in `ssh://git@host/…` is not taken as a ref.
fn split_ref(s: &str) -> (String, Option<String>) {
    let search_from = match s.find("://") {
        Some(scheme_end) => {
            let authority_start = scheme_end.saturating_add(3);
            let path_start = s[authority_start..]
                .find('/')
                .map_or(s.len(), |p| authority_start.saturating_add(p));
            s[path_start..]
                .rfind('@')
                .map(|at| path_start.saturating_add(at))
        },
        None => s.find('@'),
    };

    match search_from {
        Some(at) if at.saturating_add(1) < s.len() => {
            (s[..at].to_string(), Some(s[at.saturating_add(1)..].to_string()))
        },
        _ => (s.to_string(), None),
    }
}

fn validate_url_scheme(url: &str) -> SkillResult<()> {
    if ["https://", "ssh://"].iter().any(|s| url.starts_with(s)) {
        return Ok(());
    }
    Err(SkillError::InvalidSource(format!(
        "blocked URL scheme in '{url}'. Only https:// and ssh:// are allowed"
    )))
}

fn validate_github_component(value: &str, label: &str) -> SkillResult<()> {
    if value.is_empty() || value.len() > 100 {
        return Err(SkillError::InvalidSource(format!(
            "GitHub {label} must be 1-100 characters, got {}",
            value.len()
        )));
    }
    let charset_ok = value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if !charset_ok {
        return Err(SkillError::InvalidSource(format!(
            "GitHub {label} contains invalid characters: '{value}'"
        )));
    }
    if value.starts_with(['.', '-']) || value.ends_with('.') || value.contains("..") {
        return Err(SkillError::InvalidSource(format!(
            "GitHub {label} has invalid format: '{value}'"
        )));
    }
    Ok(())
}

fn validate_subpath(sub: &str) -> SkillResult<()> {
    let ok = Path::new(sub)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
        && sub
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'/'));
    if ok {
        Ok(())
    } else {
        Err(SkillError::InvalidSource(format!(
            "invalid repository subpath: '{sub}'"
        )))
    }
}

/// Rejects `..`, leading `-`, shell metacharacters and refs git itself
/// would refuse.
fn validate_git_ref(git_ref: &str) -> SkillResult<()> {
    if git_ref.is_empty() || git_ref.len() > 256 {
        return Err(SkillError::InvalidSource(
            "git ref must be 1-256 characters".into(),
        ));
    }
    if git_ref.contains("..") || git_ref.starts_with('-') {
        return Err(SkillError::InvalidSource(format!(
            "git ref has invalid format: '{git_ref}'"
        )));
    }
    let charset_ok = git_ref
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'/'));
    if !charset_ok {
        return Err(SkillError::InvalidSource(format!(
            "git ref contains invalid characters: '{git_ref}'"
        )));
    }
    if git_ref.starts_with(['.', '/'])
        || git_ref.ends_with(['.', '/'])
        || git_ref.contains("//")
        || Path::new(git_ref)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("lock"))
    {
        return Err(SkillError::InvalidSource(format!(
            "git ref has invalid format: '{git_ref}'"
        )));
    }
    Ok(())
}

/// Fetches a [`SkillSource`] into a staging directory.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Materialize `source` inside `staging` (an empty directory owned by
    /// the caller) and return the skill root within it.
    async fn fetch(&self, source: &SkillSource, staging: &Path) -> SkillResult<PathBuf>;
}

/// Fetch strategies backed by `git`, HTTP and the local filesystem.
#[derive(Debug, Clone)]
pub struct DefaultFetcher {
    /// Budget for `git clone`.
    pub git_timeout: Duration,
    /// Download size cap.
    pub max_download_bytes: u64,
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self {
            git_timeout: GIT_CLONE_TIMEOUT,
            max_download_bytes: MAX_DOWNLOAD_SIZE,
        }
    }
}

#[async_trait]
impl SourceFetcher for DefaultFetcher {
    async fn fetch(&self, source: &SkillSource, staging: &Path) -> SkillResult<PathBuf> {
        debug!(source = %source, staging = %staging.display(), "Fetching skill source");
        match source {
            SkillSource::Local(path) => {
                let dest = staging.join("source");
                staging::copy_dir(path, &dest).await.map_err(|e| {
                    SkillError::Fetch(format!("cannot copy {}: {e}", path.display()))
                })?;
                Ok(dest)
            },
            SkillSource::GitHub {
                owner,
                repo,
                subpath,
                git_ref,
            } => {
                let root = self
                    .fetch_github(owner, repo, git_ref.as_deref(), staging)
                    .await?;
                match subpath {
                    Some(sub) => {
                        let dir = root.join(sub);
                        if dir.is_dir() {
                            Ok(dir)
                        } else {
                            Err(SkillError::Fetch(format!(
                                "path '{sub}' not found in {owner}/{repo}"
                            )))
                        }
                    },
                    None => Ok(root),
                }
            },
            SkillSource::Git { url, git_ref } => {
                clone_git_repo(url, git_ref.as_deref(), &staging.join("repo"), self.git_timeout)
                    .await
            },
            SkillSource::Archive { url } => self.fetch_archive(url, staging).await,
        }
    }
}

impl DefaultFetcher {
    #[cfg(feature = "http")]
    async fn fetch_github(
        &self,
        owner: &str,
        repo: &str,
        git_ref: Option<&str>,
        staging: &Path,
    ) -> SkillResult<PathBuf> {
        let ref_part = git_ref.unwrap_or("HEAD");
        let url = format!("https://api.github.com/repos/{owner}/{repo}/tarball/{ref_part}");
        let bytes = download(&url, self.max_download_bytes).await?;
        let dest = staging.join("repo");
        tokio::task::spawn_blocking(move || extract_tarball(&bytes, &dest, true))
            .await
            .map_err(|e| SkillError::Extraction {
                message: format!("extraction task failed: {e}"),
            })?
    }

    #[cfg(not(feature = "http"))]
    async fn fetch_github(
        &self,
        owner: &str,
        repo: &str,
        git_ref: Option<&str>,
        staging: &Path,
    ) -> SkillResult<PathBuf> {
        let url = format!("https://github.com/{owner}/{repo}.git");
        clone_git_repo(&url, git_ref, &staging.join("repo"), self.git_timeout).await
    }

    #[cfg(feature = "http")]
    async fn fetch_archive(&self, url: &str, staging: &Path) -> SkillResult<PathBuf> {
        let parsed = url::Url::parse(url)
            .map_err(|e| SkillError::InvalidSource(format!("invalid URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SkillError::InvalidSource(format!(
                "unsupported archive scheme: {}",
                parsed.scheme()
            )));
        }
        let bytes = download(parsed.as_str(), self.max_download_bytes).await?;
        let dest = staging.join("archive");
        let root = tokio::task::spawn_blocking(move || extract_tarball(&bytes, &dest, false))
            .await
            .map_err(|e| SkillError::Extraction {
                message: format!("extraction task failed: {e}"),
            })??;
        Ok(single_child_root(&root))
    }

    #[cfg(not(feature = "http"))]
    async fn fetch_archive(&self, url: &str, _staging: &Path) -> SkillResult<PathBuf> {
        Err(SkillError::Fetch(format!(
            "cannot download {url}: built without the `http` feature"
        )))
    }
}

/// Descend into a lone top-level directory that holds the manifest.
#[cfg(feature = "http")]
fn single_child_root(root: &Path) -> PathBuf {
    if root.join(MANIFEST_FILE_NAME).is_file() {
        return root.to_path_buf();
    }
    let children: Vec<PathBuf> = std::fs::read_dir(root)
        .map(|rd| rd.filter_map(Result::ok).map(|e| e.path()).collect())
        .unwrap_or_default();
    match children.as_slice() {
        [only] if only.join(MANIFEST_FILE_NAME).is_file() => only.clone(),
        _ => root.to_path_buf(),
    }
}

#[cfg(feature = "http")]
async fn download(url: &str, max_size: u64) -> SkillResult<Vec<u8>> {
    use futures::StreamExt;

    debug!(url = %url, "Downloading skill archive");
    let client = reqwest::Client::builder()
        .user_agent(concat!("skillbox/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| SkillError::Fetch(format!("failed to create HTTP client: {e}")))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SkillError::Fetch(format!("{url}: {e}")))?;
    if !response.status().is_success() {
        return Err(SkillError::Fetch(format!(
            "{url} returned {}",
            response.status()
        )));
    }
    if let Some(len) = response.content_length()
        && len > max_size
    {
        return Err(SkillError::PackageTooLarge {
            size: len,
            limit: max_size,
        });
    }

    let capacity =
        usize::try_from(response.content_length().unwrap_or(0).min(max_size)).unwrap_or(0);
    let mut bytes = Vec::with_capacity(capacity);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| SkillError::Fetch(format!("download error: {e}")))?;
        bytes.extend_from_slice(&chunk);
        let current = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        if current > max_size {
            return Err(SkillError::PackageTooLarge {
                size: current,
                limit: max_size,
            });
        }
    }
    Ok(bytes)
}

/// Extract a gzip tarball into `dest`, optionally stripping the first path
/// component (GitHub's `{org}-{repo}-{sha}/` prefix).
///
/// Rejects absolute paths, `..` components, links and device entries, and
/// caps entry count and total size.
#[cfg(feature = "http")]
pub fn extract_tarball(data: &[u8], dest: &Path, strip_first: bool) -> SkillResult<PathBuf> {
    const MAX_ENTRY_COUNT: usize = 10_000;
    const MAX_EXTRACTED_SIZE: u64 = 500_000_000;

    let extraction = |message: String| SkillError::Extraction { message };

    std::fs::create_dir_all(dest)?;
    let dest = dest
        .canonicalize()
        .map_err(|e| extraction(format!("failed to canonicalize destination: {e}")))?;

    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(data));
    archive.set_preserve_permissions(false);

    let mut entry_count = 0usize;
    let mut total_size: u64 = 0;

    for entry in archive
        .entries()
        .map_err(|e| extraction(format!("failed to read archive entries: {e}")))?
    {
        let mut entry = entry.map_err(|e| extraction(format!("failed to read entry: {e}")))?;

        entry_count = entry_count.saturating_add(1);
        if entry_count > MAX_ENTRY_COUNT {
            return Err(extraction(format!(
                "archive exceeds maximum entry count ({MAX_ENTRY_COUNT})"
            )));
        }

        let entry_type = entry.header().entry_type();
        if matches!(
            entry_type,
            tar::EntryType::XHeader | tar::EntryType::XGlobalHeader | tar::EntryType::GNULongName
        ) {
            continue;
        }
        let entry_path = entry
            .path()
            .map_err(|e| extraction(format!("failed to read entry path: {e}")))?
            .into_owned();
        if !matches!(entry_type, tar::EntryType::Regular | tar::EntryType::Directory) {
            return Err(extraction(format!(
                "unsupported entry type {entry_type:?} at {}",
                entry_path.display()
            )));
        }

        let size = entry
            .header()
            .size()
            .map_err(|e| extraction(format!("failed to read entry size: {e}")))?;
        total_size = total_size.saturating_add(size);
        if total_size > MAX_EXTRACTED_SIZE {
            return Err(extraction(format!(
                "archive exceeds maximum extracted size ({MAX_EXTRACTED_SIZE} bytes)"
            )));
        }

        if entry_path.is_absolute()
            || entry_path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(SkillError::PathTraversal {
                path: entry_path.display().to_string(),
            });
        }

        let relative = if strip_first {
            let mut components = entry_path.components();
            components.next();
            components.as_path().to_path_buf()
        } else {
            entry_path.clone()
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| extraction(format!("failed to create {}: {e}", parent.display())))?;
            let canonical_parent = parent
                .canonicalize()
                .map_err(|e| extraction(format!("failed to canonicalize {}: {e}", parent.display())))?;
            if !canonical_parent.starts_with(&dest) {
                return Err(SkillError::PathTraversal {
                    path: entry_path.display().to_string(),
                });
            }
        }

        entry
            .unpack(&target)
            .map_err(|e| extraction(format!("failed to unpack {}: {e}", entry_path.display())))?;
    }

    if entry_count == 0 {
        return Err(extraction("archive is empty".into()));
    }
    Ok(dest)
}

/// `git clone --depth=1` into `dest` with a scrubbed environment.
///
/// Interactive credential prompts are disabled and user git config is
/// ignored. The clone is killed if it exceeds `timeout`.
async fn clone_git_repo(
    url: &str,
    git_ref: Option<&str>,
    dest: &Path,
    timeout: Duration,
) -> SkillResult<PathBuf> {
    let mut cmd = tokio::process::Command::new("git");
    cmd.env_clear();
    for key in ["PATH", "HOME"] {
        if let Ok(value) = std::env::var(key) {
            cmd.env(key, value);
        }
    }
    cmd.env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_SSH_COMMAND", "ssh -o BatchMode=yes")
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .args(["clone", "--depth=1"]);
    if let Some(r) = git_ref {
        cmd.args(["--branch", r]);
    }
    cmd.arg("--").arg(url).arg(dest);

    debug!(url = %url, git_ref = ?git_ref, "Cloning skill repository");
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| SkillError::Fetch(format!("git clone timed out after {}s", timeout.as_secs())))?
        .map_err(|e| SkillError::Fetch(format!("failed to run git clone: {e}")))?;

    if !output.status.success() {
        return Err(SkillError::Fetch(format!(
            "git clone failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(dest.to_path_buf())
}
