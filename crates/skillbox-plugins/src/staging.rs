//! Staging directories, directory swaps and backup snapshots.
//!
//! The manager never writes into a live skill directory. A new version is
//! fetched into a staging directory, copied next to the target, and swapped
//! in with two renames. Until the swap is committed the previous directory
//! is kept aside and can be renamed back.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{SkillError, SkillResult};

/// Directory names never copied out of a fetched source.
const SKIPPED_DIRS: &[&str] = &[".git"];

/// Create an empty staging directory for `id` under `temp_root`.
///
/// Removed when the returned handle is dropped.
///
/// # Errors
///
/// Returns an IO error if the directory cannot be created.
pub fn staging_dir(temp_root: &Path, id: &str) -> SkillResult<TempDir> {
    std::fs::create_dir_all(temp_root)?;
    Ok(tempfile::Builder::new()
        .prefix(&format!("stage-{id}-"))
        .tempdir_in(temp_root)?)
}

/// Recursively copy `src` into `dest` on the blocking pool.
///
/// Returns the number of files copied.
///
/// # Errors
///
/// See [`copy_dir_blocking`].
pub async fn copy_dir(src: &Path, dest: &Path) -> SkillResult<u64> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || copy_dir_blocking(&src, &dest))
        .await
        .map_err(|e| SkillError::Execution(format!("copy task failed: {e}")))?
}

/// Recursively copy `src` into `dest`.
///
/// Symlinks are not followed and not copied. `.git` directories are
/// skipped.
///
/// # Errors
///
/// Returns an IO error if `src` is not a directory or any copy fails.
pub fn copy_dir_blocking(src: &Path, dest: &Path) -> SkillResult<u64> {
    if !src.is_dir() {
        return Err(SkillError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("not a directory: {}", src.display()),
        )));
    }
    std::fs::create_dir_all(dest)?;

    let mut copied: u64 = 0;
    let walker = WalkDir::new(src)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name()
                    .to_str()
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name)))
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            SkillError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            )
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| SkillError::Io(std::io::Error::other(e)))?;
        let target = dest.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied = copied.saturating_add(1);
        } else {
            debug!(path = %entry.path().display(), "Skipping non-regular file");
        }
    }
    Ok(copied)
}

/// Remove a directory tree if it exists.
///
/// # Errors
///
/// Returns an IO error for anything other than the path not existing.
pub async fn remove_dir_if_exists(path: &Path) -> SkillResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn sibling(target: &Path, tag: &str) -> PathBuf {
    let name = target
        .file_name()
        .map_or_else(|| "skill".into(), |n| n.to_string_lossy().into_owned());
    target.with_file_name(format!(".{name}.{tag}-{}", Uuid::new_v4().simple()))
}

/// A directory replacement that can still be undone.
///
/// Created by [`DirSwap::install`]. Call [`DirSwap::commit`] to discard the
/// previous directory or [`DirSwap::rollback`] to put it back. Dropping an
/// unfinished swap rolls it back.
#[derive(Debug)]
pub struct DirSwap {
    target: PathBuf,
    aside: Option<PathBuf>,
    finished: bool,
}

impl DirSwap {
    /// Replace `target` with a copy of `staged`.
    ///
    /// The copy is made next to the target first, so the live directory is
    /// only touched by the two final renames.
    ///
    /// # Errors
    ///
    /// Returns an IO error if copying or renaming fails. Nothing is left
    /// behind and the previous target is intact.
    pub async fn install(staged: &Path, target: &Path) -> SkillResult<Self> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let incoming = sibling(target, "incoming");
        if let Err(e) = copy_dir(staged, &incoming).await {
            let _ = remove_dir_if_exists(&incoming).await;
            return Err(e);
        }

        let aside = if tokio::fs::try_exists(target).await? {
            let aside = sibling(target, "previous");
            if let Err(e) = tokio::fs::rename(target, &aside).await {
                let _ = remove_dir_if_exists(&incoming).await;
                return Err(e.into());
            }
            Some(aside)
        } else {
            None
        };

        if let Err(e) = tokio::fs::rename(&incoming, target).await {
            let _ = remove_dir_if_exists(&incoming).await;
            if let Some(aside) = &aside {
                tokio::fs::rename(aside, target).await?;
            }
            return Err(e.into());
        }

        debug!(target = %target.display(), replaced = aside.is_some(), "Swapped skill directory");
        Ok(Self {
            target: target.to_path_buf(),
            aside,
            finished: false,
        })
    }

    /// The live directory.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Whether a previous directory was replaced.
    #[must_use]
    pub fn replaced_existing(&self) -> bool {
        self.aside.is_some()
    }

    /// Keep the new directory and delete the previous one.
    ///
    /// Failure to delete the previous copy is logged, not returned; the swap
    /// itself has already happened.
    pub async fn commit(mut self) {
        self.finished = true;
        if let Some(aside) = self.aside.take()
            && let Err(e) = remove_dir_if_exists(&aside).await
        {
            warn!(path = %aside.display(), error = %e, "Failed to remove replaced skill directory");
        }
    }

    /// Remove the new directory and restore the previous one, if any.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the restore fails.
    pub async fn rollback(mut self) -> SkillResult<()> {
        self.finished = true;
        remove_dir_if_exists(&self.target).await?;
        if let Some(aside) = self.aside.take() {
            tokio::fs::rename(&aside, &self.target).await?;
        }
        debug!(target = %self.target.display(), "Rolled back skill directory swap");
        Ok(())
    }
}

impl Drop for DirSwap {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(target = %self.target.display(), "Directory swap dropped without commit, rolling back");
        if let Err(e) = std::fs::remove_dir_all(&self.target)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(error = %e, "Failed to remove swapped-in directory");
            return;
        }
        if let Some(aside) = self.aside.take()
            && let Err(e) = std::fs::rename(&aside, &self.target)
        {
            warn!(path = %aside.display(), error = %e, "Failed to restore previous directory");
        }
    }
}

/// A copy of a skill directory taken before an update.
///
/// Lives under the manager's temp directory and is deleted on drop.
#[derive(Debug)]
pub struct Backup {
    dir: TempDir,
}

impl Backup {
    /// Snapshot `src` into a new directory under `temp_root`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the copy fails.
    pub async fn snapshot(src: &Path, temp_root: &Path, id: &str) -> SkillResult<Self> {
        tokio::fs::create_dir_all(temp_root).await?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("backup-{id}-"))
            .tempdir_in(temp_root)?;
        let files = copy_dir(src, dir.path()).await?;
        debug!(skill_id = %id, files, path = %dir.path().display(), "Backed up skill directory");
        Ok(Self { dir })
    }

    /// Where the snapshot lives.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Replace `target` with the snapshot contents.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the target cannot be cleared or the copy fails.
    pub async fn restore_to(&self, target: &Path) -> SkillResult<()> {
        remove_dir_if_exists(target).await?;
        copy_dir(self.dir.path(), target).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn copy_skips_git_and_keeps_nesting() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write(&src.join("skill.json"), "{}");
        write(&src.join("lib/util.js"), "x");
        write(&src.join(".git/HEAD"), "ref");

        let dest = tmp.path().join("dest");
        let copied = copy_dir_blocking(&src, &dest).unwrap();

        assert_eq!(copied, 2);
        assert!(dest.join("lib/util.js").is_file());
        assert!(!dest.join(".git").exists());
    }

    #[test]
    fn copy_missing_source_fails() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(copy_dir_blocking(&tmp.path().join("nope"), &tmp.path().join("d")).is_err());
    }

    #[tokio::test]
    async fn swap_commit_replaces_target() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("community/echo");
        write(&target.join("v"), "1");
        let staged = tmp.path().join("staged");
        write(&staged.join("v"), "2");

        let swap = DirSwap::install(&staged, &target).await.unwrap();
        assert!(swap.replaced_existing());
        swap.commit().await;

        assert_eq!(std::fs::read_to_string(target.join("v")).unwrap(), "2");
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("community"))
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn swap_rollback_restores_previous() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("echo");
        write(&target.join("v"), "1");
        let staged = tmp.path().join("staged");
        write(&staged.join("v"), "2");

        let swap = DirSwap::install(&staged, &target).await.unwrap();
        swap.rollback().await.unwrap();

        assert_eq!(std::fs::read_to_string(target.join("v")).unwrap(), "1");
    }

    #[tokio::test]
    async fn rollback_of_fresh_install_leaves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("echo");
        let staged = tmp.path().join("staged");
        write(&staged.join("v"), "2");

        let swap = DirSwap::install(&staged, &target).await.unwrap();
        assert!(!swap.replaced_existing());
        swap.rollback().await.unwrap();
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn dropped_swap_rolls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("echo");
        write(&target.join("v"), "1");
        let staged = tmp.path().join("staged");
        write(&staged.join("v"), "2");

        drop(DirSwap::install(&staged, &target).await.unwrap());
        assert_eq!(std::fs::read_to_string(target.join("v")).unwrap(), "1");
    }

    #[tokio::test]
    async fn backup_restores_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("echo");
        write(&target.join("v"), "1");

        let backup = Backup::snapshot(&target, &tmp.path().join("temp"), "echo")
            .await
            .unwrap();
        let snapshot = backup.path().to_path_buf();

        write(&target.join("v"), "broken");
        write(&target.join("extra"), "x");
        backup.restore_to(&target).await.unwrap();

        assert_eq!(std::fs::read_to_string(target.join("v")).unwrap(), "1");
        assert!(!target.join("extra").exists());
        drop(backup);
        assert!(!snapshot.exists());
    }
}
