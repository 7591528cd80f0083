//! Blocking tree-mirroring over a `RemoteFs` session.
//!
//! Remote directories are addressed relative to the mirrored root with the
//! root itself spelled `.`, so a subdirectory reads `./Backup/old`. Blacklist
//! entries are plain substrings of that relative path, so `/Backup` excludes
//! `./Backup` and everything below it, and also `./World/Backups`. Empty
//! entries are ignored.

use serde::Serialize;
use std::fs::File;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use super::progress::TransferProgress;
use super::{RemoteEntry, RemoteFs, TransferError};
use crate::utils::fs::directory_size;
use crate::utils::units::format_percent;

pub const ROOT: &str = ".";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub files: u64,
    pub bytes: u64,
}

/// One non-blacklisted directory of the remote tree with its files.
#[derive(Debug, Clone)]
pub struct WalkedDir {
    pub rel: String,
    pub files: Vec<RemoteEntry>,
}

pub fn is_blacklisted(rel_dir: &str, blacklist: &[String]) -> bool {
    blacklist
        .iter()
        .any(|entry| !entry.is_empty() && rel_dir.contains(entry.as_str()))
}

/// Absolute remote path of `rel` under `root`.
pub fn remote_path(root: &str, rel: &str) -> String {
    let tail = if rel == ROOT {
        ""
    } else {
        rel.strip_prefix("./").unwrap_or(rel)
    };
    let tail = tail.trim_start_matches('/');
    match (root.trim_end_matches('/'), tail) {
        ("", "") if root.starts_with('/') => "/".to_string(),
        ("", "") => ROOT.to_string(),
        ("", tail) if root.starts_with('/') => format!("/{}", tail),
        ("", tail) => format!("{}/{}", ROOT, tail),
        (base, "") => base.to_string(),
        (base, tail) => format!("{}/{}", base, tail),
    }
}

fn log_file(path: &str, progress: &TransferProgress) {
    if let Some(pct) = progress.percentage() {
        debug!("{} {} ({})", progress.direction(), path, format_percent(pct));
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> TransferError {
    let path = path.display().to_string();
    move |source| TransferError::Io { path, source }
}

fn child(rel: &str, name: &str) -> String {
    format!("{}/{}", rel, name)
}

/// Top-down walk. Blacklisted directories are neither listed nor descended into.
pub fn walk(
    remote: &mut dyn RemoteFs,
    root: &str,
    blacklist: &[String],
) -> Result<Vec<WalkedDir>, TransferError> {
    let mut out = Vec::new();
    let mut pending = vec![ROOT.to_string()];

    while let Some(rel) = pending.pop() {
        if is_blacklisted(&rel, blacklist) {
            continue;
        }
        let entries = remote.list(&remote_path(root, &rel))?;
        let (dirs, files): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.is_dir);
        // Reversed so the stack pops them in listing order.
        for dir in dirs.iter().rev() {
            pending.push(child(&rel, &dir.name));
        }
        out.push(WalkedDir { rel, files });
    }

    Ok(out)
}

pub fn folder_size(
    remote: &mut dyn RemoteFs,
    root: &str,
    blacklist: &[String],
) -> Result<u64, TransferError> {
    Ok(total_of(&walk(remote, root, blacklist)?))
}

fn total_of(tree: &[WalkedDir]) -> u64 {
    tree.iter()
        .flat_map(|d| d.files.iter())
        .map(|f| f.size)
        .sum()
}

fn local_dir(local_root: &Path, rel: &str) -> std::path::PathBuf {
    rel.split('/')
        .filter(|part| !part.is_empty() && *part != ROOT)
        .fold(local_root.to_path_buf(), |acc, part| acc.join(part))
}

/// Mirrors `root` into `local_root`. Partial files stay behind on failure.
pub fn download_folder(
    remote: &mut dyn RemoteFs,
    root: &str,
    local_root: &Path,
    blacklist: &[String],
    progress: &TransferProgress,
) -> Result<TransferSummary, TransferError> {
    std::fs::create_dir_all(local_root).map_err(io_error(local_root))?;

    let tree = walk(remote, root, blacklist)?;
    progress.set_total(total_of(&tree));

    let mut summary = TransferSummary::default();
    for dir in &tree {
        let target_dir = local_dir(local_root, &dir.rel);
        std::fs::create_dir_all(&target_dir).map_err(io_error(&target_dir))?;

        for file in &dir.files {
            let target = target_dir.join(&file.name);
            let mut sink = File::create(&target).map_err(io_error(&target))?;
            let source = remote_path(root, &child(&dir.rel, &file.name));
            summary.bytes += remote.download(&source, &mut sink, &mut |n| progress.add(n))?;
            summary.files += 1;
            log_file(&source, progress);
        }
    }

    Ok(summary)
}

/// Mirrors `local_root` onto `root`. Existing remote directories are reused.
///
/// One preorder pass, sorted by name, so every directory exists remotely
/// before its files arrive. Symlinks are not followed or uploaded.
pub fn upload_folder(
    remote: &mut dyn RemoteFs,
    local_root: &Path,
    root: &str,
    progress: &TransferProgress,
) -> Result<TransferSummary, TransferError> {
    progress.set_total(directory_size(local_root));

    let mut summary = TransferSummary::default();
    make_remote_dir(remote, root)?;

    for entry in WalkDir::new(local_root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| walk_error(local_root, e))?;
        let path = entry.path();
        let target = remote_path(root, &relative(local_root, path));

        if entry.file_type().is_dir() {
            make_remote_dir(remote, &target)?;
        } else if entry.file_type().is_file() {
            let mut source = File::open(path).map_err(io_error(path))?;
            summary.bytes += remote.upload(&target, &mut source, &mut |n| progress.add(n))?;
            summary.files += 1;
            log_file(&target, progress);
        }
    }

    Ok(summary)
}

fn make_remote_dir(remote: &mut dyn RemoteFs, path: &str) -> Result<(), TransferError> {
    match remote.mkdir(path) {
        Ok(()) | Err(TransferError::Rejected { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

/// `/`-joined path of `path` below `base`, whatever the platform separator.
fn relative(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn walk_error(local_root: &Path, err: walkdir::Error) -> TransferError {
    let path = err.path().unwrap_or(local_root).display().to_string();
    TransferError::Io {
        path,
        source: err.into(),
    }
}
