use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::utils::fs::directory_size;

pub const THUMBNAIL_FILE: &str = "thumb.jpg";

/// A downloaded copy of the remote save directory.
///
/// Lives in `<backups_dir>/<id>/<name>/`, where `id` is the Unix timestamp
/// at which the download started and `name` is the save directory mirrored
/// from the server.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BackupRecord {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub path: PathBuf,
    pub thumbnail: PathBuf,
}

#[derive(Debug, Error)]
pub enum BackupLoadError {
    #[error("directory name {0:?} is not a Unix timestamp")]
    InvalidName(String),
    #[error("no save directory inside backup")]
    NoSaveDirectory,
    #[error("thumbnail {} is missing", .0.display())]
    MissingThumbnail(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BackupRecord {
    pub fn load(root: &Path, id: &str) -> Result<Self, BackupLoadError> {
        let created_at =
            parse_backup_id(id).ok_or_else(|| BackupLoadError::InvalidName(id.to_string()))?;
        let path = root.join(id);

        let mut subdirs: Vec<String> = std::fs::read_dir(&path)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        subdirs.sort();
        let name = subdirs
            .into_iter()
            .next()
            .ok_or(BackupLoadError::NoSaveDirectory)?;

        let thumbnail = path.join(&name).join(THUMBNAIL_FILE);
        if !thumbnail.is_file() {
            return Err(BackupLoadError::MissingThumbnail(thumbnail));
        }

        Ok(Self {
            id: id.to_string(),
            name,
            created_at,
            size_bytes: directory_size(&path),
            path,
            thumbnail,
        })
    }
}

/// Directory name for a backup started at `at`, e.g. `1612345678.123456`.
pub fn backup_id(at: DateTime<Utc>) -> String {
    format!("{}.{:06}", at.timestamp(), at.timestamp_subsec_micros())
}

pub fn parse_backup_id(id: &str) -> Option<DateTime<Utc>> {
    let (whole, frac) = id.trim().split_once('.').unwrap_or((id.trim(), ""));
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs: i64 = whole.parse().ok()?;
    // Pad or cut the fraction to nanoseconds; parsing through f64 would lose digits.
    let nanos: u32 = format!("{:0<9}", &frac[..frac.len().min(9)]).parse().ok()?;
    DateTime::from_timestamp(secs, nanos)
}

/// Result of scanning the backup root.
#[derive(Debug, Default)]
pub struct Enumeration {
    pub records: Vec<BackupRecord>,
    pub failures: Vec<(String, BackupLoadError)>,
}

/// Loads every backup directory under `root`. Bad entries are collected, not fatal.
pub fn enumerate(root: &Path) -> std::io::Result<Enumeration> {
    let mut out = Enumeration::default();

    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().to_string();
        match BackupRecord::load(root, &id) {
            Ok(record) => out.records.push(record),
            Err(e) => out.failures.push((id, e)),
        }
    }

    out.records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_backup(root: &Path, id: &str, with_thumb: bool) {
        let save = root.join(id).join("World");
        std::fs::create_dir_all(save.join("Storage")).unwrap();
        std::fs::write(save.join("Sandbox.sbc"), vec![0u8; 100]).unwrap();
        std::fs::write(save.join("Storage").join("grid.bin"), vec![0u8; 24]).unwrap();
        if with_thumb {
            std::fs::write(save.join(THUMBNAIL_FILE), vec![0u8; 6]).unwrap();
        }
    }

    #[test]
    fn id_round_trips_through_timestamp() {
        let at = DateTime::from_timestamp(1_612_345_678, 123_456_000).unwrap();
        let id = backup_id(at);
        assert_eq!(id, "1612345678.123456");
        assert_eq!(parse_backup_id(&id), Some(at));
        assert!(parse_backup_id("1612345678").is_some());
        assert!(parse_backup_id("World").is_none());
        assert!(parse_backup_id("-5").is_none());
    }

    #[test]
    fn load_reads_name_size_and_thumbnail() {
        let dir = tempdir().unwrap();
        make_backup(dir.path(), "1612345678.5", true);

        let record = BackupRecord::load(dir.path(), "1612345678.5").unwrap();

        assert_eq!(record.name, "World");
        assert_eq!(record.size_bytes, 130);
        assert_eq!(record.created_at.timestamp(), 1_612_345_678);
        assert!(record.thumbnail.ends_with("World/thumb.jpg"));
    }

    #[test]
    fn enumeration_skips_invalid_backups() {
        let dir = tempdir().unwrap();
        make_backup(dir.path(), "1600000000", true);
        make_backup(dir.path(), "1600000100", true);
        make_backup(dir.path(), "1600000200", true);
        make_backup(dir.path(), "1600000300", false);
        make_backup(dir.path(), "not-a-time", true);
        std::fs::create_dir_all(dir.path().join("1600000400")).unwrap();
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();

        let found = enumerate(dir.path()).unwrap();

        assert_eq!(found.records.len(), 3);
        assert_eq!(found.records[0].id, "1600000200");
        assert_eq!(found.failures.len(), 3);
        assert!(found
            .failures
            .iter()
            .any(|(id, e)| id == "1600000300"
                && matches!(e, BackupLoadError::MissingThumbnail(_))));
        assert!(found
            .failures
            .iter()
            .any(|(id, e)| id == "not-a-time" && matches!(e, BackupLoadError::InvalidName(_))));
        assert!(found
            .failures
            .iter()
            .any(|(id, e)| id == "1600000400" && matches!(e, BackupLoadError::NoSaveDirectory)));
    }
}
