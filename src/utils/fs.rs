use std::path::Path;
use walkdir::WalkDir;

/// Total size of the regular files under `path`. Symlinks are not followed or counted.
pub fn directory_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
