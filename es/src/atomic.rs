//! Write-to-temp-then-rename helpers shared by every file-backed record

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

/// Temp file path for `path`: a hidden sibling ending in `.tmp`
///
/// Unique per call, so concurrent writers of one path never share a temp file.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let suffix = Uuid::now_v7().simple().to_string();
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), &suffix[20..]))
}

/// Atomically replace `path` with `contents`
///
/// Readers observe either the previous file or the complete new one, never a
/// partial write. The temp file is removed on failure (best effort).
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    debug!(?path, len = contents.len(), "write_atomic: called");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path_for(path);
    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Remove `path`, treating absence as success
///
/// Returns true if this call removed the file.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Whether a directory entry name is a temp file or other hidden file
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}
