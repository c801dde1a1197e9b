//! Atomic file operations.
//!
//! Checkpoints and downloaded binaries are both written through
//! [`atomic_write`]: write to a sibling temporary path, sync to disk, then
//! rename into place. A process killed mid-write leaves the previous file
//! (or no file) behind, never a truncated one.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Sibling temporary path used while writing `path`.
#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write content to a file atomically.
///
/// This function:
/// 1. Writes content to `<name>.tmp` next to the target
/// 2. Calls `fsync` to ensure data is on disk
/// 3. Atomically renames the temp file to the target path
///
/// If any step fails, the original file (if any) remains untouched.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let temp = temp_path(path);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    {
        let file = File::create(&temp)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&temp, path)?;

    Ok(())
}

/// Remove a file, treating "already gone" as success.
///
/// Returns whether a file was actually removed.
///
/// # Errors
///
/// Returns any error other than `NotFound`.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove a directory tree, treating "already gone" as success.
///
/// # Errors
///
/// Returns any error other than `NotFound`.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
