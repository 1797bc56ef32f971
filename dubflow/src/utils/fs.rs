//! Filesystem helpers shared across modules.
//!
//! These helpers attach consistent error context (operation + path) to IO failures.

use std::path::Path;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure the parent directory of a file path exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    ensure_dir_all_with_op("creating directory", parent).await
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Write bytes to a file, creating its parent directory first.
pub async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent_dir(path).await?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| io_error("writing file", path, e))
}

/// Read a whole file into memory.
pub async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| io_error("reading file", path, e))
}

/// Copy a file, creating the destination's parent directory first.
pub async fn copy_file(from: &Path, to: &Path) -> Result<()> {
    ensure_parent_dir(to).await?;
    tokio::fs::copy(from, to)
        .await
        .map(|_| ())
        .map_err(|e| io_error("copying file", from, e))
}

/// Reduce an uploaded filename to a safe single path component.
///
/// Keeps ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `_`.
/// Leading dots are stripped so the result can never be `..` or a hidden file.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload.bin".to_string()
    } else {
        trimmed.to_string()
    }
}
