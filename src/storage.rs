//! Atomic JSON file persistence shared by the cache and checkpoint stores.
//!
//! Files are written to a temporary sibling and renamed over the target, so a
//! concurrent reader sees either the previous complete file or the new one.

use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;

/// Serializes `value` as pretty JSON and atomically replaces `path`.
///
/// Parent directories are created when missing.
///
/// # Errors
///
/// Returns an IO error if the temporary file cannot be created, written,
/// synced, or renamed into place.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value).map_err(io::Error::other)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
