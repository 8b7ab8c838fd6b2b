//! Atomic file writes: temp file + rename so readers never observe partial data.
//!
//! Generalized from a text-only helper to raw bytes, keyed by an arbitrary
//! namespaced string rather than a fixed filename.

use std::path::Path;

use crate::StoreError;

pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .map_err(|source| StoreError::Io { path: parent_dir.to_path_buf(), source })?;

    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("pdm-store"),
        std::process::id(),
        current_unix_timestamp_ms(),
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content)
        .map_err(|source| StoreError::Io { path: temp_path.clone(), source })?;
    std::fs::rename(&temp_path, path)
        .map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;
    Ok(())
}

fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
