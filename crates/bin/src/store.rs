//! Location of the default store.

use accrete_data::{DataError, SqliteStore};
use std::path::{Path, PathBuf};

/// Get the default cache directory path.
///
/// Uses platform-specific cache directories:
/// - Linux: `~/.cache/accrete/`
/// - macOS: `~/Library/Caches/accrete/`
/// - Windows: `%LOCALAPPDATA%\accrete\cache\`
pub(crate) fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("accrete")
}

/// Get the default database path.
pub(crate) fn default_db_path() -> PathBuf {
    default_cache_dir().join("accrete.db")
}

/// Open the store at `path` (default location when `None`), creating the directory if
/// needed.
pub(crate) fn open_store(path: Option<&Path>) -> Result<SqliteStore, DataError> {
    let path = path.map_or_else(default_db_path, Path::to_path_buf);

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    SqliteStore::new(&path)
}
