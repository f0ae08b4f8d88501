//! Data directory resolution.
//!
//! Priority: CLI `--data-dir` > `PARLEY_DATA_DIR` env > `~/.parley`.

use std::io;
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "PARLEY_DATA_DIR";
const DEFAULT_DIR_NAME: &str = ".parley";

/// Resolve the data directory for this run.
pub fn resolve_data_dir(explicit: Option<&Path>) -> PathBuf {
    resolve_with(explicit, std::env::var(DATA_DIR_ENV).ok(), dirs::home_dir())
}

fn resolve_with(explicit: Option<&Path>, env_val: Option<String>, home: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(value) = env_val.filter(|v| !v.trim().is_empty()) {
        return PathBuf::from(value);
    }
    home.unwrap_or_else(std::env::temp_dir)
        .join(DEFAULT_DIR_NAME)
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Create the data dir and its subdirectories.
pub fn ensure_dirs(data_dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(log_dir(data_dir))
}
