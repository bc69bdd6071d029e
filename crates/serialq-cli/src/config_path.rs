use std::path::{Path, PathBuf};

use serialq_core::config::CONFIG_FILE;

/// Resolve which queue config file to use.
///
/// Priority:
/// 1. `--config` flag / `SERIALQ_CONFIG` env var (passed in as `explicit`)
/// 2. Walk upward from `start` looking for `serialq.yaml`
/// 3. `None`: run with built-in defaults
pub fn resolve_config(explicit: Option<&Path>, start: &Path) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}
