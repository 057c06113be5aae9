//! Config-folder resolution and the process-stop marker protocol.

use std::path::{Path, PathBuf};

use crate::errors::CoreError;

/// `$DOCSYNC_CONFIG_DIR` overrides the platform default, matching the
/// override the CLI's logging setup also honors.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DOCSYNC_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docsync")
}

pub fn default_sync_folder() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("DocSync")
}

/// Writes an empty `stop_<pid>` marker file in the config folder. A
/// separately-running sync worker polls for this file to know when to shut
/// down — the controller itself does not run a worker loop.
pub fn write_stop_marker(config_folder: &Path, pid: u32) -> Result<(), CoreError> {
    std::fs::create_dir_all(config_folder)?;
    std::fs::write(config_folder.join(format!("stop_{pid}")), b"")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stop_marker_is_created() {
        let dir = tempdir().unwrap();
        write_stop_marker(dir.path(), 1234).unwrap();
        assert!(dir.path().join("stop_1234").exists());
    }
}
