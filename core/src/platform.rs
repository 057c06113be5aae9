//! Best-effort OS integration helpers. None of these are part of the sync
//! correctness contract — failures are logged and swallowed, matching the
//! original's treatment of editor-launch and Finder-sidebar registration as
//! nice-to-haves rather than required behavior.

use std::path::Path;
use std::process::Command;

/// Opens `path` with the OS's default handler for its type.
pub fn open_local_file(path: &Path) {
    let result = if cfg!(target_os = "macos") {
        Command::new("open").arg(path).status()
    } else if cfg!(target_os = "windows") {
        Command::new("cmd").args(["/C", "start", "", &path.to_string_lossy()]).status()
    } else {
        Command::new("xdg-open").arg(path).status()
    };

    if let Err(e) = result {
        tracing::warn!(?path, error = %e, "failed to open local file with default handler");
    }
}

/// Registers `path` as a Finder sidebar favourite. Only meaningful on
/// macOS; everywhere else this is a no-op. Best-effort: no portable Rust
/// API in this workspace's dependency stack talks to LaunchServices, so the
/// macOS branch logs instead of calling out to a shell script.
pub fn register_folder_link(path: &Path) {
    if cfg!(target_os = "macos") {
        tracing::debug!(?path, "folder link registration skipped (no LaunchServices binding)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn register_folder_link_does_not_panic() {
        register_folder_link(&PathBuf::from("/tmp/does-not-exist"));
    }
}
