//! Thin wrapper over local filesystem operations the binding and
//! navigation layers need. Extended attributes are used to stash the
//! remote root ref on a bound folder; filesystems that don't support xattrs
//! (e.g. some network mounts) degrade gracefully — a missing tag is not a
//! hard failure, callers fall back to the database row.

use std::path::Path;

use crate::errors::CoreError;

const ROOT_REF_XATTR: &str = "user.docsync.root_ref";

pub struct LocalClient;

impl LocalClient {
    pub fn ensure_folder(path: &Path) -> Result<(), CoreError> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    pub fn canonicalize(path: &Path) -> Result<std::path::PathBuf, CoreError> {
        Ok(path.canonicalize()?)
    }

    /// Best-effort: tags `path` with the bound remote root ref. Failures are
    /// logged, never propagated — this is a convenience for OS integrations
    /// that read xattrs, not part of the sync correctness contract.
    pub fn tag_root_ref(path: &Path, remote_ref: &str) {
        if let Err(e) = xattr::set(path, ROOT_REF_XATTR, remote_ref.as_bytes()) {
            tracing::debug!(?path, error = %e, "failed to set root ref xattr");
        }
    }

    pub fn read_root_ref(path: &Path) -> Option<String> {
        xattr::get(path, ROOT_REF_XATTR)
            .ok()
            .flatten()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ensure_folder_creates_nested_dirs() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        LocalClient::ensure_folder(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn canonicalize_resolves_existing_path() {
        let dir = tempdir().unwrap();
        let resolved = LocalClient::canonicalize(dir.path()).unwrap();
        assert!(resolved.is_absolute());
    }

    #[test]
    fn missing_xattr_read_returns_none() {
        let dir = tempdir().unwrap();
        assert!(LocalClient::read_root_ref(dir.path()).is_none());
    }
}
