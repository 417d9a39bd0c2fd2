//! Askpass helper for password-protected client keys.
//!
//! git cannot take a key passphrase on the command line, so a small
//! executable script is written to the agent temp directory whose sole
//! effect is to print the passphrase on stdout. `core.askpass` points at
//! it for the duration of the acquisition.

use rba_common::errors::AcquireError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static HELPER_SEQ: AtomicU64 = AtomicU64::new(0);

/// A created helper script. Removal is explicit: the orchestrator deletes
/// it in Finalize (or on any failure path) unless credentials are being
/// exposed deliberately.
#[derive(Debug)]
pub struct AskpassHelper {
    path: PathBuf,
}

impl AskpassHelper {
    /// Write the helper script, executable by owner and group (0775).
    ///
    /// Creation failure is fatal to the acquisition: without the helper
    /// the key passphrase would have to travel somewhere less contained.
    pub fn create(temp_dir: &Path, password: &str) -> Result<Self, AcquireError> {
        let seq = HELPER_SEQ.fetch_add(1, Ordering::Relaxed);
        let file_name = if cfg!(windows) {
            format!("rba-askpass-{}-{seq}.cmd", std::process::id())
        } else {
            format!("rba-askpass-{}-{seq}.sh", std::process::id())
        };
        let path = temp_dir.join(file_name);

        let body = if cfg!(windows) {
            format!("@echo off\r\necho {password}\r\n")
        } else {
            // Single-quote the payload; embedded quotes are spliced out.
            let quoted = password.replace('\'', r"'\''");
            format!("#!/bin/sh\necho '{quoted}'\n")
        };

        std::fs::write(&path, body).map_err(|e| AcquireError::fs(path.clone(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o775))
                .map_err(|e| AcquireError::fs(path.clone(), e))?;
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort removal; the temp directory is bounded by the job
    /// lifetime either way.
    pub fn remove(self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_writes_script_printing_password() {
        let dir = tempfile::tempdir().unwrap();
        let helper = AskpassHelper::create(dir.path(), "s3cret").unwrap();
        let body = std::fs::read_to_string(helper.path()).unwrap();
        assert!(body.contains("s3cret"));
        assert!(helper.path().exists());
        helper.remove();
    }

    #[cfg(unix)]
    #[test]
    fn test_create_sets_group_executable_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let helper = AskpassHelper::create(dir.path(), "pw").unwrap();
        let mode = std::fs::metadata(helper.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o775);
        helper.remove();
    }

    #[cfg(unix)]
    #[test]
    fn test_single_quotes_in_password_are_spliced() {
        let dir = tempfile::tempdir().unwrap();
        let helper = AskpassHelper::create(dir.path(), "a'b").unwrap();
        let body = std::fs::read_to_string(helper.path()).unwrap();
        assert!(body.contains(r"a'\''b"));
        helper.remove();
    }

    #[test]
    fn test_remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let helper = AskpassHelper::create(dir.path(), "pw").unwrap();
        let path = helper.path().to_path_buf();
        helper.remove();
        assert!(!path.exists());
    }

    #[test]
    fn test_concurrent_helpers_get_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let a = AskpassHelper::create(dir.path(), "one").unwrap();
        let b = AskpassHelper::create(dir.path(), "two").unwrap();
        assert_ne!(a.path(), b.path());
        a.remove();
        b.remove();
    }
}
