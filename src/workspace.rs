//! Per-session workspace directory.
//!
//! Every session gets its own directory named by a random UUID under a root
//! (the system temp dir by default), so concurrent sessions never see each
//! other's page images. The directory is removed recursively on
//! [`SessionWorkspace::release`] and when the workspace is dropped.

use crate::error::MenuError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Lazily created, idempotently released session directory.
#[derive(Debug)]
pub struct SessionWorkspace {
    root: PathBuf,
    dir: Option<PathBuf>,
}

impl SessionWorkspace {
    /// A workspace that will live under `root`. Nothing is created yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dir: None,
        }
    }

    /// Return the session directory, creating it if needed.
    ///
    /// Calling this while already acquired returns the existing directory.
    pub fn acquire(&mut self) -> Result<&Path, MenuError> {
        if self.dir.is_none() {
            let dir = self.root.join(format!("menu-vision-{}", Uuid::new_v4()));
            std::fs::create_dir_all(&dir).map_err(|e| MenuError::Workspace {
                path: dir.clone(),
                source: e,
            })?;
            debug!("Acquired workspace {}", dir.display());
            self.dir = Some(dir);
        }
        match &self.dir {
            Some(dir) => Ok(dir),
            None => Err(MenuError::Internal("workspace vanished after acquire".into())),
        }
    }

    /// The current directory, if acquired.
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn is_acquired(&self) -> bool {
        self.dir.is_some()
    }

    /// Recursively delete the directory. Releasing twice is a no-op.
    pub fn release(&mut self) -> Result<(), MenuError> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!("Released workspace {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MenuError::Workspace {
                path: dir,
                source: e,
            }),
        }
    }
}

impl Drop for SessionWorkspace {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to clean up session workspace: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let mut ws = SessionWorkspace::new(root.path());
        let first = ws.acquire().unwrap().to_path_buf();
        let second = ws.acquire().unwrap().to_path_buf();
        assert_eq!(first, second);
        assert!(first.is_dir());
        assert!(first.starts_with(root.path()));
    }

    #[test]
    fn release_removes_contents_and_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let mut ws = SessionWorkspace::new(root.path());
        let dir = ws.acquire().unwrap().to_path_buf();
        std::fs::write(dir.join("image_1.jpg"), b"x").unwrap();

        ws.release().unwrap();
        assert!(!dir.exists());
        assert!(!ws.is_acquired());
        ws.release().unwrap();
    }

    #[test]
    fn reacquire_after_release_gets_fresh_dir() {
        let root = tempfile::tempdir().unwrap();
        let mut ws = SessionWorkspace::new(root.path());
        let first = ws.acquire().unwrap().to_path_buf();
        ws.release().unwrap();
        let second = ws.acquire().unwrap().to_path_buf();
        assert_ne!(first, second);
    }

    #[test]
    fn sessions_are_isolated() {
        let root = tempfile::tempdir().unwrap();
        let mut a = SessionWorkspace::new(root.path());
        let mut b = SessionWorkspace::new(root.path());
        assert_ne!(a.acquire().unwrap(), b.acquire().unwrap());
    }

    #[test]
    fn drop_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let dir = {
            let mut ws = SessionWorkspace::new(root.path());
            ws.acquire().unwrap().to_path_buf()
        };
        assert!(!dir.exists());
    }
}
