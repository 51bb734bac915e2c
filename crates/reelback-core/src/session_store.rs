//! Session persistence
//!
//! A [`SessionStore`] holds at most one session record. It is the only
//! resource shared across container instances and process restarts, and the
//! contract is deliberately thin: load, save, clear, last-write-wins, no
//! merging. Callers in [`crate::lifecycle`] treat every store failure as
//! "no stored session" / "no-op" and degrade to in-memory behavior, so
//! implementations report errors truthfully and never panic.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::StoreError;
use crate::session::Session;

/// One-slot session persistence.
pub trait SessionStore: Send + Sync {
    /// Read the stored session, if any.
    fn load(&self) -> Result<Option<Session>, StoreError>;

    /// Replace the stored session. Last write wins.
    fn save(&self, session: &Session) -> Result<(), StoreError>;

    /// Remove the stored session.
    fn clear(&self) -> Result<(), StoreError>;
}

// ===== In-memory store =====

/// Process-local store. Useful as the sticky store in tests and for hosts
/// with no durable storage.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<Session>, StoreError> {
        let slot = self.slot.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(slot.clone())
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        let mut slot = self.slot.lock().map_err(|_| StoreError::Poisoned)?;
        *slot = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut slot = self.slot.lock().map_err(|_| StoreError::Poisoned)?;
        *slot = None;
        Ok(())
    }
}

// ===== File-backed store =====

/// Single-JSON-document store on disk.
///
/// Writes go through a sibling temp file and a rename so a crashed writer
/// never leaves half a document behind. Concurrent writers race to the same
/// path; the last rename wins, which is exactly the shared-store contract.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Store backed by the given document path. The parent directory is
    /// created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Document path this store reads and writes.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map_or_else(|| "session".into(), std::ffi::OsStr::to_os_string);
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<Session>, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let session: Session = serde_json::from_str(&raw)?;
        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        ensure_parent_dir(&self.path)?;
        let tmp = self.temp_path();
        let raw = serde_json::to_string(session)?;
        std::fs::write(&tmp, raw)?;
        #[cfg(unix)]
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), session_id = %session.id, "Session saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
