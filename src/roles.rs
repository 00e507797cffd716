//! Durable role store for hotpatch authorization.
//!
//! A small JSON file maps normalized user ids to roles. It is loaded once at
//! startup and fully rewritten on every mutation; there is no append log and
//! no versioning. Absence of an id means no elevated privilege.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted normalized id. Ids past this bound are treated as
/// malformed input and mutations for them are refused without a write.
pub const MAX_ID_LEN: usize = 20;

/// Elevated privilege levels. Anyone else is just a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Hotpatch,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read role store: {0}")]
    Read(#[source] std::io::Error),
    #[error("role store is corrupt: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to write role store: {0}")]
    Write(#[source] std::io::Error),
}

/// On-disk shape: `{"users": {"<id>": "admin" | "hotpatch"}}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    users: HashMap<String, Role>,
}

/// The authorization table. All mutations persist synchronously before
/// returning, so a crash never loses an acknowledged change.
pub struct RoleStore {
    path: Option<PathBuf>,
    file: StoreFile,
}

impl RoleStore {
    /// Load the store from disk. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let file = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreFile::default(),
            Err(e) => return Err(StoreError::Read(e)),
        };
        Ok(Self {
            path: Some(path),
            file,
        })
    }

    /// Store with no backing file (for tests).
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            file: StoreFile::default(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Role> {
        self.file.users.get(id).copied()
    }

    /// Grant `role` to `id` and persist. Returns `Ok(false)` without writing
    /// when the id exceeds [`MAX_ID_LEN`].
    pub fn set(&mut self, id: &str, role: Role) -> Result<bool, StoreError> {
        if id.len() > MAX_ID_LEN {
            return Ok(false);
        }
        self.file.users.insert(id.to_string(), role);
        self.persist()?;
        Ok(true)
    }

    /// Revoke any role from `id` and persist. Removing an absent id still
    /// rewrites the file with its current contents.
    pub fn clear(&mut self, id: &str) -> Result<bool, StoreError> {
        if id.len() > MAX_ID_LEN {
            return Ok(false);
        }
        self.file.users.remove(id);
        self.persist()?;
        Ok(true)
    }

    fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = serde_json::to_string(&self.file)?;
        fs::write(path, text).map_err(StoreError::Write)
    }
}
