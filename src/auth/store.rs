//! On-disk credential store.
//!
//! Layout mirrors the multi-file auth state the transport expects: a master
//! `creds.json` plus rotating key records (`sender-key-<chat>-<n>.json`,
//! `app-state-<n>.json`, ...). Records are written atomically (temp file then
//! rename) so a crash mid-write leaves either the old or the new complete
//! record, never a torn one. A stray `.tmp` file is cleaned up by the
//! corruption scan.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// File name of the master credential record.
pub const MASTER_RECORD: &str = "creds.json";

const TMP_SUFFIX: &str = ".tmp";

/// Secret material needed to resume a session without a fresh device link.
///
/// The contents are opaque to the engine; the transport produces a rotated
/// copy on every `CredentialsRotated` event and consumes one at connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Noise-protocol static key, transport-encoded.
    pub noise_key: String,
    /// Long-term identity key, transport-encoded.
    pub identity_key: String,
    /// Registration id assigned at device link.
    pub registration_id: u32,
    /// Platform account id this session is linked to, once known.
    #[serde(default)]
    pub account_id: Option<String>,
}

/// Directory of independently loadable credential records.
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    /// Open (creating if needed) the store at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the master credential record.
    pub fn load(&self) -> Result<Credential, StoreError> {
        let path = self.dir.join(MASTER_RECORD);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Persist the master credential record atomically.
    pub fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(credential)?;
        self.write_atomic(MASTER_RECORD, &bytes)
    }

    /// Persist a rotating key record atomically under `name` (no extension).
    pub fn save_entry(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.write_atomic(&format!("{name}.json"), bytes)
    }

    /// All record file names currently on disk, `.tmp` leftovers included.
    pub fn entry_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn read_entry(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        Ok(fs::read(self.dir.join(name))?)
    }

    pub fn remove_entry(&self, name: &str) -> Result<(), StoreError> {
        fs::remove_file(self.dir.join(name))?;
        Ok(())
    }

    /// Delete only the rotating key records tied to `chat_id`.
    ///
    /// The master record is never touched here; invalidating one
    /// desynchronized peer must not force a fresh device link. Returns the
    /// number of records removed.
    pub fn remove_entries_for_chat(&self, chat_id: &str) -> Result<usize, StoreError> {
        let mut removed = 0;
        for name in self.entry_names()? {
            if name == MASTER_RECORD {
                continue;
            }
            if name.contains(chat_id) {
                self.remove_entry(&name)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn write_atomic(&self, file_name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let final_path = self.dir.join(file_name);
        let tmp_path = self.dir.join(format!("{file_name}{TMP_SUFFIX}"));
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}
