//! Per-identity persistence for the session ledger.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tipflow_types::Address;

use crate::ledger::LedgerSnapshot;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stored ledger for {identity} moved to revision {found}, expected {expected}")]
    Conflict {
        identity: Address,
        expected: u64,
        found: u64,
    },
    #[error("store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed stored ledger at {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

/// One stored document: the snapshot plus its optimistic-concurrency revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLedger {
    pub revision: u64,
    #[serde(flatten)]
    pub snapshot: LedgerSnapshot,
}

/// Explicit load/save boundary for ledger state, keyed by payer identity.
///
/// `save` succeeds only when the stored revision still equals
/// `expected_revision` (0 for "never saved") and returns the new revision.
pub trait SessionStore {
    fn load(&self, identity: Address) -> Result<Option<StoredLedger>, StoreError>;

    fn save(
        &self,
        identity: Address,
        snapshot: &LedgerSnapshot,
        expected_revision: u64,
    ) -> Result<u64, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<Address, StoredLedger>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self, identity: Address) -> Result<Option<StoredLedger>, StoreError> {
        let documents = self.documents.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(documents.get(&identity).cloned())
    }

    fn save(
        &self,
        identity: Address,
        snapshot: &LedgerSnapshot,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        let mut documents = self.documents.lock().map_err(|_| StoreError::Poisoned)?;
        let found = documents.get(&identity).map_or(0, |doc| doc.revision);
        if found != expected_revision {
            return Err(StoreError::Conflict {
                identity,
                expected: expected_revision,
                found,
            });
        }
        let revision = found + 1;
        documents.insert(
            identity,
            StoredLedger {
                revision,
                snapshot: snapshot.clone(),
            },
        );
        Ok(revision)
    }
}

/// One JSON document per identity at `<dir>/<0xaddress>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, identity: Address) -> PathBuf {
        self.dir.join(format!("{identity}.json"))
    }

    fn read(&self, path: &Path) -> Result<Option<StoredLedger>, StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Format {
                path: path.to_path_buf(),
                source,
            })
    }
}

impl SessionStore for FileStore {
    fn load(&self, identity: Address) -> Result<Option<StoredLedger>, StoreError> {
        self.read(&self.path_for(identity))
    }

    fn save(
        &self,
        identity: Address,
        snapshot: &LedgerSnapshot,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        let path = self.path_for(identity);
        let found = self.read(&path)?.map_or(0, |doc| doc.revision);
        if found != expected_revision {
            return Err(StoreError::Conflict {
                identity,
                expected: expected_revision,
                found,
            });
        }

        let document = StoredLedger {
            revision: found + 1,
            snapshot: snapshot.clone(),
        };
        let io_err = |source: std::io::Error| StoreError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let body = serde_json::to_vec_pretty(&document).map_err(|source| StoreError::Format {
            path: path.clone(),
            source,
        })?;

        // Whole-file replace so readers never observe a torn document.
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&body).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)?;
        Ok(document.revision)
    }
}
