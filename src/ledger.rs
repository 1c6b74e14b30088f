//! Issuance Ledger - per-identifier issued/sent state
//!
//! State per identifier: `Unknown -> Issued -> Sent`. The ledger is an
//! in-memory map backed by a single JSON file. Every mutation rewrites the
//! file through [`crate::persist::write_atomic`] and only commits to memory
//! once the file is in place.
//!
//! Writers in different processes are last-write-wins on the whole file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use thiserror::Error;
use tracing::{debug, info};

use crate::identity::Identifier;
use crate::persist::{write_atomic, PersistError, RetryPolicy};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Could not read ledger {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Ledger {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuanceState {
    Unknown,
    Issued,
    Sent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssuanceRecord {
    pub issued: bool,
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_sha256: Option<String>,
}

impl IssuanceRecord {
    pub fn state(&self) -> IssuanceState {
        if self.sent {
            IssuanceState::Sent
        } else if self.issued {
            IssuanceState::Issued
        } else {
            IssuanceState::Unknown
        }
    }
}

/// Audit detail stored alongside the issued flag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssuanceDetails {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub ticket_path: Option<PathBuf>,
    pub ticket_sha256: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    records: BTreeMap<Identifier, IssuanceRecord>,
}

#[derive(Debug)]
pub struct IssuanceLedger {
    path: PathBuf,
    retry: RetryPolicy,
    records: RwLock<BTreeMap<Identifier, IssuanceRecord>>,
}

impl IssuanceLedger {
    /// Open the ledger at `path`. A missing file is an empty ledger.
    pub fn open(path: impl Into<PathBuf>, retry: RetryPolicy) -> Result<Self, LedgerError> {
        let path = path.into();
        let records = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => {
                let file: LedgerFile =
                    serde_json::from_slice(&bytes).map_err(|source| LedgerError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                file.records
            }
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(LedgerError::Read { path, source }),
        };
        debug!(path = %path.display(), records = records.len(), "ledger opened");

        Ok(Self {
            path,
            retry,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Identifier, IssuanceRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` to a copy of the map, persist it, then commit. If the
    /// closure reports no change nothing is written. Returns whether a new
    /// state was committed.
    fn update<F>(&self, change: F) -> Result<bool, LedgerError>
    where
        F: FnOnce(&mut BTreeMap<Identifier, IssuanceRecord>) -> bool,
    {
        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        if !change(&mut next) {
            return Ok(false);
        }

        let file = LedgerFile { records: next };
        write_atomic(&self.path, &self.retry, |out| {
            let bytes = serde_json::to_vec_pretty(&file).map_err(io::Error::from)?;
            out.write_all(&bytes)
        })?;

        *guard = file.records;
        Ok(true)
    }

    /// `Unknown -> Issued`. Re-issuing never regresses state.
    pub fn record_issued(&self, id: &Identifier) -> Result<(), LedgerError> {
        self.record_issuance(id, IssuanceDetails::default())
    }

    /// Like [`Self::record_issued`], also storing audit detail. Provided
    /// detail fields replace stored ones; `issued_at` keeps the first time.
    pub fn record_issuance(&self, id: &Identifier, details: IssuanceDetails) -> Result<(), LedgerError> {
        let committed = self.update(|records| {
            let record = records.entry(id.clone()).or_default();
            let before = record.clone();

            if !record.issued {
                record.issued = true;
                record.issued_at = Some(Utc::now());
            }
            if details.display_name.is_some() {
                record.display_name = details.display_name;
            }
            if details.email.is_some() {
                record.email = details.email;
            }
            if details.ticket_path.is_some() {
                record.ticket_path = details.ticket_path;
            }
            if details.ticket_sha256.is_some() {
                record.ticket_sha256 = details.ticket_sha256;
            }

            *record != before
        })?;
        if committed {
            info!(id = %id, "issuance recorded");
        }
        Ok(())
    }

    /// `* -> Sent`. Does not require a prior issuance.
    pub fn mark_sent(&self, id: &Identifier) -> Result<(), LedgerError> {
        let committed = self.update(|records| {
            let record = records.entry(id.clone()).or_default();
            if record.sent {
                return false;
            }
            record.sent = true;
            record.sent_at = Some(Utc::now());
            true
        })?;
        if committed {
            info!(id = %id, "marked sent");
        }
        Ok(())
    }

    pub fn is_sent(&self, id: &Identifier) -> bool {
        self.read().get(id).map_or(false, |r| r.sent)
    }

    pub fn state(&self, id: &Identifier) -> IssuanceState {
        self.read()
            .get(id)
            .map_or(IssuanceState::Unknown, IssuanceRecord::state)
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.read().contains_key(id)
    }

    pub fn get(&self, id: &Identifier) -> Option<IssuanceRecord> {
        self.read().get(id).cloned()
    }

    pub fn records(&self) -> Vec<(Identifier, IssuanceRecord)> {
        self.read()
            .iter()
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every record. The only deletion path.
    pub fn reset(&self) -> Result<(), LedgerError> {
        let count = self.len();
        self.update(|records| {
            records.clear();
            true
        })?;
        info!(cleared = count, "ledger reset");
        Ok(())
    }
}
