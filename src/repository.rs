//! Request storage
//!
//! Records carry a revision. `save` only succeeds when the stored revision is
//! still the one the caller loaded, so two approvers racing on the same
//! request cannot both win.
use super::lifecycle::RequestLifecycle;
use std::collections::BTreeMap;
use std::sync::Mutex;

pub const REQUESTS_TREE: &str = "requests";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to encode request `{id}`: {reason}")]
    Encode { id: String, reason: String },
    #[error("failed to decode stored request: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("request `{id}` changed underneath us (loaded revision {expected}, stored revision {found})")]
    Conflict { id: String, expected: u64, found: u64 },
    #[error("approval snapshot of request `{0}` does not match its fingerprint")]
    Corrupt(String),
}

pub trait RequestRepository: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<RequestLifecycle>, StoreError>;
    /// Returns the record as stored, with its revision bumped.
    fn save(&self, record: &RequestLifecycle) -> Result<RequestLifecycle, StoreError>;
    fn list(&self) -> Result<Vec<RequestLifecycle>, StoreError>;
}

fn check_revision(stored: Option<&RequestLifecycle>, record: &RequestLifecycle) -> Result<u64, StoreError> {
    let found = stored.map_or(0, RequestLifecycle::revision);
    if found != record.revision() {
        return Err(StoreError::Conflict {
            id: record.id().to_string(),
            expected: record.revision(),
            found,
        });
    }
    Ok(found + 1)
}

#[derive(Default)]
pub struct InMemoryRequestRepository {
    requests: Mutex<BTreeMap<String, RequestLifecycle>>,
}

impl InMemoryRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestRepository for InMemoryRequestRepository {
    fn get(&self, id: &str) -> Result<Option<RequestLifecycle>, StoreError> {
        let requests = match self.requests.lock() {
            Ok(requests) => requests,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(requests.get(id).cloned())
    }

    fn save(&self, record: &RequestLifecycle) -> Result<RequestLifecycle, StoreError> {
        let mut requests = match self.requests.lock() {
            Ok(requests) => requests,
            Err(poisoned) => poisoned.into_inner(),
        };
        let revision = check_revision(requests.get(record.id()), record)?;
        let saved = record.clone().with_revision(revision);
        requests.insert(saved.id().to_string(), saved.clone());
        Ok(saved)
    }

    fn list(&self) -> Result<Vec<RequestLifecycle>, StoreError> {
        let requests = match self.requests.lock() {
            Ok(requests) => requests,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(requests.values().cloned().collect())
    }
}

/// Requests live in their own tree, keyed by request id, CBOR encoded.
pub struct SledRequestRepository {
    tree: sled::Tree,
}

impl SledRequestRepository {
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            tree: db.open_tree(REQUESTS_TREE)?,
        })
    }

    fn decode(bytes: &[u8]) -> Result<RequestLifecycle, StoreError> {
        let record: RequestLifecycle = minicbor::decode(bytes)?;
        if !record.verify_snapshot() {
            return Err(StoreError::Corrupt(record.id().to_string()));
        }
        Ok(record)
    }
}

impl RequestRepository for SledRequestRepository {
    fn get(&self, id: &str) -> Result<Option<RequestLifecycle>, StoreError> {
        self.tree
            .get(id.as_bytes())?
            .map(|bytes| Self::decode(&bytes))
            .transpose()
    }

    fn save(&self, record: &RequestLifecycle) -> Result<RequestLifecycle, StoreError> {
        let key = record.id().as_bytes();
        let current = self.tree.get(key)?;
        let stored = current.as_deref().map(Self::decode).transpose()?;
        let revision = check_revision(stored.as_ref(), record)?;

        let saved = record.clone().with_revision(revision);
        let cbor = minicbor::to_vec(&saved).map_err(|e| StoreError::Encode {
            id: saved.id().to_string(),
            reason: e.to_string(),
        })?;

        // the bytes we checked must still be the bytes on disk
        match self.tree.compare_and_swap(key, current.as_ref(), Some(cbor))? {
            Ok(()) => Ok(saved),
            Err(swap) => {
                let found = swap
                    .current
                    .as_deref()
                    .map(Self::decode)
                    .transpose()?
                    .map_or(0, |r| r.revision());
                Err(StoreError::Conflict {
                    id: record.id().to_string(),
                    expected: record.revision(),
                    found,
                })
            }
        }
    }

    fn list(&self) -> Result<Vec<RequestLifecycle>, StoreError> {
        self.tree
            .iter()
            .values()
            .map(|bytes| Self::decode(&bytes?))
            .collect()
    }
}
