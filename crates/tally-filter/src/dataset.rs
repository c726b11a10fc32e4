//! Immutable record sets with a stable identity.
//!
//! Indexes and cached results are tied to the [`DatasetId`] of the set they
//! were computed from. Ids come from a process-wide counter and are never
//! reused, and a `Dataset` cannot be mutated, so an id always describes the
//! same records. Clones share the records and the id.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Serialize, Serializer};

use tally_core::record::Record;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(u64);

impl DatasetId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetId({})", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    id: DatasetId,
    records: Arc<[Record]>,
}

impl Dataset {
    pub fn new(records: impl Into<Arc<[Record]>>) -> Self {
        Self {
            id: DatasetId::next(),
            records: records.into(),
        }
    }

    pub fn id(&self) -> DatasetId {
        self.id
    }

    pub fn records(&self) -> &Arc<[Record]> {
        &self.records
    }
}

impl Default for Dataset {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl From<Vec<Record>> for Dataset {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

impl From<Arc<[Record]>> for Dataset {
    fn from(records: Arc<[Record]>) -> Self {
        Self::new(records)
    }
}

/// Serializes as the plain record array.
impl Serialize for Dataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.records.iter())
    }
}

impl Deref for Dataset {
    type Target = [Record];

    fn deref(&self) -> &[Record] {
        &self.records
    }
}
