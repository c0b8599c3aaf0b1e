use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::trace;
use parking_lot::RwLock;

use crate::{
    Document, DocumentStore, FieldChange, Filter, Result, StorageError, StoreTransaction,
    WriteBatch, WriteOp,
};

#[derive(Debug, Clone)]
struct VersionedDoc {
    doc: Document,
    version: u64,
}

#[derive(Debug, Default)]
struct Collection {
    docs: HashMap<String, VersionedDoc>,
    /// Bumped on every write to the collection, so queries can be validated
    version: u64,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Collection>,
    /// Monotonic write clock shared by all collections
    clock: u64,
}

impl State {
    fn doc_version(&self, collection: &str, key: &str) -> Option<u64> {
        self.collections
            .get(collection)
            .and_then(|col| col.docs.get(key))
            .map(|entry| entry.version)
    }

    fn collection_version(&self, collection: &str) -> u64 {
        self.collections
            .get(collection)
            .map(|col| col.version)
            .unwrap_or(0)
    }

    fn apply(&mut self, op: WriteOp) {
        self.clock += 1;
        let clock = self.clock;

        match op {
            WriteOp::Set {
                collection,
                key,
                doc,
                merge,
            } => {
                let col = self.collections.entry(collection).or_default();
                col.version = clock;

                match col.docs.get_mut(&key) {
                    Some(existing) if merge => {
                        for (field, value) in doc {
                            existing.doc.insert(field, value);
                        }
                        existing.version = clock;
                    }
                    _ => {
                        col.docs.insert(key, VersionedDoc { doc, version: clock });
                    }
                }
            }
            WriteOp::Patch {
                collection,
                key,
                changes,
            } => {
                let col = self.collections.entry(collection).or_default();
                col.version = clock;

                let entry = col.docs.entry(key).or_insert_with(|| VersionedDoc {
                    doc: Document::new(),
                    version: clock,
                });

                for change in &changes {
                    change.apply(&mut entry.doc);
                }

                entry.version = clock;
            }
            WriteOp::Delete { collection, key } => {
                if let Some(col) = self.collections.get_mut(&collection) {
                    if col.docs.remove(&key).is_some() {
                        col.version = clock;
                    }
                }
            }
        }
    }
}

/// An in-process document store.
///
/// Provides the full storage contract: keyed reads and writes, collection
/// scans, exact-match queries, atomic batches, and optimistic transactions
/// that fail with [`StorageError::Conflict`] when a concurrent commit touches
/// something they read.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut rows: Vec<(String, Document)>) -> Vec<(String, Document)> {
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    rows
}

#[async_trait]
impl DocumentStore for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        let state = self.state.read();

        Ok(state
            .collections
            .get(collection)
            .and_then(|col| col.docs.get(key))
            .map(|entry| entry.doc.clone()))
    }

    async fn scan(&self, collection: &str) -> Result<Vec<(String, Document)>> {
        let state = self.state.read();

        let rows = state
            .collections
            .get(collection)
            .map(|col| {
                col.docs
                    .iter()
                    .map(|(key, entry)| (key.clone(), entry.doc.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(sorted(rows))
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<(String, Document)>> {
        let state = self.state.read();

        let rows = state
            .collections
            .get(collection)
            .map(|col| {
                col.docs
                    .iter()
                    .filter(|(_, entry)| filters.iter().all(|f| f.matches(&entry.doc)))
                    .map(|(key, entry)| (key.clone(), entry.doc.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(sorted(rows))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut state = self.state.write();

        for op in batch.into_ops() {
            state.apply(op);
        }

        Ok(())
    }

    async fn begin(&self) -> Result<MemoryTransaction> {
        Ok(MemoryTransaction {
            state: self.state.clone(),
            doc_reads: Vec::new(),
            collection_reads: Vec::new(),
            writes: Vec::new(),
        })
    }
}

/// A pending transaction against a [`MemoryStore`].
pub struct MemoryTransaction {
    state: Arc<RwLock<State>>,
    /// Versions observed by keyed reads, `None` when the document was absent
    doc_reads: Vec<(String, String, Option<u64>)>,
    /// Collection versions observed by queries
    collection_reads: Vec<(String, u64)>,
    writes: Vec<WriteOp>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(&mut self, collection: &str, key: &str) -> Result<Option<Document>> {
        let state = self.state.read();

        let entry = state
            .collections
            .get(collection)
            .and_then(|col| col.docs.get(key));

        self.doc_reads.push((
            collection.to_string(),
            key.to_string(),
            entry.map(|e| e.version),
        ));

        Ok(entry.map(|e| e.doc.clone()))
    }

    async fn query(
        &mut self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<(String, Document)>> {
        let state = self.state.read();

        self.collection_reads
            .push((collection.to_string(), state.collection_version(collection)));

        let rows = state
            .collections
            .get(collection)
            .map(|col| {
                col.docs
                    .iter()
                    .filter(|(_, entry)| filters.iter().all(|f| f.matches(&entry.doc)))
                    .map(|(key, entry)| (key.clone(), entry.doc.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(sorted(rows))
    }

    fn set(&mut self, collection: &str, key: &str, doc: Document) {
        self.writes.push(WriteOp::Set {
            collection: collection.to_string(),
            key: key.to_string(),
            doc,
            merge: false,
        });
    }

    fn set_merge(&mut self, collection: &str, key: &str, doc: Document) {
        self.writes.push(WriteOp::Set {
            collection: collection.to_string(),
            key: key.to_string(),
            doc,
            merge: true,
        });
    }

    fn patch(&mut self, collection: &str, key: &str, changes: Vec<FieldChange>) {
        self.writes.push(WriteOp::Patch {
            collection: collection.to_string(),
            key: key.to_string(),
            changes,
        });
    }

    fn delete(&mut self, collection: &str, key: &str) {
        self.writes.push(WriteOp::Delete {
            collection: collection.to_string(),
            key: key.to_string(),
        });
    }

    async fn commit(self) -> Result<()> {
        let mut state = self.state.write();

        for (collection, key, version) in &self.doc_reads {
            if state.doc_version(collection, key) != *version {
                trace!("commit aborted, {collection}:{key} changed since read");

                return Err(StorageError::Conflict {
                    collection: collection.clone(),
                });
            }
        }

        for (collection, version) in &self.collection_reads {
            if state.collection_version(collection) != *version {
                trace!("commit aborted, collection {collection} changed since query");

                return Err(StorageError::Conflict {
                    collection: collection.clone(),
                });
            }
        }

        for op in self.writes {
            state.apply(op);
        }

        Ok(())
    }
}
