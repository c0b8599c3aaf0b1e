use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// The stored shape of every record: a flat map of named fields.
pub type Document = serde_json::Map<String, Value>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// An unknown or internal error happened with the store
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A document this transaction read was changed by a concurrent commit
    #[error("transaction aborted: {collection} changed concurrently")]
    Conflict {
        /// The collection the conflicting read belongs to
        collection: String,
    },
    /// A document doesn't exist
    #[error("{collection}:{key} doesn't exist")]
    NotFound { collection: String, key: String },
}

/// An exact-match predicate over a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// The field holds exactly this value
    Eq(String, Value),
    /// The field is an array containing this value
    ArrayContains(String, Value),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Eq(field.to_string(), value.into())
    }

    pub fn array_contains(field: &str, value: impl Into<Value>) -> Self {
        Self::ArrayContains(field.to_string(), value.into())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::Eq(field, value) => doc.get(field) == Some(value),
            Self::ArrayContains(field, value) => doc
                .get(field)
                .and_then(Value::as_array)
                .map(|items| items.contains(value))
                .unwrap_or(false),
        }
    }
}

/// A single field mutation applied by a patch write.
#[derive(Debug, Clone)]
pub enum FieldChange {
    /// Overwrite the field with a value
    Set(String, Value),
    /// Add the value to a string-array field, unless already present
    ArrayUnion(String, Value),
    /// Remove every occurrence of the value from an array field
    ArrayRemove(String, Value),
}

impl FieldChange {
    pub fn set(field: &str, value: impl Into<Value>) -> Self {
        Self::Set(field.to_string(), value.into())
    }

    pub fn array_union(field: &str, value: impl Into<Value>) -> Self {
        Self::ArrayUnion(field.to_string(), value.into())
    }

    pub fn array_remove(field: &str, value: impl Into<Value>) -> Self {
        Self::ArrayRemove(field.to_string(), value.into())
    }

    pub fn apply(&self, doc: &mut Document) {
        match self {
            Self::Set(field, value) => {
                doc.insert(field.clone(), value.clone());
            }
            Self::ArrayUnion(field, value) => {
                let items = ensure_array(doc, field);
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            Self::ArrayRemove(field, value) => {
                let items = ensure_array(doc, field);
                items.retain(|item| item != value);
            }
        }
    }
}

/// Replaces a non-array field with an empty array, so array changes always apply.
fn ensure_array<'d>(doc: &'d mut Document, field: &str) -> &'d mut Vec<Value> {
    if !doc.get(field).map(Value::is_array).unwrap_or(false) {
        doc.insert(field.to_string(), Value::Array(Vec::new()));
    }

    doc.get_mut(field)
        .and_then(Value::as_array_mut)
        .expect("field was just set to an array")
}

/// One write inside a batch or transaction.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Set {
        collection: String,
        key: String,
        doc: Document,
        /// When true, fields are merged into the existing document instead of replacing it
        merge: bool,
    },
    /// Applies field changes to the document, creating it if absent
    Patch {
        collection: String,
        key: String,
        changes: Vec<FieldChange>,
    },
    Delete {
        collection: String,
        key: String,
    },
}

/// A set of writes that commit together, all-or-nothing.
///
/// The batch gives no read consistency guarantee: a reader racing the commit
/// may observe a partially applied state. Every op is individually idempotent,
/// so re-committing a batch is safe.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, collection: &str, key: &str, doc: Document) -> &mut Self {
        self.push(WriteOp::Set {
            collection: collection.to_string(),
            key: key.to_string(),
            doc,
            merge: false,
        })
    }

    pub fn set_merge(&mut self, collection: &str, key: &str, doc: Document) -> &mut Self {
        self.push(WriteOp::Set {
            collection: collection.to_string(),
            key: key.to_string(),
            doc,
            merge: true,
        })
    }

    pub fn patch(&mut self, collection: &str, key: &str, changes: Vec<FieldChange>) -> &mut Self {
        self.push(WriteOp::Patch {
            collection: collection.to_string(),
            key: key.to_string(),
            changes,
        })
    }

    pub fn delete(&mut self, collection: &str, key: &str) -> &mut Self {
        self.push(WriteOp::Delete {
            collection: collection.to_string(),
            key: key.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }
}

/// Represents a type that can store and query jhalak documents
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    type Transaction: StoreTransaction;

    /// Reads a single document by collection and key
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Reads every document in a collection, ordered by key
    async fn scan(&self, collection: &str) -> Result<Vec<(String, Document)>>;

    /// Reads the documents matching every filter, ordered by key
    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<(String, Document)>>;

    /// Applies a batch of writes atomically
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Starts a read-then-write transaction with conflict detection on commit
    async fn begin(&self) -> Result<Self::Transaction>;

    async fn set(&self, collection: &str, key: &str, doc: Document) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.set(collection, key, doc);
        self.commit(batch).await
    }

    async fn set_merge(&self, collection: &str, key: &str, doc: Document) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.set_merge(collection, key, doc);
        self.commit(batch).await
    }

    async fn patch(&self, collection: &str, key: &str, changes: Vec<FieldChange>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.patch(collection, key, changes);
        self.commit(batch).await
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(collection, key);
        self.commit(batch).await
    }
}

/// A read-then-write unit of work.
///
/// Reads see the committed state at the time of the call and are tracked. If
/// any document or collection read by the transaction changes before
/// [`StoreTransaction::commit`], the commit fails with
/// [`StorageError::Conflict`] and no write is applied. Writes are buffered
/// until commit and are not visible to the transaction's own reads.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn get(&mut self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Queries within the transaction. Tracks the whole collection, so any
    /// concurrent write to it conflicts the commit.
    async fn query(&mut self, collection: &str, filters: &[Filter])
        -> Result<Vec<(String, Document)>>;

    fn set(&mut self, collection: &str, key: &str, doc: Document);

    fn set_merge(&mut self, collection: &str, key: &str, doc: Document);

    fn patch(&mut self, collection: &str, key: &str, changes: Vec<FieldChange>);

    fn delete(&mut self, collection: &str, key: &str);

    async fn commit(self) -> Result<()>;
}

/// Serializes a model into its stored document shape.
///
/// Optional fields skipped by serde are entirely absent from the document,
/// which is how "no value" is represented in the store.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value).map_err(|e| StorageError::Internal(Box::new(e)))? {
        Value::Object(map) => Ok(map),
        other => Err(StorageError::Internal(
            format!("expected an object document, got {other}").into(),
        )),
    }
}

/// Deserializes a stored document back into a model.
pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    serde_json::from_value(Value::Object(doc)).map_err(|e| StorageError::Internal(Box::new(e)))
}
