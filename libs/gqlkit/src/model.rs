//! Model handles: the persistence seam modules hand to the core.
//!
//! The composer treats models as opaque. Relation helpers only need keyed
//! lookups, so the trait stays small and document-shaped.

use async_graphql::Value;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use thiserror::Error;

/// A stored record.
pub type Document = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{model}: record '{id}' already exists")]
    Conflict { model: String, id: String },
    #[error("{model}: invalid document: {reason}")]
    Invalid { model: String, reason: String },
    #[error("{model}: backend error: {source}")]
    Backend {
        model: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Equality filter over top-level document keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, serde_json::Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::all().and_eq(key, value)
    }

    pub fn and_eq(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions
            .iter()
            .all(|(key, expected)| doc.get(key) == Some(expected))
    }
}

#[async_trait]
pub trait Model: Send + Sync {
    fn name(&self) -> &str;

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, ModelError>;

    async fn find_many(&self, filter: &Filter) -> Result<Vec<Document>, ModelError>;

    async fn create(&self, doc: Document) -> Result<Document, ModelError>;

    /// Shallow-merges `patch` into the stored record.
    async fn update(&self, id: &str, patch: Document) -> Result<Option<Document>, ModelError>;

    async fn delete(&self, id: &str) -> Result<bool, ModelError>;
}

/// Process-local model keeping documents in insertion order.
///
/// Stamps `id` (uuid v4) when missing plus `createdAt`/`updatedAt`.
pub struct MemoryModel {
    name: String,
    docs: RwLock<IndexMap<String, Document>>,
}

impl MemoryModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docs: RwLock::new(IndexMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    fn now() -> serde_json::Value {
        serde_json::Value::String(chrono::Utc::now().to_rfc3339())
    }
}

#[async_trait]
impl Model for MemoryModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, ModelError> {
        Ok(self.docs.read().get(id).cloned())
    }

    async fn find_many(&self, filter: &Filter) -> Result<Vec<Document>, ModelError> {
        Ok(self
            .docs
            .read()
            .values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect())
    }

    async fn create(&self, mut doc: Document) -> Result<Document, ModelError> {
        let id = match doc.get("id") {
            Some(serde_json::Value::String(id)) if !id.is_empty() => id.clone(),
            Some(serde_json::Value::Null) | None => uuid::Uuid::new_v4().to_string(),
            Some(other) => {
                return Err(ModelError::Invalid {
                    model: self.name.clone(),
                    reason: format!("'id' must be a string, got {other}"),
                })
            }
        };

        let mut docs = self.docs.write();
        if docs.contains_key(&id) {
            return Err(ModelError::Conflict {
                model: self.name.clone(),
                id,
            });
        }

        let now = Self::now();
        doc.insert("id".into(), serde_json::Value::String(id.clone()));
        doc.entry("createdAt").or_insert_with(|| now.clone());
        doc.insert("updatedAt".into(), now);
        docs.insert(id, doc.clone());
        Ok(doc)
    }

    async fn update(&self, id: &str, patch: Document) -> Result<Option<Document>, ModelError> {
        let mut docs = self.docs.write();
        let Some(doc) = docs.get_mut(id) else {
            return Ok(None);
        };
        for (key, value) in patch {
            if key == "id" {
                continue;
            }
            doc.insert(key, value);
        }
        doc.insert("updatedAt".into(), Self::now());
        Ok(Some(doc.clone()))
    }

    async fn delete(&self, id: &str) -> Result<bool, ModelError> {
        Ok(self.docs.write().shift_remove(id).is_some())
    }
}

/// Converts a stored document into a GraphQL value; unconvertible input becomes `null`.
pub fn to_graphql(doc: Document) -> Value {
    Value::from_json(serde_json::Value::Object(doc)).unwrap_or(Value::Null)
}

/// Builds a [`Document`] from a JSON object value. Non-objects yield `None`.
pub fn document(value: serde_json::Value) -> Option<Document> {
    match value {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    }
}
