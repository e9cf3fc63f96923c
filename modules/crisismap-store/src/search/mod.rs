//! Full-text/geo document index for crowd reports.
//!
//! The index carries no permission awareness; callers resolve hits to
//! records and filter them.

mod memory;
mod pg;
pub mod query;

pub use memory::MemorySearchIndex;
pub use pg::PgSearchIndex;
pub use query::{parse_query, Query};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crisismap_common::GeoPoint;

use crate::error::StoreResult;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Tokenized, matched case-insensitively by word.
    Text(String),
    /// Matched whole.
    Atom(String),
    Number(f64),
    Geo(GeoPoint),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

/// A searchable document. A name may repeat (e.g. one `topic_id` per topic).
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Vec<Field>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: impl Into<String>) -> Self {
        self.push(name, FieldValue::Text(value.into()));
        self
    }

    pub fn atom(mut self, name: &str, value: impl Into<String>) -> Self {
        self.push(name, FieldValue::Atom(value.into()));
        self
    }

    pub fn number(mut self, name: &str, value: f64) -> Self {
        self.push(name, FieldValue::Number(value));
        self
    }

    pub fn geo(mut self, name: &str, value: GeoPoint) -> Self {
        self.push(name, FieldValue::Geo(value));
        self
    }

    fn push(&mut self, name: &str, value: FieldValue) {
        self.fields.push(Field {
            name: name.to_string(),
            value,
        });
    }

    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FieldValue> + 'a {
        self.fields
            .iter()
            .filter(move |f| f.name == name)
            .map(|f| &f.value)
    }

    pub fn number_value(&self, name: &str) -> Option<f64> {
        self.values(name).find_map(|v| match v {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        })
    }
}

/// Search over report documents using the query grammar in [`query`].
///
/// Callers put a report's document after the report write has landed.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Adds documents, replacing any with the same ID.
    async fn put(&self, documents: Vec<Document>);

    /// IDs of matching documents, most recently updated first.
    async fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<String>>;

    /// Whether documents must be put for the index to see reports. False
    /// when the index reads the stored reports directly.
    fn needs_documents(&self) -> bool {
        true
    }
}

/// Seconds since the epoch, the form `updated` is indexed and queried in.
pub fn utc_to_timestamp(time: DateTime<Utc>) -> f64 {
    time.timestamp_micros() as f64 / 1_000_000.0
}
