//! Search backend access
//!
//! The engine only needs two operations from the search cluster: counting the
//! records a compiled query matches, and fetching one page of them by offset
//! (or, past the first page of a job, by the sort key of the previous page's
//! last record).

use crate::error::{Error, Result};
use crate::license::License;
use crate::query::CompiledQuery;
use crate::types::DatasetKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

mod elasticsearch;

pub use elasticsearch::ElasticsearchBackend;

/// Field every backend orders records by
pub const RECORD_ID_FIELD: &str = "gbifID";

/// Field holding the key of the dataset a record belongs to
pub const DATASET_KEY_FIELD: &str = "datasetKey";

/// Field holding the record's license
pub const LICENSE_FIELD: &str = "license";

/// One occurrence returned by the search backend
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceRecord {
    /// Interpreted fields, keyed by term name (`gbifID`, `datasetKey`, ...)
    pub fields: BTreeMap<String, Value>,
    /// Verbatim (as published) values, keyed by term name
    #[serde(default)]
    pub verbatim: BTreeMap<String, String>,
}

impl OccurrenceRecord {
    /// An empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style interpreted field setter
    pub fn with(mut self, term: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(term.into(), value.into());
        self
    }

    /// Builder-style verbatim field setter
    pub fn with_verbatim(mut self, term: impl Into<String>, value: impl Into<String>) -> Self {
        self.verbatim.insert(term.into(), value.into());
        self
    }

    /// Build a record from a search hit's `_source`
    ///
    /// The nested `verbatim` object (flat, or with a `core` section) becomes
    /// [`verbatim`](Self::verbatim); term URIs are shortened to their last
    /// path segment.
    pub fn from_source(source: Value) -> Self {
        let Value::Object(mut object) = source else {
            return Self::default();
        };

        let mut verbatim = BTreeMap::new();
        if let Some(Value::Object(raw)) = object.remove("verbatim") {
            let core = match raw.get("core") {
                Some(Value::Object(core)) => core.clone(),
                _ => raw,
            };
            for (term, value) in core {
                if let Some(text) = value_text(&value) {
                    verbatim.insert(simple_term_name(&term).to_string(), text);
                }
            }
        }

        Self {
            fields: object.into_iter().collect(),
            verbatim,
        }
    }

    /// Text rendering of an interpreted field; `None` when absent or null
    pub fn text(&self, term: &str) -> Option<String> {
        self.fields.get(term).and_then(value_text)
    }

    /// Dataset the record belongs to
    pub fn dataset_key(&self) -> Option<DatasetKey> {
        self.text(DATASET_KEY_FIELD)
            .and_then(|key| DatasetKey::parse_str(key.trim()).ok())
    }

    /// Position of the record in the stable ordering
    pub fn sort_key(&self) -> Option<&Value> {
        self.fields.get(RECORD_ID_FIELD).filter(|v| !v.is_null())
    }

    /// The record's license; `Unspecified` when absent
    pub fn license(&self) -> License {
        self.text(LICENSE_FIELD)
            .and_then(|l| License::parse(&l))
            .unwrap_or(License::Unspecified)
    }
}

/// `http://rs.tdwg.org/dwc/terms/catalogNumber` -> `catalogNumber`
fn simple_term_name(term: &str) -> &str {
    term.rsplit(['/', '#']).next().unwrap_or(term)
}

/// Multi-valued fields are joined with `;`
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_text).collect();
            Some(parts.join(";"))
        }
        Value::Object(_) => Some(value.to_string()),
    }
}

/// Counting and paging over the occurrence index
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Number of records matching the query
    async fn count(&self, query: &CompiledQuery) -> Result<u64>;

    /// Records `[from, from + size)` of the query's stable ordering
    ///
    /// `after` is the sort key of the record at `from - 1` when the caller
    /// knows it. Backends with bounded offset paging continue from it.
    async fn fetch(
        &self,
        query: &CompiledQuery,
        from: u64,
        size: u64,
        after: Option<&Value>,
    ) -> Result<Vec<OccurrenceRecord>>;
}

/// Backend serving a fixed record list, whatever the query
///
/// For tests and demos. A failure offset can be set to make every page
/// covering that offset fail.
#[derive(Debug, Default)]
pub struct InMemorySearchBackend {
    records: Vec<OccurrenceRecord>,
    fail_at: Option<u64>,
    fetches: AtomicUsize,
}

impl InMemorySearchBackend {
    /// Serve these records
    pub fn new(records: Vec<OccurrenceRecord>) -> Self {
        Self {
            records,
            fail_at: None,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Make fetches covering `offset` fail with [`Error::Search`]
    pub fn failing_at(mut self, offset: u64) -> Self {
        self.fail_at = Some(offset);
        self
    }

    /// Number of fetch calls served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for InMemorySearchBackend {
    async fn count(&self, _query: &CompiledQuery) -> Result<u64> {
        Ok(self.records.len() as u64)
    }

    async fn fetch(
        &self,
        _query: &CompiledQuery,
        from: u64,
        size: u64,
        _after: Option<&Value>,
    ) -> Result<Vec<OccurrenceRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let page = from..from.saturating_add(size);
        if let Some(offset) = self.fail_at.filter(|offset| page.contains(offset)) {
            return Err(Error::Search(format!("injected failure at offset {offset}")));
        }

        let start = usize::try_from(from).unwrap_or(usize::MAX).min(self.records.len());
        let end = usize::try_from(from.saturating_add(size))
            .unwrap_or(usize::MAX)
            .min(self.records.len());
        Ok(self.records[start..end].to_vec())
    }
}
