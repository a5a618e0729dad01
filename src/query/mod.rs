//! Predicate to search query compilation
//!
//! [`QueryCompiler`] walks a [`Predicate`] once into an intermediate clause
//! tree, then renders that tree twice:
//! - [`document`] builds the structured boolean query sent to the search cluster
//! - [`legacy`] builds the equivalent Lucene-style query string, stored with the
//!   download for auditing and for clients that still speak the string syntax
//!
//! Compilation is pure: identical predicates always compile to byte-identical
//! output, and a compiler can be shared across tasks behind an `Arc`.

pub mod document;
mod fields;
pub mod geometry;
pub mod legacy;

pub use fields::{FieldMapping, FieldNames};
pub use geometry::Envelope;

use crate::error::Result;
use crate::predicate::{Predicate, SearchParameter};
use serde::Serialize;
use serde_json::Value;

/// Occurrence of a clause inside a boolean query
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Occur {
    /// Every clause must match
    Must,
    /// At least one clause must match
    Should,
    /// No clause may match
    MustNot,
}

impl Occur {
    /// Key of the clause array in the structured document
    pub fn key(&self) -> &'static str {
        match self {
            Occur::Must => "must",
            Occur::Should => "should",
            Occur::MustNot => "must_not",
        }
    }
}

/// Comparison of a range clause
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeOp {
    /// Strictly greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// Strictly less than
    Lt,
    /// Less than or equal
    Lte,
}

impl RangeOp {
    /// Operator key in the structured document
    pub fn key(&self) -> &'static str {
        match self {
            RangeOp::Gt => "gt",
            RangeOp::Gte => "gte",
            RangeOp::Lt => "lt",
            RangeOp::Lte => "lte",
        }
    }
}

/// Intermediate clause tree shared by both renderers
#[derive(Clone, Debug, PartialEq)]
pub enum Clause {
    /// Boolean combination of sub-clauses
    Bool {
        /// How the sub-clauses combine
        occur: Occur,
        /// Sub-clauses, in predicate order
        clauses: Vec<Clause>,
    },
    /// Exact value match
    Match {
        /// Tested parameter
        field: SearchParameter,
        /// Expected value
        value: String,
    },
    /// Wildcard pattern match
    Wildcard {
        /// Tested parameter
        field: SearchParameter,
        /// Pattern with `*` and `?`
        pattern: String,
    },
    /// One-sided range
    Range {
        /// Tested parameter
        field: SearchParameter,
        /// Comparison
        op: RangeOp,
        /// Bound
        value: String,
    },
    /// Membership in a value list
    Terms {
        /// Tested parameter
        field: SearchParameter,
        /// Accepted values
        values: Vec<String>,
    },
    /// The field has a value
    Exists {
        /// Tested parameter
        field: SearchParameter,
    },
    /// The record coordinate lies in a bounding box
    GeoBoundingBox {
        /// The box
        envelope: Envelope,
    },
}

/// A compiled predicate, ready to send to the search backend
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompiledQuery {
    document: Value,
    query_string: String,
}

impl CompiledQuery {
    /// The full structured document: `{"query": {"bool": {...}}}`
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// The query clause alone (the value under the `query` key)
    pub fn query_clause(&self) -> &Value {
        &self.document["query"]
    }

    /// The equivalent legacy query string
    pub fn query_string(&self) -> &str {
        &self.query_string
    }
}

/// Stateless predicate compiler
#[derive(Clone, Debug, Default)]
pub struct QueryCompiler {
    fields: FieldMapping,
}

impl QueryCompiler {
    /// Create a compiler with the standard field mapping
    pub fn new() -> Self {
        Self {
            fields: FieldMapping::new(),
        }
    }

    /// Field mapping used by this compiler
    pub fn fields(&self) -> &FieldMapping {
        &self.fields
    }

    /// Compile a predicate
    ///
    /// Fails with [`Error::InvalidGeometry`](crate::Error::InvalidGeometry)
    /// when a `within` geometry is malformed or empty.
    pub fn compile(&self, predicate: &Predicate) -> Result<CompiledQuery> {
        let clause = Self::visit(predicate)?;
        Ok(CompiledQuery {
            document: document::render(&clause, &self.fields),
            query_string: legacy::render(&clause, &self.fields),
        })
    }

    /// Translate a predicate into the clause tree
    pub fn visit(predicate: &Predicate) -> Result<Clause> {
        Ok(match predicate {
            Predicate::Conjunction { predicates } => Clause::Bool {
                occur: Occur::Must,
                clauses: Self::visit_all(predicates)?,
            },
            Predicate::Disjunction { predicates } => Clause::Bool {
                occur: Occur::Should,
                clauses: Self::visit_all(predicates)?,
            },
            Predicate::Negation { predicate } => Clause::Bool {
                occur: Occur::MustNot,
                clauses: vec![Self::visit(predicate)?],
            },
            Predicate::Equals { key, value } => Clause::Match {
                field: *key,
                value: value.clone(),
            },
            Predicate::Like { key, value } => Clause::Wildcard {
                field: *key,
                pattern: value.clone(),
            },
            Predicate::GreaterThan { key, value } => range(*key, RangeOp::Gt, value),
            Predicate::GreaterThanOrEquals { key, value } => range(*key, RangeOp::Gte, value),
            Predicate::LessThan { key, value } => range(*key, RangeOp::Lt, value),
            Predicate::LessThanOrEquals { key, value } => range(*key, RangeOp::Lte, value),
            Predicate::In { key, values } => Clause::Terms {
                field: *key,
                values: values.clone(),
            },
            Predicate::IsNotNull { parameter } => Clause::Exists { field: *parameter },
            Predicate::Within { geometry } => Clause::GeoBoundingBox {
                envelope: geometry::envelope(geometry)?,
            },
        })
    }

    fn visit_all(predicates: &[Predicate]) -> Result<Vec<Clause>> {
        predicates.iter().map(Self::visit).collect()
    }
}

fn range(field: SearchParameter, op: RangeOp, value: &str) -> Clause {
    Clause::Range {
        field,
        op,
        value: value.to_string(),
    }
}
