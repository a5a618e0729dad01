//! Structured (JSON) query rendering
//!
//! ```json
//! {"query":{"bool":{"must_not":[{"bool":{"must":[
//!     {"match":{"CATALOG_NUMBER":"value_1"}},
//!     {"match":{"INSTITUTION_CODE":"value_2"}}
//! ]}}]}}}
//! ```

use super::{Clause, FieldMapping, Occur};
use crate::predicate::SearchParameter;
use serde_json::{Map, Value, json};

/// Render a clause tree as a full query document
///
/// A boolean root becomes the root `bool`; a leaf root is wrapped in a `must`
/// array.
pub fn render(root: &Clause, fields: &FieldMapping) -> Value {
    let bool_body = match root {
        Clause::Bool { occur, clauses } => bool_body(*occur, clauses, fields),
        leaf => bool_body(Occur::Must, std::slice::from_ref(leaf), fields),
    };
    json!({ "query": { "bool": bool_body } })
}

fn bool_body(occur: Occur, clauses: &[Clause], fields: &FieldMapping) -> Value {
    let rendered: Vec<Value> = clauses.iter().map(|c| clause(c, fields)).collect();
    let mut body = Map::new();
    body.insert(occur.key().to_string(), Value::Array(rendered));
    Value::Object(body)
}

/// Render one nested clause
fn clause(clause: &Clause, fields: &FieldMapping) -> Value {
    match clause {
        Clause::Bool { occur, clauses } => json!({ "bool": bool_body(*occur, clauses, fields) }),
        Clause::Match { field, value } => single("match", fields.document_name(*field), json!(value)),
        Clause::Wildcard { field, pattern } => {
            single("wildcard", fields.document_name(*field), json!(pattern))
        }
        Clause::Range { field, op, value } => single(
            "range",
            fields.document_name(*field),
            single_value(op.key(), json!(value)),
        ),
        Clause::Terms { field, values } => {
            single("terms", fields.document_name(*field), json!(values))
        }
        Clause::Exists { field } => json!({ "exists": { "field": fields.document_name(*field) } }),
        Clause::GeoBoundingBox { envelope } => single(
            "geo_bounding_box",
            fields.document_name(SearchParameter::Geometry),
            json!({
                "top_left": { "lat": envelope.max_lat, "lon": envelope.min_lon },
                "bottom_right": { "lat": envelope.min_lat, "lon": envelope.max_lon },
            }),
        ),
    }
}

/// `{kind: {field: body}}`
fn single(kind: &str, field: &str, body: Value) -> Value {
    single_value(kind, single_value(field, body))
}

fn single_value(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}
