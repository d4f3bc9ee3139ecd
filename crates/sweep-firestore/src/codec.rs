//! Request and response bodies for the Firestore REST v1 API
//!
//! Only the handful of shapes the sweep needs: an ordered collection query,
//! single-field writes, and the error envelope.

use chrono::SecondsFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sweep_core::{DocumentRef, DocumentSnapshot, FieldPath, FieldValue, StoreError};

static SIMPLE_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[_a-zA-Z][_a-zA-Z0-9]*$").expect("valid regex"));

/// Encode a field path, backtick-quoting segments that are not plain identifiers
#[must_use]
pub fn encode_field_path(field: &FieldPath) -> String {
    field
        .segments()
        .iter()
        .map(|seg| {
            if SIMPLE_SEGMENT.is_match(seg) {
                seg.clone()
            } else {
                format!("`{}`", seg.replace('\\', "\\\\").replace('`', "\\`"))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Body of a `runQuery` request: one page ordered by document name
#[must_use]
pub fn run_query_body(collection: &str, after: Option<&DocumentRef>, limit: usize) -> Value {
    let mut query = json!({
        "from": [{ "collectionId": collection }],
        "orderBy": [{
            "field": { "fieldPath": "__name__" },
            "direction": "ASCENDING"
        }],
        "limit": limit,
    });

    if let Some(cursor) = after {
        query["startAt"] = json!({
            "values": [{ "referenceValue": cursor.path() }],
            "before": false,
        });
    }

    json!({ "structuredQuery": query })
}

/// One `Write` updating only `field` on an existing document
#[must_use]
pub fn field_write(doc: &DocumentRef, field: &FieldPath, value: FieldValue) -> Value {
    let field_path = encode_field_path(field);

    match value {
        FieldValue::Increment(by) => json!({
            "transform": {
                "document": doc.path(),
                "fieldTransforms": [{
                    "fieldPath": field_path,
                    "increment": { "integerValue": by.to_string() },
                }],
            },
            "currentDocument": { "exists": true },
        }),
        FieldValue::Timestamp(ts) => {
            let leaf = json!({
                "timestampValue": ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
            });
            json!({
                "update": {
                    "name": doc.path(),
                    "fields": nest(field.segments(), leaf),
                },
                "updateMask": { "fieldPaths": [field_path] },
                "currentDocument": { "exists": true },
            })
        }
    }
}

/// Wrap `leaf` in `mapValue`s so it sits at `segments` inside a document
fn nest(segments: &[String], leaf: Value) -> Value {
    let Some((last, parents)) = segments.split_last() else {
        return Value::Object(Map::new());
    };

    let mut fields = Map::new();
    fields.insert(last.clone(), leaf);

    for segment in parents.iter().rev() {
        let mut outer = Map::new();
        outer.insert(
            segment.clone(),
            json!({ "mapValue": { "fields": Value::Object(fields) } }),
        );
        fields = outer;
    }

    Value::Object(fields)
}

#[derive(Debug, Deserialize)]
struct QueryResponseItem {
    document: Option<QueryDocument>,
}

#[derive(Debug, Deserialize)]
struct QueryDocument {
    name: String,
    #[serde(default)]
    fields: Value,
}

/// Decode a `runQuery` response stream into snapshots
///
/// # Errors
/// Returns `StoreError::Decode` if the body is not a query response array
pub fn decode_query_response(body: &str) -> Result<Vec<DocumentSnapshot>, StoreError> {
    let items: Vec<QueryResponseItem> =
        serde_json::from_str(body).map_err(|e| StoreError::Decode(e.to_string()))?;

    Ok(items
        .into_iter()
        .filter_map(|item| item.document)
        .map(|doc| DocumentSnapshot::new(DocumentRef::new(doc.name), doc.fields))
        .collect())
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Map an HTTP error response to a store error
#[must_use]
pub fn decode_error(http_status: u16, body: &str, target: &str) -> StoreError {
    let (status, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.status, envelope.error.message),
        Err(_) => (String::new(), body.trim().to_string()),
    };

    match (http_status, status.as_str()) {
        (_, "NOT_FOUND") | (404, "") => StoreError::NotFound(target.to_string()),
        (_, "ABORTED") | (409, "") => StoreError::Aborted(message),
        (_, "UNAVAILABLE" | "DEADLINE_EXCEEDED") | (502..=504, "") => {
            StoreError::Transport(format!("{http_status}: {message}"))
        }
        (_, "") => StoreError::Rejected {
            status: http_status.to_string(),
            message,
        },
        (_, name) => StoreError::Rejected {
            status: name.to_string(),
            message,
        },
    }
}
