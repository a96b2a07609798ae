//! Response filtering for collection payloads.
//!
//! A pure rewrite of an upstream JSON body against a scope: collection
//! elements that do not belong to the caller's scope are removed, everything
//! else is left byte-for-byte intact. The filter never errors; bodies it
//! cannot parse pass through unmodified.

use serde_json::{Map, Value, json};

use crate::scope::Scope;

/// Filter an upstream response body against a scope.
///
/// Returns `None` when the body is not JSON it knows how to filter, in which
/// case it must be passed through unmodified. Otherwise returns the rewritten
/// body bytes.
#[must_use]
pub fn filter_body(body: &[u8], scope: &Scope) -> Option<Vec<u8>> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let Value::Object(object) = value else {
        // A bare array or scalar is not an OData payload; leave it alone.
        return None;
    };

    let rewritten = match object.get("value") {
        Some(Value::Array(_)) => filter_collection(object, scope),
        _ => {
            if object_in_scope(&object, scope) {
                Value::Object(object)
            } else {
                json!({})
            }
        }
    };

    serde_json::to_vec(&rewritten).ok()
}

/// Rewrite the `value` array in place; all other top-level properties
/// (including `@odata.nextLink`) are preserved untouched.
fn filter_collection(mut object: Map<String, Value>, scope: &Scope) -> Value {
    if let Some(Value::Array(elements)) = object.remove("value") {
        let kept: Vec<Value> = elements
            .into_iter()
            .filter(|element| element_in_scope(element, scope))
            .collect();
        object.insert("value".to_string(), Value::Array(kept));
    }
    Value::Object(object)
}

fn element_in_scope(element: &Value, scope: &Scope) -> bool {
    match element {
        Value::Object(map) => object_in_scope(map, scope),
        _ => false,
    }
}

/// Candidate identifiers, in extraction order: `id`, `emailAddress.address`,
/// `mail`, `userPrincipalName`. The object is in scope if at least one
/// candidate matches a resource by id or mail.
fn object_in_scope(map: &Map<String, Value>, scope: &Scope) -> bool {
    candidate_identifiers(map)
        .into_iter()
        .any(|candidate| scope.contains_identifier(candidate))
}

fn candidate_identifiers(map: &Map<String, Value>) -> Vec<&str> {
    let mut candidates = Vec::new();
    if let Some(id) = map.get("id").and_then(Value::as_str) {
        candidates.push(id);
    }
    if let Some(address) = map
        .get("emailAddress")
        .and_then(|v| v.get("address"))
        .and_then(Value::as_str)
    {
        candidates.push(address);
    }
    if let Some(mail) = map.get("mail").and_then(Value::as_str) {
        candidates.push(mail);
    }
    if let Some(upn) = map.get("userPrincipalName").and_then(Value::as_str) {
        candidates.push(upn);
    }
    candidates
}
