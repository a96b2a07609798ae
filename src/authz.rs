//! Request authorization against a scope.
//!
//! Inspects the upstream URL path (after the version segment) and decides
//! whether the call is admitted, denied, or needs its response filtered.
//! Decisions are method-agnostic; the path alone carries the resource.

use crate::scope::Scope;

/// Outcome of authorizing one request path against a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Path is admitted as-is; the proxy is transparent for it
    Allow,
    /// Path targets a specific resource outside the scope
    Deny(String),
    /// Path addresses a collection; the response must be filtered
    FilterCollection,
}

/// Collection suffixes whose responses are filtered element-wise.
const COLLECTION_SEGMENTS: &[&str] = &["rooms", "places", "calendars"];

/// Decide whether `path` is admitted under `scope`.
///
/// `path` is the percent-decoded remainder after the version segment, with or
/// without a leading slash. Comparison is case-insensitive throughout.
#[must_use]
pub fn decide(path: &str, scope: &Scope) -> Decision {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some(first) = segments.first() else {
        return Decision::Allow;
    };

    // users/{X}/… and calendars/{X}/… put a single resource under test
    if (first.eq_ignore_ascii_case("users") || first.eq_ignore_ascii_case("calendars"))
        && segments.len() >= 2
    {
        let candidate = segments[1];
        return if scope.contains_identifier(candidate) {
            Decision::Allow
        } else {
            Decision::Deny(candidate.to_string())
        };
    }

    // Trailing collection segment, or a type-cast directly under one
    // (e.g. places/microsoft.graph.room)
    let last = segments[segments.len() - 1];
    if is_collection_segment(last) {
        return Decision::FilterCollection;
    }
    if segments.len() >= 2
        && last.to_ascii_lowercase().starts_with("microsoft.graph.")
        && is_collection_segment(segments[segments.len() - 2])
    {
        return Decision::FilterCollection;
    }

    // Transparent for out-of-model endpoints
    Decision::Allow
}

fn is_collection_segment(segment: &str) -> bool {
    COLLECTION_SEGMENTS
        .iter()
        .any(|c| segment.eq_ignore_ascii_case(c))
}
