//! Scope domain model.
//!
//! A [`Scope`] is the materialized, immutable set of [`Resource`]s admissible
//! for one token. Resources exist only inside a scope; a refresh produces a
//! new scope rather than mutating an existing one.

pub mod builder;
pub mod cache;
pub mod classifier;

pub use builder::ScopeBuilder;
pub use cache::{InMemoryScopeStore, ScopeStore};
pub use classifier::classify;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Admission policy applied while materializing a scope.
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    /// Kinds admitted into a scope
    pub allowed_place_types: Vec<ResourceKind>,
    /// Keep Generic classifications instead of falling back to Room
    pub allow_generic_resources: bool,
    /// Hard cap on scope size; excess is truncated in enumeration order
    pub max_scope_size: usize,
    /// Enrich resources from the upstream Places catalogue
    pub use_places_api: bool,
}

/// Classified resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Bookable meeting room
    Room,
    /// Desk or other workspace
    Workspace,
    /// Projector, camera, or similar bookable device
    Equipment,
    /// Mailbox with no recognizable classification keywords
    Generic,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Room => "room",
            Self::Workspace => "workspace",
            Self::Equipment => "equipment",
            Self::Generic => "generic",
        };
        f.write_str(s)
    }
}

/// A single admissible target mailbox/room.
///
/// At least one of `id` and `mail` is non-empty; both identify the resource
/// for matching. `mail` is stored lowercase. `display_name`, `capacity`, and
/// `location` are advisory and never used for access decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Opaque directory identifier, compared case-insensitively
    pub id: String,
    /// Normalized (lowercase, trimmed) mail address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail: Option<String>,
    /// Classified kind
    pub kind: ResourceKind,
    /// Display name as reported by the directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Seat capacity, if it could be extracted or supplemented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    /// Location hint, if it could be extracted or supplemented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Resource {
    /// Case-insensitive match of a URL segment or payload identifier against
    /// this resource's `id` or `mail`.
    #[must_use]
    pub fn matches_identifier(&self, candidate: &str) -> bool {
        if !self.id.is_empty() && self.id.eq_ignore_ascii_case(candidate) {
            return true;
        }
        self.mail
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(candidate))
    }
}

/// The materialized permission list backing one token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    /// Directory group whose membership produced this scope
    pub group_id: String,
    /// Admitted resources, deduplicated by `(id, mail)`
    pub resources: Vec<Resource>,
    /// When the scope was materialized
    pub created_at: DateTime<Utc>,
    /// When the scope ceases to be valid
    pub expires_at: DateTime<Utc>,
}

impl Scope {
    /// Number of resources in this scope.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Whether any resource in the scope matches `candidate` by id or mail.
    #[must_use]
    pub fn contains_identifier(&self, candidate: &str) -> bool {
        self.resources
            .iter()
            .any(|r| r.matches_identifier(candidate))
    }
}
