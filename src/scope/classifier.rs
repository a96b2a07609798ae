//! Resource classification.
//!
//! Maps a raw directory member record to a typed [`Resource`], or rejects it.
//! Classification is a deterministic, case-insensitive substring scan over
//! the member's display name and mail; it never fails, malformed input is a
//! rejection.

use std::sync::LazyLock;

use regex::Regex;

use super::{Resource, ResourceKind, ScopePolicy};
use crate::upstream::MemberRecord;

const EQUIPMENT_KEYWORDS: &[&str] = &["equipment", "projector", "device", "camera", "tv", "screen"];
const ROOM_KEYWORDS: &[&str] = &["room", "meeting", "conference", "boardroom", "meetingroom"];
const WORKSPACE_KEYWORDS: &[&str] = &["workspace", "desk", "office", "workstation"];

static CAPACITY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)cap:?\s*(\d+)",
        r"(?i)capacity:?\s*(\d+)",
        r"(?i)(\d+)\s*people?",
        r"(?i)(\d+)[-\s]*person",
        r"(?i)seats?[-\s]*(\d+)",
        r"(?i)(\d+)[-\s]*seat",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("capacity pattern"))
    .collect()
});

static LOCATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Trailing parenthesized hint: "Board Room (Building 2)"
        r"\(([^)]+)\)\s*$",
        // Trailing dash hint: "Room A - North Wing"
        r"-\s*([^-]+?)\s*$",
        r"(?i)\broom\s+([A-Za-z0-9.]+)",
        r"(?i)\bbuilding\s+([A-Za-z0-9.]+)",
        r"(?i)\bfloor\s+([A-Za-z0-9.]+)",
        r"(?i)\blevel\s+([A-Za-z0-9.]+)",
        r"(?i)\b([A-Za-z0-9.]+)\s+building\b",
        r"(?i)\b(\d+(?:st|nd|rd|th)\s+floor)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("location pattern"))
    .collect()
});

/// Classify a directory member into a typed resource.
///
/// Returns `None` when the member has no usable mail address. The Generic
/// fallback preserves the historical "assume room" default when generic
/// resources are disabled; admission against `allowed_place_types` is the
/// caller's responsibility.
#[must_use]
pub fn classify(member: &MemberRecord, policy: &ScopePolicy) -> Option<Resource> {
    let mail = member.mail.as_deref().map(str::trim).unwrap_or_default();
    if mail.is_empty() {
        return None;
    }
    let mail = mail.to_lowercase();
    let display_name = member.display_name.as_deref().map(str::trim);

    let haystack = format!(
        "{} {}",
        display_name.unwrap_or_default().to_lowercase(),
        mail
    );

    let mut kind = scan_kind(&haystack);
    if kind == ResourceKind::Generic && !policy.allow_generic_resources {
        kind = ResourceKind::Room;
    }

    Some(Resource {
        id: member.id.clone(),
        mail: Some(mail),
        kind,
        display_name: display_name.map(str::to_string),
        capacity: display_name.and_then(extract_capacity),
        location: display_name.and_then(extract_location),
    })
}

/// Whether a classified kind is admitted under the configured place types.
#[must_use]
pub fn is_admissible(kind: ResourceKind, policy: &ScopePolicy) -> bool {
    policy.allowed_place_types.contains(&kind)
}

fn scan_kind(haystack: &str) -> ResourceKind {
    let hit = |keywords: &[&str]| keywords.iter().any(|k| haystack.contains(k));
    if hit(EQUIPMENT_KEYWORDS) {
        ResourceKind::Equipment
    } else if hit(ROOM_KEYWORDS) {
        ResourceKind::Room
    } else if hit(WORKSPACE_KEYWORDS) {
        ResourceKind::Workspace
    } else {
        ResourceKind::Generic
    }
}

/// First capacity pattern that matches wins.
fn extract_capacity(display_name: &str) -> Option<u32> {
    for re in CAPACITY_PATTERNS.iter() {
        if let Some(caps) = re.captures(display_name) {
            if let Ok(n) = caps[1].parse() {
                return Some(n);
            }
        }
    }
    None
}

/// First location pattern that matches wins; original case is preserved.
fn extract_location(display_name: &str) -> Option<String> {
    for re in LOCATION_PATTERNS.iter() {
        if let Some(caps) = re.captures(display_name) {
            let hit = caps[1].trim();
            if !hit.is_empty() {
                return Some(hit.to_string());
            }
        }
    }
    None
}
