//! Scope materialization from upstream group membership.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use super::classifier::{classify, is_admissible};
use super::{Resource, Scope, ScopePolicy};
use crate::upstream::{Directory, PlaceRecord};
use crate::Result;

/// Builds scopes by enumerating group members upstream.
///
/// Enumeration is exhaustive modulo the upstream pagination contract; a
/// failed page fails the whole build and nothing is cached. Classification
/// errors on individual members only skip that member.
pub struct ScopeBuilder {
    directory: Arc<dyn Directory>,
    policy: ScopePolicy,
    ttl: Duration,
}

impl ScopeBuilder {
    /// Create a builder over the given directory.
    pub fn new(directory: Arc<dyn Directory>, policy: ScopePolicy, ttl: Duration) -> Self {
        Self {
            directory,
            policy,
            ttl,
        }
    }

    /// Materialize the scope for `group_id`.
    pub async fn build(&self, group_id: &str) -> Result<Scope> {
        let mut resources: Vec<Resource> = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut next_link: Option<String> = None;
        let mut admitted_total = 0usize;

        loop {
            let page = self
                .directory
                .member_page(group_id, next_link.as_deref())
                .await?;

            for member in &page.members {
                let Some(resource) = classify(member, &self.policy) else {
                    continue;
                };
                if !is_admissible(resource.kind, &self.policy) {
                    continue;
                }
                admitted_total += 1;

                let key = (
                    resource.id.to_lowercase(),
                    resource.mail.clone().unwrap_or_default(),
                );
                if !seen.insert(key) {
                    continue;
                }
                resources.push(resource);
            }

            match page.next_link {
                Some(link) => next_link = Some(link),
                None => break,
            }
        }

        if resources.len() > self.policy.max_scope_size {
            warn!(
                group_id = %group_id,
                admitted = admitted_total,
                limit = self.policy.max_scope_size,
                "Scope truncated to configured maximum"
            );
            resources.truncate(self.policy.max_scope_size);
        }

        if self.policy.use_places_api {
            match self.directory.places().await {
                Ok(places) => supplement(&mut resources, &places),
                Err(e) => {
                    warn!(group_id = %group_id, error = %e, "Places supplementation failed, continuing");
                }
            }
        }

        let now = Utc::now();
        let scope = Scope {
            group_id: group_id.to_string(),
            resources,
            created_at: now,
            expires_at: now
                + chrono::Duration::from_std(self.ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(900)),
        };

        debug!(
            group_id = %group_id,
            resources = scope.resource_count(),
            "Scope materialized"
        );

        Ok(scope)
    }
}

/// Enrich already-present resources from the Places catalogue.
///
/// Fills missing display name, capacity, and location only; never adds or
/// removes resources.
fn supplement(resources: &mut [Resource], places: &[PlaceRecord]) {
    for resource in resources.iter_mut() {
        let matched = places.iter().find(|p| {
            resource.matches_identifier(&p.id)
                || p.mail
                    .as_deref()
                    .is_some_and(|m| resource.matches_identifier(m))
        });
        let Some(place) = matched else { continue };

        if resource.display_name.is_none() {
            resource.display_name = place.display_name.clone();
        }
        if resource.capacity.is_none() {
            resource.capacity = place.capacity;
        }
        if resource.location.is_none() {
            resource.location = place.location.clone();
        }
    }
}
