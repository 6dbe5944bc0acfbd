//! Change detection between resource snapshots

use crate::state::Resource;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Type of change observed for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Resource appeared since the last snapshot
    Created,
    /// Resource exists in both snapshots with a different status
    Updated,
    /// Resource disappeared since the last snapshot
    Deleted,
    /// Full listing (not a diff result)
    List,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
            ChangeType::List => "list",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single detected change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub change_type: ChangeType,

    /// The resource as currently known (the cached copy for deletions)
    pub resource: Resource,

    /// Status before the change, set for updates only
    pub previous_status: Option<String>,
}

impl Change {
    pub fn resource_id(&self) -> &str {
        &self.resource.id
    }

    /// Event payload describing this change
    pub fn payload(&self) -> serde_json::Value {
        let r = &self.resource;
        match self.change_type {
            ChangeType::Deleted => serde_json::json!({
                "id": r.id,
                "name": r.name,
            }),
            ChangeType::Updated => serde_json::json!({
                "id": r.id,
                "name": r.name,
                "old_status": self.previous_status,
                "new_status": r.status,
                "region": r.region,
                "attributes": r.attributes,
            }),
            ChangeType::Created | ChangeType::List => serde_json::json!({
                "id": r.id,
                "name": r.name,
                "status": r.status,
                "region": r.region,
                "attributes": r.attributes,
            }),
        }
    }
}

/// All changes between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    /// Get changes by type
    pub fn by_type(&self, change_type: ChangeType) -> Vec<&Change> {
        self.changes
            .iter()
            .filter(|c| c.change_type == change_type)
            .collect()
    }

    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            created: self.by_type(ChangeType::Created).len(),
            updated: self.by_type(ChangeType::Updated).len(),
            deleted: self.by_type(ChangeType::Deleted).len(),
        }
    }
}

impl IntoIterator for ChangeSet {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Summary of detected changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl std::fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted",
            self.created, self.updated, self.deleted
        )
    }
}

/// Diff a cached snapshot against a fresh fetch, keyed by resource ID
///
/// Created and updated changes follow the order of `current`, deleted changes
/// the order of `cached`. Only a status difference counts as an update. When an
/// ID occurs more than once in an input, the last occurrence wins.
pub fn detect_changes(cached: &[Resource], current: &[Resource]) -> ChangeSet {
    let cached_by_id: HashMap<&str, &Resource> =
        cached.iter().map(|r| (r.id.as_str(), r)).collect();
    let current_by_id: HashMap<&str, &Resource> =
        current.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut changes = Vec::new();
    let mut seen = HashSet::new();

    for resource in current {
        let id = resource.id.as_str();
        if !seen.insert(id) {
            continue;
        }
        let latest = current_by_id[id];
        match cached_by_id.get(id) {
            None => changes.push(Change {
                change_type: ChangeType::Created,
                resource: latest.clone(),
                previous_status: None,
            }),
            Some(previous) if previous.status != latest.status => changes.push(Change {
                change_type: ChangeType::Updated,
                resource: latest.clone(),
                previous_status: Some(previous.status.clone()),
            }),
            Some(_) => {}
        }
    }

    let mut seen_deleted = HashSet::new();
    for resource in cached {
        let id = resource.id.as_str();
        if current_by_id.contains_key(id) || !seen_deleted.insert(id) {
            continue;
        }
        changes.push(Change {
            change_type: ChangeType::Deleted,
            resource: cached_by_id[id].clone(),
            previous_status: None,
        });
    }

    ChangeSet { changes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(id: &str, status: &str) -> Resource {
        Resource::new(id, status)
    }

    #[test]
    fn test_status_change_and_new_resource() {
        let cached = vec![r("c1", "ACTIVE")];
        let current = vec![r("c1", "UPDATING"), r("c2", "ACTIVE")];

        let changes = detect_changes(&cached, &current);
        let summary = changes.summary();

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.deleted, 0);

        let updated = changes.by_type(ChangeType::Updated);
        assert_eq!(updated[0].resource_id(), "c1");
        assert_eq!(updated[0].previous_status.as_deref(), Some("ACTIVE"));
        assert_eq!(updated[0].resource.status, "UPDATING");
        assert_eq!(changes.by_type(ChangeType::Created)[0].resource_id(), "c2");
    }

    #[test]
    fn test_deleted_resource() {
        let cached = vec![r("c1", "ACTIVE"), r("c2", "ACTIVE")];
        let current = vec![r("c2", "ACTIVE")];

        let changes = detect_changes(&cached, &current);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.changes[0].change_type, ChangeType::Deleted);
        assert_eq!(changes.changes[0].resource_id(), "c1");
    }

    #[test]
    fn test_identical_snapshots_yield_nothing() {
        let snapshot = vec![r("a", "ACTIVE"), r("b", "STOPPED")];
        assert!(detect_changes(&snapshot, &snapshot).is_empty());
        assert!(detect_changes(&[], &[]).is_empty());
    }

    #[test]
    fn test_non_status_fields_are_not_updates() {
        let cached = vec![r("a", "ACTIVE").with_name("old")];
        let current = vec![
            r("a", "ACTIVE")
                .with_name("new")
                .with_attribute("version", serde_json::json!("1.30")),
        ];
        assert!(detect_changes(&cached, &current).is_empty());
    }

    #[test]
    fn test_every_id_classified_exactly_once() {
        let cached: Vec<Resource> = (0..20)
            .filter(|i| i % 3 != 0)
            .map(|i| r(&format!("r{i}"), if i % 2 == 0 { "ACTIVE" } else { "STOPPED" }))
            .collect();
        let current: Vec<Resource> = (0..20)
            .filter(|i| i % 4 != 0)
            .map(|i| r(&format!("r{i}"), "ACTIVE"))
            .collect();

        let changes = detect_changes(&cached, &current);

        let cached_ids: HashSet<&str> = cached.iter().map(|r| r.id.as_str()).collect();
        let current_ids: HashSet<&str> = current.iter().map(|r| r.id.as_str()).collect();

        let mut expected_created: Vec<&str> =
            current_ids.difference(&cached_ids).copied().collect();
        let mut expected_deleted: Vec<&str> =
            cached_ids.difference(&current_ids).copied().collect();
        let mut expected_updated: Vec<&str> = cached
            .iter()
            .filter(|c| current.iter().any(|n| n.id == c.id && n.status != c.status))
            .map(|c| c.id.as_str())
            .collect();

        let ids_of = |t: ChangeType| {
            let mut ids: Vec<&str> = changes.by_type(t).iter().map(|c| c.resource_id()).collect();
            ids.sort();
            ids
        };

        expected_created.sort();
        expected_deleted.sort();
        expected_updated.sort();

        assert_eq!(ids_of(ChangeType::Created), expected_created);
        assert_eq!(ids_of(ChangeType::Deleted), expected_deleted);
        assert_eq!(ids_of(ChangeType::Updated), expected_updated);
        assert_eq!(
            changes.len(),
            expected_created.len() + expected_deleted.len() + expected_updated.len()
        );
    }

    #[test]
    fn test_duplicate_ids_emit_once() {
        let cached = vec![r("a", "ACTIVE")];
        let current = vec![r("b", "ACTIVE"), r("b", "ACTIVE"), r("a", "ACTIVE")];
        let changes = detect_changes(&cached, &current);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.changes[0].resource_id(), "b");
    }

    #[test]
    fn test_payload_shapes() {
        let changes = detect_changes(&[r("a", "ACTIVE")], &[r("a", "DELETING")]);
        let payload = changes.changes[0].payload();
        assert_eq!(payload["old_status"], "ACTIVE");
        assert_eq!(payload["new_status"], "DELETING");

        let deleted = detect_changes(&[r("gone", "ACTIVE")], &[]);
        let payload = deleted.changes[0].payload();
        assert_eq!(payload["id"], "gone");
        assert!(payload.get("status").is_none());
    }

    #[test]
    fn test_summary_display() {
        let summary = ChangeSummary {
            created: 2,
            updated: 1,
            deleted: 0,
        };
        assert_eq!(summary.to_string(), "2 created, 1 updated, 0 deleted");
    }
}
