//! Instantiation requests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kiln_store::{ResourceKind, SnapshotId, TemplateId, VersionedEntity};
use serde::{Deserialize, Serialize};

/// Whether generated manifests are only returned or also submitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Preview,
    Apply,
}

/// Template ids selected for compilation, by kind.
pub type Selection = BTreeMap<ResourceKind, Vec<TemplateId>>;

/// Select every template of a snapshot.
pub fn select_all(snapshot: &VersionedEntity) -> Selection {
    snapshot.entity_map.clone()
}

/// One compilation request for a single namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instantiation {
    pub snapshot_id: SnapshotId,
    pub namespace_id: String,
    pub selection: Selection,
    pub mode: Mode,
    pub actor: String,
    /// Fixes the timestamps placed in the context so repeated previews are
    /// identical.
    pub requested_at: DateTime<Utc>,
}

impl Instantiation {
    pub fn new(snapshot_id: SnapshotId, namespace_id: impl Into<String>, mode: Mode) -> Self {
        Self {
            snapshot_id,
            namespace_id: namespace_id.into(),
            selection: Selection::new(),
            mode,
            actor: "system".to_string(),
            requested_at: Utc::now(),
        }
    }

    pub fn select(mut self, kind: ResourceKind, template_id: TemplateId) -> Self {
        let ids = self.selection.entry(kind).or_default();
        if !ids.contains(&template_id) {
            ids.push(template_id);
        }
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn requested_at(mut self, at: DateTime<Utc>) -> Self {
        self.requested_at = at;
        self
    }

    /// Selected (kind, id) pairs in generation order.
    pub fn selected(&self) -> impl Iterator<Item = (ResourceKind, TemplateId)> + '_ {
        self.selection
            .iter()
            .flat_map(|(kind, ids)| ids.iter().map(move |id| (*kind, *id)))
    }
}

/// The same selection compiled into several namespaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiInstantiation {
    pub snapshot_id: SnapshotId,
    pub namespace_ids: Vec<String>,
    pub selection: Selection,
    pub mode: Mode,
    pub actor: String,
    pub requested_at: DateTime<Utc>,
}

impl MultiInstantiation {
    /// Split into one request per namespace.
    pub fn split(&self) -> Vec<Instantiation> {
        self.namespace_ids
            .iter()
            .map(|ns| Instantiation {
                snapshot_id: self.snapshot_id,
                namespace_id: ns.clone(),
                selection: self.selection.clone(),
                mode: self.mode,
                actor: self.actor.clone(),
                requested_at: self.requested_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selected_in_kind_order() {
        let inst = Instantiation::new(1, "ns1", Mode::Preview)
            .select(ResourceKind::Service, 3)
            .select(ResourceKind::Deployment, 1)
            .select(ResourceKind::Deployment, 1);
        let selected: Vec<_> = inst.selected().collect();
        assert_eq!(
            selected,
            vec![(ResourceKind::Deployment, 1), (ResourceKind::Service, 3)]
        );
    }
}
