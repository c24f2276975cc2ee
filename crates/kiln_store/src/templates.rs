//! Template repository: append-only template revisions, immutable snapshots
//! and the show-version pointers into the snapshot chain.

use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::models::{ResourceKind, ResourceTemplate, ShowVersion, SnapshotId, TemplateId, VersionedEntity};

/// One change applied on top of a snapshot to produce its successor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotChange {
    Add { kind: ResourceKind, template_id: TemplateId },
    Remove { kind: ResourceKind, template_id: TemplateId },
    Replace { kind: ResourceKind, old: TemplateId, new: TemplateId },
}

#[derive(Default)]
struct Inner {
    next_template_id: TemplateId,
    next_snapshot_id: SnapshotId,
    templates: BTreeMap<TemplateId, ResourceTemplate>,
    snapshots: BTreeMap<SnapshotId, VersionedEntity>,
    show_versions: BTreeMap<String, ShowVersion>,
}

/// In-memory template repository.
#[derive(Default)]
pub struct TemplateRepository {
    inner: RwLock<Inner>,
}

/// Read `metadata.name` out of a template body, if the body parses.
pub fn derive_name(body: &str) -> Option<String> {
    let doc: serde_json::Value = serde_yaml::from_str(body).ok()?;
    doc.pointer("/metadata/name")
        .and_then(|n| n.as_str())
        .map(String::from)
}

impl TemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the first revision of a template.
    pub fn save_template(&self, kind: ResourceKind, body: impl Into<String>) -> ResourceTemplate {
        let body = body.into();
        let name = derive_name(&body).unwrap_or_default();
        let mut inner = self.inner.write();
        inner.next_template_id += 1;
        let template = ResourceTemplate {
            id: inner.next_template_id,
            kind,
            name,
            body,
            created_at: Utc::now(),
            superseded_by: None,
        };
        debug!("Saved {} template {} ({})", kind, template.name, template.id);
        inner.templates.insert(template.id, template.clone());
        template
    }

    /// Store a new revision of `previous`. The old row is kept and marked as
    /// superseded by the new one.
    pub fn revise_template(
        &self,
        previous: TemplateId,
        body: impl Into<String>,
    ) -> StoreResult<ResourceTemplate> {
        let body = body.into();
        let mut inner = self.inner.write();
        let old = inner
            .templates
            .get(&previous)
            .cloned()
            .ok_or_else(|| StoreError::not_found("ResourceTemplate", previous))?;

        let name = derive_name(&body).unwrap_or_else(|| {
            warn!("Template {} revision has no readable metadata.name, keeping '{}'", previous, old.name);
            old.name.clone()
        });

        inner.next_template_id += 1;
        let template = ResourceTemplate {
            id: inner.next_template_id,
            kind: old.kind,
            name,
            body,
            created_at: Utc::now(),
            superseded_by: None,
        };
        inner.templates.insert(template.id, template.clone());
        if let Some(row) = inner.templates.get_mut(&previous) {
            row.superseded_by = Some(template.id);
        }
        Ok(template)
    }

    /// Insert a template with a known id, as read back from a workspace file.
    pub fn import_template(&self, mut template: ResourceTemplate) {
        if template.name.is_empty() {
            template.name = derive_name(&template.body).unwrap_or_default();
        }
        let mut inner = self.inner.write();
        inner.next_template_id = inner.next_template_id.max(template.id);
        inner.templates.insert(template.id, template);
    }

    pub fn get_template(&self, id: TemplateId) -> StoreResult<ResourceTemplate> {
        self.inner
            .read()
            .templates
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("ResourceTemplate", id))
    }

    /// Every revision leading up to `id`, oldest first.
    pub fn revisions(&self, id: TemplateId) -> StoreResult<Vec<ResourceTemplate>> {
        let inner = self.inner.read();
        let latest = inner
            .templates
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("ResourceTemplate", id))?;
        let mut cursor = latest.id;
        let mut chain = vec![latest];
        loop {
            let previous = inner
                .templates
                .values()
                .find(|t| t.superseded_by == Some(cursor))
                .cloned();
            match previous {
                Some(prev) => {
                    cursor = prev.id;
                    chain.push(prev);
                }
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    pub fn templates(&self) -> Vec<ResourceTemplate> {
        self.inner.read().templates.values().cloned().collect()
    }

    fn check_entity_map(
        inner: &Inner,
        entity_map: &BTreeMap<ResourceKind, Vec<TemplateId>>,
    ) -> StoreResult<()> {
        for (kind, ids) in entity_map {
            for id in ids {
                match inner.templates.get(id) {
                    Some(t) if t.kind == *kind => {}
                    _ => {
                        return Err(StoreError::not_found(
                            "ResourceTemplate",
                            format!("{}/{}", kind, id),
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    /// Create a snapshot of a template group.
    pub fn create_snapshot(
        &self,
        template_group_id: impl Into<String>,
        entity_map: BTreeMap<ResourceKind, Vec<TemplateId>>,
        parent_snapshot_id: Option<SnapshotId>,
    ) -> StoreResult<VersionedEntity> {
        let mut inner = self.inner.write();
        Self::check_entity_map(&inner, &entity_map)?;
        if let Some(parent) = parent_snapshot_id {
            if !inner.snapshots.contains_key(&parent) {
                return Err(StoreError::not_found("VersionedEntity", parent));
            }
        }

        inner.next_snapshot_id += 1;
        let snapshot = VersionedEntity {
            id: inner.next_snapshot_id,
            template_group_id: template_group_id.into(),
            entity_map,
            parent_snapshot_id,
            created_at: Utc::now(),
        };
        info!(
            "Created snapshot {} for group {}",
            snapshot.id, snapshot.template_group_id
        );
        inner.snapshots.insert(snapshot.id, snapshot.clone());
        Ok(snapshot)
    }

    /// Insert a snapshot with a known id, as read back from a workspace file.
    pub fn import_snapshot(&self, snapshot: VersionedEntity) -> StoreResult<()> {
        let mut inner = self.inner.write();
        Self::check_entity_map(&inner, &snapshot.entity_map)?;
        inner.next_snapshot_id = inner.next_snapshot_id.max(snapshot.id);
        inner.snapshots.insert(snapshot.id, snapshot);
        Ok(())
    }

    /// Apply `changes` to `base`, producing a new snapshot chained to it.
    /// `base` itself is never modified.
    pub fn edit_snapshot(
        &self,
        base: SnapshotId,
        changes: &[SnapshotChange],
    ) -> StoreResult<VersionedEntity> {
        let base_snapshot = self.get_snapshot(base)?;
        let mut entity_map = base_snapshot.entity_map.clone();

        for change in changes {
            match change {
                SnapshotChange::Add { kind, template_id } => {
                    let ids = entity_map.entry(*kind).or_default();
                    if !ids.contains(template_id) {
                        ids.push(*template_id);
                    }
                }
                SnapshotChange::Remove { kind, template_id } => {
                    if let Some(ids) = entity_map.get_mut(kind) {
                        ids.retain(|id| id != template_id);
                    }
                }
                SnapshotChange::Replace { kind, old, new } => {
                    let ids = entity_map
                        .get_mut(kind)
                        .ok_or_else(|| StoreError::not_found("ResourceTemplate", old))?;
                    let slot = ids
                        .iter_mut()
                        .find(|id| *id == old)
                        .ok_or_else(|| StoreError::not_found("ResourceTemplate", old))?;
                    *slot = *new;
                }
            }
        }
        entity_map.retain(|_, ids| !ids.is_empty());

        self.create_snapshot(base_snapshot.template_group_id, entity_map, Some(base))
    }

    pub fn get_snapshot(&self, id: SnapshotId) -> StoreResult<VersionedEntity> {
        self.inner
            .read()
            .snapshots
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("VersionedEntity", id))
    }

    /// The snapshot and its ancestors, newest first.
    pub fn lineage(&self, id: SnapshotId) -> StoreResult<Vec<SnapshotId>> {
        let inner = self.inner.read();
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let snapshot = inner
                .snapshots
                .get(&current)
                .ok_or_else(|| StoreError::not_found("VersionedEntity", current))?;
            chain.push(current);
            cursor = snapshot.parent_snapshot_id;
        }
        Ok(chain)
    }

    pub fn create_show_version(
        &self,
        name: impl Into<String>,
        snapshot: SnapshotId,
    ) -> StoreResult<ShowVersion> {
        let name = name.into();
        let snapshot = self.get_snapshot(snapshot)?;
        let show = ShowVersion {
            name: name.clone(),
            template_group_id: snapshot.template_group_id,
            current_snapshot_id: snapshot.id,
            revision_history: Vec::new(),
        };
        self.inner.write().show_versions.insert(name, show.clone());
        Ok(show)
    }

    pub fn import_show_version(&self, show: ShowVersion) -> StoreResult<()> {
        self.get_snapshot(show.current_snapshot_id)?;
        self.inner
            .write()
            .show_versions
            .insert(show.name.clone(), show);
        Ok(())
    }

    pub fn get_show_version(&self, name: &str) -> StoreResult<ShowVersion> {
        self.inner
            .read()
            .show_versions
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("ShowVersion", name))
    }

    /// Point a show version at `snapshot`, remembering the previous one.
    pub fn advance(&self, name: &str, snapshot: SnapshotId) -> StoreResult<ShowVersion> {
        self.get_snapshot(snapshot)?;
        let mut inner = self.inner.write();
        let show = inner
            .show_versions
            .get_mut(name)
            .ok_or_else(|| StoreError::not_found("ShowVersion", name))?;
        show.revision_history.push(show.current_snapshot_id);
        show.current_snapshot_id = snapshot;
        Ok(show.clone())
    }

    /// Return a show version to the snapshot it pointed at before the last
    /// `advance`.
    pub fn rollback(&self, name: &str) -> StoreResult<ShowVersion> {
        let mut inner = self.inner.write();
        let show = inner
            .show_versions
            .get_mut(name)
            .ok_or_else(|| StoreError::not_found("ShowVersion", name))?;
        let previous = show
            .revision_history
            .pop()
            .ok_or_else(|| StoreError::NoRevision(name.to_string()))?;
        show.current_snapshot_id = previous;
        Ok(show.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CM: &str = r#"{"kind":"ConfigMap","metadata":{"name":"cm1"},"data":{"k":"v"}}"#;

    #[test]
    fn test_name_follows_body() {
        let repo = TemplateRepository::new();
        let t1 = repo.save_template(ResourceKind::ConfigMap, CM);
        assert_eq!(t1.name, "cm1");

        let t2 = repo
            .revise_template(t1.id, CM.replace("cm1", "cm2"))
            .unwrap();
        assert_eq!(t2.name, "cm2");
        assert_eq!(repo.get_template(t1.id).unwrap().superseded_by, Some(t2.id));

        // unreadable body keeps the previous name
        let t3 = repo.revise_template(t2.id, "{not json").unwrap();
        assert_eq!(t3.name, "cm2");

        let history: Vec<_> = repo.revisions(t3.id).unwrap().iter().map(|t| t.id).collect();
        assert_eq!(history, vec![t1.id, t2.id, t3.id]);
    }

    #[test]
    fn test_edit_snapshot_chains_and_keeps_base() {
        let repo = TemplateRepository::new();
        let a = repo.save_template(ResourceKind::ConfigMap, CM);
        let b = repo.save_template(ResourceKind::ConfigMap, CM.replace("cm1", "cm2"));

        let mut map = BTreeMap::new();
        map.insert(ResourceKind::ConfigMap, vec![a.id]);
        let s1 = repo.create_snapshot("g1", map, None).unwrap();

        let s2 = repo
            .edit_snapshot(
                s1.id,
                &[SnapshotChange::Replace {
                    kind: ResourceKind::ConfigMap,
                    old: a.id,
                    new: b.id,
                }],
            )
            .unwrap();

        assert_eq!(s2.parent_snapshot_id, Some(s1.id));
        assert!(s2.contains(ResourceKind::ConfigMap, b.id));
        assert!(repo.get_snapshot(s1.id).unwrap().contains(ResourceKind::ConfigMap, a.id));
        assert_eq!(repo.lineage(s2.id).unwrap(), vec![s2.id, s1.id]);
    }

    #[test]
    fn test_snapshot_rejects_wrong_kind() {
        let repo = TemplateRepository::new();
        let a = repo.save_template(ResourceKind::ConfigMap, CM);
        let mut map = BTreeMap::new();
        map.insert(ResourceKind::Secret, vec![a.id]);
        assert!(repo.create_snapshot("g1", map, None).is_err());
    }

    #[test]
    fn test_show_version_advance_and_rollback() {
        let repo = TemplateRepository::new();
        let a = repo.save_template(ResourceKind::ConfigMap, CM);
        let mut map = BTreeMap::new();
        map.insert(ResourceKind::ConfigMap, vec![a.id]);
        let s1 = repo.create_snapshot("g1", map, None).unwrap();
        let s2 = repo
            .edit_snapshot(s1.id, &[SnapshotChange::Remove { kind: ResourceKind::ConfigMap, template_id: a.id }])
            .unwrap();
        assert!(s2.entity_map.is_empty());

        repo.create_show_version("v1", s1.id).unwrap();
        let show = repo.advance("v1", s2.id).unwrap();
        assert_eq!(show.current_snapshot_id, s2.id);
        assert_eq!(show.revision_history, vec![s1.id]);

        let show = repo.rollback("v1").unwrap();
        assert_eq!(show.current_snapshot_id, s1.id);
        assert!(matches!(repo.rollback("v1"), Err(StoreError::NoRevision(_))));
    }
}
