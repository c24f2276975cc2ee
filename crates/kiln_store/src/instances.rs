//! Instance ledger: append-only history of instantiated resources.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::{InstanceKey, InstanceRecord, InstanceState};

/// Records the outcome of every submission, one live row per
/// `(name, namespace, kind)`.
///
/// Rows are never rewritten: a new outcome inserts a row and then marks the
/// previous live row as superseded by it.
#[derive(Default)]
pub struct InstanceLedger {
    rows: RwLock<Vec<InstanceRecord>>,
    live: RwLock<HashMap<InstanceKey, Uuid>>,
}

impl InstanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from previously persisted rows.
    pub fn from_records(records: Vec<InstanceRecord>) -> Self {
        let live = records
            .iter()
            .filter(|r| r.is_live())
            .map(|r| (r.key(), r.id))
            .collect();
        Self {
            rows: RwLock::new(records),
            live: RwLock::new(live),
        }
    }

    /// Append an outcome for `key`, superseding the current live row.
    pub fn upsert(
        &self,
        key: &InstanceKey,
        state: InstanceState,
        manifest: Option<serde_json::Value>,
        message: Option<String>,
    ) -> InstanceRecord {
        let record = InstanceRecord {
            id: Uuid::new_v4(),
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            kind: key.kind,
            state,
            manifest,
            message,
            recorded_at: Utc::now(),
            superseded_by: None,
        };

        let mut rows = self.rows.write();
        let mut live = self.live.write();
        rows.push(record.clone());
        if let Some(previous) = live.insert(key.clone(), record.id) {
            if let Some(old) = rows.iter_mut().find(|r| r.id == previous) {
                old.superseded_by = Some(record.id);
            }
        }
        debug!("Recorded {} as {:?}", key, state);
        record
    }

    /// The live row for `key`, if the resource was ever recorded.
    pub fn current(&self, key: &InstanceKey) -> Option<InstanceRecord> {
        let id = *self.live.read().get(key)?;
        self.rows.read().iter().find(|r| r.id == id).cloned()
    }

    /// All rows for `key` in insertion order.
    pub fn history(&self, key: &InstanceKey) -> Vec<InstanceRecord> {
        self.rows
            .read()
            .iter()
            .filter(|r| &r.key() == key)
            .cloned()
            .collect()
    }

    /// Record that the resource was removed outside of kiln.
    pub fn mark_deleted_externally(&self, key: &InstanceKey) -> Option<InstanceRecord> {
        let current = self.current(key)?;
        Some(self.upsert(key, InstanceState::DeletedExternally, current.manifest, None))
    }

    /// All live rows.
    pub fn live_records(&self) -> Vec<InstanceRecord> {
        self.rows
            .read()
            .iter()
            .filter(|r| r.is_live())
            .cloned()
            .collect()
    }

    pub fn records(&self) -> Vec<InstanceRecord> {
        self.rows.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceKind;

    #[test]
    fn test_upsert_supersedes_previous() {
        let ledger = InstanceLedger::new();
        let key = InstanceKey::new("web", "default", ResourceKind::Deployment);

        let first = ledger.upsert(&key, InstanceState::Succeeded, None, None);
        let second = ledger.upsert(&key, InstanceState::UpdateSucceeded, None, None);

        let current = ledger.current(&key).unwrap();
        assert_eq!(current.id, second.id);
        assert_eq!(current.state, InstanceState::UpdateSucceeded);

        let history = ledger.history(&key);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, first.id);
        assert_eq!(history[0].superseded_by, Some(second.id));
        assert_eq!(ledger.live_records().len(), 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let ledger = InstanceLedger::new();
        let a = InstanceKey::new("web", "default", ResourceKind::Deployment);
        let b = InstanceKey::new("web", "default", ResourceKind::Service);
        ledger.upsert(&a, InstanceState::Succeeded, None, None);
        ledger.upsert(&b, InstanceState::Failed, None, Some("boom".into()));
        assert_eq!(ledger.current(&a).unwrap().state, InstanceState::Succeeded);
        assert_eq!(ledger.current(&b).unwrap().state, InstanceState::Failed);
    }

    #[test]
    fn test_deleted_externally_and_reload() {
        let ledger = InstanceLedger::new();
        let key = InstanceKey::new("cm1", "default", ResourceKind::ConfigMap);
        assert!(ledger.mark_deleted_externally(&key).is_none());

        ledger.upsert(&key, InstanceState::Succeeded, None, None);
        ledger.mark_deleted_externally(&key).unwrap();

        let reloaded = InstanceLedger::from_records(ledger.records());
        assert_eq!(
            reloaded.current(&key).unwrap().state,
            InstanceState::DeletedExternally
        );
    }
}
