//! Variable store with per-target overrides.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::models::{
    is_valid_key, ResolutionTarget, Variable, VariableCategory, VariableId, VariableOverride,
    VariableScope,
};

#[derive(Default)]
struct Inner {
    next_id: VariableId,
    variables: Vec<Variable>,
    overrides: HashMap<(VariableId, String), String>,
}

/// In-memory variable store.
///
/// Variables are soft-deleted only; a deleted variable stays in the table but
/// is no longer visible to key lookups.
#[derive(Default)]
pub struct VariableStore {
    inner: RwLock<Inner>,
}

/// Fields for a new variable.
#[derive(Debug, Clone)]
pub struct NewVariable {
    pub key: String,
    pub name: String,
    pub scope: VariableScope,
    pub default_value: String,
    pub category: VariableCategory,
}

impl NewVariable {
    pub fn custom(key: impl Into<String>, default_value: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            scope: VariableScope::Global,
            default_value: default_value.into(),
            category: VariableCategory::Custom,
        }
    }

    pub fn system(key: impl Into<String>, default_value: impl Into<String>) -> Self {
        Self {
            category: VariableCategory::System,
            ..Self::custom(key, default_value)
        }
    }

    pub fn scope(mut self, scope: VariableScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a variable. The key must satisfy the key grammar and be unique
    /// among live variables.
    pub fn create_variable(&self, new: NewVariable) -> StoreResult<Variable> {
        if !is_valid_key(&new.key) {
            return Err(StoreError::InvalidVariableKey(new.key));
        }

        let mut inner = self.inner.write();
        if inner
            .variables
            .iter()
            .any(|v| !v.is_deleted && v.key == new.key)
        {
            return Err(StoreError::DuplicateVariable(new.key));
        }

        inner.next_id += 1;
        let variable = Variable {
            id: inner.next_id,
            key: new.key,
            name: new.name,
            scope: new.scope,
            default_value: new.default_value,
            category: new.category,
            is_deleted: false,
        };
        debug!("Created variable {} ({})", variable.key, variable.id);
        inner.variables.push(variable.clone());
        Ok(variable)
    }

    /// Insert a variable with an existing id, as read back from a workspace file.
    pub fn import(&self, variable: Variable) -> StoreResult<()> {
        if !is_valid_key(&variable.key) {
            return Err(StoreError::InvalidVariableKey(variable.key));
        }
        let mut inner = self.inner.write();
        inner.next_id = inner.next_id.max(variable.id);
        inner.variables.retain(|v| v.id != variable.id);
        inner.variables.push(variable);
        Ok(())
    }

    pub fn get(&self, id: VariableId) -> StoreResult<Variable> {
        self.inner
            .read()
            .variables
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Variable", id))
    }

    /// Look up the live variable with `key`.
    pub fn find_by_key(&self, key: &str) -> Option<Variable> {
        self.inner
            .read()
            .variables
            .iter()
            .find(|v| !v.is_deleted && v.key == key)
            .cloned()
    }

    /// All live variables, ordered by key.
    pub fn list(&self) -> Vec<Variable> {
        let mut vars: Vec<_> = self
            .inner
            .read()
            .variables
            .iter()
            .filter(|v| !v.is_deleted)
            .cloned()
            .collect();
        vars.sort_by(|a, b| a.key.cmp(&b.key));
        vars
    }

    pub fn update_default(&self, id: VariableId, value: impl Into<String>) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let variable = inner
            .variables
            .iter_mut()
            .find(|v| v.id == id && !v.is_deleted)
            .ok_or_else(|| StoreError::not_found("Variable", id))?;
        if variable.is_system() {
            return Err(StoreError::ImmutableVariable(variable.key.clone()));
        }
        variable.default_value = value.into();
        Ok(())
    }

    /// Mark a variable deleted. Its overrides are kept for history.
    pub fn soft_delete(&self, id: VariableId) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let variable = inner
            .variables
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| StoreError::not_found("Variable", id))?;
        if variable.is_system() {
            return Err(StoreError::ImmutableVariable(variable.key.clone()));
        }
        variable.is_deleted = true;
        info!("Soft-deleted variable {}", variable.key);
        Ok(())
    }

    /// Set the value a variable takes for one target, replacing any earlier
    /// override for the same `(variable, target)` pair.
    pub fn set_override(
        &self,
        id: VariableId,
        target_id: impl Into<String>,
        value: impl Into<String>,
    ) -> StoreResult<()> {
        let target_id = target_id.into();
        let variable = self.get(id)?;
        if variable.scope == VariableScope::Global {
            return Err(StoreError::ScopeMismatch {
                key: variable.key,
                scope: variable.scope.to_string(),
                target: target_id,
            });
        }
        self.inner
            .write()
            .overrides
            .insert((id, target_id), value.into());
        Ok(())
    }

    pub fn clear_override(&self, id: VariableId, target_id: &str) -> bool {
        self.inner
            .write()
            .overrides
            .remove(&(id, target_id.to_string()))
            .is_some()
    }

    pub fn override_for(&self, id: VariableId, target_id: &str) -> Option<String> {
        self.inner
            .read()
            .overrides
            .get(&(id, target_id.to_string()))
            .cloned()
    }

    pub fn overrides(&self) -> Vec<VariableOverride> {
        let mut out: Vec<_> = self
            .inner
            .read()
            .overrides
            .iter()
            .map(|((variable_id, target_id), value)| VariableOverride {
                variable_id: *variable_id,
                target_id: target_id.clone(),
                value: value.clone(),
            })
            .collect();
        out.sort_by(|a, b| (a.variable_id, &a.target_id).cmp(&(b.variable_id, &b.target_id)));
        out
    }

    /// `override(v, target) ?? v.default_value`.
    pub fn resolve_value(&self, variable: &Variable, target: &ResolutionTarget) -> String {
        target
            .target_for(variable.scope)
            .and_then(|t| self.override_for(variable.id, t))
            .unwrap_or_else(|| variable.default_value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_bad_key() {
        let store = VariableStore::new();
        let err = store
            .create_variable(NewVariable::custom("9lives", "x"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidVariableKey(_)));
    }

    #[test]
    fn test_duplicate_key_allowed_after_delete() {
        let store = VariableStore::new();
        let v = store.create_variable(NewVariable::custom("A", "1")).unwrap();
        assert!(store.create_variable(NewVariable::custom("A", "2")).is_err());

        store.soft_delete(v.id).unwrap();
        assert!(store.find_by_key("A").is_none());
        // still present for history
        assert!(store.get(v.id).unwrap().is_deleted);

        let again = store.create_variable(NewVariable::custom("A", "2")).unwrap();
        assert_ne!(again.id, v.id);
    }

    #[test]
    fn test_system_variables_are_immutable() {
        let store = VariableStore::new();
        let v = store.create_variable(NewVariable::system("SYS", "1")).unwrap();
        assert!(matches!(
            store.update_default(v.id, "2"),
            Err(StoreError::ImmutableVariable(_))
        ));
        assert!(store.soft_delete(v.id).is_err());
    }

    #[test]
    fn test_resolve_prefers_override() {
        let store = VariableStore::new();
        let v = store
            .create_variable(NewVariable::custom("REPLICAS", "1").scope(VariableScope::Namespace))
            .unwrap();
        let target = ResolutionTarget::new("c1", "ns1");
        let other = ResolutionTarget::new("c1", "ns2");

        assert_eq!(store.resolve_value(&v, &target), "1");
        store.set_override(v.id, "ns1", "3").unwrap();
        assert_eq!(store.resolve_value(&v, &target), "3");
        assert_eq!(store.resolve_value(&v, &other), "1");

        store.set_override(v.id, "ns1", "5").unwrap();
        assert_eq!(store.overrides().len(), 1);
        assert_eq!(store.resolve_value(&v, &target), "5");

        assert!(store.clear_override(v.id, "ns1"));
        assert_eq!(store.resolve_value(&v, &target), "1");
    }

    #[test]
    fn test_cluster_scope_uses_cluster_id() {
        let store = VariableStore::new();
        let v = store
            .create_variable(NewVariable::custom("REGION", "eu").scope(VariableScope::Cluster))
            .unwrap();
        store.set_override(v.id, "c2", "us").unwrap();
        assert_eq!(store.resolve_value(&v, &ResolutionTarget::new("c2", "ns1")), "us");
        assert_eq!(store.resolve_value(&v, &ResolutionTarget::new("c1", "c2")), "eu");
    }

    #[test]
    fn test_global_rejects_override() {
        let store = VariableStore::new();
        let v = store.create_variable(NewVariable::custom("G", "x")).unwrap();
        assert!(matches!(
            store.set_override(v.id, "ns1", "y"),
            Err(StoreError::ScopeMismatch { .. })
        ));
    }
}
