//! Variable resolution against the variable store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kiln_store::{is_valid_key, ResolutionTarget, VariableStore};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::renderer::TemplateRenderer;

/// Resolved `key -> value` table for one target.
pub type ResolvedVariables = BTreeMap<String, String>;

/// Resolves the placeholders of templates for a target.
///
/// Unknown keys resolve to the empty string so that stale or renamed
/// variables never fail a compilation; keys that break the key grammar are
/// rejected outright.
pub struct VariableResolver {
    store: Arc<VariableStore>,
    renderer: TemplateRenderer,
}

impl VariableResolver {
    pub fn new(store: Arc<VariableStore>) -> Self {
        Self {
            store,
            renderer: TemplateRenderer::new(),
        }
    }

    /// Collect the placeholder keys of all `bodies`, failing on the first key
    /// that breaks the key grammar.
    pub fn harvest<'a, I>(&self, bodies: I) -> EngineResult<BTreeSet<String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut keys = BTreeSet::new();
        for body in bodies {
            keys.extend(self.renderer.harvest(body));
        }
        if let Some(bad) = keys.iter().find(|k| !is_valid_key(k)) {
            return Err(EngineError::InvalidVariableName(bad.clone()));
        }
        Ok(keys)
    }

    /// Like [`harvest`](Self::harvest) but silently skipping malformed keys.
    pub fn harvest_lenient<'a, I>(&self, bodies: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        bodies
            .into_iter()
            .flat_map(|b| self.renderer.harvest(b))
            .filter(|k| is_valid_key(k))
            .collect()
    }

    /// Resolve each key for `target`; keys with no live variable map to `""`.
    pub fn resolve_keys<'a, I>(&self, keys: I, target: &ResolutionTarget) -> ResolvedVariables
    where
        I: IntoIterator<Item = &'a String>,
    {
        keys.into_iter()
            .map(|key| {
                let value = match self.store.find_by_key(key) {
                    Some(variable) => self.store.resolve_value(&variable, target),
                    None => {
                        debug!("Variable {} not defined, resolving to empty", key);
                        String::new()
                    }
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Harvest and resolve the placeholders of one template body.
    pub fn resolve(&self, body: &str, target: &ResolutionTarget) -> EngineResult<ResolvedVariables> {
        let keys = self.harvest([body])?;
        Ok(self.resolve_keys(&keys, target))
    }
}
