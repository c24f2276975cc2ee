//! Template lint: placeholder checks without compiling anything.

use std::sync::Arc;

use kiln_store::{is_valid_key, ResourceTemplate, VariableStore};
use serde::{Deserialize, Serialize};

use crate::context::CONTEXT_KEYS;
use crate::renderer::TemplateRenderer;

/// Result of linting one or more templates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        if !other.valid {
            self.valid = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Checks template placeholders against the key grammar and the known
/// variables.
pub struct TemplateLinter {
    store: Arc<VariableStore>,
    renderer: TemplateRenderer,
}

impl TemplateLinter {
    pub fn new(store: Arc<VariableStore>) -> Self {
        Self {
            store,
            renderer: TemplateRenderer::new(),
        }
    }

    /// Malformed keys are errors; keys that neither the store nor the
    /// context knows are warnings, since they compile to empty strings.
    pub fn lint_template(&self, template: &ResourceTemplate) -> ValidationResult {
        let mut result = ValidationResult::new();
        let label = format!("{}/{} (#{})", template.kind, template.name, template.id);

        for key in self.renderer.harvest(&template.body) {
            if !is_valid_key(&key) {
                result.add_error(format!("{}: invalid variable name '{}'", label, key));
            } else if !CONTEXT_KEYS.contains(&key.as_str()) && self.store.find_by_key(&key).is_none() {
                result.add_warning(format!("{}: unknown variable '{}' resolves to empty", label, key));
            }
        }
        result
    }

    pub fn lint_templates<'a, I>(&self, templates: I) -> ValidationResult
    where
        I: IntoIterator<Item = &'a ResourceTemplate>,
    {
        let mut result = ValidationResult::new();
        for template in templates {
            result.merge(self.lint_template(template));
        }
        result
    }
}
