//! Placeholder scanning and textual substitution.
//!
//! Substitution works on raw template text before it is parsed, because
//! placeholders may sit in key positions as well as values.

use std::collections::BTreeSet;

use kiln_store::is_valid_key;
use regex::{Captures, Regex};

const UNRESOLVED: &str = "kiln-unresolved";

/// Scans and substitutes `{{KEY}}` placeholders.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    placeholder: Regex,
    pure: Regex,
    unresolved: Regex,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self {
            // Any token between double braces; grammar is checked separately.
            placeholder: Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").unwrap(),
            pure: Regex::new(r"^\s*\{\{\s*([^{}]*?)\s*\}\}\s*$").unwrap(),
            unresolved: Regex::new(r"kiln-unresolved\(([A-Za-z][A-Za-z0-9_-]*)\)").unwrap(),
        }
    }

    /// Distinct placeholder keys in `text`, in sorted order.
    pub fn harvest(&self, text: &str) -> BTreeSet<String> {
        self.placeholder
            .captures_iter(text)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    /// Replace each placeholder for which `lookup` yields a value. A
    /// well-formed key without a value becomes a plain `kiln-unresolved(KEY)`
    /// token, since an unquoted `{{KEY}}` parses as a YAML flow mapping.
    /// Malformed keys are left untouched.
    pub fn substitute<'a, F>(&self, text: &str, lookup: F) -> String
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        self.placeholder
            .replace_all(text, |caps: &Captures| match lookup(&caps[1]) {
                Some(value) => value.to_string(),
                None if is_valid_key(&caps[1]) => format!("{}({})", UNRESOLVED, &caps[1]),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Turn the tokens left by [`substitute`](Self::substitute)
    /// back into `{{KEY}}` placeholders.
    pub fn restore(&self, text: &str) -> String {
        self.unresolved.replace_all(text, "{{$1}}").into_owned()
    }

    pub fn has_unresolved(&self, text: &str) -> bool {
        self.unresolved.is_match(text)
    }

    /// Replace every remaining placeholder with the empty string.
    pub fn blank(&self, text: &str) -> String {
        self.placeholder.replace_all(text, "").into_owned()
    }

    pub fn contains_placeholder(&self, text: &str) -> bool {
        self.placeholder.is_match(text)
    }

    /// The key if `text` is nothing but a single placeholder.
    pub fn pure_placeholder<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.pure
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_harvest_distinct_keys() {
        let renderer = TemplateRenderer::new();
        let keys = renderer.harvest(r#"{"{{A}}": "{{ B }}", "c": "{{A}}-{{bad key}}"}"#);
        let keys: Vec<_> = keys.into_iter().collect();
        assert_eq!(keys, vec!["A", "B", "bad key"]);
    }

    #[test]
    fn test_substitute_leaves_unknown() {
        let renderer = TemplateRenderer::new();
        let mut vars = HashMap::new();
        vars.insert("NAME".to_string(), "web".to_string());

        let out = renderer.substitute("{{NAME}}-{{MISSING}}", |k| vars.get(k).map(String::as_str));
        let out = renderer.restore(&out);
        assert_eq!(out, "web-{{MISSING}}");
        assert_eq!(renderer.blank(&out), "web-");
    }

    #[test]
    fn test_substitute_key_position() {
        let renderer = TemplateRenderer::new();
        let out = renderer.substitute(r#"{"{{K}}": 1}"#, |k| (k == "K").then_some("port"));
        assert_eq!(out, r#"{"port": 1}"#);
    }

    #[test]
    fn test_marked_tokens_restore() {
        let renderer = TemplateRenderer::new();
        let out = renderer.substitute("k: {{MISSING}}\nn: {{N}}\nb: {{bad key}}", |k| {
            (k == "N").then_some("3")
        });
        assert_eq!(out, "k: kiln-unresolved(MISSING)\nn: 3\nb: {{bad key}}");
        assert!(renderer.has_unresolved(&out));
        assert_eq!(
            renderer.restore("kiln-unresolved(A)-kiln-unresolved(B_2)"),
            "{{A}}-{{B_2}}"
        );
    }

    #[test]
    fn test_pure_placeholder() {
        let renderer = TemplateRenderer::new();
        assert_eq!(renderer.pure_placeholder("{{REPLICA_COUNT}}"), Some("REPLICA_COUNT"));
        assert_eq!(renderer.pure_placeholder(" {{ X }} "), Some("X"));
        assert_eq!(renderer.pure_placeholder("{{X}}%"), None);
        assert_eq!(renderer.pure_placeholder("3"), None);
    }
}
