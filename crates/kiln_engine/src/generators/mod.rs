//! Per-kind manifest generators.
//!
//! Every kind runs the same pipeline: substitute placeholders into the raw
//! template text, parse it, merge the system overlay, apply the kind's
//! structural transform, coerce numeric fields and blank what is left of the
//! placeholders. The kinds differ only in their transform step.

pub mod crossref;
pub mod ingress;
pub mod numeric;
pub mod overlay;
pub mod pod;
pub mod secret;
pub mod service;
pub mod shell;
pub mod workload;

use std::collections::HashSet;

use kiln_store::{ResourceKind, ResourceTemplate};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::{EngineError, EngineResult};
use crate::instantiation::Mode;
use crate::manifest::Manifest;
use crate::renderer::TemplateRenderer;
use crate::resolver::ResolvedVariables;

pub use crossref::CrossRefIndex;

/// Everything one generator call reads.
pub struct GenerationRequest<'a> {
    pub template: &'a ResourceTemplate,
    pub context: &'a Context,
    pub variables: &'a ResolvedVariables,
    pub mode: Mode,
    pub crossref: &'a CrossRefIndex,
    pub config: &'a EngineConfig,
    pub renderer: &'a TemplateRenderer,
}

/// A generated manifest and the side-effect resources it produced.
#[derive(Debug, Clone)]
pub struct Generated {
    pub manifest: Manifest,
    pub companions: Vec<Manifest>,
}

/// Raw side-effect resource emitted by a transform, before the overlay.
#[derive(Debug, Clone)]
pub(crate) struct Companion {
    pub kind: ResourceKind,
    pub name: String,
    pub body: Value,
}

/// Substitute resolved variables, then context values, into `text` and
/// parse the result. Placeholders whose value is empty come back as
/// `{{KEY}}` strings for the later numeric and blanking steps, whether or not
/// the template quoted them.
pub fn render_document(
    renderer: &TemplateRenderer,
    text: &str,
    variables: &ResolvedVariables,
    context: &Context,
) -> Result<Value, String> {
    let substituted = renderer.substitute(text, |key| {
        variables
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .or_else(|| context.get(key).filter(|v| !v.is_empty()))
    });

    let mut document: Value = serde_yaml::from_str(&substituted).map_err(|e| e.to_string())?;
    if !document.is_object() {
        return Err("template body is not a mapping".to_string());
    }
    restore_placeholders(&mut document, renderer);
    Ok(document)
}

fn restore_placeholders(value: &mut Value, renderer: &TemplateRenderer) {
    match value {
        Value::String(s) => {
            if renderer.has_unresolved(s) {
                *s = renderer.restore(s);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                restore_placeholders(item, renderer);
            }
        }
        Value::Object(map) => {
            let entries = std::mem::take(map);
            for (key, mut child) in entries {
                restore_placeholders(&mut child, renderer);
                let key = if renderer.has_unresolved(&key) {
                    renderer.restore(&key)
                } else {
                    key
                };
                map.insert(key, child);
            }
        }
        _ => {}
    }
}

/// The closed set of generators, one per resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindGenerator {
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    Service,
    ConfigMap,
    Secret,
    Ingress,
    Hpa,
}

impl KindGenerator {
    pub fn for_kind(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Deployment => Self::Deployment,
            ResourceKind::StatefulSet => Self::StatefulSet,
            ResourceKind::DaemonSet => Self::DaemonSet,
            ResourceKind::Job => Self::Job,
            ResourceKind::Service => Self::Service,
            ResourceKind::ConfigMap => Self::ConfigMap,
            ResourceKind::Secret => Self::Secret,
            ResourceKind::Ingress => Self::Ingress,
            ResourceKind::HorizontalPodAutoscaler => Self::Hpa,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Deployment => ResourceKind::Deployment,
            Self::StatefulSet => ResourceKind::StatefulSet,
            Self::DaemonSet => ResourceKind::DaemonSet,
            Self::Job => ResourceKind::Job,
            Self::Service => ResourceKind::Service,
            Self::ConfigMap => ResourceKind::ConfigMap,
            Self::Secret => ResourceKind::Secret,
            Self::Ingress => ResourceKind::Ingress,
            Self::Hpa => ResourceKind::HorizontalPodAutoscaler,
        }
    }

    /// Compile one template into its manifest and companions.
    pub fn generate(&self, req: &GenerationRequest<'_>) -> EngineResult<Generated> {
        let kind = self.kind();
        let fallback = req.template.name.as_str();

        let mut body = render_document(req.renderer, &req.template.body, req.variables, req.context)
            .map_err(|m| EngineError::corrupt(kind, fallback, m))?;
        let name = assign_name(&mut body, kind, fallback, req.renderer)?;

        overlay::apply_overlay(&mut body, kind, req.context, req.config);

        let companions = match self {
            Self::Deployment | Self::DaemonSet | Self::Job | Self::StatefulSet => {
                workload::transform(req, kind, &name, &mut body)?
            }
            Self::Service => {
                service::transform(req, &name, &mut body)?;
                Vec::new()
            }
            Self::Ingress => ingress::transform(req, &name, &mut body)?,
            Self::ConfigMap | Self::Secret | Self::Hpa => Vec::new(),
        };

        strip_extension_fields(&mut body);
        let preserved =
            numeric::coerce_numeric_fields(&mut body, kind, &name, req.mode, req.renderer)?;
        numeric::blank_placeholders(&mut body, req.renderer, &preserved);

        if kind.is_pod_bearing() {
            pod::omit_empty_blocks(&mut body);
        }
        if kind == ResourceKind::Secret {
            secret::encode_data(&mut body);
        }

        let namespace = req.context.namespace_name().to_string();
        let companions = companions
            .into_iter()
            .map(|companion| {
                let mut companion_body = companion.body;
                overlay::apply_overlay(&mut companion_body, companion.kind, req.context, req.config);
                numeric::blank_placeholders(&mut companion_body, req.renderer, &HashSet::new());
                Manifest {
                    kind: companion.kind,
                    name: companion.name,
                    namespace: namespace.clone(),
                    body: companion_body,
                    origin: Some(name.clone()),
                }
            })
            .collect::<Vec<_>>();

        debug!(
            "Generated {}/{} with {} companion(s)",
            kind,
            name,
            companions.len()
        );

        Ok(Generated {
            manifest: Manifest {
                kind,
                name,
                namespace,
                body,
                origin: None,
            },
            companions,
        })
    }
}

/// Settle `metadata.name`, falling back to the stored template name.
fn assign_name(
    body: &mut Value,
    kind: ResourceKind,
    fallback: &str,
    renderer: &TemplateRenderer,
) -> EngineResult<String> {
    let declared = body
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .map(|s| renderer.blank(s).trim().to_string())
        .filter(|s| !s.is_empty());
    let name = declared
        .or_else(|| Some(fallback.trim().to_string()).filter(|s| !s.is_empty()))
        .ok_or_else(|| EngineError::corrupt(kind, fallback, "metadata.name is missing"))?;

    let Some(root) = body.as_object_mut() else {
        return Err(EngineError::corrupt(kind, &name, "template body is not a mapping"));
    };
    let metadata = root
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if metadata.is_null() {
        *metadata = Value::Object(Map::new());
    }
    let Some(metadata) = metadata.as_object_mut() else {
        return Err(EngineError::corrupt(kind, &name, "metadata is not a mapping"));
    };
    metadata.insert("name".to_string(), Value::String(name.clone()));
    Ok(name)
}

/// Remove the bookkeeping fields templates carry for the engine's own use.
fn strip_extension_fields(body: &mut Value) {
    if let Some(root) = body.as_object_mut() {
        root.remove(crossref::DEPLOY_TAG);
        root.remove(crossref::DEPLOY_TAG_LIST);
        root.remove(crossref::SERVICE_TAG);
    }

    for list in ["containers", "initContainers"] {
        let pointer = format!("/spec/template/spec/{}", list);
        let Some(containers) = body.pointer_mut(&pointer).and_then(Value::as_array_mut) else {
            continue;
        };
        for container in containers.iter_mut().filter_map(Value::as_object_mut) {
            container.remove(pod::LOG_PATH_LIST);
            if let Some(ports) = container.get_mut("ports").and_then(Value::as_array_mut) {
                for port in ports.iter_mut().filter_map(Value::as_object_mut) {
                    port.remove("id");
                }
            }
        }
    }

    if let Some(ports) = body.pointer_mut("/spec/ports").and_then(Value::as_array_mut) {
        for port in ports.iter_mut().filter_map(Value::as_object_mut) {
            port.remove(service::TARGET_PORT_ID);
        }
    }
    if let Some(tls) = body.pointer_mut("/spec/tls").and_then(Value::as_array_mut) {
        for entry in tls.iter_mut().filter_map(Value::as_object_mut) {
            entry.remove(ingress::CERTIFICATE_ID);
        }
    }
}

/// Whether `value` carries nothing: null, blank string, empty list or map.
pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Mutable access to the object at `pointer`, creating empty objects along
/// the way. `None` when something non-object is in the way.
pub(crate) fn object_at<'v>(body: &'v mut Value, path: &[&str]) -> Option<&'v mut Map<String, Value>> {
    let mut node = body;
    for segment in path {
        let map = node.as_object_mut()?;
        let child = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if child.is_null() {
            *child = Value::Object(Map::new());
        }
        node = child;
    }
    node.as_object_mut()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::tests::sample_context;
    use chrono::Utc;
    use serde_json::json;

    pub(crate) fn template(kind: ResourceKind, name: &str, body: &str) -> ResourceTemplate {
        ResourceTemplate {
            id: 1,
            kind,
            name: name.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
            superseded_by: None,
        }
    }

    /// Run one generator with an empty variable table and cross-reference
    /// index.
    pub(crate) fn generate(kind: ResourceKind, body: &str, mode: Mode) -> EngineResult<Generated> {
        generate_with(kind, body, mode, &ResolvedVariables::new(), &CrossRefIndex::new())
    }

    pub(crate) fn generate_with(
        kind: ResourceKind,
        body: &str,
        mode: Mode,
        variables: &ResolvedVariables,
        crossref: &CrossRefIndex,
    ) -> EngineResult<Generated> {
        let context = sample_context(None);
        let config = EngineConfig::default();
        let renderer = TemplateRenderer::new();
        let template = template(kind, "fallback", body);
        let req = GenerationRequest {
            template: &template,
            context: &context,
            variables,
            mode,
            crossref,
            config: &config,
            renderer: &renderer,
        };
        KindGenerator::for_kind(kind).generate(&req)
    }

    #[test]
    fn test_config_map_passes_through_with_overlay() {
        let out = generate(
            ResourceKind::ConfigMap,
            r#"{"kind": "ConfigMap", "metadata": {"name": "cm1", "namespace": "other"}, "data": {"k": "v"}}"#,
            Mode::Apply,
        )
        .unwrap();

        let body = &out.manifest.body;
        assert_eq!(out.manifest.name, "cm1");
        assert_eq!(body["apiVersion"], "v1");
        assert_eq!(body["metadata"]["namespace"], "default");
        assert_eq!(body["metadata"]["labels"]["kiln.io/managed-by"], "kiln");
        assert_eq!(body["metadata"]["labels"]["kiln.io/snapshot"], "7");
        assert_eq!(body["data"], json!({"k": "v"}));
        assert!(out.companions.is_empty());
    }

    #[test]
    fn test_variables_substituted_in_key_position() {
        let mut vars = ResolvedVariables::new();
        vars.insert("CONF_KEY".into(), "app.properties".into());
        vars.insert("CONF_VAL".into(), "debug=true".into());
        let out = generate_with(
            ResourceKind::ConfigMap,
            "metadata:\n  name: cm\ndata:\n  \"{{CONF_KEY}}\": \"{{CONF_VAL}}\"\n  \"{{UNSET}}\": dropped\n",
            Mode::Preview,
            &vars,
            &CrossRefIndex::new(),
        )
        .unwrap();
        assert_eq!(out.manifest.body["data"], json!({"app.properties": "debug=true"}));
    }

    #[test]
    fn test_unquoted_missing_variable_blanks() {
        let out = generate(
            ResourceKind::ConfigMap,
            "metadata:\n  name: cm\ndata:\n  k: {{MISSING}}\n  {{UNSET}}: dropped\n  url: http://{{HOST}}:80\n",
            Mode::Preview,
        )
        .unwrap();
        assert_eq!(out.manifest.body["data"], json!({"k": "", "url": "http://:80"}));
    }

    #[test]
    fn test_unquoted_numeric_placeholder() {
        let body = "metadata:\n  name: web\nspec:\n  replicas: {{REPLICA_COUNT}}\n  template:\n    spec:\n      containers:\n        - name: app\n          image: busybox\n";
        let out = generate(ResourceKind::Deployment, body, Mode::Preview).unwrap();
        assert_eq!(out.manifest.body["spec"]["replicas"], "{{REPLICA_COUNT}}");

        let err = generate(ResourceKind::Deployment, body, Mode::Apply).unwrap_err();
        assert!(matches!(err, EngineError::NumericCoercion { ref field, .. } if field == "spec.replicas"));

        let mut vars = ResolvedVariables::new();
        vars.insert("REPLICA_COUNT".into(), "3".into());
        let out = generate_with(ResourceKind::Deployment, body, Mode::Apply, &vars, &CrossRefIndex::new())
            .unwrap();
        assert_eq!(out.manifest.body["spec"]["replicas"], 3);
    }

    #[test]
    fn test_context_values_substituted() {
        let out = generate(
            ResourceKind::ConfigMap,
            r#"{"metadata": {"name": "cm"}, "data": {"ns": "{{NAMESPACE}}"}}"#,
            Mode::Preview,
        )
        .unwrap();
        assert_eq!(out.manifest.body["data"]["ns"], "default");
    }

    #[test]
    fn test_unparsable_body_is_corrupt() {
        let err = generate(ResourceKind::ConfigMap, "{ not: [valid", Mode::Preview).unwrap_err();
        assert!(matches!(err, EngineError::TemplateCorrupt { ref name, .. } if name == "fallback"));

        let err = generate(ResourceKind::ConfigMap, "- a\n- b\n", Mode::Preview).unwrap_err();
        assert!(err.is_resource_scoped());
    }

    #[test]
    fn test_missing_name_falls_back_to_template_name() {
        let out = generate(ResourceKind::ConfigMap, r#"{"data": {}}"#, Mode::Preview).unwrap();
        assert_eq!(out.manifest.name, "fallback");
        assert_eq!(out.manifest.body["metadata"]["name"], "fallback");
    }

    #[test]
    fn test_hpa_numeric_coercion() {
        let out = generate(
            ResourceKind::HorizontalPodAutoscaler,
            r#"{"metadata": {"name": "web"}, "spec": {"minReplicas": "2", "maxReplicas": 5,
                "metrics": [{"resource": {"target": {"averageUtilization": "80"}}}]}}"#,
            Mode::Apply,
        )
        .unwrap();
        let spec = &out.manifest.body["spec"];
        assert_eq!(spec["minReplicas"], 2);
        assert_eq!(spec["metrics"][0]["resource"]["target"]["averageUtilization"], 80);
    }
}
