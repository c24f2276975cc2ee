//! System overlay: forced fields merged over every generated manifest.

use kiln_store::ResourceKind;
use serde_json::{json, Map, Value};

use crate::config::EngineConfig;
use crate::context::{ClusterVersion, Context};

pub const MANAGED_BY: &str = "kiln";

/// Merge `overlay` into `base`. Objects merge key by key; any other overlay
/// value replaces the base value outright.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value)
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// apiVersion for `kind` on a cluster of `version`; the newest group when the
/// version is unknown.
pub fn api_version(kind: ResourceKind, version: Option<ClusterVersion>) -> &'static str {
    let at_least = |major, minor| version.map_or(true, |v| v.at_least(major, minor));
    match kind {
        ResourceKind::Deployment | ResourceKind::StatefulSet | ResourceKind::DaemonSet => {
            if at_least(1, 9) {
                "apps/v1"
            } else {
                "apps/v1beta2"
            }
        }
        ResourceKind::Job => "batch/v1",
        ResourceKind::ConfigMap | ResourceKind::Secret | ResourceKind::Service => "v1",
        ResourceKind::Ingress => {
            if at_least(1, 19) {
                "networking.k8s.io/v1"
            } else if at_least(1, 14) {
                "networking.k8s.io/v1beta1"
            } else {
                "extensions/v1beta1"
            }
        }
        ResourceKind::HorizontalPodAutoscaler => {
            if at_least(1, 23) {
                "autoscaling/v2"
            } else if at_least(1, 12) {
                "autoscaling/v2beta2"
            } else {
                "autoscaling/v1"
            }
        }
    }
}

/// Build the overlay document for one manifest of `kind`.
pub fn system_overlay(kind: ResourceKind, context: &Context, config: &EngineConfig) -> Value {
    let mut labels = Map::new();
    labels.insert(config.label("managed-by"), json!(MANAGED_BY));
    labels.insert(config.label("template-group"), json!(context.template_group_id));
    labels.insert(config.label("snapshot"), json!(context.snapshot_id.to_string()));

    let mut annotations = Map::new();
    annotations.insert(config.label("instantiated-by"), json!(context.actor));

    let mut overlay = json!({
        "kind": kind.as_str(),
        "metadata": {
            "namespace": context.namespace_name(),
            "labels": labels,
            "annotations": annotations,
        }
    });

    if context.cluster_version.is_some() {
        overlay["apiVersion"] = json!(api_version(kind, context.cluster_version));
    }

    if kind.is_pod_bearing() {
        let mut pod_annotations = Map::new();
        pod_annotations.insert(
            config.label("log-pipelines"),
            json!(context.project.log_pipeline_ids.join(",")),
        );
        overlay["spec"] = json!({
            "template": { "metadata": { "annotations": pod_annotations } }
        });
    }

    overlay
}

/// Merge the system overlay into `body` and make sure an apiVersion is set.
pub fn apply_overlay(body: &mut Value, kind: ResourceKind, context: &Context, config: &EngineConfig) {
    deep_merge(body, &system_overlay(kind, context, config));

    let has_api_version = body
        .get("apiVersion")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !has_api_version {
        body["apiVersion"] = json!(api_version(kind, None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::sample_context;

    #[test]
    fn test_deep_merge_overlay_wins() {
        let mut base = json!({
            "metadata": {"namespace": "user-ns", "labels": {"app": "web"}},
            "spec": {"ports": [1, 2]}
        });
        let overlay = json!({
            "metadata": {"namespace": "default", "labels": {"x": "y"}},
            "spec": {"ports": [3]}
        });
        deep_merge(&mut base, &overlay);
        assert_eq!(base["metadata"]["namespace"], "default");
        assert_eq!(base["metadata"]["labels"]["app"], "web");
        assert_eq!(base["metadata"]["labels"]["x"], "y");
        assert_eq!(base["spec"]["ports"], json!([3]));
    }

    #[test]
    fn test_api_version_table() {
        let v = |minor| Some(ClusterVersion::new(1, minor));
        assert_eq!(api_version(ResourceKind::Deployment, v(8)), "apps/v1beta2");
        assert_eq!(api_version(ResourceKind::Deployment, v(20)), "apps/v1");
        assert_eq!(api_version(ResourceKind::Ingress, v(13)), "extensions/v1beta1");
        assert_eq!(api_version(ResourceKind::Ingress, v(16)), "networking.k8s.io/v1beta1");
        assert_eq!(api_version(ResourceKind::Ingress, None), "networking.k8s.io/v1");
        assert_eq!(api_version(ResourceKind::HorizontalPodAutoscaler, v(18)), "autoscaling/v2beta2");
    }

    #[test]
    fn test_unknown_version_keeps_template_api_version() {
        let context = sample_context(None);
        let mut body = json!({"apiVersion": "extensions/v1beta1", "metadata": {"name": "ing"}});
        apply_overlay(&mut body, ResourceKind::Ingress, &context, &EngineConfig::default());
        assert_eq!(body["apiVersion"], "extensions/v1beta1");
        assert_eq!(body["kind"], "Ingress");
        assert_eq!(body["metadata"]["labels"]["kiln.io/managed-by"], "kiln");

        let mut bare = json!({"metadata": {"name": "cm"}});
        apply_overlay(&mut bare, ResourceKind::ConfigMap, &context, &EngineConfig::default());
        assert_eq!(bare["apiVersion"], "v1");
    }

    #[test]
    fn test_known_version_forces_api_version() {
        let context = sample_context(Some(ClusterVersion::new(1, 16)));
        let mut body = json!({"apiVersion": "networking.k8s.io/v1", "metadata": {"name": "ing"}});
        apply_overlay(&mut body, ResourceKind::Ingress, &context, &EngineConfig::default());
        assert_eq!(body["apiVersion"], "networking.k8s.io/v1beta1");
    }
}
