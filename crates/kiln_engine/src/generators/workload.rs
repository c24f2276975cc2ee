//! Deployment, DaemonSet, Job and StatefulSet transforms.

use kiln_store::ResourceKind;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::crossref::{id_string, SERVICE_TAG};
use super::{is_blank, pod, Companion, GenerationRequest};
use crate::error::EngineResult;
use crate::renderer::TemplateRenderer;

const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";

pub(crate) fn transform(
    req: &GenerationRequest<'_>,
    kind: ResourceKind,
    name: &str,
    body: &mut Value,
) -> EngineResult<Vec<Companion>> {
    let companions = pod::transform_pod(req, kind, name, body)?;

    match kind {
        ResourceKind::DaemonSet | ResourceKind::Job => {
            if let Some(spec) = body.get_mut("spec").and_then(Value::as_object_mut) {
                spec.remove("replicas");
            }
        }
        ResourceKind::StatefulSet => {
            finalize_claims(body, req.renderer);
            bind_service(req, name, body);
        }
        _ => {}
    }

    Ok(companions)
}

/// Normalize `volumeClaimTemplates`, dropping claims without a name or a
/// storage size. A bare number of storage is taken as gibibytes.
fn finalize_claims(body: &mut Value, renderer: &TemplateRenderer) {
    let Some(spec) = body.get_mut("spec").and_then(Value::as_object_mut) else {
        return;
    };
    let claims = match spec.remove("volumeClaimTemplates") {
        Some(Value::Array(claims)) => claims,
        _ => return,
    };

    let finalized: Vec<Value> = claims
        .iter()
        .filter_map(|claim| finalize_claim(claim, renderer))
        .collect();
    if !finalized.is_empty() {
        spec.insert("volumeClaimTemplates".to_string(), Value::Array(finalized));
    }
}

fn text(value: Option<&Value>, renderer: &TemplateRenderer) -> String {
    match value {
        Some(Value::String(s)) => renderer.blank(s).trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn finalize_claim(claim: &Value, renderer: &TemplateRenderer) -> Option<Value> {
    let name = text(
        claim.pointer("/metadata/name").or_else(|| claim.get("name")),
        renderer,
    );
    let storage = text(
        claim
            .pointer("/spec/resources/requests/storage")
            .or_else(|| claim.get("storage")),
        renderer,
    );
    if name.is_empty() || storage.is_empty() {
        debug!("Dropping incomplete volume claim '{}'", name);
        return None;
    }
    let storage = if storage.parse::<f64>().is_ok() {
        format!("{}Gi", storage)
    } else {
        storage
    };

    let access_modes = claim
        .pointer("/spec/accessModes")
        .or_else(|| claim.get("accessModes"))
        .filter(|v| !is_blank(v))
        .cloned()
        .unwrap_or_else(|| json!([DEFAULT_ACCESS_MODE]));

    let mut spec = Map::new();
    spec.insert("accessModes".to_string(), access_modes);
    let storage_class = text(
        claim
            .pointer("/spec/storageClassName")
            .or_else(|| claim.get("storageClassName")),
        renderer,
    );
    if !storage_class.is_empty() {
        spec.insert("storageClassName".to_string(), Value::String(storage_class));
    }
    spec.insert(
        "resources".to_string(),
        json!({"requests": {"storage": storage}}),
    );

    let mut metadata = claim
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    metadata.insert("name".to_string(), Value::String(name));

    Some(json!({"metadata": metadata, "spec": spec}))
}

/// Point `spec.serviceName` at the Service sharing this set's service tag.
/// Without a match the field is left as written.
fn bind_service(req: &GenerationRequest<'_>, name: &str, body: &mut Value) {
    let Some(tag) = body.get(SERVICE_TAG).and_then(id_string) else {
        return;
    };
    match req.crossref.service_for_tag(&tag) {
        Some(service) => {
            if let Some(spec) = body.get_mut("spec").and_then(Value::as_object_mut) {
                spec.insert("serviceName".to_string(), Value::String(service.to_string()));
            }
        }
        None => debug!("No service tagged '{}' for StatefulSet {}", tag, name),
    }
}
