//! Service transform.

use kiln_store::ResourceKind;
use serde_json::Value;
use tracing::debug;

use super::crossref::{id_string, DEPLOY_TAG_LIST};
use super::{is_blank, GenerationRequest};
use crate::error::{EngineError, EngineResult};

pub const TARGET_PORT_ID: &str = "targetPortId";

fn deploy_tags(body: &Value) -> Vec<String> {
    match body.get(DEPLOY_TAG_LIST) {
        Some(Value::Array(tags)) => tags.iter().filter_map(id_string).collect(),
        Some(Value::String(tags)) => tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn field_is_blank(port: &serde_json::Map<String, Value>, field: &str) -> bool {
    port.get(field).map_or(true, is_blank)
}

/// Bind port targets through the deploy tags and drop the fields the service
/// type does not allow.
pub(crate) fn transform(req: &GenerationRequest<'_>, name: &str, body: &mut Value) -> EngineResult<()> {
    let tags = deploy_tags(body);
    let Some(spec) = body.get_mut("spec").and_then(Value::as_object_mut) else {
        return Ok(());
    };

    let service_type = spec
        .get("type")
        .and_then(Value::as_str)
        .map(|t| req.renderer.blank(t).trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "ClusterIP".to_string());
    let node_port_allowed = matches!(service_type.as_str(), "NodePort" | "LoadBalancer");

    if let Some(ports) = spec.get_mut("ports").and_then(Value::as_array_mut) {
        for (i, port) in ports.iter_mut().enumerate() {
            let port = port.as_object_mut().ok_or_else(|| {
                EngineError::corrupt(ResourceKind::Service, name, format!("spec.ports.{} is not a mapping", i))
            })?;

            if field_is_blank(port, "port") && field_is_blank(port, "protocol") {
                return Err(EngineError::corrupt(
                    ResourceKind::Service,
                    name,
                    format!("spec.ports.{} has neither port nor protocol", i),
                ));
            }

            if let Some(id) = port.remove(TARGET_PORT_ID).as_ref().and_then(id_string) {
                match req.crossref.target_port(&tags, &id) {
                    Some(target) => {
                        port.insert("targetPort".to_string(), target);
                    }
                    None => debug!("Service {} port id {} matches no container port", name, id),
                }
            }

            if !node_port_allowed {
                port.remove("nodePort");
            }
        }
    }

    let cluster_ip_blank = spec
        .get("clusterIP")
        .and_then(Value::as_str)
        .map_or(true, |ip| req.renderer.blank(ip).trim().is_empty());
    if cluster_ip_blank || service_type == "NodePort" {
        spec.remove("clusterIP");
    }

    Ok(())
}
