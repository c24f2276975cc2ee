//! Cross-resource references by opaque tag.
//!
//! Pod-bearing resources carry a `deploy_tag`, Services list the tags they
//! select in `deploy_tag_list`, and StatefulSets find their governing Service
//! through a shared `service_tag`. References that find nothing are simply
//! omitted from the output.

use kiln_store::ResourceKind;
use serde_json::Value;

pub const DEPLOY_TAG: &str = "deploy_tag";
pub const DEPLOY_TAG_LIST: &str = "deploy_tag_list";
pub const SERVICE_TAG: &str = "service_tag";

#[derive(Debug, Clone, PartialEq)]
struct TaggedPort {
    deploy_tag: String,
    id: String,
    name: String,
    container_port: Value,
}

#[derive(Debug, Clone, PartialEq)]
struct TaggedService {
    service_tag: String,
    name: String,
}

/// Index over every parsed document of a snapshot.
#[derive(Debug, Clone, Default)]
pub struct CrossRefIndex {
    ports: Vec<TaggedPort>,
    services: Vec<TaggedService>,
}

/// Normalize an opaque id that may be written as a string or a number.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn name_of(doc: &Value) -> Option<String> {
    doc.pointer("/metadata/name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl CrossRefIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents<I>(docs: I) -> Self
    where
        I: IntoIterator<Item = (ResourceKind, Value)>,
    {
        let mut index = Self::new();
        for (kind, doc) in docs {
            index.add(kind, &doc);
        }
        index
    }

    /// Record the tags and container ports of one document.
    pub fn add(&mut self, kind: ResourceKind, doc: &Value) {
        let Some(name) = name_of(doc) else {
            return;
        };

        if kind == ResourceKind::Service {
            if let Some(tag) = doc.get(SERVICE_TAG).and_then(id_string) {
                self.services.push(TaggedService {
                    service_tag: tag,
                    name,
                });
            }
            return;
        }

        if !kind.is_pod_bearing() {
            return;
        }
        let Some(tag) = doc.get(DEPLOY_TAG).and_then(id_string) else {
            return;
        };
        let containers = doc
            .pointer("/spec/template/spec/containers")
            .and_then(Value::as_array)
            .into_iter()
            .flatten();
        for container in containers {
            let ports = container.get("ports").and_then(Value::as_array).into_iter().flatten();
            for port in ports {
                let Some(id) = port.get("id").and_then(id_string) else {
                    continue;
                };
                self.ports.push(TaggedPort {
                    deploy_tag: tag.clone(),
                    id,
                    name: port
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    container_port: port.get("containerPort").cloned().unwrap_or(Value::Null),
                });
            }
        }
    }

    /// The `targetPort` for a Service port referencing container port `id`
    /// among resources tagged with one of `deploy_tags`: the port name when
    /// set, the port number otherwise.
    pub fn target_port(&self, deploy_tags: &[String], id: &str) -> Option<Value> {
        let port = self
            .ports
            .iter()
            .find(|p| p.id == id && deploy_tags.contains(&p.deploy_tag))?;
        if !port.name.is_empty() {
            return Some(Value::String(port.name.clone()));
        }
        match &port.container_port {
            Value::Null => None,
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(n) => Some(Value::from(n)),
                Err(_) if !s.trim().is_empty() => Some(Value::String(s.trim().to_string())),
                Err(_) => None,
            },
            other => Some(other.clone()),
        }
    }

    /// Name of the Service sharing `service_tag`.
    pub fn service_for_tag(&self, service_tag: &str) -> Option<&str> {
        self.services
            .iter()
            .find(|s| s.service_tag == service_tag)
            .map(|s| s.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index() -> CrossRefIndex {
        CrossRefIndex::from_documents([
            (
                ResourceKind::Deployment,
                json!({
                    "deploy_tag": "t-web",
                    "metadata": {"name": "web"},
                    "spec": {"template": {"spec": {"containers": [{
                        "name": "app",
                        "ports": [
                            {"id": 42, "name": "http", "containerPort": 8080},
                            {"id": "43", "containerPort": "9090"}
                        ]
                    }]}}}
                }),
            ),
            (
                ResourceKind::Service,
                json!({"service_tag": "s-1", "metadata": {"name": "web-headless"}}),
            ),
        ])
    }

    #[test]
    fn test_target_port_prefers_name() {
        let index = index();
        let tags = vec!["t-web".to_string()];
        assert_eq!(index.target_port(&tags, "42"), Some(json!("http")));
        assert_eq!(index.target_port(&tags, "43"), Some(json!(9090)));
        assert_eq!(index.target_port(&tags, "44"), None);
        assert_eq!(index.target_port(&["other".to_string()], "42"), None);
    }

    #[test]
    fn test_service_tag_lookup() {
        let index = index();
        assert_eq!(index.service_for_tag("s-1"), Some("web-headless"));
        assert_eq!(index.service_for_tag("s-2"), None);
    }
}
