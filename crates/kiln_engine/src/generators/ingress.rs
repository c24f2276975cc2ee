//! Ingress transform.

use kiln_store::ResourceKind;
use serde_json::{json, Map, Value};

use super::crossref::id_string;
use super::{is_blank, Companion, GenerationRequest};
use crate::error::EngineResult;
use crate::renderer::TemplateRenderer;

pub const CERTIFICATE_ID: &str = "certificateId";

const STABLE_API: &str = "networking.k8s.io/v1";
const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

fn blank_text(value: Option<&Value>, renderer: &TemplateRenderer) -> String {
    value
        .and_then(Value::as_str)
        .map(|s| renderer.blank(s).trim().to_string())
        .unwrap_or_default()
}

/// Convert a `serviceName`/`servicePort` backend to the `service` form used
/// by `networking.k8s.io/v1`.
fn stable_backend(backend: &mut Value) {
    let Some(map) = backend.as_object_mut() else {
        return;
    };
    let Some(service_name) = map.remove("serviceName") else {
        return;
    };
    let port = match map.remove("servicePort") {
        Some(Value::Number(n)) => json!({"number": n}),
        Some(Value::String(s)) => match s.trim().parse::<u64>() {
            Ok(n) => json!({"number": n}),
            Err(_) => json!({"name": s}),
        },
        _ => json!({}),
    };
    map.insert("service".to_string(), json!({"name": service_name, "port": port}));
}

/// Strip empty hosts and paths, default path types on the stable API, and
/// derive TLS Secrets from certificate ids.
pub(crate) fn transform(
    req: &GenerationRequest<'_>,
    name: &str,
    body: &mut Value,
) -> EngineResult<Vec<Companion>> {
    let stable = body.get("apiVersion").and_then(Value::as_str) == Some(STABLE_API);
    let Some(spec) = body.get_mut("spec").and_then(Value::as_object_mut) else {
        return Ok(Vec::new());
    };

    if stable {
        if let Some(mut backend) = spec.remove("backend") {
            stable_backend(&mut backend);
            spec.insert("defaultBackend".to_string(), backend);
        }
    }

    if let Some(Value::Array(rules)) = spec.remove("rules") {
        let rules: Vec<Value> = rules
            .into_iter()
            .filter_map(|rule| clean_rule(rule, stable, req.renderer))
            .collect();
        if !rules.is_empty() {
            spec.insert("rules".to_string(), Value::Array(rules));
        }
    }

    let mut companions: Vec<Companion> = Vec::new();
    if let Some(tls) = spec.get_mut("tls").and_then(Value::as_array_mut) {
        for entry in tls.iter_mut().filter_map(Value::as_object_mut) {
            let Some(cert_id) = entry.remove(CERTIFICATE_ID).as_ref().and_then(id_string) else {
                continue;
            };
            let secret_name = Some(blank_text(entry.get("secretName"), req.renderer))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("{}-{}-tls", name, cert_id));
            entry.insert("secretName".to_string(), Value::String(secret_name.clone()));

            if companions.iter().any(|c| c.name == secret_name) {
                continue;
            }
            let mut annotations = Map::new();
            annotations.insert(req.config.label("certificate-id"), Value::String(cert_id));
            companions.push(Companion {
                kind: ResourceKind::Secret,
                name: secret_name.clone(),
                body: json!({
                    "metadata": {"name": secret_name, "annotations": annotations},
                    "type": TLS_SECRET_TYPE,
                    "data": {"tls.crt": "", "tls.key": ""},
                }),
            });
        }
    }

    Ok(companions)
}

fn clean_rule(mut rule: Value, stable: bool, renderer: &TemplateRenderer) -> Option<Value> {
    let map = rule.as_object_mut()?;
    if blank_text(map.get("host"), renderer).is_empty() {
        map.remove("host");
    }

    let mut drop_http = false;
    if let Some(http) = map.get_mut("http").and_then(Value::as_object_mut) {
        let paths = match http.remove("paths") {
            Some(Value::Array(paths)) => paths,
            _ => Vec::new(),
        };
        let paths: Vec<Value> = paths
            .into_iter()
            .filter_map(|mut path| {
                let entry = path.as_object_mut()?;
                if blank_text(entry.get("path"), renderer).is_empty() {
                    return None;
                }
                if stable {
                    if entry.get("pathType").map_or(true, is_blank) {
                        entry.insert("pathType".to_string(), json!("Prefix"));
                    }
                    if let Some(backend) = entry.get_mut("backend") {
                        stable_backend(backend);
                    }
                }
                Some(path)
            })
            .collect();
        if paths.is_empty() {
            drop_http = true;
        } else {
            http.insert("paths".to_string(), Value::Array(paths));
        }
    }
    if drop_http {
        map.remove("http");
    }

    (map.contains_key("host") || map.contains_key("http")).then_some(rule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::tests::generate;
    use crate::instantiation::Mode;

    const INGRESS: &str = r#"
metadata:
  name: web
spec:
  rules:
    - host: "{{PUBLIC_HOST}}"
      http:
        paths:
          - path: /
            backend: {serviceName: web, servicePort: 80}
          - path: ""
            backend: {serviceName: web, servicePort: http}
    - host: ""
  tls:
    - hosts: [web.acme.io]
      certificateId: 17
    - hosts: [api.acme.io]
      secretName: api-cert
      certificateId: "18"
    - hosts: [plain.acme.io]
      secretName: plain
"#;

    #[test]
    fn test_rules_cleaned_and_converted() {
        let out = generate(ResourceKind::Ingress, INGRESS, Mode::Apply).unwrap();
        let spec = &out.manifest.body["spec"];
        assert_eq!(out.manifest.body["apiVersion"], "networking.k8s.io/v1");
        assert_eq!(
            spec["rules"],
            json!([{"http": {"paths": [{
                "path": "/",
                "pathType": "Prefix",
                "backend": {"service": {"name": "web", "port": {"number": 80}}}
            }]}}])
        );
    }

    #[test]
    fn test_tls_companion_secrets() {
        let out = generate(ResourceKind::Ingress, INGRESS, Mode::Apply).unwrap();
        let tls = &out.manifest.body["spec"]["tls"];
        assert_eq!(tls[0], json!({"hosts": ["web.acme.io"], "secretName": "web-17-tls"}));
        assert_eq!(tls[1], json!({"hosts": ["api.acme.io"], "secretName": "api-cert"}));
        assert_eq!(tls[2], json!({"hosts": ["plain.acme.io"], "secretName": "plain"}));

        let names: Vec<_> = out.companions.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["web-17-tls", "api-cert"]);
        let secret = &out.companions[0];
        assert_eq!(secret.kind, ResourceKind::Secret);
        assert_eq!(secret.origin.as_deref(), Some("web"));
        assert_eq!(secret.body["type"], "kubernetes.io/tls");
        assert_eq!(secret.body["metadata"]["annotations"]["kiln.io/certificate-id"], "17");
        assert_eq!(secret.body["apiVersion"], "v1");
    }

    #[test]
    fn test_legacy_backend_untouched() {
        let body = r#"{"apiVersion": "extensions/v1beta1", "metadata": {"name": "old"},
            "spec": {"rules": [{"host": "a.io", "http": {"paths": [{"path": "/", "backend": {"serviceName": "s", "servicePort": 80}}]}}]}}"#;
        let out = generate(ResourceKind::Ingress, body, Mode::Apply).unwrap();
        let path = &out.manifest.body["spec"]["rules"][0]["http"]["paths"][0];
        assert_eq!(path["backend"]["serviceName"], "s");
        assert!(path.get("pathType").is_none());
    }
}
