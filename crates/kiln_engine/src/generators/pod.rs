//! Transforms shared by every pod-bearing kind.

use kiln_store::ResourceKind;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{is_blank, object_at, shell, Companion, GenerationRequest};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

pub const LOG_PATH_LIST: &str = "logPathList";

const OPTIONAL_BLOCKS: &[&str] = &["nodeSelector", "affinity", "volumes"];

/// Label key identifying the controller that owns a pod, e.g.
/// `deployment.kiln.io/name`.
pub fn controller_label(kind: ResourceKind, config: &EngineConfig) -> String {
    format!("{}.{}/name", kind.as_str().to_ascii_lowercase(), config.label_domain)
}

/// Rewrite an image hosted on a recognized internal registry to
/// `registry_domain`. Other images are left alone.
pub fn rewrite_image(image: &str, config: &EngineConfig, registry_domain: &str) -> Option<String> {
    if registry_domain.is_empty() {
        return None;
    }
    let (host, rest) = image.split_once('/')?;
    let is_host = host.contains('.') || host.contains(':') || host == "localhost";
    (is_host && config.is_internal_registry(host)).then(|| format!("{}/{}", registry_domain, rest))
}

/// Apply the pod-bearing transforms to `body` and return the log-collection
/// ConfigMaps they produced.
pub(crate) fn transform_pod(
    req: &GenerationRequest<'_>,
    kind: ResourceKind,
    name: &str,
    body: &mut Value,
) -> EngineResult<Vec<Companion>> {
    let corrupt = |message: String| EngineError::corrupt(kind, name, message);

    let pod_spec = body
        .pointer_mut("/spec/template/spec")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| corrupt("spec.template.spec is missing".to_string()))?;

    normalize_host_network(pod_spec).map_err(corrupt)?;

    let mut companions = Vec::new();
    let mut log_volumes = Vec::new();

    for list in ["initContainers", "containers"] {
        let Some(containers) = pod_spec.get_mut(list).and_then(Value::as_array_mut) else {
            continue;
        };
        for container in containers.iter_mut() {
            let container = container
                .as_object_mut()
                .ok_or_else(|| corrupt(format!("{} entries must be mappings", list)))?;
            let container_name = container
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            tokenize_commands(container).map_err(corrupt)?;
            assemble_env(container).map_err(corrupt)?;

            if let Some(image) = container.get("image").and_then(Value::as_str) {
                if let Some(rewritten) = rewrite_image(image, req.config, req.context.registry_domain()) {
                    debug!("Rewriting image {} to {}", image, rewritten);
                    container.insert("image".to_string(), Value::String(rewritten));
                }
            }

            let log_paths = take_log_paths(container, req);
            if list == "containers" && !log_paths.is_empty() {
                let (companion, volume) =
                    log_collection(req, name, &container_name, &log_paths, container);
                companions.push(companion);
                log_volumes.push(volume);
            }
        }
    }

    if !log_volumes.is_empty() {
        let volumes = pod_spec
            .entry("volumes")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !volumes.is_array() {
            *volumes = Value::Array(Vec::new());
        }
        if let Some(volumes) = volumes.as_array_mut() {
            volumes.extend(log_volumes);
        }
    }

    if req.context.namespace.has_image_secret && !req.config.image_pull_secret.is_empty() {
        add_image_pull_secret(pod_spec, &req.config.image_pull_secret);
    }

    apply_controller_label(body, kind, name, req.config);
    Ok(companions)
}

fn normalize_host_network(pod_spec: &mut Map<String, Value>) -> Result<(), String> {
    let normalized = match pod_spec.get("hostNetwork") {
        None | Some(Value::Bool(_)) => return Ok(()),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => return Err(format!("hostNetwork must be 0 or 1, got {}", n)),
        },
        Some(Value::String(s)) => match s.trim() {
            "" => None,
            "0" | "false" => Some(false),
            "1" | "true" => Some(true),
            other => return Err(format!("hostNetwork must be 0 or 1, got '{}'", other)),
        },
        Some(Value::Null) => None,
        Some(other) => return Err(format!("hostNetwork must be 0 or 1, got {}", other)),
    };
    match normalized {
        Some(flag) => pod_spec.insert("hostNetwork".to_string(), Value::Bool(flag)),
        None => pod_spec.remove("hostNetwork"),
    };
    Ok(())
}

fn split_in_place(map: &mut Map<String, Value>, field: &str) -> Result<(), String> {
    if let Some(Value::String(line)) = map.get(field) {
        let words = shell::split(line).map_err(|e| format!("{}: {}", field, e))?;
        if words.is_empty() {
            map.remove(field);
        } else {
            map.insert(field.to_string(), json!(words));
        }
    }
    Ok(())
}

fn tokenize_commands(container: &mut Map<String, Value>) -> Result<(), String> {
    split_in_place(container, "command")?;
    split_in_place(container, "args")?;

    if let Some(lifecycle) = container.get_mut("lifecycle").and_then(Value::as_object_mut) {
        for hook in ["postStart", "preStop"] {
            let exec = lifecycle
                .get_mut(hook)
                .and_then(|h| h.get_mut("exec"))
                .and_then(Value::as_object_mut);
            if let Some(exec) = exec {
                split_in_place(exec, "command")?;
            }
        }
    }
    Ok(())
}

fn scalar_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Split a `source:key` reference; the key defaults to the variable name.
fn key_ref(reference: &str, env_name: &str) -> Value {
    let (source, key) = match reference.split_once(':') {
        Some((source, key)) if !key.is_empty() => (source, key),
        Some((source, _)) => (source, env_name),
        None => (reference, env_name),
    };
    json!({"name": source, "key": key})
}

/// Expand typed env entries into native `env` and `envFrom` lists. Entries
/// without a `type` are taken as already native.
fn assemble_env(container: &mut Map<String, Value>) -> Result<(), String> {
    let entries = match container.remove("env") {
        Some(Value::Array(entries)) => entries,
        Some(other) if is_blank(&other) => return Ok(()),
        Some(other) => return Err(format!("env must be a list, got {}", other)),
        None => return Ok(()),
    };

    let mut env = Vec::new();
    let mut env_from = Vec::new();
    for entry in entries {
        let Some(entry_type) = entry.get("type").and_then(Value::as_str).map(str::to_string) else {
            env.push(entry);
            continue;
        };
        let env_name = match entry.get("key").or_else(|| entry.get("name")) {
            Some(v) => scalar_string(Some(v)),
            None => String::new(),
        };
        let value = scalar_string(entry.get("value"));

        match entry_type.as_str() {
            "custom" => {
                if !env_name.is_empty() {
                    env.push(json!({"name": env_name, "value": value}));
                }
            }
            "fromField" => {
                if !env_name.is_empty() {
                    env.push(json!({"name": env_name, "valueFrom": {"fieldRef": {"fieldPath": value}}}));
                }
            }
            "fromConfigMapKey" => {
                if !env_name.is_empty() {
                    let reference = key_ref(&value, &env_name);
                    env.push(json!({"name": env_name, "valueFrom": {"configMapKeyRef": reference}}));
                }
            }
            "fromSecretKey" => {
                if !env_name.is_empty() {
                    let reference = key_ref(&value, &env_name);
                    env.push(json!({"name": env_name, "valueFrom": {"secretKeyRef": reference}}));
                }
            }
            "fromConfigMapFile" => env_from.push(json!({"configMapRef": {"name": value}})),
            "fromSecretFile" => env_from.push(json!({"secretRef": {"name": value}})),
            other => return Err(format!("unknown env entry type '{}'", other)),
        }
    }

    if !env.is_empty() {
        container.insert("env".to_string(), Value::Array(env));
    }
    if !env_from.is_empty() {
        match container.get_mut("envFrom").and_then(Value::as_array_mut) {
            Some(existing) => existing.extend(env_from),
            None => {
                container.insert("envFrom".to_string(), Value::Array(env_from));
            }
        }
    }
    Ok(())
}

fn take_log_paths(container: &mut Map<String, Value>, req: &GenerationRequest<'_>) -> Vec<String> {
    match container.remove(LOG_PATH_LIST) {
        Some(Value::Array(paths)) => paths
            .iter()
            .filter_map(Value::as_str)
            .map(|p| req.renderer.blank(p).trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        Some(Value::String(path)) => {
            let path = req.renderer.blank(&path).trim().to_string();
            if path.is_empty() {
                Vec::new()
            } else {
                vec![path]
            }
        }
        _ => Vec::new(),
    }
}

/// Build the companion ConfigMap for a container's log paths, mount it into
/// the container and return the pod volume backing the mount.
fn log_collection(
    req: &GenerationRequest<'_>,
    resource: &str,
    container_name: &str,
    paths: &[String],
    container: &mut Map<String, Value>,
) -> (Companion, Value) {
    let config_map = format!("{}-{}-non-standard-configmap", resource, container_name);
    let volume_name = format!("{}-log-config", container_name);
    let mount_path = format!(
        "{}/{}",
        req.config.log_config_mount_path.trim_end_matches('/'),
        container_name
    );

    let data: Map<String, Value> = paths
        .iter()
        .enumerate()
        .map(|(i, path)| (format!("log-path-{}", i), Value::String(path.clone())))
        .collect();

    let mut annotations = Map::new();
    if let Some(pipeline) = req.context.non_standard_log_pipeline() {
        annotations.insert(req.config.label("log-pipeline"), json!(pipeline));
    }

    let body = json!({
        "metadata": {"name": config_map, "annotations": annotations},
        "data": data,
    });

    let mount = json!({"name": volume_name, "mountPath": mount_path, "readOnly": true});
    match container.get_mut("volumeMounts").and_then(Value::as_array_mut) {
        Some(mounts) => mounts.push(mount),
        None => {
            container.insert("volumeMounts".to_string(), json!([mount]));
        }
    }

    let volume = json!({"name": volume_name, "configMap": {"name": config_map}});
    (
        Companion {
            kind: ResourceKind::ConfigMap,
            name: config_map,
            body,
        },
        volume,
    )
}

fn add_image_pull_secret(pod_spec: &mut Map<String, Value>, secret: &str) {
    let secrets = pod_spec
        .entry("imagePullSecrets")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !secrets.is_array() {
        *secrets = Value::Array(Vec::new());
    }
    if let Some(secrets) = secrets.as_array_mut() {
        let present = secrets
            .iter()
            .any(|s| s.get("name").and_then(Value::as_str) == Some(secret));
        if !present {
            secrets.push(json!({"name": secret}));
        }
    }
}

fn apply_controller_label(body: &mut Value, kind: ResourceKind, name: &str, config: &EngineConfig) {
    let label = controller_label(kind, config);

    for path in [&["metadata", "labels"][..], &["spec", "template", "metadata", "labels"][..]] {
        if let Some(labels) = object_at(body, path) {
            labels.insert(label.clone(), Value::String(name.to_string()));
        }
    }

    // Job selectors are generated by the orchestrator.
    if kind == ResourceKind::Job {
        return;
    }
    if let Some(spec) = body.get_mut("spec").and_then(Value::as_object_mut) {
        if spec.get("selector").map_or(true, is_blank) {
            spec.insert("selector".to_string(), json!({"matchLabels": {label: name}}));
        }
    }
}

/// Drop `nodeSelector`, `affinity` and `volumes` when they end up empty.
pub(crate) fn omit_empty_blocks(body: &mut Value) {
    if let Some(pod_spec) = body
        .pointer_mut("/spec/template/spec")
        .and_then(Value::as_object_mut)
    {
        for block in OPTIONAL_BLOCKS {
            if pod_spec.get(*block).is_some_and(is_blank) {
                pod_spec.remove(*block);
            }
        }
    }
}
