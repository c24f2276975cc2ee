//! Numeric field coercion and placeholder blanking.

use std::collections::HashSet;

use kiln_store::ResourceKind;
use serde_json::{Map, Number, Value};

use crate::error::{EngineError, EngineResult};
use crate::instantiation::Mode;
use crate::renderer::TemplateRenderer;

const POD_NUMERIC_PATHS: &[&str] = &[
    "spec.template.spec.containers.*.ports.*.containerPort",
    "spec.template.spec.initContainers.*.ports.*.containerPort",
    "spec.template.spec.terminationGracePeriodSeconds",
];

/// Dotted paths of the numeric fields of `kind`; `*` matches every array
/// element.
pub fn numeric_paths(kind: ResourceKind) -> Vec<&'static str> {
    let own: &[&str] = match kind {
        ResourceKind::Deployment => &[
            "spec.replicas",
            "spec.revisionHistoryLimit",
            "spec.minReadySeconds",
            "spec.progressDeadlineSeconds",
            "spec.strategy.rollingUpdate.maxSurge",
            "spec.strategy.rollingUpdate.maxUnavailable",
        ],
        ResourceKind::StatefulSet => &[
            "spec.replicas",
            "spec.updateStrategy.rollingUpdate.partition",
        ],
        ResourceKind::DaemonSet => &[
            "spec.minReadySeconds",
            "spec.updateStrategy.rollingUpdate.maxUnavailable",
        ],
        ResourceKind::Job => &[
            "spec.completions",
            "spec.parallelism",
            "spec.backoffLimit",
            "spec.activeDeadlineSeconds",
            "spec.ttlSecondsAfterFinished",
        ],
        ResourceKind::Service => &["spec.ports.*.port", "spec.ports.*.nodePort"],
        ResourceKind::HorizontalPodAutoscaler => &[
            "spec.minReplicas",
            "spec.maxReplicas",
            "spec.targetCPUUtilizationPercentage",
            "spec.metrics.*.resource.target.averageUtilization",
        ],
        ResourceKind::ConfigMap | ResourceKind::Secret | ResourceKind::Ingress => &[],
    };

    let mut paths = own.to_vec();
    if kind.is_pod_bearing() {
        paths.extend_from_slice(POD_NUMERIC_PATHS);
    }
    paths
}

enum Coerced {
    Keep,
    Replace(Value),
    Remove,
    Preserve,
}

fn parse_number(s: &str) -> Option<Number> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Number::from(i));
    }
    s.parse::<f64>().ok().and_then(Number::from_f64)
}

fn is_percentage(s: &str) -> bool {
    s.strip_suffix('%')
        .is_some_and(|n| !n.is_empty() && n.parse::<f64>().is_ok())
}

/// Coerce the numeric fields of a parsed manifest.
///
/// Literal numbers and percentages pass; numeric strings become numbers;
/// blank values are dropped. A field that is still a bare placeholder is
/// kept in preview mode and rejected in apply mode. Returns the JSON
/// pointers of the placeholders kept.
pub fn coerce_numeric_fields(
    body: &mut Value,
    kind: ResourceKind,
    name: &str,
    mode: Mode,
    renderer: &TemplateRenderer,
) -> EngineResult<HashSet<String>> {
    let mut preserved = HashSet::new();

    for path in numeric_paths(kind) {
        let segments: Vec<&str> = path.split('.').collect();
        walk(body, &segments, "", &mut |parent, field, pointer| {
            let outcome = match parent.get(field) {
                Some(Value::Number(_)) => Coerced::Keep,
                Some(Value::Null) => Coerced::Remove,
                Some(Value::String(s)) => {
                    let trimmed = s.trim();
                    if trimmed.is_empty() {
                        Coerced::Remove
                    } else if let Some(n) = parse_number(trimmed) {
                        Coerced::Replace(Value::Number(n))
                    } else if is_percentage(trimmed) {
                        Coerced::Replace(Value::String(trimmed.to_string()))
                    } else if renderer.pure_placeholder(trimmed).is_some() && mode == Mode::Preview
                    {
                        Coerced::Preserve
                    } else {
                        return Err(coercion_error(kind, name, &pointer, s));
                    }
                }
                Some(other) => return Err(coercion_error(kind, name, &pointer, &other.to_string())),
                None => Coerced::Keep,
            };

            match outcome {
                Coerced::Keep => {}
                Coerced::Replace(value) => {
                    parent.insert(field.to_string(), value);
                }
                Coerced::Remove => {
                    parent.remove(field);
                }
                Coerced::Preserve => {
                    preserved.insert(pointer);
                }
            }
            Ok(())
        })?;
    }

    Ok(preserved)
}

fn coercion_error(kind: ResourceKind, name: &str, pointer: &str, value: &str) -> EngineError {
    EngineError::NumericCoercion {
        kind,
        name: name.to_string(),
        field: pointer.trim_start_matches('/').replace('/', "."),
        value: value.to_string(),
    }
}

/// Visit every field matching `segments`, handing the visitor the owning
/// object, the field name and the field's JSON pointer.
fn walk<F>(node: &mut Value, segments: &[&str], pointer: &str, visit: &mut F) -> EngineResult<()>
where
    F: FnMut(&mut Map<String, Value>, &str, String) -> EngineResult<()>,
{
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };

    if *head == "*" {
        if let Value::Array(items) = node {
            for (i, item) in items.iter_mut().enumerate() {
                walk(item, rest, &format!("{}/{}", pointer, i), visit)?;
            }
        }
        return Ok(());
    }

    let Value::Object(map) = node else {
        return Ok(());
    };
    let child_pointer = format!("{}/{}", pointer, head);
    if rest.is_empty() {
        if map.contains_key(*head) {
            visit(map, head, child_pointer)?;
        }
    } else if let Some(child) = map.get_mut(*head) {
        walk(child, rest, &child_pointer, visit)?;
    }
    Ok(())
}

/// Blank every placeholder left in string values and object keys, except
/// the values at `preserved` pointers. Keys that become empty are dropped.
pub fn blank_placeholders(value: &mut Value, renderer: &TemplateRenderer, preserved: &HashSet<String>) {
    blank_at(value, renderer, preserved, "");
}

fn blank_at(value: &mut Value, renderer: &TemplateRenderer, preserved: &HashSet<String>, pointer: &str) {
    match value {
        Value::String(s) => {
            if !preserved.contains(pointer) && renderer.contains_placeholder(s) {
                *s = renderer.blank(s);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                blank_at(item, renderer, preserved, &format!("{}/{}", pointer, i));
            }
        }
        Value::Object(map) => {
            let entries = std::mem::take(map);
            for (key, mut child) in entries {
                let key = if renderer.contains_placeholder(&key) {
                    renderer.blank(&key)
                } else {
                    key
                };
                if key.is_empty() {
                    continue;
                }
                blank_at(&mut child, renderer, preserved, &format!("{}/{}", pointer, key));
                map.insert(key, child);
            }
        }
        _ => {}
    }
}
