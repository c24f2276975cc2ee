//! Generated manifests and the bundle they are returned in.

use std::collections::BTreeMap;

use kiln_store::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One concrete, submittable orchestrator object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: String,
    /// The native object: `apiVersion`, `kind`, `metadata`, `spec`/`data`.
    pub body: Value,
    /// Name of the resource whose generation produced this one as a side
    /// effect; `None` for explicitly selected resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl Manifest {
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.body)
    }
}

/// Bundle entry: the manifest plus the context it was generated from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleEntry {
    pub name: String,
    pub manifest: Value,
    pub context: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Manifests keyed by kind abbreviation (`deploy`, `svc`, `cm`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ManifestBundle {
    entries: BTreeMap<String, Vec<BundleEntry>>,
}

impl ManifestBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, manifest: &Manifest, context: BTreeMap<String, String>) {
        self.entries
            .entry(manifest.kind.abbreviation().to_string())
            .or_default()
            .push(BundleEntry {
                name: manifest.name.clone(),
                manifest: manifest.body.clone(),
                context,
                origin: manifest.origin.clone(),
            });
    }

    pub fn get(&self, kind: ResourceKind) -> &[BundleEntry] {
        self.entries
            .get(kind.abbreviation())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn find(&self, kind: ResourceKind, name: &str) -> Option<&BundleEntry> {
        self.get(kind).iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BundleEntry)> {
        self.entries
            .iter()
            .flat_map(|(abbr, entries)| entries.iter().map(move |e| (abbr.as_str(), e)))
    }
}

/// Kind and name of a resource in a compilation result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
}

/// A resource that could not be generated or submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureEntry {
    pub kind: ResourceKind,
    pub name: String,
    pub class: String,
    pub message: String,
}
