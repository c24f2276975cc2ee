//! # kiln_store
//!
//! Storage side of kiln: the variable store, the template repository with its
//! snapshot chain, and the instance ledger.
//!
//! All stores are in-memory, internally locked, and safe to share across
//! threads. A [`WorkspaceLoader`] fills them from a directory on disk.
//!
//! ## Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use kiln_store::{NewVariable, ResourceKind, TemplateRepository, VariableStore};
//!
//! let variables = VariableStore::new();
//! variables.create_variable(NewVariable::custom("REPLICAS", "2")).unwrap();
//!
//! let repo = TemplateRepository::new();
//! let cm = repo.save_template(
//!     ResourceKind::ConfigMap,
//!     r#"{"metadata":{"name":"cm1"},"data":{"replicas":"{{REPLICAS}}"}}"#,
//! );
//! let mut map = BTreeMap::new();
//! map.insert(ResourceKind::ConfigMap, vec![cm.id]);
//! let snapshot = repo.create_snapshot("group-1", map, None).unwrap();
//! assert_eq!(snapshot.parent_snapshot_id, None);
//! ```

pub mod error;
pub mod instances;
pub mod loader;
pub mod models;
pub mod templates;
pub mod variables;

pub use error::{StoreError, StoreResult};
pub use instances::InstanceLedger;
pub use loader::{load_ledger, save_ledger, Workspace, WorkspaceFile, WorkspaceLoader};
pub use models::*;
pub use templates::{derive_name, SnapshotChange, TemplateRepository};
pub use variables::{NewVariable, VariableStore};
