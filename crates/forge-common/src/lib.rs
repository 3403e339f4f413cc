//! Common types for forge: CRDs, errors, configuration and utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod hash;
pub mod retry;
pub mod schema;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace for forge system resources (integrations, connections, operator)
pub const FORGE_SYSTEM_NAMESPACE: &str = "forge";

/// Field manager / reporting component name used for API writes
pub const OPERATOR_NAME: &str = "forge-operator";

/// Label marking objects created by the operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label selector matching every object the operator created
pub const MANAGED_BY_SELECTOR: &str = "app.kubernetes.io/managed-by=forge-operator";

/// API group of the forge CRDs
pub const API_GROUP: &str = "forge.dev";
