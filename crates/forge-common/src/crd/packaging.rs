//! ModelPackaging CRD types
//!
//! A `ModelPackaging` turns a trained artifact into a deployable image (or
//! another target format) with a named packaging integration.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{JobStatus, ResourceRequirements};

/// Binding of an integration target slot to a connection
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Target slot declared by the integration schema
    pub name: String,
    /// Connection bound to the slot
    pub connection_name: String,
}

/// Packaging job specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "forge.dev",
    version = "v1alpha1",
    kind = "ModelPackaging",
    plural = "modelpackagings",
    shortname = "mp",
    namespaced,
    status = "JobStatus",
    printcolumn = r#"{"name":"Integration","type":"string","jsonPath":".spec.integrationName"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModelPackagingSpec {
    /// Name of the PackagingIntegration that runs this job
    pub integration_name: String,

    /// Trained artifact to package
    pub artifact_name: String,

    /// Override of the integration default image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Named arguments checked against the integration's argument schema
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "super::types::free_form_values")]
    pub arguments: BTreeMap<String, serde_json::Value>,

    /// Target slot bindings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,

    /// Resources for the main step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}
