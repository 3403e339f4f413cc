//! Integration descriptor CRDs
//!
//! `ToolchainIntegration` describes how to run a training toolchain,
//! `PackagingIntegration` how to run a model packager. Both are reference
//! data written by administrators and only ever read by the engine.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::schema::IntegrationSchema;

/// Fields common to every integration descriptor
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationSpec {
    /// Path of the executable the main step runs
    pub entrypoint: String,

    /// Image used when a job does not override it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_image: Option<String>,

    /// Environment variables injected into the main step
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_environments: BTreeMap<String, String>,

    /// Targets and arguments accepted by this integration
    #[serde(default)]
    pub schema: IntegrationSchema,
}

/// Training toolchain descriptor
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "forge.dev",
    version = "v1alpha1",
    kind = "ToolchainIntegration",
    plural = "toolchainintegrations",
    shortname = "ti",
    namespaced,
    printcolumn = r#"{"name":"Entrypoint","type":"string","jsonPath":".spec.entrypoint"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.defaultImage"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ToolchainIntegrationSpec {
    /// Common integration fields
    #[serde(flatten)]
    pub integration: IntegrationSpec,
}

/// Model packager descriptor
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "forge.dev",
    version = "v1alpha1",
    kind = "PackagingIntegration",
    plural = "packagingintegrations",
    shortname = "pi",
    namespaced,
    printcolumn = r#"{"name":"Entrypoint","type":"string","jsonPath":".spec.entrypoint"}"#,
    printcolumn = r#"{"name":"Privileged","type":"boolean","jsonPath":".spec.privileged"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PackagingIntegrationSpec {
    /// Common integration fields
    #[serde(flatten)]
    pub integration: IntegrationSpec,

    /// Run the main step privileged; packagers build images so this defaults to true
    #[serde(default = "default_privileged")]
    pub privileged: bool,
}

fn default_privileged() -> bool {
    true
}

/// Read access to the parts of a descriptor the plan builder needs
pub trait Integration {
    /// Common descriptor fields
    fn integration(&self) -> &IntegrationSpec;

    /// Whether the main step runs with elevated privileges
    fn privileged(&self) -> bool;
}

impl Integration for ToolchainIntegration {
    fn integration(&self) -> &IntegrationSpec {
        &self.spec.integration
    }

    fn privileged(&self) -> bool {
        false
    }
}

impl Integration for PackagingIntegration {
    fn integration(&self) -> &IntegrationSpec {
        &self.spec.integration
    }

    fn privileged(&self) -> bool {
        self.spec.privileged
    }
}
