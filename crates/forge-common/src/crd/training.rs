//! ModelTraining CRD types
//!
//! A `ModelTraining` asks for a model to be trained from a VCS checkout with
//! a named toolchain. The engine realizes it as a three-step TaskRun.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{EnvVar, JobStatus, ResourceRequirements};

/// Input data copied into the workspace before training starts
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataBinding {
    /// Connection holding the data
    pub connection: String,
    /// Destination path inside the workspace
    pub local_path: String,
    /// Path within the connection; defaults to the connection root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
}

/// Training job specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "forge.dev",
    version = "v1alpha1",
    kind = "ModelTraining",
    plural = "modeltrainings",
    shortname = "mt",
    namespaced,
    status = "JobStatus",
    printcolumn = r#"{"name":"Toolchain","type":"string","jsonPath":".spec.toolchain"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModelTrainingSpec {
    /// Name of the ToolchainIntegration that runs this job
    pub toolchain: String,

    /// Override of the integration entrypoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,

    /// Extra positional arguments for the entrypoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Named arguments checked against the toolchain's argument schema
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hyperparameters: BTreeMap<String, String>,

    /// Override of the integration default image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Connection of the repository holding the training code
    pub vcs_name: String,

    /// Branch, tag or commit; falls back to the connection's reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// Directory inside the repository to run from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,

    /// Input data to fetch before training
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataBinding>,

    /// Extra environment for the main step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<EnvVar>,

    /// Resources for the main step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}
