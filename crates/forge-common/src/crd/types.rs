//! Types shared by the ModelTraining and ModelPackaging CRDs

use serde::{Deserialize, Serialize};
use serde_json::json;

use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, ObjectValidation, Schema, SchemaObject};
use schemars::JsonSchema;

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of a managed job
///
/// The empty string is the state of a resource the engine has not touched
/// yet. `Succeeded` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Not yet picked up by the engine
    #[default]
    #[serde(rename = "")]
    Unknown,
    /// Child execution resource exists, pod not running yet
    #[serde(rename = "scheduling")]
    Scheduling,
    /// Setup step is fetching source code (training only)
    #[serde(rename = "fetching_code")]
    FetchingCode,
    /// User workload is running
    #[serde(rename = "running")]
    Running,
    /// Result step is capturing outputs (packaging only)
    #[serde(rename = "capturing")]
    Capturing,
    /// Finished successfully
    #[serde(rename = "succeeded")]
    Succeeded,
    /// Finished with an error
    #[serde(rename = "failed")]
    Failed,
}

impl JobState {
    /// Terminal states are settled: no further child mutation happens
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Scheduling => write!(f, "Scheduling"),
            Self::FetchingCode => write!(f, "FetchingCode"),
            Self::Running => write!(f, "Running"),
            Self::Capturing => write!(f, "Capturing"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// A named result captured by the result step
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ResultEntry {
    /// Result name (e.g. "commit_id", "image")
    pub name: String,
    /// Result value
    pub value: String,
}

/// Status shared by ModelTraining and ModelPackaging
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Current lifecycle state
    #[serde(default)]
    pub state: JobState,

    /// Human-readable detail about the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Machine-readable reason for the current message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Named results, populated when the job succeeds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ResultEntry>,

    /// Name of the TaskRun driving this job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_run_name: Option<String>,

    /// Name of the pod executing the TaskRun, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
}

impl JobStatus {
    /// Look up a result by name
    pub fn result(&self, name: &str) -> Option<&str> {
        self.results
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.value.as_str())
    }
}

// =============================================================================
// Inputs
// =============================================================================

/// Quantities for one side of a resource requirement
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ResourceList {
    /// CPU quantity (e.g. "500m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory quantity (e.g. "1Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Number of GPUs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<String>,
}

/// Resource requests and limits for the main step
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ResourceRequirements {
    /// Upper bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceList>,
    /// Scheduling requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceList>,
}

impl ResourceRequirements {
    /// Whether either side asks for a GPU
    pub fn requests_gpu(&self) -> bool {
        [&self.limits, &self.requests]
            .into_iter()
            .flatten()
            .any(|list| list.gpu.as_deref().is_some_and(|q| q != "0"))
    }
}

/// Environment variable passed to the main step
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    pub value: String,
}

/// Schema for a map of arbitrary JSON values.
///
/// Structural CRD schemas need a type on every node, so values are marked
/// `x-kubernetes-preserve-unknown-fields` instead of left unconstrained.
pub(crate) fn free_form_values(_: &mut SchemaGenerator) -> Schema {
    let mut value = SchemaObject::default();
    value
        .extensions
        .insert("x-kubernetes-preserve-unknown-fields".to_string(), json!(true));
    SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        object: Some(Box::new(ObjectValidation {
            additional_properties: Some(Box::new(Schema::Object(value))),
            ..Default::default()
        })),
        ..Default::default()
    }
    .into()
}
