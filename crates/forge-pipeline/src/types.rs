//! Tekton TaskRun serialization types
//!
//! Typed representation of the `tekton.dev/v1beta1` TaskRun fields forge
//! writes and reads. The schema belongs to Tekton, so schema generation is
//! disabled; the derive only supplies `kube::Resource` for `Api<TaskRun>`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Toleration, Volume};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Tekton TaskRun with an inline task definition
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[kube(
    group = "tekton.dev",
    version = "v1beta1",
    kind = "TaskRun",
    plural = "taskruns",
    namespaced,
    status = "TaskRunStatus",
    schema = "disabled",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunSpec {
    pub task_spec: TaskSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Go duration string, e.g. "14400s"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplate>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Steps run sequentially in one pod; Tekton steps are containers
    pub steps: Vec<Container>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

/// Observed TaskRun state as reported by the Tekton controller
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<TaskRunCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,
}

/// Knative-style condition
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunCondition {
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<StepWaiting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<StepRunning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated: Option<StepTerminated>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepWaiting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepRunning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepTerminated {
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskRunStatus {
    /// The `Succeeded` condition, Tekton's single authoritative outcome signal
    pub fn succeeded_condition(&self) -> Option<&TaskRunCondition> {
        self.conditions.iter().find(|c| c.type_ == "Succeeded")
    }

    /// Whether the named step has finished
    pub fn step_terminated(&self, name: &str) -> bool {
        self.steps
            .iter()
            .any(|s| s.name == name && s.terminated.is_some())
    }

    /// Whether the named step has been reported and is not finished yet
    pub fn step_active(&self, name: &str) -> bool {
        self.steps
            .iter()
            .any(|s| s.name == name && s.terminated.is_none())
    }
}
