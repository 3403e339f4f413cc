//! Job plan builder for forge training and packaging jobs
//!
//! Turns a managed job plus its integration descriptor into a Tekton
//! TaskRun (setup, main, result) and the Secret carrying the serialized
//! job descriptor. Pure compilation crate with no controller logic.

mod compiler;
mod packaging;
mod training;
mod types;

use std::collections::BTreeMap;

use forge_common::crd::ConnectionSpec;
use forge_common::{Error, Result};

pub use compiler::JobPlan;
pub use packaging::{build_packaging_plan, packaging_connections};
pub use training::{build_training_plan, training_connections};
pub use types::{
    PodTemplate, StepRunning, StepState, StepTerminated, StepWaiting, TaskRun, TaskRunCondition,
    TaskRunSpec, TaskRunStatus, TaskSpec,
};

/// Shared scratch volume mount point
pub const WORKSPACE_PATH: &str = "/workspace";
/// Directory the main step writes its outputs to
pub const OUTPUT_DIR: &str = "/workspace/output";
/// Mount point of the descriptor Secret
pub const DESCRIPTOR_DIR: &str = "/etc/forge";
/// Key of the serialized descriptor inside the Secret
pub const DESCRIPTOR_FILE: &str = "descriptor.json";

pub const SETUP_STEP: &str = "setup";
pub const MAIN_STEP: &str = "main";
pub const RESULT_STEP: &str = "result";

/// Resolved connections keyed by connection name
pub type Connections = BTreeMap<String, ConnectionSpec>;

/// Name of the Secret holding a job's descriptor
pub fn descriptor_secret_name(job: &str) -> String {
    format!("{job}-descriptor")
}

/// Name of the ConfigMap the result step writes results into
pub fn results_name(job: &str) -> String {
    format!("{job}-result")
}

/// Absolute path of the descriptor file inside every step
pub fn descriptor_path() -> String {
    format!("{DESCRIPTOR_DIR}/{DESCRIPTOR_FILE}")
}

fn connection<'a>(connections: &'a Connections, name: &str) -> Result<&'a ConnectionSpec> {
    connections
        .get(name)
        .ok_or_else(|| Error::not_found("Connection", name))
}
