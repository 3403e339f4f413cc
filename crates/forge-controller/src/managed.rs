//! Per-kind bindings for the generic reconciler
//!
//! Training and packaging share one reconciliation loop. What differs
//! between them is captured here: which integration kind they reference,
//! which connections they need, how their plan is built and which
//! intermediate states status derivation may report.

use forge_common::config::PipelineConfig;
use forge_common::crd::{
    Integration, JobState, JobStatus, ModelPackaging, ModelTraining, PackagingIntegration,
    ToolchainIntegration,
};
use forge_common::Result;
use forge_pipeline::{
    build_packaging_plan, build_training_plan, packaging_connections, training_connections,
    Connections, JobPlan,
};

use crate::queue::ResourceKind;
use crate::store::KubeObject;

/// A job kind the engine reconciles into a TaskRun
pub trait ManagedResource: KubeObject {
    /// Descriptor kind referenced by the spec
    type Integration: Integration + KubeObject;

    /// Queue kind
    const KIND: ResourceKind;

    /// State reported while the setup step is still running
    const SETUP_STATE: Option<JobState>;

    /// State reported once the main step finished and results are captured
    const CAPTURE_STATE: Option<JobState>;

    /// Name of the integration descriptor to look up
    fn integration_name(&self) -> &str;

    fn job_status(&self) -> Option<&JobStatus>;

    fn job_status_mut(&mut self) -> &mut JobStatus;

    /// Names of every connection `build_plan` needs
    fn connection_names(&self, config: &PipelineConfig) -> Vec<String>;

    fn build_plan(
        &self,
        integration: &Self::Integration,
        connections: &Connections,
        config: &PipelineConfig,
    ) -> Result<JobPlan>;
}

impl ManagedResource for ModelTraining {
    type Integration = ToolchainIntegration;

    const KIND: ResourceKind = ResourceKind::Training;
    const SETUP_STATE: Option<JobState> = Some(JobState::FetchingCode);
    const CAPTURE_STATE: Option<JobState> = None;

    fn integration_name(&self) -> &str {
        &self.spec.toolchain
    }

    fn job_status(&self) -> Option<&JobStatus> {
        self.status.as_ref()
    }

    fn job_status_mut(&mut self) -> &mut JobStatus {
        self.status.get_or_insert_with(JobStatus::default)
    }

    fn connection_names(&self, config: &PipelineConfig) -> Vec<String> {
        training_connections(self, config)
    }

    fn build_plan(
        &self,
        integration: &ToolchainIntegration,
        connections: &Connections,
        config: &PipelineConfig,
    ) -> Result<JobPlan> {
        build_training_plan(self, integration, connections, config)
    }
}

impl ManagedResource for ModelPackaging {
    type Integration = PackagingIntegration;

    const KIND: ResourceKind = ResourceKind::Packaging;
    const SETUP_STATE: Option<JobState> = None;
    const CAPTURE_STATE: Option<JobState> = Some(JobState::Capturing);

    fn integration_name(&self) -> &str {
        &self.spec.integration_name
    }

    fn job_status(&self) -> Option<&JobStatus> {
        self.status.as_ref()
    }

    fn job_status_mut(&mut self) -> &mut JobStatus {
        self.status.get_or_insert_with(JobStatus::default)
    }

    fn connection_names(&self, config: &PipelineConfig) -> Vec<String> {
        packaging_connections(self, config)
    }

    fn build_plan(
        &self,
        integration: &PackagingIntegration,
        connections: &Connections,
        config: &PipelineConfig,
    ) -> Result<JobPlan> {
        build_packaging_plan(self, integration, connections, config)
    }
}
