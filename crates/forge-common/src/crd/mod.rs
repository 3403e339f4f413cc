//! Custom Resource Definitions for forge

mod connection;
mod integration;
mod packaging;
mod training;
mod types;

pub use connection::{Connection, ConnectionSpec};
pub use integration::{
    Integration, IntegrationSpec, PackagingIntegration, PackagingIntegrationSpec,
    ToolchainIntegration, ToolchainIntegrationSpec,
};
pub use packaging::{ModelPackaging, ModelPackagingSpec, Target};
pub use training::{DataBinding, ModelTraining, ModelTrainingSpec};
pub use types::{EnvVar, JobState, JobStatus, ResourceList, ResourceRequirements, ResultEntry};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// Every CRD the operator owns, in install order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        Connection::crd(),
        ToolchainIntegration::crd(),
        PackagingIntegration::crd(),
        ModelTraining::crd(),
        ModelPackaging::crd(),
    ]
}
