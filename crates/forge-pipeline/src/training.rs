//! Plan builder for ModelTraining

use std::collections::BTreeMap;

use kube::ResourceExt;
use serde::Serialize;
use serde_json::Value;

use forge_common::config::PipelineConfig;
use forge_common::crd::{
    ConnectionSpec, DataBinding, Integration, IntegrationSpec, ModelTraining, ModelTrainingSpec,
    ToolchainIntegration,
};
use forge_common::schema::BoundTarget;
use forge_common::{Error, Result};

use crate::compiler::{assemble, merge_env, JobPlan, MainStep};
use crate::{connection, Connections, WORKSPACE_PATH};

/// Target slot names a toolchain schema may declare for training inputs
const VCS_TARGET: &str = "vcs";
const DATA_TARGET: &str = "data";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrainingDescriptor<'a> {
    id: String,
    spec: &'a ModelTrainingSpec,
    toolchain: &'a IntegrationSpec,
    hyperparameters: BTreeMap<String, Value>,
    vcs: &'a ConnectionSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<&'a str>,
    data: Vec<DataInput<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_connection: Option<&'a ConnectionSpec>,
}

#[derive(Serialize)]
struct DataInput<'a> {
    binding: &'a DataBinding,
    connection: &'a ConnectionSpec,
}

/// Connection names a training plan needs resolved, without duplicates
pub fn training_connections(mt: &ModelTraining, config: &PipelineConfig) -> Vec<String> {
    let mut names = vec![mt.spec.vcs_name.clone()];
    names.extend(mt.spec.data.iter().map(|d| d.connection.clone()));
    names.extend(config.output_connection.clone());
    names.sort();
    names.dedup();
    names
}

/// Build the TaskRun and descriptor Secret for a training job.
///
/// Hyperparameters are validated against the toolchain's argument schema
/// and the VCS/data bindings against its target slots before anything is
/// rendered.
pub fn build_training_plan(
    mt: &ModelTraining,
    toolchain: &ToolchainIntegration,
    connections: &Connections,
    config: &PipelineConfig,
) -> Result<JobPlan> {
    let name = mt.name_any();
    let ti = toolchain.integration();

    let raw: BTreeMap<String, Value> = mt
        .spec
        .hyperparameters
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let hyperparameters = ti.schema.arguments.validate(&name, &raw)?;

    let vcs = connection(connections, &mt.spec.vcs_name)?;
    let data = mt
        .spec
        .data
        .iter()
        .map(|binding| {
            Ok(DataInput {
                binding,
                connection: connection(connections, &binding.connection)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut bound = vec![BoundTarget {
        name: VCS_TARGET,
        connection_type: &vcs.type_,
    }];
    bound.extend(data.iter().map(|d| BoundTarget {
        name: DATA_TARGET,
        connection_type: &d.connection.type_,
    }));
    ti.schema.validate_targets(&name, &bound)?;

    let output_connection = config
        .output_connection
        .as_deref()
        .map(|n| connection(connections, n))
        .transpose()?;

    let image = mt
        .spec
        .image
        .clone()
        .or_else(|| ti.default_image.clone())
        .ok_or_else(|| {
            Error::validation_for_field(
                &name,
                "spec.image",
                format!(
                    "no image given and toolchain '{}' has no default image",
                    mt.spec.toolchain
                ),
            )
        })?;

    let working_dir = match mt.spec.work_dir.as_deref() {
        Some(dir) => format!("{WORKSPACE_PATH}/{}", dir.trim_start_matches('/')),
        None => WORKSPACE_PATH.to_string(),
    };

    let main = MainStep {
        image,
        entrypoint: mt
            .spec
            .entrypoint
            .clone()
            .unwrap_or_else(|| ti.entrypoint.clone()),
        extra_args: mt.spec.args.clone(),
        env: merge_env(
            &ti.additional_environments,
            mt.spec
                .envs
                .iter()
                .map(|e| (e.name.clone(), e.value.clone())),
        ),
        resources: mt.spec.resources.as_ref(),
        privileged: toolchain.privileged(),
        working_dir: Some(working_dir),
    };

    let descriptor = TrainingDescriptor {
        id: name,
        spec: &mt.spec,
        toolchain: ti,
        hyperparameters,
        vcs,
        reference: mt.spec.reference.as_deref().or(vcs.reference.as_deref()),
        data,
        output_connection,
    };

    assemble(mt, main, &descriptor, config)
}
