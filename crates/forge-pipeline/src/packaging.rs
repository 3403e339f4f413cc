//! Plan builder for ModelPackaging

use std::collections::BTreeMap;

use kube::ResourceExt;
use serde::Serialize;
use serde_json::Value;

use forge_common::config::PipelineConfig;
use forge_common::crd::{
    ConnectionSpec, Integration, IntegrationSpec, ModelPackaging, ModelPackagingSpec,
    PackagingIntegration,
};
use forge_common::schema::BoundTarget;
use forge_common::{Error, Result};

use crate::compiler::{assemble, merge_env, JobPlan, MainStep};
use crate::{connection, Connections};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PackagingDescriptor<'a> {
    id: String,
    spec: &'a ModelPackagingSpec,
    integration: &'a IntegrationSpec,
    arguments: BTreeMap<String, Value>,
    targets: Vec<ResolvedTarget<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_connection: Option<&'a ConnectionSpec>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolvedTarget<'a> {
    name: &'a str,
    connection_name: &'a str,
    connection: &'a ConnectionSpec,
}

/// Connection names a packaging plan needs resolved, without duplicates
pub fn packaging_connections(mp: &ModelPackaging, config: &PipelineConfig) -> Vec<String> {
    let mut names: Vec<String> = mp
        .spec
        .targets
        .iter()
        .map(|t| t.connection_name.clone())
        .collect();
    names.extend(config.output_connection.clone());
    names.sort();
    names.dedup();
    names
}

/// Build the TaskRun and descriptor Secret for a packaging job.
///
/// The main step builds an image, so it runs privileged unless the
/// integration explicitly opts out.
pub fn build_packaging_plan(
    mp: &ModelPackaging,
    packager: &PackagingIntegration,
    connections: &Connections,
    config: &PipelineConfig,
) -> Result<JobPlan> {
    let name = mp.name_any();
    let pi = packager.integration();

    let arguments = pi.schema.arguments.validate(&name, &mp.spec.arguments)?;

    let targets = mp
        .spec
        .targets
        .iter()
        .map(|t| {
            Ok(ResolvedTarget {
                name: &t.name,
                connection_name: &t.connection_name,
                connection: connection(connections, &t.connection_name)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let bound: Vec<_> = targets
        .iter()
        .map(|t| BoundTarget {
            name: t.name,
            connection_type: &t.connection.type_,
        })
        .collect();
    pi.schema.validate_targets(&name, &bound)?;

    let output_connection = config
        .output_connection
        .as_deref()
        .map(|n| connection(connections, n))
        .transpose()?;

    let image = mp
        .spec
        .image
        .clone()
        .or_else(|| pi.default_image.clone())
        .ok_or_else(|| {
            Error::validation_for_field(
                &name,
                "spec.image",
                format!(
                    "no image given and packaging integration '{}' has no default image",
                    mp.spec.integration_name
                ),
            )
        })?;

    let main = MainStep {
        image,
        entrypoint: pi.entrypoint.clone(),
        extra_args: vec![],
        env: merge_env(&pi.additional_environments, std::iter::empty()),
        resources: mp.spec.resources.as_ref(),
        privileged: packager.privileged(),
        working_dir: None,
    };

    let descriptor = PackagingDescriptor {
        id: name,
        spec: &mp.spec,
        integration: pi,
        arguments,
        targets,
        output_connection,
    };

    assemble(mp, main, &descriptor, config)
}
