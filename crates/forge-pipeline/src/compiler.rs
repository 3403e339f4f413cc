//! Pipeline assembly shared by the training and packaging builders
//!
//! Each builder decides what its main step runs. Everything around it comes
//! from here: the helper setup and result steps, volumes, node placement,
//! timeout, ownership and labels.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, ResourceRequirements as K8sResources, Secret,
    SecretVolumeSource, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::Resource;
use serde::Serialize;
use tracing::debug;

use forge_common::config::PipelineConfig;
use forge_common::crd::{ResourceList, ResourceRequirements};
use forge_common::{Error, Result, API_GROUP, MANAGED_BY_LABEL, OPERATOR_NAME};

use crate::types::{PodTemplate, TaskRun, TaskRunSpec, TaskSpec};
use crate::{
    descriptor_path, descriptor_secret_name, results_name, DESCRIPTOR_DIR, DESCRIPTOR_FILE,
    MAIN_STEP, OUTPUT_DIR, RESULT_STEP, SETUP_STEP, WORKSPACE_PATH,
};

const WORKSPACE_VOLUME: &str = "workspace";
const DESCRIPTOR_VOLUME: &str = "descriptor";
const HELPER_CPU: &str = "256m";
const HELPER_MEMORY: &str = "256Mi";
const GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Desired child resources for one managed job
#[derive(Clone, Debug, PartialEq)]
pub struct JobPlan {
    /// Three-step pipeline
    pub task_run: TaskRun,
    /// Serialized job descriptor mounted into every step
    pub descriptor: Secret,
}

/// What the user workload step runs
pub(crate) struct MainStep<'a> {
    pub image: String,
    pub entrypoint: String,
    pub extra_args: Vec<String>,
    pub env: Vec<EnvVar>,
    pub resources: Option<&'a ResourceRequirements>,
    pub privileged: bool,
    pub working_dir: Option<String>,
}

/// Wrap a main step and its descriptor into a complete plan owned by `owner`
pub(crate) fn assemble<K, D>(
    owner: &K,
    main: MainStep<'_>,
    descriptor: &D,
    config: &PipelineConfig,
) -> Result<JobPlan>
where
    K: Resource<DynamicType = ()>,
    D: Serialize,
{
    let kind = K::kind(&());
    let meta = owner.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| Error::internal_with_context(format!("{kind} has no name"), "plan"))?;
    let namespace = meta.namespace.clone().ok_or_else(|| {
        Error::internal_with_context(format!("{kind} '{name}' has no namespace"), "plan")
    })?;
    let owner_ref = owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context(format!("{kind} '{name}' has no uid"), "plan")
    })?;

    let labels = BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string()),
        (
            format!("{API_GROUP}/{}", kind.to_lowercase()),
            name.clone(),
        ),
    ]);
    let child_meta = |child_name: String| ObjectMeta {
        name: Some(child_name),
        namespace: Some(namespace.clone()),
        labels: Some(labels.clone()),
        owner_references: Some(vec![owner_ref.clone()]),
        ..Default::default()
    };

    let descriptor_bytes = serde_json::to_vec(descriptor)
        .map_err(|e| Error::serialization_for(kind.as_ref(), e.to_string()))?;
    let secret_name = descriptor_secret_name(&name);
    let secret = Secret {
        metadata: child_meta(secret_name.clone()),
        data: Some(BTreeMap::from([(
            DESCRIPTOR_FILE.to_string(),
            ByteString(descriptor_bytes),
        )])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    };

    let gpu = main.resources.is_some_and(ResourceRequirements::requests_gpu);
    let pool = config.node_pool(gpu);

    let steps = vec![
        setup_step(&name, config),
        user_step(main),
        result_step(&name, config),
    ];

    let task_run = TaskRun {
        metadata: child_meta(name.clone()),
        spec: TaskRunSpec {
            task_spec: TaskSpec {
                steps,
                volumes: vec![
                    Volume {
                        name: WORKSPACE_VOLUME.to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    },
                    Volume {
                        name: DESCRIPTOR_VOLUME.to_string(),
                        secret: Some(SecretVolumeSource {
                            secret_name: Some(secret_name),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ],
            },
            service_account_name: config.service_account.clone(),
            timeout: Some(format!("{}s", config.timeout)),
            pod_template: Some(PodTemplate {
                node_selector: pool.node_selector.clone(),
                tolerations: pool.tolerations.clone(),
            }),
        },
        status: None,
    };

    debug!(kind = %kind, name = %name, namespace = %namespace, gpu, "assembled job plan");

    Ok(JobPlan {
        task_run,
        descriptor: secret,
    })
}

fn setup_step(name: &str, config: &PipelineConfig) -> Container {
    let mut args = vec![
        "setup".to_string(),
        "--descriptor".to_string(),
        descriptor_path(),
        "--id".to_string(),
        name.to_string(),
        "--api-url".to_string(),
        config.api_url.clone(),
    ];
    if let Some(output) = &config.output_connection {
        args.push("--output-connection".to_string());
        args.push(output.clone());
    }
    helper_step(SETUP_STEP, args, config)
}

fn result_step(name: &str, config: &PipelineConfig) -> Container {
    let args = vec![
        "result".to_string(),
        "--id".to_string(),
        name.to_string(),
        "--output-dir".to_string(),
        OUTPUT_DIR.to_string(),
        "--results".to_string(),
        results_name(name),
    ];
    helper_step(RESULT_STEP, args, config)
}

fn helper_step(step: &str, args: Vec<String>, config: &PipelineConfig) -> Container {
    let fixed = BTreeMap::from([
        ("cpu".to_string(), Quantity(HELPER_CPU.to_string())),
        ("memory".to_string(), Quantity(HELPER_MEMORY.to_string())),
    ]);
    Container {
        name: step.to_string(),
        image: Some(config.helper_image.clone()),
        command: Some(vec![config.helper_binary.clone()]),
        args: Some(args),
        resources: Some(K8sResources {
            limits: Some(fixed.clone()),
            requests: Some(fixed),
            ..Default::default()
        }),
        volume_mounts: Some(volume_mounts()),
        ..Default::default()
    }
}

fn user_step(main: MainStep<'_>) -> Container {
    let mut args = vec![OUTPUT_DIR.to_string(), descriptor_path()];
    args.extend(main.extra_args);

    Container {
        name: MAIN_STEP.to_string(),
        image: Some(main.image),
        command: Some(vec![main.entrypoint]),
        args: Some(args),
        env: (!main.env.is_empty()).then_some(main.env),
        resources: main.resources.map(to_k8s_resources),
        security_context: main.privileged.then(|| SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        volume_mounts: Some(volume_mounts()),
        working_dir: main.working_dir,
        ..Default::default()
    }
}

fn volume_mounts() -> Vec<VolumeMount> {
    vec![
        VolumeMount {
            name: WORKSPACE_VOLUME.to_string(),
            mount_path: WORKSPACE_PATH.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: DESCRIPTOR_VOLUME.to_string(),
            mount_path: DESCRIPTOR_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        },
    ]
}

/// Convert user resource requirements into Kubernetes quantities
pub(crate) fn to_k8s_resources(req: &ResourceRequirements) -> K8sResources {
    K8sResources {
        limits: req.limits.as_ref().map(to_quantities),
        requests: req.requests.as_ref().map(to_quantities),
        ..Default::default()
    }
}

fn to_quantities(list: &ResourceList) -> BTreeMap<String, Quantity> {
    [
        ("cpu", &list.cpu),
        ("memory", &list.memory),
        (GPU_RESOURCE, &list.gpu),
    ]
    .into_iter()
    .filter_map(|(key, value)| {
        value
            .as_ref()
            .map(|q| (key.to_string(), Quantity(q.clone())))
    })
    .collect()
}

/// Merge integration and job environment; job values win on duplicate names
pub(crate) fn merge_env(
    integration: &BTreeMap<String, String>,
    job: impl IntoIterator<Item = (String, String)>,
) -> Vec<EnvVar> {
    let mut merged = integration.clone();
    merged.extend(job);
    merged
        .into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..Default::default()
        })
        .collect()
}
