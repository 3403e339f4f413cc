//! Static pipeline configuration
//!
//! Everything the plan builder attaches to a pipeline that does not come
//! from user input: helper image, node placement, timeout, identity.
//! Loaded once from YAML at startup and shared read-only.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Toleration;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, FORGE_SYSTEM_NAMESPACE};

/// Default wall-clock limit for a pipeline (4 hours)
pub const DEFAULT_TIMEOUT_SECS: u64 = 4 * 60 * 60;

/// Default path of the helper executable inside the helper image
pub const DEFAULT_HELPER_BINARY: &str = "/opt/forge/forge-helper";

/// Node placement for pipeline pods
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePool {
    /// Node labels the pod must match
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Taints the pod tolerates
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

/// Placement for CPU-only and GPU pipelines
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NodePools {
    /// Used when the main step requests no GPU
    pub default: NodePool,
    /// Used when the main step requests a GPU
    pub gpu: NodePool,
}

/// Engine configuration consumed by the plan builder and the operator
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Image carrying the helper executable for the setup and result steps
    pub helper_image: String,
    /// Path of the helper executable inside `helper_image`
    pub helper_binary: String,
    /// API endpoint the helper reports to
    pub api_url: String,
    /// Connection receiving job outputs, if any
    pub output_connection: Option<String>,
    /// Service account the pipeline pod runs as
    pub service_account: Option<String>,
    /// Hard execution limit in seconds
    pub timeout: u64,
    /// Node placement
    pub node_pools: NodePools,
    /// Namespace holding integrations and connections
    pub integration_namespace: String,
    /// Run the ModelTraining controller
    pub training_enabled: bool,
    /// Run the ModelPackaging controller
    pub packaging_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            helper_image: "forge/helper:latest".to_string(),
            helper_binary: DEFAULT_HELPER_BINARY.to_string(),
            api_url: "http://forge-api.forge.svc:5000".to_string(),
            output_connection: None,
            service_account: None,
            timeout: DEFAULT_TIMEOUT_SECS,
            node_pools: NodePools::default(),
            integration_namespace: FORGE_SYSTEM_NAMESPACE.to_string(),
            training_enabled: true,
            packaging_enabled: true,
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse the configuration file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::internal_with_context(
                format!("failed to read {}: {e}", path.display()),
                "config",
            )
        })?;
        Self::from_yaml(&yaml)
    }

    /// Pipeline timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Node pool for a pipeline whose main step does or does not need a GPU
    pub fn node_pool(&self, gpu: bool) -> &NodePool {
        if gpu {
            &self.node_pools.gpu
        } else {
            &self.node_pools.default
        }
    }
}
