//! Connection CRD
//!
//! A connection names an external system (git repository, bucket, registry)
//! together with the credentials needed to reach it. The engine resolves
//! connections while building a job plan and never writes them.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// External system connection
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "forge.dev",
    version = "v1alpha1",
    kind = "Connection",
    plural = "connections",
    shortname = "conn",
    namespaced,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"URI","type":"string","jsonPath":".spec.uri"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    /// Connection type (git, s3, gcs, azureblob, docker, ecr)
    #[serde(rename = "type")]
    pub type_: String,

    /// Location of the external system
    pub uri: String,

    /// Cloud region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Username for basic auth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password for basic auth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Cloud role to assume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Access key id
    #[serde(default, rename = "keyID", skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    /// Access key secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<String>,

    /// SSH public key for host verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// VCS reference (branch, tag or commit) used when a job gives none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// Free-text description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Link to the system's web UI
    #[serde(default, rename = "webUILink", skip_serializing_if = "Option::is_none")]
    pub web_ui_link: Option<String>,
}
