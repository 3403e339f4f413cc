//! CRD printing and installation
//!
//! The operator can install its own CRDs on startup with server-side apply,
//! so CRD versions always match the operator version.

use anyhow::{anyhow, Context as _};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::info;

use forge_common::crd::all_crds;
use forge_common::retry::{retry_with_backoff, RetryConfig};
use forge_common::OPERATOR_NAME;

/// Attempts spent waiting for a CRD to become established
const ESTABLISH_ATTEMPTS: u32 = 10;

/// Every CRD as a multi-document YAML stream
pub fn render() -> anyhow::Result<String> {
    let docs = all_crds()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()
        .context("failed to serialize CRDs")?;
    Ok(docs.join("---\n"))
}

/// Apply every CRD and wait until the API server serves them
pub async fn ensure_installed(client: &Client) -> anyhow::Result<()> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(OPERATOR_NAME).force();

    let mut names = Vec::new();
    for crd in all_crds() {
        let name = crd
            .metadata
            .name
            .clone()
            .ok_or_else(|| anyhow!("generated CRD has no name"))?;
        info!(crd = %name, "installing CRD");
        api.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .with_context(|| format!("failed to install CRD {name}"))?;
        names.push(name);
    }

    let retry = RetryConfig::with_max_attempts(ESTABLISH_ATTEMPTS);
    for name in &names {
        retry_with_backoff(&retry, &format!("wait for CRD {name}"), || {
            let api = api.clone();
            let name = name.clone();
            async move {
                let crd = api.get(&name).await?;
                if is_established(&crd) {
                    Ok(())
                } else {
                    Err(anyhow!("CRD {name} not established yet"))
                }
            }
        })
        .await?;
    }
    info!(count = names.len(), "CRDs installed");
    Ok(())
}

fn is_established(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Established" && c.status == "True")
        })
}
