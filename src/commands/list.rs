use anyhow::Context;
use kube::api::ListParams;
use kube::{Api, Client};

use bundleops::crd::Bundle;

pub async fn run() -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .context("Failed to connect to Kubernetes cluster. Is your kubeconfig valid?")?;

    let bundles: Api<Bundle> = Api::all(client);

    let bundle_list = bundles
        .list(&ListParams::default())
        .await
        .context("Failed to list bundles. Is the CRD installed? Check RBAC permissions.")?;

    let mut rows: Vec<(String, String, String, String, String)> = bundle_list
        .into_iter()
        .map(|b| {
            let namespace = b.metadata.namespace.clone().unwrap_or_default();
            let name = b.metadata.name.clone().unwrap_or_default();
            let repository = b.spec.registry.url.clone();
            let status = b.status.as_ref();
            let phase = status
                .and_then(|s| s.phase)
                .map(|p| format!("{p:?}"))
                .unwrap_or_else(|| "Unknown".to_string());
            let tag = status
                .and_then(|s| s.last_applied_tag.clone())
                .unwrap_or_else(|| "-".to_string());
            (namespace, name, repository, phase, tag)
        })
        .collect();

    rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    println!(
        "{:<20} {:<30} {:<45} {:<10} {:<20}",
        "NAMESPACE", "NAME", "REPOSITORY", "PHASE", "TAG"
    );
    println!("{}", "-".repeat(125));

    for (namespace, name, repository, phase, tag) in &rows {
        println!(
            "{:<20} {:<30} {:<45} {:<10} {:<20}",
            namespace, name, repository, phase, tag
        );
    }

    println!("\nTotal: {} bundles", rows.len());

    Ok(())
}
