use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::ListParams;
use kube::{Api, Client};

use bundleops::crd::Bundle;

pub async fn run() -> anyhow::Result<()> {
    println!("Running cluster connectivity checks...\n");

    // 1. Build Kubernetes client from kubeconfig
    print!("  Kubeconfig .................. ");
    let client = match Client::try_default().await {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot load kubeconfig: {}", e);
        }
    };

    // 2. Verify actual cluster connectivity by fetching server version
    print!("  Cluster connection .......... ");
    let version = match client.apiserver_version().await {
        Ok(v) => {
            println!("OK (v{}.{})", v.major, v.minor);
            Some(v)
        }
        Err(e) => {
            println!("FAIL");
            println!("\n  Error: {}", e);
            println!("  Hint:  Is the cluster running? Check with: kubectl cluster-info\n");
            return Ok(());
        }
    };

    // 3. Bundle CRD installed
    print!("  Bundle CRD installed ........ ");
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    match crds.get_opt("bundles.bundleops.io").await {
        Ok(Some(_)) => println!("OK"),
        Ok(None) => println!("MISSING (run: bundleops crd install)"),
        Err(e) => println!("FAIL ({})", e),
    }

    // 4. List bundles permission
    print!("  List bundles permission ..... ");
    let bundles: Api<Bundle> = Api::all(client.clone());
    match bundles.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({})", e),
    }

    // 5. List jobs permission
    print!("  List jobs permission ........ ");
    let jobs: Api<Job> = Api::all(client.clone());
    match jobs.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({})", e),
    }

    if let Some(v) = version {
        println!("\n  Kubernetes version: {}.{}", v.major, v.minor);
    }

    println!("\nAll checks completed.");
    Ok(())
}
