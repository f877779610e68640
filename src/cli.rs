use clap::{Parser, Subcommand};

use bundleops::job::DEFAULT_DEPLOY_IMAGE;

#[derive(Parser)]
#[command(name = "bundleops")]
#[command(about = "Kubernetes operator deploying OCI bundle artifacts")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Check cluster connectivity and permissions
    Check,

    /// List Bundle resources across all namespaces
    List,

    /// Manage the Bundle CRD
    Crd {
        #[command(subcommand)]
        action: CrdAction,
    },

    /// Start the Bundle operator reconcile loop
    Reconcile {
        /// Address the metrics/health server binds to
        #[arg(long, default_value = "0.0.0.0:9090")]
        metrics_addr: String,

        /// Container image running the deploy CLI inside deploy Jobs
        #[arg(long, default_value = DEFAULT_DEPLOY_IMAGE)]
        deploy_image: String,
    },
}

#[derive(Subcommand)]
pub enum CrdAction {
    /// Print the CRD YAML to stdout
    Generate,

    /// Install the CRD into the connected cluster
    Install,
}
