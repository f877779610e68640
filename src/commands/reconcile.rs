use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::api::Api;
use kube::runtime::controller::Controller;
use kube::Client;
use prometheus::{Encoder, TextEncoder};
use tokio::signal;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

use bundleops::crd::Bundle;
use bundleops::metrics;
use bundleops::reconciler::{self, Context};
use bundleops::registry::RegistryClient;
use bundleops::transport::HttpRoundTripper;

/* ============================= STATE ============================= */

pub(crate) struct OperatorState {
    pub(crate) ready: bool,
}

/* ============================= ENTRY ============================= */

pub async fn run(metrics_addr: &str, deploy_image: String) -> Result<()> {
    println!("Starting Bundle operator...\n");

    let client = Client::try_default()
        .await
        .context("Failed to load kubeconfig")?;

    // Verify actual cluster connectivity before starting the controller
    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot reach cluster: {}. Is the cluster running?", e);
        }
    }

    let bundles: Api<Bundle> = Api::all(client.clone());
    let jobs: Api<Job> = Api::all(client.clone());

    let ctx = Arc::new(Context {
        client: client.clone(),
        registry: RegistryClient::new(Arc::new(HttpRoundTripper::new())),
        deploy_image: deploy_image.clone(),
    });

    // Force-init Prometheus metrics so they appear on /metrics
    metrics::force_init();

    let addr: SocketAddr = metrics_addr
        .parse()
        .with_context(|| format!("Invalid metrics address '{metrics_addr}'"))?;

    println!("  CRD watch ................... Bundle.bundleops.io/v1");
    println!("  Deploy image ................ {deploy_image}");
    println!("  Metrics server .............. http://{addr}");
    println!();
    println!("  Available endpoints:");
    println!("    GET /healthz .............. Liveness probe (always 200 OK)");
    println!(
        "    GET /readyz ............... Readiness probe (503 until first reconcile, then 200)"
    );
    println!("    GET /metrics .............. Prometheus metrics scrape endpoint");
    println!();
    println!("Operator running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    info!("operator_controller_started");

    let operator_state = Arc::new(Mutex::new(OperatorState { ready: false }));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_state = operator_state.clone();
    let http_shutdown = shutdown_tx.subscribe();

    let http_handle =
        tokio::spawn(async move { start_metrics_server(http_state, http_shutdown, addr).await });

    let controller_state = operator_state.clone();
    let controller = Controller::new(bundles, Default::default())
        .owns(jobs, Default::default())
        .run(reconciler::reconcile, reconciler::error_policy, ctx)
        .for_each(move |result| {
            let state = controller_state.clone();
            async move {
                // Mark ready after first reconcile dispatch
                {
                    let mut s = state.lock().await;
                    if !s.ready {
                        s.ready = true;
                    }
                }
                match result {
                    Ok((object, _action)) => {
                        info!(
                            bundle = %object.name,
                            namespace = %object.namespace.as_deref().unwrap_or_default(),
                            "reconcile_dispatched"
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, "reconcile_dispatch_error");
                        eprintln!("[ERROR] Reconcile dispatch: {e}");
                    }
                }
            }
        });

    // Use select! so Ctrl+C drops (cancels) the controller stream.
    // The kube Controller has no built-in shutdown hook, so dropping
    // the future is the only way to stop it cleanly.
    tokio::select! {
        _ = controller => {
            info!("operator_controller_stream_ended");
            println!("\nController stream ended unexpectedly.");
        }
        _ = signal::ctrl_c() => {
            info!("shutdown_signal_received");
            println!("\n{}", "=".repeat(70));
            println!("Shutdown signal received. Stopping operator...");
            println!("{}", "=".repeat(70));
        }
    }

    // Signal the HTTP server to shut down
    let _ = shutdown_tx.send(());
    let _ = http_handle.await?;

    info!("operator_stopped");
    println!("Operator stopped.");

    Ok(())
}

/* ============================= HTTP SERVER ============================= */

pub(crate) fn build_operator_router(state: Arc<Mutex<OperatorState>>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route(
            "/readyz",
            get({
                let state = state.clone();
                move || ready_handler(state.clone())
            }),
        )
}

async fn start_metrics_server(
    state: Arc<Mutex<OperatorState>>,
    mut shutdown: broadcast::Receiver<()>,
    addr: SocketAddr,
) -> Result<()> {
    let app = build_operator_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server on {addr}"))?;

    info!(addr = %addr, "operator_metrics_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

async fn ready_handler(state: Arc<Mutex<OperatorState>>) -> impl IntoResponse {
    let state = state.lock().await;
    if state.ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = metrics::REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "metrics encoding error".to_string(),
            ),
        },
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics encoding error".to_string(),
        ),
    }
}

/* ============================= TESTS ============================= */
