use std::sync::LazyLock;

use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static RECONCILE_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "bundle_reconcile_total",
        "Total Bundle reconciliation cycles",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static RECONCILE_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "bundle_reconcile_errors_total",
        "Total Bundle reconciliation errors",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static RECONCILE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(prometheus::HistogramOpts::new(
        "bundle_reconcile_duration_seconds",
        "Duration of each reconciliation cycle in seconds",
    ))
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

/// Registry polls by outcome: `updated`, `cached` or `failed`.
pub static REGISTRY_POLLS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "bundle_registry_polls_total",
            "Registry tag-list polls by result",
        ),
        &["result"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static JOBS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "bundle_deploy_jobs_created_total",
        "Total deploy Jobs created",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static JOBS_SUCCEEDED: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "bundle_deploy_jobs_succeeded_total",
        "Total deploy Jobs that completed successfully",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static JOBS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "bundle_deploy_jobs_failed_total",
        "Total deploy Jobs that terminated with a failure",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

/// Force-init all metrics so they appear on /metrics before first use.
pub fn force_init() {
    LazyLock::force(&RECONCILE_TOTAL);
    LazyLock::force(&RECONCILE_ERRORS);
    LazyLock::force(&RECONCILE_DURATION);
    LazyLock::force(&REGISTRY_POLLS);
    LazyLock::force(&JOBS_CREATED);
    LazyLock::force(&JOBS_SUCCEEDED);
    LazyLock::force(&JOBS_FAILED);
}
