use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/* ============================= DEFAULTS ============================= */

/// Applied when `registry.pollInterval` is absent or fails to parse.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Days a finished deploy Job is kept before TTL cleanup.
pub const DEFAULT_LOG_RETENTION_DAYS: i32 = 7;

/// Deploy container CPU when `deploy.resources.cpu` is unset.
pub const DEFAULT_CPU: &str = "1";

/// Deploy container memory when `deploy.resources.memory` is unset.
pub const DEFAULT_MEMORY: &str = "1Gi";

/* ============================= REGISTRY ============================= */

/// Where to poll for published bundle artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    /// OCI repository locator: host plus path, without a tag
    /// (e.g. `registry.example.com/apps/shop`).
    pub url: String,

    /// Name of a Secret in the bundle's namespace holding registry
    /// credentials (`kubernetes.io/dockerconfigjson` or plain
    /// `username`/`password` keys). Absent means anonymous access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_secret: Option<String>,

    /// How often to poll the registry for new tags (e.g. `"15m"`, `"1h"`).
    /// Invalid values fall back to the 15 minute default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
}

/* ============================= DEPLOY ============================= */

/// CPU/memory for the deploy container. Requests are always set equal to
/// limits.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeployResources {
    /// CPU quantity (e.g. `"500m"`). Defaults to 1 CPU.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    /// Memory quantity (e.g. `"512Mi"`). Defaults to 1 GiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Reference to a ConfigMap or Secret by name.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NameRef {
    pub name: String,
}

/// One entry in the ordered list of value sources.
///
/// Exactly one of `configMapRef` / `secretRef` must be set; entries
/// violating this are rejected by [`validate`] before any deploy happens.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValuesSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<NameRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<NameRef>,

    /// When true, a missing container is skipped silently instead of failing
    /// the whole resolution.
    #[serde(default)]
    pub optional: bool,
}

/// How deploy Jobs for this bundle are built and dispatched.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploySpec {
    /// ServiceAccount the deploy Job runs as. Required when
    /// `targetNamespace` differs from the bundle's namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    /// Namespace the deploy Job is created in. Defaults to the bundle's
    /// namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<DeployResources>,

    /// Days a finished deploy Job is retained before TTL cleanup. Minimum 1,
    /// default 7.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_retention_days: Option<i32>,

    /// Ordered value sources flattened into `--set` arguments. Later entries
    /// overwrite earlier ones key by key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_from: Vec<ValuesSource>,
}

/* ============================= SPEC ============================= */

/// Bundle points at an OCI repository and describes how its latest published
/// artifact is deployed into the cluster.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "bundleops.io",
    version = "v1",
    kind = "Bundle",
    plural = "bundles",
    status = "BundleStatus",
    shortname = "bnd",
    namespaced
)]
#[kube(printcolumn = r#"{"name":"Repository","type":"string","jsonPath":".spec.registry.url"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Tag","type":"string","jsonPath":".status.lastAppliedTag"}"#)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    pub registry: RegistrySpec,

    #[serde(default)]
    pub deploy: DeploySpec,
}

/* ============================= STATUS ============================= */

/// Where the bundle currently stands in its sync lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum BundlePhase {
    Syncing,
    Synced,
    Failed,
}

/// State of the most recent deploy Job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed,
}

/// BundleStatus is written only by the reconciler.
///
/// None of the fields use `skip_serializing_if`: the reconciler clears fields
/// (e.g. `activeTaskName` after a Job terminates) by merge-patching explicit
/// nulls, which requires them to serialize.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    #[serde(default)]
    pub phase: Option<BundlePhase>,

    /// Tag of the most recent deploy attempt. Set provisionally when the Job
    /// is created and confirmed by the Synced transition.
    #[serde(default)]
    pub last_applied_tag: Option<String>,

    /// RFC 3339 timestamp of the most recent Synced transition.
    #[serde(default)]
    pub last_sync_time: Option<String>,

    /// Human-readable description of the current or most recent failure.
    #[serde(default)]
    pub last_error_message: Option<String>,

    #[serde(default)]
    pub last_error_time: Option<String>,

    /// Opaque validator (ETag) from the last non-cached tag list, submitted
    /// on the next poll to enable the not-modified short-circuit.
    #[serde(default)]
    pub last_validator: Option<String>,

    /// Consecutive registry poll failures, saturating at 6. Reset to 0 by
    /// any registry success.
    #[serde(default)]
    pub consecutive_failures: u32,

    /// Name of the currently-tracked deploy Job. Acts as the per-bundle
    /// deploy lock: while set, no new Job is created.
    #[serde(default)]
    pub active_task_name: Option<String>,

    #[serde(default)]
    pub last_task_status: Option<TaskStatus>,

    /// Excerpt of the captured deploy Job logs.
    #[serde(default)]
    pub last_task_logs: Option<String>,

    /// Namespace the last deploy Job was dispatched to.
    #[serde(default)]
    pub resolved_target_namespace: Option<String>,
}

/* ============================= ACCESSORS ============================= */

impl Bundle {
    /// Poll interval with the documented fallback: absent or unparseable
    /// values yield [`DEFAULT_POLL_INTERVAL`].
    pub fn poll_interval(&self) -> Duration {
        self.spec
            .registry
            .poll_interval
            .as_deref()
            .and_then(|raw| humantime::parse_duration(raw).ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    /// Namespace the deploy Job is created in.
    pub fn target_namespace(&self, bundle_namespace: &str) -> String {
        self.spec
            .deploy
            .target_namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| bundle_namespace.to_string())
    }

    pub fn log_retention_days(&self) -> i32 {
        self.spec
            .deploy
            .log_retention_days
            .unwrap_or(DEFAULT_LOG_RETENTION_DAYS)
    }
}

/* ============================= VALIDATION ============================= */

/// Checks the cross-field rules the API server cannot express in the schema.
///
/// Mirrors the admission contract: a violation here means the spec is
/// malformed and the bundle goes Failed without retry.
pub fn validate(bundle_namespace: &str, spec: &BundleSpec) -> Result<(), Error> {
    if spec.registry.url.trim().is_empty() {
        return Err(Error::Config("registry.url must not be empty".into()));
    }

    if let Some(days) = spec.deploy.log_retention_days {
        if days < 1 {
            return Err(Error::Config(format!(
                "deploy.logRetentionDays must be at least 1, got {days}"
            )));
        }
    }

    for (index, source) in spec.deploy.values_from.iter().enumerate() {
        match (&source.config_map_ref, &source.secret_ref) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(Error::Config(format!(
                    "deploy.valuesFrom[{index}] must reference exactly one of configMapRef or secretRef"
                )));
            }
            (Some(reference), None) | (None, Some(reference)) => {
                if reference.name.is_empty() {
                    return Err(Error::Config(format!(
                        "deploy.valuesFrom[{index}] references an empty name"
                    )));
                }
            }
        }
    }

    let target = spec
        .deploy
        .target_namespace
        .as_deref()
        .filter(|ns| !ns.is_empty());
    if let Some(target) = target {
        let has_service_account = spec
            .deploy
            .service_account
            .as_deref()
            .is_some_and(|sa| !sa.is_empty());
        if target != bundle_namespace && !has_service_account {
            return Err(Error::Config(format!(
                "deploy.serviceAccount is required when deploy.targetNamespace (\"{target}\") differs from the bundle's namespace (\"{bundle_namespace}\")"
            )));
        }
    }

    Ok(())
}

/* ============================= TESTS ============================= */
