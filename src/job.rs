use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::{Bundle, DEFAULT_CPU, DEFAULT_MEMORY};
use crate::error::Error;

/* ============================= CONSTANTS ============================= */

/// Kubernetes object names are DNS subdomains of at most 253 characters.
pub const MAX_NAME_LEN: usize = 253;

pub const DEPLOY_CONTAINER_NAME: &str = "deploy";

/// Image running the deploy CLI inside the Job. Overridable via
/// `--deploy-image` on the operator command.
pub const DEFAULT_DEPLOY_IMAGE: &str = "registry.werf.io/werf/werf:2-stable";

/// Label value identifying objects managed by this operator.
pub const OPERATOR_NAME: &str = "bundleops";

/// Annotations recording ownership when the Job lives in a different
/// namespace than its bundle, where an owner reference cannot be used.
pub const OWNER_NAMESPACE_ANNOTATION: &str = "bundleops.io/owner-namespace";
pub const OWNER_NAME_ANNOTATION: &str = "bundleops.io/owner-name";
pub const OWNER_UID_ANNOTATION: &str = "bundleops.io/owner-uid";

/* ============================= NAMING ============================= */

fn fnv1a32(input: &str) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    input
        .bytes()
        .fold(OFFSET_BASIS, |hash, byte| (hash ^ byte as u32).wrapping_mul(PRIME))
}

/// `<bundle>-<8-hex tag hash>-<8-hex salt>`, truncating the bundle-name
/// prefix so the result never exceeds [`MAX_NAME_LEN`]. The salt keeps
/// repeated attempts for the same tag from colliding.
pub fn job_name(bundle_name: &str, tag: &str, salt: u32) -> String {
    let suffix = format!("-{:08x}-{:08x}", fnv1a32(tag), salt);
    let max_prefix = MAX_NAME_LEN - suffix.chars().count();
    let prefix: String = bundle_name.chars().take(max_prefix).collect();
    format!("{prefix}{suffix}")
}

/* ============================= ARGUMENTS ============================= */

/// Escape a value for a `--set key=value` argument: backslash itself first,
/// then each of `,` `=` `[` `]` gets a backslash prefix.
pub fn escape_set_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' | ',' | '=' | '[' | ']' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

/// The deploy CLI invocation. Keys are emitted in ascending codepoint order
/// so the argument list is a pure function of the resolved value map.
pub fn deploy_args(repo_url: &str, tag: &str, values: &BTreeMap<String, String>) -> Vec<String> {
    let mut args = vec![
        "converge".to_string(),
        "--no-color".to_string(),
        format!("{repo_url}:{tag}"),
    ];
    for (key, value) in values {
        args.push("--set".to_string());
        args.push(format!("{key}={}", escape_set_value(value)));
    }
    args
}

/* ============================= LABELS ============================= */

pub fn job_labels(bundle_name: &str, tag: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), OPERATOR_NAME.to_string()),
        ("instance".to_string(), bundle_name.to_string()),
        ("managed-by".to_string(), OPERATOR_NAME.to_string()),
        ("bundle".to_string(), bundle_name.to_string()),
        ("tag".to_string(), tag.to_string()),
    ])
}

/* ============================= BUILDER ============================= */

/// Build the one-shot deploy Job for `bundle` at `tag`.
///
/// Deterministic given `(bundle, tag, values, image, salt)`: two builds with
/// the same inputs produce byte-identical argument lists. Retries are owned
/// by the controller, so the Job itself never restarts (`backoffLimit` 0,
/// `restartPolicy` Never) and is reclaimed by TTL after the configured
/// retention.
pub fn build_deploy_job(
    bundle: &Bundle,
    tag: &str,
    values: &BTreeMap<String, String>,
    image: &str,
    salt: u32,
) -> Result<Job, Error> {
    let bundle_name = bundle.name_any();
    let bundle_namespace = bundle
        .namespace()
        .ok_or_else(|| Error::Config("bundle has no namespace".into()))?;
    let target_namespace = bundle.target_namespace(&bundle_namespace);

    let service_account = bundle
        .spec
        .deploy
        .service_account
        .clone()
        .filter(|sa| !sa.is_empty());
    if target_namespace != bundle_namespace && service_account.is_none() {
        return Err(Error::Config(format!(
            "deploy.serviceAccount is required when deploying into namespace \"{target_namespace}\""
        )));
    }

    let labels = job_labels(&bundle_name, tag);
    let name = job_name(&bundle_name, tag, salt);

    let mut metadata = ObjectMeta {
        name: Some(name),
        namespace: Some(target_namespace.clone()),
        labels: Some(labels.clone()),
        ..ObjectMeta::default()
    };

    if target_namespace == bundle_namespace {
        // Same namespace: cluster-native cascading reclamation via the
        // owner reference.
        metadata.owner_references = Some(vec![OwnerReference {
            api_version: Bundle::api_version(&()).to_string(),
            kind: Bundle::kind(&()).to_string(),
            name: bundle_name.clone(),
            uid: bundle.uid().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: None,
        }]);
    } else {
        // Cross-namespace owner references do not trigger reclamation;
        // record the parent as annotations for traceability and let the TTL
        // reap the Job.
        metadata.annotations = Some(BTreeMap::from([
            (
                OWNER_NAMESPACE_ANNOTATION.to_string(),
                bundle_namespace.clone(),
            ),
            (OWNER_NAME_ANNOTATION.to_string(), bundle_name.clone()),
            (
                OWNER_UID_ANNOTATION.to_string(),
                bundle.uid().unwrap_or_default(),
            ),
        ]));
    }

    let resources = bundle.spec.deploy.resources.clone().unwrap_or_default();
    let cpu = resources.cpu.unwrap_or_else(|| DEFAULT_CPU.to_string());
    let memory = resources.memory.unwrap_or_else(|| DEFAULT_MEMORY.to_string());
    let quantities = BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu)),
        ("memory".to_string(), Quantity(memory)),
    ]);

    let container = Container {
        name: DEPLOY_CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        args: Some(deploy_args(&bundle.spec.registry.url, tag, values)),
        resources: Some(ResourceRequirements {
            // Requests match limits so the deploy pod is never burstable.
            limits: Some(quantities.clone()),
            requests: Some(quantities),
            ..ResourceRequirements::default()
        }),
        ..Container::default()
    };

    let ttl_seconds = bundle.log_retention_days().saturating_mul(86_400);

    Ok(Job {
        metadata,
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(ttl_seconds),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    restart_policy: Some("Never".to_string()),
                    service_account_name: service_account,
                    ..PodSpec::default()
                }),
            },
            ..JobSpec::default()
        }),
        ..Job::default()
    })
}

/* ============================= TESTS ============================= */
