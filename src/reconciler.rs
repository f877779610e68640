use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::client::Client;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::backoff;
use crate::crd::{self, Bundle, BundlePhase, BundleStatus, TaskStatus};
use crate::error::Error;
use crate::job;
use crate::logs;
use crate::metrics::{
    JOBS_CREATED, JOBS_FAILED, JOBS_SUCCEEDED, RECONCILE_DURATION, RECONCILE_TOTAL, REGISTRY_POLLS,
};
use crate::registry::{self, RegistryClient, RegistryCredentials};
use crate::values::{self, ClusterValueStore};

/* ============================= CONFIG ============================= */

pub const FINALIZER: &str = "bundleops.io/cleanup";

const FIELD_MANAGER: &str = "bundleops-operator";

/// Registry failures beyond this count stop the retry loop: the sixth
/// consecutive failure is terminal until the spec changes.
pub const RETRY_LIMIT: u32 = 5;

/// How often a tracked deploy Job is re-checked while it runs.
pub const TASK_POLL_INTERVAL: Duration = Duration::from_secs(5);

/* ============================= CONTEXT ============================= */

pub struct Context {
    pub client: Client,
    pub registry: RegistryClient,
    /// Image running the deploy CLI inside created Jobs.
    pub deploy_image: String,
}

/* ============================= TRANSITIONS ============================= */

/// Fold a registry success into the status: the failure streak resets and
/// the validator from the response replaces the cached one.
pub fn apply_registry_success(current: &BundleStatus, validator: Option<String>) -> BundleStatus {
    let mut next = current.clone();
    next.consecutive_failures = 0;
    next.last_validator = validator;
    next
}

/// Outcome of folding a registry poll failure into the status. A `None`
/// retry delay means the cap was reached and retrying stops.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureTransition {
    pub status: BundleStatus,
    pub retry_delay: Option<Duration>,
}

/// Registry failure bookkeeping: bump the streak (saturating at 6), go
/// Failed, and either schedule the next backoff delay or give up.
pub fn apply_registry_failure(
    current: &BundleStatus,
    error: &Error,
    now: String,
) -> FailureTransition {
    let failures = (current.consecutive_failures + 1).min(RETRY_LIMIT + 1);
    let mut status = current.clone();
    status.consecutive_failures = failures;
    status.phase = Some(BundlePhase::Failed);
    status.last_error_time = Some(now);

    if failures > RETRY_LIMIT {
        status.last_error_message = Some(format!(
            "Registry error: giving up after {failures} attempts: {error}"
        ));
        FailureTransition {
            status,
            retry_delay: None,
        }
    } else {
        status.last_error_message = Some(format!(
            "Registry error (attempt {failures}/{RETRY_LIMIT}): {error}"
        ));
        FailureTransition {
            status,
            retry_delay: Some(backoff::delay_for_failures(failures)),
        }
    }
}

/// Fold a terminated deploy Job into the status: the task lock clears and
/// the phase follows the Job's outcome.
pub fn apply_job_completion(
    current: &BundleStatus,
    job_name: &str,
    succeeded: bool,
    log_excerpt: String,
    now: String,
) -> BundleStatus {
    let mut next = current.clone();
    next.active_task_name = None;
    next.last_task_logs = Some(log_excerpt);
    if succeeded {
        next.last_task_status = Some(TaskStatus::Succeeded);
        next.phase = Some(BundlePhase::Synced);
        next.last_sync_time = Some(now);
        next.last_error_message = None;
    } else {
        next.last_task_status = Some(TaskStatus::Failed);
        next.phase = Some(BundlePhase::Failed);
        next.last_error_message = Some(
            Error::TaskFailed(format!("deploy job \"{job_name}\" terminated with failure"))
                .to_string(),
        );
        next.last_error_time = Some(now);
    }
    next
}

/// The newest tag by codepoint order; the registry client sorts ascending.
pub fn selected_tag(tags: &[String]) -> Option<&String> {
    tags.last()
}

/* ============================= RECONCILE ============================= */

/// One step of the per-bundle state machine.
///
/// Status is written at most once per invocation, and only when it differs
/// from the observed status, so re-running against a settled bundle is a
/// no-op. Kubernetes API errors (including write conflicts) bubble out to
/// [`error_policy`] for a plain re-queue without status mutation.
pub async fn reconcile(bundle: Arc<Bundle>, ctx: Arc<Context>) -> Result<Action, Error> {
    RECONCILE_TOTAL.inc();
    let _timer = RECONCILE_DURATION.start_timer();

    let name = bundle.name_any();
    let Some(namespace) = bundle.namespace() else {
        return Err(Error::Config("Bundle is expected to be namespaced".into()));
    };
    let bundles: Api<Bundle> = Api::namespaced(ctx.client.clone(), &namespace);

    debug!(bundle = %name, namespace = %namespace, "reconcile_start");

    // ── Deletion: drop the cleanup marker and let the cluster reap.
    // Same-namespace Jobs cascade via the owner reference; cross-namespace
    // Jobs are left to their TTL.
    if bundle.metadata.deletion_timestamp.is_some() {
        if has_finalizer(&bundle) {
            remove_finalizer(&bundles, &bundle).await?;
            info!(bundle = %name, namespace = %namespace, "finalizer_removed");
        }
        return Ok(Action::await_change());
    }

    // ── The marker must be in place before any Job is created; the patch
    // raises the next event.
    if !has_finalizer(&bundle) {
        add_finalizer(&bundles, &bundle).await?;
        info!(bundle = %name, namespace = %namespace, "finalizer_added");
        return Ok(Action::await_change());
    }

    let status = bundle.status.clone().unwrap_or_default();

    if let Err(err) = crd::validate(&namespace, &bundle.spec) {
        return fail_terminal(&bundles, &name, &status, err.to_string()).await;
    }

    // ── Validate the service identity. Historical behavior: the lookup uses
    // the bundle's namespace even when the Job lands in
    // deploy.targetNamespace.
    if let Some(sa) = bundle
        .spec
        .deploy
        .service_account
        .as_deref()
        .filter(|sa| !sa.is_empty())
    {
        let accounts: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), &namespace);
        if accounts.get_opt(sa).await.map_err(Error::Kube)?.is_none() {
            let message = format!("ServiceAccount \"{sa}\" not found in namespace \"{namespace}\"");
            return fail_terminal(&bundles, &name, &status, message).await;
        }
    }

    let poll_interval = bundle.poll_interval();

    // ── Poll the registry through the conditional-request interceptor.
    let credentials = match load_credentials(&ctx.client, &namespace, &bundle).await {
        Ok(credentials) => credentials,
        Err(err) if err.is_terminal() => {
            return fail_terminal(&bundles, &name, &status, err.to_string()).await;
        }
        Err(err) => return Err(err),
    };

    let listed = ctx
        .registry
        .list_tags_with_validator(
            &bundle.spec.registry.url,
            credentials.as_ref(),
            status.last_validator.as_deref(),
        )
        .await;

    let tag_list = match listed {
        Ok(list) => {
            REGISTRY_POLLS.with_label_values(&["updated"]).inc();
            list
        }
        Err(Error::NotModified) => {
            // Cached list still valid: schedule the next poll and leave the
            // status untouched. A still-running Job is intentionally not
            // monitored on this path.
            REGISTRY_POLLS.with_label_values(&["cached"]).inc();
            debug!(bundle = %name, "registry_not_modified");
            return Ok(Action::requeue(backoff::with_jitter(poll_interval)));
        }
        Err(err) if err.is_registry_retryable() => {
            REGISTRY_POLLS.with_label_values(&["failed"]).inc();
            let transition = apply_registry_failure(&status, &err, Utc::now().to_rfc3339());
            warn!(
                bundle = %name,
                failures = transition.status.consecutive_failures,
                error = %err,
                "registry_poll_failed"
            );
            write_status_if_changed(&bundles, &name, &status, transition.status).await?;
            return Ok(match transition.retry_delay {
                Some(delay) => Action::requeue(backoff::with_jitter(delay)),
                None => Action::await_change(),
            });
        }
        Err(err) if err.is_terminal() => {
            REGISTRY_POLLS.with_label_values(&["failed"]).inc();
            return fail_terminal(&bundles, &name, &status, err.to_string()).await;
        }
        Err(err) => return Err(err),
    };

    let mut next = apply_registry_success(&status, tag_list.validator.clone());

    // ── Nothing published yet.
    let Some(selected) = selected_tag(&tag_list.tags).cloned() else {
        if matches!(next.phase, None | Some(BundlePhase::Failed)) {
            next.phase = Some(BundlePhase::Syncing);
            next.last_error_message = None;
        }
        write_status_if_changed(&bundles, &name, &status, next).await?;
        return Ok(Action::requeue(backoff::with_jitter(poll_interval)));
    };

    // ── Selected tag already applied: settle into Synced.
    if next.last_applied_tag.as_deref() == Some(selected.as_str()) {
        if next.phase != Some(BundlePhase::Synced) {
            next.phase = Some(BundlePhase::Synced);
            next.last_sync_time = Some(Utc::now().to_rfc3339());
            next.last_error_message = None;
            info!(bundle = %name, tag = %selected, "bundle_synced");
        }
        write_status_if_changed(&bundles, &name, &status, next).await?;
        return Ok(Action::await_change());
    }

    // ── Tag changed. The active task name is the per-bundle deploy lock:
    // while the tracked Job exists, no new Job is created even if an even
    // newer tag is already visible; the newer tag is picked up on the poll
    // after the current Job terminates.
    let target_namespace = bundle.target_namespace(&namespace);

    if let Some(active) = next.active_task_name.clone().filter(|n| !n.is_empty()) {
        let monitor_namespace = next
            .resolved_target_namespace
            .clone()
            .unwrap_or_else(|| target_namespace.clone());
        let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), &monitor_namespace);
        match jobs.get_opt(&active).await.map_err(Error::Kube)? {
            Some(active_job) => {
                return monitor_active_job(&ctx, &bundles, &name, &monitor_namespace, &active_job, &status, next)
                    .await;
            }
            None => {
                debug!(bundle = %name, job = %active, "tracked_job_gone");
                next.active_task_name = None;
            }
        }
    }

    // ── Launch a deploy Job for the selected tag.
    next.phase = Some(BundlePhase::Syncing);
    next.last_applied_tag = Some(selected.clone());

    let store = ClusterValueStore::new(ctx.client.clone());
    let resolved = values::resolve_values(
        &store,
        &bundle.spec.deploy.values_from,
        &namespace,
        &target_namespace,
    )
    .await;
    let resolved = match resolved {
        Ok(resolved) => resolved,
        Err(err) if err.is_terminal() => {
            return fail_terminal(&bundles, &name, &status, err.to_string()).await;
        }
        Err(err) => return Err(err),
    };

    let salt: u32 = rand::rng().random();
    let deploy_job = match job::build_deploy_job(&bundle, &selected, &resolved, &ctx.deploy_image, salt)
    {
        Ok(deploy_job) => deploy_job,
        Err(err) => return fail_terminal(&bundles, &name, &status, err.to_string()).await,
    };
    let job_name = deploy_job.name_any();

    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), &target_namespace);
    match jobs.create(&PostParams::default(), &deploy_job).await {
        Ok(_) => {
            JOBS_CREATED.inc();
            info!(
                bundle = %name,
                job = %job_name,
                namespace = %target_namespace,
                tag = %selected,
                "deploy_job_created"
            );
        }
        Err(kube::Error::Api(response)) if response.code == 409 => {
            // Someone beat us to the name: adopt the existing Job as the
            // active one.
            info!(bundle = %name, job = %job_name, "deploy_job_adopted");
        }
        Err(e) => return Err(Error::Kube(e)),
    }

    next.active_task_name = Some(job_name);
    next.last_task_status = Some(TaskStatus::Running);
    next.resolved_target_namespace = Some(target_namespace);
    write_status_if_changed(&bundles, &name, &status, next).await?;
    Ok(Action::requeue(TASK_POLL_INTERVAL))
}

/// Track a previously-created Job to completion.
async fn monitor_active_job(
    ctx: &Context,
    bundles: &Api<Bundle>,
    name: &str,
    job_namespace: &str,
    active_job: &Job,
    observed: &BundleStatus,
    mut next: BundleStatus,
) -> Result<Action, Error> {
    let job_name = active_job.name_any();
    let job_status = active_job.status.as_ref();
    let succeeded = job_status.and_then(|s| s.succeeded).unwrap_or(0);
    let failed = job_status.and_then(|s| s.failed).unwrap_or(0);

    if succeeded > 0 || failed > 0 {
        let capture = logs::capture_job_logs(&ctx.client, job_namespace, &job_name).await;
        let done = succeeded > 0;
        if done {
            JOBS_SUCCEEDED.inc();
            info!(bundle = %name, job = %job_name, "deploy_job_succeeded");
        } else {
            JOBS_FAILED.inc();
            warn!(bundle = %name, job = %job_name, "deploy_job_failed");
        }
        let completed = apply_job_completion(
            &next,
            &job_name,
            done,
            logs::status_excerpt(&capture),
            Utc::now().to_rfc3339(),
        );
        write_status_if_changed(bundles, name, observed, completed).await?;
        return Ok(Action::await_change());
    }

    next.last_task_status = Some(TaskStatus::Running);
    write_status_if_changed(bundles, name, observed, next).await?;
    Ok(Action::requeue(TASK_POLL_INTERVAL))
}

/* ============================= FAILURE ============================= */

/// Terminal failure: no re-queue until the spec or the environment changes.
async fn fail_terminal(
    bundles: &Api<Bundle>,
    name: &str,
    observed: &BundleStatus,
    message: String,
) -> Result<Action, Error> {
    warn!(bundle = %name, error = %message, "reconcile_failed");
    let mut next = observed.clone();
    next.phase = Some(BundlePhase::Failed);
    next.last_error_message = Some(message);
    next.last_error_time = Some(Utc::now().to_rfc3339());
    write_status_if_changed(bundles, name, observed, next).await?;
    Ok(Action::await_change())
}

/// Controller-internal failure: plain re-queue, no status mutation.
pub fn error_policy(_bundle: Arc<Bundle>, error: &Error, _ctx: Arc<Context>) -> Action {
    crate::metrics::RECONCILE_ERRORS.inc();
    warn!(error = %error, "reconcile_error");
    Action::requeue(Duration::from_secs(60))
}

/* ============================= STATUS ============================= */

async fn write_status_if_changed(
    bundles: &Api<Bundle>,
    name: &str,
    observed: &BundleStatus,
    next: BundleStatus,
) -> Result<(), Error> {
    if *observed == next {
        return Ok(());
    }
    let patch = serde_json::json!({ "status": next });
    bundles
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await
        .map_err(Error::Kube)?;
    debug!(bundle = %name, "status_updated");
    Ok(())
}

/* ============================= FINALIZER ============================= */

pub fn has_finalizer(bundle: &Bundle) -> bool {
    bundle.finalizers().iter().any(|f| f == FINALIZER)
}

async fn add_finalizer(bundles: &Api<Bundle>, bundle: &Bundle) -> Result<(), Error> {
    let mut finalizers = bundle.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    patch_finalizers(bundles, &bundle.name_any(), finalizers).await
}

async fn remove_finalizer(bundles: &Api<Bundle>, bundle: &Bundle) -> Result<(), Error> {
    let finalizers: Vec<String> = bundle
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect();
    patch_finalizers(bundles, &bundle.name_any(), finalizers).await
}

async fn patch_finalizers(
    bundles: &Api<Bundle>,
    name: &str,
    finalizers: Vec<String>,
) -> Result<(), Error> {
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    bundles
        .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await
        .map_err(Error::Kube)?;
    Ok(())
}

/* ============================= CREDENTIALS ============================= */

async fn load_credentials(
    client: &Client,
    namespace: &str,
    bundle: &Bundle,
) -> Result<Option<RegistryCredentials>, Error> {
    let Some(secret_name) = bundle
        .spec
        .registry
        .credentials_secret
        .as_deref()
        .filter(|s| !s.is_empty())
    else {
        return Ok(None);
    };

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let Some(secret) = secrets.get_opt(secret_name).await.map_err(Error::Kube)? else {
        return Err(Error::NotFound(format!(
            "Secret \"{secret_name}\" not found in namespace \"{namespace}\""
        )));
    };

    let data = secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, bytes)| (key, bytes.0))
        .collect();
    let repo = registry::RepoRef::parse(&bundle.spec.registry.url)?;
    match registry::credentials_for_host(&data, &repo.host)? {
        Some(credentials) => Ok(Some(credentials)),
        None => Err(Error::Config(format!(
            "Secret \"{secret_name}\" holds no credentials for registry \"{}\"",
            repo.host
        ))),
    }
}

/* ============================= TESTS ============================= */
