use std::time::Duration;

use bundleops::crd::{BundlePhase, BundleStatus, TaskStatus};
use bundleops::error::Error;
use bundleops::reconciler::{
    RETRY_LIMIT, apply_job_completion, apply_registry_failure, apply_registry_success,
    selected_tag,
};

// ══════════════════════════════════════════════════════════════════
// Reconciler state machine integration tests (no cluster required)
//
// Folds sequences of registry and Job outcomes through the status
// transitions the async reconcile path applies, checking the
// invariants the controller promises.
// ══════════════════════════════════════════════════════════════════

const NOW: &str = "2026-03-01T12:00:00Z";

fn transient() -> Error {
    Error::TransientNetwork("registry returned status 503".into())
}

// ── Backoff scenario: five 503s, then the terminal sixth ──

#[test]
fn test_consecutive_failures_walk_the_backoff_table() {
    let mut status = BundleStatus::default();
    let expected_delays = [60u64, 120, 240, 480, 480];

    for (attempt, expected) in expected_delays.iter().enumerate() {
        let transition = apply_registry_failure(&status, &transient(), NOW.to_string());
        status = transition.status;

        assert_eq!(status.consecutive_failures, attempt as u32 + 1);
        assert_eq!(status.phase, Some(BundlePhase::Failed));
        assert_eq!(
            transition.retry_delay,
            Some(Duration::from_secs(*expected)),
            "attempt {} delay",
            attempt + 1
        );
        let message = status.last_error_message.clone().unwrap();
        assert!(message.contains(&format!("attempt {}/{}", attempt + 1, RETRY_LIMIT)));
    }

    // Sixth failure: count saturates at 6, no re-queue, message names the cap.
    let transition = apply_registry_failure(&status, &transient(), NOW.to_string());
    assert_eq!(transition.status.consecutive_failures, 6);
    assert!(transition.retry_delay.is_none());
    assert!(
        transition
            .status
            .last_error_message
            .unwrap()
            .contains("giving up after 6 attempts")
    );
}

#[test]
fn test_failure_counter_stays_within_bounds() {
    let mut status = BundleStatus::default();
    for _ in 0..20 {
        status = apply_registry_failure(&status, &transient(), NOW.to_string()).status;
        assert!(status.consecutive_failures <= 6);
    }
}

#[test]
fn test_any_success_resets_the_streak() {
    let mut status = BundleStatus::default();
    for _ in 0..4 {
        status = apply_registry_failure(&status, &transient(), NOW.to_string()).status;
    }
    assert_eq!(status.consecutive_failures, 4);

    let status = apply_registry_success(&status, Some(r#""rev-9""#.to_string()));
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.last_validator.as_deref(), Some(r#""rev-9""#));

    // The next failure starts the curve over at one minute.
    let transition = apply_registry_failure(&status, &transient(), NOW.to_string());
    assert_eq!(transition.retry_delay, Some(Duration::from_secs(60)));
}

#[test]
fn test_auth_failure_counts_like_any_registry_failure() {
    let err = Error::AuthFailure("registry returned status 401".into());
    let transition = apply_registry_failure(&BundleStatus::default(), &err, NOW.to_string());
    assert_eq!(transition.status.consecutive_failures, 1);
    assert!(transition.retry_delay.is_some());
}

// ── Tag selection ──

#[test]
fn test_selected_tag_is_last_of_sorted_list() {
    let tags: Vec<String> = ["v1.0.0", "v1.1.0"].iter().map(|s| s.to_string()).collect();
    assert_eq!(selected_tag(&tags).map(String::as_str), Some("v1.1.0"));
}

// ── Deploy lifecycle: Syncing → Synced and Syncing → Failed ──

fn syncing_status(tag: &str, job: &str) -> BundleStatus {
    BundleStatus {
        phase: Some(BundlePhase::Syncing),
        last_applied_tag: Some(tag.to_string()),
        active_task_name: Some(job.to_string()),
        last_task_status: Some(TaskStatus::Running),
        resolved_target_namespace: Some("apps".to_string()),
        ..Default::default()
    }
}

#[test]
fn test_successful_job_settles_into_synced() {
    let status = syncing_status("v1.1.0", "shop-1a2b3c4d-00000001");
    let next = apply_job_completion(
        &status,
        "shop-1a2b3c4d-00000001",
        true,
        "release succeeded".to_string(),
        NOW.to_string(),
    );

    assert_eq!(next.phase, Some(BundlePhase::Synced));
    assert_eq!(next.last_applied_tag.as_deref(), Some("v1.1.0"));
    assert_eq!(next.last_sync_time.as_deref(), Some(NOW));
    assert!(next.active_task_name.is_none(), "task lock must release");
    assert!(next.last_error_message.is_none());
    assert_eq!(next.last_task_status, Some(TaskStatus::Succeeded));
    assert_eq!(next.last_task_logs.as_deref(), Some("release succeeded"));
}

#[test]
fn test_failed_job_goes_failed_without_retry_state() {
    let status = syncing_status("v1.1.0", "shop-1a2b3c4d-00000001");
    let next = apply_job_completion(
        &status,
        "shop-1a2b3c4d-00000001",
        false,
        "error: chart not found".to_string(),
        NOW.to_string(),
    );

    assert_eq!(next.phase, Some(BundlePhase::Failed));
    assert!(next.active_task_name.is_none());
    assert_eq!(next.last_task_status, Some(TaskStatus::Failed));
    // Deploy failures do not touch the registry failure streak.
    assert_eq!(next.consecutive_failures, 0);
    assert!(
        next.last_error_message
            .unwrap()
            .contains("shop-1a2b3c4d-00000001")
    );
}

// ── Idempotence: settled bundles produce identical statuses ──

#[test]
fn test_registry_success_on_settled_bundle_changes_nothing() {
    let settled = BundleStatus {
        phase: Some(BundlePhase::Synced),
        last_applied_tag: Some("v1.1.0".to_string()),
        last_sync_time: Some(NOW.to_string()),
        last_validator: Some(r#""rev-1""#.to_string()),
        ..Default::default()
    };

    // Same validator, no failures: the transition is a fixed point, so the
    // reconciler's write-if-changed check suppresses the status write.
    let next = apply_registry_success(&settled, settled.last_validator.clone());
    assert_eq!(next, settled);
}

// ── Deduplication: one tracked task at a time ──

#[test]
fn test_new_tag_does_not_release_the_task_lock() {
    // A newer tag arriving while a Job runs leaves the lock in place; the
    // reconciler monitors the tracked Job instead of creating another.
    let status = syncing_status("v1", "shop-0000aaaa-00000001");
    assert!(status.active_task_name.is_some());

    // Only completion releases it.
    let done = apply_job_completion(
        &status,
        "shop-0000aaaa-00000001",
        true,
        String::new(),
        NOW.to_string(),
    );
    assert!(done.active_task_name.is_none());
}
