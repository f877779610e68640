mod common;

use common::{ScriptedRoundTripper, status_response, tags_response};

use bundleops::error::Error;
use bundleops::registry::{RegistryClient, RegistryCredentials};

// ══════════════════════════════════════════════════════════════════
// Registry client integration tests (no network required)
//
// Drives listTagsWithValidator through a scripted transport:
// conditional-request caching, status classification and codepoint
// ordering, as the reconciler observes them.
// ══════════════════════════════════════════════════════════════════

const REPO: &str = "x.example/p";

// ── Caching round trips ──

#[tokio::test]
async fn test_first_poll_then_cached_poll() {
    let transport = ScriptedRoundTripper::new(vec![
        tags_response(Some(r#""rev-1""#), &["v1.0.0", "v1.1.0"]),
        status_response(304),
    ]);
    let client = RegistryClient::new(transport.clone());

    // First poll: no validator yet, fresh list comes back with one.
    let list = client
        .list_tags_with_validator(REPO, None, None)
        .await
        .unwrap();
    assert_eq!(list.tags, vec!["v1.0.0", "v1.1.0"]);
    assert_eq!(list.validator.as_deref(), Some(r#""rev-1""#));

    // Second poll resubmits the validator and observes the short-circuit.
    let err = client
        .list_tags_with_validator(REPO, None, list.validator.as_deref())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotModified));

    let seen = transport.seen.lock().unwrap();
    assert!(seen[0].if_none_match.is_none());
    assert_eq!(seen[1].if_none_match.as_deref(), Some(r#""rev-1""#));
}

#[tokio::test]
async fn test_static_repository_stays_cached() {
    let transport = ScriptedRoundTripper::new(vec![
        tags_response(Some(r#""rev-1""#), &["v1"]),
        status_response(304),
        status_response(304),
        status_response(304),
    ]);
    let client = RegistryClient::new(transport.clone());

    let list = client
        .list_tags_with_validator(REPO, None, None)
        .await
        .unwrap();
    let validator = list.validator;

    // All subsequent polls against the unchanged repository return cached.
    for _ in 0..3 {
        let err = client
            .list_tags_with_validator(REPO, None, validator.as_deref())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotModified));
    }
}

#[tokio::test]
async fn test_changed_repository_supplies_new_validator() {
    let transport = ScriptedRoundTripper::new(vec![
        tags_response(Some(r#""rev-1""#), &["v1"]),
        tags_response(Some(r#""rev-2""#), &["v1", "v2"]),
    ]);
    let client = RegistryClient::new(transport);

    let first = client
        .list_tags_with_validator(REPO, None, None)
        .await
        .unwrap();
    let second = client
        .list_tags_with_validator(REPO, None, first.validator.as_deref())
        .await
        .unwrap();

    assert_eq!(second.tags, vec!["v1", "v2"]);
    assert_eq!(second.validator.as_deref(), Some(r#""rev-2""#));
}

// ── Ordering ──

#[tokio::test]
async fn test_tags_sorted_by_codepoint_not_semver() {
    let transport = ScriptedRoundTripper::new(vec![tags_response(
        None,
        &["v1.9.0", "v1.10.0", "v1.2.0"],
    )]);
    let client = RegistryClient::new(transport);

    let list = client
        .list_tags_with_validator(REPO, None, None)
        .await
        .unwrap();
    // Codepoint order: "v1.10.0" < "v1.2.0" < "v1.9.0", so the selected
    // (last) tag is v1.9.0 even though v1.10.0 is semantically newer.
    assert_eq!(list.tags, vec!["v1.10.0", "v1.2.0", "v1.9.0"]);
    assert_eq!(list.tags.last().map(String::as_str), Some("v1.9.0"));
}

// ── Classification ──

#[tokio::test]
async fn test_unauthorized_is_auth_failure() {
    let transport = ScriptedRoundTripper::new(vec![status_response(401)]);
    let client = RegistryClient::new(transport);
    let err = client
        .list_tags_with_validator(REPO, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthFailure(_)));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let transport = ScriptedRoundTripper::new(vec![status_response(503)]);
    let client = RegistryClient::new(transport);
    let err = client
        .list_tags_with_validator(REPO, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransientNetwork(_)));
}

// ── Credentials ──

#[tokio::test]
async fn test_credentials_travel_with_every_request() {
    let transport = ScriptedRoundTripper::new(vec![
        tags_response(Some(r#""rev-1""#), &["v1"]),
        status_response(304),
    ]);
    let client = RegistryClient::new(transport.clone());
    let creds = RegistryCredentials {
        username: "robot".to_string(),
        password: "hunter2".to_string(),
    };

    let list = client
        .list_tags_with_validator(REPO, Some(&creds), None)
        .await
        .unwrap();
    let _ = client
        .list_tags_with_validator(REPO, Some(&creds), list.validator.as_deref())
        .await;

    let seen = transport.seen.lock().unwrap();
    for request in seen.iter() {
        assert_eq!(
            request.basic_auth,
            Some(("robot".to_string(), "hunter2".to_string()))
        );
    }
}
