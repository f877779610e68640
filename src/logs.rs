use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams};
use kube::client::Client;
use kube::ResourceExt;
use tracing::warn;

/* ============================= LIMITS ============================= */

/// Lines requested from each pod container.
pub const LOG_TAIL_LINES: i64 = 500;

/// Ceiling on the merged capture.
pub const MAX_CAPTURED_BYTES: usize = 1024 * 1024;

/// Portion of the capture copied onto the bundle status.
pub const STATUS_EXCERPT_BYTES: usize = 5 * 1024;

pub const TRUNCATION_NOTICE: &str = "(output truncated to the most recent 1 MiB)\n";

/* ============================= CAPTURE ============================= */

/// Collect logs from every pod of a terminated Job, merged and truncated.
///
/// Log capture is best-effort: an empty pod list or unreadable logs produce
/// an explanatory line in the capture instead of an error, so the caller
/// never changes phase because of it.
pub async fn capture_job_logs(client: &Client, namespace: &str, job_name: &str) -> String {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let selector = format!("job-name={job_name}");

    let pod_list = match pods.list(&ListParams::default().labels(&selector)).await {
        Ok(list) => list,
        Err(e) => {
            warn!(job = %job_name, error = %e, "log_capture_pod_list_failed");
            return format!("(logs unavailable: failed to list pods for job \"{job_name}\": {e})");
        }
    };

    if pod_list.items.is_empty() {
        return format!("(no pods found for job \"{job_name}\")");
    }

    let params = LogParams {
        tail_lines: Some(LOG_TAIL_LINES),
        ..LogParams::default()
    };

    let mut sections = Vec::new();
    for pod in &pod_list.items {
        let pod_name = pod.name_any();
        match pods.logs(&pod_name, &params).await {
            Ok(text) => sections.push((pod_name, text)),
            Err(e) => {
                warn!(pod = %pod_name, error = %e, "log_capture_read_failed");
                sections.push((pod_name, format!("(logs unavailable: {e})")));
            }
        }
    }

    truncate_tail(&merge_pod_logs(&sections))
}

/// Concatenate per-pod logs with a separator line naming each pod.
pub fn merge_pod_logs(sections: &[(String, String)]) -> String {
    sections
        .iter()
        .map(|(pod, text)| format!("--- pod/{pod} ---\n{text}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep the tail of `merged` so that notice plus tail fit in
/// [`MAX_CAPTURED_BYTES`]; the notice is prepended only when trimming
/// actually occurred.
pub fn truncate_tail(merged: &str) -> String {
    if merged.len() <= MAX_CAPTURED_BYTES {
        return merged.to_string();
    }
    let keep = MAX_CAPTURED_BYTES - TRUNCATION_NOTICE.len();
    let mut start = merged.len() - keep;
    while !merged.is_char_boundary(start) {
        start += 1;
    }
    format!("{TRUNCATION_NOTICE}{}", &merged[start..])
}

/// The leading slice of the capture stored on the bundle status.
pub fn status_excerpt(capture: &str) -> String {
    if capture.len() <= STATUS_EXCERPT_BYTES {
        return capture.to_string();
    }
    let mut end = STATUS_EXCERPT_BYTES;
    while !capture.is_char_boundary(end) {
        end -= 1;
    }
    capture[..end].to_string()
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_names_each_pod() {
        let merged = merge_pod_logs(&[
            ("shop-abc".to_string(), "line one\n".to_string()),
            ("shop-def".to_string(), "line two\n".to_string()),
        ]);
        assert!(merged.contains("--- pod/shop-abc ---\nline one"));
        assert!(merged.contains("--- pod/shop-def ---\nline two"));
    }

    #[test]
    fn test_truncate_noop_below_limit() {
        let input = "short output\n";
        assert_eq!(truncate_tail(input), input);
    }

    #[test]
    fn test_truncate_noop_at_exact_limit() {
        let input = "x".repeat(MAX_CAPTURED_BYTES);
        let output = truncate_tail(&input);
        assert_eq!(output, input);
        assert!(!output.contains(TRUNCATION_NOTICE.trim_end()));
    }

    #[test]
    fn test_truncate_keeps_tail_and_prepends_notice() {
        let mut input = "old ".repeat(300_000);
        input.push_str("THE-END");
        assert!(input.len() > MAX_CAPTURED_BYTES);

        let output = truncate_tail(&input);
        assert!(output.starts_with(TRUNCATION_NOTICE));
        assert!(output.ends_with("THE-END"));
        assert_eq!(output.len(), MAX_CAPTURED_BYTES);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let input = "ü".repeat(MAX_CAPTURED_BYTES);
        let output = truncate_tail(&input);
        assert!(output.len() <= MAX_CAPTURED_BYTES);
        assert!(output.starts_with(TRUNCATION_NOTICE));
        // Every remaining char survives intact.
        assert!(output[TRUNCATION_NOTICE.len()..].chars().all(|c| c == 'ü'));
    }

    #[test]
    fn test_excerpt_noop_for_short_capture() {
        assert_eq!(status_excerpt("hello"), "hello");
    }

    #[test]
    fn test_excerpt_caps_at_five_kib() {
        let input = "y".repeat(STATUS_EXCERPT_BYTES * 3);
        let excerpt = status_excerpt(&input);
        assert_eq!(excerpt.len(), STATUS_EXCERPT_BYTES);
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let input = "é".repeat(STATUS_EXCERPT_BYTES);
        let excerpt = status_excerpt(&input);
        assert!(excerpt.len() <= STATUS_EXCERPT_BYTES);
        assert!(excerpt.chars().all(|c| c == 'é'));
    }
}
