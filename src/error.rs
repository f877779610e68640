use thiserror::Error;

/// Error taxonomy shared by the registry client, the value resolver, the job
/// builder and the reconciler.
///
/// The reconciler pattern-matches on the variant to decide between terminal
/// failure, backoff retry and plain re-queue, so leaf components must return
/// these variants unchanged rather than wrapping them.
#[derive(Debug, Error)]
pub enum Error {
    /// The Bundle spec is malformed or internally inconsistent. Terminal
    /// until the spec is edited.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A referenced resource (ServiceAccount, ConfigMap, Secret) is absent.
    /// Terminal until the spec or the environment changes.
    #[error("{0}")]
    NotFound(String),

    /// The registry refused the supplied credentials. Counts as a registry
    /// failure for backoff purposes.
    #[error("registry authentication failed: {0}")]
    AuthFailure(String),

    /// Registry 5xx, unclassified non-success, or a network-level failure.
    /// Retried with exponential backoff up to the cap.
    #[error("registry request failed: {0}")]
    TransientNetwork(String),

    /// The registry answered 304: the cached tag list is still valid. Never
    /// surfaced as a user-visible failure; drives a plain re-queue.
    #[error("tag list not modified")]
    NotModified,

    /// The deploy Job terminated with a non-zero exit. Not retried
    /// automatically; a new tag or a spec edit triggers the next attempt.
    #[error("deploy task failed: {0}")]
    TaskFailed(String),

    /// Kubernetes API error (including status-write conflicts). Handled as a
    /// controller-internal failure: plain re-queue, no status mutation.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl Error {
    /// Failures that no amount of retrying will fix.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::NotFound(_))
    }

    /// Registry failures that the reconciler retries with backoff.
    pub fn is_registry_retryable(&self) -> bool {
        matches!(self, Error::AuthFailure(_) | Error::TransientNetwork(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
