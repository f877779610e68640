use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use tracing::debug;

use crate::error::Error;
use crate::transport::{ConditionalRoundTripper, RegistryRequest, RoundTripper};

/* ============================= REPOSITORY ============================= */

/// Parsed OCI repository locator: registry host plus repository path,
/// without a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub host: String,
    pub path: String,
}

impl RepoRef {
    pub fn parse(url: &str) -> Result<Self, Error> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(Error::Config("repository url is empty".into()));
        }
        if trimmed.contains("://") {
            return Err(Error::Config(format!(
                "repository url \"{trimmed}\" must not include a scheme"
            )));
        }

        let (host, path) = trimmed.split_once('/').ok_or_else(|| {
            Error::Config(format!(
                "repository url \"{trimmed}\" must be of the form <host>/<path>"
            ))
        })?;
        if host.is_empty() || path.is_empty() {
            return Err(Error::Config(format!(
                "repository url \"{trimmed}\" must be of the form <host>/<path>"
            )));
        }
        if path.contains(':') {
            return Err(Error::Config(format!(
                "repository url \"{trimmed}\" must not include a tag"
            )));
        }

        Ok(Self {
            host: host.to_string(),
            path: path.to_string(),
        })
    }

    /// The OCI distribution tag-list endpoint for this repository.
    pub fn tags_url(&self) -> String {
        format!("https://{}/v2/{}/tags/list", self.host, self.path)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.path)
    }
}

/* ============================= CREDENTIALS ============================= */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: BTreeMap<String, DockerAuthEntry>,
}

#[derive(Deserialize, Default)]
struct DockerAuthEntry {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    /// base64 of `username:password`, used when the split fields are absent.
    #[serde(default)]
    auth: Option<String>,
}

/// Extract credentials for `host` from a credential Secret's data.
///
/// Supports `kubernetes.io/dockerconfigjson` Secrets (per-host entries,
/// either `username`/`password` fields or a combined `auth` blob) and plain
/// Secrets carrying top-level `username`/`password` keys. Returns `Ok(None)`
/// when the Secret holds no entry for the host.
pub fn credentials_for_host(
    data: &BTreeMap<String, Vec<u8>>,
    host: &str,
) -> Result<Option<RegistryCredentials>, Error> {
    if let Some(raw) = data.get(".dockerconfigjson") {
        let config: DockerConfig = serde_json::from_slice(raw)
            .map_err(|e| Error::Config(format!("credential secret is not valid dockerconfigjson: {e}")))?;
        for (key, entry) in &config.auths {
            if registry_key_matches(key, host) {
                return decode_auth_entry(entry).map(Some);
            }
        }
        return Ok(None);
    }

    match (data.get("username"), data.get("password")) {
        (Some(username), Some(password)) => Ok(Some(RegistryCredentials {
            username: utf8(username, "username")?,
            password: utf8(password, "password")?,
        })),
        _ => Ok(None),
    }
}

/// Docker config keys may carry a scheme or a trailing path
/// (e.g. `https://index.docker.io/v1/`); compare on the bare host.
fn registry_key_matches(key: &str, host: &str) -> bool {
    let stripped = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    let bare = stripped.split('/').next().unwrap_or(stripped);
    bare == host
}

fn decode_auth_entry(entry: &DockerAuthEntry) -> Result<RegistryCredentials, Error> {
    if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
        return Ok(RegistryCredentials {
            username: username.clone(),
            password: password.clone(),
        });
    }
    let auth = entry
        .auth
        .as_deref()
        .ok_or_else(|| Error::Config("credential entry has neither username/password nor auth".into()))?;
    let decoded = BASE64
        .decode(auth)
        .map_err(|e| Error::Config(format!("credential auth field is not valid base64: {e}")))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| Error::Config("credential auth field is not valid UTF-8".into()))?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| Error::Config("credential auth field is not of the form user:password".into()))?;
    Ok(RegistryCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

fn utf8(bytes: &[u8], field: &str) -> Result<String, Error> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::Config(format!("credential secret field \"{field}\" is not valid UTF-8")))
}

/* ============================= CLIENT ============================= */

/// A non-cached tag listing plus the validator to submit next time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagList {
    /// Sorted ascending by codepoint. Semantic-version ordering is an
    /// accepted non-feature: `v1.10.0` sorts before `v1.9.0`.
    pub tags: Vec<String>,
    pub validator: Option<String>,
}

#[derive(Deserialize)]
struct TagListBody {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Lists repository tags through the conditional-request interceptor.
#[derive(Clone)]
pub struct RegistryClient {
    transport: ConditionalRoundTripper,
}

impl RegistryClient {
    pub fn new(round_tripper: Arc<dyn RoundTripper>) -> Self {
        Self {
            transport: ConditionalRoundTripper::new(round_tripper),
        }
    }

    /// Fetch the tag list for `repo_url`, short-circuiting on the cached
    /// validator.
    ///
    /// Returns `Err(Error::NotModified)` when the registry confirms the
    /// cached list is still valid; the caller keeps its prior validator. On
    /// success the returned validator may be `None` if the registry did not
    /// supply one.
    pub async fn list_tags_with_validator(
        &self,
        repo_url: &str,
        credentials: Option<&RegistryCredentials>,
        validator: Option<&str>,
    ) -> Result<TagList, Error> {
        let repo = RepoRef::parse(repo_url)?;
        let request = RegistryRequest {
            url: repo.tags_url(),
            basic_auth: credentials.map(|c| (c.username.clone(), c.password.clone())),
            if_none_match: None,
        };

        let fresh = self.transport.execute(request, validator).await?;
        let body: TagListBody = serde_json::from_slice(&fresh.body)
            .map_err(|e| Error::TransientNetwork(format!("malformed tag list from {repo}: {e}")))?;

        let mut tags = body.tags.unwrap_or_default();
        tags.sort();
        debug!(repo = %repo, tags = tags.len(), "registry_tags_listed");

        Ok(TagList {
            tags,
            validator: fresh.validator,
        })
    }
}

/* ============================= TESTS ============================= */
