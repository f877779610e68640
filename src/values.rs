use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::Api;
use kube::client::Client;
use tracing::debug;

use crate::crd::ValuesSource;
use crate::error::Error;

/* ============================= STORE ============================= */

/// Read access to the two value-container kinds, abstracted so resolution
/// logic can be exercised against an in-memory fake.
#[async_trait]
pub trait ValueStore: Send + Sync {
    async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error>;

    async fn secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, Error>;
}

/// Production store backed by the cluster API.
pub struct ClusterValueStore {
    client: Client,
}

impl ClusterValueStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ValueStore for ClusterValueStore {
    async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .get_opt(name)
            .await
            .map_err(Error::Kube)?
            .map(|cm| cm.data.unwrap_or_default()))
    }

    async fn secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await.map_err(Error::Kube)?.map(|secret| {
            secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(key, bytes)| (key, bytes.0))
                .collect()
        }))
    }
}

/* ============================= RESOLUTION ============================= */

/// Resolve the ordered `valuesFrom` list into a single flat map.
///
/// Each source is looked up in `bundle_namespace` first; only when absent
/// there, and when `target_namespace` differs, is `target_namespace`
/// consulted — an admin-controlled value always shadows an
/// application-controlled one. A missing required source fails the whole
/// resolution; a missing optional source is skipped. Sources are flattened
/// in input order with last-wins overwrite per key.
pub async fn resolve_values(
    store: &dyn ValueStore,
    sources: &[ValuesSource],
    bundle_namespace: &str,
    target_namespace: &str,
) -> Result<BTreeMap<String, String>, Error> {
    let mut merged = BTreeMap::new();

    for source in sources {
        let Some(documents) =
            fetch_source(store, source, bundle_namespace, target_namespace).await?
        else {
            continue;
        };
        for (key, raw) in &documents {
            let document: serde_yaml::Value = serde_yaml::from_str(raw).map_err(|e| {
                Error::Config(format!("value document \"{key}\" is not valid YAML: {e}"))
            })?;
            flatten_document(key, &document, &mut merged);
        }
    }

    Ok(merged)
}

/// Fetch one source's payload map, honoring namespace precedence and the
/// optional flag. `Ok(None)` means "optional and absent".
async fn fetch_source(
    store: &dyn ValueStore,
    source: &ValuesSource,
    bundle_namespace: &str,
    target_namespace: &str,
) -> Result<Option<BTreeMap<String, String>>, Error> {
    match (&source.config_map_ref, &source.secret_ref) {
        (Some(reference), None) => {
            let name = require_name(&reference.name, "configMapRef")?;
            let mut found = store.config_map(bundle_namespace, name).await?;
            if found.is_none() && target_namespace != bundle_namespace {
                found = store.config_map(target_namespace, name).await?;
            }
            match found {
                Some(data) => Ok(Some(data)),
                None => absent(source, "ConfigMap", name, bundle_namespace, target_namespace),
            }
        }
        (None, Some(reference)) => {
            let name = require_name(&reference.name, "secretRef")?;
            let mut found = store.secret(bundle_namespace, name).await?;
            if found.is_none() && target_namespace != bundle_namespace {
                found = store.secret(target_namespace, name).await?;
            }
            match found {
                Some(data) => {
                    let mut decoded = BTreeMap::new();
                    for (key, bytes) in data {
                        let text = String::from_utf8(bytes).map_err(|_| {
                            Error::Config(format!(
                                "secret \"{name}\" value \"{key}\" is not valid UTF-8"
                            ))
                        })?;
                        decoded.insert(key, text);
                    }
                    Ok(Some(decoded))
                }
                None => absent(source, "Secret", name, bundle_namespace, target_namespace),
            }
        }
        _ => Err(Error::Config(
            "value source must reference exactly one of configMapRef or secretRef".into(),
        )),
    }
}

fn require_name<'a>(name: &'a str, field: &str) -> Result<&'a str, Error> {
    if name.is_empty() {
        return Err(Error::Config(format!("{field} has an empty name")));
    }
    Ok(name)
}

fn absent<T>(
    source: &ValuesSource,
    kind: &str,
    name: &str,
    bundle_namespace: &str,
    target_namespace: &str,
) -> Result<Option<T>, Error> {
    if source.optional {
        debug!(kind, name, "optional_value_source_absent");
        return Ok(None);
    }
    let message = if target_namespace != bundle_namespace {
        format!(
            "{kind} \"{name}\" not found in namespace \"{bundle_namespace}\" or \"{target_namespace}\""
        )
    } else {
        format!("{kind} \"{name}\" not found in namespace \"{bundle_namespace}\"")
    };
    Err(Error::NotFound(message))
}

/* ============================= FLATTENING ============================= */

/// Flatten one parsed document into `out` under `prefix`.
///
/// Maps extend the path with `.key`, sequences with `[index]`; scalars are
/// rendered and inserted. Later inserts overwrite earlier ones, which gives
/// the resolver its last-wins merge for free.
pub fn flatten_document(
    prefix: &str,
    value: &serde_yaml::Value,
    out: &mut BTreeMap<String, String>,
) {
    match value {
        serde_yaml::Value::Mapping(mapping) => {
            for (key, nested) in mapping {
                let key = scalar_to_string(key);
                flatten_document(&format!("{prefix}.{key}"), nested, out);
            }
        }
        serde_yaml::Value::Sequence(sequence) => {
            for (index, nested) in sequence.iter().enumerate() {
                flatten_document(&format!("{prefix}[{index}]"), nested, out);
            }
        }
        serde_yaml::Value::Tagged(tagged) => flatten_document(prefix, &tagged.value, out),
        scalar => {
            out.insert(prefix.to_string(), scalar_to_string(scalar));
        }
    }
}

/// Render a scalar the way it appears on a `--set` command line: booleans as
/// `true`/`false`, numbers in minimal form, null as the empty string.
fn scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                n.as_f64().unwrap_or_default().to_string()
            }
        }
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim_end()
            .to_string(),
    }
}

/* ============================= TESTS ============================= */
