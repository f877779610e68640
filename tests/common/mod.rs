#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kube::core::ObjectMeta;

use bundleops::crd::{Bundle, BundleSpec, DeploySpec, RegistrySpec, ValuesSource};
use bundleops::error::Error;
use bundleops::transport::{RegistryRequest, RegistryResponse, RoundTripper};
use bundleops::values::ValueStore;

/* ============================= BUNDLES ============================= */

pub fn make_test_bundle(name: &str, namespace: &str, repo_url: &str) -> Bundle {
    let mut bundle = Bundle::new(
        name,
        BundleSpec {
            registry: RegistrySpec {
                url: repo_url.to_string(),
                ..Default::default()
            },
            deploy: DeploySpec::default(),
        },
    );
    bundle.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        uid: Some(format!("uid-{name}")),
        finalizers: Some(vec!["bundleops.io/cleanup".to_string()]),
        ..Default::default()
    };
    bundle
}

/* ============================= TRANSPORT ============================= */

/// Transport fake replaying a scripted sequence of responses and recording
/// every request it saw.
pub struct ScriptedRoundTripper {
    responses: Mutex<Vec<Result<RegistryResponse, Error>>>,
    pub seen: Mutex<Vec<RegistryRequest>>,
}

impl ScriptedRoundTripper {
    pub fn new(responses: Vec<Result<RegistryResponse, Error>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RoundTripper for ScriptedRoundTripper {
    async fn round_trip(&self, request: RegistryRequest) -> Result<RegistryResponse, Error> {
        self.seen.lock().unwrap().push(request);
        self.responses.lock().unwrap().remove(0)
    }
}

pub fn tags_response(etag: Option<&str>, tags: &[&str]) -> Result<RegistryResponse, Error> {
    let body = serde_json::json!({ "name": "apps/shop", "tags": tags });
    Ok(RegistryResponse {
        status: 200,
        etag: etag.map(str::to_string),
        body: serde_json::to_vec(&body).unwrap(),
    })
}

pub fn status_response(status: u16) -> Result<RegistryResponse, Error> {
    Ok(RegistryResponse {
        status,
        etag: None,
        body: Vec::new(),
    })
}

/* ============================= VALUE STORE ============================= */

/// In-memory value store keyed by `(namespace, name)`.
#[derive(Default)]
pub struct InMemoryStore {
    pub config_maps: BTreeMap<(String, String), BTreeMap<String, String>>,
    pub secrets: BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn with_config_map(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        self.config_maps.insert(
            (namespace.to_string(), name.to_string()),
            data.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn with_secret(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        self.secrets.insert(
            (namespace.to_string(), name.to_string()),
            data.iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        );
        self
    }
}

#[async_trait]
impl ValueStore for InMemoryStore {
    async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        Ok(self
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, Error> {
        Ok(self
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/* ============================= SOURCES ============================= */

pub fn config_map_source(name: &str, optional: bool) -> ValuesSource {
    ValuesSource {
        config_map_ref: Some(bundleops::crd::NameRef {
            name: name.to_string(),
        }),
        secret_ref: None,
        optional,
    }
}

pub fn secret_source(name: &str, optional: bool) -> ValuesSource {
    ValuesSource {
        config_map_ref: None,
        secret_ref: Some(bundleops::crd::NameRef {
            name: name.to_string(),
        }),
        optional,
    }
}
