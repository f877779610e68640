use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;

/* ============================= CAPABILITY ============================= */

/// A single HTTP exchange against a registry endpoint.
#[derive(Debug, Clone, Default)]
pub struct RegistryRequest {
    pub url: String,

    /// Basic credentials, when the bundle references a credential Secret.
    pub basic_auth: Option<(String, String)>,

    /// Validator from the previous non-cached response, if any.
    pub if_none_match: Option<String>,
}

/// Raw outcome of an exchange, before classification.
#[derive(Debug, Clone)]
pub struct RegistryResponse {
    pub status: u16,

    /// Validator supplied by the registry for conditional requests.
    pub etag: Option<String>,

    pub body: Vec<u8>,
}

/// The transport capability the registry client is built on. Production uses
/// [`HttpRoundTripper`]; tests inject fakes.
///
/// Implementations never retry and never classify; they only move bytes.
#[async_trait]
pub trait RoundTripper: Send + Sync {
    async fn round_trip(&self, request: RegistryRequest) -> Result<RegistryResponse, Error>;
}

/* ============================= HTTP ============================= */

/// reqwest-backed transport. Network-level failures (DNS, TLS, connection
/// reset) classify as transient so the reconciler retries them with backoff.
pub struct HttpRoundTripper {
    client: reqwest::Client,
}

impl HttpRoundTripper {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRoundTripper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoundTripper for HttpRoundTripper {
    async fn round_trip(&self, request: RegistryRequest) -> Result<RegistryResponse, Error> {
        let mut builder = self.client.get(&request.url);
        if let Some((username, password)) = &request.basic_auth {
            builder = builder.basic_auth(username, Some(password));
        }
        if let Some(validator) = &request.if_none_match {
            builder = builder.header(reqwest::header::IF_NONE_MATCH, validator);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::TransientNetwork(e.to_string()))?;

        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::TransientNetwork(e.to_string()))?
            .to_vec();

        Ok(RegistryResponse { status, etag, body })
    }
}

/* ============================= INTERCEPTOR ============================= */

/// A successful, non-cached exchange: the payload plus the validator to
/// submit on the next request.
#[derive(Debug, Clone)]
pub struct FreshResponse {
    pub body: Vec<u8>,
    pub validator: Option<String>,
}

/// Decorator over a [`RoundTripper`] that owns conditional-request
/// semantics: it attaches the prior validator as `If-None-Match`, captures
/// the response validator, and classifies status codes into the error
/// taxonomy. It never blocks beyond the single exchange and never retries;
/// classification is the whole of its behavior.
#[derive(Clone)]
pub struct ConditionalRoundTripper {
    inner: Arc<dyn RoundTripper>,
}

impl ConditionalRoundTripper {
    pub fn new(inner: Arc<dyn RoundTripper>) -> Self {
        Self { inner }
    }

    pub async fn execute(
        &self,
        mut request: RegistryRequest,
        validator: Option<&str>,
    ) -> Result<FreshResponse, Error> {
        if let Some(validator) = validator {
            request.if_none_match = Some(validator.to_string());
        }

        let response = self.inner.round_trip(request).await?;
        match response.status {
            200 => Ok(FreshResponse {
                body: response.body,
                validator: response.etag,
            }),
            304 => Err(Error::NotModified),
            401 | 403 => Err(Error::AuthFailure(format!(
                "registry returned status {}",
                response.status
            ))),
            status => Err(Error::TransientNetwork(format!(
                "registry returned status {status}"
            ))),
        }
    }
}

/* ============================= TESTS ============================= */
