//! Low-level HTTP connection to a prover

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use thiserror::Error;
use tracing::debug;

// Proof requests run long; the transport timeout has to outlive them.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Errors from the prover transport.
#[derive(Debug, Error)]
pub enum ProverClientError {
    /// Building the HTTP client failed.
    #[error("create prover client: {0}")]
    Build(#[source] reqwest::Error),

    /// A request to the prover failed.
    #[error("prover request: {0}")]
    Request(#[source] reqwest::Error),
}

/// HTTP connection to a single prover.
///
/// Every request carries JSON `accept`/`content-type` headers by default.
#[derive(Debug)]
pub struct NodeClient {
    client: reqwest::Client,
    addr: String,
}

impl NodeClient {
    /// Create a client for the given prover address.
    pub fn new(addr: impl Into<String>) -> Result<Self, ProverClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ProverClientError::Build)?;

        Ok(Self {
            client,
            addr: addr.into(),
        })
    }

    /// The prover address this client talks to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Post a request body to the prover and return the response bytes.
    pub async fn do_request(&self, body: Vec<u8>) -> Result<Vec<u8>, ProverClientError> {
        let response = self
            .client
            .post(&self.addr)
            .body(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(ProverClientError::Request)?;

        let bytes = response.bytes().await.map_err(ProverClientError::Request)?;
        Ok(bytes.to_vec())
    }

    /// Release the connection pool. Idle connections are dropped with the
    /// client; this only exists so callers have an explicit teardown
    /// point.
    pub fn close(&self) {
        debug!(addr = %self.addr, "closing prover client");
    }
}
