use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use http_body_util::BodyExt;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;
use tracing::Instrument;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// Upper bound on one upstream round trip, body included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client adapter using Hyper with Rustls.
///
/// Responsibilities:
/// * Rewrites `Host` to the upstream authority
/// * Bounds the whole round trip, response body included, by a timeout
/// * Buffers the upstream body so the downstream response has fixed framing
///
/// There are no retries.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
    timeout: Duration,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter with [`DEFAULT_TIMEOUT`].
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(request_timeout: Duration) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::debug!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        Ok(Self {
            client,
            timeout: request_timeout,
        })
    }

    fn host_header(req: &Request<AxumBody>) -> HttpClientResult<HeaderValue> {
        let host = req.uri().host().ok_or_else(|| {
            HttpClientError::InvalidRequest(format!("Outgoing URI has no host: {}", req.uri()))
        })?;
        let value = match req.uri().port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        HeaderValue::from_str(&value).map_err(|e| HttpClientError::InvalidRequest(e.to_string()))
    }

    async fn round_trip(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> {
        let method = req.method().clone();
        let uri = req.uri().clone();

        let response = self.client.request(req).await.map_err(|e| {
            HttpClientError::ConnectionError(format!("Request to {method} {uri} failed: {e}"))
        })?;

        let (mut parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| HttpClientError::BodyError(e.to_string()))?
            .to_bytes();

        // The body is re-framed downstream.
        parts.headers.remove(header::TRANSFER_ENCODING);
        parts.headers.remove(header::CONTENT_LENGTH);

        Ok(Response::from_parts(parts, AxumBody::from(bytes)))
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let host = Self::host_header(&req)?;
        req.headers_mut().insert(header::HOST, host);
        *req.version_mut() = Version::HTTP_11;

        let span = tracing::debug_span!(
            "upstream_request",
            http.method = %req.method(),
            http.url = %req.uri(),
        );

        match timeout(self.timeout, self.round_trip(req))
            .instrument(span)
            .await
        {
            Ok(Ok(response)) => {
                tracing::debug!(status = response.status().as_u16(), "Upstream responded");
                Ok(response)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Upstream request failed");
                Err(e)
            }
            Err(_) => {
                tracing::error!(timeout_secs = self.timeout.as_secs(), "Upstream request timed out");
                Err(HttpClientError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}
