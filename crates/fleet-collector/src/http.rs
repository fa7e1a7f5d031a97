//! HTTP collector — fetches telemetry from the metrics source over http1.

use std::time::Duration;

use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde::Deserialize;
use tracing::debug;

use fleet_state::{ClusterMetrics, ServerMetric};

use crate::{Collector, CollectorError};

/// Collector that GETs `{endpoint}/{cluster_id}` from a telemetry service.
///
/// The response format is the telemetry source's contract:
///
/// ```json
/// {
///   "cluster_id": "…",
///   "timestamp": "2026-01-01T00:00:00Z",
///   "servers": [
///     {"server_id": "…", "cpu_usage": 42.0, "memory_usage": 51.0, "request_load": 120}
///   ]
/// }
/// ```
///
/// A 404 means the cluster is unknown; any other non-200 is a collection
/// failure.
pub struct HttpCollector {
    authority: String,
    base_path: String,
    timeout: Duration,
}

/// Wire format of the telemetry source's per-cluster response.
#[derive(Debug, Deserialize)]
struct TelemetryResponse {
    #[allow(dead_code)]
    cluster_id: String,
    timestamp: Option<String>,
    servers: Vec<TelemetryServer>,
}

#[derive(Debug, Deserialize)]
struct TelemetryServer {
    server_id: String,
    cpu_usage: f64,
    memory_usage: f64,
    request_load: u64,
}

impl HttpCollector {
    /// Create a collector for the given endpoint, e.g.
    /// `http://localhost:9000/metrics`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, CollectorError> {
        let uri: http::Uri = endpoint
            .parse()
            .map_err(|e| CollectorError::InvalidResponse(format!("bad endpoint: {e}")))?;
        let authority = uri
            .authority()
            .ok_or_else(|| {
                CollectorError::InvalidResponse(format!("endpoint has no host: {endpoint}"))
            })?
            .to_string();
        let base_path = uri.path().trim_end_matches('/').to_string();
        Ok(Self {
            authority,
            base_path,
            timeout,
        })
    }

    async fn get(&self, path: &str) -> Result<(http::StatusCode, bytes::Bytes), CollectorError> {
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| CollectorError::Collection(format!("connect {}: {e}", self.authority)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| CollectorError::Collection(format!("handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", &self.authority)
            .header("accept", "application/json")
            .header("user-agent", "fleet-collector/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| CollectorError::Collection(format!("build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| CollectorError::Collection(format!("request: {e}")))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| CollectorError::Collection(format!("read body: {e}")))?
            .to_bytes();

        Ok((status, body))
    }
}

#[async_trait::async_trait]
impl Collector for HttpCollector {
    async fn collect(&self, cluster_id: &str) -> Result<ClusterMetrics, CollectorError> {
        let path = format!("{}/{cluster_id}", self.base_path);
        debug!(%cluster_id, %path, "collecting metrics");

        let (status, body) = tokio::time::timeout(self.timeout, self.get(&path))
            .await
            .map_err(|_| CollectorError::Timeout)??;

        if status == http::StatusCode::NOT_FOUND {
            return Err(CollectorError::ClusterNotFound(cluster_id.to_string()));
        }
        if status != http::StatusCode::OK {
            return Err(CollectorError::Collection(format!(
                "unexpected status code {status}"
            )));
        }

        let metrics = parse_response(cluster_id, &body)?;
        debug!(%cluster_id, servers = metrics.servers.len(), "collected metrics");
        Ok(metrics)
    }

    async fn health_check(&self) -> Result<(), CollectorError> {
        let path = format!("{}/health", self.base_path);
        let (status, _) = tokio::time::timeout(self.timeout, self.get(&path))
            .await
            .map_err(|_| CollectorError::Timeout)??;

        if status != http::StatusCode::OK {
            return Err(CollectorError::Collection(format!(
                "health check returned status {status}"
            )));
        }
        Ok(())
    }
}

/// Parse the telemetry source's JSON body into a metrics sample.
fn parse_response(cluster_id: &str, body: &[u8]) -> Result<ClusterMetrics, CollectorError> {
    let resp: TelemetryResponse =
        serde_json::from_slice(body).map_err(|e| CollectorError::InvalidResponse(e.to_string()))?;

    let timestamp = resp
        .timestamp
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let servers = resp
        .servers
        .into_iter()
        .map(|s| ServerMetric {
            server_id: s.server_id,
            cpu_usage: s.cpu_usage,
            memory_usage: s.memory_usage,
            request_load: s.request_load,
        })
        .collect();

    Ok(ClusterMetrics {
        cluster_id: cluster_id.to_string(),
        timestamp,
        servers,
    })
}
