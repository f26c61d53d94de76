// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batch sinks.
//!
//! A sink receives one [`Batch`] per flush. [`InfluxHttpSink`] posts the
//! batch as line protocol to the InfluxDB 1.x `/write` endpoint.

use crate::config::NozzleConfig;
use crate::influx::Point;
use reqwest::Url;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Per-request timeout for InfluxDB writes.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Points drained from the accumulator in one flush.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    database: String,
    points: Vec<Point>,
}

impl Batch {
    pub fn new(database: impl Into<String>, points: Vec<Point>) -> Self {
        Self {
            database: database.into(),
            points,
        }
    }

    /// Target database.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Points in append order.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Errors writing a batch.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("InfluxDB returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Errors building a sink from configuration.
#[derive(Debug, Error)]
pub enum SinkBuildError {
    #[error("invalid InfluxDB URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Destination for flushed batches.
pub trait MetricSink: Send + Sync {
    /// Write one batch. The batch is consumed whatever the outcome.
    fn write(&self, batch: Batch) -> impl Future<Output = Result<(), WriteError>> + Send;
}

/// Encode a batch as line protocol, one `\n`-terminated line per point.
///
/// Points that cannot be encoded are dropped and logged; the rest of the
/// batch is kept.
pub fn encode_batch(batch: &Batch) -> String {
    let mut body = String::new();
    for point in batch.points() {
        match point.to_line_protocol() {
            Ok(line) => {
                body.push_str(&line);
                body.push('\n');
            }
            Err(e) => tracing::error!("Dropping point from batch: {}", e),
        }
    }
    body
}

/// InfluxDB 1.x HTTP writer.
#[derive(Debug, Clone)]
pub struct InfluxHttpSink {
    client: reqwest::Client,
    write_url: Url,
    credentials: Option<(String, String)>,
}

impl InfluxHttpSink {
    /// Build a sink from the `influxdb_*` settings.
    pub fn from_config(config: &NozzleConfig) -> Result<Self, SinkBuildError> {
        let write_url = write_url(&config.influxdb_url, &config.influxdb_database)?;

        let client = reqwest::Client::builder()
            .user_agent(config.firehose_subscription_id.clone())
            .danger_accept_invalid_certs(config.influxdb_allow_self_signed)
            .timeout(WRITE_TIMEOUT)
            .build()?;

        let credentials = if config.influxdb_user.is_empty() {
            None
        } else {
            Some((config.influxdb_user.clone(), config.influxdb_password.clone()))
        };

        Ok(Self {
            client,
            write_url,
            credentials,
        })
    }

    /// Full write endpoint, including database and precision.
    pub fn write_url(&self) -> &Url {
        &self.write_url
    }
}

impl MetricSink for InfluxHttpSink {
    async fn write(&self, batch: Batch) -> Result<(), WriteError> {
        let count = batch.len();
        let body = encode_batch(&batch);
        if body.is_empty() {
            return Ok(());
        }

        let mut request = self.client.post(self.write_url.clone()).body(body);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WriteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!("Wrote {} points to {}", count, batch.database());
        Ok(())
    }
}

fn write_url(base: &str, database: &str) -> Result<Url, SinkBuildError> {
    let invalid = |reason: String| SinkBuildError::InvalidUrl {
        url: base.to_string(),
        reason,
    };

    let mut url = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }

    url.path_segments_mut()
        .map_err(|_| invalid("URL cannot be a base".into()))?
        .pop_if_empty()
        .push("write");
    url.query_pairs_mut()
        .clear()
        .append_pair("db", database)
        .append_pair("precision", "ns");
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, TelemetryEvent};
    use crate::translate::translate;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(url: &str) -> NozzleConfig {
        NozzleConfig {
            influxdb_url: url.to_string(),
            influxdb_database: "cloudfoundry".to_string(),
            ..NozzleConfig::default()
        }
    }

    fn batch(points: Vec<Point>) -> Batch {
        Batch::new("cloudfoundry", points)
    }

    /// Accept one HTTP request, answer with `status_line`, return the raw request.
    async fn serve_once(listener: TcpListener, status_line: &'static str) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut chunk = [0u8; 1024];

        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending headers");
            raw.extend_from_slice(&chunk[..n]);
            if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let headers = String::from_utf8_lossy(&raw[..header_end]).to_lowercase();
        let content_length = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while raw.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
        }

        let response = format!("{}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status_line);
        socket.write_all(response.as_bytes()).await.unwrap();
        String::from_utf8(raw).unwrap()
    }

    #[test]
    fn test_encode_batch_terminates_every_line() {
        let batch = batch(vec![
            Point::new("origin.a", 1.0, 1).with_tag("job", "doppler"),
            Point::new("origin.b", 2.0, 2),
        ]);
        assert_eq!(
            encode_batch(&batch),
            "origin.a,job=doppler value=1 1\norigin.b value=2 2\n"
        );
    }

    #[test]
    fn test_encode_empty_batch() {
        assert_eq!(encode_batch(&batch(Vec::new())), "");
    }

    #[test]
    fn test_encode_drops_only_bad_points() {
        let batch = batch(vec![
            Point::new("good", 1.0, 1),
            Point::new("", 1.0, 2),
            Point::new("nan", f64::NAN, 3),
            Point::new("also_good", 2.0, 4),
        ]);
        assert_eq!(encode_batch(&batch), "good value=1 1\nalso_good value=2 4\n");
    }

    #[test]
    fn test_encode_drops_points_with_line_breaks() {
        let event = |tag: &str, value: &str| {
            TelemetryEvent::new(
                "origin",
                1,
                EventKind::ValueMetric {
                    name: "m".to_string(),
                    value: 1.0,
                    unit: String::new(),
                },
            )
            .with_deployment("d")
            .with_tag(tag, value)
        };

        let batch = batch(vec![
            translate(&event("note", "ok")).unwrap(),
            translate(&event("note", "a\nb")).unwrap(),
            translate(&event("note\r", "x")).unwrap(),
            translate(&event("zz", "a\\")).unwrap(),
        ]);

        let body = encode_batch(&batch);
        assert_eq!(
            body,
            "origin.m,deployment=d,note=ok value=1 1\norigin.m,deployment=d,zz=a\\\\ value=1 1\n"
        );
        assert_eq!(body.lines().count(), 2);
    }

    #[test]
    fn test_write_url() {
        let sink = InfluxHttpSink::from_config(&config("http://localhost:8086")).unwrap();
        assert_eq!(
            sink.write_url().as_str(),
            "http://localhost:8086/write?db=cloudfoundry&precision=ns"
        );

        let sink = InfluxHttpSink::from_config(&config("https://influx.example.com/proxy/")).unwrap();
        assert_eq!(
            sink.write_url().as_str(),
            "https://influx.example.com/proxy/write?db=cloudfoundry&precision=ns"
        );
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(matches!(
            InfluxHttpSink::from_config(&config("FOO")),
            Err(SinkBuildError::InvalidUrl { .. })
        ));
        assert!(matches!(
            InfluxHttpSink::from_config(&config("ftp://influx:21")),
            Err(SinkBuildError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_posts_line_protocol() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_once(listener, "HTTP/1.1 204 No Content"));

        let mut cfg = config(&format!("http://{}", addr));
        cfg.influxdb_user = "admin".to_string();
        cfg.influxdb_password = "secret".to_string();
        cfg.firehose_subscription_id = "nozzle-sub".to_string();
        let sink = InfluxHttpSink::from_config(&cfg).unwrap();

        sink.write(batch(vec![Point::new("origin.metric", 3.0, 1_000_000_000)]))
            .await
            .expect("write");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /write?db=cloudfoundry&precision=ns HTTP/1.1"));
        // admin:secret
        assert!(request.contains("authorization: Basic YWRtaW46c2VjcmV0"));
        assert!(request.contains("user-agent: nozzle-sub"));
        assert!(request.ends_with("origin.metric value=3 1000000000\n"));
    }

    #[tokio::test]
    async fn test_write_reports_error_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_once(listener, "HTTP/1.1 500 Internal Server Error"));

        let sink = InfluxHttpSink::from_config(&config(&format!("http://{}", addr))).unwrap();
        let err = sink
            .write(batch(vec![Point::new("m", 1.0, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_request() {
        // Nothing listens on this port; a request would fail.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = InfluxHttpSink::from_config(&config(&format!("http://{}", addr))).unwrap();
        assert!(sink.write(batch(Vec::new())).await.is_ok());
    }
}
