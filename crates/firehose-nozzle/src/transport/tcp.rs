// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Newline-delimited JSON firehose transport.
//!
//! # Wire format
//!
//! After connecting, the client sends one subscription line:
//!
//! ```text
//! {"subscription_id":"influxdb-firehose-nozzle","authorization":"bearer ..."}
//! ```
//!
//! The server then streams one frame per line:
//!
//! ```text
//! {"frame":"envelope","body":{"origin":"router","timestamp":1,"kind":{"type":"ValueMetric",...}}}
//! {"frame":"close","body":{"code":1008,"reason":"slow consumer"}}
//! ```
//!
//! Close codes follow WebSocket numbering (see [`close_error`]). A dropped
//! connection or EOF without a close frame is retryable.

use super::{
    close_error, idle_timeout_error, EventStreams, OpenError, StreamOptions, Transport,
    EVENT_CHANNEL_CAPACITY,
};
use crate::classify::TransportError;
use crate::event::TelemetryEvent;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Serialize)]
struct Subscribe<'a> {
    subscription_id: &'a str,
    authorization: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "frame", content = "body", rename_all = "snake_case")]
enum Frame {
    Envelope(TelemetryEvent),
    Close(CloseFrame),
}

#[derive(Debug, Deserialize)]
struct CloseFrame {
    code: u16,
    #[serde(default)]
    reason: String,
}

impl CloseFrame {
    fn into_error(self) -> TransportError {
        close_error(self.code, self.reason)
    }
}

/// Firehose client speaking JSON lines over plain TCP.
#[derive(Debug, Default)]
pub struct TcpJsonTransport {
    reader: Option<JoinHandle<()>>,
}

impl TcpJsonTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for TcpJsonTransport {
    async fn open(&mut self, options: &StreamOptions) -> Result<EventStreams, OpenError> {
        let addr = parse_endpoint(&options.endpoint)?;
        if options.insecure_skip_verify {
            tracing::debug!("TLS verification skip has no effect on plaintext stream {}", addr);
        }

        let stream = TcpStream::connect(&addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, mut write_half) = stream.into_split();

        let mut hello = serde_json::to_vec(&Subscribe {
            subscription_id: &options.subscription_id,
            authorization: &options.auth_token,
        })?;
        hello.push(b'\n');
        write_half.write_all(&hello).await?;
        tracing::info!(
            "Subscribed to firehose at {} as '{}'",
            addr,
            options.subscription_id
        );

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(1);

        self.close();
        self.reader = Some(tokio::spawn(read_frames(
            read_half,
            write_half,
            event_tx,
            error_tx,
            options.idle_timeout,
        )));

        Ok(EventStreams {
            events: event_rx,
            errors: error_rx,
        })
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for TcpJsonTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Strip the `tcp://` scheme and return `host:port`.
fn parse_endpoint(endpoint: &str) -> Result<String, OpenError> {
    let rest = match endpoint.split_once("://") {
        Some(("tcp", rest)) => rest,
        Some((scheme, _)) => return Err(OpenError::UnsupportedScheme(scheme.to_string())),
        None => endpoint,
    };
    let addr = rest.trim_end_matches('/');
    if addr.is_empty() || !addr.contains(':') {
        return Err(OpenError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(addr.to_string())
}

/// Socket reader task.
///
/// Holds the write half so the connection stays fully open until the task
/// ends.
async fn read_frames(
    read_half: OwnedReadHalf,
    _write_half: OwnedWriteHalf,
    events: mpsc::Sender<TelemetryEvent>,
    errors: mpsc::Sender<TransportError>,
    idle_timeout: Option<Duration>,
) {
    let mut lines = BufReader::new(read_half).lines();

    let error = loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, lines.next_line()).await {
                Ok(next) => next,
                Err(_) => break idle_timeout_error(limit),
            },
            None => lines.next_line().await,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => break TransportError::Retryable("stream closed by peer".into()),
            Err(e) => break TransportError::Retryable(e.to_string()),
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Frame>(&line) {
            Ok(Frame::Envelope(event)) => {
                if events.send(event).await.is_err() {
                    return;
                }
            }
            Ok(Frame::Close(close)) => break close.into_error(),
            Err(e) => tracing::warn!("Skipping malformed firehose frame: {}", e),
        }
    };

    let _ = errors.send(error).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn options(endpoint: String) -> StreamOptions {
        StreamOptions {
            endpoint,
            subscription_id: "sub-1".to_string(),
            auth_token: "bearer 123456789".to_string(),
            insecure_skip_verify: false,
            idle_timeout: None,
        }
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(parse_endpoint("tcp://127.0.0.1:8081").unwrap(), "127.0.0.1:8081");
        assert_eq!(parse_endpoint("localhost:8081/").unwrap(), "localhost:8081");
        assert!(matches!(
            parse_endpoint("wss://doppler.example.com:443"),
            Err(OpenError::UnsupportedScheme(s)) if s == "wss"
        ));
        assert!(matches!(
            parse_endpoint("tcp://"),
            Err(OpenError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_close_codes() {
        let close = |code, reason: &str| CloseFrame {
            code,
            reason: reason.to_string(),
        };
        assert_eq!(close(1000, "").into_error(), TransportError::NormalClosure);
        assert_eq!(
            close(1008, "slow").into_error(),
            TransportError::PolicyViolation("slow".to_string())
        );
        assert!(matches!(close(1011, "boom").into_error(), TransportError::Other(_)));
    }

    #[tokio::test]
    async fn test_streams_envelopes_until_close_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut hello = Vec::new();
            let mut byte = [0u8; 1];
            while socket.read_exact(&mut byte).await.is_ok() && byte[0] != b'\n' {
                hello.push(byte[0]);
            }
            let frames = concat!(
                r#"{"frame":"envelope","body":{"origin":"router","timestamp":1,"kind":{"type":"ValueMetric","name":"latency","value":2.5,"unit":"ms"}}}"#,
                "\n",
                "not json\n",
                r#"{"frame":"close","body":{"code":1008,"reason":"slow consumer"}}"#,
                "\n",
            );
            socket.write_all(frames.as_bytes()).await.unwrap();
            String::from_utf8(hello).unwrap()
        });

        let mut transport = TcpJsonTransport::new();
        let mut streams = transport
            .open(&options(format!("tcp://{}", addr)))
            .await
            .expect("open");

        let event = streams.events.recv().await.expect("envelope");
        assert_eq!(event.origin, "router");
        assert!(matches!(event.kind, EventKind::ValueMetric { ref name, .. } if name == "latency"));

        assert_eq!(
            streams.errors.recv().await,
            Some(TransportError::PolicyViolation("slow consumer".to_string()))
        );

        let hello = server.await.unwrap();
        assert!(hello.contains(r#""subscription_id":"sub-1""#));
        assert!(hello.contains(r#""authorization":"bearer 123456789""#));
        transport.close();
    }

    #[tokio::test]
    async fn test_eof_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut hello = String::new();
            let mut reader = BufReader::new(socket);
            reader.read_line(&mut hello).await.unwrap();
            drop(reader);
        });

        let mut transport = TcpJsonTransport::new();
        let mut streams = transport
            .open(&options(addr.to_string()))
            .await
            .expect("open");
        assert!(matches!(
            streams.errors.recv().await,
            Some(TransportError::Retryable(_))
        ));
    }

    /// Accept one subscriber, read its subscription line, then write `frames`.
    /// With `hold` set the socket stays open afterwards instead of closing.
    async fn serve_frames(listener: TcpListener, frames: &'static str, hold: bool) {
        let (socket, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(socket);
        let mut hello = String::new();
        reader.read_line(&mut hello).await.unwrap();
        reader.get_mut().write_all(frames.as_bytes()).await.unwrap();
        if hold {
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frames = concat!(
            "{\"frame\":\"envelope\",\"body\":\n",
            r#"{"frame":"heartbeat","body":{}}"#,
            "\n",
            r#"{"frame":"envelope","body":{"origin":"router","timestamp":1}}"#,
            "\n",
            "\n",
            r#"{"frame":"envelope","body":{"origin":"cell","timestamp":2,"kind":{"type":"CounterEvent","name":"requests","delta":1,"total":7}}}"#,
            "\n",
        );
        tokio::spawn(serve_frames(listener, frames, false));

        let mut transport = TcpJsonTransport::new();
        let mut streams = transport
            .open(&options(addr.to_string()))
            .await
            .expect("open");

        let event = streams.events.recv().await.expect("envelope");
        assert_eq!(event.origin, "cell");
        assert!(matches!(event.kind, EventKind::CounterEvent { total: 7, .. }));

        assert!(matches!(
            streams.errors.recv().await,
            Some(TransportError::Retryable(_))
        ));
        assert!(streams.events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_ends_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_frames(listener, "", true));

        let mut opts = options(addr.to_string());
        opts.idle_timeout = Some(Duration::from_secs(5));
        let mut transport = TcpJsonTransport::new();
        let mut streams = transport.open(&opts).await.expect("open");

        assert_eq!(
            streams.errors.recv().await,
            Some(TransportError::Other("no data received for 5s".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_idle_timeout_waits_indefinitely() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_frames(listener, "", true));

        let mut transport = TcpJsonTransport::new();
        let mut streams = transport
            .open(&options(addr.to_string()))
            .await
            .expect("open");

        let waited = tokio::time::timeout(Duration::from_secs(3600), streams.errors.recv()).await;
        assert!(waited.is_err(), "stream ended without an idle timeout");
        transport.close();
    }

    #[tokio::test]
    async fn test_connect_refused_fails_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut transport = TcpJsonTransport::new();
        let result = transport.open(&options(addr.to_string())).await;
        assert!(matches!(result, Err(OpenError::Connect(_))));
    }
}
