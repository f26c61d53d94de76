// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Firehose transport abstraction.
//!
//! A transport opens the firehose subscription and hands back two channels:
//! one carrying envelopes, one carrying the error that ended the stream. A
//! background reader owned by the transport feeds both; the nozzle control
//! loop is the only consumer.
//!
//! Implementations:
//! - [`WebSocketTransport`]: JSON messages over `ws://` or `wss://`
//! - [`TcpJsonTransport`]: newline-delimited JSON frames over TCP
//! - [`StreamTransport`]: picks one of the above from the endpoint scheme
//! - [`ChannelTransport`]: in-memory, fed through a [`FirehoseFeed`]

pub mod tcp;
pub mod ws;

pub use tcp::TcpJsonTransport;
pub use ws::WebSocketTransport;

use crate::classify::TransportError;
use crate::event::TelemetryEvent;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors opening the firehose stream.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("invalid stream endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("unsupported stream endpoint scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("connection failed: {0}")]
    Connect(#[from] std::io::Error),

    #[error("subscription request could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("auth token is not a valid header value")]
    InvalidToken,

    #[error("stream unavailable: {0}")]
    Unavailable(String),
}

/// Close code of a clean shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code sent when the server drops a consumer that fell behind.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Envelopes buffered between a socket reader and the nozzle.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Map a close code and reason to the error that ends the stream.
///
/// 1000 is a normal closure and 1008 a policy violation. Any other code is a
/// generic error.
pub fn close_error(code: u16, reason: String) -> TransportError {
    match code {
        CLOSE_NORMAL => TransportError::NormalClosure,
        CLOSE_POLICY_VIOLATION => TransportError::PolicyViolation(reason),
        code if reason.is_empty() => TransportError::Other(format!("close {}", code)),
        code => TransportError::Other(format!("close {}: {}", code, reason)),
    }
}

pub(crate) fn idle_timeout_error(limit: Duration) -> TransportError {
    TransportError::Other(format!("no data received for {}s", limit.as_secs()))
}

/// Parameters for opening a firehose subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    /// Stream endpoint URL.
    pub endpoint: String,
    /// Subscription id shared by cooperating consumers.
    pub subscription_id: String,
    /// Bearer credential, empty when access control is disabled.
    pub auth_token: String,
    /// Skip TLS certificate verification.
    pub insecure_skip_verify: bool,
    /// Close the stream after this long without data.
    pub idle_timeout: Option<Duration>,
}

/// Receiving ends of an open subscription.
#[derive(Debug)]
pub struct EventStreams {
    pub events: mpsc::Receiver<TelemetryEvent>,
    pub errors: mpsc::Receiver<TransportError>,
}

/// A firehose connection.
pub trait Transport: Send {
    /// Open the subscription described by `options`.
    fn open(
        &mut self,
        options: &StreamOptions,
    ) -> impl Future<Output = Result<EventStreams, OpenError>> + Send;

    /// Close the connection and stop the background reader.
    fn close(&mut self);
}

/// Network transport chosen from the endpoint scheme.
///
/// `ws://` and `wss://` use [`WebSocketTransport`]; `tcp://` or a bare
/// `host:port` use [`TcpJsonTransport`].
#[derive(Debug)]
pub enum StreamTransport {
    Tcp(TcpJsonTransport),
    WebSocket(WebSocketTransport),
}

impl StreamTransport {
    pub fn for_endpoint(endpoint: &str) -> Result<Self, OpenError> {
        match endpoint.split_once("://") {
            Some(("ws" | "wss", _)) => Ok(Self::WebSocket(WebSocketTransport::new())),
            Some(("tcp", _)) | None => Ok(Self::Tcp(TcpJsonTransport::new())),
            Some((scheme, _)) => Err(OpenError::UnsupportedScheme(scheme.to_string())),
        }
    }
}

impl Transport for StreamTransport {
    async fn open(&mut self, options: &StreamOptions) -> Result<EventStreams, OpenError> {
        match self {
            Self::Tcp(transport) => transport.open(options).await,
            Self::WebSocket(transport) => transport.open(options).await,
        }
    }

    fn close(&mut self) {
        match self {
            Self::Tcp(transport) => transport.close(),
            Self::WebSocket(transport) => transport.close(),
        }
    }
}

/// In-memory transport.
///
/// Envelopes and errors are pushed through the paired [`FirehoseFeed`].
pub struct ChannelTransport {
    streams: Option<EventStreams>,
    unavailable: Option<String>,
    shared: Arc<FeedShared>,
}

#[derive(Default)]
struct FeedShared {
    closed: AtomicBool,
    opened_with: Mutex<Option<StreamOptions>>,
}

/// Producer side of a [`ChannelTransport`].
#[derive(Clone)]
pub struct FirehoseFeed {
    events: mpsc::Sender<TelemetryEvent>,
    errors: mpsc::Sender<TransportError>,
    shared: Arc<FeedShared>,
}

impl ChannelTransport {
    /// Create a transport whose event channel holds up to `capacity` envelopes.
    pub fn new(capacity: usize) -> (Self, FirehoseFeed) {
        let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
        let (error_tx, error_rx) = mpsc::channel(1);
        let shared = Arc::new(FeedShared::default());

        let transport = Self {
            streams: Some(EventStreams {
                events: event_rx,
                errors: error_rx,
            }),
            unavailable: None,
            shared: Arc::clone(&shared),
        };
        let feed = FirehoseFeed {
            events: event_tx,
            errors: error_tx,
            shared,
        };
        (transport, feed)
    }

    /// Create a transport whose `open` always fails with `reason`.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            streams: None,
            unavailable: Some(reason.into()),
            shared: Arc::new(FeedShared::default()),
        }
    }
}

impl Transport for ChannelTransport {
    async fn open(&mut self, options: &StreamOptions) -> Result<EventStreams, OpenError> {
        if let Some(reason) = &self.unavailable {
            return Err(OpenError::Unavailable(reason.clone()));
        }
        let streams = self
            .streams
            .take()
            .ok_or_else(|| OpenError::Unavailable("stream already opened".into()))?;

        if let Ok(mut opened) = self.shared.opened_with.lock() {
            *opened = Some(options.clone());
        }
        Ok(streams)
    }

    fn close(&mut self) {
        self.shared.closed.store(true, Ordering::Relaxed);
    }
}

impl FirehoseFeed {
    /// Push an envelope. Returns `false` once the consumer is gone.
    pub async fn send_event(&self, event: TelemetryEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Push the error that ends the stream. Returns `false` once the consumer is gone.
    pub async fn send_error(&self, error: TransportError) -> bool {
        self.errors.send(error).await.is_ok()
    }

    /// Whether the consumer closed the transport.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Relaxed)
    }

    /// Options passed to the last successful `open`.
    pub fn opened_with(&self) -> Option<StreamOptions> {
        self.shared
            .opened_with
            .lock()
            .ok()
            .and_then(|opened| opened.clone())
    }
}
