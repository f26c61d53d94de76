// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket firehose transport.
//!
//! Connects to `{endpoint}/firehose/{subscription_id}` and sends the token in
//! the `Authorization` header. Every text or binary message carries one JSON
//! envelope:
//!
//! ```text
//! {"origin":"router","timestamp":1,"kind":{"type":"ValueMetric","name":"latency","value":2.5,"unit":"ms"}}
//! ```
//!
//! The close frame's code decides how the stream ended (see
//! [`close_error`]). A reset or an end of stream without a close frame is
//! retryable. `wss://` endpoints use rustls with the webpki root store, or
//! no certificate verification at all when `insecure_skip_verify` is set.

use super::{
    close_error, idle_timeout_error, EventStreams, OpenError, StreamOptions, Transport,
    EVENT_CHANNEL_CAPACITY,
};
use crate::classify::TransportError;
use crate::event::TelemetryEvent;
use futures::StreamExt;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

type FirehoseSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Firehose client speaking JSON over WebSocket.
#[derive(Debug, Default)]
pub struct WebSocketTransport {
    reader: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for WebSocketTransport {
    async fn open(&mut self, options: &StreamOptions) -> Result<EventStreams, OpenError> {
        let (url, secure) = subscription_url(&options.endpoint, &options.subscription_id)?;

        let mut request = url.as_str().into_client_request()?;
        if !options.auth_token.is_empty() {
            let token =
                HeaderValue::from_str(&options.auth_token).map_err(|_| OpenError::InvalidToken)?;
            request.headers_mut().insert(AUTHORIZATION, token);
        }

        let connector = if secure {
            Some(Connector::Rustls(Arc::new(tls_config(
                options.insecure_skip_verify,
            )?)))
        } else {
            if options.insecure_skip_verify {
                tracing::debug!("TLS verification skip has no effect on plaintext stream {}", url);
            }
            None
        };

        let (socket, _response) =
            connect_async_tls_with_config(request, None, true, connector).await?;
        tracing::info!(
            "Subscribed to firehose at {} as '{}'",
            options.endpoint,
            options.subscription_id
        );

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(1);

        self.close();
        self.reader = Some(tokio::spawn(read_messages(
            socket,
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

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Build the subscription URL. Returns it with whether the scheme is `wss`.
fn subscription_url(endpoint: &str, subscription_id: &str) -> Result<(String, bool), OpenError> {
    let (scheme, rest) = endpoint
        .split_once("://")
        .ok_or_else(|| OpenError::InvalidEndpoint(endpoint.to_string()))?;
    let secure = match scheme {
        "wss" => true,
        "ws" => false,
        other => return Err(OpenError::UnsupportedScheme(other.to_string())),
    };

    let base = rest.trim_end_matches('/');
    if base.is_empty() || subscription_id.is_empty() {
        return Err(OpenError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok((
        format!("{}://{}/firehose/{}", scheme, base, subscription_id),
        secure,
    ))
}

fn tls_config(insecure_skip_verify: bool) -> Result<ClientConfig, OpenError> {
    let builder =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?;

    let config = if insecure_skip_verify {
        tracing::warn!("Firehose TLS certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(config)
}

/// Socket reader task.
async fn read_messages(
    mut socket: FirehoseSocket,
    events: mpsc::Sender<TelemetryEvent>,
    errors: mpsc::Sender<TransportError>,
    idle_timeout: Option<Duration>,
) {
    let error = loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, socket.next()).await {
                Ok(next) => next,
                Err(_) => break idle_timeout_error(limit),
            },
            None => socket.next().await,
        };

        let payload = match next {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(Some(frame)))) => {
                break close_error(u16::from(frame.code), frame.reason.into_owned())
            }
            Some(Ok(Message::Close(None))) => {
                break close_error(u16::from(CloseCode::Status), String::new())
            }
            // Pings are answered by the socket itself.
            Some(Ok(_)) => continue,
            Some(Err(e)) => break read_error(e),
            None => break TransportError::Retryable("stream closed by peer".into()),
        };

        match serde_json::from_slice::<TelemetryEvent>(&payload) {
            Ok(event) => {
                if events.send(event).await.is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!("Skipping malformed firehose message: {}", e),
        }
    };

    let _ = errors.send(error).await;
    // Flushes the close reply, or starts the close handshake after a timeout.
    let _ = socket.close(None).await;
}

fn read_error(error: WsError) -> TransportError {
    match &error {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Io(_)
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportError::Retryable(error.to_string())
        }
        _ => TransportError::Other(error.to_string()),
    }
}

/// Accepts any server certificate.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
