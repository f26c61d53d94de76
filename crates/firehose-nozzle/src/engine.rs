// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Nozzle control loop.
//!
//! ```text
//! Connecting --> Streaming --> Draining --> Stopped
//!      |             |                        ^
//!      +-------------+-- fatal setup/write ---+
//! ```
//!
//! One task owns the accumulator. While streaming it waits on exactly one of
//! a flush tick, an envelope, a transport error or a shutdown request. A
//! transport error, end of stream or shutdown drains: the transport is
//! closed, envelopes already delivered are absorbed, and the accumulator is
//! flushed one last time.

use crate::auth::{AuthError, TokenFetcher};
use crate::buffer::BatchBuffer;
use crate::classify::{classify, Severity, TransportError};
use crate::config::NozzleConfig;
use crate::event::TelemetryEvent;
use crate::internal::InternalMetrics;
use crate::scheduler::FlushScheduler;
use crate::sink::{Batch, MetricSink, WriteError};
use crate::translate::translate;
use crate::transport::{EventStreams, OpenError, StreamOptions, Transport};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, Instrument, Span};

/// Errors that stop the nozzle.
#[derive(Debug, Error)]
pub enum NozzleError {
    #[error("failed to fetch firehose token: {0}")]
    Auth(#[from] AuthError),

    #[error("failed to open firehose stream: {0}")]
    Open(#[from] OpenError),

    #[error("firehose stream ended: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to write batch: {0}")]
    Write(#[from] WriteError),

    #[error("nozzle already stopped")]
    AlreadyStopped,
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NozzleState {
    Connecting,
    Streaming,
    Draining,
    Stopped,
}

/// Requests a graceful stop of a running nozzle.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    /// Ask the nozzle to drain and stop. A request made before `run` is
    /// honoured as soon as streaming starts.
    pub fn shutdown(&self) {
        self.notify.notify_one();
    }
}

/// Why the streaming phase ended.
enum SessionEnd {
    Shutdown,
    EndOfStream,
    Transport(TransportError),
    WriteFailed(WriteError),
}

/// Firehose-to-InfluxDB nozzle.
pub struct Nozzle<T, S, A> {
    config: NozzleConfig,
    transport: T,
    sink: S,
    auth: A,
    buffer: BatchBuffer,
    internal: InternalMetrics,
    state: NozzleState,
    shutdown: Arc<Notify>,
    span: Span,
}

impl<T, S, A> Nozzle<T, S, A>
where
    T: Transport,
    S: MetricSink,
    A: TokenFetcher,
{
    pub fn new(config: NozzleConfig, transport: T, sink: S, auth: A) -> Self {
        let internal = InternalMetrics::new(config.metric_prefix.clone(), config.deployment.clone());
        let span = tracing::info_span!(
            "nozzle",
            subscription = %config.firehose_subscription_id,
            deployment = %config.deployment,
        );
        Self {
            config,
            transport,
            sink,
            auth,
            buffer: BatchBuffer::new(),
            internal,
            state: NozzleState::Connecting,
            shutdown: Arc::new(Notify::new()),
            span,
        }
    }

    pub fn state(&self) -> NozzleState {
        self.state
    }

    /// Envelopes received so far.
    pub fn messages_received(&self) -> u64 {
        self.internal.messages_received()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            notify: Arc::clone(&self.shutdown),
        }
    }

    /// Run until the stream ends, a fatal error occurs or shutdown is requested.
    ///
    /// Returns `Ok(())` after a requested shutdown, a clean end of stream or a
    /// normal closure; otherwise the error that stopped the nozzle.
    pub async fn run(&mut self) -> Result<(), NozzleError> {
        let span = self.span.clone();
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> Result<(), NozzleError> {
        if self.state == NozzleState::Stopped {
            return Err(NozzleError::AlreadyStopped);
        }

        self.state = NozzleState::Connecting;
        info!("Starting firehose nozzle");
        let streams = match self.connect().await {
            Ok(streams) => streams,
            Err(e) => {
                error!("{}", e);
                self.state = NozzleState::Stopped;
                return Err(e);
            }
        };

        self.state = NozzleState::Streaming;
        info!("Streaming firehose to {}", self.config.influxdb_database);
        self.stream(streams).await
    }

    async fn connect(&mut self) -> Result<EventStreams, NozzleError> {
        let auth_token = if self.config.disable_access_control {
            debug!("Access control disabled, connecting without a token");
            String::new()
        } else {
            self.auth.fetch_token().await?
        };

        let options = StreamOptions {
            endpoint: self.config.traffic_controller_url.clone(),
            subscription_id: self.config.firehose_subscription_id.clone(),
            auth_token,
            insecure_skip_verify: self.config.insecure_ssl_skip_verify,
            idle_timeout: self.config.idle_timeout(),
        };
        Ok(self.transport.open(&options).await?)
    }

    async fn stream(&mut self, streams: EventStreams) -> Result<(), NozzleError> {
        let EventStreams {
            mut events,
            mut errors,
        } = streams;
        let mut scheduler = FlushScheduler::new(self.config.flush_interval());
        let shutdown = Arc::clone(&self.shutdown);

        let end = loop {
            tokio::select! {
                _ = scheduler.tick() => {
                    if let Err(e) = self.flush().await {
                        break SessionEnd::WriteFailed(e);
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break match errors.try_recv() {
                        Ok(err) => SessionEnd::Transport(err),
                        Err(_) => SessionEnd::EndOfStream,
                    },
                },
                Some(err) = errors.recv() => break SessionEnd::Transport(err),
                _ = shutdown.notified() => break SessionEnd::Shutdown,
            }
        };

        match end {
            SessionEnd::WriteFailed(e) => {
                self.transport.close();
                self.state = NozzleState::Stopped;
                Err(e.into())
            }
            SessionEnd::Transport(err) => {
                self.handle_transport_error(&err);
                info!("Closing connection with traffic controller due to {}", err);
                let drained = self.drain(&mut events).await;
                match err {
                    TransportError::NormalClosure => drained,
                    err => Err(err.into()),
                }
            }
            SessionEnd::EndOfStream => {
                info!("Firehose stream ended");
                self.drain(&mut events).await
            }
            SessionEnd::Shutdown => {
                info!("Shutdown requested");
                self.drain(&mut events).await
            }
        }
    }

    fn handle_event(&mut self, event: TelemetryEvent) {
        self.internal.record_message_received();

        if event.is_dropped_messages_signal() {
            info!(
                "We've intercepted an upstream message which indicates that the nozzle or the \
                 TrafficController is not keeping up. Please try scaling up the nozzle."
            );
            self.internal.record_slow_consumer_alert(&mut self.buffer);
        }

        match translate(&event) {
            Ok(point) => self.buffer.append(point),
            Err(e) => tracing::trace!("Ignoring envelope from {}: {}", event.origin, e),
        }
    }

    fn handle_transport_error(&mut self, err: &TransportError) {
        let decision = classify(err);
        match decision.severity {
            Some(Severity::Error) => error!("{}", decision.message),
            Some(Severity::Info) => info!("{}", decision.message),
            None => {}
        }
        if decision.emit_alert {
            self.internal.record_slow_consumer_alert(&mut self.buffer);
        }
    }

    async fn flush(&mut self) -> Result<(), WriteError> {
        let batch = Batch::new(self.config.influxdb_database.clone(), self.buffer.drain());
        let count = batch.len();
        match self.sink.write(batch).await {
            Ok(()) => {
                debug!("Flushed {} points", count);
                Ok(())
            }
            Err(e) => {
                error!("FATAL ERROR: lost batch of {} points: {}", count, e);
                Err(e)
            }
        }
    }

    /// Close the transport, absorb delivered envelopes, flush, stop.
    async fn drain(&mut self, events: &mut mpsc::Receiver<TelemetryEvent>) -> Result<(), NozzleError> {
        self.state = NozzleState::Draining;
        self.transport.close();
        while let Ok(event) = events.try_recv() {
            self.handle_event(event);
        }

        let flushed = self.flush().await;
        self.state = NozzleState::Stopped;
        info!(
            "Nozzle stopped after {} envelopes",
            self.internal.messages_received()
        );
        flushed.map_err(NozzleError::from)
    }
}
