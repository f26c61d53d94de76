// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Firehose Nozzle
//!
//! Streams platform telemetry from a firehose subscription into InfluxDB in
//! periodic batches.
//!
//! This crate provides:
//! - Translation of value metrics and counters into InfluxDB points
//! - A loop-owned batch accumulator flushed on a fixed schedule
//! - Slow-consumer detection and alerting
//! - Classification of firehose disconnects
//! - TOML configuration with `NOZZLE_*` environment overrides
//!
//! # Overview
//!
//! ```text
//! Transport --> TelemetryEvent --> translate --> BatchBuffer --tick--> MetricSink
//!     |                                              ^
//!     +-- TransportError --> classify --> alert -----+
//! ```
//!
//! The transport, sink and token source are traits so the engine can be
//! driven in-memory ([`transport::ChannelTransport`]) or against real
//! services ([`transport::StreamTransport`], [`sink::InfluxHttpSink`],
//! [`auth::UaaTokenFetcher`]).

pub mod auth;
pub mod buffer;
pub mod classify;
pub mod config;
pub mod engine;
pub mod event;
pub mod influx;
pub mod internal;
pub mod scheduler;
pub mod sink;
pub mod translate;
pub mod transport;

pub use config::NozzleConfig;
pub use engine::{Nozzle, NozzleError, NozzleState, ShutdownHandle};
pub use event::{EventKind, TelemetryEvent};
pub use influx::Point;
pub use sink::{Batch, MetricSink};
pub use transport::Transport;
