// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Self-observability metrics written alongside firehose points.

use crate::buffer::BatchBuffer;
use crate::influx::Point;
use std::time::{SystemTime, UNIX_EPOCH};

/// Measurement name of the slow-consumer alert.
pub const SLOW_CONSUMER_ALERT: &str = "slowConsumerAlert";

/// Received-message counter and alert point factory.
#[derive(Debug)]
pub struct InternalMetrics {
    prefix: String,
    deployment: String,
    messages_received: u64,
}

impl InternalMetrics {
    /// Create an emitter tagging its points with `deployment`.
    ///
    /// `prefix` is prepended verbatim to internal measurement names.
    pub fn new(prefix: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            deployment: deployment.into(),
            messages_received: 0,
        }
    }

    /// Count one envelope pulled from the firehose.
    pub fn record_message_received(&mut self) {
        self.messages_received = self.messages_received.saturating_add(1);
    }

    /// Total envelopes received since the emitter was created.
    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    /// Append a slow-consumer alert point stamped with the current time.
    pub fn record_slow_consumer_alert(&self, buffer: &mut BatchBuffer) {
        buffer.append(self.internal_point(SLOW_CONSUMER_ALERT, 1.0, now_ns()));
    }

    fn internal_point(&self, name: &str, value: f64, timestamp_ns: i64) -> Point {
        Point::new(format!("{}{}", self.prefix, name), value, timestamp_ns)
            .with_tag("deployment", self.deployment.clone())
    }
}

/// Wall-clock time in nanoseconds since the Unix epoch.
fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
