// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Firehose telemetry envelopes.
//!
//! An envelope carries the emitting component's identity (origin,
//! deployment, job, index, ip), a nanosecond timestamp, free-form tags and
//! exactly one event payload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Origin of the upstream component that reports dropped messages.
pub const DROPPED_MESSAGES_ORIGIN: &str = "doppler";

/// Counter name emitted upstream when its buffer truncated messages.
pub const DROPPED_MESSAGES_COUNTER: &str = "TruncatingBuffer.DroppedMessages";

/// One unit of platform telemetry received from the firehose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Component that emitted the event (e.g. `doppler`).
    #[serde(default)]
    pub origin: String,
    /// Deployment name of the emitting VM.
    #[serde(default)]
    pub deployment: String,
    /// Job name of the emitting VM.
    #[serde(default)]
    pub job: String,
    /// Job instance index.
    #[serde(default)]
    pub index: String,
    /// IP address of the emitting VM.
    #[serde(default)]
    pub ip: String,
    /// Nanoseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: i64,
    /// Additional envelope tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Event payload.
    pub kind: EventKind,
}

/// Event payload carried by an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    /// Instantaneous gauge sample.
    ValueMetric {
        name: String,
        value: f64,
        #[serde(default)]
        unit: String,
    },
    /// Monotonic counter with its latest delta and cumulative total.
    CounterEvent {
        name: String,
        #[serde(default)]
        delta: u64,
        total: u64,
    },
    /// Application or platform log line.
    LogMessage {
        message: String,
        #[serde(default)]
        message_type: LogMessageType,
        #[serde(default)]
        app_id: String,
    },
    /// Any other envelope type (HTTP start/stop, container metrics, errors...).
    #[serde(other)]
    Other,
}

/// Output stream of a log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogMessageType {
    #[default]
    Out,
    Err,
}

impl TelemetryEvent {
    /// Create an envelope with empty identity fields.
    pub fn new(origin: impl Into<String>, timestamp: i64, kind: EventKind) -> Self {
        Self {
            origin: origin.into(),
            deployment: String::new(),
            job: String::new(),
            index: String::new(),
            ip: String::new(),
            timestamp,
            tags: BTreeMap::new(),
            kind,
        }
    }

    /// Set the deployment name.
    pub fn with_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = deployment.into();
        self
    }

    /// Set the job name.
    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }

    /// Set the job index.
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    /// Set the IP address.
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    /// Add an envelope tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Short name of the payload kind, for logging.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EventKind::ValueMetric { .. } => "ValueMetric",
            EventKind::CounterEvent { .. } => "CounterEvent",
            EventKind::LogMessage { .. } => "LogMessage",
            EventKind::Other => "Other",
        }
    }

    /// Whether this is the upstream signal that messages were dropped
    /// before reaching us, i.e. the consumer is too slow.
    pub fn is_dropped_messages_signal(&self) -> bool {
        match &self.kind {
            EventKind::CounterEvent { name, .. } => {
                name == DROPPED_MESSAGES_COUNTER && self.origin == DROPPED_MESSAGES_ORIGIN
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(origin: &str, name: &str) -> TelemetryEvent {
        TelemetryEvent::new(
            origin,
            1_000_000_000,
            EventKind::CounterEvent {
                name: name.to_string(),
                delta: 1,
                total: 10,
            },
        )
    }

    #[test]
    fn test_dropped_messages_signal_requires_origin_and_name() {
        assert!(counter("doppler", "TruncatingBuffer.DroppedMessages").is_dropped_messages_signal());
        assert!(!counter("router", "TruncatingBuffer.DroppedMessages").is_dropped_messages_signal());
        assert!(!counter("doppler", "TruncatingBuffer.Other").is_dropped_messages_signal());
    }

    #[test]
    fn test_value_metric_is_never_dropped_signal() {
        let event = TelemetryEvent::new(
            "doppler",
            1,
            EventKind::ValueMetric {
                name: "TruncatingBuffer.DroppedMessages".to_string(),
                value: 1.0,
                unit: "count".to_string(),
            },
        );
        assert!(!event.is_dropped_messages_signal());
    }

    #[test]
    fn test_deserialize_envelope_json() {
        let json = r#"{
            "origin": "origin",
            "deployment": "deployment-name",
            "job": "doppler",
            "timestamp": 1000000000,
            "tags": {"tag-0": "tagsvalue"},
            "kind": {"type": "ValueMetric", "name": "metricName-0", "value": 0.5, "unit": "gauge"}
        }"#;

        let event: TelemetryEvent = serde_json::from_str(json).expect("parse envelope");
        assert_eq!(event.origin, "origin");
        assert_eq!(event.index, "");
        assert_eq!(event.tags.get("tag-0").map(String::as_str), Some("tagsvalue"));
        assert_eq!(event.kind_name(), "ValueMetric");
    }

    #[test]
    fn test_unknown_kind_deserializes_as_other() {
        let json = r#"{"origin": "gorouter", "kind": {"type": "HttpStartStop"}}"#;
        let event: TelemetryEvent = serde_json::from_str(json).expect("parse envelope");
        assert_eq!(event.kind, EventKind::Other);
    }
}
