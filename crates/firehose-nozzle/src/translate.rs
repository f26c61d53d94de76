// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry envelope to InfluxDB point mapping.
//!
//! Only numeric envelopes (value metrics and counters) map to a point. The
//! envelope identity becomes the base tag set, and envelope tags are laid
//! on top of it.

use crate::event::{EventKind, TelemetryEvent};
use crate::influx::Point;
use std::collections::BTreeMap;
use thiserror::Error;

/// Why an envelope produced no point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("unsupported event kind: {0}")]
    UnsupportedEventKind(&'static str),
}

/// Map one envelope to a point.
pub fn translate(event: &TelemetryEvent) -> Result<Point, TranslateError> {
    let (name, value) = match &event.kind {
        EventKind::ValueMetric { name, value, .. } => (name, *value),
        EventKind::CounterEvent { name, total, .. } => (name, *total as f64),
        EventKind::LogMessage { .. } | EventKind::Other => {
            return Err(TranslateError::UnsupportedEventKind(event.kind_name()))
        }
    };

    let measurement = format!("{}.{}", event.origin, name);
    Ok(Point::new(measurement, value, event.timestamp).with_tags(envelope_tags(event)))
}

/// Base identity tags overlaid with the envelope's own tags.
///
/// Envelope tags win when a key collides with one of the identity keys.
fn envelope_tags(event: &TelemetryEvent) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert("deployment".to_string(), event.deployment.clone());
    tags.insert("job".to_string(), event.job.clone());
    tags.insert("index".to_string(), event.index.clone());
    tags.insert("ip".to_string(), event.ip.clone());

    for (key, value) in &event.tags {
        tags.insert(key.clone(), value.clone());
    }
    tags
}
