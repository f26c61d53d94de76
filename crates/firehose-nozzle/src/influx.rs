// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB points and Line Protocol encoding.
//!
//! Line Protocol format:
//! ```text
//! measurement,tag1=val1,tag2=val2 value=1.5 timestamp_ns
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v1/write_protocols/line_protocol_reference/>

use std::collections::BTreeMap;
use thiserror::Error;

/// Name of the single field every point carries.
pub const VALUE_FIELD: &str = "value";

/// A point that cannot be expressed in Line Protocol.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PointError {
    #[error("point has an empty measurement name")]
    EmptyMeasurement,

    #[error("point '{0}' has an empty tag key")]
    EmptyTagKey(String),

    #[error("point '{measurement}' has a non-finite value ({value})")]
    NonFiniteValue { measurement: String, value: f64 },

    #[error("point '{}' contains a line break", .0.escape_debug())]
    LineBreak(String),
}

/// One measurement ready for time-series storage.
///
/// Tags are kept ordered by key so the encoded line is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    value: f64,
    timestamp_ns: i64,
}

impl Point {
    /// Create a point with no tags.
    pub fn new(measurement: impl Into<String>, value: f64, timestamp_ns: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            value,
            timestamp_ns,
        }
    }

    /// Replace the tag set.
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Add or overwrite one tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    /// Encode this point as a single Line Protocol line (without newline).
    ///
    /// Tags with an empty value are omitted, InfluxDB rejects them.
    pub fn to_line_protocol(&self) -> Result<String, PointError> {
        if self.measurement.is_empty() {
            return Err(PointError::EmptyMeasurement);
        }
        if !self.value.is_finite() {
            return Err(PointError::NonFiniteValue {
                measurement: self.measurement.clone(),
                value: self.value,
            });
        }

        if has_line_break(&self.measurement) {
            return Err(PointError::LineBreak(self.measurement.clone()));
        }

        let mut line = escape_measurement(&self.measurement);

        for (key, value) in &self.tags {
            if key.is_empty() {
                return Err(PointError::EmptyTagKey(self.measurement.clone()));
            }
            if value.is_empty() {
                continue;
            }
            if has_line_break(key) || has_line_break(value) {
                return Err(PointError::LineBreak(self.measurement.clone()));
            }
            line.push(',');
            line.push_str(&escape_tag(key));
            line.push('=');
            line.push_str(&escape_tag(value));
        }

        line.push(' ');
        line.push_str(VALUE_FIELD);
        line.push('=');
        line.push_str(&format_float(self.value));

        line.push(' ');
        line.push_str(&self.timestamp_ns.to_string());

        Ok(line)
    }
}

/// Format a float the way InfluxDB prints it: integral values without a
/// fractional part, everything else in shortest round-trip form.
fn format_float(v: f64) -> String {
    format!("{}", v)
}

/// Line Protocol has no escape for line breaks; a point carrying one
/// would split into two lines.
fn has_line_break(s: &str) -> bool {
    s.contains(['\n', '\r'])
}

/// Escape measurement name per Line Protocol rules.
/// Backslashes, spaces and commas must be escaped with backslash.
fn escape_measurement(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace(' ', "\\ ")
}

/// Escape tag key or value per Line Protocol rules.
/// Backslashes, commas, equals signs, and spaces must be escaped. A bare
/// trailing backslash would otherwise swallow the separator after it.
fn escape_tag(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
