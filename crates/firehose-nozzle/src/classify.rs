// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport error classification.
//!
//! Decides how loudly a firehose disconnect is logged and whether it raises
//! a slow-consumer alert. A policy-violation close means the upstream gave up
//! on us because we could not keep up; that is the one case an operator can
//! act on (scale the nozzle), so it is the only one that alerts.

use thiserror::Error;

/// Error surfaced by the firehose transport while streaming.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Transient network condition; the upstream expects a reconnect.
    #[error("retryable transport error: {0}")]
    Retryable(String),

    /// Upstream closed with a policy violation (keep-alive/backpressure breach).
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// Upstream closed the stream cleanly.
    #[error("normal closure")]
    NormalClosure,

    #[error("{0}")]
    Other(String),
}

/// Log severity chosen for a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

/// Outcome of classifying a transport error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDecision {
    /// `None` means the error is not logged at all.
    pub severity: Option<Severity>,
    /// Whether a slow-consumer alert point must be emitted.
    pub emit_alert: bool,
    /// Log message.
    pub message: String,
}

/// Classify a transport error.
pub fn classify(error: &TransportError) -> ErrorDecision {
    match error {
        TransportError::NormalClosure => ErrorDecision {
            severity: None,
            emit_alert: false,
            message: String::new(),
        },
        TransportError::PolicyViolation(reason) => ErrorDecision {
            severity: Some(Severity::Error),
            emit_alert: true,
            message: format!(
                "{}. Disconnected because nozzle couldn't keep up.",
                read_error_message(reason)
            ),
        },
        TransportError::Retryable(reason) => ErrorDecision {
            severity: Some(Severity::Info),
            emit_alert: false,
            message: format!("Reconnecting: {}", reason),
        },
        TransportError::Other(reason) => ErrorDecision {
            severity: Some(Severity::Error),
            emit_alert: false,
            message: read_error_message(reason),
        },
    }
}

/// Firehose read failure, with the close reason when the upstream gave one.
fn read_error_message(reason: &str) -> String {
    if reason.is_empty() {
        "Error while reading from the firehose".to_string()
    } else {
        format!("Error while reading from the firehose: {}", reason)
    }
}
