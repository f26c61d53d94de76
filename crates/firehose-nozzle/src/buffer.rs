// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batching buffer for pending points.
//!
//! Owned by the nozzle control loop and never shared, so it carries no
//! synchronization. Points leave the buffer only through [`BatchBuffer::drain`].

use crate::influx::Point;

/// Default initial capacity, sized for a few seconds of a busy firehose.
const DEFAULT_CAPACITY: usize = 1024;

/// Ordered collection of points waiting for the next flush.
#[derive(Debug)]
pub struct BatchBuffer {
    points: Vec<Point>,
}

impl BatchBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty buffer with room for `capacity` points.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    /// Add a point at the end of the buffer.
    pub fn append(&mut self, point: Point) {
        self.points.push(point);
    }

    /// Take every buffered point in insertion order, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<Point> {
        std::mem::take(&mut self.points)
    }

    /// Get the current number of buffered points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl Default for BatchBuffer {
    fn default() -> Self {
        Self::new()
    }
}
