// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic flush ticks.

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Fixed-period tick source for batch flushes.
///
/// The first tick fires one full period after creation. Ticks missed while
/// the nozzle was busy are skipped, never replayed as a burst.
#[derive(Debug)]
pub struct FlushScheduler {
    interval: Interval,
}

impl FlushScheduler {
    /// Create a scheduler ticking every `period`.
    ///
    /// # Panics
    /// Panics if `period` is zero; configuration validation rejects that.
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    /// Wait for the next tick.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}
