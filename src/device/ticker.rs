//! Tick sources for the periodic activities

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Something an activity can wait on between iterations
#[async_trait]
pub trait Ticker: Send {
    async fn tick(&mut self);
}

/// Production ticker backed by a tokio [`Interval`]
///
/// Missed ticks are delayed rather than bursted, so a slow publish pushes the
/// schedule back instead of triggering catch-up sends.
#[derive(Debug)]
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    /// First tick completes immediately
    pub fn new(period: Duration) -> Self {
        Self::starting_at(Instant::now(), period)
    }

    /// First tick completes after one full period
    pub fn delayed(period: Duration) -> Self {
        Self::starting_at(Instant::now() + period, period)
    }

    fn starting_at(start: Instant, period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}
