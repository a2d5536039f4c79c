//! Keep-alive based link health.
//!
//! The server pings roughly every thirty seconds. [`PingTracker`] keeps a
//! short window of the observed gaps and derives average, spread and a coarse
//! [`ConnectionQuality`] from them. The score is advisory only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const NOMINAL_PING_INTERVAL: Duration = Duration::from_secs(30);
/// A gap longer than nominal + tolerance counts as a missed ping.
pub const PING_TOLERANCE: Duration = Duration::from_secs(10);
const WINDOW_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ConnectionQuality {
    Disconnected,
    Calculating,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl ConnectionQuality {
    /// Tiers from interval statistics, both in milliseconds.
    pub fn classify(average_interval_ms: Option<u64>, jitter_ms: Option<u64>) -> Self {
        match (average_interval_ms, jitter_ms) {
            (None, None) => Self::Calculating,
            (Some(avg), None) => match avg {
                28_000..=32_000 => Self::Excellent,
                25_000..=35_000 => Self::Good,
                20_000..=40_000 => Self::Fair,
                _ => Self::Poor,
            },
            (None, Some(jitter)) => match jitter {
                0..1_000 => Self::Good,
                1_000..2_000 => Self::Fair,
                _ => Self::Poor,
            },
            (Some(avg), Some(jitter)) => {
                if jitter < 1_000 && (28_000..=32_000).contains(&avg) {
                    Self::Excellent
                } else if jitter < 2_000 && (25_000..=35_000).contains(&avg) {
                    Self::Good
                } else if jitter < 5_000 && (20_000..=40_000).contains(&avg) {
                    Self::Fair
                } else {
                    Self::Poor
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionMetrics {
    pub interval_ms: Option<u64>,
    pub average_interval_ms: Option<u64>,
    pub min_interval_ms: Option<u64>,
    pub max_interval_ms: Option<u64>,
    pub jitter_ms: Option<u64>,
    pub missed_pings: u64,
    pub total_pings: u64,
    pub success_rate: f64,
    pub quality: ConnectionQuality,
    pub timestamp: DateTime<Utc>,
    pub last_ping_at: Option<DateTime<Utc>>,
}

impl ConnectionMetrics {
    pub fn disconnected() -> Self {
        Self {
            interval_ms: None,
            average_interval_ms: None,
            min_interval_ms: None,
            max_interval_ms: None,
            jitter_ms: None,
            missed_pings: 0,
            total_pings: 0,
            success_rate: 0.0,
            quality: ConnectionQuality::Disconnected,
            timestamp: Utc::now(),
            last_ping_at: None,
        }
    }
}

/// Rolling window of ping gaps for one connection.
#[derive(Debug)]
pub struct PingTracker {
    intervals: VecDeque<Duration>,
    last_ping: Option<Instant>,
    last_ping_at: Option<DateTime<Utc>>,
    total_pings: u64,
    missed_pings: u64,
    nominal: Duration,
    tolerance: Duration,
}

impl Default for PingTracker {
    fn default() -> Self {
        Self::new(NOMINAL_PING_INTERVAL, PING_TOLERANCE)
    }
}

impl PingTracker {
    pub fn new(nominal: Duration, tolerance: Duration) -> Self {
        Self {
            intervals: VecDeque::with_capacity(WINDOW_SIZE),
            last_ping: None,
            last_ping_at: None,
            total_pings: 0,
            missed_pings: 0,
            nominal,
            tolerance,
        }
    }

    /// Records a ping observed at `now` and returns the updated metrics.
    pub fn record_ping(&mut self, now: Instant) -> ConnectionMetrics {
        if let Some(last) = self.last_ping {
            let gap = now.saturating_duration_since(last);
            self.missed_pings += self.missed_in_gap(gap);
            if self.intervals.len() == WINDOW_SIZE {
                self.intervals.pop_front();
            }
            self.intervals.push_back(gap);
        }
        self.last_ping = Some(now);
        self.last_ping_at = Some(Utc::now());
        self.total_pings += 1;
        self.snapshot(now)
    }

    /// Metrics as of `now`, counting a currently overdue ping as missed
    /// without recording it.
    pub fn snapshot(&self, now: Instant) -> ConnectionMetrics {
        let pending_missed = self
            .last_ping
            .map(|last| self.missed_in_gap(now.saturating_duration_since(last)))
            .unwrap_or(0);
        let missed_pings = self.missed_pings + pending_missed;

        let millis: Vec<u64> = self.intervals.iter().map(|d| d.as_millis() as u64).collect();
        let average_interval_ms = average(&millis);
        let jitter_ms = standard_deviation(&millis);

        let success_rate = if self.total_pings + missed_pings == 0 {
            100.0
        } else {
            self.total_pings as f64 / (self.total_pings + missed_pings) as f64 * 100.0
        };

        ConnectionMetrics {
            interval_ms: millis.last().copied(),
            average_interval_ms,
            min_interval_ms: millis.iter().min().copied(),
            max_interval_ms: millis.iter().max().copied(),
            jitter_ms,
            missed_pings,
            total_pings: self.total_pings,
            success_rate,
            quality: ConnectionQuality::classify(average_interval_ms, jitter_ms),
            timestamp: Utc::now(),
            last_ping_at: self.last_ping_at,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.nominal, self.tolerance);
    }

    fn missed_in_gap(&self, gap: Duration) -> u64 {
        if gap <= self.nominal + self.tolerance {
            return 0;
        }
        let overdue = gap - self.tolerance;
        (overdue.as_millis() / self.nominal.as_millis().max(1)).max(1) as u64
    }
}

fn average(values: &[u64]) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<u64>() / values.len() as u64)
}

fn standard_deviation(values: &[u64]) -> Option<u64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<u64>() as f64 / values.len() as f64;
    let variance = values
        .iter()
        .map(|v| {
            let d = *v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    Some(variance.sqrt() as u64)
}
