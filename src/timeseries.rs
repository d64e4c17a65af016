//! # Time Series Module
//!
//! Bounded, time-ordered history of scalar readings used for the biometric
//! side channels (HR, SpO2, perfusion index, sleep, temperature).
//!
//! Points are kept sorted by time. A retention window drops everything older
//! than `newest - retention` on every insert, so memory stays bounded no
//! matter how long a session runs.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub time: u64,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct TimeSeries {
    data: VecDeque<Point>,
    retention_ms: u64,
}

impl TimeSeries {
    pub fn new(retention_ms: u64) -> Self {
        Self {
            data: VecDeque::new(),
            retention_ms,
        }
    }

    pub fn retention_ms(&self) -> u64 {
        self.retention_ms
    }

    /// Insert a point at its time-ordered position and prune expired points
    pub fn add_point(&mut self, time: u64, value: f64) {
        let is_append = self.data.back().map_or(true, |last| last.time <= time);
        if is_append {
            self.data.push_back(Point { time, value });
        } else {
            let idx = self.partition_point_time_inclusive(time);
            self.data.insert(idx, Point { time, value });
        }
        self.prune();
    }

    fn prune(&mut self) {
        let Some(newest) = self.data.back().map(|p| p.time) else {
            return;
        };
        let cutoff = newest.saturating_sub(self.retention_ms);
        while self.data.front().is_some_and(|p| p.time < cutoff) {
            self.data.pop_front();
        }
    }

    /// Index of the first point with `time >= t`
    pub fn partition_point_time(&self, t: u64) -> usize {
        self.data.partition_point(|p| p.time < t)
    }

    /// Index of the first point with `time > t`
    pub fn partition_point_time_inclusive(&self, t: u64) -> usize {
        self.data.partition_point(|p| p.time <= t)
    }

    pub fn last_point(&self) -> Option<&Point> {
        self.data.back()
    }

    /// Most recent point at or before `t`
    pub fn latest_at_or_before(&self, t: u64) -> Option<&Point> {
        let idx = self.partition_point_time_inclusive(t);
        if idx == 0 {
            None
        } else {
            self.data.get(idx - 1)
        }
    }

    /// Points within `[t - window_ms, t]`
    pub fn window(&self, t: u64, window_ms: u64) -> impl Iterator<Item = &Point> {
        let start = self.partition_point_time(t.saturating_sub(window_ms));
        let end = self.partition_point_time_inclusive(t);
        self.data.range(start..end.max(start))
    }

    /// True if any point in `[t - window_ms, t]` satisfies `predicate`
    pub fn any_in_window(&self, t: u64, window_ms: u64, predicate: impl Fn(f64) -> bool) -> bool {
        self.window(t, window_ms).any(|p| predicate(p.value))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.data.iter()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}
