//! Bounded sample history
//!
//! Fixed capacity, oldest sample evicted first.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::HealthSample;

/// Ring buffer of health samples
#[derive(Debug, Clone)]
pub struct SampleRing {
    samples: VecDeque<HealthSample>,
    capacity: usize,
    evicted: u64,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(10_000)),
            capacity,
            evicted: 0,
        }
    }

    pub fn push(&mut self, sample: HealthSample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
            self.evicted += 1;
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&HealthSample> {
        self.samples.back()
    }

    /// Up to `n` most recent samples, oldest first
    pub fn recent(&self, n: usize) -> Vec<HealthSample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            samples: self.samples.len(),
            capacity: self.capacity,
            evicted: self.evicted,
            oldest: self.samples.front().map(|s| s.timestamp),
            newest: self.samples.back().map(|s| s.timestamp),
        }
    }
}

/// Ring buffer statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RingStats {
    pub samples: usize,
    pub capacity: usize,
    /// Samples dropped to make room since startup
    pub evicted: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(secs: i64) -> HealthSample {
        HealthSample {
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            cpu: 0.1,
            memory: 0.2,
            error_rate: 0.0,
            avg_response_time_ms: 12.0,
            request_count: 4,
            dependencies: Default::default(),
        }
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut ring = SampleRing::new(3);
        for secs in 0..5 {
            ring.push(sample(secs));
        }

        assert_eq!(ring.len(), 3);
        let stats = ring.stats();
        assert_eq!(stats.evicted, 2);
        assert_eq!(stats.oldest, Some(Utc.timestamp_opt(2, 0).unwrap()));
        assert_eq!(ring.latest().unwrap().timestamp, Utc.timestamp_opt(4, 0).unwrap());
    }

    #[test]
    fn test_recent_returns_tail_in_order() {
        let mut ring = SampleRing::new(10);
        for secs in 0..4 {
            ring.push(sample(secs));
        }

        let tail: Vec<i64> = ring.recent(2).iter().map(|s| s.timestamp.timestamp()).collect();
        assert_eq!(tail, vec![2, 3]);
        assert_eq!(ring.recent(100).len(), 4);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut ring = SampleRing::new(0);
        ring.push(sample(1));
        ring.push(sample(2));

        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.len(), 1);
    }
}
