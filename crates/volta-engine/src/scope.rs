//! Scope channel sampling.
//!
//! Each channel tracks one signal and compresses consecutive steps into
//! min/max slots in a ring buffer. With `draw_from_zero` set the full
//! per-slot history is kept instead of wrapping.

use std::collections::VecDeque;

use volta_parser::{ScopeKind, ScopeRequest};

/// One compressed sample: the signal's envelope over `steps_per_slot`
/// timesteps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeSample {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug)]
pub struct ScopeChannel {
    pub spec: ScopeRequest,
    /// Timesteps folded into one sample.
    pub steps_per_slot: usize,
    /// Ring capacity in samples.
    pub capacity: usize,
    /// Keep everything instead of wrapping.
    pub draw_from_zero: bool,
    ring: VecDeque<ScopeSample>,
    pending_min: f64,
    pending_max: f64,
    pending_count: usize,
    last_value: f64,
}

impl ScopeChannel {
    pub fn new(spec: ScopeRequest, steps_per_slot: usize, capacity: usize) -> Self {
        Self {
            spec,
            steps_per_slot: steps_per_slot.max(1),
            capacity: capacity.max(1),
            draw_from_zero: false,
            ring: VecDeque::new(),
            pending_min: f64::INFINITY,
            pending_max: f64::NEG_INFINITY,
            pending_count: 0,
            last_value: 0.0,
        }
    }

    /// Record one timestep's value.
    pub fn record(&mut self, value: f64) {
        self.last_value = value;
        self.pending_min = self.pending_min.min(value);
        self.pending_max = self.pending_max.max(value);
        self.pending_count += 1;
        if self.pending_count >= self.steps_per_slot {
            let sample = ScopeSample {
                min: self.pending_min,
                max: self.pending_max,
            };
            if !self.draw_from_zero && self.ring.len() == self.capacity {
                self.ring.pop_front();
            }
            self.ring.push_back(sample);
            self.pending_min = f64::INFINITY;
            self.pending_max = f64::NEG_INFINITY;
            self.pending_count = 0;
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &ScopeSample> {
        self.ring.iter()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Most recent raw value (not slot-compressed).
    pub fn last_value(&self) -> f64 {
        self.last_value
    }

    pub fn clear(&mut self) {
        self.ring.clear();
        self.pending_min = f64::INFINITY;
        self.pending_max = f64::NEG_INFINITY;
        self.pending_count = 0;
        self.last_value = 0.0;
    }

    pub fn kind(&self) -> ScopeKind {
        self.spec.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(steps_per_slot: usize, capacity: usize) -> ScopeChannel {
        ScopeChannel::new(
            ScopeRequest {
                target: "out".into(),
                kind: ScopeKind::Voltage,
            },
            steps_per_slot,
            capacity,
        )
    }

    #[test]
    fn test_min_max_compression() {
        let mut ch = channel(4, 8);
        for v in [1.0, 3.0, -2.0, 0.5] {
            ch.record(v);
        }
        assert_eq!(ch.len(), 1);
        let s = ch.samples().next().unwrap();
        assert_eq!(s.min, -2.0);
        assert_eq!(s.max, 3.0);
    }

    #[test]
    fn test_ring_wraps_at_capacity() {
        let mut ch = channel(1, 3);
        for v in 0..5 {
            ch.record(v as f64);
        }
        assert_eq!(ch.len(), 3);
        let mins: Vec<f64> = ch.samples().map(|s| s.min).collect();
        assert_eq!(mins, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_draw_from_zero_keeps_history() {
        let mut ch = channel(1, 3);
        ch.draw_from_zero = true;
        for v in 0..10 {
            ch.record(v as f64);
        }
        assert_eq!(ch.len(), 10);
    }
}
