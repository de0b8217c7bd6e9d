use crate::error::{Error, Result};
use crate::memory::types::{MemorySnapshot, MemoryState};

/// Edge produced by a hysteresis decision
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Transition {
    /// Available memory crossed below the trigger (rising edge)
    BecameLow,
    /// Available memory recovered to at or above the trigger (falling edge)
    BecameNormal,
}

/// Tracks the Low/Normal sub-state and reports only edges.
///
/// A single hard threshold is used with no dwell time: a ratio oscillating around the trigger produces alternating
/// transitions on every observation.
#[derive(Debug, Clone)]
pub struct HysteresisTracker {
    memory_low_trigger: f64,
    state: MemoryState,
}

impl HysteresisTracker {
    /// Creates a tracker in the Normal state.
    ///
    /// `memory_low_trigger` must be a finite ratio in `[0, 1]`.
    pub fn new(memory_low_trigger: f64) -> Result<Self> {
        validate_trigger(memory_low_trigger)?;
        Ok(Self { memory_low_trigger, state: MemoryState::Normal })
    }

    pub fn memory_low_trigger(&self) -> f64 {
        self.memory_low_trigger
    }

    pub fn state(&self) -> MemoryState {
        self.state
    }

    pub fn is_low(&self) -> bool {
        self.state == MemoryState::Low
    }

    /// Feeds one snapshot; returns the transition it caused, if any
    pub fn observe(&mut self, snapshot: &MemorySnapshot) -> Option<Transition> {
        let low_now = snapshot.available_ratio() < self.memory_low_trigger;
        match (self.state, low_now) {
            (MemoryState::Normal, true) => {
                self.state = MemoryState::Low;
                Some(Transition::BecameLow)
            },
            (MemoryState::Low, false) => {
                self.state = MemoryState::Normal;
                Some(Transition::BecameNormal)
            },
            _ => None,
        }
    }
}

pub(crate) fn validate_trigger(memory_low_trigger: f64) -> Result<()> {
    if !memory_low_trigger.is_finite() || !(0.0..=1.0).contains(&memory_low_trigger) {
        return Err(Error::invalid_argument(
            "Memory low trigger must be a finite ratio between 0 and 1",
            memory_low_trigger,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(ratio: f64) -> MemorySnapshot {
        let available = (ratio * 1000.0).round() as u64;
        MemorySnapshot::new(1000 - available, available, 1000)
    }

    fn run(trigger: f64, ratios: &[f64]) -> Vec<Option<Transition>> {
        let mut tracker = HysteresisTracker::new(trigger).unwrap();
        ratios.iter().map(|&r| tracker.observe(&snapshot(r))).collect()
    }

    #[test]
    fn test_low_normal_low_sequence() {
        let transitions = run(0.20, &[0.50, 0.15, 0.10, 0.25, 0.05]);
        assert_eq!(
            transitions,
            vec![
                None,
                Some(Transition::BecameLow),
                None,
                Some(Transition::BecameNormal),
                Some(Transition::BecameLow),
            ]
        );
    }

    #[test]
    fn test_threshold_boundary_is_normal() {
        // Exactly at the trigger is not low
        assert_eq!(run(0.20, &[0.20, 0.20]), vec![None, None]);
        assert_eq!(
            run(0.20, &[0.19, 0.20]),
            vec![Some(Transition::BecameLow), Some(Transition::BecameNormal)]
        );
    }

    #[test]
    fn test_oscillation_fires_every_time() {
        let transitions = run(0.5, &[0.4, 0.6, 0.4, 0.6]);
        assert_eq!(
            transitions,
            vec![
                Some(Transition::BecameLow),
                Some(Transition::BecameNormal),
                Some(Transition::BecameLow),
                Some(Transition::BecameNormal),
            ]
        );
    }

    #[test]
    fn test_extreme_triggers() {
        // A zero trigger can never be undercut
        assert!(run(0.0, &[0.0, 0.0]).iter().all(Option::is_none));
        // A trigger of one is undercut by anything short of fully free memory
        assert_eq!(run(1.0, &[0.99, 1.0]), vec![Some(Transition::BecameLow), Some(Transition::BecameNormal)]);
    }

    #[test]
    fn test_edge_accounting_stays_balanced() {
        // Deterministic pseudo-random walk over ratios; no two Low edges without a Normal in between
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        for trigger in [0.1, 0.25, 0.5, 0.9] {
            let mut tracker = HysteresisTracker::new(trigger).unwrap();
            let mut lows = 0i64;
            let mut normals = 0i64;
            let mut prev_low = false;
            for _ in 0..500 {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                let ratio = (seed % 1001) as f64 / 1000.0;
                let low_now = snapshot(ratio).available_ratio() < trigger;

                match tracker.observe(&snapshot(ratio)) {
                    Some(Transition::BecameLow) => {
                        assert!(!prev_low, "rising edge while already low");
                        lows += 1;
                    },
                    Some(Transition::BecameNormal) => {
                        assert!(prev_low, "falling edge while already normal");
                        normals += 1;
                    },
                    None => assert_eq!(prev_low, low_now),
                }

                prev_low = low_now;
                let balance = lows - normals;
                assert!(balance == 0 || balance == 1);
                assert_eq!(balance == 1, tracker.is_low());
            }
        }
    }

    #[test]
    fn test_invalid_triggers() {
        assert!(HysteresisTracker::new(-0.1).is_err());
        assert!(HysteresisTracker::new(1.1).is_err());
        assert!(HysteresisTracker::new(f64::NAN).is_err());
        assert!(HysteresisTracker::new(f64::INFINITY).is_err());

        let tracker = HysteresisTracker::new(0.3).unwrap();
        assert_eq!(tracker.memory_low_trigger(), 0.3);
        assert_eq!(tracker.state(), MemoryState::Normal);
        assert!(!tracker.is_low());
    }
}
