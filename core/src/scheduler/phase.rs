//! Phase cursor and wall-clock alignment arithmetic
//!
//! Relative stepping (run the next module for its configured duration)
//! accumulates timer jitter without bound. Every `alignment_interval` the
//! cursor is instead snapped to the phase that *should* be active for the
//! current time of day, and the next timer is armed for whatever is left of
//! that phase.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::clock::time_of_day;

/// The phase that owns a given wall-clock position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NaturalPhase {
    pub index: usize,
    /// Time left in that phase from the given position
    pub remaining: Duration,
}

/// Locate the phase that owns `time_of_day` when rounds are laid back to
/// back starting at midnight.
///
/// Returns `None` for an empty sequence or a zero-length round.
pub fn natural_phase(phases: &[Duration], time_of_day: Duration) -> Option<NaturalPhase> {
    let round: u128 = phases.iter().map(Duration::as_millis).sum();
    if round == 0 {
        return None;
    }
    let into_round = time_of_day.as_millis() % round;

    let mut accumulated = 0u128;
    for (index, phase) in phases.iter().enumerate() {
        accumulated += phase.as_millis();
        if accumulated > into_round {
            let remaining = u64::try_from(accumulated - into_round).unwrap_or(u64::MAX);
            return Some(NaturalPhase {
                index,
                remaining: Duration::from_millis(remaining),
            });
        }
    }
    None
}

/// Outcome of one phase advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseStep {
    pub index: usize,
    /// How long until the next advance
    pub duration: Duration,
    /// Whether this step snapped to the natural phase
    pub aligned: bool,
}

/// Current position in the round-robin sequence
#[derive(Debug, Clone)]
pub struct PhaseCursor {
    index: usize,
    counter: u64,
    last_alignment: DateTime<Utc>,
    alignment_interval: Duration,
}

impl PhaseCursor {
    /// Create a cursor whose first advance is guaranteed to align.
    pub fn new(now: DateTime<Utc>, alignment_interval: Duration) -> Self {
        let back = chrono::Duration::from_std(alignment_interval * 2)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        Self {
            index: 0,
            counter: 0,
            last_alignment: now - back,
            alignment_interval,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of phase advances performed so far
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn last_alignment(&self) -> DateTime<Utc> {
        self.last_alignment
    }

    /// Return to the first slot; used whenever the registry is empty.
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// Move to the next phase.
    ///
    /// `phases` are the durations of the registered modules in round-robin
    /// order and `now` is the skew-adjusted wall time. Returns `None` (and
    /// resets the cursor) when nothing is registered.
    pub fn advance(&mut self, phases: &[Duration], now: DateTime<Utc>) -> Option<PhaseStep> {
        if phases.is_empty() {
            self.reset();
            return None;
        }
        self.counter += 1;
        self.index = (self.index + 1) % phases.len();
        let mut step = PhaseStep {
            index: self.index,
            duration: phases[self.index],
            aligned: false,
        };

        let since_alignment = (now - self.last_alignment).to_std().unwrap_or(Duration::ZERO);
        if since_alignment > self.alignment_interval {
            if let Some(natural) = natural_phase(phases, time_of_day(&now)) {
                self.index = natural.index;
                self.last_alignment = now;
                step = PhaseStep {
                    index: natural.index,
                    duration: natural.remaining,
                    aligned: true,
                };
            }
        }
        Some(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn midnight() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_natural_phase_boundaries() {
        let phases = [ms(100), ms(200), ms(50)];
        assert_eq!(
            natural_phase(&phases, ms(0)),
            Some(NaturalPhase { index: 0, remaining: ms(100) })
        );
        assert_eq!(
            natural_phase(&phases, ms(99)),
            Some(NaturalPhase { index: 0, remaining: ms(1) })
        );
        // Exactly on a boundary belongs to the next phase with its full length.
        assert_eq!(
            natural_phase(&phases, ms(100)),
            Some(NaturalPhase { index: 1, remaining: ms(200) })
        );
        assert_eq!(
            natural_phase(&phases, ms(349)),
            Some(NaturalPhase { index: 2, remaining: ms(1) })
        );
        // 1000 % 350 = 300 -> third phase, 50ms left.
        assert_eq!(
            natural_phase(&phases, ms(1000)),
            Some(NaturalPhase { index: 2, remaining: ms(50) })
        );
    }

    #[test]
    fn test_natural_phase_empty() {
        assert_eq!(natural_phase(&[], ms(10)), None);
        assert_eq!(natural_phase(&[Duration::ZERO], ms(10)), None);
    }

    #[test]
    fn test_first_advance_aligns() {
        let phases = [ms(100), ms(200), ms(50)];
        let now = midnight() + chrono::Duration::milliseconds(120);
        let mut cursor = PhaseCursor::new(now, ms(10_000));

        let step = cursor.advance(&phases, now).unwrap();
        assert!(step.aligned);
        assert_eq!(step.index, 1);
        assert_eq!(step.duration, ms(180));
        assert_eq!(cursor.last_alignment(), now);
        assert_eq!(cursor.counter(), 1);
    }

    #[test]
    fn test_round_robin_between_alignments() {
        let phases = [ms(100), ms(200), ms(50)];
        let start = midnight();
        let mut cursor = PhaseCursor::new(start, ms(10_000));

        let mut now = start;
        let mut observed = Vec::new();
        for _ in 0..6 {
            let step = cursor.advance(&phases, now).unwrap();
            observed.push((step.index, step.duration.as_millis()));
            now = now + chrono::Duration::from_std(step.duration).unwrap();
        }
        assert_eq!(
            observed,
            vec![(0, 100), (1, 200), (2, 50), (0, 100), (1, 200), (2, 50)]
        );
    }

    #[test]
    fn test_realignment_corrects_drift() {
        let phases = [ms(100), ms(200), ms(50)];
        let start = midnight();
        let mut cursor = PhaseCursor::new(start, ms(1_000));
        cursor.advance(&phases, start).unwrap();

        // Each step runs 7ms late; after the interval the cursor snaps back.
        let mut now = start;
        let mut realigned = None;
        for _ in 0..20 {
            now = now + chrono::Duration::milliseconds(107);
            let step = cursor.advance(&phases, now).unwrap();
            if step.aligned {
                realigned = Some((now, step));
                break;
            }
        }
        let (at, step) = realigned.expect("cursor never realigned");
        let natural = natural_phase(&phases, time_of_day(&at)).unwrap();
        assert_eq!(step.index, natural.index);
        assert_eq!(step.duration, natural.remaining);
    }

    #[test]
    fn test_empty_registry_resets() {
        let mut cursor = PhaseCursor::new(midnight(), ms(1_000));
        cursor.advance(&[ms(10), ms(10)], midnight()).unwrap();
        assert!(cursor.advance(&[], midnight()).is_none());
        assert_eq!(cursor.index(), 0);
    }
}
