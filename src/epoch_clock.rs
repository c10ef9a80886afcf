/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Deterministic quantization of wall-clock time into [epochs](EpochIndex).
//!
//! The clock has no internal counter: every call derives the index from the wall clock again, so it can be
//! queried on every tick without drift, and independently deployed keepers converge on the same index as
//! long as their clocks are synchronized to within a small fraction of the epoch duration.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::types::data_types::EpochIndex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpochClock {
    epoch_duration_ms: u64,
}

impl EpochClock {
    /// Create a clock with epochs of `epoch_duration`.
    ///
    /// # Errors
    ///
    /// A zero (or sub-millisecond) duration is a fatal configuration error.
    pub fn new(epoch_duration: Duration) -> Result<Self, EpochClockError> {
        let epoch_duration_ms = u64::try_from(epoch_duration.as_millis())
            .map_err(|_| EpochClockError::DurationTooLarge)?;
        if epoch_duration_ms == 0 {
            return Err(EpochClockError::ZeroDuration);
        }
        Ok(Self { epoch_duration_ms })
    }

    pub fn epoch_duration(&self) -> Duration {
        Duration::from_millis(self.epoch_duration_ms)
    }

    /// `floor(now_ms / epoch_duration_ms)`. Instants before the Unix epoch map to epoch 0.
    pub fn epoch_index_at(&self, now: SystemTime) -> EpochIndex {
        let now_ms = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        EpochIndex::new((now_ms / self.epoch_duration_ms as u128) as u64)
    }

    /// The epoch index of the current wall-clock time.
    pub fn epoch_index(&self) -> EpochIndex {
        self.epoch_index_at(SystemTime::now())
    }

    /// The wall-clock instant at which `epoch` begins.
    pub fn epoch_start(&self, epoch: EpochIndex) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(epoch.int().saturating_mul(self.epoch_duration_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EpochClockError {
    #[error("epoch duration must be at least one millisecond")]
    ZeroDuration,

    #[error("epoch duration does not fit in 64 bits of milliseconds")]
    DurationTooLarge,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_ms(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    #[test]
    fn zero_duration_is_rejected() {
        assert_eq!(
            EpochClock::new(Duration::ZERO),
            Err(EpochClockError::ZeroDuration)
        );
        assert_eq!(
            EpochClock::new(Duration::from_micros(500)),
            Err(EpochClockError::ZeroDuration)
        );
    }

    #[test]
    fn index_is_floor_of_elapsed_epochs() {
        let clock = EpochClock::new(Duration::from_secs(60)).unwrap();
        assert_eq!(clock.epoch_index_at(at_ms(0)), EpochIndex::new(0));
        assert_eq!(clock.epoch_index_at(at_ms(59_999)), EpochIndex::new(0));
        assert_eq!(clock.epoch_index_at(at_ms(60_000)), EpochIndex::new(1));
        assert_eq!(clock.epoch_index_at(at_ms(3_600_000)), EpochIndex::new(60));
        assert_eq!(clock.epoch_start(EpochIndex::new(60)), at_ms(3_600_000));
    }

    #[test]
    fn index_is_monotonic_and_ignores_jitter() {
        let clock = EpochClock::new(Duration::from_millis(1_000)).unwrap();
        let mut previous = EpochIndex::new(0);
        for ms in (0..10_000).step_by(37) {
            let current = clock.epoch_index_at(at_ms(ms));
            assert!(current >= previous);
            previous = current;
        }

        let base = at_ms(42_000);
        for jitter in [0, 1, 250, 999] {
            assert_eq!(
                clock.epoch_index_at(base + Duration::from_millis(jitter)),
                EpochIndex::new(42)
            );
        }
    }

    #[test]
    fn before_unix_epoch_is_epoch_zero() {
        let clock = EpochClock::new(Duration::from_secs(1)).unwrap();
        let before = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(clock.epoch_index_at(before), EpochIndex::new(0));
    }
}
