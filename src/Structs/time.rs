// Conversion between station timestamps and absolute time indices.
//
// Stations stamp packets with (seconds since epoch, block within second).
// One time index is one subband sample: the station clock divided by 1024.
// With a 200 MHz clock a second is not a whole number of samples, so odd
// seconds start half a sample late; the rounding below matches that.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock-to-sample divisor of the station polyphase filter.
const SAMPLES_DIVISOR: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleClock {
    clock_hz: u64,
}

impl SampleClock {
    pub const MHZ_200: SampleClock = SampleClock {
        clock_hz: 200_000_000,
    };
    pub const MHZ_160: SampleClock = SampleClock {
        clock_hz: 160_000_000,
    };

    pub fn new(clock_hz: u64) -> Self {
        Self { clock_hz }
    }

    pub fn clock_hz(&self) -> u64 {
        self.clock_hz
    }

    /// Samples per second.
    pub fn sample_rate(&self) -> f64 {
        self.clock_hz as f64 / SAMPLES_DIVISOR as f64
    }

    /// Absolute time index of `block` samples into second `seconds`.
    pub fn time_index(&self, seconds: u64, block: u64) -> u64 {
        ((seconds as u128 * self.clock_hz as u128 + SAMPLES_DIVISOR as u128 / 2)
            / SAMPLES_DIVISOR as u128) as u64
            + block
    }

    /// Inverse of [`time_index`](Self::time_index).
    pub fn split(&self, time_index: u64) -> (u64, u64) {
        let mut seconds =
            (time_index as u128 * SAMPLES_DIVISOR as u128 / self.clock_hz as u128) as u64;
        // Rounding in time_index can put the start of a second one sample later.
        while seconds > 0 && self.time_index(seconds, 0) > time_index {
            seconds -= 1;
        }
        while self.time_index(seconds + 1, 0) <= time_index {
            seconds += 1;
        }
        (seconds, time_index - self.time_index(seconds, 0))
    }

    /// Time index of a wall-clock instant.
    pub fn time_index_at(&self, instant: SystemTime) -> u64 {
        let since_epoch = instant.duration_since(UNIX_EPOCH).unwrap_or_default();
        (since_epoch.as_nanos() * self.clock_hz as u128
            / (SAMPLES_DIVISOR as u128 * 1_000_000_000)) as u64
    }

    /// Wall-clock span of `samples` time indices.
    pub fn duration_of(&self, samples: u64) -> Duration {
        let nanos =
            samples as u128 * SAMPLES_DIVISOR as u128 * 1_000_000_000 / self.clock_hz as u128;
        Duration::from_nanos(nanos as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_seconds_round_at_200mhz() {
        let clock = SampleClock::MHZ_200;
        // 195312.5 samples per second
        assert_eq!(clock.time_index(0, 0), 0);
        assert_eq!(clock.time_index(1, 0), 195_313);
        assert_eq!(clock.time_index(2, 0), 390_625);
        assert_eq!(clock.time_index(2, 10), 390_635);
    }

    #[test]
    fn split_inverts_time_index() {
        let clock = SampleClock::MHZ_200;
        for &(s, b) in &[(0u64, 0u64), (1, 0), (1, 195_311), (1_700_000_001, 42)] {
            assert_eq!(clock.split(clock.time_index(s, b)), (s, b));
        }
    }

    #[test]
    fn whole_seconds_at_160mhz() {
        let clock = SampleClock::MHZ_160;
        assert_eq!(clock.sample_rate(), 156_250.0);
        assert_eq!(clock.time_index(3, 0), 468_750);
        assert_eq!(clock.duration_of(156_250), Duration::from_secs(1));
    }
}
