use std::ops::Range;

/// Resources a job needs while it is active.
///
/// Two footprints conflict when one overlaps the other and it does not
/// declare itself compatible with it; the check is made in both directions.
pub trait Footprint {
    fn overlaps(&self, other: &Self) -> bool;

    /// Overlapping footprints that may still be active together.
    fn compatible_with(&self, _other: &Self) -> bool {
        false
    }
}

pub(crate) fn conflicts<F: Footprint>(a: &F, b: &F) -> bool {
    (a.overlaps(b) && !a.compatible_with(b)) || (b.overlaps(a) && !b.compatible_with(a))
}

/// A channel range of one station.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StationFootprint {
    pub station: String,
    pub channels: Range<u32>,
}

impl StationFootprint {
    pub fn new(station: impl Into<String>, channels: Range<u32>) -> Self {
        Self {
            station: station.into(),
            channels,
        }
    }
}

impl Footprint for StationFootprint {
    fn overlaps(&self, other: &Self) -> bool {
        self.station == other.station
            && !self.channels.is_empty()
            && !other.channels.is_empty()
            && self.channels.start < other.channels.end
            && other.channels.start < self.channels.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_ranges_on_one_station() {
        let a = StationFootprint::new("CS001", 0..10);
        assert!(conflicts(&a, &StationFootprint::new("CS001", 5..15)));
        assert!(!conflicts(&a, &StationFootprint::new("CS001", 10..20)));
        assert!(!conflicts(&a, &StationFootprint::new("CS002", 0..10)));
        assert!(!conflicts(&a, &StationFootprint::new("CS001", 3..3)));
        assert!(!conflicts(&StationFootprint::new("CS001", 3..3), &a));
    }

    struct Shared(u32);

    impl Footprint for Shared {
        fn overlaps(&self, other: &Self) -> bool {
            self.0 == other.0
        }

        fn compatible_with(&self, _other: &Self) -> bool {
            true
        }
    }

    #[test]
    fn compatible_overlap_does_not_conflict() {
        assert!(!conflicts(&Shared(1), &Shared(1)));
    }
}
