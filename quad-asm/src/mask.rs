//! Result write masks.

use crate::swizzle::{Lane, Swizzle, LANE_COUNT, LANE_NAMES};

bitflags::bitflags! {
    /// The subset of destination lanes written by an instruction.
    pub struct WriteMask: u8 {
        /// Lane X.
        const X = 0b0001;
        /// Lane Y.
        const Y = 0b0010;
        /// Lane Z.
        const Z = 0b0100;
        /// Lane W.
        const W = 0b1000;
    }
}

impl WriteMask {
    /// Single-lane mask for the given lane.
    pub fn lane(lane: Lane) -> Self {
        WriteMask::from_bits_truncate(1 << (lane & 0x03))
    }

    /// Whether the given lane is written.
    pub fn contains_lane(self, lane: Lane) -> bool {
        self.contains(WriteMask::lane(lane))
    }

    /// Mask built from per-lane write flags.
    pub fn from_lanes(active: [bool; LANE_COUNT]) -> Self {
        let mut mask = WriteMask::empty();
        for (lane, &on) in active.iter().enumerate() {
            if on {
                mask |= WriteMask::lane(lane);
            }
        }
        mask
    }

    /// The written lanes in lane order.
    pub fn written_lanes(self) -> Vec<Lane> {
        (0..LANE_COUNT).filter(|&l| self.contains_lane(l)).collect()
    }

    /// Number of written lanes.
    pub fn lane_count(self) -> usize {
        self.bits().count_ones() as usize
    }

    /// Decompose into one `(single-lane mask, broadcast swizzle)` pair per
    /// written lane, in lane order.
    pub fn components(self) -> Vec<(WriteMask, Swizzle)> {
        self.written_lanes()
            .into_iter()
            .map(|l| (WriteMask::lane(l), Swizzle::broadcast(l)))
            .collect()
    }

    /// Remove the flagged lanes from the mask.
    pub fn without_lanes(self, remove: [bool; LANE_COUNT]) -> Self {
        self - WriteMask::from_lanes(remove)
    }
}

impl Default for WriteMask {
    fn default() -> Self {
        WriteMask::all()
    }
}

impl core::fmt::Display for WriteMask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for lane in 0..LANE_COUNT {
            if self.contains_lane(lane) {
                write!(f, "{}", LANE_NAMES[lane])?;
            }
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for WriteMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for WriteMask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        WriteMask::from_bits(bits)
            .ok_or_else(|| serde::de::Error::custom("invalid write mask bits"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_are_in_lane_order() {
        let comps = (WriteMask::Y | WriteMask::W).components();
        assert_eq!(
            comps,
            vec![
                (WriteMask::Y, Swizzle::YYYY),
                (WriteMask::W, Swizzle::WWWW),
            ]
        );
        assert!(WriteMask::empty().components().is_empty());
        assert_eq!(WriteMask::all().components().len(), 4);
    }

    #[test]
    fn from_lanes_round_trips_every_mask() {
        for bits in 0..16u8 {
            let mask = WriteMask::from_bits_truncate(bits);
            let mut active = [false; LANE_COUNT];
            for lane in mask.written_lanes() {
                active[lane] = true;
            }
            assert_eq!(WriteMask::from_lanes(active), mask);
        }
    }

    #[test]
    fn without_lanes_clears_only_requested() {
        let mask = WriteMask::all().without_lanes([true, false, true, false]);
        assert_eq!(mask, WriteMask::Y | WriteMask::W);
        assert_eq!(mask.without_lanes([false; 4]), mask);
    }

    #[test]
    fn display() {
        assert_eq!(WriteMask::all().to_string(), "xyzw");
        assert_eq!((WriteMask::X | WriteMask::Z).to_string(), "xz");
    }
}
