/*!
Mask stages for shift-and-mask pixel scans.

Stage `k` of an `n`-stage scan enables every `n`-th shift register position
starting at `k`. The stages are disjoint and their union is the whole
double column.
*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FeError, Result};
use crate::pixel::DoubleColumnBit;

pub const MASK_1: u32 = 0xFFFF_FFFF;
pub const MASK_2: u32 = 0x5555_5555;
pub const MASK_4: u32 = 0x1111_1111;
pub const MASK_8: u32 = 0x0101_0101;
pub const MASK_16: u32 = 0x0001_0001;
pub const MASK_32: u32 = 0x0000_0001;
pub const MASK_NONE: u32 = 0x0000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskStage {
    Mask1,
    Mask2,
    Mask4,
    Mask8,
    Mask16,
    Mask32,
    /// Nothing enabled
    None,
}

impl MaskStage {
    pub const ALL: [MaskStage; 7] = [
        Self::Mask1,
        Self::Mask2,
        Self::Mask4,
        Self::Mask8,
        Self::Mask16,
        Self::Mask32,
        Self::None,
    ];

    /// 32-bit pattern of stage 0
    pub const fn pattern(self) -> u32 {
        match self {
            Self::Mask1 => MASK_1,
            Self::Mask2 => MASK_2,
            Self::Mask4 => MASK_4,
            Self::Mask8 => MASK_8,
            Self::Mask16 => MASK_16,
            Self::Mask32 => MASK_32,
            Self::None => MASK_NONE,
        }
    }

    /// Nominal number of stages; zero for [`MaskStage::None`]
    pub const fn stage_count(self) -> u32 {
        match self {
            Self::Mask1 => 1,
            Self::Mask2 => 2,
            Self::Mask4 => 4,
            Self::Mask8 => 8,
            Self::Mask16 => 16,
            Self::Mask32 => 32,
            Self::None => 0,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Mask1 => "mask1",
            Self::Mask2 => "mask2",
            Self::Mask4 => "mask4",
            Self::Mask8 => "mask8",
            Self::Mask16 => "mask16",
            Self::Mask32 => "mask32",
            Self::None => "none",
        }
    }
}

impl fmt::Display for MaskStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MaskStage {
    type Err = FeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| FeError::config(format!("unknown mask stage '{}'", s)))
    }
}

/// Smallest rotation that maps `pattern` onto itself
fn rotation_period(pattern: u32) -> u32 {
    (1..32).find(|&p| pattern.rotate_left(p) == pattern).unwrap_or(32)
}

/// Generates the enable masks of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskGenerator {
    pattern: u32,
    stages: u32,
}

impl MaskGenerator {
    pub fn new(stage: MaskStage) -> Self {
        Self::from_raw(stage.pattern())
    }

    /// Custom 32-bit pattern, repeated over the double column. The number
    /// of stages is the number of distinct one-position shifts of the
    /// pattern.
    pub fn from_raw(pattern: u32) -> Self {
        Self { pattern, stages: rotation_period(pattern) }
    }

    pub fn pattern(&self) -> u32 {
        self.pattern
    }

    /// Passes needed to visit every shift of the pattern
    pub fn stage_count(&self) -> u32 {
        self.stages
    }

    /// Mask of stage `k`
    ///
    /// # Panics
    /// When `k` is not below [`stage_count`](Self::stage_count).
    pub fn stage(&self, k: u32) -> DoubleColumnBit {
        assert!(k < self.stages, "mask stage {} out of range ({} stages)", k, self.stages);
        DoubleColumnBit::from_pattern(self.pattern.rotate_left(k))
    }

    /// Advance `mask` to the next stage in place
    pub fn shift_by_one(mask: &mut DoubleColumnBit) {
        mask.shift_by_one();
    }

    pub fn iter(&self) -> impl Iterator<Item = DoubleColumnBit> + '_ {
        (0..self.stages).map(move |k| self.stage(k))
    }
}

impl From<MaskStage> for MaskGenerator {
    fn from(stage: MaskStage) -> Self {
        Self::new(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PIXELS_PER_DC;

    #[test]
    fn test_stages_partition_the_double_column() {
        for stage in [
            MaskStage::Mask1,
            MaskStage::Mask2,
            MaskStage::Mask4,
            MaskStage::Mask8,
            MaskStage::Mask16,
            MaskStage::Mask32,
        ] {
            let gen = MaskGenerator::new(stage);
            assert_eq!(gen.stage_count(), stage.stage_count());

            let masks: Vec<_> = gen.iter().collect();
            let union = masks.iter().fold(DoubleColumnBit::new(), |acc, m| acc | *m);
            assert_eq!(union, DoubleColumnBit::from_pattern(u32::MAX), "{}", stage);

            for i in 0..masks.len() {
                for j in (i + 1)..masks.len() {
                    assert_eq!((masks[i] & masks[j]).count_ones(), 0, "{} {} {}", stage, i, j);
                }
            }
        }
    }

    #[test]
    fn test_stage_spacing() {
        let gen = MaskGenerator::new(MaskStage::Mask8);
        let mask = gen.stage(3);
        assert_eq!(mask.count_ones() as usize, PIXELS_PER_DC / 8);
        for n in 0..PIXELS_PER_DC {
            assert_eq!(mask.get_pixel(n), u32::from(n % 8 == 3), "pixel {}", n);
        }
    }

    #[test]
    fn test_none_disables_everything() {
        let gen = MaskGenerator::new(MaskStage::None);
        assert_eq!(MaskStage::None.stage_count(), 0);
        assert_eq!(gen.stage_count(), 1);
        assert_eq!(gen.stage(0), DoubleColumnBit::new());
    }

    #[test]
    fn test_shift_matches_next_stage() {
        let gen = MaskGenerator::new(MaskStage::Mask16);
        let mut mask = gen.stage(0);
        for k in 1..16 {
            MaskGenerator::shift_by_one(&mut mask);
            assert_eq!(mask, gen.stage(k));
        }
        MaskGenerator::shift_by_one(&mut mask);
        assert_eq!(mask, gen.stage(0));
    }

    #[test]
    fn test_raw_pattern() {
        let gen = MaskGenerator::from_raw(0x0000_0003);
        assert_eq!(gen.stage_count(), 32);
        assert_eq!(gen.stage(1).word(0), 0x6);
        assert_eq!(MaskGenerator::from_raw(0x3333_3333).stage_count(), 4);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("mask8".parse::<MaskStage>().unwrap(), MaskStage::Mask8);
        assert_eq!("none".parse::<MaskStage>().unwrap(), MaskStage::None);
        assert!("mask3".parse::<MaskStage>().is_err());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_stage_bounds() {
        let _ = MaskGenerator::new(MaskStage::Mask4).stage(4);
    }
}
