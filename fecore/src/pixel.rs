/*!
Per-pixel configuration storage.

The pixel matrix is stored double-column major, one bit-plane per
configuration bit, mirroring the chip's shift-register architecture:
streaming a double column to the chip is a plain word copy.
*/

use std::ops::{BitAnd, BitOr};

use crate::bitfield::BitField;
use crate::geometry::{N_COLUMNS, N_DC, N_PLANES, N_ROWS, PIXELS_PER_DC, WORDS_PER_DC};

/// One bit-plane of one double column (672 pixels, 21 words)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoubleColumnBit {
    storage: [u32; WORDS_PER_DC],
}

impl DoubleColumnBit {
    /// All pixels cleared
    pub const fn new() -> Self {
        Self { storage: [0; WORDS_PER_DC] }
    }

    /// Build a plane by repeating one 32-bit pattern over every word
    pub const fn from_pattern(pattern: u32) -> Self {
        Self { storage: [pattern; WORDS_PER_DC] }
    }

    /// Replace the whole plane with a raw bitstream
    pub fn set(&mut self, stream: &[u32; WORDS_PER_DC]) {
        self.storage = *stream;
    }

    /// Broadcast the lowest bit of `val` to every pixel
    pub fn set_all(&mut self, val: u32) {
        let word = if val & 0x1 != 0 { u32::MAX } else { 0 };
        self.storage = [word; WORDS_PER_DC];
    }

    /// Set pixel `n` (shift register position) to the lowest bit of `val`
    ///
    /// # Panics
    /// When `n` is outside the double column.
    pub fn set_pixel(&mut self, n: usize, val: u32) {
        assert!(n < PIXELS_PER_DC, "pixel index {} outside double column", n);
        let (word, bit) = (n / 32, n % 32);
        if val & 0x1 != 0 {
            self.storage[word] |= 1 << bit;
        } else {
            self.storage[word] &= !(1 << bit);
        }
    }

    /// Value of pixel `n`
    ///
    /// # Panics
    /// When `n` is outside the double column.
    pub fn get_pixel(&self, n: usize) -> u32 {
        assert!(n < PIXELS_PER_DC, "pixel index {} outside double column", n);
        (self.storage[n / 32] >> (n % 32)) & 0x1
    }

    /// Raw word `n` of the stream
    pub fn word(&self, n: usize) -> u32 {
        self.storage[n]
    }

    /// Words in transmission order (index 0 first)
    pub fn stream(&self) -> &[u32; WORDS_PER_DC] {
        &self.storage
    }

    /// Number of pixels set
    pub fn count_ones(&self) -> u32 {
        self.storage.iter().map(|w| w.count_ones()).sum()
    }

    /// Advance the pattern by one shift register position. The last pixel
    /// wraps around to position 0.
    pub fn shift_by_one(&mut self) {
        let mut carry = self.storage[WORDS_PER_DC - 1] >> 31;
        for word in self.storage.iter_mut() {
            let out = *word >> 31;
            *word = (*word << 1) | carry;
            carry = out;
        }
    }
}

impl Default for DoubleColumnBit {
    fn default() -> Self {
        Self::new()
    }
}

impl BitOr for DoubleColumnBit {
    type Output = Self;

    fn bitor(mut self, rhs: Self) -> Self {
        for (a, b) in self.storage.iter_mut().zip(rhs.storage.iter()) {
            *a |= b;
        }
        self
    }
}

impl BitAnd for DoubleColumnBit {
    type Output = Self;

    fn bitand(mut self, rhs: Self) -> Self {
        for (a, b) in self.storage.iter_mut().zip(rhs.storage.iter()) {
            *a &= b;
        }
        self
    }
}

/// Named per-pixel attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelAttribute {
    Enable,
    Tdac,
    LCap,
    SCap,
    HitBus,
    Fdac,
}

impl PixelAttribute {
    pub const ALL: [PixelAttribute; 6] = [
        Self::Enable,
        Self::Tdac,
        Self::LCap,
        Self::SCap,
        Self::HitBus,
        Self::Fdac,
    ];

    /// Plane layout: storage offset is the first plane, MSB-first means the
    /// value's most significant bit lives in the first plane.
    pub const fn descriptor(self) -> BitField {
        match self {
            Self::Enable => BitField::new(0, 0, 1, false),
            Self::Tdac => BitField::new(1, 0, 5, true),
            Self::LCap => BitField::new(6, 0, 1, false),
            Self::SCap => BitField::new(7, 0, 1, false),
            Self::HitBus => BitField::new(8, 0, 1, false),
            Self::Fdac => BitField::new(9, 0, 4, false),
        }
    }

    pub const fn bit_width(self) -> u32 {
        self.descriptor().bit_width()
    }

    /// Global plane index of the attribute's first plane
    pub const fn first_plane(self) -> usize {
        self.descriptor().storage_offset()
    }

    /// Global plane indices covered by this attribute
    pub fn planes(self) -> std::ops::Range<usize> {
        self.first_plane()..self.first_plane() + self.bit_width() as usize
    }

    /// Global plane index holding bit `bit` of the value
    pub fn plane_of_bit(self, bit: u32) -> usize {
        let desc = self.descriptor();
        assert!(bit < desc.bit_width(), "bit {} outside {:?}", bit, self);
        let offset = if desc.msb_first() { desc.bit_width() - 1 - bit } else { bit };
        desc.storage_offset() + offset as usize
    }

    /// Name used in chip configuration files
    pub const fn name(self) -> &'static str {
        match self {
            Self::Enable => "Enable",
            Self::Tdac => "TDAC",
            Self::LCap => "LCap",
            Self::SCap => "SCap",
            Self::HitBus => "Hitbus",
            Self::Fdac => "FDAC",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }
}

/// Double column of a 0-based pixel column
pub fn to_dc(col: usize) -> usize {
    col / 2
}

/// Shift register position of a 0-based pixel inside its double column.
///
/// The register snakes up the even column and down the odd one.
pub fn to_bit(col: usize, row: usize) -> usize {
    if col % 2 == 0 {
        N_ROWS + row
    } else {
        N_ROWS - 1 - row
    }
}

/// Inverse of [`to_dc`]/[`to_bit`]: (column, row) of position `n` in
/// double column `dc`
pub fn to_pixel(dc: usize, n: usize) -> (usize, usize) {
    assert!(n < PIXELS_PER_DC, "pixel index {} outside double column", n);
    if n >= N_ROWS {
        (2 * dc, n - N_ROWS)
    } else {
        (2 * dc + 1, N_ROWS - 1 - n)
    }
}

/// Full pixel configuration of one chip: `N_PLANES` x `N_DC` bit-planes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelConfig {
    planes: Vec<DoubleColumnBit>,
}

impl PixelConfig {
    /// All attributes zero
    pub fn new() -> Self {
        Self { planes: vec![DoubleColumnBit::new(); N_PLANES * N_DC] }
    }

    fn check_pixel(col: usize, row: usize) {
        assert!(col < N_COLUMNS, "column {} outside matrix ({} columns)", col, N_COLUMNS);
        assert!(row < N_ROWS, "row {} outside matrix ({} rows)", row, N_ROWS);
    }

    fn check_value(attr: PixelAttribute, value: u32) {
        assert!(
            value <= attr.descriptor().mask(),
            "value {} does not fit {} ({} bits)",
            value,
            attr.name(),
            attr.bit_width()
        );
    }

    /// Bit-plane `plane` of double column `dc`
    pub fn plane(&self, plane: usize, dc: usize) -> &DoubleColumnBit {
        assert!(plane < N_PLANES, "plane {} out of range", plane);
        assert!(dc < N_DC, "double column {} out of range", dc);
        &self.planes[plane * N_DC + dc]
    }

    pub fn plane_mut(&mut self, plane: usize, dc: usize) -> &mut DoubleColumnBit {
        assert!(plane < N_PLANES, "plane {} out of range", plane);
        assert!(dc < N_DC, "double column {} out of range", dc);
        &mut self.planes[plane * N_DC + dc]
    }

    pub fn set_pixel(&mut self, attr: PixelAttribute, col: usize, row: usize, value: u32) {
        Self::check_pixel(col, row);
        Self::check_value(attr, value);
        let (dc, n) = (to_dc(col), to_bit(col, row));
        for bit in 0..attr.bit_width() {
            let plane = attr.plane_of_bit(bit);
            self.plane_mut(plane, dc).set_pixel(n, (value >> bit) & 0x1);
        }
    }

    pub fn get_pixel(&self, attr: PixelAttribute, col: usize, row: usize) -> u32 {
        Self::check_pixel(col, row);
        let (dc, n) = (to_dc(col), to_bit(col, row));
        (0..attr.bit_width())
            .map(|bit| self.plane(attr.plane_of_bit(bit), dc).get_pixel(n) << bit)
            .fold(0, |acc, v| acc | v)
    }

    /// Broadcast `value` to every pixel
    pub fn set_all(&mut self, attr: PixelAttribute, value: u32) {
        Self::check_value(attr, value);
        for bit in 0..attr.bit_width() {
            let plane = attr.plane_of_bit(bit);
            for dc in 0..N_DC {
                self.plane_mut(plane, dc).set_all((value >> bit) & 0x1);
            }
        }
    }

    /// Copy the same bit-plane into every double column of a single-bit
    /// attribute (used for mask stages)
    pub fn set_plane_all(&mut self, plane: usize, pattern: &DoubleColumnBit) {
        for dc in 0..N_DC {
            *self.plane_mut(plane, dc) = *pattern;
        }
    }

    /// Words of bit-plane `plane` for double column `dc`, index 0 first
    pub fn plane_stream(&self, plane: usize, dc: usize) -> &[u32; WORDS_PER_DC] {
        self.plane(plane, dc).stream()
    }

    /// All planes of `attr` for double column `dc`, first plane first
    pub fn stream_out(&self, attr: PixelAttribute, dc: usize) -> Vec<u32> {
        attr.planes()
            .flat_map(|plane| self.plane_stream(plane, dc).iter().copied())
            .collect()
    }

    /// Number of pixels whose `attr` is non-zero
    pub fn count_nonzero(&self, attr: PixelAttribute) -> usize {
        (0..N_DC)
            .map(|dc| {
                attr.planes()
                    .map(|plane| *self.plane(plane, dc))
                    .fold(DoubleColumnBit::new(), |acc, p| acc | p)
                    .count_ones() as usize
            })
            .sum()
    }
}

impl Default for PixelConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addressing_is_a_bijection() {
        for dc in 0..N_DC {
            let mut seen = [false; PIXELS_PER_DC];
            for col in [2 * dc, 2 * dc + 1] {
                for row in 0..N_ROWS {
                    assert_eq!(to_dc(col), dc);
                    let n = to_bit(col, row);
                    assert!(!seen[n], "position {} aliased", n);
                    seen[n] = true;
                    assert_eq!(to_pixel(dc, n), (col, row));
                }
            }
            assert!(seen.iter().all(|&s| s));
        }
    }

    #[test]
    fn test_pixel_roundtrip_all_attributes() {
        let mut cfg = PixelConfig::new();
        let probes = [(0, 0), (1, 0), (0, 335), (79, 335), (42, 17), (43, 300)];
        for attr in PixelAttribute::ALL {
            let max = attr.descriptor().mask();
            for (i, &(col, row)) in probes.iter().enumerate() {
                let value = (i as u32 * 7 + 3) & max;
                cfg.set_pixel(attr, col, row, value);
                assert_eq!(cfg.get_pixel(attr, col, row), value, "{:?} at ({}, {})", attr, col, row);
            }
        }
        // Attributes do not interfere with each other
        assert_eq!(cfg.get_pixel(PixelAttribute::Fdac, 42, 17), (4 * 7 + 3) & 0xF);
    }

    #[test]
    fn test_every_pixel_roundtrip() {
        let mut cfg = PixelConfig::new();
        for col in 0..N_COLUMNS {
            for row in 0..N_ROWS {
                cfg.set_pixel(PixelAttribute::Tdac, col, row, ((col + row) % 32) as u32);
            }
        }
        for col in 0..N_COLUMNS {
            for row in 0..N_ROWS {
                assert_eq!(cfg.get_pixel(PixelAttribute::Tdac, col, row), ((col + row) % 32) as u32);
            }
        }
    }

    #[test]
    fn test_plane_order() {
        let mut cfg = PixelConfig::new();
        // TDAC is MSB-first: bit 0 of the value lives in the last TDAC plane
        cfg.set_pixel(PixelAttribute::Tdac, 0, 0, 1);
        assert_eq!(cfg.plane(5, 0).get_pixel(to_bit(0, 0)), 1);
        assert_eq!(cfg.plane(1, 0).get_pixel(to_bit(0, 0)), 0);

        // FDAC is LSB-first: bit 0 lives in the first FDAC plane
        cfg.set_pixel(PixelAttribute::Fdac, 0, 0, 1);
        assert_eq!(cfg.plane(9, 0).get_pixel(to_bit(0, 0)), 1);
        assert_eq!(cfg.plane(12, 0).get_pixel(to_bit(0, 0)), 0);
    }

    #[test]
    fn test_set_all() {
        let mut cfg = PixelConfig::new();
        cfg.set_all(PixelAttribute::Tdac, 0b10110);
        cfg.set_all(PixelAttribute::Enable, 1);
        assert_eq!(cfg.get_pixel(PixelAttribute::Tdac, 13, 200), 0b10110);
        assert_eq!(cfg.count_nonzero(PixelAttribute::Enable), N_COLUMNS * N_ROWS);
        assert_eq!(cfg.count_nonzero(PixelAttribute::HitBus), 0);

        // Broadcast then override one pixel
        cfg.set_pixel(PixelAttribute::Enable, 5, 5, 0);
        assert_eq!(cfg.count_nonzero(PixelAttribute::Enable), N_COLUMNS * N_ROWS - 1);
    }

    #[test]
    fn test_stream_out() {
        let mut cfg = PixelConfig::new();
        cfg.set_pixel(PixelAttribute::Enable, 0, 0, 1);
        let stream = cfg.stream_out(PixelAttribute::Enable, 0);
        assert_eq!(stream.len(), WORDS_PER_DC);
        // position 336 -> word 10, bit 16
        assert_eq!(stream[10], 1 << 16);
        assert_eq!(cfg.stream_out(PixelAttribute::Tdac, 3).len(), 5 * WORDS_PER_DC);
    }

    #[test]
    fn test_shift_by_one_wraps() {
        let mut plane = DoubleColumnBit::new();
        plane.set_pixel(PIXELS_PER_DC - 1, 1);
        plane.set_pixel(31, 1);
        plane.shift_by_one();
        assert_eq!(plane.get_pixel(0), 1);
        assert_eq!(plane.get_pixel(32), 1);
        assert_eq!(plane.count_ones(), 2);
    }

    #[test]
    #[should_panic(expected = "outside matrix")]
    fn test_out_of_range_column_panics() {
        let mut cfg = PixelConfig::new();
        cfg.set_pixel(PixelAttribute::Enable, N_COLUMNS, 0, 1);
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn test_value_wider_than_attribute_panics() {
        let mut cfg = PixelConfig::new();
        cfg.set_pixel(PixelAttribute::Fdac, 0, 0, 16);
    }
}
