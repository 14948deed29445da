/*!
Register field descriptors and the FE-I4 global register file.

Every named global register field is described by a [`BitField`] looked up
through [`FieldId::descriptor`]. Encoding code takes the descriptor by value,
so a single routine serves every field of the register file.
*/

use std::collections::BTreeMap;

use num_traits::PrimInt;

use crate::error::{FeError, Result};
use crate::geometry::N_GLOBAL_REGISTERS;

/// Width of one global register in bits
pub const REGISTER_BITS: u32 = 16;

const MSB: bool = true;
const LSB: bool = false;

/// Describes one named field inside a register file (or one multi-plane
/// pixel attribute).
///
/// `mask` is the unshifted value mask. `msb_first` places the value's most
/// significant bit at the field's lowest position (the first bit shifted
/// into the chip), i.e. the field is stored bit-reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    storage_offset: usize,
    bit_offset: u32,
    bit_width: u32,
    mask: u32,
    msb_first: bool,
}

impl BitField {
    /// Describe a field of `bit_width` bits starting at `bit_offset` of
    /// storage word `storage_offset`.
    ///
    /// # Panics
    /// On a zero width or a field that does not fit a 32-bit word.
    pub const fn new(storage_offset: usize, bit_offset: u32, bit_width: u32, msb_first: bool) -> Self {
        assert!(bit_width > 0, "bit field must be at least one bit wide");
        assert!(bit_offset + bit_width <= 32, "bit field exceeds storage word");
        let mask = if bit_width == 32 { u32::MAX } else { (1u32 << bit_width) - 1 };
        Self { storage_offset, bit_offset, bit_width, mask, msb_first }
    }

    /// Describe a field from an explicit mask.
    ///
    /// # Panics
    /// When `mask` is not exactly `bit_width` contiguous low bits.
    pub const fn with_mask(
        storage_offset: usize,
        bit_offset: u32,
        bit_width: u32,
        mask: u32,
        msb_first: bool,
    ) -> Self {
        let field = Self::new(storage_offset, bit_offset, bit_width, msb_first);
        assert!(mask.count_ones() == bit_width, "mask does not match bit width");
        assert!(mask == field.mask, "mask must cover the low bit_width bits");
        field
    }

    pub const fn storage_offset(&self) -> usize {
        self.storage_offset
    }

    pub const fn bit_offset(&self) -> u32 {
        self.bit_offset
    }

    pub const fn bit_width(&self) -> u32 {
        self.bit_width
    }

    pub const fn mask(&self) -> u32 {
        self.mask
    }

    pub const fn msb_first(&self) -> bool {
        self.msb_first
    }

    /// Mask of the field's bits within its storage word
    pub const fn word_mask(&self) -> u32 {
        self.mask << self.bit_offset
    }

    /// Position `value` inside a storage word.
    ///
    /// # Panics
    /// When `value` does not fit the field.
    pub fn encode(&self, value: u32) -> u32 {
        assert!(
            value <= self.mask,
            "value 0x{:x} does not fit a {}-bit field",
            value,
            self.bit_width
        );
        let ordered = if self.msb_first { reverse_bits(value, self.bit_width) } else { value };
        ordered << self.bit_offset
    }

    /// Extract the field's value from a storage word
    pub fn decode(&self, word: u32) -> u32 {
        let raw = (word >> self.bit_offset) & self.mask;
        if self.msb_first { reverse_bits(raw, self.bit_width) } else { raw }
    }

    /// Replace the field inside `word`, leaving all other bits untouched
    pub fn insert(&self, word: u32, value: u32) -> u32 {
        (word & !self.word_mask()) | self.encode(value)
    }
}

/// Reverse the low `width` bits of `value`
pub fn reverse_bits<T: PrimInt>(value: T, width: u32) -> T {
    let width = width as usize;
    let mut out = T::zero();
    for i in 0..width {
        if (value >> i) & T::one() == T::one() {
            out = out | (T::one() << (width - 1 - i));
        }
    }
    out
}

macro_rules! field_table {
    ($( $id:ident => $name:literal, $reg:expr, $offset:expr, $width:expr, $order:expr; )*) => {
        /// Named fields of the FE-I4 global register file
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum FieldId {
            $($id,)*
        }

        impl FieldId {
            /// Every field, in register order
            pub const ALL: &'static [FieldId] = &[$(FieldId::$id,)*];

            /// Descriptor table lookup
            pub const fn descriptor(self) -> BitField {
                match self {
                    $(FieldId::$id => BitField::new($reg, $offset, $width, $order),)*
                }
            }

            /// Name used in chip configuration files
            pub const fn name(self) -> &'static str {
                match self {
                    $(FieldId::$id => $name,)*
                }
            }
        }
    };
}

field_table! {
    Sme              => "SME",               1,  8,  1, LSB;
    EventLimit       => "EventLimit",        1,  0,  8, MSB;
    TrigCount        => "Trig_Count",        2, 12,  4, LSB;
    ConfAddrEnable   => "Conf_AddrEnable",   2, 11,  1, LSB;
    ErrorMask0       => "ErrorMask_0",       3,  0, 16, LSB;
    ErrorMask1       => "ErrorMask_1",       4,  0, 16, LSB;
    PrmpVbpRight     => "PrmpVbp_R",         5,  8,  8, MSB;
    BufVgOpAmp       => "BufVgOpAmp",        5,  0,  8, MSB;
    PrmpVbp          => "PrmpVbp",           6,  0,  8, MSB;
    TdacVbp          => "TDACVbp",           7,  8,  8, MSB;
    DisVbn           => "DisVbn",            7,  0,  8, MSB;
    Amp2Vbn          => "Amp2Vbn",           8,  8,  8, MSB;
    Amp2VbpFol       => "Amp2VbpFol",        8,  0,  8, MSB;
    Amp2Vbp          => "Amp2Vbp",           9,  0,  8, MSB;
    FdacVbn          => "FDACVbn",          10,  8,  8, MSB;
    Amp2Vbpff        => "Amp2Vbpff",        10,  0,  8, MSB;
    PrmpVbnFol       => "PrmpVbnFol",       11,  8,  8, MSB;
    PrmpVbpLeft      => "PrmpVbp_L",        11,  0,  8, MSB;
    PrmpVbpf         => "PrmpVbpf",         12,  8,  8, MSB;
    PrmpVbnLcc       => "PrmpVbnLCC",       12,  0,  8, MSB;
    S1               => "S1",               13, 15,  1, LSB;
    S0               => "S0",               13, 14,  1, LSB;
    PixelLatchStrobe => "Pixel_latch_strobe", 13, 1, 13, MSB;
    LvdsDrvIref      => "LVDSDrvIref",      14,  8,  8, MSB;
    GadcCompBias     => "GADCCompBias",     14,  0,  8, MSB;
    PllIbias         => "PllIbias",         15,  8,  8, MSB;
    LvdsDrvVos       => "LVDSDrvVos",       15,  0,  8, MSB;
    TempSensIbias    => "TempSensIbias",    16,  8,  8, MSB;
    PllIcp           => "PllIcp",           16,  0,  8, MSB;
    PlsrIdacRamp     => "PlsrIDACRamp",     17,  0,  8, MSB;
    VrefDigTune      => "VrefDigTune",      18,  8,  8, MSB;
    PlsrVgOpAmp      => "PlsrVgOpAmp",      18,  0,  8, MSB;
    PlsrDacBias      => "PlsrDACbias",      19,  8,  8, MSB;
    VrefAnTune       => "VrefAnTune",       19,  0,  8, MSB;
    VthinCoarse      => "Vthin_Coarse",     20,  8,  8, MSB;
    VthinFine        => "Vthin_Fine",       20,  0,  8, MSB;
    HitLd            => "HitLD",            21, 12,  1, LSB;
    Djo              => "DJO",              21, 11,  1, LSB;
    DigHitInSel      => "DigHitIn_Sel",     21, 10,  1, LSB;
    PlsrDac          => "PlsrDAC",          21,  0, 10, MSB;
    ColprMode        => "Colpr_Mode",       22,  8,  2, MSB;
    ColprAddr        => "Colpr_Addr",       22,  2,  6, MSB;
    DisableColCnfg0  => "DisableColCnfg0",  23,  0, 16, LSB;
    DisableColCnfg1  => "DisableColCnfg1",  24,  0, 16, LSB;
    TrigLat          => "Trig_Lat",         25,  8,  8, MSB;
    DisableColCnfg2  => "DisableColCnfg2",  25,  0,  8, LSB;
    CalPulseWidth    => "CalPulseWidth",    26,  3,  8, MSB;
    StopModeCnfg     => "StopModeCnfg",     26,  2,  1, LSB;
    HitDiscCnfg      => "HitDiscCnfg",      26,  0,  2, MSB;
    PllEnable        => "PLL_Enable",       27, 15,  1, LSB;
    EfuseSense       => "EFUSE_Sense",      27, 14,  1, LSB;
    StopClk          => "Stop_Clk",         27, 13,  1, LSB;
    ReadErrorReq     => "ReadErrorReq",     27, 12,  1, LSB;
    GadcEnable       => "GADC_Enable",      27, 10,  1, LSB;
    SrRead           => "SR_Read",          27,  9,  1, LSB;
    GateHitOr        => "GateHitOr",        27,  6,  1, LSB;
    CalEnable        => "CalEn",            27,  5,  1, LSB;
    SrClear          => "SR_Clr",           27,  4,  1, LSB;
    LatchEnable      => "Latch_En",         27,  3,  1, LSB;
    SrClock          => "SR_Clock",         27,  2,  1, LSB;
    LvdsDrvSet06     => "LVDSDrvSet06",     28, 15,  1, LSB;
    LvdsDrvEnable    => "LVDSDrvEn",        28,  9,  1, LSB;
    LvdsDrvSet30     => "LVDSDrvSet30",     28,  8,  1, LSB;
    LvdsDrvSet12     => "LVDSDrvSet12",     28,  7,  1, LSB;
    EmptyRecordCnfg  => "EmptyRecordCnfg",  29,  2,  8, MSB;
    PlsrRiseUpTau    => "PlsrRiseUpTau",    31, 13,  3, MSB;
    PlsrPwr          => "PlsrPwr",          31, 12,  1, LSB;
    PlsrDelay        => "PlsrDelay",        31,  6,  6, MSB;
    ExtDigCalSw      => "ExtDigCalSW",      31,  5,  1, LSB;
    ExtAnaCalSw      => "ExtAnaCalSW",      31,  4,  1, LSB;
    GadcSel          => "GADCSel",          31,  0,  3, MSB;
    ChipSn           => "Chip_SN",          35,  0, 16, LSB;
}

impl FieldId {
    /// Look a field up by its configuration file name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// Register address holding this field
    pub const fn address(self) -> usize {
        self.descriptor().storage_offset()
    }
}

/// The 36 sixteen-bit global registers of one FE-I4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRegisters {
    regs: [u16; N_GLOBAL_REGISTERS],
}

impl GlobalRegisters {
    /// All registers cleared
    pub fn new() -> Self {
        Self { regs: [0; N_GLOBAL_REGISTERS] }
    }

    /// Power-up defaults used before a chip configuration file is loaded
    pub fn fei4_defaults() -> Self {
        let mut cfg = Self::new();
        let defaults: &[(FieldId, u32)] = &[
            (FieldId::TrigCount, 1),
            (FieldId::ConfAddrEnable, 1),
            (FieldId::ErrorMask0, 0x4600),
            (FieldId::ErrorMask1, 0x0040),
            (FieldId::PrmpVbpRight, 43),
            (FieldId::BufVgOpAmp, 160),
            (FieldId::PrmpVbp, 43),
            (FieldId::TdacVbp, 150),
            (FieldId::DisVbn, 40),
            (FieldId::Amp2Vbn, 79),
            (FieldId::Amp2VbpFol, 26),
            (FieldId::Amp2Vbp, 85),
            (FieldId::FdacVbn, 30),
            (FieldId::Amp2Vbpff, 50),
            (FieldId::PrmpVbnFol, 106),
            (FieldId::PrmpVbpLeft, 43),
            (FieldId::PrmpVbpf, 100),
            (FieldId::LvdsDrvIref, 171),
            (FieldId::GadcCompBias, 100),
            (FieldId::PllIbias, 88),
            (FieldId::LvdsDrvVos, 105),
            (FieldId::PllIcp, 28),
            (FieldId::PlsrIdacRamp, 213),
            (FieldId::VrefDigTune, 110),
            (FieldId::PlsrVgOpAmp, 255),
            (FieldId::PlsrDacBias, 96),
            (FieldId::VrefAnTune, 50),
            (FieldId::VthinFine, 150),
            (FieldId::PlsrDac, 54),
            (FieldId::TrigLat, 210),
            (FieldId::CalPulseWidth, 10),
            (FieldId::PllEnable, 1),
            (FieldId::LvdsDrvEnable, 1),
            (FieldId::LvdsDrvSet30, 1),
            (FieldId::LvdsDrvSet12, 1),
            (FieldId::PlsrRiseUpTau, 7),
            (FieldId::PlsrPwr, 1),
            (FieldId::PlsrDelay, 2),
        ];
        for &(field, value) in defaults {
            cfg.set(field, value);
        }
        cfg
    }

    /// Read a field
    pub fn get(&self, field: FieldId) -> u32 {
        let desc = field.descriptor();
        desc.decode(self.regs[desc.storage_offset()] as u32)
    }

    /// Write a field, leaving the rest of its register untouched
    ///
    /// # Panics
    /// When `value` is wider than the field.
    pub fn set(&mut self, field: FieldId, value: u32) {
        let desc = field.descriptor();
        let addr = desc.storage_offset();
        self.regs[addr] = desc.insert(self.regs[addr] as u32, value) as u16;
    }

    /// Full register word at `addr`
    pub fn register(&self, addr: usize) -> u16 {
        assert!(addr < N_GLOBAL_REGISTERS, "global register {} out of range", addr);
        self.regs[addr]
    }

    pub fn set_register(&mut self, addr: usize, value: u16) {
        assert!(addr < N_GLOBAL_REGISTERS, "global register {} out of range", addr);
        self.regs[addr] = value;
    }

    pub fn registers(&self) -> &[u16; N_GLOBAL_REGISTERS] {
        &self.regs
    }

    /// Registers that carry at least one named field, ascending
    pub fn used_addresses() -> Vec<usize> {
        let mut addrs: Vec<usize> = FieldId::ALL.iter().map(|f| f.address()).collect();
        addrs.sort_unstable();
        addrs.dedup();
        addrs
    }

    /// All fields by configuration file name
    pub fn to_named(&self) -> BTreeMap<String, u32> {
        FieldId::ALL
            .iter()
            .map(|&f| (f.name().to_string(), self.get(f)))
            .collect()
    }

    /// Apply fields by configuration file name. Fields not named keep
    /// their current value.
    pub fn apply_named(&mut self, values: &BTreeMap<String, u32>) -> Result<()> {
        for (name, &value) in values {
            let field = FieldId::from_name(name)
                .ok_or_else(|| FeError::config(format!("unknown global register field '{}'", name)))?;
            if value > field.descriptor().mask() {
                return Err(FeError::config(format!(
                    "value {} does not fit field '{}' ({} bits)",
                    value,
                    name,
                    field.descriptor().bit_width()
                )));
            }
            self.set(field, value);
        }
        Ok(())
    }
}

impl Default for GlobalRegisters {
    fn default() -> Self {
        Self::fei4_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_masks() {
        for &field in FieldId::ALL {
            let desc = field.descriptor();
            assert_eq!(desc.mask().count_ones(), desc.bit_width(), "{}", field.name());
            assert!(desc.bit_offset() + desc.bit_width() <= REGISTER_BITS, "{}", field.name());
            assert!(desc.storage_offset() < N_GLOBAL_REGISTERS, "{}", field.name());
        }
    }

    #[test]
    fn test_fields_never_overlap() {
        let mut used = [0u32; N_GLOBAL_REGISTERS];
        for &field in FieldId::ALL {
            let desc = field.descriptor();
            let addr = desc.storage_offset();
            assert_eq!(used[addr] & desc.word_mask(), 0, "{} overlaps", field.name());
            used[addr] |= desc.word_mask();
        }
    }

    #[test]
    fn test_names_are_unique() {
        for &field in FieldId::ALL {
            assert_eq!(FieldId::from_name(field.name()), Some(field));
        }
    }

    #[test]
    fn test_reversed_field_encoding() {
        let mut cfg = GlobalRegisters::new();
        // 6-bit MSB-first field at bit 2: value 1 lands on bit 7
        cfg.set(FieldId::ColprAddr, 1);
        assert_eq!(cfg.register(22), 0x0080);
        assert_eq!(cfg.get(FieldId::ColprAddr), 1);

        cfg.set(FieldId::ColprMode, 0x3);
        assert_eq!(cfg.register(22), 0x0380);
        assert_eq!(cfg.get(FieldId::ColprAddr), 1);
    }

    #[test]
    fn test_set_preserves_neighbours() {
        let mut cfg = GlobalRegisters::new();
        cfg.set(FieldId::VthinCoarse, 0xAB);
        cfg.set(FieldId::VthinFine, 0x12);
        assert_eq!(cfg.get(FieldId::VthinCoarse), 0xAB);
        assert_eq!(cfg.get(FieldId::VthinFine), 0x12);
        cfg.set(FieldId::VthinFine, 0);
        assert_eq!(cfg.get(FieldId::VthinCoarse), 0xAB);
    }

    #[test]
    fn test_named_roundtrip() {
        let cfg = GlobalRegisters::fei4_defaults();
        let named = cfg.to_named();
        let mut restored = GlobalRegisters::new();
        restored.apply_named(&named).unwrap();
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_apply_named_rejects_unknown_and_wide_values() {
        let mut cfg = GlobalRegisters::new();
        let mut values = BTreeMap::new();
        values.insert("NotAField".to_string(), 1);
        assert!(cfg.apply_named(&values).is_err());

        let mut values = BTreeMap::new();
        values.insert("Trig_Count".to_string(), 16);
        assert!(cfg.apply_named(&values).is_err());
    }

    #[test]
    fn test_reverse_bits() {
        assert_eq!(reverse_bits(0b00001u32, 5), 0b10000);
        assert_eq!(reverse_bits(0b10110u32, 5), 0b01101);
        assert_eq!(reverse_bits(0x1u16, 16), 0x8000);
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn test_value_wider_than_field_panics() {
        let mut cfg = GlobalRegisters::new();
        cfg.set(FieldId::TrigCount, 0x10);
    }

    #[test]
    #[should_panic(expected = "mask does not match bit width")]
    fn test_mask_mismatch_panics() {
        let _ = BitField::with_mask(0, 0, 4, 0x7, true);
    }

    #[test]
    #[should_panic(expected = "at least one bit")]
    fn test_zero_width_panics() {
        let _ = BitField::new(0, 0, 0, true);
    }
}
