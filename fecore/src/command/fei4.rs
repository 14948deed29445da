/*!
FE-I4 command words (parallel-register protocol).

Commands are word aligned in the TX FIFO: a header word carrying the chip
address, optionally followed by payload words.
*/

use crate::geometry::WORDS_PER_DC;

/// Level-1 trigger
pub const LV1: u32 = 0x0000_001D;
/// Bunch counter reset
pub const BCR: u32 = 0x0000_0161;
/// Event counter reset
pub const ECR: u32 = 0x0000_0162;
/// Calibration pulse
pub const CAL: u32 = 0x0000_0164;

/// Slow command headers (chip bits and argument OR-ed in)
pub const RD_REGISTER: u32 = 0x005A_0400;
pub const WR_REGISTER: u32 = 0x005A_0800;
pub const WR_FRONT_END: u32 = 0x005A_1000;
pub const GLOBAL_RESET: u32 = 0x005A_2000;
pub const GLOBAL_PULSE: u32 = 0x005A_2400;
pub const RUN_MODE: u32 = 0x005A_2800;

/// Mask selecting the slow command type from a header word
pub const SLOW_CMD_MASK: u32 = 0xFFFF_FC00;

/// Run mode argument bits
pub const RUN_MODE_RUN: u32 = 0x38;
pub const RUN_MODE_CONF: u32 = 0x07;

/// Command builder for one FE-I4, addressed by its geographical chip id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fei4Cmd {
    chip_id: u8,
}

impl Fei4Cmd {
    /// # Panics
    /// When `chip_id` does not fit the 4-bit chip address.
    pub fn new(chip_id: u8) -> Self {
        assert!(chip_id < 16, "FE-I4 chip id {} does not fit 4 bits", chip_id);
        Self { chip_id }
    }

    pub fn chip_id(&self) -> u8 {
        self.chip_id
    }

    fn chip_bits(&self) -> u32 {
        ((self.chip_id as u32) << 6) & 0x3C0
    }

    pub fn trigger(&self) -> u32 {
        LV1
    }

    pub fn bcr(&self) -> u32 {
        BCR
    }

    pub fn ecr(&self) -> u32 {
        ECR
    }

    pub fn cal(&self) -> u32 {
        CAL
    }

    /// Write one full 16-bit global register
    pub fn wr_register(&self, address: usize, value: u16) -> [u32; 2] {
        assert!(address < 64, "register address {} does not fit 6 bits", address);
        [
            WR_REGISTER | self.chip_bits() | (address as u32 & 0x3F),
            ((value as u32) << 16) & 0xFFFF_0000,
        ]
    }

    pub fn rd_register(&self, address: usize) -> u32 {
        assert!(address < 64, "register address {} does not fit 6 bits", address);
        RD_REGISTER | self.chip_bits() | (address as u32 & 0x3F)
    }

    /// Shift one bit-plane into the selected double column(s)
    pub fn wr_front_end(&self, stream: &[u32; WORDS_PER_DC]) -> Vec<u32> {
        let mut words = Vec::with_capacity(WORDS_PER_DC + 1);
        words.push(WR_FRONT_END | self.chip_bits());
        words.extend_from_slice(stream);
        words
    }

    pub fn global_reset(&self) -> u32 {
        GLOBAL_RESET | self.chip_bits()
    }

    pub fn global_pulse(&self, width: u32) -> u32 {
        GLOBAL_PULSE | self.chip_bits() | (width & 0x3F)
    }

    pub fn run_mode(&self, run: bool) -> u32 {
        RUN_MODE | self.chip_bits() | if run { RUN_MODE_RUN } else { RUN_MODE_CONF }
    }

    /// Calibration pulse followed by a trigger `delay` bunch crossings
    /// later. The delay is rounded to whole idle words (32 crossings each).
    pub fn cal_trigger(&self, delay: u32) -> Vec<u32> {
        let idle_words = (delay / 32) as usize;
        let mut words = Vec::with_capacity(idle_words + 2);
        words.push(CAL);
        words.extend(std::iter::repeat(0).take(idle_words));
        words.push(LV1);
        words
    }
}

/// Chip id encoded in a slow command header
pub fn header_chip_id(word: u32) -> u8 {
    ((word & 0x3C0) >> 6) as u8
}
