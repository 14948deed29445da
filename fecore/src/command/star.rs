/*!
Star/ABC register commands over the LCB serial link.

A register transaction is nine 16-bit frames, each a pair of 6b8b symbols:

| frame | content                                                   |
|-------|-----------------------------------------------------------|
| 0     | `K3` + hcc id (start marker)                              |
| 1     | abc id (4 bits) and address bits 7:6                      |
| 2     | address bits 5:0 and the read flag                        |
| 3..=7 | value, 7 bits per frame, most significant chunk first     |
| 8     | `K2` + hcc id (stop marker)                               |
*/

use crate::error::{FeError, Result};
use crate::sixeight::{self, K1, K2, K3};

/// One LCB frame: two 8-bit symbols, first symbol in the high byte
pub type Frame = u16;

/// Frames in one register transaction
pub const SEQUENCE_FRAMES: usize = 9;

/// Value bits carried by one data frame
const CHUNK_BITS: u32 = 7;
const CHUNKS: usize = 5;

/// Idle frame
pub const IDLE: Frame = build_pair(K1, K1);

pub const fn build_pair(first: u8, second: u8) -> Frame {
    ((first as u16) << 8) | second as u16
}

pub fn split_pair(frame: Frame) -> (u8, u8) {
    ((frame >> 8) as u8, (frame & 0xFF) as u8)
}

/// Line code a 12-bit payload as two data symbols
pub fn command_bits(bits: u16) -> Frame {
    build_pair(
        sixeight::encode(((bits >> 6) & 0x3f) as u8),
        sixeight::encode((bits & 0x3f) as u8),
    )
}

/// Inverse of [`command_bits`]
pub fn decode_command_bits(frame: Frame) -> Result<u16> {
    let (first, second) = split_pair(frame);
    let hi = sixeight::decode(first)?;
    let lo = sixeight::decode(second)?;
    Ok(((hi as u16) << 6) | lo as u16)
}

/// Decoded register transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterCommand {
    pub hcc_id: u8,
    pub abc_id: u8,
    pub address: u8,
    pub write: bool,
    pub value: u32,
}

/// Command builder for one ABC behind one HCC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarCmd {
    hcc_id: u8,
    abc_id: u8,
}

impl StarCmd {
    /// # Panics
    /// When either id does not fit 4 bits.
    pub fn new(hcc_id: u8, abc_id: u8) -> Self {
        assert!(hcc_id < 16, "hcc id {} does not fit 4 bits", hcc_id);
        assert!(abc_id < 16, "abc id {} does not fit 4 bits", abc_id);
        Self { hcc_id, abc_id }
    }

    pub fn hcc_id(&self) -> u8 {
        self.hcc_id
    }

    pub fn abc_id(&self) -> u8 {
        self.abc_id
    }

    pub fn write_register(&self, address: u8, value: u32) -> [Frame; SEQUENCE_FRAMES] {
        Self::command_sequence(self.hcc_id, self.abc_id, address, true, value)
    }

    pub fn read_register(&self, address: u8) -> [Frame; SEQUENCE_FRAMES] {
        Self::command_sequence(self.hcc_id, self.abc_id, address, false, 0)
    }

    /// Build the nine frames of one register transaction
    pub fn command_sequence(
        hcc_id: u8,
        abc_id: u8,
        address: u8,
        write: bool,
        value: u32,
    ) -> [Frame; SEQUENCE_FRAMES] {
        let hcc_symbol = sixeight::encode(hcc_id & 0xf);
        let address = address as u16;
        let read_flag = u16::from(!write);

        let mut frames = [IDLE; SEQUENCE_FRAMES];
        frames[0] = build_pair(K3, hcc_symbol);
        frames[1] = command_bits((((abc_id & 0xf) as u16) << 2) | ((address >> 6) & 0x3));
        frames[2] = command_bits(((address & 0x3f) << 1) | read_flag);
        for i in 0..CHUNKS {
            let shift = (CHUNKS - 1 - i) as u32 * CHUNK_BITS;
            let part = ((value as u64 >> shift) & 0x7f) as u16;
            frames[3 + i] = command_bits(part);
        }
        frames[8] = build_pair(K2, hcc_symbol);
        frames
    }

    /// Parse a received transaction. Line errors and broken markers are
    /// reported, never skipped.
    pub fn decode_sequence(frames: &[Frame; SEQUENCE_FRAMES]) -> Result<RegisterCommand> {
        let (start, start_id) = split_pair(frames[0]);
        if start != K3 {
            return Err(FeError::invalid_command(format!("missing start marker, got 0x{:04x}", frames[0])));
        }
        let (stop, stop_id) = split_pair(frames[8]);
        if stop != K2 {
            return Err(FeError::invalid_command(format!("missing stop marker, got 0x{:04x}", frames[8])));
        }
        let hcc_id = sixeight::decode(start_id)?;
        if sixeight::decode(stop_id)? != hcc_id {
            return Err(FeError::invalid_command("start and stop markers name different chips"));
        }

        let header = decode_command_bits(frames[1])?;
        if header > 0x3f {
            return Err(FeError::invalid_command(format!("malformed address frame 0x{:03x}", header)));
        }
        let low = decode_command_bits(frames[2])?;
        if low > 0x7f {
            return Err(FeError::invalid_command(format!("malformed address frame 0x{:03x}", low)));
        }

        let mut value: u64 = 0;
        for frame in &frames[3..8] {
            let part = decode_command_bits(*frame)?;
            if part > 0x7f {
                return Err(FeError::invalid_command(format!("value chunk 0x{:03x} wider than 7 bits", part)));
            }
            value = (value << CHUNK_BITS) | part as u64;
        }
        let value = u32::try_from(value)
            .map_err(|_| FeError::invalid_command(format!("value 0x{:x} wider than 32 bits", value)))?;

        Ok(RegisterCommand {
            hcc_id,
            abc_id: ((header >> 2) & 0xf) as u8,
            address: (((header & 0x3) << 6) | ((low >> 1) & 0x3f)) as u8,
            write: low & 0x1 == 0,
            value,
        })
    }
}

/// Pack frames two per FIFO word, first frame in the high half. An odd
/// tail is padded with [`IDLE`].
pub fn pack_frames(frames: &[Frame]) -> Vec<u32> {
    frames
        .chunks(2)
        .map(|pair| {
            let second = pair.get(1).copied().unwrap_or(IDLE);
            ((pair[0] as u32) << 16) | second as u32
        })
        .collect()
}

/// Inverse of [`pack_frames`] (padding included)
pub fn unpack_frames(words: &[u32]) -> Vec<Frame> {
    words
        .iter()
        .flat_map(|&w| [(w >> 16) as Frame, (w & 0xFFFF) as Frame])
        .collect()
}
