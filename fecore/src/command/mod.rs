/*!
Command encoding for both supported front-end protocols.

The protocol is fixed when a chip is constructed, so the two encoders are
variants of one enum instead of trait objects.
*/

pub mod fei4;
pub mod star;

pub use fei4::Fei4Cmd;
pub use star::StarCmd;

/// Link protocol of a chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Word-aligned parallel register commands
    Fei4,
    /// 6b8b line-coded LCB frames
    Star,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEncoder {
    Fei4(Fei4Cmd),
    Star(StarCmd),
}

impl CommandEncoder {
    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Fei4(_) => Protocol::Fei4,
            Self::Star(_) => Protocol::Star,
        }
    }

    /// FIFO words of one register write transaction
    ///
    /// # Panics
    /// When the address or value does not fit the protocol (16-bit values
    /// and 6-bit addresses for FE-I4, 8-bit addresses for Star).
    pub fn register_write(&self, address: u16, value: u32) -> Vec<u32> {
        match self {
            Self::Fei4(cmd) => {
                assert!(value <= 0xFFFF, "FE-I4 register value 0x{:x} wider than 16 bits", value);
                cmd.wr_register(address as usize, value as u16).to_vec()
            }
            Self::Star(cmd) => {
                star::pack_frames(&cmd.write_register(star_address(address), value))
            }
        }
    }

    /// FIFO words of one register read request
    pub fn register_read(&self, address: u16) -> Vec<u32> {
        match self {
            Self::Fei4(cmd) => vec![cmd.rd_register(address as usize)],
            Self::Star(cmd) => star::pack_frames(&cmd.read_register(star_address(address))),
        }
    }
}

impl From<Fei4Cmd> for CommandEncoder {
    fn from(cmd: Fei4Cmd) -> Self {
        Self::Fei4(cmd)
    }
}

impl From<StarCmd> for CommandEncoder {
    fn from(cmd: StarCmd) -> Self {
        Self::Star(cmd)
    }
}

fn star_address(address: u16) -> u8 {
    assert!(address < 256, "Star register address 0x{:x} wider than 8 bits", address);
    address as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fei4_register_write() {
        let encoder = CommandEncoder::from(Fei4Cmd::new(6));
        assert_eq!(encoder.protocol(), Protocol::Fei4);
        assert_eq!(encoder.register_write(22, 0x0380), vec![0x005A_0996, 0x0380_0000]);
        assert_eq!(encoder.register_read(22), vec![0x005A_0416 | (6 << 6)]);
    }

    #[test]
    fn test_star_register_write() {
        let encoder = CommandEncoder::from(StarCmd::new(3, 2));
        let words = encoder.register_write(0x15, 0x1234567);
        assert_eq!(
            words,
            vec![0x6ac3_5969, 0x59aa_5959, 0x59c9_598d, 0x59ca_7127, 0x47c3_5555]
        );
        let frames = star::unpack_frames(&encoder.register_read(0x15));
        assert_eq!(frames[2], 0x592b);
    }

    #[test]
    #[should_panic(expected = "wider than 16 bits")]
    fn test_fei4_value_range() {
        let _ = CommandEncoder::Fei4(Fei4Cmd::new(0)).register_write(1, 0x1_0000);
    }

    #[test]
    #[should_panic(expected = "wider than 8 bits")]
    fn test_star_address_range() {
        let _ = CommandEncoder::Star(StarCmd::new(0, 0)).register_read(0x100);
    }
}
