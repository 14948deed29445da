/*!
Hardware access layer.

Firmware registers are 32 bits wide and addressed by word. The address
space is split into regions by a function code in bits 14 and up.
*/

pub mod sim;
pub mod uio;

pub use sim::SimController;
pub use uio::UioController;

use tracing::trace;

use crate::error::Result;

/// Transmit core registers
pub const TX_ADDR: u32 = 0x2 << 14;
pub const TX_FIFO: u32 = 0x0;
pub const TX_ENABLE: u32 = 0x1;
pub const TX_EMPTY: u32 = 0x2;

/// Receive core registers
pub const RX_ADDR: u32 = 0x3 << 14;
pub const RX_ENABLE: u32 = 0x0;

/// Receive bridge (DMA status) registers
pub const RX_BRIDGE: u32 = 0x4 << 14;
pub const RX_START_ADDR: u32 = 0x0;
pub const RX_DATA_COUNT: u32 = 0x1;
pub const RX_LOOPBACK: u32 = 0x2;
pub const RX_DATA_RATE: u32 = 0x3;

/// Access to the firmware register space and the DMA window
pub trait HwController: Send {
    fn write_single(&mut self, addr: u32, value: u32) -> Result<()>;

    fn read_single(&mut self, addr: u32) -> Result<u32>;

    /// Fill `buf` with `buf.len()` words starting at word address `addr`
    fn read_dma(&mut self, addr: u32, buf: &mut [u32]) -> Result<()>;

    /// Write several words to the same register (FIFO style)
    fn write_block(&mut self, addr: u32, words: &[u32]) -> Result<()> {
        for &word in words {
            self.write_single(addr, word)?;
        }
        Ok(())
    }
}

impl<T: HwController + ?Sized> HwController for Box<T> {
    fn write_single(&mut self, addr: u32, value: u32) -> Result<()> {
        (**self).write_single(addr, value)
    }

    fn read_single(&mut self, addr: u32) -> Result<u32> {
        (**self).read_single(addr)
    }

    fn read_dma(&mut self, addr: u32, buf: &mut [u32]) -> Result<()> {
        (**self).read_dma(addr, buf)
    }

    fn write_block(&mut self, addr: u32, words: &[u32]) -> Result<()> {
        (**self).write_block(addr, words)
    }
}

/// Read-modify-write: bits set in `mask` are cleared, then `value` is OR-ed
/// in. Bits outside `mask` keep their current state. Returns the value
/// written.
pub fn mask_write<H: HwController + ?Sized>(hw: &mut H, addr: u32, value: u32, mask: u32) -> Result<u32> {
    let current = hw.read_single(addr)?;
    let updated = (current & !mask) | value;
    trace!("mask_write 0x{:05x}: 0x{:08x} -> 0x{:08x} (mask 0x{:08x})", addr, current, updated, mask);
    hw.write_single(addr, updated)?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_write_preserves_outside_bits() {
        let mut hw = SimController::new();
        hw.set_register(RX_ADDR | RX_ENABLE, 0x1F);
        let written = mask_write(&mut hw, RX_ADDR | RX_ENABLE, 0x4, 0xF).unwrap();
        assert_eq!(written, 0x14);
        assert_eq!(hw.register(RX_ADDR | RX_ENABLE), 0x14);
    }

    #[test]
    fn test_regions_do_not_overlap() {
        assert_eq!(TX_ADDR | TX_FIFO, 0x8000);
        assert_eq!(RX_ADDR | RX_ENABLE, 0xC000);
        assert_eq!(RX_BRIDGE | RX_DATA_COUNT, 0x10001);
    }

    #[test]
    fn test_boxed_controller() {
        let mut hw: Box<dyn HwController> = Box::new(SimController::new());
        hw.write_block(TX_ADDR | TX_FIFO, &[1, 2, 3]).unwrap();
        assert_eq!(hw.read_single(TX_ADDR | TX_FIFO).unwrap(), 3);
    }
}
