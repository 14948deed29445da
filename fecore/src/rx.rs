/*!
DMA based receive path.

[`RxCore::read_data`] polls the receive bridge for a block, and when one is
ready, transfers it into a new [`RawData`] record. Empty or implausible
counts are transient and return `Ok(None)`. A failed transfer leaves the
FIFO state unknown and is returned as the fatal [`FeError::DmaFailure`].
*/

use tracing::{debug, error, trace};

use crate::error::{FeError, Result};
use crate::hw::{
    mask_write, HwController, RX_ADDR, RX_BRIDGE, RX_DATA_COUNT, RX_DATA_RATE, RX_ENABLE,
    RX_LOOPBACK, RX_START_ADDR,
};
use crate::raw::RawData;

/// Words the receive FIFO can hold; larger counts are read glitches
pub const MAX_FIFO_WORDS: u32 = 251 * 256;

/// Smallest DMA transfer the bridge performs
pub const MIN_BURST_WORDS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Idle,
    Polling,
    Transferring,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RxStats {
    pub polls: u64,
    pub empty_polls: u64,
    pub rejected_counts: u64,
    pub transfers: u64,
    pub words: u64,
}

#[derive(Debug, Clone)]
pub struct RxCore {
    state: RxState,
    stats: RxStats,
}

impl RxCore {
    pub fn new() -> Self {
        Self { state: RxState::Idle, stats: RxStats::default() }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    pub fn stats(&self) -> RxStats {
        self.stats
    }

    pub fn set_rx_enable<H: HwController + ?Sized>(&mut self, hw: &mut H, mask: u32) -> Result<()> {
        debug!("rx enable 0x{:08x}", mask);
        hw.write_single(RX_ADDR | RX_ENABLE, mask)
    }

    /// Change only the channels selected by `mask`
    pub fn mask_rx_enable<H: HwController + ?Sized>(
        &mut self,
        hw: &mut H,
        value: u32,
        mask: u32,
    ) -> Result<u32> {
        mask_write(hw, RX_ADDR | RX_ENABLE, value, mask)
    }

    pub fn set_loopback<H: HwController + ?Sized>(&mut self, hw: &mut H, enable: bool) -> Result<()> {
        hw.write_single(RX_BRIDGE | RX_LOOPBACK, u32::from(enable))
    }

    pub fn data_count<H: HwController + ?Sized>(&self, hw: &mut H) -> Result<u32> {
        hw.read_single(RX_BRIDGE | RX_DATA_COUNT)
    }

    pub fn start_addr<H: HwController + ?Sized>(&self, hw: &mut H) -> Result<u32> {
        hw.read_single(RX_BRIDGE | RX_START_ADDR)
    }

    /// Receive data rate in words per second as counted by the bridge
    pub fn data_rate<H: HwController + ?Sized>(&self, hw: &mut H) -> Result<u32> {
        hw.read_single(RX_BRIDGE | RX_DATA_RATE)
    }

    /// Poll once and transfer a ready block
    pub fn read_data<H: HwController + ?Sized>(&mut self, hw: &mut H) -> Result<Option<RawData>> {
        self.state = RxState::Polling;
        self.stats.polls += 1;

        let count = match self.data_count(hw) {
            Ok(count) => count,
            Err(e) => {
                self.state = RxState::Idle;
                return Err(e);
            }
        };
        if count == 0 {
            trace!("rx poll: no data");
            self.stats.empty_polls += 1;
            self.state = RxState::Idle;
            return Ok(None);
        }
        if count >= MAX_FIFO_WORDS {
            debug!("rx poll: implausible count {}, ignored", count);
            self.stats.rejected_counts += 1;
            self.state = RxState::Idle;
            return Ok(None);
        }

        let addr = match self.start_addr(hw) {
            Ok(addr) => addr,
            Err(e) => {
                self.state = RxState::Idle;
                return Err(e);
            }
        };
        let word_count = count as usize;
        let mut words = vec![0u32; word_count.max(MIN_BURST_WORDS)];

        self.state = RxState::Transferring;
        trace!("rx dma: {} words from 0x{:08x} ({} requested)", word_count, addr, words.len());
        let transfer = hw.read_dma(addr, &mut words);
        self.state = RxState::Idle;

        if let Err(e) = transfer {
            error!("DMA transfer of {} words at 0x{:08x} failed: {}", words.len(), addr, e);
            return Err(match e {
                FeError::DmaFailure { .. } => e,
                other => FeError::dma_failure(addr, words.len(), other.to_string()),
            });
        }

        self.stats.transfers += 1;
        self.stats.words += word_count as u64;
        Ok(Some(RawData::new(addr, words, word_count)))
    }
}

impl Default for RxCore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::SimController;

    fn sim_with_block(addr: u32, count: u32) -> SimController {
        let mut hw = SimController::new();
        hw.set_register(RX_BRIDGE | RX_DATA_COUNT, count);
        hw.set_register(RX_BRIDGE | RX_START_ADDR, addr);
        hw.load_dma(addr, &(0..count.max(32)).map(|i| 0xA000_0000 | i).collect::<Vec<_>>());
        hw
    }

    #[test]
    fn test_zero_count_does_not_transfer() {
        let mut hw = sim_with_block(0, 0);
        let mut rx = RxCore::new();
        assert_eq!(rx.read_data(&mut hw).unwrap(), None);
        assert!(hw.dma_requests().is_empty());
        assert_eq!(rx.state(), RxState::Idle);
        assert_eq!(rx.stats().empty_polls, 1);
    }

    #[test]
    fn test_implausible_count_does_not_transfer() {
        let mut hw = SimController::new();
        hw.set_register(RX_BRIDGE | RX_DATA_COUNT, MAX_FIFO_WORDS);
        let mut rx = RxCore::new();
        assert_eq!(rx.read_data(&mut hw).unwrap(), None);
        assert!(hw.dma_requests().is_empty());
        assert_eq!(rx.stats().rejected_counts, 1);
    }

    #[test]
    fn test_in_range_count_requests_exact_length() {
        let mut hw = sim_with_block(0x200, 40);
        let mut rx = RxCore::new();
        let data = rx.read_data(&mut hw).unwrap().unwrap();
        assert_eq!(hw.dma_requests(), &[(0x200, 40)]);
        assert_eq!(data.word_count, 40);
        assert_eq!(data.start_address, 0x200);
        assert_eq!(data.valid_words()[39], 0xA000_0027);
    }

    #[test]
    fn test_short_block_rounds_up_and_keeps_count() {
        let mut hw = sim_with_block(0x10, 5);
        let mut rx = RxCore::new();
        let data = rx.read_data(&mut hw).unwrap().unwrap();
        assert_eq!(hw.dma_requests(), &[(0x10, MIN_BURST_WORDS)]);
        assert_eq!(data.words.len(), MIN_BURST_WORDS);
        assert_eq!(data.word_count, 5);
        assert_eq!(data.valid_words().len(), 5);
    }

    #[test]
    fn test_dma_failure_is_fatal() {
        let mut hw = sim_with_block(0x40, 64);
        hw.fail_dma(true);
        let mut rx = RxCore::new();
        let err = rx.read_data(&mut hw).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(rx.state(), RxState::Idle);
    }

    #[test]
    fn test_mask_rx_enable() {
        let mut hw = SimController::new();
        let mut rx = RxCore::new();
        rx.set_rx_enable(&mut hw, 0x1F).unwrap();
        assert_eq!(rx.mask_rx_enable(&mut hw, 0x4, 0xF).unwrap(), 0x14);
    }
}
