/*!
Command transmission through the firmware TX FIFO.
*/

use tracing::{debug, trace};

use crate::error::{FeError, Result};
use crate::hw::{HwController, TX_ADDR, TX_EMPTY, TX_ENABLE, TX_FIFO};

/// Transmit side of the link. Keeps the channel enable mask and a count of
/// words sent; register access goes through the controller passed in.
#[derive(Debug, Default, Clone)]
pub struct TxCore {
    enable_mask: u32,
    words_sent: u64,
}

impl TxCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_fifo<H: HwController + ?Sized>(&mut self, hw: &mut H, word: u32) -> Result<()> {
        trace!("tx fifo <- 0x{:08x}", word);
        hw.write_single(TX_ADDR | TX_FIFO, word)?;
        self.words_sent += 1;
        Ok(())
    }

    pub fn write_words<H: HwController + ?Sized>(&mut self, hw: &mut H, words: &[u32]) -> Result<()> {
        if words.is_empty() {
            return Ok(());
        }
        trace!("tx fifo <- {} words", words.len());
        hw.write_block(TX_ADDR | TX_FIFO, words)?;
        self.words_sent += words.len() as u64;
        Ok(())
    }

    /// Select the TX channels commands are sent on (one bit per channel)
    pub fn set_cmd_enable<H: HwController + ?Sized>(&mut self, hw: &mut H, mask: u32) -> Result<()> {
        debug!("tx enable mask 0x{:08x}", mask);
        hw.write_single(TX_ADDR | TX_ENABLE, mask)?;
        self.enable_mask = mask;
        Ok(())
    }

    pub fn cmd_enable(&self) -> u32 {
        self.enable_mask
    }

    pub fn is_cmd_empty<H: HwController + ?Sized>(&self, hw: &mut H) -> Result<bool> {
        Ok(hw.read_single(TX_ADDR | TX_EMPTY)? & 0x1 != 0)
    }

    /// Poll until the FIFO has drained, giving up after `max_polls` reads
    pub fn wait_cmd_empty<H: HwController + ?Sized>(&self, hw: &mut H, max_polls: u32) -> Result<()> {
        for poll in 0..max_polls {
            if self.is_cmd_empty(hw)? {
                trace!("tx fifo empty after {} polls", poll + 1);
                return Ok(());
            }
        }
        Err(FeError::Timeout { what: "tx fifo to drain", polls: max_polls })
    }

    pub fn words_sent(&self) -> u64 {
        self.words_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::SimController;

    #[test]
    fn test_words_reach_fifo_in_order() {
        let mut hw = SimController::new();
        let mut tx = TxCore::new();
        tx.write_fifo(&mut hw, 0x1D).unwrap();
        tx.write_words(&mut hw, &[1, 2, 3]).unwrap();
        assert_eq!(hw.tx_words(), vec![0x1D, 1, 2, 3]);
        assert_eq!(tx.words_sent(), 4);
    }

    #[test]
    fn test_wait_cmd_empty() {
        let mut hw = SimController::new();
        let mut tx = TxCore::new();
        tx.set_cmd_enable(&mut hw, 0x3).unwrap();
        assert_eq!(hw.register(TX_ADDR | TX_ENABLE), 0x3);

        hw.script(TX_ADDR | TX_EMPTY, [0, 0, 1]);
        tx.wait_cmd_empty(&mut hw, 5).unwrap();

        hw.set_register(TX_ADDR | TX_EMPTY, 0);
        match tx.wait_cmd_empty(&mut hw, 10) {
            Err(FeError::Timeout { polls: 10, .. }) => {}
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
