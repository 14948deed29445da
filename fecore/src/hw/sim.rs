//! In-memory register space for tests

use std::collections::{HashMap, VecDeque};

use tracing::trace;

use super::{HwController, TX_ADDR, TX_EMPTY, TX_FIFO};
use crate::error::{FeError, Result};

/// Scriptable stand-in for the firmware
///
/// Registers hold the last written value. Reads can be scripted per
/// address; a scripted value is consumed by one read, afterwards the plain
/// register value is returned again. DMA reads copy from a word memory and
/// are logged.
#[derive(Debug, Clone)]
pub struct SimController {
    registers: HashMap<u32, u32>,
    scripted: HashMap<u32, VecDeque<u32>>,
    writes: Vec<(u32, u32)>,
    dma_memory: Vec<u32>,
    dma_requests: Vec<(u32, usize)>,
    fail_dma: bool,
}

impl SimController {
    /// Empty register space with an idle transmitter
    pub fn new() -> Self {
        let mut registers = HashMap::new();
        registers.insert(TX_ADDR | TX_EMPTY, 1);
        Self {
            registers,
            scripted: HashMap::new(),
            writes: Vec::new(),
            dma_memory: Vec::new(),
            dma_requests: Vec::new(),
            fail_dma: false,
        }
    }

    pub fn set_register(&mut self, addr: u32, value: u32) {
        self.registers.insert(addr, value);
    }

    pub fn register(&self, addr: u32) -> u32 {
        self.registers.get(&addr).copied().unwrap_or(0)
    }

    /// Values returned by the next reads of `addr`, in order
    pub fn script(&mut self, addr: u32, values: impl IntoIterator<Item = u32>) {
        self.scripted.entry(addr).or_default().extend(values);
    }

    /// Place `words` into DMA memory at word address `addr`
    pub fn load_dma(&mut self, addr: u32, words: &[u32]) {
        let start = addr as usize;
        let end = start + words.len();
        if self.dma_memory.len() < end {
            self.dma_memory.resize(end, 0);
        }
        self.dma_memory[start..end].copy_from_slice(words);
    }

    /// Make every following DMA transfer fail
    pub fn fail_dma(&mut self, fail: bool) {
        self.fail_dma = fail;
    }

    /// Every register write, in order
    pub fn writes(&self) -> &[(u32, u32)] {
        &self.writes
    }

    /// Words written to the command FIFO, in order
    pub fn tx_words(&self) -> Vec<u32> {
        self.writes
            .iter()
            .filter(|(addr, _)| *addr == TX_ADDR | TX_FIFO)
            .map(|(_, value)| *value)
            .collect()
    }

    /// `(address, length)` of every DMA transfer requested
    pub fn dma_requests(&self) -> &[(u32, usize)] {
        &self.dma_requests
    }
}

impl Default for SimController {
    fn default() -> Self {
        Self::new()
    }
}

impl HwController for SimController {
    fn write_single(&mut self, addr: u32, value: u32) -> Result<()> {
        trace!("sim write 0x{:05x} = 0x{:08x}", addr, value);
        self.writes.push((addr, value));
        self.registers.insert(addr, value);
        Ok(())
    }

    fn read_single(&mut self, addr: u32) -> Result<u32> {
        if let Some(value) = self.scripted.get_mut(&addr).and_then(|q| q.pop_front()) {
            return Ok(value);
        }
        Ok(self.register(addr))
    }

    fn read_dma(&mut self, addr: u32, buf: &mut [u32]) -> Result<()> {
        self.dma_requests.push((addr, buf.len()));
        if self.fail_dma {
            return Err(FeError::dma_failure(addr, buf.len(), "injected failure"));
        }
        let start = addr as usize;
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.dma_memory.get(start + i).copied().unwrap_or(0);
        }
        Ok(())
    }
}
