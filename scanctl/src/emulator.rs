/*!
Behavioral FE-I4 emulator.

Stands in for the firmware and the chips when no hardware is attached. The
TX FIFO word stream is decoded with a small state machine over the slow
command headers. Each emulated chip keeps its global registers, the double
column shift registers and the pixel latches, and answers triggers with
data headers and hit records in the RX FIFO. The receive bridge hands the
FIFO out in blocks through `RX_DATA_COUNT`, `RX_START_ADDR` and DMA reads.
*/

use std::collections::{BTreeMap, HashMap, VecDeque};

use fecore::bitfield::{FieldId, GlobalRegisters};
use fecore::chip::DcMode;
use fecore::command::fei4::{
    header_chip_id, BCR, CAL, ECR, GLOBAL_PULSE, GLOBAL_RESET, LV1, RD_REGISTER, RUN_MODE,
    RUN_MODE_RUN, SLOW_CMD_MASK, WR_FRONT_END, WR_REGISTER,
};
use fecore::geometry::{N_DC, N_GLOBAL_REGISTERS, N_PLANES, PIXELS_PER_DC, WORDS_PER_DC};
use fecore::hw::{
    HwController, RX_ADDR, RX_BRIDGE, RX_DATA_COUNT, RX_DATA_RATE, RX_ENABLE, RX_START_ADDR,
    TX_ADDR, TX_EMPTY, TX_FIFO,
};
use fecore::pixel::{to_pixel, DoubleColumnBit, PixelAttribute, PixelConfig};
use fecore::rx::MIN_BURST_WORDS;
use fecore::{FeError, Result};
use tracing::{debug, trace, warn};

/// Data header record
pub const DATA_HEADER: u32 = 0x00E9_0000;
/// Address record (register readback)
pub const ADDRESS_RECORD: u32 = 0x00EA_0000;
/// Value record (register readback)
pub const VALUE_RECORD: u32 = 0x00EC_0000;
const RECORD_TYPE_MASK: u32 = 0x00FF_0000;

/// Largest block handed out per DMA transfer
pub const BLOCK_WORDS: usize = 4096;
/// DMA window, blocks wrap around at the end
pub const DMA_WORDS: usize = 64 * 1024;

/// One FE-I4 output word, as far as the emulator produces them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWord {
    Header { bcid: u32 },
    Hit { col: usize, row: usize, tot: u32 },
    Address { addr: u32 },
    Value { value: u32 },
    Unknown(u32),
}

impl DataWord {
    pub fn decode(word: u32) -> Self {
        match word & RECORD_TYPE_MASK {
            DATA_HEADER => Self::Header { bcid: word & 0x3FF },
            ADDRESS_RECORD => Self::Address { addr: word & 0xFFFF },
            VALUE_RECORD => Self::Value { value: word & 0xFFFF },
            _ => {
                let col = ((word >> 17) & 0x7F) as usize;
                let row = ((word >> 8) & 0x1FF) as usize;
                if col == 0 || row == 0 || word >> 24 != 0 {
                    Self::Unknown(word)
                } else {
                    Self::Hit { col: col - 1, row: row - 1, tot: (word >> 4) & 0xF }
                }
            }
        }
    }
}

/// Emulator state machine for the TX word stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Idle,
    /// Next word is the value of a register write
    RegisterData { chip: u8, addr: usize },
    /// Collecting a front-end bitstream
    FrontEnd { chip: u8 },
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EmuStats {
    pub commands: u64,
    pub triggers: u64,
    pub hits: u64,
    pub unknown_words: u64,
}

/// One emulated chip
#[derive(Debug, Clone)]
pub struct EmuChip {
    pub regs: GlobalRegisters,
    pub run_mode: bool,
    shift_regs: Vec<DoubleColumnBit>,
    pub latches: PixelConfig,
    cal_armed: bool,
    bcid: u32,
}

impl EmuChip {
    fn new() -> Self {
        Self {
            regs: GlobalRegisters::fei4_defaults(),
            run_mode: false,
            shift_regs: vec![DoubleColumnBit::new(); N_DC],
            latches: PixelConfig::new(),
            cal_armed: false,
            bcid: 0,
        }
    }

    pub fn shift_register(&self, dc: usize) -> &DoubleColumnBit {
        &self.shift_regs[dc]
    }

    /// Double columns addressed by the current `Colpr_Mode`/`Colpr_Addr`
    fn selected_dcs(&self) -> Vec<usize> {
        let mode = self.regs.get(FieldId::ColprMode);
        let addr = self.regs.get(FieldId::ColprAddr) as usize;
        if mode == DcMode::All as u32 {
            return (0..N_DC).collect();
        }
        if mode != DcMode::Single as u32 {
            warn!("Emulator: Colpr_Mode {} not modelled, using single column pair", mode);
        }
        if addr < N_DC {
            vec![addr]
        } else {
            Vec::new()
        }
    }

    fn write_front_end(&mut self, stream: &[u32; WORDS_PER_DC]) {
        for dc in self.selected_dcs() {
            self.shift_regs[dc].set(stream);
        }
    }

    /// Physical strobe bits, bit `p` selects plane `p`
    fn strobed_planes(&self) -> Vec<usize> {
        let desc = FieldId::PixelLatchStrobe.descriptor();
        let strobe = (self.regs.register(desc.storage_offset()) as u32 >> desc.bit_offset()) & desc.mask();
        (0..N_PLANES).filter(|p| strobe & (1 << p) != 0).collect()
    }

    fn global_pulse(&mut self) {
        let dcs = self.selected_dcs();
        let parallel_load = self.regs.get(FieldId::S0) == 1 && self.regs.get(FieldId::S1) == 1;
        if self.regs.get(FieldId::SrClock) == 1 {
            if parallel_load {
                let planes = self.strobed_planes();
                if planes.len() > 1 {
                    warn!("Emulator: {} latches strobed for readback, using plane {}", planes.len(), planes[0]);
                }
                if let Some(&plane) = planes.first() {
                    for &dc in &dcs {
                        self.shift_regs[dc] = *self.latches.plane(plane, dc);
                    }
                }
            } else {
                for &dc in &dcs {
                    self.shift_regs[dc].shift_by_one();
                }
            }
        }
        if self.regs.get(FieldId::LatchEnable) == 1 {
            for plane in self.strobed_planes() {
                for &dc in &dcs {
                    *self.latches.plane_mut(plane, dc) = self.shift_regs[dc];
                }
            }
        }
    }

    /// Answer one trigger: a data header, then a hit per enabled pixel if a
    /// digital injection is pending
    fn trigger(&mut self, fifo: &mut VecDeque<u32>) -> u64 {
        self.bcid = (self.bcid + 1) & 0x3FF;
        fifo.push_back(DATA_HEADER | self.bcid);
        if !std::mem::take(&mut self.cal_armed) || self.regs.get(FieldId::DigHitInSel) == 0 {
            return 0;
        }
        let tot = self.regs.get(FieldId::CalPulseWidth).min(13);
        let enable = PixelAttribute::Enable.first_plane();
        let mut hits = 0;
        for dc in 0..N_DC {
            let plane = self.latches.plane(enable, dc);
            if plane.count_ones() == 0 {
                continue;
            }
            for n in 0..PIXELS_PER_DC {
                if plane.get_pixel(n) == 1 {
                    let (col, row) = to_pixel(dc, n);
                    fifo.push_back(((col as u32 + 1) << 17) | ((row as u32 + 1) << 8) | (tot << 4) | 0xF);
                    hits += 1;
                }
            }
        }
        hits
    }
}

/// Block currently exposed by the receive bridge
#[derive(Debug, Clone, Copy)]
struct PendingBlock {
    addr: u32,
    count: u32,
}

pub struct EmuController {
    registers: HashMap<u32, u32>,
    state: TxState,
    front_end: Vec<u32>,
    chips: BTreeMap<u8, EmuChip>,
    rx_fifo: VecDeque<u32>,
    dma: Vec<u32>,
    dma_cursor: usize,
    pending: Option<PendingBlock>,
    stats: EmuStats,
}

impl EmuController {
    pub fn new() -> Self {
        Self {
            registers: HashMap::new(),
            state: TxState::Idle,
            front_end: Vec::with_capacity(WORDS_PER_DC),
            chips: BTreeMap::new(),
            rx_fifo: VecDeque::new(),
            dma: vec![0; DMA_WORDS],
            dma_cursor: 0,
            pending: None,
            stats: EmuStats::default(),
        }
    }

    pub fn chip(&self, chip_id: u8) -> Option<&EmuChip> {
        self.chips.get(&chip_id)
    }

    pub fn stats(&self) -> EmuStats {
        self.stats
    }

    /// Words queued but not yet handed to DMA
    pub fn fifo_len(&self) -> usize {
        self.rx_fifo.len()
    }

    fn rx_enabled(&self) -> bool {
        self.registers.get(&(RX_ADDR | RX_ENABLE)).copied().unwrap_or(0) != 0
    }

    fn chip_mut(&mut self, chip_id: u8) -> &mut EmuChip {
        self.chips.entry(chip_id).or_insert_with(|| {
            debug!("Emulator: chip {} attached", chip_id);
            EmuChip::new()
        })
    }

    fn process_tx_word(&mut self, word: u32) {
        match self.state {
            TxState::RegisterData { chip, addr } => {
                self.chip_mut(chip).regs.set_register(addr, (word >> 16) as u16);
                self.state = TxState::Idle;
            }
            TxState::FrontEnd { chip } => {
                self.front_end.push(word);
                if self.front_end.len() == WORDS_PER_DC {
                    let mut stream = [0u32; WORDS_PER_DC];
                    stream.copy_from_slice(&self.front_end);
                    self.front_end.clear();
                    self.chip_mut(chip).write_front_end(&stream);
                    self.state = TxState::Idle;
                }
            }
            TxState::Idle => self.process_command(word),
        }
    }

    fn process_command(&mut self, word: u32) {
        match word {
            0 => return,
            LV1 => {
                self.stats.triggers += 1;
                let rx_enabled = self.rx_enabled();
                let mut fifo = std::mem::take(&mut self.rx_fifo);
                for chip in self.chips.values_mut().filter(|c| c.run_mode) {
                    let before = fifo.len();
                    self.stats.hits += chip.trigger(&mut fifo);
                    if !rx_enabled {
                        fifo.truncate(before);
                    }
                }
                self.rx_fifo = fifo;
                return;
            }
            CAL => {
                for chip in self.chips.values_mut().filter(|c| c.run_mode) {
                    chip.cal_armed = true;
                }
                return;
            }
            BCR | ECR => {
                for chip in self.chips.values_mut() {
                    chip.bcid = 0;
                }
                return;
            }
            _ => {}
        }

        self.stats.commands += 1;
        let chip = header_chip_id(word);
        match word & SLOW_CMD_MASK {
            WR_REGISTER => {
                let addr = (word & 0x3F) as usize;
                if addr < N_GLOBAL_REGISTERS {
                    self.state = TxState::RegisterData { chip, addr };
                } else {
                    warn!("Emulator: write to unknown register {}", addr);
                    self.state = TxState::RegisterData { chip, addr: 0 };
                }
            }
            RD_REGISTER => {
                let addr = (word & 0x3F) as usize;
                let value = if addr < N_GLOBAL_REGISTERS { self.chip_mut(chip).regs.register(addr) } else { 0 };
                if self.rx_enabled() {
                    self.rx_fifo.push_back(ADDRESS_RECORD | addr as u32);
                    self.rx_fifo.push_back(VALUE_RECORD | value as u32);
                }
            }
            WR_FRONT_END => {
                self.front_end.clear();
                self.state = TxState::FrontEnd { chip };
            }
            GLOBAL_RESET => {
                trace!("Emulator: global reset chip {}", chip);
                *self.chip_mut(chip) = EmuChip::new();
            }
            GLOBAL_PULSE => self.chip_mut(chip).global_pulse(),
            RUN_MODE => {
                let run = word & 0x3F == RUN_MODE_RUN;
                trace!("Emulator: chip {} run mode {}", chip, run);
                self.chip_mut(chip).run_mode = run;
            }
            _ => {
                self.stats.unknown_words += 1;
                warn!("Emulator: unknown command word 0x{:08x}", word);
            }
        }
    }

    /// Move the next block from the RX FIFO into the DMA window
    fn stage_block(&mut self) -> Option<PendingBlock> {
        if self.pending.is_none() && !self.rx_fifo.is_empty() {
            let count = self.rx_fifo.len().min(BLOCK_WORDS);
            // the bridge may read up to a full burst past a short block
            if self.dma_cursor + count.max(MIN_BURST_WORDS) > DMA_WORDS {
                self.dma_cursor = 0;
            }
            let addr = self.dma_cursor;
            for (slot, word) in self.dma[addr..addr + count].iter_mut().zip(self.rx_fifo.drain(..count)) {
                *slot = word;
            }
            self.dma_cursor += count;
            self.pending = Some(PendingBlock { addr: addr as u32, count: count as u32 });
        }
        self.pending
    }
}

impl Default for EmuController {
    fn default() -> Self {
        Self::new()
    }
}

impl HwController for EmuController {
    fn write_single(&mut self, addr: u32, value: u32) -> Result<()> {
        if addr == TX_ADDR | TX_FIFO {
            self.process_tx_word(value);
        } else {
            self.registers.insert(addr, value);
        }
        Ok(())
    }

    fn read_single(&mut self, addr: u32) -> Result<u32> {
        let value = match addr {
            a if a == TX_ADDR | TX_EMPTY => 1,
            a if a == RX_BRIDGE | RX_DATA_COUNT => self.stage_block().map_or(0, |b| b.count),
            a if a == RX_BRIDGE | RX_START_ADDR => self.pending.map_or(0, |b| b.addr),
            a if a == RX_BRIDGE | RX_DATA_RATE => 0,
            _ => self.registers.get(&addr).copied().unwrap_or(0),
        };
        Ok(value)
    }

    fn read_dma(&mut self, addr: u32, buf: &mut [u32]) -> Result<()> {
        let start = addr as usize;
        if start + buf.len() > DMA_WORDS {
            return Err(FeError::dma_failure(addr, buf.len(), "transfer beyond emulated DMA window"));
        }
        buf.copy_from_slice(&self.dma[start..start + buf.len()]);
        self.pending = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fecore::chip::plane_strobe;
    use fecore::mask::{MaskGenerator, MaskStage};
    use fecore::{Fei4, RxCore, TxCore};

    fn send(hw: &mut EmuController, words: &[u32]) {
        TxCore::new().write_words(hw, words).unwrap();
    }

    #[test]
    fn test_register_writes_reach_chip() {
        let mut hw = EmuController::new();
        let mut fe = Fei4::new("chip0", 3);
        fe.cfg.global.set(FieldId::VthinCoarse, 17);
        send(&mut hw, &fe.configure_global());
        let chip = hw.chip(3).unwrap();
        assert_eq!(chip.regs.get(FieldId::VthinCoarse), 17);
        assert_eq!(hw.stats().unknown_words, 0);
    }

    #[test]
    fn test_configured_enable_plane_is_latched() {
        let mut hw = EmuController::new();
        let mut fe = Fei4::new("chip0", 0);
        fe.cfg.pixels.set_pixel(PixelAttribute::Enable, 5, 100, 1);
        fe.cfg.pixels.set_pixel(PixelAttribute::Tdac, 5, 100, 21);
        send(&mut hw, &fe.configure());
        let chip = hw.chip(0).unwrap();
        assert_eq!(chip.latches, fe.cfg.pixels);
    }

    #[test]
    fn test_shift_mask_matches_generator() {
        let mut hw = EmuController::new();
        let mut fe = Fei4::new("chip0", 0);
        let gen = MaskGenerator::new(MaskStage::Mask4);
        send(&mut hw, &fe.init_mask(gen.pattern()));
        send(&mut hw, &fe.shift_mask());
        send(&mut hw, &fe.shift_mask());
        assert_eq!(*hw.chip(0).unwrap().shift_register(17), gen.stage(2));
    }

    #[test]
    fn test_latch_reads_back_into_shift_register() {
        let mut hw = EmuController::new();
        let mut fe = Fei4::new("chip0", 0);
        fe.cfg.pixels.set_pixel(PixelAttribute::Enable, 5, 100, 1);
        fe.cfg.pixels.set_pixel(PixelAttribute::Enable, 40, 7, 1);
        fe.cfg.pixels.set_pixel(PixelAttribute::Tdac, 41, 7, 0x10);
        send(&mut hw, &fe.configure());
        send(&mut hw, &fe.init_mask(0));
        assert_eq!(hw.chip(0).unwrap().shift_register(2).count_ones(), 0);

        let enable = PixelAttribute::Enable.first_plane();
        send(&mut hw, &fe.load_into_shift_reg(plane_strobe(enable)));
        let chip = hw.chip(0).unwrap();
        for dc in 0..N_DC {
            assert_eq!(chip.shift_register(dc), fe.cfg.pixels.plane(enable, dc));
        }
        assert_eq!(chip.shift_register(2).count_ones(), 1);

        // TDAC is MSB first, value 0x10 lives in the TDAC's first plane
        let tdac_msb = PixelAttribute::Tdac.plane_of_bit(4);
        send(&mut hw, &fe.load_into_shift_reg(plane_strobe(tdac_msb)));
        let chip = hw.chip(0).unwrap();
        assert_eq!(chip.shift_register(20), fe.cfg.pixels.plane(tdac_msb, 20));
        assert_eq!(chip.shift_register(20).count_ones(), 1);
        assert_eq!(chip.regs.get(FieldId::S0), 0);
        // a plain shift afterwards clocks instead of reloading
        send(&mut hw, &fe.shift_mask());
        let mut shifted = *fe.cfg.pixels.plane(tdac_msb, 20);
        shifted.shift_by_one();
        assert_eq!(*hw.chip(0).unwrap().shift_register(20), shifted);
        assert_eq!(hw.chip(0).unwrap().latches, fe.cfg.pixels);
    }

    #[test]
    fn test_digital_injection_produces_hits() {
        let mut hw = EmuController::new();
        let mut fe = Fei4::new("chip0", 0);
        fe.cfg.pixels.set_pixel(PixelAttribute::Enable, 0, 0, 1);
        fe.cfg.pixels.set_pixel(PixelAttribute::Enable, 79, 335, 1);
        fe.cfg.global.set(FieldId::DigHitInSel, 1);
        fe.cfg.global.set(FieldId::CalPulseWidth, 6);
        send(&mut hw, &fe.configure());
        hw.write_single(RX_ADDR | RX_ENABLE, 1).unwrap();
        send(&mut hw, &[fe.run_mode(true)]);
        send(&mut hw, &fe.cal_trigger(64));

        let mut rx = RxCore::new();
        let data = rx.read_data(&mut hw).unwrap().unwrap();
        let decoded: Vec<DataWord> = data.valid_words().iter().map(|&w| DataWord::decode(w)).collect();
        assert_eq!(
            decoded,
            vec![
                DataWord::Header { bcid: 1 },
                DataWord::Hit { col: 0, row: 0, tot: 6 },
                DataWord::Hit { col: 79, row: 335, tot: 6 },
            ]
        );
        assert_eq!(rx.read_data(&mut hw).unwrap(), None);
    }

    #[test]
    fn test_trigger_without_injection_gives_header_only() {
        let mut hw = EmuController::new();
        let fe = Fei4::new("chip0", 0);
        hw.write_single(RX_ADDR | RX_ENABLE, 1).unwrap();
        send(&mut hw, &[fe.run_mode(true), LV1, LV1]);
        assert_eq!(hw.fifo_len(), 2);
        assert_eq!(hw.stats().triggers, 2);
    }

    #[test]
    fn test_register_readback() {
        let mut hw = EmuController::new();
        let mut fe = Fei4::new("chip0", 1);
        hw.write_single(RX_ADDR | RX_ENABLE, 1).unwrap();
        send(&mut hw, &fe.write_field(FieldId::TrigLat, 0xAB));
        send(&mut hw, &[fe.cmd().rd_register(25)]);
        let mut rx = RxCore::new();
        let data = rx.read_data(&mut hw).unwrap().unwrap();
        assert_eq!(DataWord::decode(data.valid_words()[0]), DataWord::Address { addr: 25 });
        assert_eq!(
            DataWord::decode(data.valid_words()[1]),
            DataWord::Value { value: fe.cfg.global.register(25) as u32 }
        );
    }

    #[test]
    fn test_large_fifo_is_served_in_blocks() {
        let mut hw = EmuController::new();
        hw.write_single(RX_ADDR | RX_ENABLE, 1).unwrap();
        let fe = Fei4::new("chip0", 0);
        send(&mut hw, &[fe.run_mode(true)]);
        send(&mut hw, &vec![LV1; BLOCK_WORDS + 10]);

        let mut rx = RxCore::new();
        let first = rx.read_data(&mut hw).unwrap().unwrap();
        let second = rx.read_data(&mut hw).unwrap().unwrap();
        assert_eq!(first.word_count, BLOCK_WORDS);
        assert_eq!(second.word_count, 10);
        assert_eq!(second.start_address as usize, BLOCK_WORDS);
        assert_eq!(hw.fifo_len(), 0);
    }
}
