/*!
Digital scan orchestration.

The orchestrator owns the hardware controller, the chips and both link
cores. It runs on one thread and hands every received block to the
clipboard; a separate writer thread drains it.

Per mask stage: write the stage's enable mask into every chip, send the
enable planes, enable RX, wait for the command FIFO to drain, inject and
trigger, disable RX, then drain the receive path until it stays empty for
`rx_idle_polls` polls.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use fecore::bitfield::FieldId;
use fecore::mask::MaskGenerator;
use fecore::pixel::PixelAttribute;
use fecore::{ClipBoard, Fei4, HwController, RawData, Result, RxCore, TxCore};
use tracing::{debug, error, info, warn};

use crate::config::ScanConfig;
use crate::session::CommandDump;

pub const TEST_TYPE: &str = "digitalscan";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub stages_total: u32,
    pub stages_completed: u32,
    pub records: u64,
    pub words: u64,
    /// A stop was requested before all stages ran
    pub stopped: bool,
}

pub struct ScanOrchestrator<H: HwController> {
    hw: H,
    tx: TxCore,
    rx: RxCore,
    chips: Vec<Fei4>,
    cfg: ScanConfig,
    tx_mask: u32,
    rx_mask: u32,
    clipboard: Arc<ClipBoard<RawData>>,
    running: Arc<AtomicBool>,
    dump: Option<CommandDump>,
    summary: ScanSummary,
}

impl<H: HwController> ScanOrchestrator<H> {
    pub fn new(
        hw: H,
        chips: Vec<Fei4>,
        cfg: ScanConfig,
        tx_mask: u32,
        rx_mask: u32,
        clipboard: Arc<ClipBoard<RawData>>,
    ) -> Self {
        Self {
            hw,
            tx: TxCore::new(),
            rx: RxCore::new(),
            chips,
            cfg,
            tx_mask,
            rx_mask,
            clipboard,
            running: Arc::new(AtomicBool::new(true)),
            dump: None,
            summary: ScanSummary::default(),
        }
    }

    /// Write every stage's command words to `dump`
    pub fn with_command_dump(mut self, dump: CommandDump) -> Self {
        self.dump = Some(dump);
        self
    }

    /// Clear to request a stop before the next mask stage
    pub fn get_running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn chips(&self) -> &[Fei4] {
        &self.chips
    }

    pub fn summary(&self) -> ScanSummary {
        self.summary
    }

    fn send(&mut self, title: &str, words: &[u32]) -> Result<()> {
        if let Some(dump) = self.dump.as_mut() {
            if let Err(e) = dump.write_section(title, words) {
                warn!("⚠️ Command dump disabled: {:#}", e);
                self.dump = None;
            }
        }
        self.tx.write_words(&mut self.hw, words)
    }

    /// Configure every chip and prepare digital injection
    pub fn init(&mut self) -> Result<()> {
        info!("🔧 Configuring {} chip(s)", self.chips.len());
        self.tx.set_cmd_enable(&mut self.hw, self.tx_mask)?;
        self.rx.set_rx_enable(&mut self.hw, 0)?;

        for i in 0..self.chips.len() {
            let chip = &mut self.chips[i];
            chip.cfg.global.set(FieldId::DigHitInSel, 1);
            chip.cfg.global.set(FieldId::CalPulseWidth, self.cfg.cal_pulse_width);
            chip.cfg.global.set(FieldId::TrigCount, 1);

            let mut words = vec![chip.run_mode(false)];
            words.extend(chip.configure());
            let title = format!("configure {}", chip.name());
            self.send(&title, &words)?;
            self.tx.wait_cmd_empty(&mut self.hw, self.cfg.cmd_poll_limit)?;
        }
        Ok(())
    }

    /// Run all mask stages. The clipboard is finished on every exit path so
    /// the consumer always sees end of stream.
    pub fn run(&mut self) -> Result<ScanSummary> {
        let result = self.run_stages();
        self.clipboard.finish();
        match result {
            Ok(()) => Ok(self.summary),
            Err(e) => {
                if e.is_fatal() {
                    error!("💥 Fatal hardware error, terminating run: {}", e);
                } else {
                    error!("❌ Scan failed: {}", e);
                }
                Err(e)
            }
        }
    }

    fn run_stages(&mut self) -> Result<()> {
        let gen = MaskGenerator::new(self.cfg.mask_stage);
        let stages = gen.stage_count();
        self.summary.stages_total = stages;
        let enable_plane = PixelAttribute::Enable.first_plane();
        let start = Instant::now();

        info!("🚀 Starting {} with {} ({} stages, {} triggers each)", TEST_TYPE, self.cfg.mask_stage, stages, self.cfg.trigger_count);

        for stage in 0..stages {
            if !self.running.load(Ordering::SeqCst) {
                warn!("🛑 Stop requested, {} of {} stages done", stage, stages);
                self.summary.stopped = true;
                break;
            }

            let mask = gen.stage(stage);
            let mut words = Vec::new();
            for chip in self.chips.iter_mut() {
                chip.cfg.pixels.set_plane_all(enable_plane, &mask);
                words.push(chip.run_mode(false));
                words.extend(chip.configure_attribute(PixelAttribute::Enable));
            }
            self.send(&format!("stage {} mask", stage), &words)?;

            self.rx.set_rx_enable(&mut self.hw, self.rx_mask)?;
            self.tx.wait_cmd_empty(&mut self.hw, self.cfg.cmd_poll_limit)?;

            let run_words: Vec<u32> = self.chips.iter().map(|c| c.run_mode(true)).collect();
            self.send(&format!("stage {} run", stage), &run_words)?;
            // broadcast: every chip in run mode answers the same sequence
            let trigger = self.chips.first().map(|c| c.cal_trigger(self.cfg.trigger_delay));
            if let Some(trigger) = trigger {
                for _ in 0..self.cfg.trigger_count {
                    self.tx.write_words(&mut self.hw, &trigger)?;
                    self.poll_once()?;
                }
                if let Some(dump) = self.dump.as_mut() {
                    let title = format!("stage {} trigger x{}", stage, self.cfg.trigger_count);
                    if let Err(e) = dump.write_section(&title, &trigger) {
                        warn!("⚠️ Command dump disabled: {:#}", e);
                        self.dump = None;
                    }
                }
            }
            self.tx.wait_cmd_empty(&mut self.hw, self.cfg.cmd_poll_limit)?;

            let conf_words: Vec<u32> = self.chips.iter().map(|c| c.run_mode(false)).collect();
            self.send(&format!("stage {} conf", stage), &conf_words)?;
            self.rx.set_rx_enable(&mut self.hw, 0)?;
            self.drain()?;

            self.summary.stages_completed += 1;
            info!(
                "✅ Stage {}/{} done ({} enabled pixels per chip, {} records so far)",
                stage + 1,
                stages,
                mask.count_ones() as usize * fecore::geometry::N_DC,
                self.summary.records
            );
        }

        if let Some(dump) = self.dump.as_mut() {
            if let Err(e) = dump.flush() {
                warn!("⚠️ Failed to flush command dump: {:#}", e);
            }
        }

        let stats = self.rx.stats();
        info!("📈 Scan final stats:");
        info!("   Stages: {}/{}", self.summary.stages_completed, stages);
        info!("   Records: {}", self.summary.records);
        info!("   Words: {}", self.summary.words);
        info!("   Empty polls: {}", stats.empty_polls);
        info!("   Rejected counts: {}", stats.rejected_counts);
        info!("   Duration: {:.1}s", start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Transfer one block if the receive path has one
    fn poll_once(&mut self) -> Result<bool> {
        match self.rx.read_data(&mut self.hw)? {
            Some(data) => {
                self.summary.records += 1;
                self.summary.words += data.word_count as u64;
                self.clipboard.push(data)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Poll until `rx_idle_polls` consecutive polls find nothing
    fn drain(&mut self) -> Result<()> {
        let mut idle = 0;
        let mut blocks = 0;
        while idle < self.cfg.rx_idle_polls {
            if self.poll_once()? {
                idle = 0;
                blocks += 1;
            } else {
                idle += 1;
            }
        }
        debug!("Drained {} blocks", blocks);
        Ok(())
    }
}
