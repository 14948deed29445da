/*!
Configuration management for scan runs.
*/

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use fecore::{FieldId, MaskStage};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Module serial number reported in the connectivity file
    pub module_serial: String,
    pub scan: ScanConfig,
    pub hardware: HardwareConfig,
    pub chips: Vec<ChipConnection>,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            module_serial: "module-000".to_string(),
            scan: ScanConfig::default(),
            hardware: HardwareConfig::default(),
            chips: vec![ChipConnection::default()],
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Reject settings the scan cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chips.is_empty() {
            bail!("at least one [[chips]] entry is required");
        }
        let mut serials = HashSet::new();
        for chip in &self.chips {
            if !serials.insert(chip.serial_number.as_str()) {
                bail!("chip serial number {} is listed more than once", chip.serial_number);
            }
            if chip.chip_id >= 16 {
                bail!("chip {}: chip_id {} does not fit 4 bits", chip.serial_number, chip.chip_id);
            }
            if chip.tx >= 32 || chip.rx >= 32 {
                bail!("chip {}: tx/rx channel must be below 32", chip.serial_number);
            }
        }
        if self.scan.clipboard_capacity == 0 {
            bail!("scan.clipboard_capacity must be at least 1");
        }
        if self.scan.cmd_poll_limit == 0 {
            bail!("scan.cmd_poll_limit must be at least 1");
        }
        let pulse_width = FieldId::CalPulseWidth.descriptor();
        if self.scan.cal_pulse_width > pulse_width.mask() {
            bail!(
                "scan.cal_pulse_width {} does not fit the {}-bit CalPulseWidth field",
                self.scan.cal_pulse_width,
                pulse_width.bit_width()
            );
        }
        Ok(())
    }

    /// TX enable mask covering every configured chip
    pub fn tx_mask(&self) -> u32 {
        self.chips.iter().fold(0, |mask, c| mask | (1 << c.tx))
    }

    /// RX enable mask covering every configured chip
    pub fn rx_mask(&self) -> u32 {
        self.chips.iter().fold(0, |mask, c| mask | (1 << c.rx))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Scan loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Mask stepping ("mask1" .. "mask32", "none")
    pub mask_stage: MaskStage,

    /// Injections per mask stage
    pub trigger_count: u32,

    /// Bunch crossings between calibration pulse and trigger
    pub trigger_delay: u32,

    /// Digital injection pulse width
    pub cal_pulse_width: u32,

    /// Base directory for run directories
    pub output_directory: String,

    /// Records buffered between acquisition and writer
    pub clipboard_capacity: usize,

    /// Polls of the TX empty flag before giving up
    pub cmd_poll_limit: u32,

    /// Consecutive empty RX polls that end a drain
    pub rx_idle_polls: u32,

    /// Write every stage's command words as hex next to the raw data
    pub dump_commands: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mask_stage: MaskStage::Mask8,
            trigger_count: 50,
            trigger_delay: 48,
            cal_pulse_width: 10,
            output_directory: "./data".to_string(),
            clipboard_capacity: 1024,
            cmd_poll_limit: 100_000,
            rx_idle_polls: 10,
            dump_commands: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Software FE-I4 model
    Emulator,
    /// Memory-mapped firmware
    Uio,
}

/// Hardware access settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    pub backend: Backend,

    /// Register space device
    pub register_device: PathBuf,

    /// DMA window device
    pub dma_device: PathBuf,

    pub register_window_bytes: usize,

    pub dma_window_bytes: usize,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Emulator,
            register_device: PathBuf::from(fecore::hw::uio::UIO_REGISTERS),
            dma_device: PathBuf::from(fecore::hw::uio::UIO_DMA),
            register_window_bytes: 0x14000 * 4,
            dma_window_bytes: 256 * 1024 * 4,
        }
    }
}

/// One chip and the link channels it is connected to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChipConnection {
    pub serial_number: String,
    pub chip_id: u8,
    pub tx: u32,
    pub rx: u32,
    /// Chip configuration JSON; defaults are used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PathBuf>,
}

impl Default for ChipConnection {
    fn default() -> Self {
        Self {
            serial_number: "chip0".to_string(),
            chip_id: 0,
            tx: 0,
            rx: 0,
            config: None,
        }
    }
}
