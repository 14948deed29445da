/*!
FE-I4 chip object.

A [`Fei4`] is composed of its configuration ([`Fei4Cfg`]) and a command
builder ([`Fei4Cmd`]). Every operation updates the configuration where
needed and returns the command words to send; transmission is up to the
caller.
*/

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::ops::Range;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bitfield::{FieldId, GlobalRegisters};
use crate::command::Fei4Cmd;
use crate::error::{FeError, Result};
use crate::geometry::{N_COLUMNS, N_DC, N_PLANES, N_ROWS, WORDS_PER_DC};
use crate::pixel::{PixelAttribute, PixelConfig};

/// Width of the global pulse used for latching and shifting
pub const PULSE_WIDTH: u32 = 10;

/// Column pair selection for front-end writes and pulses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcMode {
    /// Only the double column in `Colpr_Addr`
    Single = 0x0,
    Quad = 0x1,
    Octa = 0x2,
    All = 0x3,
}

/// Strobe value latching pixel plane `plane`. The strobe field is stored
/// MSB first, so plane `p` ends up on physical strobe bit `p`.
pub fn plane_strobe(plane: usize) -> u32 {
    assert!(plane < N_PLANES, "plane {} out of range", plane);
    1 << (N_PLANES - 1 - plane)
}

/// Global and pixel configuration of one chip
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fei4Cfg {
    pub global: GlobalRegisters,
    pub pixels: PixelConfig,
}

#[derive(Debug, Clone)]
pub struct Fei4 {
    name: String,
    pub cfg: Fei4Cfg,
    cmd: Fei4Cmd,
}

impl Fei4 {
    /// Chip with default global registers and all pixel attributes zero
    pub fn new(name: impl Into<String>, chip_id: u8) -> Self {
        Self { name: name.into(), cfg: Fei4Cfg::default(), cmd: Fei4Cmd::new(chip_id) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chip_id(&self) -> u8 {
        self.cmd.chip_id()
    }

    pub fn cmd(&self) -> &Fei4Cmd {
        &self.cmd
    }

    /// Set a field and write the register holding it
    pub fn write_field(&mut self, field: FieldId, value: u32) -> [u32; 2] {
        self.cfg.global.set(field, value);
        self.write_register(field)
    }

    /// Write the register holding `field` with its current content
    pub fn write_register(&self, field: FieldId) -> [u32; 2] {
        let addr = field.address();
        self.cmd.wr_register(addr, self.cfg.global.register(addr))
    }

    /// Every writable global register
    pub fn configure_global(&self) -> Vec<u32> {
        let chip_sn = FieldId::ChipSn.address();
        GlobalRegisters::used_addresses()
            .into_iter()
            .filter(|&addr| addr != chip_sn)
            .flat_map(|addr| self.cmd.wr_register(addr, self.cfg.global.register(addr)))
            .collect()
    }

    /// Shift the given bit-planes into every double column and latch them
    pub fn configure_pixels(&mut self, planes: Range<usize>) -> Vec<u32> {
        assert!(planes.end <= N_PLANES, "plane range {:?} out of range", planes);
        let mut words = Vec::with_capacity(planes.len() * (N_DC * (WORDS_PER_DC + 3) + 11));
        for plane in planes {
            self.cfg.global.set(FieldId::ColprMode, DcMode::Single as u32);
            for dc in 0..N_DC {
                words.extend(self.write_field(FieldId::ColprAddr, dc as u32));
                let stream = *self.cfg.pixels.plane_stream(plane, dc);
                words.extend(self.cmd.wr_front_end(&stream));
            }
            words.extend(self.load_into_pixel(plane_strobe(plane)));
        }
        words
    }

    /// Planes of one attribute, see [`configure_pixels`](Self::configure_pixels)
    pub fn configure_attribute(&mut self, attr: PixelAttribute) -> Vec<u32> {
        self.configure_pixels(attr.planes())
    }

    /// Full configuration: global registers, then all pixel planes
    pub fn configure(&mut self) -> Vec<u32> {
        let mut words = self.configure_global();
        words.extend(self.configure_pixels(0..N_PLANES));
        debug!("Chip {} configuration: {} words", self.name, words.len());
        words
    }

    pub fn run_mode(&self, run: bool) -> u32 {
        self.cmd.run_mode(run)
    }

    pub fn global_reset(&self) -> u32 {
        self.cmd.global_reset()
    }

    /// Load `pattern` into the shift register of every double column
    pub fn init_mask(&mut self, pattern: u32) -> Vec<u32> {
        self.cfg.global.set(FieldId::ColprMode, DcMode::All as u32);
        let mut words = self.write_field(FieldId::ColprAddr, 0).to_vec();
        words.extend(self.cmd.wr_front_end(&[pattern; WORDS_PER_DC]));
        words
    }

    /// Clock the shift registers of every double column by one position
    pub fn shift_mask(&mut self) -> Vec<u32> {
        let mut words = self.write_field(FieldId::ColprMode, DcMode::All as u32).to_vec();
        words.extend(self.write_field(FieldId::SrClock, 1));
        words.push(self.cmd.global_pulse(PULSE_WIDTH));
        words.extend(self.write_field(FieldId::SrClock, 0));
        words
    }

    /// Copy the shift registers into the pixel latches selected by the
    /// strobe value `latch`
    pub fn load_into_pixel(&mut self, latch: u32) -> Vec<u32> {
        let mut words = self.write_field(FieldId::ColprMode, DcMode::All as u32).to_vec();
        words.extend(self.write_field(FieldId::PixelLatchStrobe, latch));
        words.extend(self.write_field(FieldId::LatchEnable, 1));
        words.push(self.cmd.global_pulse(PULSE_WIDTH));
        words.extend(self.write_field(FieldId::LatchEnable, 0));
        words.extend(self.write_field(FieldId::PixelLatchStrobe, 0));
        words
    }

    /// Copy the pixel latch selected by `latch` back into the shift
    /// registers. S0 and S1 high turn the `SR_Clock` pulse into a parallel
    /// load.
    pub fn load_into_shift_reg(&mut self, latch: u32) -> Vec<u32> {
        let mut words = self.write_field(FieldId::ColprMode, DcMode::All as u32).to_vec();
        self.cfg.global.set(FieldId::S0, 1);
        self.cfg.global.set(FieldId::S1, 1);
        words.extend(self.write_field(FieldId::PixelLatchStrobe, latch));
        words.extend(self.write_field(FieldId::SrClock, 1));
        words.push(self.cmd.global_pulse(PULSE_WIDTH));
        words.extend(self.write_field(FieldId::SrClock, 0));
        self.cfg.global.set(FieldId::S0, 0);
        self.cfg.global.set(FieldId::S1, 0);
        words.extend(self.write_field(FieldId::PixelLatchStrobe, 0));
        words
    }

    pub fn cal_trigger(&self, delay: u32) -> Vec<u32> {
        self.cmd.cal_trigger(delay)
    }

    pub fn to_config_file(&self) -> ChipConfigFile {
        let pixels = (0..N_ROWS)
            .map(|row| PixelRow {
                row,
                attributes: PixelAttribute::ALL
                    .iter()
                    .map(|&attr| {
                        let values = (0..N_COLUMNS).map(|col| self.cfg.pixels.get_pixel(attr, col, row)).collect();
                        (attr.name().to_string(), values)
                    })
                    .collect(),
            })
            .collect();
        ChipConfigFile {
            fe: ChipConfig {
                parameter: Parameter { name: self.name.clone(), chip_id: self.chip_id() },
                global: self.cfg.global.to_named(),
                pixels,
            },
        }
    }

    /// Build a chip from a configuration file. Global fields not named in the
    /// file keep their defaults, pixel rows not listed stay zero.
    pub fn from_config_file(file: &ChipConfigFile) -> Result<Self> {
        let fe = &file.fe;
        if fe.parameter.chip_id >= 16 {
            return Err(FeError::config(format!("chip id {} does not fit 4 bits", fe.parameter.chip_id)));
        }
        let mut chip = Self::new(fe.parameter.name.clone(), fe.parameter.chip_id);
        chip.cfg.global.apply_named(&fe.global)?;

        for row in &fe.pixels {
            if row.row >= N_ROWS {
                return Err(FeError::config(format!("pixel row {} outside matrix", row.row)));
            }
            for (name, values) in &row.attributes {
                let attr = PixelAttribute::from_name(name)
                    .ok_or_else(|| FeError::config(format!("unknown pixel attribute '{}'", name)))?;
                if values.len() != N_COLUMNS {
                    return Err(FeError::config(format!(
                        "row {} {} has {} columns, expected {}",
                        row.row,
                        name,
                        values.len(),
                        N_COLUMNS
                    )));
                }
                for (col, &value) in values.iter().enumerate() {
                    if value > attr.descriptor().mask() {
                        return Err(FeError::config(format!(
                            "{} value {} at ({}, {}) does not fit {} bits",
                            name,
                            value,
                            col,
                            row.row,
                            attr.bit_width()
                        )));
                    }
                    chip.cfg.pixels.set_pixel(attr, col, row.row, value);
                }
            }
        }
        Ok(chip)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(writer, &self.to_config_file())?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let file: ChipConfigFile = serde_json::from_reader(reader)?;
        Self::from_config_file(&file)
    }
}

/// Chip configuration JSON document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChipConfigFile {
    #[serde(rename = "FE-I4B")]
    pub fe: ChipConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChipConfig {
    #[serde(rename = "Parameter")]
    pub parameter: Parameter,
    #[serde(rename = "GlobalConfig", default)]
    pub global: BTreeMap<String, u32>,
    #[serde(rename = "PixelConfig", default)]
    pub pixels: Vec<PixelRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "chipId")]
    pub chip_id: u8,
}

/// One pixel row: every attribute as a column-indexed array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelRow {
    #[serde(rename = "Row")]
    pub row: usize,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Vec<u32>>,
}
