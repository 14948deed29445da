/*!
Run directory layout and the files handed to the metadata service.

Every run gets `<output>/<run number:06>_<test type>/` holding the raw
stream, the chip configurations before and after the scan,
`connectivity.json` and `scanLog.json`.
*/

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Local;
use fecore::connectivity::{ChipEntry, Connectivity, RunStatus, ScanLog};
use fecore::Fei4;
use regex::Regex;
use tracing::{debug, info};

use crate::config::AppConfig;

pub const CONNECTIVITY_FILE: &str = "connectivity.json";
pub const SCAN_LOG_FILE: &str = "scanLog.json";

/// Highest run number found in `output_dir` plus one (1 for a new directory)
pub fn next_run_number<P: AsRef<Path>>(output_dir: P) -> Result<u32> {
    let pattern = Regex::new(r"^(\d{6})_").context("Failed to compile run directory pattern")?;
    let mut max_run = 0u32;

    if let Ok(entries) = fs::read_dir(output_dir.as_ref()) {
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Some(run) = pattern.captures(name).and_then(|c| c[1].parse::<u32>().ok()) {
                    max_run = max_run.max(run);
                }
            }
        }
    }

    Ok(max_run + 1)
}

/// One run directory
#[derive(Debug, Clone)]
pub struct RunSession {
    pub run_number: u32,
    pub test_type: String,
    pub run_dir: PathBuf,
    pub start_time: String,
}

impl RunSession {
    /// Pick the next run number and create its directory
    pub fn create<P: AsRef<Path>>(output_dir: P, test_type: &str) -> Result<Self> {
        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

        let run_number = next_run_number(output_dir)?;
        let run_dir = output_dir.join(format!("{:06}_{}", run_number, test_type));
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        info!("📁 Run {} in {}", run_number, run_dir.display());
        Ok(Self {
            run_number,
            test_type: test_type.to_string(),
            run_dir,
            start_time: Local::now().to_rfc3339(),
        })
    }

    pub fn raw_file_name(&self) -> String {
        format!("{}.raw", self.test_type)
    }

    pub fn raw_path(&self) -> PathBuf {
        self.run_dir.join(self.raw_file_name())
    }

    pub fn command_dump_path(&self) -> PathBuf {
        self.run_dir.join(format!("{}.commands.txt", self.test_type))
    }

    fn chip_config_name(chip: &Fei4, suffix: &str) -> String {
        format!("{}.json.{}", chip.name(), suffix)
    }

    /// Store chip configurations as `<name>.json.<suffix>`
    pub fn save_chip_configs(&self, chips: &[Fei4], suffix: &str) -> Result<()> {
        let mut names = HashSet::new();
        for chip in chips {
            if !names.insert(chip.name()) {
                bail!("two chips are named {}, their configurations would collide", chip.name());
            }
        }
        for chip in chips {
            let path = self.run_dir.join(Self::chip_config_name(chip, suffix));
            chip.save(&path)
                .with_context(|| format!("Failed to write chip configuration: {}", path.display()))?;
            debug!("Saved {}", path.display());
        }
        Ok(())
    }

    pub fn write_connectivity(&self, config: &AppConfig, chips: &[Fei4]) -> Result<Connectivity> {
        let mut conn = Connectivity::new(config.module_serial.clone());
        for (conn_cfg, chip) in config.chips.iter().zip(chips) {
            conn.chips.push(ChipEntry {
                serial_number: conn_cfg.serial_number.clone(),
                chip_id: chip.chip_id(),
                tx: conn_cfg.tx,
                rx: conn_cfg.rx,
                config: PathBuf::from(Self::chip_config_name(chip, "before")),
            });
        }
        let path = self.run_dir.join(CONNECTIVITY_FILE);
        conn.save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(conn)
    }

    /// Scan log for the current state of the run
    pub fn scan_log(&self, mask_stage: &str) -> ScanLog {
        ScanLog {
            test_type: self.test_type.clone(),
            run_number: self.run_number,
            start_time: self.start_time.clone(),
            finish_time: None,
            mask_stage: mask_stage.to_string(),
            stages_completed: 0,
            records: 0,
            words: 0,
            raw_data: PathBuf::from(self.raw_file_name()),
            connectivity: PathBuf::from(CONNECTIVITY_FILE),
            status: RunStatus::Running,
        }
    }

    pub fn write_scan_log(&self, log: &ScanLog) -> Result<()> {
        let path = self.run_dir.join(SCAN_LOG_FILE);
        log.save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// Hex listing of the command words sent per mask stage
pub struct CommandDump {
    out: BufWriter<File>,
}

impl CommandDump {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create command dump: {}", path.as_ref().display()))?;
        Ok(Self { out: BufWriter::new(file) })
    }

    pub fn write_section(&mut self, title: &str, words: &[u32]) -> Result<()> {
        writeln!(self.out, "# {} ({} words)", title, words.len())?;
        for word in words {
            writeln!(self.out, "{}", hex::encode(word.to_be_bytes()))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_run_numbers_continue() {
        let dir = tempdir().unwrap();
        assert_eq!(next_run_number(dir.path()).unwrap(), 1);

        fs::create_dir(dir.path().join("000007_digitalscan")).unwrap();
        fs::create_dir(dir.path().join("000003_digitalscan")).unwrap();
        fs::create_dir(dir.path().join("notes")).unwrap();
        File::create(dir.path().join("000099_stray.txt")).unwrap();
        assert_eq!(next_run_number(dir.path()).unwrap(), 8);

        let session = RunSession::create(dir.path(), "digitalscan").unwrap();
        assert_eq!(session.run_number, 8);
        assert!(session.run_dir.ends_with("000008_digitalscan"));
        assert!(session.raw_path().ends_with("digitalscan.raw"));
    }

    #[test]
    fn test_metadata_files() {
        let dir = tempdir().unwrap();
        let session = RunSession::create(dir.path(), "digitalscan").unwrap();
        let config = AppConfig::new();
        let chips = vec![Fei4::new("chip0", 0)];

        session.save_chip_configs(&chips, "before").unwrap();
        let conn = session.write_connectivity(&config, &chips).unwrap();
        assert_eq!(conn.chips[0].config, PathBuf::from("chip0.json.before"));
        assert!(session.run_dir.join("chip0.json.before").exists());

        assert_eq!(conn.chips[0].chip_id, 0);

        let mut log = session.scan_log("mask8");
        log.status = RunStatus::Done;
        session.write_scan_log(&log).unwrap();
        let back = ScanLog::load(session.run_dir.join(SCAN_LOG_FILE)).unwrap();
        assert_eq!(back.raw_data, PathBuf::from("digitalscan.raw"));
        assert_eq!(back.status, RunStatus::Done);
    }

    #[test]
    fn test_command_dump() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dump.txt");
        let mut dump = CommandDump::create(&path).unwrap();
        dump.write_section("stage 0", &[0x005A_0996, 0x1D]).unwrap();
        dump.flush().unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "# stage 0 (2 words)\n005a0996\n0000001d\n");
    }

    #[test]
    fn test_connectivity_uses_scanned_chip_id() {
        let dir = tempdir().unwrap();
        let session = RunSession::create(dir.path(), "digitalscan").unwrap();
        let config = AppConfig::new();
        // chip loaded from a file whose id differs from the connection entry
        let chips = vec![Fei4::new("chip0", 5)];
        let conn = session.write_connectivity(&config, &chips).unwrap();
        assert_eq!(conn.chips[0].chip_id, 5);
        let back = Connectivity::load(session.run_dir.join(CONNECTIVITY_FILE)).unwrap();
        assert_eq!(back.chips[0].chip_id, 5);
    }

    #[test]
    fn test_duplicate_chip_names_rejected() {
        let dir = tempdir().unwrap();
        let session = RunSession::create(dir.path(), "digitalscan").unwrap();
        let chips = vec![Fei4::new("chipA", 0), Fei4::new("chipA", 1)];
        assert!(session.save_chip_configs(&chips, "before").is_err());
        assert!(!session.run_dir.join("chipA.json.before").exists());
    }
}
