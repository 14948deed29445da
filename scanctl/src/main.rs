/*!
# Scan Control Application

Runs mask-staged digital scans on FE-I4 front ends and records the raw
receive stream together with the run metadata.

## Features

- Mask-staged digital injection scan with configurable trigger count
- DMA readout through a bounded clipboard into a dedicated writer thread
- Memory-mapped firmware access or a behavioral chip emulator
- Connectivity and scan log files for the run database
- Register command encoding for FE-I4 and Star front ends

## Usage

### Scan against the emulator
```bash
scanctl scan --emulate --output-dir ./data
```

### Scan with a configuration file
```bash
scanctl scan --config scan.toml
```

### Encode a Star register write
```bash
scanctl encode star --hcc 0xF --abc 0x3 --address 0x20 --value 0xDEADBEEF
```
*/

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use fecore::connectivity::RunStatus;
use fecore::hw::UioController;
use fecore::raw::read_records;
use fecore::{ClipBoard, CommandEncoder, Fei4, Fei4Cmd, HwController, StarCmd};
use tracing::{info, warn, Level};

mod config;
mod emulator;
mod scan;
mod session;
mod writer;

use config::{AppConfig, Backend};
use emulator::{DataWord, EmuController};
use scan::{ScanOrchestrator, TEST_TYPE};
use session::{CommandDump, RunSession};

#[derive(Parser)]
#[command(name = "scanctl")]
#[command(about = "Mask-staged front-end scans with raw data capture")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a digital scan
    Scan {
        /// Configuration file path (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Use the chip emulator instead of the hardware
        #[arg(long)]
        emulate: bool,

        /// Override the base directory for run directories
        #[arg(short, long)]
        output_dir: Option<String>,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "scan.toml")]
        output: PathBuf,
    },

    /// Print the command words for a register access
    Encode {
        #[command(subcommand)]
        protocol: EncodeProtocol,
    },

    /// Summarize a raw data file
    Inspect {
        /// Raw stream written by a scan
        file: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum EncodeProtocol {
    /// Star serial protocol (6b8b frames)
    Star {
        #[arg(long, value_parser = parse_number)]
        hcc: u32,
        #[arg(long, value_parser = parse_number)]
        abc: u32,
        #[arg(long, value_parser = parse_number)]
        address: u32,
        #[arg(long, value_parser = parse_number, default_value = "0")]
        value: u32,
        /// Encode a read instead of a write
        #[arg(long)]
        read: bool,
    },
    /// FE-I4 parallel protocol
    Fei4 {
        #[arg(long, value_parser = parse_number, default_value = "8")]
        chip_id: u32,
        #[arg(long, value_parser = parse_number)]
        address: u32,
        #[arg(long, value_parser = parse_number, default_value = "0")]
        value: u32,
        #[arg(long)]
        read: bool,
    },
}

/// Decimal or 0x-prefixed hexadecimal
fn parse_number(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    // Logs go to stderr to keep stdout clean for command listings
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    match cli.command {
        Commands::Scan { config, emulate, output_dir } => run_scan(config, emulate, output_dir),
        Commands::Config { output } => generate_config_file(output),
        Commands::Encode { protocol } => encode(protocol),
        Commands::Inspect { file, json } => inspect(file, json),
    }
}

fn load_chips(config: &AppConfig) -> Result<Vec<Fei4>> {
    let mut chips = Vec::with_capacity(config.chips.len());
    for conn in &config.chips {
        let chip = match &conn.config {
            Some(path) => {
                let chip = Fei4::load(path)
                    .with_context(|| format!("Failed to load chip configuration: {}", path.display()))?;
                if chip.chip_id() != conn.chip_id {
                    warn!(
                        "⚠️ {}: file chip id {} differs from connectivity chip id {}, using file",
                        conn.serial_number,
                        chip.chip_id(),
                        conn.chip_id
                    );
                }
                chip
            }
            None => Fei4::new(conn.serial_number.clone(), conn.chip_id),
        };
        chips.push(chip);
    }
    Ok(chips)
}

fn open_backend(config: &AppConfig) -> Result<Box<dyn HwController>> {
    match config.hardware.backend {
        Backend::Emulator => {
            println!("🧪 Using the chip emulator");
            Ok(Box::new(EmuController::new()))
        }
        Backend::Uio => {
            let hw = &config.hardware;
            println!("🔌 Register device: {}", hw.register_device.display());
            println!("📡 DMA device: {}", hw.dma_device.display());
            let controller = UioController::open(
                &hw.register_device,
                hw.register_window_bytes,
                &hw.dma_device,
                hw.dma_window_bytes,
            )
            .context("Failed to map hardware devices")?;
            Ok(Box::new(controller))
        }
    }
}

/// Run a digital scan and write the run directory
fn run_scan(config_path: Option<PathBuf>, emulate: bool, output_dir: Option<String>) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::new(),
    };
    if emulate {
        config.hardware.backend = Backend::Emulator;
    }
    if let Some(dir) = output_dir {
        config.scan.output_directory = dir;
    }
    config.validate()?;

    println!("🚀 Starting {} ({})", TEST_TYPE, config.scan.mask_stage);
    println!("💾 Output directory: {}", config.scan.output_directory);

    let session = RunSession::create(&config.scan.output_directory, TEST_TYPE)?;
    let chips = load_chips(&config)?;
    session.save_chip_configs(&chips, "before")?;
    session.write_connectivity(&config, &chips)?;

    let mut log = session.scan_log(config.scan.mask_stage.name());
    session.write_scan_log(&log)?;

    let hw = open_backend(&config)?;

    let clipboard = Arc::new(ClipBoard::bounded(config.scan.clipboard_capacity));
    let writer = writer::spawn_writer(session.raw_path(), Arc::clone(&clipboard));

    let mut orchestrator = ScanOrchestrator::new(
        hw,
        chips,
        config.scan.clone(),
        config.tx_mask(),
        config.rx_mask(),
        Arc::clone(&clipboard),
    );
    if config.scan.dump_commands {
        orchestrator = orchestrator.with_command_dump(CommandDump::create(session.command_dump_path())?);
    }

    // Set up Ctrl+C handler
    let running = orchestrator.get_running_flag();
    ctrlc::set_handler(move || {
        println!("\n🛑 Received Ctrl+C, stopping after the current mask stage...");
        running.store(false, Ordering::SeqCst);
    })?;

    let result = match orchestrator.init() {
        Ok(()) => orchestrator.run(),
        Err(e) => {
            clipboard.finish();
            Err(e)
        }
    };

    let written = match writer.join() {
        Ok(stats) => stats,
        Err(_) => bail!("File writer thread panicked"),
    };

    session.save_chip_configs(orchestrator.chips(), "after")?;

    let summary = orchestrator.summary();
    log.finish_time = Some(Local::now().to_rfc3339());
    log.stages_completed = summary.stages_completed;
    log.records = summary.records;
    log.words = summary.words;
    log.status = match (&result, &written) {
        (Err(_), _) | (_, Err(_)) => RunStatus::Failed,
        (Ok(s), Ok(_)) if s.stopped => RunStatus::Aborted,
        _ => RunStatus::Done,
    };
    session.write_scan_log(&log)?;

    result.context("Scan failed")?;
    let written = written?;

    println!("✅ Scan completed: run {}", session.run_number);
    println!("📊 {} stages, {} records, {} words", summary.stages_completed, written.records, written.words);
    println!("📁 {}", session.run_dir.display());
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   scanctl scan --config {}", output_path.display());

    Ok(())
}

fn encode(protocol: EncodeProtocol) -> Result<()> {
    match protocol {
        EncodeProtocol::Star { hcc, abc, address, value, read } => {
            if hcc >= 16 || abc >= 16 {
                bail!("hcc and abc ids must be below 16");
            }
            if address >= 256 {
                bail!("Star register address must be below 256");
            }
            let cmd = StarCmd::new(hcc as u8, abc as u8);
            let frames = if read {
                cmd.read_register(address as u8)
            } else {
                cmd.write_register(address as u8, value)
            };
            let words = if read {
                CommandEncoder::from(cmd).register_read(address as u16)
            } else {
                CommandEncoder::from(cmd).register_write(address as u16, value)
            };
            println!("# frames");
            for frame in frames {
                println!("{:04x}", frame);
            }
            println!("# fifo words");
            for word in words {
                println!("{}", hex::encode(word.to_be_bytes()));
            }
            let decoded = StarCmd::decode_sequence(&frames)?;
            info!("Decoded back: {:?}", decoded);
        }
        EncodeProtocol::Fei4 { chip_id, address, value, read } => {
            if chip_id >= 16 {
                bail!("FE-I4 chip id must be below 16");
            }
            if address >= 64 {
                bail!("FE-I4 register address must be below 64");
            }
            if value > 0xFFFF {
                bail!("FE-I4 registers are 16 bits wide");
            }
            let encoder = CommandEncoder::from(Fei4Cmd::new(chip_id as u8));
            let words = if read {
                encoder.register_read(address as u16)
            } else {
                encoder.register_write(address as u16, value)
            };
            for word in words {
                println!("{}", hex::encode(word.to_be_bytes()));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Default, serde::Serialize)]
struct RawSummary {
    records: usize,
    words: u64,
    first_addresses: Vec<u32>,
    word_types: BTreeMap<&'static str, u64>,
}

fn summarize(records: &[fecore::RawData]) -> RawSummary {
    let mut summary = RawSummary { records: records.len(), ..RawSummary::default() };
    summary.first_addresses = records.iter().take(4).map(|r| r.start_address).collect();
    for record in records {
        summary.words += record.word_count as u64;
        for &word in record.valid_words() {
            let kind = match DataWord::decode(word) {
                DataWord::Header { .. } => "header",
                DataWord::Hit { .. } => "hit",
                DataWord::Address { .. } => "address",
                DataWord::Value { .. } => "value",
                DataWord::Unknown(_) => "unknown",
            };
            *summary.word_types.entry(kind).or_insert(0) += 1;
        }
    }
    summary
}

fn inspect(path: PathBuf, json: bool) -> Result<()> {
    let file = File::open(&path).with_context(|| format!("Failed to open raw file: {}", path.display()))?;
    let records = read_records(&mut BufReader::new(file))
        .with_context(|| format!("Failed to read raw file: {}", path.display()))?;
    let summary = summarize(&records);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("📄 {}", path.display());
    println!("   Records: {}", summary.records);
    println!("   Words: {}", summary.words);
    for addr in &summary.first_addresses {
        println!("   Block at 0x{:08x}", addr);
    }
    for (kind, count) in &summary.word_types {
        println!("   {}: {}", kind, count);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fecore::RawData;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), Ok(42));
        assert_eq!(parse_number("0x2A"), Ok(42));
        assert_eq!(parse_number("0XdeadBEEF"), Ok(0xDEAD_BEEF));
        assert!(parse_number("0xZZ").is_err());
        assert!(parse_number("-1").is_err());
    }

    #[test]
    fn test_summarize_counts_word_types() {
        let words = vec![0x00E9_0001, (1 << 17) | (1 << 8) | (6 << 4) | 0xF, 0x00EA_0019, 0x00EC_0800];
        let records = vec![RawData::new(0, words, 4), RawData::new(64, vec![0x00E9_0002; 32], 1)];
        let summary = summarize(&records);
        assert_eq!(summary.records, 2);
        assert_eq!(summary.words, 5);
        assert_eq!(summary.first_addresses, vec![0, 64]);
        assert_eq!(summary.word_types["header"], 2);
        assert_eq!(summary.word_types["hit"], 1);
        assert_eq!(summary.word_types["address"], 1);
        assert_eq!(summary.word_types["value"], 1);
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["scanctl", "-vv", "encode", "star", "--hcc", "0xF", "--abc", "3", "--address", "0x20"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Encode { protocol: EncodeProtocol::Star { hcc, abc, address, value, read } } => {
                assert_eq!((hcc, abc, address, value, read), (15, 3, 0x20, 0, false));
            }
            _ => panic!("wrong subcommand"),
        }
    }
}
