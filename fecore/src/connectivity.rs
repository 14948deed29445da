/*!
JSON documents handed to the metadata service after a run.

The service ingests `connectivity.json` (what was scanned) and
`scanLog.json` (how the run went, where the raw data is). Field names
follow the service's camelCase schema.
*/

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Result;
use crate::geometry::{N_COLUMNS, N_DC, N_ROWS};

pub const CHIP_TYPE_FEI4B: &str = "FE-I4B";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    pub serial_number: String,
    pub component_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geometry {
    pub columns: usize,
    pub rows: usize,
    pub double_columns: usize,
}

impl Geometry {
    pub fn fei4() -> Self {
        Self { columns: N_COLUMNS, rows: N_ROWS, double_columns: N_DC }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChipEntry {
    pub serial_number: String,
    pub chip_id: u8,
    pub tx: u32,
    pub rx: u32,
    /// Chip configuration file, relative to the run directory
    pub config: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connectivity {
    pub module: ModuleInfo,
    pub chip_type: String,
    pub geometry: Geometry,
    pub chips: Vec<ChipEntry>,
}

impl Connectivity {
    pub fn new(module_serial: impl Into<String>) -> Self {
        Self {
            module: ModuleInfo { serial_number: module_serial.into(), component_type: "module".to_string() },
            chip_type: CHIP_TYPE_FEI4B.to_string(),
            geometry: Geometry::fei4(),
            chips: Vec::new(),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json(self, path)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Done,
    Aborted,
    Failed,
}

/// Run summary pointing at the raw artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanLog {
    pub test_type: String,
    pub run_number: u32,
    pub start_time: String,
    pub finish_time: Option<String>,
    pub mask_stage: String,
    pub stages_completed: u32,
    pub records: u64,
    pub words: u64,
    /// Raw output file, relative to the run directory
    pub raw_data: PathBuf,
    pub connectivity: PathBuf,
    pub status: RunStatus,
}

impl ScanLog {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json(self, path)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json(path)
    }
}

fn save_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

fn load_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_connectivity_keys() {
        let mut conn = Connectivity::new("M-001");
        conn.chips.push(ChipEntry {
            serial_number: "chip0".to_string(),
            chip_id: 0,
            tx: 0,
            rx: 0,
            config: PathBuf::from("chip0.json.before"),
        });
        let json = serde_json::to_value(&conn).unwrap();
        assert_eq!(json["module"]["serialNumber"], "M-001");
        assert_eq!(json["chipType"], "FE-I4B");
        assert_eq!(json["geometry"]["doubleColumns"], 40);
        assert_eq!(json["chips"][0]["chipId"], 0);
    }

    #[test]
    fn test_scan_log_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scanLog.json");
        let log = ScanLog {
            test_type: "digitalscan".to_string(),
            run_number: 7,
            start_time: "2026-01-01T00:00:00+00:00".to_string(),
            finish_time: None,
            mask_stage: "mask8".to_string(),
            stages_completed: 3,
            records: 12,
            words: 4096,
            raw_data: PathBuf::from("digitalscan.raw"),
            connectivity: PathBuf::from("connectivity.json"),
            status: RunStatus::Aborted,
        };
        log.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"stagesCompleted\": 3"));
        assert!(text.contains("\"status\": \"aborted\""));
        assert_eq!(ScanLog::load(&path).unwrap(), log);
    }
}
