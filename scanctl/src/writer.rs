/*!
Clipboard consumer: appends raw records to the run's raw stream file.
*/

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use fecore::{ClipBoard, RawData};
use tracing::{error, info};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriterStats {
    pub records: u64,
    pub words: u64,
    pub bytes: u64,
}

/// Start the writer thread. It runs until the clipboard is finished and
/// drained.
pub fn spawn_writer(path: PathBuf, clipboard: Arc<ClipBoard<RawData>>) -> JoinHandle<Result<WriterStats>> {
    thread::spawn(move || match file_writer_thread(path, &clipboard) {
        Ok(stats) => {
            info!("File writer thread finished successfully");
            Ok(stats)
        }
        Err(e) => {
            error!("File writer thread failed: {:#}", e);
            Err(e)
        }
    })
}

fn file_writer_thread(path: PathBuf, clipboard: &ClipBoard<RawData>) -> Result<WriterStats> {
    let file = match File::create(&path) {
        Ok(file) => file,
        Err(e) => {
            // keep consuming so the producer never blocks on a full clipboard
            while clipboard.pop().is_some() {}
            return Err(e).with_context(|| format!("Failed to create raw file: {}", path.display()));
        }
    };
    let mut out = BufWriter::new(file);
    let mut stats = WriterStats::default();
    let mut failure = None;

    info!("📝 Writing raw data to {}", path.display());

    while let Some(record) = clipboard.pop() {
        if failure.is_some() {
            continue;
        }
        match record.write_to(&mut out) {
            Ok(()) => {
                stats.records += 1;
                stats.words += record.word_count as u64;
                stats.bytes += record.stream_len() as u64;
            }
            Err(e) => {
                error!("❌ Failed to write record {}: {}", stats.records, e);
                failure = Some(e);
            }
        }
    }

    if let Some(e) = failure {
        return Err(e).with_context(|| format!("Failed to write raw file: {}", path.display()));
    }
    out.flush()
        .with_context(|| format!("Failed to flush raw file: {}", path.display()))?;

    info!("📊 File writer final stats:");
    info!("   Records: {}", stats.records);
    info!("   Words: {}", stats.words);
    info!("   Bytes: {:.1} KB", stats.bytes as f64 / 1000.0);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fecore::raw::read_records;
    use std::io::BufReader;
    use tempfile::tempdir;

    #[test]
    fn test_writer_drains_clipboard_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("digitalscan.raw");
        let clipboard = Arc::new(ClipBoard::bounded(2));
        let handle = spawn_writer(path.clone(), Arc::clone(&clipboard));

        for i in 0..20u32 {
            clipboard.push(RawData::new(i * 32, vec![i; 32], 3)).unwrap();
        }
        clipboard.finish();

        let stats = handle.join().unwrap().unwrap();
        assert_eq!(stats, WriterStats { records: 20, words: 60, bytes: 20 * 5 * 4 });

        let records = read_records(&mut BufReader::new(File::open(&path).unwrap())).unwrap();
        assert_eq!(records.len(), 20);
        assert_eq!(records[7].start_address, 7 * 32);
        assert_eq!(records[7].valid_words(), &[7, 7, 7]);
    }

    #[test]
    fn test_unwritable_path_still_drains() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("out.raw");
        let clipboard = Arc::new(ClipBoard::bounded(1));
        let handle = spawn_writer(path, Arc::clone(&clipboard));
        for i in 0..5u32 {
            clipboard.push(RawData::new(i, vec![0; 32], 1)).unwrap();
        }
        clipboard.finish();
        assert!(handle.join().unwrap().is_err());
    }
}
