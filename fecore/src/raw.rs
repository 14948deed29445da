/*!
Raw acquisition records and their on-disk stream format.

A record is one DMA block. On disk each record is stored as
`[start address][word count][words...]`, all little-endian `u32`, and only
the valid words are written.
*/

use std::io::{self, Read, Write};

use crate::error::Result;
use crate::rx::MAX_FIFO_WORDS;

/// One DMA block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawData {
    pub start_address: u32,
    /// Transfer buffer, possibly longer than `word_count`
    pub words: Vec<u32>,
    /// Words reported valid by the hardware
    pub word_count: usize,
}

impl RawData {
    pub fn new(start_address: u32, words: Vec<u32>, word_count: usize) -> Self {
        assert!(
            word_count <= words.len(),
            "word count {} exceeds buffer of {} words",
            word_count,
            words.len()
        );
        Self { start_address, words, word_count }
    }

    pub fn valid_words(&self) -> &[u32] {
        &self.words[..self.word_count]
    }

    /// Append this record to a raw stream
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.start_address.to_le_bytes())?;
        out.write_all(&(self.word_count as u32).to_le_bytes())?;
        for word in self.valid_words() {
            out.write_all(&word.to_le_bytes())?;
        }
        Ok(())
    }

    /// Bytes occupied by this record in a raw stream
    pub fn stream_len(&self) -> usize {
        (2 + self.word_count) * 4
    }
}

fn read_u32<R: Read>(input: &mut R) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..])? {
            0 if filled == 0 => return Ok(None),
            0 => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated word")),
            n => filled += n,
        }
    }
    Ok(Some(u32::from_le_bytes(buf)))
}

/// Read the next record, `None` at a clean end of stream
pub fn read_record<R: Read>(input: &mut R) -> Result<Option<RawData>> {
    let Some(start_address) = read_u32(input)? else {
        return Ok(None);
    };
    let truncated = || io::Error::new(io::ErrorKind::UnexpectedEof, "truncated record");
    let count = read_u32(input)?.ok_or_else(truncated)?;
    // no DMA block is ever this large, the header is corrupt
    if count >= MAX_FIFO_WORDS {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record at 0x{:08x} claims {} words", start_address, count),
        )
        .into());
    }
    let count = count as usize;
    let mut words = Vec::with_capacity(count);
    for _ in 0..count {
        words.push(read_u32(input)?.ok_or_else(truncated)?);
    }
    Ok(Some(RawData::new(start_address, words, count)))
}

/// Parse a whole raw stream
pub fn read_records<R: Read>(input: &mut R) -> Result<Vec<RawData>> {
    let mut records = Vec::new();
    while let Some(record) = read_record(input)? {
        records.push(record);
    }
    Ok(records)
}
