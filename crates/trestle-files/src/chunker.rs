//! File chunking with seek support and out-of-order reassembly.

use crate::error::{FileError, Result};
use crate::DEFAULT_CHUNK_SIZE;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Reads a file as a sequence of fixed-size chunks.
///
/// The last chunk may be shorter. Chunk indices are `u32` to match the wire
/// header, which caps a transfer at `u32::MAX` chunks.
pub struct FileChunker {
    file: File,
    chunk_size: usize,
    total_size: u64,
    current_offset: u64,
}

impl FileChunker {
    /// Open a file for chunked reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its metadata read.
    pub fn new<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<Self> {
        let file = File::open(path)?;
        let total_size = file.metadata()?.len();

        Ok(Self {
            file,
            chunk_size,
            total_size,
            current_offset: 0,
        })
    }

    /// Open with the default 1 MiB chunk size.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its metadata read.
    pub fn with_default_size<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(path, DEFAULT_CHUNK_SIZE)
    }

    /// Total number of chunks. An empty file has zero chunks.
    #[must_use]
    pub fn num_chunks(&self) -> u32 {
        self.total_size.div_ceil(self.chunk_size as u64) as u32
    }

    /// Configured chunk size.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total file size in bytes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Read the next chunk sequentially, or `None` at end of file.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.current_offset >= self.total_size {
            return Ok(None);
        }

        let remaining = self.total_size - self.current_offset;
        let chunk_len = remaining.min(self.chunk_size as u64) as usize;
        let mut buffer = vec![0u8; chunk_len];
        self.file.read_exact(&mut buffer)?;
        self.current_offset += chunk_len as u64;

        Ok(Some(buffer))
    }

    /// Position the reader at a specific chunk. Used when resuming a
    /// partially acknowledged transfer.
    ///
    /// # Errors
    ///
    /// Returns `FileError::IndexOutOfBounds` if the index is past the end.
    pub fn seek_to_chunk(&mut self, chunk_index: u32) -> Result<()> {
        let offset = u64::from(chunk_index) * self.chunk_size as u64;
        if offset >= self.total_size {
            return Err(FileError::IndexOutOfBounds {
                index: chunk_index,
                total: self.num_chunks(),
            });
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.current_offset = offset;
        Ok(())
    }

    /// Read up to `count` chunks starting at the current position, paired
    /// with their indices. Returns fewer when the file ends first.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub fn read_window(&mut self, count: usize) -> Result<Vec<(u32, Vec<u8>)>> {
        let mut window = Vec::with_capacity(count);
        for _ in 0..count {
            let index = (self.current_offset / self.chunk_size as u64) as u32;
            match self.read_chunk()? {
                Some(data) => window.push((index, data)),
                None => break,
            }
        }
        Ok(window)
    }
}

/// Writes chunks at their file offsets, tracking receipt in a bitmap.
///
/// Supports out-of-order writes and resume: `resume` reopens an existing
/// partial file and pre-marks every chunk below the resume index as received.
pub struct FileReassembler {
    file: File,
    chunk_size: usize,
    total_chunks: u32,
    total_size: u64,
    // Vec<u64> bitset: bitmap[idx/64] & (1 << (idx%64))
    chunk_bitmap: Vec<u64>,
    received_count: u32,
}

impl FileReassembler {
    /// Create a fresh reassembly target, pre-allocated to `total_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or pre-allocated.
    pub fn new<P: AsRef<Path>>(path: P, total_size: u64, chunk_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total_size)?;

        let total_chunks = total_size.div_ceil(chunk_size as u64) as u32;
        let bitmap_words = u64::from(total_chunks).div_ceil(64) as usize;

        Ok(Self {
            file,
            chunk_size,
            total_chunks,
            total_size,
            chunk_bitmap: vec![0u64; bitmap_words],
            received_count: 0,
        })
    }

    /// Reopen an existing partial file and mark chunks `0..resume_index` as
    /// already received.
    ///
    /// # Errors
    ///
    /// Returns `FileError::IndexOutOfBounds` if `resume_index` exceeds the
    /// chunk count, or an I/O error if the file cannot be opened.
    pub fn resume<P: AsRef<Path>>(
        path: P,
        total_size: u64,
        chunk_size: usize,
        resume_index: u32,
    ) -> Result<Self> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(total_size)?;

        let total_chunks = total_size.div_ceil(chunk_size as u64) as u32;
        if resume_index > total_chunks {
            return Err(FileError::IndexOutOfBounds {
                index: resume_index,
                total: total_chunks,
            });
        }

        let bitmap_words = u64::from(total_chunks).div_ceil(64) as usize;
        let mut reassembler = Self {
            file,
            chunk_size,
            total_chunks,
            total_size,
            chunk_bitmap: vec![0u64; bitmap_words],
            received_count: 0,
        };
        for idx in 0..resume_index {
            Self::bitmap_set(&mut reassembler.chunk_bitmap, idx);
        }
        reassembler.received_count = resume_index;

        tracing::debug!(
            resume_index,
            total_chunks,
            "resuming reassembly from existing partial file"
        );
        Ok(reassembler)
    }

    /// Write a chunk at its offset (`index * chunk_size`).
    ///
    /// # Errors
    ///
    /// Returns `FileError::IndexOutOfBounds` for an invalid index, or an I/O
    /// error if the write fails.
    pub fn write_chunk(&mut self, chunk_index: u32, data: &[u8]) -> Result<()> {
        if chunk_index >= self.total_chunks {
            return Err(FileError::IndexOutOfBounds {
                index: chunk_index,
                total: self.total_chunks,
            });
        }

        let offset = u64::from(chunk_index) * self.chunk_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;

        if !Self::bitmap_test(&self.chunk_bitmap, chunk_index) {
            Self::bitmap_set(&mut self.chunk_bitmap, chunk_index);
            self.received_count += 1;
        }

        Ok(())
    }

    /// Whether a chunk has been received.
    #[must_use]
    pub fn has_chunk(&self, chunk_index: u32) -> bool {
        chunk_index < self.total_chunks && Self::bitmap_test(&self.chunk_bitmap, chunk_index)
    }

    /// Indices not yet received, ascending.
    #[must_use]
    pub fn missing_chunks(&self) -> Vec<u32> {
        let mut missing = Vec::with_capacity((self.total_chunks - self.received_count) as usize);

        for (word_idx, &word) in self.chunk_bitmap.iter().enumerate() {
            if word == u64::MAX {
                continue;
            }
            let mut unset = !word;
            while unset != 0 {
                let bit = unset.trailing_zeros() as u64;
                let chunk_idx = (word_idx as u64) * 64 + bit;
                if chunk_idx < u64::from(self.total_chunks) {
                    missing.push(chunk_idx as u32);
                }
                unset &= unset - 1;
            }
        }

        missing
    }

    /// Number of chunks received so far.
    #[must_use]
    pub fn received_count(&self) -> u32 {
        self.received_count
    }

    /// Declared chunk count.
    #[must_use]
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Declared file size in bytes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Fraction received, 0.0 to 1.0. An empty file is complete at creation.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            1.0
        } else {
            f64::from(self.received_count) / f64::from(self.total_chunks)
        }
    }

    /// Whether every chunk has been received.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received_count == self.total_chunks
    }

    /// Flush file contents and metadata to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if syncing fails.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Sync and consume the reassembler.
    ///
    /// # Errors
    ///
    /// Returns `FileError::Incomplete` if chunks are still missing.
    pub fn finalize(mut self) -> Result<()> {
        if !self.is_complete() {
            return Err(FileError::Incomplete {
                received: self.received_count,
                total: self.total_chunks,
            });
        }
        self.sync()
    }

    fn bitmap_set(bitmap: &mut [u64], idx: u32) {
        let word = (idx / 64) as usize;
        bitmap[word] |= 1u64 << (idx % 64);
    }

    fn bitmap_test(bitmap: &[u64], idx: u32) -> bool {
        let word = (idx / 64) as usize;
        (bitmap[word] >> (idx % 64)) & 1 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MIN_CHUNK_SIZE;
    use tempfile::NamedTempFile;

    fn write_temp(data: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn chunking_roundtrip() {
        let data: Vec<u8> = (0..4 * MIN_CHUNK_SIZE).map(|i| (i % 251) as u8).collect();
        let input = write_temp(&data);

        let mut chunker = FileChunker::new(input.path(), MIN_CHUNK_SIZE).unwrap();
        assert_eq!(chunker.num_chunks(), 4);

        let mut chunks = Vec::new();
        while let Some(chunk) = chunker.read_chunk().unwrap() {
            chunks.push(chunk);
        }
        assert_eq!(chunks.len(), 4);

        let output = NamedTempFile::new().unwrap();
        let mut reassembler =
            FileReassembler::new(output.path(), data.len() as u64, MIN_CHUNK_SIZE).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            reassembler.write_chunk(i as u32, chunk).unwrap();
        }
        assert!(reassembler.is_complete());
        reassembler.finalize().unwrap();

        assert_eq!(std::fs::read(output.path()).unwrap(), data);
    }

    #[test]
    fn out_of_order_reassembly() {
        let data = vec![0xBB; 2 * MIN_CHUNK_SIZE];
        let input = write_temp(&data);

        let mut chunker = FileChunker::new(input.path(), MIN_CHUNK_SIZE).unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = chunker.read_chunk().unwrap() {
            chunks.push(chunk);
        }

        let output = NamedTempFile::new().unwrap();
        let mut reassembler =
            FileReassembler::new(output.path(), data.len() as u64, MIN_CHUNK_SIZE).unwrap();
        reassembler.write_chunk(1, &chunks[1]).unwrap();
        reassembler.write_chunk(0, &chunks[0]).unwrap();

        assert!(reassembler.is_complete());
        reassembler.finalize().unwrap();
        assert_eq!(std::fs::read(output.path()).unwrap(), data);
    }

    #[test]
    fn read_window_pairs_indices() {
        let data = vec![0x11; 3 * MIN_CHUNK_SIZE + 100];
        let input = write_temp(&data);

        let mut chunker = FileChunker::new(input.path(), MIN_CHUNK_SIZE).unwrap();
        chunker.seek_to_chunk(2).unwrap();
        let window = chunker.read_window(8).unwrap();

        assert_eq!(window.len(), 2);
        assert_eq!(window[0].0, 2);
        assert_eq!(window[0].1.len(), MIN_CHUNK_SIZE);
        assert_eq!(window[1].0, 3);
        assert_eq!(window[1].1.len(), 100);
    }

    #[test]
    fn missing_chunks_reported_sorted() {
        let output = NamedTempFile::new().unwrap();
        let mut reassembler = FileReassembler::new(
            output.path(),
            10 * MIN_CHUNK_SIZE as u64,
            MIN_CHUNK_SIZE,
        )
        .unwrap();

        reassembler.write_chunk(0, &vec![0u8; MIN_CHUNK_SIZE]).unwrap();
        reassembler.write_chunk(5, &vec![0u8; MIN_CHUNK_SIZE]).unwrap();
        reassembler.write_chunk(2, &vec![0u8; MIN_CHUNK_SIZE]).unwrap();

        let missing = reassembler.missing_chunks();
        assert_eq!(missing, vec![1, 3, 4, 6, 7, 8, 9]);
        assert_eq!(reassembler.received_count(), 3);
    }

    #[test]
    fn resume_marks_prefix_received() {
        let data = vec![0xCD; 4 * MIN_CHUNK_SIZE];
        let partial = NamedTempFile::new().unwrap();
        std::fs::write(partial.path(), &data[..2 * MIN_CHUNK_SIZE]).unwrap();

        let mut reassembler =
            FileReassembler::resume(partial.path(), data.len() as u64, MIN_CHUNK_SIZE, 2).unwrap();
        assert_eq!(reassembler.received_count(), 2);
        assert_eq!(reassembler.missing_chunks(), vec![2, 3]);
        assert!(!reassembler.is_complete());

        reassembler
            .write_chunk(2, &data[2 * MIN_CHUNK_SIZE..3 * MIN_CHUNK_SIZE])
            .unwrap();
        reassembler
            .write_chunk(3, &data[3 * MIN_CHUNK_SIZE..])
            .unwrap();
        reassembler.finalize().unwrap();

        assert_eq!(std::fs::read(partial.path()).unwrap(), data);
    }

    #[test]
    fn empty_file_is_complete() {
        let output = NamedTempFile::new().unwrap();
        let reassembler = FileReassembler::new(output.path(), 0, MIN_CHUNK_SIZE).unwrap();
        assert!(reassembler.is_complete());
        assert_eq!(reassembler.progress(), 1.0);
        reassembler.finalize().unwrap();
    }

    #[test]
    fn incomplete_finalize_fails() {
        let output = NamedTempFile::new().unwrap();
        let reassembler =
            FileReassembler::new(output.path(), 3 * MIN_CHUNK_SIZE as u64, MIN_CHUNK_SIZE)
                .unwrap();
        assert!(matches!(
            reassembler.finalize(),
            Err(FileError::Incomplete { received: 0, total: 3 })
        ));
    }

    #[test]
    fn out_of_bounds_write_rejected() {
        let output = NamedTempFile::new().unwrap();
        let mut reassembler =
            FileReassembler::new(output.path(), MIN_CHUNK_SIZE as u64, MIN_CHUNK_SIZE).unwrap();
        assert!(matches!(
            reassembler.write_chunk(1, b"x"),
            Err(FileError::IndexOutOfBounds { index: 1, total: 1 })
        ));
    }
}
