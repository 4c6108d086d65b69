//! Forks: the byte streams behind files and the special files.
//!
//! A fork presents its allocation as a contiguous logical byte sequence.
//! Reads walk the resolved extent list one contiguous run at a time.

use std::io::{self, Read, Seek, SeekFrom};

use log::debug;

use crate::btree::BTree;
use crate::error::{HfsError, Result};
use crate::extents::{self, ExtentList};
use crate::source::Source;
use crate::volume::ForkData;

/// Hard bound on extent-list walks per read. A list that cannot satisfy a
/// request within this many runs is treated as corrupted.
const READ_LOOP_LIMIT: u32 = 2000;

/// Which of a file's two byte streams a fork refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkKind {
    Data,
    Resource,
}

impl ForkKind {
    /// The fork-type byte used in extents overflow keys.
    pub fn on_disk(self) -> u8 {
        match self {
            ForkKind::Data => 0x00,
            ForkKind::Resource => 0xFF,
        }
    }
}

/// A fork with its extent list fully resolved, ready for reading.
#[derive(Debug)]
pub struct Fork<R> {
    source: Source<R>,
    block_size: u32,
    cnid: u32,
    kind: ForkKind,
    logical_size: u64,
    total_blocks: u32,
    extents: ExtentList,
}

impl<R> Clone for Fork<R> {
    fn clone(&self) -> Self {
        Fork {
            source: self.source.clone(),
            block_size: self.block_size,
            cnid: self.cnid,
            kind: self.kind,
            logical_size: self.logical_size,
            total_blocks: self.total_blocks,
            extents: self.extents.clone(),
        }
    }
}

impl<R: Read + Seek> Fork<R> {
    /// Build a fork from fork data, resolving overflow extents through the
    /// extents tree when the inline descriptors fall short.
    pub(crate) fn from_fork_data(
        source: &Source<R>,
        block_size: u32,
        fork_data: &ForkData,
        kind: ForkKind,
        cnid: u32,
        overflow: Option<&BTree<R>>,
    ) -> Result<Self> {
        let extents = extents::resolve_fork_extents(fork_data, kind, cnid, overflow)?;
        Ok(Fork {
            source: source.clone(),
            block_size,
            cnid,
            kind,
            logical_size: fork_data.logical_size,
            total_blocks: fork_data.total_blocks,
            extents,
        })
    }

    pub fn cnid(&self) -> u32 {
        self.cnid
    }

    pub fn kind(&self) -> ForkKind {
        self.kind
    }

    pub fn logical_size(&self) -> u64 {
        self.logical_size
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    pub fn extents(&self) -> &ExtentList {
        &self.extents
    }

    /// Read whole fork blocks into `buf`.
    ///
    /// Requests starting beyond the fork fail; requests running past the
    /// end are trimmed (to at least one block). One device read is issued
    /// per contiguous extent run. Returns the trimmed block count the
    /// request resolved to.
    pub fn read_blocks(&self, buf: &mut [u8], block_count: u32, start_block: u32) -> Result<usize> {
        if block_count == 0 {
            return Err(HfsError::InvalidArgument("zero-length block read"));
        }
        if start_block > self.total_blocks {
            return Err(HfsError::InvalidArgument(
                "read begins beyond the end of the fork",
            ));
        }

        let mut count = block_count;
        if start_block as u64 + count as u64 > self.total_blocks as u64 {
            count = (self.total_blocks - start_block).max(1);
            debug!(
                "CNID {}: trimmed request to ({start_block}, {count}); fork has {} blocks",
                self.cnid, self.total_blocks
            );
        }

        let bs = self.block_size as usize;
        if buf.len() < count as usize * bs {
            return Err(HfsError::InvalidArgument("destination buffer too small"));
        }

        let mut next = start_block as u64;
        let mut remaining = count as u64;
        let mut filled = 0usize;
        let mut iterations = 0u32;

        while remaining > 0 {
            iterations += 1;
            if iterations > READ_LOOP_LIMIT {
                return Err(HfsError::Stuck(format!(
                    "read of CNID {} exceeded {READ_LOOP_LIMIT} extent runs \
                     (request {start_block}+{count}, remaining {next}+{remaining})",
                    self.cnid
                )));
            }

            let (volume_block, run) = self.extents.find(next).ok_or_else(|| {
                HfsError::Malformed(format!(
                    "logical block {next} not covered by the extents of CNID {}",
                    self.cnid
                ))
            })?;
            let run = (run as u64).min(remaining);
            let bytes = run as usize * bs;

            let read = self.read_volume_blocks(
                &mut buf[filled..filled + bytes],
                run,
                volume_block as u64,
            )?;
            if (read as u64) < run {
                return Err(HfsError::Io(io::ErrorKind::UnexpectedEof.into()));
            }

            filled += bytes;
            next += run;
            remaining -= run;
        }

        Ok(count as usize)
    }

    /// Read an arbitrary byte range of the fork into `buf`.
    ///
    /// Reads past the logical size return 0 bytes; ranges crossing it are
    /// clamped. Returns the number of bytes produced.
    pub fn read_range(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.logical_size {
            return Ok(0);
        }
        let size = (buf.len() as u64).min(self.logical_size - offset) as usize;
        if size == 0 {
            return Ok(0);
        }

        let bs = self.block_size as u64;
        let start_block = offset / bs;
        let byte_offset = (offset % bs) as usize;
        // One extra block when the range is not block-aligned.
        let block_count = (byte_offset as u64 + size as u64).div_ceil(bs);

        let mut scratch = vec![0u8; (block_count * bs) as usize];
        self.read_blocks(&mut scratch, block_count as u32, start_block as u32)?;
        buf[..size].copy_from_slice(&scratch[byte_offset..byte_offset + size]);
        Ok(size)
    }

    /// A streaming `Read + Seek` adapter over this fork.
    pub fn reader(&self) -> ForkReader<R> {
        ForkReader {
            fork: self.clone(),
            position: 0,
        }
    }

    /// Convert a volume-block read to a device-block read by the
    /// allocation/device block size ratio.
    fn read_volume_blocks(&self, buf: &mut [u8], count: u64, start: u64) -> Result<usize> {
        let ratio = (self.block_size / self.source.block_size()) as u64;
        let n = self.source.read_blocks_at(buf, count * ratio, start * ratio)?;
        Ok(n / ratio as usize)
    }
}

/// Streaming reader over a fork, translating logical positions through
/// the extent map on every read.
pub struct ForkReader<R> {
    fork: Fork<R>,
    position: u64,
}

impl<R: Read + Seek> Read for ForkReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .fork
            .read_range(buf, self.position)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for ForkReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => self.position as i64 + offset,
            SeekFrom::End(offset) => self.fork.logical_size() as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the fork",
            ));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testvol::{self, BLOCK_SIZE};

    #[test]
    fn test_fragmented_read_issues_one_read_per_run() {
        // Three non-contiguous runs: 10 blocks at 100, 5 at 500, 3 at 200.
        let (fork, log) = testvol::fragmented_fork();
        let mut buf = vec![0u8; 18 * BLOCK_SIZE as usize];

        let n = fork.read_blocks(&mut buf, 18, 0).unwrap();
        assert_eq!(n, 18);

        let reads = log.borrow().clone();
        let bs = BLOCK_SIZE as u64;
        assert_eq!(
            reads,
            vec![
                (100 * bs, 10 * bs as usize),
                (500 * bs, 5 * bs as usize),
                (200 * bs, 3 * bs as usize),
            ]
        );

        // Every block carries its device-block index, so placement is
        // verifiable after reassembly.
        assert_eq!(buf[0], 100);
        assert_eq!(buf[10 * BLOCK_SIZE as usize], 244); // 500 % 256
        assert_eq!(buf[15 * BLOCK_SIZE as usize], 200);
    }

    #[test]
    fn test_read_blocks_trims_tail() {
        let (fork, _) = testvol::fragmented_fork();
        let mut buf = vec![0u8; 18 * BLOCK_SIZE as usize];

        // 16 + 10 runs past the 18-block fork; trimmed to 2.
        assert_eq!(fork.read_blocks(&mut buf, 10, 16).unwrap(), 2);
        // Start exactly at the end: trimmed to the 1-block minimum, which
        // the extent list then cannot satisfy.
        assert!(fork.read_blocks(&mut buf, 1, 18).is_err());
        // Start beyond the end fails outright.
        assert!(matches!(
            fork.read_blocks(&mut buf, 1, 19).unwrap_err(),
            HfsError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_read_range_bounds() {
        let (fork, _) = testvol::fragmented_fork();
        let size = fork.logical_size();

        let mut buf = vec![0u8; 64];
        assert_eq!(fork.read_range(&mut buf, size).unwrap(), 0);
        assert_eq!(fork.read_range(&mut buf, size + 100).unwrap(), 0);

        // A range crossing the logical end is clamped.
        let n = fork.read_range(&mut buf, size - 10).unwrap();
        assert_eq!(n, 10);

        // An interior range comes back in full.
        let n = fork.read_range(&mut buf, 5).unwrap();
        assert_eq!(n, 64);
    }

    #[test]
    fn test_read_range_unaligned() {
        let (fork, _) = testvol::fragmented_fork();

        // Crosses the run boundary at logical block 10 mid-buffer.
        let offset = 10 * BLOCK_SIZE as u64 - 4;
        let mut buf = [0u8; 8];
        assert_eq!(fork.read_range(&mut buf, offset).unwrap(), 8);
        assert_eq!(&buf[..4], &[109, 109, 109, 109]);
        assert_eq!(&buf[4..], &[244, 244, 244, 244]);
    }

    #[test]
    fn test_fork_reader_seek_and_read() {
        let (fork, _) = testvol::fragmented_fork();
        let size = fork.logical_size();
        let mut reader = fork.reader();

        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [100, 100, 100, 100]);

        // SeekFrom::End is additive with a negative offset.
        let pos = reader.seek(SeekFrom::End(-4)).unwrap();
        assert_eq!(pos, size - 4);
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [202, 202, 202, 202]);

        assert_eq!(reader.seek(SeekFrom::End(0)).unwrap(), size);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        assert!(reader.seek(SeekFrom::Start(0)).is_ok());
        assert!(reader.seek(SeekFrom::Current(-1)).is_err());
    }
}
