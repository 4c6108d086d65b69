//! Random-access byte sources.
//!
//! A [`Source`] is a cheap, cloneable, read-only view over an underlying
//! `Read + Seek` device or image: a byte offset, an optional byte length,
//! and a device block size. Partitions are expressed as sub-sources whose
//! offsets compose with their parent's.

use std::cell::RefCell;
use std::io::{self, Read, Seek, SeekFrom};
use std::rc::Rc;

use crate::error::{HfsError, Result};

/// Default device block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// A shared positional-read handle over a reader.
///
/// Every read is absolute, so clones of one source never disturb each
/// other. The core is single-threaded; the reader is shared through
/// `Rc<RefCell<_>>` and borrowed only for the duration of one read.
#[derive(Debug)]
pub struct Source<R> {
    inner: Rc<RefCell<R>>,
    block_size: u32,
    offset: u64,
    length: u64,
    index: usize,
}

impl<R> Clone for Source<R> {
    fn clone(&self) -> Self {
        Source {
            inner: Rc::clone(&self.inner),
            block_size: self.block_size,
            offset: self.offset,
            length: self.length,
            index: self.index,
        }
    }
}

impl<R: Read + Seek> Source<R> {
    /// Wrap a reader as a whole-device source with the default block size.
    pub fn new(reader: R) -> Self {
        Self::with_block_size(reader, DEFAULT_BLOCK_SIZE)
    }

    /// Wrap a reader with an explicit device block size (a power of two).
    pub fn with_block_size(reader: R, block_size: u32) -> Self {
        debug_assert!(block_size.is_power_of_two());
        Source {
            inner: Rc::new(RefCell::new(reader)),
            block_size,
            offset: 0,
            length: 0,
            index: 0,
        }
    }

    /// Device block size in bytes.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Byte offset of this view within the underlying reader.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Byte length of this view; 0 means "to the end of the reader".
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Partition index this view was carved out as (0 for whole devices).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Carve a partition view out of this source. `offset` and `length`
    /// are relative to this view; offsets compose with the parent's.
    pub fn sub_source(&self, index: usize, offset: u64, length: u64) -> Source<R> {
        Source {
            inner: Rc::clone(&self.inner),
            block_size: self.block_size,
            offset: self.offset + offset,
            length,
            index,
        }
    }

    /// Positional read. Fills as much of `buf` as the view and the
    /// underlying reader allow; returns the number of bytes read. Reads
    /// past the end of a bounded view return 0.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut want = buf.len();
        if self.length != 0 {
            if offset >= self.length {
                return Ok(0);
            }
            want = want.min((self.length - offset) as usize);
        }

        let mut inner = self.inner.borrow_mut();
        inner.seek(SeekFrom::Start(self.offset + offset))?;

        let mut filled = 0;
        while filled < want {
            match inner.read(&mut buf[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    /// Positional read that fails on a short read.
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let n = self.read_at(buf, offset)?;
        if n != buf.len() {
            return Err(HfsError::Io(io::ErrorKind::UnexpectedEof.into()));
        }
        Ok(())
    }

    /// Positional read in device-block units. Returns the number of whole
    /// blocks read.
    pub fn read_blocks_at(&self, buf: &mut [u8], count: u64, start: u64) -> Result<usize> {
        let bs = self.block_size as u64;
        let want = (count * bs) as usize;
        if buf.len() < want {
            return Err(HfsError::InvalidArgument("block read buffer too small"));
        }
        let n = self.read_at(&mut buf[..want], start * bs)?;
        Ok(n / bs as usize)
    }
}
