use std::{io::SeekFrom, path::Path};

use crate::{
    error::RailError,
    io::RailFile,
    storage::buffer_pool::BufferPool,
    types::RailResult,
};

/// Raw page-granularity access to the data file.
///
/// The pager translates `(page_id, buffer)` pairs to byte ranges on disk and
/// grows the file by whole pages. It never interprets page contents; every
/// structural decision lives above it in the buffer pool.
#[derive(Debug)]
pub struct Pager {
    file: RailFile,
}

impl Pager {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RailError> {
        let file = RailFile::open(path)?;

        // the data file must hold whole pages only
        let page_size = BufferPool::get_page_size() as u64;
        if file.get_size()? % page_size != 0 {
            return Err(RailError::corrupt(
                "data file length is not a multiple of the page size",
            ));
        }

        Ok(Self { file })
    }

    pub fn read_page(&mut self, page_id: u32, buf: &mut [u8]) -> RailResult {
        let page_size = BufferPool::get_page_size();
        self.file
            .seek(SeekFrom::Start(page_id as u64 * page_size as u64))?;
        let bytes = self.file.read_bytes(page_size)?;
        buf.copy_from_slice(&bytes);
        Ok(())
    }

    pub fn write_page(&mut self, page_id: u32, buf: &[u8]) -> RailResult {
        let page_size = BufferPool::get_page_size();
        self.file
            .seek(SeekFrom::Start(page_id as u64 * page_size as u64))?;
        self.file.write_bytes(&buf[..page_size])?;
        Ok(())
    }

    /// Resize the backing file to hold exactly `page_count` pages.
    pub fn grow_to(&self, page_count: u32) -> RailResult {
        let page_size = BufferPool::get_page_size() as u64;
        self.file.set_len(page_count as u64 * page_size)
    }

    pub fn flush(&mut self) -> RailResult {
        self.file.flush()
    }
}
