use std::{
    fmt,
    io::Cursor,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use crate::{
    error::RailError,
    io::{Decodeable, DiskSize, Encodeable, RailWriter},
    storage::buffer_pool::BufferPool,
    types::Pod,
    utils::HandyRwLock,
};

/// Sentinel page id encoding "no page".
pub const NULL_PAGE: u32 = !0u32;

/// A persistent pointer to a page.
///
/// A handle is trivially copyable and serialisable, and is the only form of
/// inter-node reference that is ever stored inside a page. It is not typed:
/// the node kind is chosen at the pin site, the way the descent logic knows
/// whether it is looking at an interior level or the leaf level.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Handle {
    page_id: u32,
}

impl Handle {
    pub fn new(page_id: u32) -> Self {
        Self { page_id }
    }

    pub fn null() -> Self {
        Self { page_id: NULL_PAGE }
    }

    pub fn is_null(&self) -> bool {
        self.page_id == NULL_PAGE
    }

    pub fn page_id(&self) -> u32 {
        self.page_id
    }

    /// Retrieve a read-only reference to the page behind the handle.
    pub fn read<N: Decodeable>(&self, pool: &Pod<BufferPool>) -> Result<ReadRef<N>, RailError> {
        let (slot, node) = {
            let mut bp = pool.wl();
            let slot = bp.pin(self.page_id, false)?;
            let mut reader = Cursor::new(bp.frame_bytes(slot));
            let node = N::decode_from(&mut reader);
            (slot, node)
        };

        Ok(ReadRef {
            node,
            pool: Arc::clone(pool),
            slot,
        })
    }

    /// Retrieve a read-write reference to the page behind the handle. The
    /// frame is marked dirty on acquisition; the modified node image is
    /// encoded back into the frame when the reference goes out of scope.
    pub fn write<N: Encodeable + Decodeable>(
        &self,
        pool: &Pod<BufferPool>,
    ) -> Result<WriteRef<N>, RailError> {
        let (slot, node) = {
            let mut bp = pool.wl();
            let slot = bp.pin(self.page_id, true)?;
            let mut reader = Cursor::new(bp.frame_bytes(slot));
            let node = N::decode_from(&mut reader);
            (slot, node)
        };

        Ok(WriteRef {
            node,
            pool: Arc::clone(pool),
            slot,
            page_id: self.page_id,
        })
    }

    /// Claim a freshly allocated page and install `node` as its content,
    /// without decoding whatever bytes the page held before. This is the
    /// only safe way to take the first reference to a page returned by
    /// `BufferPool::allocate`.
    pub fn write_init<N: Encodeable>(
        &self,
        pool: &Pod<BufferPool>,
        node: N,
    ) -> Result<WriteRef<N>, RailError> {
        let slot = pool.wl().pin(self.page_id, true)?;

        Ok(WriteRef {
            node,
            pool: Arc::clone(pool),
            slot,
            page_id: self.page_id,
        })
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_null() {
            write!(f, "<null>")
        } else {
            write!(f, "<page {}>", self.page_id)
        }
    }
}

impl Encodeable for Handle {
    fn encode(&self) -> Vec<u8> {
        self.page_id.encode()
    }
}

impl Decodeable for Handle {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        Self {
            page_id: u32::decode_from(reader),
        }
    }
}

impl DiskSize for Handle {
    const DISK_SIZE: usize = 4;
}

/// A scoped read-only view of one page.
///
/// Holding the reference pins the frame; the pin is released on every exit
/// path when the reference is dropped.
#[derive(Debug)]
pub struct ReadRef<N> {
    node: N,
    pool: Pod<BufferPool>,
    slot: usize,
}

impl<N> Deref for ReadRef<N> {
    type Target = N;

    fn deref(&self) -> &N {
        &self.node
    }
}

impl<N> Drop for ReadRef<N> {
    fn drop(&mut self) {
        self.pool.wl().unpin(self.slot, false);
    }
}

/// A scoped read-write view of one page.
///
/// On drop the node is encoded into a full page image and copied back into
/// the (still pinned, hence still bound) frame, then the pin is released.
pub struct WriteRef<N: Encodeable> {
    node: N,
    pool: Pod<BufferPool>,
    slot: usize,
    page_id: u32,
}

impl<N: Encodeable> Deref for WriteRef<N> {
    type Target = N;

    fn deref(&self) -> &N {
        &self.node
    }
}

impl<N: Encodeable> DerefMut for WriteRef<N> {
    fn deref_mut(&mut self) -> &mut N {
        &mut self.node
    }
}

impl<N: Encodeable> Drop for WriteRef<N> {
    fn drop(&mut self) {
        let mut writer = RailWriter::new();
        writer.write(&self.node);
        let bytes = writer.to_padded_bytes(BufferPool::get_page_size());

        let mut bp = self.pool.wl();
        bp.store_frame(self.slot, self.page_id, &bytes);
        bp.unpin(self.slot, true);
    }
}
