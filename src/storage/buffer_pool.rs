use std::{
    collections::HashMap,
    io::SeekFrom,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, RwLock,
    },
};

use log::debug;

use crate::{
    error::{ErrorKind, RailError},
    io::RailFile,
    storage::{
        handle::{Handle, NULL_PAGE},
        pager::Pager,
    },
    types::{Pod, RailResult},
};

pub const DEFAULT_PAGE_SIZE: usize = 4096;
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

/// Number of in-memory frames a pool holds unless the caller asks for a
/// different figure (tests shrink it to force eviction).
pub const DEFAULT_SLOT_COUNT: usize = 1248;

/// Depth of the per-frame access history consulted by eviction.
///
/// Plain LRU is vulnerable to scan-through patterns; comparing frames by
/// the age of their K-th most recent access keeps a range scan from
/// flushing the warm interior nodes out of memory.
pub const LRU_K: usize = 20;

/// Ring buffer of the last `LRU_K` access stamps of one frame.
#[derive(Debug)]
struct AccessHistory {
    stamps: [u64; LRU_K],
    head: usize,
    len: usize,
}

impl AccessHistory {
    fn new() -> Self {
        Self {
            stamps: [0; LRU_K],
            head: 0,
            len: 0,
        }
    }

    fn record(&mut self, stamp: u64) {
        if self.len < LRU_K {
            self.stamps[(self.head + self.len) % LRU_K] = stamp;
            self.len += 1;
        } else {
            self.stamps[self.head] = stamp;
            self.head = (self.head + 1) % LRU_K;
        }
    }

    /// The stamp of the K-th most recent access.
    ///
    /// A frame with fewer than K recorded accesses reports 0, which makes it
    /// older than any frame with a full history.
    fn kth_recent(&self) -> u64 {
        if self.len < LRU_K {
            return 0;
        }
        self.stamps[self.head]
    }

    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

/// In-memory mirror of one page plus its bookkeeping.
#[derive(Debug)]
struct Frame {
    buf: Vec<u8>,

    // the page this frame currently holds, NULL_PAGE when unbound
    page_id: u32,

    dirty: bool,
    pin_count: u32,
    write_pinned: bool,
    history: AccessHistory,
}

impl Frame {
    fn new() -> Self {
        Self {
            buf: vec![0; BufferPool::get_page_size()],
            page_id: NULL_PAGE,
            dirty: false,
            pin_count: 0,
            write_pinned: false,
            history: AccessHistory::new(),
        }
    }
}

/// A bounded set of in-memory frames over one data file.
///
/// The pool serves scoped references to pages, allocates and recycles page
/// ids, and writes dirty frames back on eviction and at shutdown. There is
/// exactly one pool per data file while the engine is open; everything above
/// shares it through a `Pod<BufferPool>`.
///
/// The engine is single-threaded by contract: the surrounding lock is never
/// contended and is never held across an engine call.
#[derive(Debug)]
pub struct BufferPool {
    pager: Pager,

    // the data-config file persisting the page allocator state:
    // [u32 next_page_id][u32 free_count][u32 free_pages...]
    config: RailFile,

    slot_count: usize,
    frames: Vec<Frame>,

    // page_id -> frame slot
    page_table: HashMap<u32, usize>,

    // logical access clock, bumped on every pin
    clock: u64,

    next_page_id: u32,
    free_pages: Vec<u32>,

    closed: bool,
}

impl BufferPool {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Pod<BufferPool>, RailError> {
        Self::open_with_slots(path, DEFAULT_SLOT_COUNT)
    }

    pub fn open_with_slots<P: AsRef<Path>>(
        path: P,
        slot_count: usize,
    ) -> Result<Pod<BufferPool>, RailError> {
        assert!(slot_count >= 1, "buffer pool needs at least one frame");

        let data_path = path.as_ref().to_path_buf();
        let config_path = Self::config_path(&data_path);

        let mut config = RailFile::open(&config_path)?;
        let mut next_page_id: u32 = 0;
        let mut free_pages: Vec<u32> = Vec::new();

        let config_size = config.get_size()?;
        if config_size > 0 {
            if config_size < 8 {
                return Err(RailError::corrupt("data-config file is truncated"));
            }
            config.seek(SeekFrom::Start(0))?;
            next_page_id = config.read_obj::<u32>()?;
            let free_count = config.read_obj::<u32>()?;
            if free_count as u64 * 4 > config_size - 8 {
                return Err(RailError::corrupt(
                    "free-page list is longer than the data-config file",
                ));
            }
            for _ in 0..free_count {
                let pid = config.read_obj::<u32>()?;
                if pid >= next_page_id {
                    return Err(RailError::corrupt("free page beyond the allocated range"));
                }
                free_pages.push(pid);
            }
        }

        let pager = Pager::open(&data_path)?;

        debug!(
            "buffer pool opened, pages on disk: {}, free pages: {}",
            next_page_id,
            free_pages.len()
        );

        Ok(Arc::new(RwLock::new(Self {
            pager,
            config,
            slot_count,
            frames: Vec::new(),
            page_table: HashMap::new(),
            clock: 0,
            next_page_id,
            free_pages,
            closed: false,
        })))
    }

    fn config_path(data_path: &PathBuf) -> PathBuf {
        let mut os = data_path.clone().into_os_string();
        os.push(".config");
        PathBuf::from(os)
    }

    pub fn set_page_size(page_size: usize) {
        PAGE_SIZE.store(page_size, Ordering::Relaxed);
    }

    pub fn get_page_size() -> usize {
        PAGE_SIZE.load(Ordering::Relaxed)
    }

    /// Allocate a page: pop the free stack if possible, grow the file
    /// otherwise. The page content is whatever was on disk; the caller is
    /// expected to initialise it before reading.
    pub fn allocate(&mut self) -> Result<Handle, RailError> {
        if let Some(pid) = self.free_pages.pop() {
            debug!("page {} recycled from the free stack", pid);
            return Ok(Handle::new(pid));
        }

        let pid = self.next_page_id;
        self.next_page_id += 1;
        self.pager.grow_to(self.next_page_id)?;
        Ok(Handle::new(pid))
    }

    /// Return a page to the free stack.
    ///
    /// The caller is responsible for having dropped every reference into the
    /// page; freeing a pinned page is a programmer error. The frame binding
    /// is discarded so the page id can be handed out again safely.
    pub fn free(&mut self, handle: Handle) -> RailResult {
        let pid = handle.page_id();
        if pid == NULL_PAGE || pid >= self.next_page_id {
            return Err(RailError::out_of_range(&format!(
                "free of invalid page {}",
                handle
            )));
        }

        if let Some(slot) = self.page_table.remove(&pid) {
            let frame = &mut self.frames[slot];
            assert!(
                frame.pin_count == 0,
                "free of a pinned page {} (pin count {})",
                pid,
                frame.pin_count
            );
            frame.page_id = NULL_PAGE;
            frame.dirty = false;
            frame.history.clear();
        }

        self.free_pages.push(pid);
        Ok(())
    }

    /// Pin the frame holding `page_id`, loading it from disk (and possibly
    /// evicting another frame) first. Returns the slot of the frame.
    pub(crate) fn pin(&mut self, page_id: u32, for_write: bool) -> Result<usize, RailError> {
        if page_id == NULL_PAGE {
            return Err(RailError::out_of_range("null handle cannot be dereferenced"));
        }
        if page_id >= self.next_page_id {
            return Err(RailError::out_of_range(&format!(
                "page id {} out of range (pages on disk: {})",
                page_id, self.next_page_id
            )));
        }

        self.clock += 1;
        let stamp = self.clock;

        if let Some(&slot) = self.page_table.get(&page_id) {
            let frame = &mut self.frames[slot];
            if for_write {
                assert!(
                    frame.pin_count == 0,
                    "write pin requested on page {} which is already pinned",
                    page_id
                );
            } else {
                assert!(
                    !frame.write_pinned,
                    "read pin requested on page {} while a write pin is live",
                    page_id
                );
            }
            frame.history.record(stamp);
            frame.pin_count += 1;
            if for_write {
                frame.write_pinned = true;
                frame.dirty = true;
            }
            return Ok(slot);
        }

        let slot = self.find_victim()?;

        // write the victim back before rebinding the frame
        {
            let frame = &mut self.frames[slot];
            if frame.page_id != NULL_PAGE {
                if frame.dirty {
                    debug!("evicting dirty page {}, writing back", frame.page_id);
                    self.pager.write_page(frame.page_id, &frame.buf)?;
                    frame.dirty = false;
                }
                self.page_table.remove(&frame.page_id);
            }
        }

        let frame = &mut self.frames[slot];
        self.pager.read_page(page_id, &mut frame.buf)?;
        frame.page_id = page_id;
        frame.history.clear();
        frame.history.record(stamp);
        frame.pin_count = 1;
        frame.write_pinned = for_write;
        frame.dirty = for_write;
        self.page_table.insert(page_id, slot);

        Ok(slot)
    }

    /// Pick the frame to rebind: an unused slot while the pool is still
    /// growing, otherwise the unpinned frame with the oldest K-th access.
    fn find_victim(&mut self) -> Result<usize, RailError> {
        if self.frames.len() < self.slot_count {
            self.frames.push(Frame::new());
            return Ok(self.frames.len() - 1);
        }

        let mut victim: Option<(u64, usize)> = None;
        for (slot, frame) in self.frames.iter().enumerate() {
            if frame.pin_count != 0 {
                continue;
            }
            let stamp = frame.history.kth_recent();
            match victim {
                Some((best, _)) if best <= stamp => {}
                _ => victim = Some((stamp, slot)),
            }
        }

        match victim {
            Some((_, slot)) => Ok(slot),
            None => Err(RailError::new(
                ErrorKind::PoolExhausted,
                "every frame of the buffer pool is pinned",
            )),
        }
    }

    pub(crate) fn unpin(&mut self, slot: usize, write: bool) {
        let frame = &mut self.frames[slot];
        assert!(frame.pin_count > 0, "unpin of an unpinned frame");
        frame.pin_count -= 1;
        if write {
            frame.write_pinned = false;
        }
    }

    pub(crate) fn frame_bytes(&self, slot: usize) -> &[u8] {
        &self.frames[slot].buf
    }

    /// Replace the content of a pinned frame with a freshly encoded page
    /// image. Called by write references when they go out of scope.
    pub(crate) fn store_frame(&mut self, slot: usize, page_id: u32, bytes: &[u8]) {
        let frame = &mut self.frames[slot];
        assert!(
            frame.page_id == page_id,
            "frame rebound while a reference was live: holds {}, expected {}",
            frame.page_id,
            page_id
        );
        frame.buf.copy_from_slice(bytes);
    }

    /// Write every dirty frame back and clear the dirty bits. Pin counts are
    /// not consulted.
    pub fn flush_all(&mut self) -> RailResult {
        for frame in self.frames.iter_mut() {
            if frame.page_id != NULL_PAGE && frame.dirty {
                self.pager.write_page(frame.page_id, &frame.buf)?;
                frame.dirty = false;
            }
        }
        Ok(())
    }

    /// Durable teardown: flush the frames and persist the page allocator
    /// state into the data-config file.
    pub fn close(&mut self) -> RailResult {
        if self.closed {
            return Ok(());
        }

        self.flush_all()?;
        self.pager.flush()?;

        self.config.seek(SeekFrom::Start(0))?;
        self.config.write_obj(&self.next_page_id)?;
        self.config.write_obj(&(self.free_pages.len() as u32))?;
        for pid in &self.free_pages {
            self.config.write_obj(pid)?;
        }
        self.config.set_len(8 + 4 * self.free_pages.len() as u64)?;
        self.config.flush()?;

        self.closed = true;
        Ok(())
    }

    /// Number of pages the data file holds, recycled or not.
    pub fn pages_on_disk(&self) -> u32 {
        self.next_page_id
    }

    pub fn free_page_count(&self) -> usize {
        self.free_pages.len()
    }

    pub fn free_pages(&self) -> &[u32] {
        &self.free_pages
    }

    /// Number of frames with a non-zero pin count. Zero at the boundary of
    /// every public engine call.
    pub fn pinned_frames_count(&self) -> usize {
        self.frames.iter().filter(|f| f.pin_count > 0).count()
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                e.show_backtrace();
            }
        }
    }
}
