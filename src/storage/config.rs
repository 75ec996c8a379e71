use std::{
    io::SeekFrom,
    path::Path,
    sync::{Arc, RwLock},
};

use log::error;

use crate::{
    error::RailError,
    io::{Decodeable, DiskSize, Encodeable, RailFile},
    types::Pod,
    utils::HandyRwLock,
};

#[derive(Debug)]
struct ConfigInner {
    file: RailFile,

    // next byte offset to hand out
    cursor: u64,

    // true when the file was empty at open time, i.e. slots start from
    // their defaults instead of disk
    fresh: bool,
}

/// A small store persisting a sequence of named scalars across runs.
///
/// Clients register each scalar once at startup with `track`; the slot is
/// bound to a sequential byte offset in the file. Registration order MUST be
/// identical across runs, otherwise the values deserialise into the wrong
/// slots. The upper layer guarantees this by registering the same roots in
/// the same order every time it boots.
pub struct ConfigStore {
    inner: Pod<ConfigInner>,
}

impl ConfigStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RailError> {
        let file = RailFile::open(path)?;
        let fresh = file.get_size()? == 0;

        Ok(Self {
            inner: Arc::new(RwLock::new(ConfigInner {
                file,
                cursor: 0,
                fresh,
            })),
        })
    }

    /// Reserve the next `T::DISK_SIZE` bytes and bind a slot to them.
    ///
    /// On a fresh store the slot takes `default`; otherwise it is read back
    /// from disk. The slot writes its current value to the same offset when
    /// it is dropped.
    pub fn track<T>(&self, default: T) -> Result<Slot<T>, RailError>
    where
        T: Encodeable + Decodeable + DiskSize,
    {
        let mut inner = self.inner.wl();
        let offset = inner.cursor;
        inner.cursor += T::DISK_SIZE as u64;

        let val = if inner.fresh {
            default
        } else {
            if inner.file.get_size()? < offset + T::DISK_SIZE as u64 {
                return Err(RailError::corrupt(
                    "config file is shorter than the tracked slots require",
                ));
            }
            inner.file.seek(SeekFrom::Start(offset))?;
            inner.file.read_obj::<T>()?
        };

        Ok(Slot {
            val,
            offset,
            inner: Arc::clone(&self.inner),
        })
    }
}

/// One tracked scalar, written back at its registration offset on drop.
#[derive(Debug)]
pub struct Slot<T: Encodeable> {
    pub val: T,
    offset: u64,
    inner: Pod<ConfigInner>,
}

impl<T: Encodeable> Drop for Slot<T> {
    fn drop(&mut self) {
        let mut inner = self.inner.wl();
        if let Err(e) = inner.file.seek(SeekFrom::Start(self.offset)) {
            error!("config slot write-back seek failed: {}", e);
            return;
        }
        if let Err(e) = inner.file.write_obj(&self.val) {
            error!("config slot write-back failed: {}", e);
        }
    }
}
