use std::{io::SeekFrom, marker::PhantomData, path::Path};

use crate::{
    btree::indexed::Indexed,
    error::RailError,
    io::{Decodeable, DiskSize, Encodeable, RailFile, RailWriter},
    types::RailResult,
};

/// A contiguous run of records inside a `SegmentList` file, addressed by
/// `(offset, len)` in record units. Segment pointers are plain values; the
/// upper layer stores them inside B+ tree records, which is why they order
/// and project like any other tree value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Segment {
    pub offset: u32,
    pub len: u32,
}

// No two live segments share an offset, so the offset alone navigates.
impl Indexed for Segment {
    type Id = u32;

    fn id(&self) -> u32 {
        self.offset
    }
}

impl Encodeable for Segment {
    fn encode(&self) -> Vec<u8> {
        let mut w = RailWriter::new();
        w.write(&self.offset);
        w.write(&self.len);
        w.to_bytes()
    }
}

impl Decodeable for Segment {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        let offset = u32::decode_from(reader);
        let len = u32::decode_from(reader);
        Self { offset, len }
    }
}

impl DiskSize for Segment {
    const DISK_SIZE: usize = 8;
}

/// An append-only run allocator over a flat file of fixed-size records.
///
/// File layout: `[u32 total_records][record_0][record_1]...`. The list keeps
/// no in-memory cache; every access is a direct seek plus read or write.
/// Segments are never freed and the file grows monotonically. Holds the
/// variable-arity per-train data (price tables, remaining-seat vectors) that
/// would otherwise bloat tree nodes.
///
/// `allocate` does not initialise the new records: reading a record before
/// writing it yields whatever bytes were on disk.
pub struct SegmentList<T> {
    file: RailFile,
    total: u32,
    _marker: PhantomData<T>,
}

impl<T: Encodeable + Decodeable + DiskSize> SegmentList<T> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RailError> {
        let mut file = RailFile::open(path)?;

        let total;
        let size = file.get_size()?;
        if size == 0 {
            total = 0;
            file.seek(SeekFrom::Start(0))?;
            file.write_obj(&total)?;
        } else {
            file.seek(SeekFrom::Start(0))?;
            total = file.read_obj::<u32>()?;
            if 4 + total as u64 * T::DISK_SIZE as u64 > size {
                return Err(RailError::corrupt(
                    "segment file is shorter than its record count requires",
                ));
            }
        }

        Ok(Self {
            file,
            total,
            _marker: PhantomData,
        })
    }

    fn pos(index: u32) -> u64 {
        4 + index as u64 * T::DISK_SIZE as u64
    }

    /// Append room for `n` records and return the segment covering them.
    pub fn allocate(&mut self, n: u32) -> Result<Segment, RailError> {
        let seg = Segment {
            offset: self.total,
            len: n,
        };
        self.total += n;

        // reserve the space without touching its content
        self.file.set_len(Self::pos(self.total))?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_obj(&self.total)?;

        Ok(seg)
    }

    pub fn get(&mut self, seg: &Segment, index: u32) -> Result<T, RailError> {
        if index >= seg.len {
            return Err(RailError::out_of_range(&format!(
                "segment index {} out of range (segment length {})",
                index, seg.len
            )));
        }
        self.file.seek(SeekFrom::Start(Self::pos(seg.offset + index)))?;
        self.file.read_obj::<T>()
    }

    pub fn set(&mut self, seg: &Segment, index: u32, value: &T) -> RailResult {
        if index >= seg.len {
            return Err(RailError::out_of_range(&format!(
                "segment index {} out of range (segment length {})",
                index, seg.len
            )));
        }
        self.file.seek(SeekFrom::Start(Self::pos(seg.offset + index)))?;
        self.file.write_obj(value)
    }

    /// Total records across all segments.
    pub fn len(&self) -> u32 {
        self.total
    }
}

/// A persistent growable list over a flat file of fixed-size records, the
/// plain sibling of `SegmentList`. `set` at the current length appends.
pub struct NaiveList<T> {
    file: RailFile,
    len: u32,
    _marker: PhantomData<T>,
}

impl<T: Encodeable + Decodeable + DiskSize> NaiveList<T> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RailError> {
        let mut file = RailFile::open(path)?;

        let len;
        let size = file.get_size()?;
        if size == 0 {
            len = 0;
            file.seek(SeekFrom::Start(0))?;
            file.write_obj(&len)?;
        } else {
            file.seek(SeekFrom::Start(0))?;
            len = file.read_obj::<u32>()?;
            if 4 + len as u64 * T::DISK_SIZE as u64 > size {
                return Err(RailError::corrupt(
                    "list file is shorter than its record count requires",
                ));
            }
        }

        Ok(Self {
            file,
            len,
            _marker: PhantomData,
        })
    }

    fn pos(index: u32) -> u64 {
        4 + index as u64 * T::DISK_SIZE as u64
    }

    pub fn get(&mut self, index: u32) -> Result<T, RailError> {
        if index >= self.len {
            return Err(RailError::out_of_range(&format!(
                "list index {} out of range (length {})",
                index, self.len
            )));
        }
        self.file.seek(SeekFrom::Start(Self::pos(index)))?;
        self.file.read_obj::<T>()
    }

    pub fn set(&mut self, index: u32, value: &T) -> RailResult {
        if index > self.len {
            return Err(RailError::out_of_range(&format!(
                "list index {} out of range (length {})",
                index, self.len
            )));
        }

        if index == self.len {
            self.len += 1;
            self.file.seek(SeekFrom::Start(0))?;
            self.file.write_obj(&self.len)?;
        }

        self.file.seek(SeekFrom::Start(Self::pos(index)))?;
        self.file.write_obj(value)
    }

    pub fn push_back(&mut self, value: &T) -> RailResult {
        self.set(self.len, value)
    }

    pub fn len(&self) -> u32 {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_segment_allocate_and_rw() {
        let dir = tempfile::tempdir().unwrap();
        let mut seats: SegmentList<u32> =
            SegmentList::open(dir.path().join("seats.dat")).unwrap();

        let a = seats.allocate(3).unwrap();
        let b = seats.allocate(2).unwrap();
        assert_eq!(0, a.offset);
        assert_eq!(3, a.len);
        assert_eq!(3, b.offset);
        assert_eq!(5, seats.len());

        for i in 0..3 {
            seats.set(&a, i, &(100 + i)).unwrap();
        }
        seats.set(&b, 0, &7).unwrap();
        seats.set(&b, 1, &8).unwrap();

        assert_eq!(101, seats.get(&a, 1).unwrap());
        assert_eq!(8, seats.get(&b, 1).unwrap());

        // the two segments must not alias
        assert_eq!(102, seats.get(&a, 2).unwrap());
    }

    #[test]
    fn test_segment_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut seats: SegmentList<u32> =
            SegmentList::open(dir.path().join("seats.dat")).unwrap();

        let seg = seats.allocate(2).unwrap();
        let err = seats.get(&seg, 2).unwrap_err();
        assert_eq!(ErrorKind::OutOfRange, err.get_kind());

        let err = seats.set(&seg, 5, &1).unwrap_err();
        assert_eq!(ErrorKind::OutOfRange, err.get_kind());
    }

    #[test]
    fn test_segment_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.dat");

        let seg;
        {
            let mut prices: SegmentList<i64> = SegmentList::open(&path).unwrap();
            seg = prices.allocate(4).unwrap();
            for i in 0..4 {
                prices.set(&seg, i, &(i as i64 * 1000)).unwrap();
            }
        }

        let mut prices: SegmentList<i64> = SegmentList::open(&path).unwrap();
        assert_eq!(4, prices.len());
        assert_eq!(3000, prices.get(&seg, 3).unwrap());

        // new segments land after the reloaded records
        let next = prices.allocate(1).unwrap();
        assert_eq!(4, next.offset);
    }

    #[test]
    fn test_naive_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.dat");

        {
            let mut orders: NaiveList<u64> = NaiveList::open(&path).unwrap();
            orders.push_back(&11).unwrap();
            orders.push_back(&22).unwrap();
            orders.set(2, &33).unwrap();
            assert_eq!(3, orders.len());

            let err = orders.set(5, &99).unwrap_err();
            assert_eq!(ErrorKind::OutOfRange, err.get_kind());
        }

        let mut orders: NaiveList<u64> = NaiveList::open(&path).unwrap();
        assert_eq!(3, orders.len());
        assert_eq!(22, orders.get(1).unwrap());
        assert_eq!(33, orders.get(2).unwrap());
        assert!(orders.get(3).is_err());
    }
}
