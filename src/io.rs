use std::{
    convert::TryInto,
    fs::{File, OpenOptions},
    io::{Cursor, Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::Path,
};

use crate::{error::RailError, types::RailResult};

/// A thin wrapper around a read-write file handle.
///
/// All failures are surfaced as `RailError` of kind `Io`; the wrapper never
/// interprets the bytes it moves.
#[derive(Debug)]
pub struct RailFile {
    file: File,
}

impl RailFile {
    pub fn open<P: AsRef<Path>>(file_path: P) -> Result<Self, RailError> {
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .open(file_path)
            .map_err(|e| RailError::io(&e.to_string()))?;

        Ok(Self { file })
    }

    pub fn get_size(&self) -> Result<u64, RailError> {
        let metadata = self.file.metadata().or(Err(RailError::io("metadata failed")))?;
        Ok(metadata.len())
    }

    pub fn set_len(&self, len: u64) -> RailResult {
        self.file
            .set_len(len)
            .or(Err(RailError::io("set_len failed")))?;
        Ok(())
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, RailError> {
        self.file.seek(pos).or(Err(RailError::io("seek failed")))
    }

    pub fn read_bytes(&mut self, bytes_count: usize) -> Result<Vec<u8>, RailError> {
        let mut buf = vec![0u8; bytes_count];
        self.file
            .read_exact(&mut buf)
            .or(Err(RailError::io("short read")))?;
        Ok(buf)
    }

    pub fn write_bytes(&mut self, buf: &[u8]) -> RailResult {
        self.file
            .write_all(buf)
            .or(Err(RailError::io("short write")))?;
        Ok(())
    }

    /// Read one fixed-size object from the current position.
    pub fn read_obj<T: Decodeable + DiskSize>(&mut self) -> Result<T, RailError> {
        let bytes = self.read_bytes(T::DISK_SIZE)?;
        let mut reader = Cursor::new(bytes);
        Ok(T::decode_from(&mut reader))
    }

    /// Write one object at the current position.
    pub fn write_obj<T: Encodeable>(&mut self, obj: &T) -> RailResult {
        self.write_bytes(&obj.encode())
    }

    pub fn flush(&mut self) -> RailResult {
        self.file.flush().or(Err(RailError::io("flush failed")))?;
        Ok(())
    }
}

pub fn read_into<T: Decodeable, R: std::io::Read>(reader: &mut R) -> T {
    T::decode_from(reader)
}

pub fn read_exact<R: std::io::Read>(reader: &mut R, bytes_count: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .expect(&format!("io error, expect {}", bytes_count));
    buffer
}

/// An append-only byte buffer used to assemble page images.
pub struct RailWriter {
    buf: Vec<u8>,
}

impl RailWriter {
    pub fn new() -> Self {
        let buf = Vec::new();
        Self { buf }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.encode().as_slice());
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.clone()
    }

    pub fn to_padded_bytes(&self, size: usize) -> Vec<u8> {
        let mut buf = self.buf.clone();

        if buf.len() > size {
            panic!(
                "buffer size is larger than the given size: {} > {}",
                buf.len(),
                size
            );
        }

        buf.resize(size, 0);
        buf
    }
}

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decodeable {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self;
}

/// The exact number of bytes an object occupies on disk.
///
/// The encode/decode pair of every persisted type must move exactly this
/// many bytes, so that files laid out as packed records can be addressed by
/// index.
pub trait DiskSize {
    const DISK_SIZE: usize;
}

/// # Format
///
/// - 1 byte (0 for false, 1 for true)
impl Encodeable for bool {
    fn encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl Decodeable for bool {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        u8::decode_from(reader) == 1
    }
}

impl DiskSize for bool {
    const DISK_SIZE: usize = 1;
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
                    let bytes = read_exact(reader, size_of::<Self>());
                    Self::from_le_bytes(bytes.try_into().unwrap())
                }
            }

            impl DiskSize for $t {
                const DISK_SIZE: usize = size_of::<Self>();
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);
