//! Versioned little-endian binary (de)serialisation for every persistable
//! value in the runtime: parameters, graphs, stores, and wire messages all
//! go through the same `Out`/`In` contract.
//!
//! Compound containers (maps, vectors) are framed as a leading magic number
//! [`CONTAINER_MAGIC`], then a `u64` element count, then the elements
//! themselves -- this is the versioned container form; legacy streams wrote
//! a raw `i32` count with no magic number, and [`InStream::read_container_len`]
//! still accepts that form on read for backward compatibility.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{self, Cursor, Read, Write};

use crate::error::SerializationError;

/// Magic number prefixing every versioned container. Chosen by the
/// original implementation; preserved exactly so old on-disk shards still
/// parse.
pub const CONTAINER_MAGIC: u32 = 0x0a0c_72e7;

pub type Result<T> = std::result::Result<T, SerializationError>;

/// Write half of the stream contract. Implemented for any `std::io::Write`.
pub trait OutStream: Write {
    fn write_u8_(&mut self, v: u8) -> Result<()> {
        self.write_u8(v).map_err(SerializationError::from)
    }
    fn write_i32_(&mut self, v: i32) -> Result<()> {
        self.write_i32::<LE>(v).map_err(SerializationError::from)
    }
    fn write_u32_(&mut self, v: u32) -> Result<()> {
        self.write_u32::<LE>(v).map_err(SerializationError::from)
    }
    fn write_u64_(&mut self, v: u64) -> Result<()> {
        self.write_u64::<LE>(v).map_err(SerializationError::from)
    }
    fn write_i64_(&mut self, v: i64) -> Result<()> {
        self.write_i64::<LE>(v).map_err(SerializationError::from)
    }
    fn write_f32_(&mut self, v: f32) -> Result<()> {
        self.write_f32::<LE>(v).map_err(SerializationError::from)
    }
    fn write_f64_(&mut self, v: f64) -> Result<()> {
        self.write_f64::<LE>(v).map_err(SerializationError::from)
    }
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_u64_(bytes.len() as u64)?;
        self.write_all(bytes).map_err(SerializationError::from)
    }
    fn write_str_(&mut self, s: &str) -> Result<()> {
        self.write_bytes(s.as_bytes())
    }
    /// Writes the versioned container header: magic number + element count.
    fn write_container_len(&mut self, len: usize) -> Result<()> {
        self.write_u32_(CONTAINER_MAGIC)?;
        self.write_u64_(len as u64)
    }
}
impl<W: Write + ?Sized> OutStream for W {}

/// Read half of the stream contract, over an in-memory buffer so that
/// `ReadView`-style zero-copy string/byte slices can alias into it.
pub struct InStream<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> InStream<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        InStream {
            cursor: Cursor::new(buf),
        }
    }

    /// Bytes still unread.
    pub fn remaining(&self) -> &'a [u8] {
        let pos = self.cursor.position() as usize;
        let buf = self.cursor.get_ref();
        &buf[pos.min(buf.len())..]
    }

    /// Look at the next `n` bytes without consuming them. Returns `None`
    /// if fewer than `n` bytes remain.
    pub fn peek(&self, n: usize) -> Option<&'a [u8]> {
        let rem = self.remaining();
        (rem.len() >= n).then(|| &rem[..n])
    }

    /// Advance the read position by `n` bytes without interpreting them.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.remaining().len() < n {
            return Err(SerializationError::Truncated);
        }
        self.cursor.set_position(self.cursor.position() + n as u64);
        Ok(())
    }

    pub fn read_u8_(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(SerializationError::from)
    }
    pub fn read_i32_(&mut self) -> Result<i32> {
        self.cursor.read_i32::<LE>().map_err(SerializationError::from)
    }
    pub fn read_u32_(&mut self) -> Result<u32> {
        self.cursor.read_u32::<LE>().map_err(SerializationError::from)
    }
    pub fn read_u64_(&mut self) -> Result<u64> {
        self.cursor.read_u64::<LE>().map_err(SerializationError::from)
    }
    pub fn read_i64_(&mut self) -> Result<i64> {
        self.cursor.read_i64::<LE>().map_err(SerializationError::from)
    }
    pub fn read_f32_(&mut self) -> Result<f32> {
        self.cursor.read_f32::<LE>().map_err(SerializationError::from)
    }
    pub fn read_f64_(&mut self) -> Result<f64> {
        self.cursor.read_f64::<LE>().map_err(SerializationError::from)
    }

    /// Zero-copy byte slice: aliases into the backing buffer instead of
    /// allocating, mirroring `ReadView`/`InputStringStream::SetView`.
    pub fn read_bytes_view(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u64_()? as usize;
        let view = self
            .peek(len)
            .ok_or(SerializationError::Truncated)?;
        self.skip(len)?;
        Ok(view)
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        Ok(self.read_bytes_view()?.to_vec())
    }

    pub fn read_str_view(&mut self) -> Result<&'a str> {
        std::str::from_utf8(self.read_bytes_view()?)
            .map_err(|_| SerializationError::Corrupt("invalid utf-8"))
    }

    pub fn read_string(&mut self) -> Result<String> {
        Ok(self.read_str_view()?.to_owned())
    }

    /// Reads a container length header. Accepts both the versioned
    /// (magic + u64) and legacy (raw i32) encodings: if the first four
    /// bytes equal [`CONTAINER_MAGIC`] the versioned u64 count follows,
    /// otherwise those same four bytes are the legacy `i32` count.
    pub fn read_container_len(&mut self) -> Result<usize> {
        let tag = self.read_u32_()?;
        if tag == CONTAINER_MAGIC {
            Ok(self.read_u64_()? as usize)
        } else {
            Ok(tag as i32 as usize)
        }
    }
}

/// Serialises `v` into a freshly-allocated buffer via `write`.
pub fn to_bytes<F>(write: F) -> Vec<u8>
where
    F: FnOnce(&mut dyn OutStream) -> Result<()>,
{
    let mut buf = Vec::new();
    write(&mut buf).expect("writing to an in-memory Vec is infallible");
    buf
}

/// Convenience: run `read` over `buf`, erroring if trailing bytes remain.
pub fn from_bytes_exact<'a, T>(
    buf: &'a [u8],
    read: impl FnOnce(&mut InStream<'a>) -> Result<T>,
) -> Result<T> {
    let mut stream = InStream::new(buf);
    let value = read(&mut stream)?;
    if !stream.remaining().is_empty() {
        return Err(SerializationError::Corrupt("trailing bytes after value"));
    }
    Ok(value)
}

impl From<io::Error> for SerializationError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => SerializationError::Truncated,
            _ => SerializationError::Io(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_scalars() {
        let bytes = to_bytes(|os| {
            os.write_i32_(-7)?;
            os.write_f64_(3.5)?;
            os.write_str_("hello")
        });
        let mut is = InStream::new(&bytes);
        assert_eq!(is.read_i32_().unwrap(), -7);
        assert_eq!(is.read_f64_().unwrap(), 3.5);
        assert_eq!(is.read_string().unwrap(), "hello");
    }

    #[test]
    fn container_len_round_trips_through_magic() {
        let bytes = to_bytes(|os| os.write_container_len(42));
        let mut is = InStream::new(&bytes);
        assert_eq!(is.read_container_len().unwrap(), 42);
    }

    #[test]
    fn legacy_container_len_without_magic() {
        let mut bytes = Vec::new();
        bytes.write_i32::<LE>(5).unwrap();
        let mut is = InStream::new(&bytes);
        assert_eq!(is.read_container_len().unwrap(), 5);
    }

    #[test]
    fn truncated_read_errors() {
        let bytes = to_bytes(|os| os.write_u32_(1));
        let mut is = InStream::new(&bytes);
        assert!(matches!(is.read_u64_(), Err(SerializationError::Truncated)));
    }

    #[test]
    fn read_bytes_view_aliases_input() {
        let bytes = to_bytes(|os| os.write_bytes(b"abc"));
        let mut is = InStream::new(&bytes);
        let view = is.read_bytes_view().unwrap();
        assert_eq!(view, b"abc");
    }
}
