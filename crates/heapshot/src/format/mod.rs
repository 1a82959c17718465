//! Snapshot File Format (version 6)
//!
//! ```text
//! offset  field                      encoding
//! 0       magic                      u32 (0x4eabbdd1)
//! 4       format version             u32 (6)
//! 8       label                      varint length + bytes
//! next    type/object/ref/field count 4 x u32, patched at close
//! stream  records                    tag byte + payload
//!
//! TYPE   0x01  type id, name, (field id, field name)*, 0
//! OBJECT 0x02  object id (type id for statics), type id, size,
//!              (target id, field id or 0)*, 0
//! EOS    0xff  no payload, last byte of a finished file
//! ```
//!
//! Fixed-width integers are little-endian. String lengths are unsigned
//! LEB128: seven bits per byte, high bit set on every byte but the last.

pub mod reader;
pub mod writer;

pub use reader::{
    read_snapshot, FieldEntry, ObjectRecord, ReferenceRecord, SnapshotFile, TypeRecord,
};
pub use writer::SnapshotWriter;

use crate::error::{HeapShotError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// File magic number
pub const MAGIC_NUMBER: u32 = 0x4eab_bdd1;

/// Format version written and accepted by this crate
pub const FORMAT_VERSION: u32 = 6;

/// TYPE record tag
pub const TAG_TYPE: u8 = 0x01;

/// OBJECT record tag
pub const TAG_OBJECT: u8 = 0x02;

/// End-of-stream tag
pub const TAG_EOS: u8 = 0xff;

/// Null identity terminating field and reference lists
pub const NULL_ID: u32 = 0;

/// Record totals stored in the header counter block
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCounts {
    /// TYPE records
    pub types: u32,
    /// OBJECT records, static pseudo-objects included
    pub objects: u32,
    /// Reference pairs
    pub references: u32,
    /// Field entries across all TYPE records
    pub fields: u32,
}

impl SnapshotCounts {
    pub(crate) fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u32::<LittleEndian>(self.types)?;
        out.write_u32::<LittleEndian>(self.objects)?;
        out.write_u32::<LittleEndian>(self.references)?;
        out.write_u32::<LittleEndian>(self.fields)
    }

    pub(crate) fn read_from<R: Read>(input: &mut R) -> Result<Self> {
        Ok(Self {
            types: read_u32(input, "header counters")?,
            objects: read_u32(input, "header counters")?,
            references: read_u32(input, "header counters")?,
            fields: read_u32(input, "header counters")?,
        })
    }
}

impl std::fmt::Display for SnapshotCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} types, {} objects, {} references, {} fields",
            self.types, self.objects, self.references, self.fields
        )
    }
}

/// Write an unsigned LEB128 integer
pub fn write_varint<W: Write>(out: &mut W, mut value: u32) -> io::Result<()> {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.write_u8(byte)?;
        if value == 0 {
            return Ok(());
        }
    }
}

/// Read an unsigned LEB128 integer
pub fn read_varint<R: Read>(input: &mut R) -> Result<u32> {
    let mut value: u32 = 0;
    let mut shift = 0u32;
    loop {
        let byte = read_u8(input, "varint")?;
        let bits = u32::from(byte & 0x7f);
        if shift == 28 && bits > 0x0f {
            return Err(HeapShotError::VarintOverflow);
        }
        value |= bits << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 28 {
            return Err(HeapShotError::VarintOverflow);
        }
    }
}

/// Write a length-prefixed string
pub fn write_string<W: Write>(out: &mut W, value: &str) -> io::Result<()> {
    let len = u32::try_from(value.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string longer than 4 GiB"))?;
    write_varint(out, len)?;
    out.write_all(value.as_bytes())
}

/// Read a length-prefixed string
pub fn read_string<R: Read>(input: &mut R) -> Result<String> {
    let len = read_varint(input)? as usize;
    let mut bytes = Vec::new();
    input.by_ref().take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(HeapShotError::Truncated { context: "string" });
    }
    Ok(String::from_utf8(bytes)?)
}

pub(crate) fn read_u8<R: Read>(input: &mut R, context: &'static str) -> Result<u8> {
    input.read_u8().map_err(|e| eof_as_truncated(e, context))
}

pub(crate) fn read_u32<R: Read>(input: &mut R, context: &'static str) -> Result<u32> {
    input
        .read_u32::<LittleEndian>()
        .map_err(|e| eof_as_truncated(e, context))
}

fn eof_as_truncated(err: io::Error, context: &'static str) -> HeapShotError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        HeapShotError::Truncated { context }
    } else {
        HeapShotError::Io(err)
    }
}
