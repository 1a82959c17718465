//! Snapshot Writer
//!
//! Append-only encoder for the snapshot stream. The only backward seek
//! happens in [`SnapshotWriter::close`], which patches the header counters
//! once every record is out. If any write fails the writer is abandoned and
//! the file keeps its zeroed counters and lacks the EOS tag, which readers
//! report as a truncated snapshot.

use super::{
    write_string, SnapshotCounts, FORMAT_VERSION, MAGIC_NUMBER, NULL_ID, TAG_EOS, TAG_OBJECT,
    TAG_TYPE,
};
use crate::catalog::TypeInfo;
use crate::error::{HeapShotError, Result};
use crate::runtime::{FieldId, ObjectId, TypeId};
use byteorder::{LittleEndian, WriteBytesExt};
use rustc_hash::FxHashSet;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

/// Sequential snapshot encoder over any seekable sink
#[derive(Debug)]
pub struct SnapshotWriter<W: Write + Seek> {
    out: W,
    counts: SnapshotCounts,
    counts_offset: u64,
    seen_types: FxHashSet<TypeId>,
    in_object: bool,
}

impl SnapshotWriter<BufWriter<File>> {
    /// Create (or truncate) a snapshot file and write its header
    pub fn create(path: impl AsRef<Path>, label: &str) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Self::new(BufWriter::new(file), label)
    }
}

impl<W: Write + Seek> SnapshotWriter<W> {
    /// Write the fixed header and zeroed counter block to `out`
    pub fn new(mut out: W, label: &str) -> Result<Self> {
        out.write_u32::<LittleEndian>(MAGIC_NUMBER)?;
        out.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        write_string(&mut out, label)?;

        let counts_offset = out.stream_position()?;
        SnapshotCounts::default().write_to(&mut out)?;

        Ok(Self {
            out,
            counts: SnapshotCounts::default(),
            counts_offset,
            seen_types: FxHashSet::default(),
            in_object: false,
        })
    }

    /// Start an OBJECT record, preceded by a TYPE record on first use of the type
    ///
    /// `object` is `None` for the static pseudo-object of `ty`, which is
    /// recorded under the type id with size 0.
    pub fn begin_object(&mut self, object: Option<ObjectId>, ty: &TypeInfo, size: u32) -> Result<()> {
        if self.in_object {
            return Err(HeapShotError::invalid_state("no open object", "open object"));
        }

        if self.seen_types.insert(ty.id) {
            self.write_type(ty)?;
        }

        self.out.write_u8(TAG_OBJECT)?;
        match object {
            Some(obj) => {
                self.out.write_u32::<LittleEndian>(obj.get())?;
                self.out.write_u32::<LittleEndian>(ty.id.get())?;
                self.out.write_u32::<LittleEndian>(size)?;
            }
            None => {
                self.out.write_u32::<LittleEndian>(ty.id.get())?;
                self.out.write_u32::<LittleEndian>(ty.id.get())?;
                self.out.write_u32::<LittleEndian>(0)?;
            }
        }
        self.counts.objects += 1;
        self.in_object = true;
        Ok(())
    }

    fn write_type(&mut self, ty: &TypeInfo) -> Result<()> {
        self.out.write_u8(TAG_TYPE)?;
        self.out.write_u32::<LittleEndian>(ty.id.get())?;
        write_string(&mut self.out, &ty.name)?;
        for field in &ty.fields {
            self.out.write_u32::<LittleEndian>(field.id.get())?;
            write_string(&mut self.out, &field.name)?;
            self.counts.fields += 1;
        }
        self.out.write_u32::<LittleEndian>(NULL_ID)?;
        self.counts.types += 1;
        Ok(())
    }

    /// Append a reference pair to the open object
    pub fn add_reference(&mut self, target: ObjectId, field: Option<FieldId>) -> Result<()> {
        if !self.in_object {
            return Err(HeapShotError::invalid_state("open object", "no open object"));
        }
        self.out.write_u32::<LittleEndian>(target.get())?;
        self.out.write_u32::<LittleEndian>(FieldId::raw_or_null(field))?;
        self.counts.references += 1;
        Ok(())
    }

    /// Terminate the reference list of the open object
    pub fn end_object(&mut self) -> Result<()> {
        if !self.in_object {
            return Err(HeapShotError::invalid_state("open object", "no open object"));
        }
        self.out.write_u32::<LittleEndian>(NULL_ID)?;
        self.in_object = false;
        Ok(())
    }

    /// Totals written so far
    pub fn counts(&self) -> SnapshotCounts {
        self.counts
    }

    /// Write EOS, patch the counter block and flush
    ///
    /// Returns the sink and the final totals.
    pub fn close(mut self) -> Result<(W, SnapshotCounts)> {
        if self.in_object {
            return Err(HeapShotError::invalid_state("no open object", "open object"));
        }

        self.out.write_u8(TAG_EOS)?;
        let end = self.out.stream_position()?;
        self.out.seek(SeekFrom::Start(self.counts_offset))?;
        self.counts.write_to(&mut self.out)?;
        self.out.seek(SeekFrom::Start(end))?;
        self.out.flush()?;
        Ok((self.out, self.counts))
    }
}
