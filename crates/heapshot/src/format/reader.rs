//! Snapshot Reader
//!
//! Validating decoder for version 6 snapshots. The whole file is decoded
//! into a [`SnapshotFile`]; any structural problem is reported as a format
//! error instead of being guessed around. A dump that died before `close`
//! shows up as [`HeapShotError::Truncated`] (no EOS tag) or, if the tail was
//! somehow written, as a [`HeapShotError::CounterMismatch`] against the
//! zeroed header counters.

use super::{
    read_string, read_u32, read_u8, SnapshotCounts, FORMAT_VERSION, MAGIC_NUMBER, TAG_EOS,
    TAG_OBJECT, TAG_TYPE,
};
use crate::error::{HeapShotError, Result};
use crate::runtime::{FieldId, ObjectId, TypeId};
use rustc_hash::FxHashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Field entry of a TYPE record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEntry {
    /// Field identity
    pub id: FieldId,
    /// Field name
    pub name: String,
}

/// Decoded TYPE record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRecord {
    /// Type identity
    pub id: TypeId,
    /// Fully qualified name
    pub name: String,
    /// Fields in declaration order, statics included
    pub fields: Vec<FieldEntry>,
}

impl TypeRecord {
    /// Name of one of this type's fields
    pub fn field_name(&self, field: FieldId) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.id == field)
            .map(|f| f.name.as_str())
    }
}

/// One reference pair of an OBJECT record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReferenceRecord {
    /// Referenced object
    pub target: ObjectId,
    /// Field holding the reference; `None` for array elements
    pub field: Option<FieldId>,
}

/// Decoded OBJECT record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Object identity, or the type identity for a static pseudo-object
    pub id: u32,
    /// Type of the object
    pub type_id: TypeId,
    /// Byte size, 0 for static pseudo-objects
    pub size: u32,
    /// Outgoing references in emission order
    pub references: Vec<ReferenceRecord>,
}

impl ObjectRecord {
    /// Check if this record is the static pseudo-object of its type
    pub fn is_static(&self) -> bool {
        self.id == self.type_id.get()
    }
}

/// Fully decoded snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    /// Format version from the header
    pub version: u32,
    /// Free-form label from the header
    pub label: String,
    /// Header counters (validated against the body)
    pub counts: SnapshotCounts,
    /// TYPE records in file order
    pub types: Vec<TypeRecord>,
    /// OBJECT records in file order
    pub objects: Vec<ObjectRecord>,
}

impl SnapshotFile {
    /// Open and decode a snapshot file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        read_snapshot(&mut BufReader::new(file))
    }

    /// Number of reference pairs across all objects
    pub fn reference_count(&self) -> usize {
        self.objects.iter().map(|o| o.references.len()).sum()
    }
}

/// Reader wrapper that tracks the byte offset for error reports
struct Positioned<'a, R: Read> {
    inner: &'a mut R,
    offset: u64,
}

impl<R: Read> Read for Positioned<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Decode and validate a snapshot stream
pub fn read_snapshot<R: Read>(input: &mut R) -> Result<SnapshotFile> {
    let mut input = Positioned { inner: input, offset: 0 };

    let magic = read_u32(&mut input, "header")?;
    if magic != MAGIC_NUMBER {
        return Err(HeapShotError::BadMagic { found: magic });
    }
    let version = read_u32(&mut input, "header")?;
    if version != FORMAT_VERSION {
        return Err(HeapShotError::UnsupportedVersion {
            found: version,
            expected: FORMAT_VERSION,
        });
    }
    let label = read_string(&mut input)?;
    let counts = SnapshotCounts::read_from(&mut input)?;

    let mut types = Vec::new();
    let mut objects = Vec::new();
    let mut seen_types = FxHashSet::default();
    let mut actual = SnapshotCounts::default();

    loop {
        let offset = input.offset;
        match read_u8(&mut input, "record tag")? {
            TAG_TYPE => {
                let record = read_type(&mut input)?;
                if !seen_types.insert(record.id) {
                    return Err(HeapShotError::DuplicateType {
                        type_id: record.id.get(),
                    });
                }
                actual.types += 1;
                actual.fields += record.fields.len() as u32;
                types.push(record);
            }
            TAG_OBJECT => {
                let record = read_object(&mut input)?;
                if !seen_types.contains(&record.type_id) {
                    return Err(HeapShotError::UnknownType {
                        type_id: record.type_id.get(),
                    });
                }
                actual.objects += 1;
                actual.references += record.references.len() as u32;
                objects.push(record);
            }
            TAG_EOS => break,
            tag => return Err(HeapShotError::UnexpectedTag { tag, offset }),
        }
    }

    check_counter("type", counts.types, actual.types)?;
    check_counter("object", counts.objects, actual.objects)?;
    check_counter("reference", counts.references, actual.references)?;
    check_counter("field", counts.fields, actual.fields)?;

    Ok(SnapshotFile {
        version,
        label,
        counts,
        types,
        objects,
    })
}

fn read_type<R: Read>(input: &mut R) -> Result<TypeRecord> {
    let raw = read_u32(input, "type record")?;
    let id = TypeId::new(raw).ok_or(HeapShotError::UnknownType { type_id: raw })?;
    let name = read_string(input)?;

    let mut fields = Vec::new();
    while let Some(field) = FieldId::new(read_u32(input, "type record")?) {
        fields.push(FieldEntry {
            id: field,
            name: read_string(input)?,
        });
    }
    Ok(TypeRecord { id, name, fields })
}

fn read_object<R: Read>(input: &mut R) -> Result<ObjectRecord> {
    let id = read_u32(input, "object record")?;
    let raw_type = read_u32(input, "object record")?;
    let type_id = TypeId::new(raw_type).ok_or(HeapShotError::UnknownType { type_id: raw_type })?;
    let size = read_u32(input, "object record")?;

    let mut references = Vec::new();
    while let Some(target) = ObjectId::new(read_u32(input, "reference list")?) {
        let field = FieldId::new(read_u32(input, "reference list")?);
        references.push(ReferenceRecord { target, field });
    }
    Ok(ObjectRecord {
        id,
        type_id,
        size,
        references,
    })
}

fn check_counter(counter: &'static str, header: u32, actual: u32) -> Result<()> {
    if header != actual {
        return Err(HeapShotError::CounterMismatch {
            counter,
            header,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TypeInfo;
    use crate::format::SnapshotWriter;
    use crate::runtime::{FieldDescriptor, FieldKind, TypeShape};
    use std::io::Cursor;

    fn node_type() -> TypeInfo {
        let id = TypeId::new(0x10).unwrap();
        TypeInfo {
            id,
            name: "App.Node".to_string(),
            shape: TypeShape::Object,
            fields: vec![FieldDescriptor {
                id: FieldId::new(0x20).unwrap(),
                name: "next".to_string(),
                declaring_type: id,
                kind: FieldKind::Reference,
                is_static: false,
            }],
        }
    }

    fn two_node_file() -> Vec<u8> {
        let node = node_type();
        let a = ObjectId::new(0x30).unwrap();
        let b = ObjectId::new(0x40).unwrap();
        let mut writer = SnapshotWriter::new(Cursor::new(Vec::new()), "label").unwrap();
        writer.begin_object(Some(a), &node, 24).unwrap();
        writer.add_reference(b, FieldId::new(0x20)).unwrap();
        writer.end_object().unwrap();
        writer.begin_object(Some(b), &node, 24).unwrap();
        writer.end_object().unwrap();
        writer.close().unwrap().0.into_inner()
    }

    #[test]
    fn test_decode_written_file() {
        let file = read_snapshot(&mut Cursor::new(two_node_file())).unwrap();
        assert_eq!(file.version, FORMAT_VERSION);
        assert_eq!(file.label, "label");
        assert_eq!(file.types.len(), 1);
        assert_eq!(file.types[0].field_name(FieldId::new(0x20).unwrap()), Some("next"));
        assert_eq!(file.objects.len(), 2);
        assert_eq!(file.objects[0].references.len(), 1);
        assert!(!file.objects[0].is_static());
        assert_eq!(file.reference_count(), 1);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = two_node_file();
        bytes[0] ^= 0xff;
        assert!(matches!(
            read_snapshot(&mut Cursor::new(bytes)),
            Err(HeapShotError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_rejects_other_versions() {
        let mut bytes = two_node_file();
        bytes[4..8].copy_from_slice(&5u32.to_le_bytes());
        assert!(matches!(
            read_snapshot(&mut Cursor::new(bytes)),
            Err(HeapShotError::UnsupportedVersion { found: 5, .. })
        ));
    }

    #[test]
    fn test_missing_eos_is_truncated() {
        let mut bytes = two_node_file();
        bytes.pop();
        assert!(matches!(
            read_snapshot(&mut Cursor::new(bytes)),
            Err(HeapShotError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unpatched_counters_detected() {
        let mut bytes = two_node_file();
        // header: magic, version, "label" with one-byte length
        let counters = 4 + 4 + 1 + 5;
        bytes[counters..counters + 16].fill(0);
        assert!(matches!(
            read_snapshot(&mut Cursor::new(bytes)),
            Err(HeapShotError::CounterMismatch { counter: "type", header: 0, actual: 1 })
        ));
    }

    #[test]
    fn test_unknown_tag_reports_offset() {
        let mut bytes = two_node_file();
        let first_record = 4 + 4 + 1 + 5 + 16;
        bytes[first_record] = 0x7e;
        match read_snapshot(&mut Cursor::new(bytes)) {
            Err(HeapShotError::UnexpectedTag { tag, offset }) => {
                assert_eq!(tag, 0x7e);
                assert_eq!(offset, first_record as u64);
            }
            other => panic!("expected UnexpectedTag, got {:?}", other),
        }
    }
}
