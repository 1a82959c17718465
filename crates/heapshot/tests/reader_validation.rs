//! Reader Validation Tests - Malformed and Unfinished Snapshots
//!
//! The reader must refuse anything it cannot decode exactly:
//! - Other format versions
//! - Files whose dump died before the header was patched
//! - TYPE/OBJECT ordering violations
//! - Malformed primitives

mod common;

use common::{dump, LinkedPair};
use heapshot::format::{write_string, FORMAT_VERSION, MAGIC_NUMBER, TAG_EOS, TAG_OBJECT, TAG_TYPE};
use heapshot::runtime::{FieldKind, HeapModel};
use heapshot::{
    read_snapshot, write_snapshot, HeapShotError, ScanOptions, SnapshotFile, SnapshotWriter,
    WorkingSnapshot,
};
use parking_lot::Mutex;
use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::sync::Arc;

/// Hand-assembled snapshot bytes
struct RawSnapshot {
    bytes: Vec<u8>,
}

impl RawSnapshot {
    fn new(version: u32, counts: [u32; 4]) -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC_NUMBER.to_le_bytes());
        bytes.extend_from_slice(&version.to_le_bytes());
        write_string(&mut bytes, "raw").unwrap();
        for count in counts {
            bytes.extend_from_slice(&count.to_le_bytes());
        }
        Self { bytes }
    }

    fn u32(mut self, value: u32) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn tag(mut self, tag: u8) -> Self {
        self.bytes.push(tag);
        self
    }

    fn string(mut self, value: &str) -> Self {
        write_string(&mut self.bytes, value).unwrap();
        self
    }

    fn type_record(self, id: u32, name: &str) -> Self {
        self.tag(TAG_TYPE).u32(id).string(name).u32(0)
    }

    fn object_record(self, id: u32, ty: u32) -> Self {
        self.tag(TAG_OBJECT).u32(id).u32(ty).u32(8).u32(0)
    }

    fn read(self) -> heapshot::Result<SnapshotFile> {
        read_snapshot(&mut Cursor::new(self.bytes))
    }
}

#[test]
fn test_hand_built_file_decodes() {
    let file = RawSnapshot::new(FORMAT_VERSION, [1, 1, 0, 0])
        .type_record(0x10, "App.Node")
        .object_record(0x20, 0x10)
        .tag(TAG_EOS)
        .read()
        .unwrap();
    assert_eq!(file.label, "raw");
    assert_eq!(file.objects[0].type_id.get(), 0x10);
}

#[test]
fn test_unknown_versions_rejected() {
    for version in [1, 5, 7, u32::MAX] {
        let result = RawSnapshot::new(version, [0; 4]).tag(TAG_EOS).read();
        match result {
            Err(HeapShotError::UnsupportedVersion { found, expected }) => {
                assert_eq!(found, version);
                assert_eq!(expected, FORMAT_VERSION);
            }
            other => panic!("version {} accepted: {:?}", version, other),
        }
    }
}

#[test]
fn test_duplicate_type_rejected() {
    let result = RawSnapshot::new(FORMAT_VERSION, [2, 0, 0, 0])
        .type_record(0x10, "App.Node")
        .type_record(0x10, "App.Node")
        .tag(TAG_EOS)
        .read();
    assert!(matches!(result, Err(HeapShotError::DuplicateType { type_id: 0x10 })));
}

#[test]
fn test_object_before_type_rejected() {
    let result = RawSnapshot::new(FORMAT_VERSION, [1, 1, 0, 0])
        .object_record(0x20, 0x10)
        .type_record(0x10, "App.Node")
        .tag(TAG_EOS)
        .read();
    assert!(matches!(result, Err(HeapShotError::UnknownType { type_id: 0x10 })));
}

#[test]
fn test_invalid_utf8_name_rejected() {
    let mut raw = RawSnapshot::new(FORMAT_VERSION, [1, 0, 0, 0])
        .tag(TAG_TYPE)
        .u32(0x10);
    raw.bytes.extend_from_slice(&[2, 0xc3, 0x28]);
    let result = raw.u32(0).tag(TAG_EOS).read();
    assert!(matches!(result, Err(HeapShotError::InvalidString(_))));
}

#[test]
fn test_oversized_varint_rejected() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&MAGIC_NUMBER.to_le_bytes());
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
    assert!(matches!(
        read_snapshot(&mut Cursor::new(bytes)),
        Err(HeapShotError::VarintOverflow)
    ));
}

#[test]
fn test_every_prefix_of_a_good_file_is_rejected() {
    let pair = LinkedPair::new();
    let out = dump(&pair.heap);

    for len in 0..out.bytes.len() {
        let result = read_snapshot(&mut Cursor::new(&out.bytes[..len]));
        let err = result.expect_err("prefix should not decode");
        assert!(err.is_format_error(), "prefix {} gave {:?}", len, err);
    }
}

/// Sink that fails every write after `limit` bytes
///
/// The bytes live in a shared buffer so they stay inspectable after the
/// writer that owned the sink is dropped.
#[derive(Debug)]
struct FailingSink {
    bytes: Arc<Mutex<Vec<u8>>>,
    position: u64,
    limit: u64,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.position + buf.len() as u64 > self.limit {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        let mut bytes = self.bytes.lock();
        let mut cursor = Cursor::new(&mut *bytes);
        cursor.set_position(self.position);
        let written = cursor.write(buf)?;
        self.position = cursor.position();
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for FailingSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut bytes = self.bytes.lock();
        let mut cursor = Cursor::new(&mut *bytes);
        cursor.set_position(self.position);
        self.position = cursor.seek(pos)?;
        Ok(self.position)
    }
}

#[test]
fn test_write_failure_aborts_dump() {
    let mut heap = HeapModel::new();
    let node = heap.add_class("App.Node");
    heap.add_field(node, "next", FieldKind::Reference);
    for _ in 0..10 {
        heap.alloc(node, 24);
    }
    let snapshot = WorkingSnapshot::from_parts(heap.objects(), heap.type_ids());

    let bytes = Arc::new(Mutex::new(Vec::new()));
    let sink = FailingSink {
        bytes: bytes.clone(),
        position: 0,
        limit: 80,
    };
    let writer = SnapshotWriter::new(sink, "aborted").unwrap();
    let err = write_snapshot(&heap, &snapshot, writer, ScanOptions::default()).unwrap_err();
    assert!(err.is_recoverable());

    // What reached the sink is an unfinished snapshot
    let partial = bytes.lock().clone();
    let counters = 4 + 4 + 1 + "aborted".len();
    assert!(partial.len() > counters + 16);
    assert!(partial[counters..counters + 16].iter().all(|b| *b == 0));
    assert_ne!(partial.last(), Some(&TAG_EOS));

    let err = read_snapshot(&mut Cursor::new(partial)).unwrap_err();
    assert!(err.is_format_error(), "partial dump gave {:?}", err);
}

#[test]
fn test_partial_file_with_zero_counters_rejected() {
    let pair = LinkedPair::new();
    let mut bytes = dump(&pair.heap).bytes;

    // Header of a dump that never reached close()
    let counters = 4 + 4 + 1 + common::TEST_LABEL.len();
    bytes[counters..counters + 16].fill(0);
    let err = read_snapshot(&mut Cursor::new(bytes)).unwrap_err();
    assert!(matches!(err, HeapShotError::CounterMismatch { header: 0, .. }));

    let mut unfinished = dump(&pair.heap).bytes;
    unfinished.pop();
    unfinished[counters..counters + 16].fill(0);
    let err = read_snapshot(&mut Cursor::new(unfinished)).unwrap_err();
    assert!(matches!(err, HeapShotError::Truncated { .. }));
}
