//! Binary decoder and encoder for per-thread trace files.
//!
//! Layout (all little-endian): a 16-byte file header
//! `{magic "task", version, pid, tid}` followed by records, each prefixed
//! by a 16-byte generic header `{timestamp: u64, kind: u32, reserved: u32}`
//! and carrying a fixed-size payload per kind. BEGIN/END markers have no
//! payload but still occupy a full generic header.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::TraceError;
use crate::record::{
    AllreduceRecord, CreateRecord, DeleteRecord, DependencyRecord, RankRecord, Record,
    RecordKind, RecordPayload, RecvRecord, ScheduleRecord, SendRecord, TaskProperties,
    TaskStatuses,
};
use crate::{Pid, Tid, LABEL_MAX};

pub const MAGIC: &[u8; 4] = b"task";
pub const FILE_HEADER_SIZE: usize = 16;
pub const GENERIC_HEADER_SIZE: usize = 16;

/// Trace file header: one file per (process, thread) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    pub pid: Pid,
    pub tid: Tid,
}

/// Read a whole trace file into its header and records.
pub fn read_trace_file(path: &Path) -> Result<(FileHeader, Vec<Record>), TraceError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut buf = [0u8; FILE_HEADER_SIZE];
    if !read_exact_or_eof(&mut reader, &mut buf)? {
        return Err(TraceError::ShortRead {
            expected: FILE_HEADER_SIZE,
            found: 0,
        });
    }
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&buf[0..4]);
    if &magic != MAGIC {
        return Err(TraceError::BadMagic {
            path: path.to_path_buf(),
            found: magic,
        });
    }
    let header = FileHeader {
        version: LittleEndian::read_u32(&buf[4..8]),
        pid: LittleEndian::read_u32(&buf[8..12]),
        tid: LittleEndian::read_u32(&buf[12..16]),
    };

    let mut records = Vec::new();
    let mut generic = [0u8; GENERIC_HEADER_SIZE];
    loop {
        if !read_exact_or_eof(&mut reader, &mut generic)? {
            break;
        }
        let time = LittleEndian::read_u64(&generic[0..8]);
        let kind = LittleEndian::read_u32(&generic[8..12]);
        let kind = RecordKind::from_u32(kind).ok_or(TraceError::UnknownKind { kind })?;

        let payload_len = kind.size() - GENERIC_HEADER_SIZE;
        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 && !read_exact_or_eof(&mut reader, &mut payload)? {
            return Err(TraceError::ShortRead {
                expected: payload_len,
                found: 0,
            });
        }
        records.push(Record {
            pid: header.pid,
            tid: header.tid,
            time,
            payload: decode_payload(kind, &payload),
        });
    }
    Ok((header, records))
}

/// Read exactly `buf.len()` bytes. Returns `Ok(false)` on a clean EOF at the
/// first byte; a truncated tail is a `ShortRead`.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, TraceError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(TraceError::ShortRead {
                    expected: buf.len(),
                    found: filled,
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn decode_payload(kind: RecordKind, buf: &[u8]) -> RecordPayload {
    let u32_at = |off: usize| LittleEndian::read_u32(&buf[off..off + 4]);
    match kind {
        RecordKind::Begin => RecordPayload::Ignore { end: false },
        RecordKind::End => RecordPayload::Ignore { end: true },
        RecordKind::Dependency => RecordPayload::Dependency(DependencyRecord {
            out_uid: u32_at(0),
            in_uid: u32_at(4),
        }),
        RecordKind::Schedule => RecordPayload::Schedule(ScheduleRecord {
            uid: u32_at(0),
            priority: u32_at(4),
            properties: TaskProperties::from_bits_retain(u32_at(8)),
            schedule_id: u32_at(12),
            statuses: TaskStatuses::from_bits_retain(u32_at(16)),
            // 4 bytes of padding before the counters
            hwcounters: [
                LittleEndian::read_u64(&buf[24..32]),
                LittleEndian::read_u64(&buf[32..40]),
                LittleEndian::read_u64(&buf[40..48]),
                LittleEndian::read_u64(&buf[48..56]),
            ],
        }),
        RecordKind::Create => RecordPayload::Create(CreateRecord {
            uid: u32_at(0),
            persistent_uid: u32_at(4),
            properties: TaskProperties::from_bits_retain(u32_at(8)),
            statuses: TaskStatuses::from_bits_retain(u32_at(12)),
            label: decode_label(&buf[16..16 + LABEL_MAX]),
            color: u32_at(16 + LABEL_MAX),
            parent_uid: u32_at(20 + LABEL_MAX),
            omp_priority: u32_at(24 + LABEL_MAX),
            npredecessors: 0,
        }),
        RecordKind::Delete => RecordPayload::Delete(DeleteRecord {
            uid: u32_at(0),
            priority: u32_at(4),
            properties: TaskProperties::from_bits_retain(u32_at(8)),
            statuses: TaskStatuses::from_bits_retain(u32_at(12)),
        }),
        RecordKind::Send => RecordPayload::Send(SendRecord {
            uid: u32_at(0),
            count: u32_at(4),
            dtype: u32_at(8),
            dst: u32_at(12),
            tag: u32_at(16),
            comm: u32_at(20),
            completed: u32_at(24),
        }),
        RecordKind::Recv => RecordPayload::Recv(RecvRecord {
            uid: u32_at(0),
            count: u32_at(4),
            dtype: u32_at(8),
            src: u32_at(12),
            tag: u32_at(16),
            comm: u32_at(20),
            completed: u32_at(24),
        }),
        RecordKind::Allreduce => RecordPayload::Allreduce(AllreduceRecord {
            uid: u32_at(0),
            count: u32_at(4),
            dtype: u32_at(8),
            op: u32_at(12),
            comm: u32_at(16),
            completed: u32_at(20),
        }),
        RecordKind::Rank => RecordPayload::Rank(RankRecord {
            comm: u32_at(0),
            rank: u32_at(4),
        }),
        RecordKind::Blocked => RecordPayload::Blocked { uid: u32_at(0) },
        RecordKind::Unblocked => RecordPayload::Unblocked { uid: u32_at(0) },
    }
}

fn decode_label(buf: &[u8]) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Append the on-disk encoding of one record, generic header included.
pub fn encode_record(record: &Record, out: &mut Vec<u8>) {
    let kind = record.kind();
    let start = out.len();
    out.extend_from_slice(&record.time.to_le_bytes());
    out.extend_from_slice(&(kind as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // reserved

    match &record.payload {
        RecordPayload::Ignore { .. } => {}
        RecordPayload::Dependency(d) => {
            put_u32s(out, &[d.out_uid, d.in_uid]);
        }
        RecordPayload::Schedule(s) => {
            put_u32s(
                out,
                &[
                    s.uid,
                    s.priority,
                    s.properties.bits(),
                    s.schedule_id,
                    s.statuses.bits(),
                    0,
                ],
            );
            for hw in &s.hwcounters {
                out.extend_from_slice(&hw.to_le_bytes());
            }
        }
        RecordPayload::Create(c) => {
            put_u32s(
                out,
                &[c.uid, c.persistent_uid, c.properties.bits(), c.statuses.bits()],
            );
            let mut label = [0u8; LABEL_MAX];
            let bytes = c.label.as_bytes();
            let n = bytes.len().min(LABEL_MAX);
            label[..n].copy_from_slice(&bytes[..n]);
            out.extend_from_slice(&label);
            put_u32s(out, &[c.color, c.parent_uid, c.omp_priority]);
        }
        RecordPayload::Delete(d) => {
            put_u32s(
                out,
                &[d.uid, d.priority, d.properties.bits(), d.statuses.bits()],
            );
        }
        RecordPayload::Send(s) => {
            put_u32s(
                out,
                &[s.uid, s.count, s.dtype, s.dst, s.tag, s.comm, s.completed],
            );
        }
        RecordPayload::Recv(r) => {
            put_u32s(
                out,
                &[r.uid, r.count, r.dtype, r.src, r.tag, r.comm, r.completed],
            );
        }
        RecordPayload::Allreduce(a) => {
            put_u32s(out, &[a.uid, a.count, a.dtype, a.op, a.comm, a.completed]);
        }
        RecordPayload::Rank(r) => {
            put_u32s(out, &[r.comm, r.rank]);
        }
        RecordPayload::Blocked { uid } | RecordPayload::Unblocked { uid } => {
            put_u32s(out, &[*uid]);
        }
    }

    // trailing padding up to the fixed record size
    while out.len() - start < kind.size() {
        out.push(0);
    }
    debug_assert_eq!(out.len() - start, kind.size());
}

fn put_u32s(out: &mut Vec<u8>, values: &[u32]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// Write a trace file with the given header and records.
pub fn write_trace_file(
    path: &Path,
    header: &FileHeader,
    records: &[Record],
) -> Result<(), TraceError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(MAGIC)?;
    writer.write_u32::<LittleEndian>(header.version)?;
    writer.write_u32::<LittleEndian>(header.pid)?;
    writer.write_u32::<LittleEndian>(header.tid)?;

    let mut buf = Vec::new();
    for record in records {
        buf.clear();
        encode_record(record, &mut buf);
        writer.write_all(&buf)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn sample_records() -> Vec<Record> {
        vec![
            Record::new(0, 1, 10, RecordPayload::Ignore { end: false }),
            Record::new(
                0,
                1,
                20,
                RecordPayload::Rank(RankRecord { comm: 0, rank: 3 }),
            ),
            Record::new(
                0,
                1,
                30,
                RecordPayload::Create(CreateRecord {
                    uid: 7,
                    persistent_uid: 2,
                    properties: TaskProperties::EXPLICIT | TaskProperties::PERSISTENT,
                    statuses: TaskStatuses::empty(),
                    label: "stencil".into(),
                    color: 5,
                    parent_uid: 1,
                    omp_priority: 4,
                    npredecessors: 0,
                }),
            ),
            Record::new(
                0,
                1,
                40,
                RecordPayload::Dependency(DependencyRecord {
                    out_uid: 7,
                    in_uid: 8,
                }),
            ),
            Record::new(
                0,
                1,
                50,
                RecordPayload::Schedule(ScheduleRecord {
                    uid: 7,
                    priority: 1,
                    properties: TaskProperties::EXPLICIT,
                    statuses: TaskStatuses::STARTED,
                    schedule_id: 12,
                    hwcounters: [1, 2, 3, 4],
                }),
            ),
            Record::new(
                0,
                1,
                60,
                RecordPayload::Send(SendRecord {
                    uid: 7,
                    count: 8,
                    dtype: 3,
                    dst: 1,
                    tag: 9,
                    comm: 0,
                    completed: 1,
                }),
            ),
            Record::new(
                0,
                1,
                70,
                RecordPayload::Recv(RecvRecord {
                    uid: 7,
                    count: 8,
                    dtype: 3,
                    src: 1,
                    tag: 9,
                    comm: 0,
                    completed: 0,
                }),
            ),
            Record::new(
                0,
                1,
                80,
                RecordPayload::Allreduce(AllreduceRecord {
                    uid: 7,
                    count: 1,
                    dtype: 3,
                    op: 2,
                    comm: 0,
                    completed: 1,
                }),
            ),
            Record::new(0, 1, 90, RecordPayload::Blocked { uid: 7 }),
            Record::new(0, 1, 95, RecordPayload::Unblocked { uid: 7 }),
            Record::new(
                0,
                1,
                99,
                RecordPayload::Delete(DeleteRecord {
                    uid: 7,
                    priority: 1,
                    properties: TaskProperties::EXPLICIT,
                    statuses: TaskStatuses::COMPLETED,
                }),
            ),
            Record::new(0, 1, 100, RecordPayload::Ignore { end: true }),
        ]
    }

    #[test]
    fn round_trip_every_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.0.1");
        let header = FileHeader {
            version: 1,
            pid: 0,
            tid: 1,
        };
        let records = sample_records();
        write_trace_file(&path, &header, &records).unwrap();

        let (read_header, read_records) = read_trace_file(&path).unwrap();
        assert_eq!(read_header, header);
        assert_eq!(read_records, records);
    }

    #[test]
    fn encoded_sizes_match_the_format() {
        for record in sample_records() {
            let mut buf = Vec::new();
            encode_record(&record, &mut buf);
            assert_eq!(buf.len(), record.kind().size(), "{record}");
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus");
        std::fs::write(&path, b"nope000000000000").unwrap();
        match read_trace_file(&path) {
            Err(TraceError::BadMagic { found, .. }) => assert_eq!(&found, b"nope"),
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unknown");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.write_u32::<LittleEndian>(1).unwrap();
        bytes.write_u32::<LittleEndian>(0).unwrap();
        bytes.write_u32::<LittleEndian>(0).unwrap();
        bytes.write_u64::<LittleEndian>(42).unwrap(); // timestamp
        bytes.write_u32::<LittleEndian>(99).unwrap(); // kind
        bytes.write_u32::<LittleEndian>(0).unwrap();
        std::fs::write(&path, &bytes).unwrap();
        match read_trace_file(&path) {
            Err(TraceError::UnknownKind { kind }) => assert_eq!(kind, 99),
            other => panic!("expected UnknownKind, got {other:?}"),
        }
    }

    #[test]
    fn truncated_payload_is_a_short_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated");
        let header = FileHeader {
            version: 1,
            pid: 0,
            tid: 0,
        };
        let records = sample_records();
        write_trace_file(&path, &header, &records).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 7]).unwrap();
        assert!(matches!(
            read_trace_file(&path),
            Err(TraceError::ShortRead { .. })
        ));
    }

    #[test]
    fn long_labels_are_truncated_to_the_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("label");
        let record = Record::new(
            0,
            0,
            1,
            RecordPayload::Create(CreateRecord {
                uid: 1,
                persistent_uid: 0,
                properties: TaskProperties::empty(),
                statuses: TaskStatuses::empty(),
                label: "x".repeat(LABEL_MAX + 10),
                color: 0,
                parent_uid: 0,
                omp_priority: 0,
                npredecessors: 0,
            }),
        );
        write_trace_file(
            &path,
            &FileHeader {
                version: 1,
                pid: 0,
                tid: 0,
            },
            &[record],
        )
        .unwrap();
        let (_, records) = read_trace_file(&path).unwrap();
        match &records[0].payload {
            RecordPayload::Create(c) => assert_eq!(c.label.len(), LABEL_MAX),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
