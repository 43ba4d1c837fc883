//! Append-only persistence for published events.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use docb_types::BuildId;

use crate::error::{EventError, EventResult};

/// Sink the bus writes every published event to.
pub trait EventLog: Send + Sync {
    fn append(
        &self,
        build_id: Option<&BuildId>,
        event_type: &str,
        payload: &[u8],
        metadata: &BTreeMap<String, String>,
    ) -> EventResult<()>;
}

/// One persisted event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub build_id: Option<BuildId>,
    pub event_type: String,
    /// JSON encoding of the event.
    pub payload: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
    pub recorded_at: DateTime<Utc>,
}

/// Length + CRC32.
const HEADER_SIZE: usize = 8;

/// Single-file event log.
///
/// On-disk format, repeated:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized EventRecord)]
/// ```
pub struct FileEventLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    sync_writes: bool,
}

impl FileEventLog {
    /// Open (or create) the log at `path`.
    ///
    /// A torn or corrupt tail left by a crash is cut off first, so new
    /// records always follow the last intact frame.
    pub fn open(path: impl AsRef<Path>) -> EventResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let scan = scan_frames(BufReader::new(&file), file_len)?;
        if scan.valid_len < file_len {
            warn!(
                path = %path.display(),
                valid = scan.valid_len,
                dropped = file_len - scan.valid_len,
                "trimming damaged event log tail"
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
            sync_writes: false,
        })
    }

    /// `fsync` after every append.
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a fully formed record.
    pub fn append_record(&self, record: &EventRecord) -> EventResult<()> {
        let payload =
            bincode::serialize(record).map_err(|e| EventError::Serialization(e.to_string()))?;
        let length = u32::try_from(payload.len())
            .map_err(|_| EventError::Serialization("event record too large".into()))?;
        let crc = crc32fast::hash(&payload);

        let mut w = self.writer.lock()?;
        w.write_all(&length.to_le_bytes())?;
        w.write_all(&crc.to_le_bytes())?;
        w.write_all(&payload)?;
        w.flush()?;
        if self.sync_writes {
            w.get_ref().sync_all()?;
        }

        debug!(event = %record.event_type, len = payload.len(), "event log append");
        Ok(())
    }

    /// Every intact record, oldest first.
    ///
    /// Reading stops at the first frame that is truncated, fails its CRC, or
    /// does not decode; anything after it is treated as lost.
    pub fn recover(&self) -> EventResult<Vec<EventRecord>> {
        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let scan = scan_frames(BufReader::new(file), file_len)?;
        debug!(recovered = scan.records.len(), "event log recovery complete");
        Ok(scan.records)
    }
}

struct FrameScan {
    records: Vec<EventRecord>,
    /// Bytes covered by intact frames.
    valid_len: u64,
}

/// Decode frames from the start of a log of `file_len` bytes.
fn scan_frames(mut reader: impl Read, file_len: u64) -> EventResult<FrameScan> {
    let mut records = Vec::new();
    let mut offset: u64 = 0;

    loop {
        let mut header = [0u8; HEADER_SIZE];
        match read_full(&mut reader, &mut header)? {
            0 => break,
            n if n < HEADER_SIZE => {
                warn!(offset, "torn event log header; stopping recovery");
                break;
            }
            _ => {}
        }
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let remaining = file_len.saturating_sub(offset + HEADER_SIZE as u64);
        if u64::from(length) > remaining {
            warn!(offset, length, remaining, "truncated event log entry; stopping recovery");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        if read_full(&mut reader, &mut payload)? < payload.len() {
            warn!(offset, length, "truncated event log entry; stopping recovery");
            break;
        }

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            warn!(
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "event log CRC mismatch; stopping recovery"
            );
            break;
        }

        match bincode::deserialize::<EventRecord>(&payload) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(offset, error = %e, "undecodable event log entry; stopping recovery");
                break;
            }
        }
        offset += (HEADER_SIZE + payload.len()) as u64;
    }

    Ok(FrameScan {
        records,
        valid_len: offset,
    })
}

impl EventLog for FileEventLog {
    fn append(
        &self,
        build_id: Option<&BuildId>,
        event_type: &str,
        payload: &[u8],
        metadata: &BTreeMap<String, String>,
    ) -> EventResult<()> {
        self.append_record(&EventRecord {
            build_id: build_id.cloned(),
            event_type: event_type.to_string(),
            payload: payload.to_vec(),
            metadata: metadata.clone(),
            recorded_at: Utc::now(),
        })
    }
}

/// Fill `buf` as far as the input allows; returns the bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
