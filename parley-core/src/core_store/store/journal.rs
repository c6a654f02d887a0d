/*
    journal.rs - Append-only journal of committed log changes

    Durable, sequential record of every conversation opened, message
    appended and delivery state advanced. Replaying the journal through
    `MessageLog::restore` rebuilds the log after a restart.

    Entry layout: [seq:8][timestamp:8][len:4][data:len][crc32:4], little
    endian, `data` is a bincode-encoded `JournalRecord`.

    A torn final entry (crash mid-write) reads as end of journal; a checksum
    mismatch on a complete entry is reported as corruption.
*/

use crate::core_store::model::{Conversation, ConversationId, DeliveryState, Message, MessageId, Timestamp};
use crate::core_store::store::errors::{StoreError, StoreResult};
use crate::metrics::{self as core_metrics, JOURNAL_ERRORS, JOURNAL_RECORDS};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const HEADER_LEN: usize = 8 + 8 + 4;
const TRAILER_LEN: usize = 4;

/// A committed change, as journaled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalRecord {
    Opened(Conversation),
    Appended(Message),
    StateChanged {
        conversation_id: ConversationId,
        message_id: MessageId,
        state: DeliveryState,
    },
}

impl JournalRecord {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            JournalRecord::Opened(conversation) => &conversation.id,
            JournalRecord::Appended(message) => &message.conversation_id,
            JournalRecord::StateChanged { conversation_id, .. } => conversation_id,
        }
    }
}

/// Raw journal entry
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub seq: u64,

    /// Wall-clock millis when the entry was written
    pub timestamp: u64,

    pub data: Vec<u8>,

    pub checksum: u32,
}

impl JournalEntry {
    pub fn new(seq: u64, timestamp: u64, data: Vec<u8>) -> Self {
        let checksum = crc32fast::hash(&data);
        JournalEntry { seq, timestamp, data, checksum }
    }

    pub fn verify_checksum(&self) -> bool {
        crc32fast::hash(&self.data) == self.checksum
    }

    pub fn decode(&self) -> StoreResult<JournalRecord> {
        Ok(bincode::deserialize(&self.data)?)
    }

    fn encoded_len(&self) -> usize {
        HEADER_LEN + self.data.len() + TRAILER_LEN
    }
}

/// Append-only journal file
pub struct Journal {
    path: PathBuf,
    file: BufWriter<File>,
    seq: u64,
    size: usize,
}

impl Journal {
    /// Create or open a journal; sequence numbers continue after existing entries.
    ///
    /// A torn final entry is cut off so new entries follow the last complete one.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        let scan = scan_entries(&path)?;

        let file_len = file.metadata()?.len();
        if scan.valid_len < file_len {
            file.set_len(scan.valid_len)?;
            warn!(
                path = %path.display(),
                discarded = file_len - scan.valid_len,
                "truncated torn journal tail"
            );
        }

        let seq = scan.entries.last().map_or(0, |entry| entry.seq + 1);

        info!(path = %path.display(), entries = scan.entries.len(), "journal opened");
        Ok(Journal { path, file: BufWriter::new(file), seq, size: scan.valid_len as usize })
    }

    /// Append a record and flush it
    pub fn append(&mut self, record: &JournalRecord) -> StoreResult<u64> {
        let data = bincode::serialize(record)?;
        let entry = JournalEntry::new(self.seq, Timestamp::now().as_millis(), data);

        self.file.write_all(&entry.seq.to_le_bytes())?;
        self.file.write_all(&entry.timestamp.to_le_bytes())?;
        self.file.write_all(&(entry.data.len() as u32).to_le_bytes())?;
        self.file.write_all(&entry.data)?;
        self.file.write_all(&entry.checksum.to_le_bytes())?;
        self.file.flush()?;

        self.size += entry.encoded_len();
        self.seq += 1;

        Ok(entry.seq)
    }

    /// Every complete entry, in write order
    pub fn read_all(&self) -> StoreResult<Vec<JournalEntry>> {
        read_entries(&self.path)
    }

    /// Every record, decoded
    pub fn read_records(&self) -> StoreResult<Vec<JournalRecord>> {
        self.read_all()?.iter().map(JournalEntry::decode).collect()
    }

    /// Remove all entries
    pub fn truncate(&mut self) -> StoreResult<()> {
        self.file.flush()?;
        self.file.get_mut().set_len(0)?;
        self.file.get_mut().seek(SeekFrom::Start(0))?;
        self.seq = 0;
        self.size = 0;
        Ok(())
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Sequence number the next entry will get
    pub fn current_seq(&self) -> u64 {
        self.seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every record from the journal at `path` without opening it for writing
pub fn read_journal(path: impl AsRef<Path>) -> StoreResult<Vec<JournalRecord>> {
    read_entries(path.as_ref())?.iter().map(JournalEntry::decode).collect()
}

fn read_entries(path: &Path) -> StoreResult<Vec<JournalEntry>> {
    Ok(scan_entries(path)?.entries)
}

/// Complete entries and the offset just past the last one
struct Scan {
    entries: Vec<JournalEntry>,
    valid_len: u64,
}

fn scan_entries(path: &Path) -> StoreResult<Scan> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();
    let mut offset = 0u64;

    loop {
        let mut header = [0u8; HEADER_LEN];
        if !read_full(&mut reader, &mut header)? {
            break;
        }
        let seq = u64::from_le_bytes(le_bytes(&header[0..8]));
        let timestamp = u64::from_le_bytes(le_bytes(&header[8..16]));
        let len = u32::from_le_bytes(le_bytes(&header[16..20])) as usize;

        // Never allocate past what the file can hold
        let end = offset + (HEADER_LEN + len + TRAILER_LEN) as u64;
        if end > file_len {
            break;
        }

        let mut data = vec![0u8; len];
        let mut checksum = [0u8; TRAILER_LEN];
        if !read_full(&mut reader, &mut data)? || !read_full(&mut reader, &mut checksum)? {
            break;
        }

        let entry = JournalEntry { seq, timestamp, data, checksum: u32::from_le_bytes(checksum) };
        if !entry.verify_checksum() {
            return Err(StoreError::Journal(format!("invalid checksum at seq {}", seq)));
        }
        entries.push(entry);
        offset = end;
    }

    if offset < file_len {
        warn!(path = %path.display(), bytes = file_len - offset, "ignoring torn journal tail");
    }
    Ok(Scan { entries, valid_len: offset })
}

/// Fill `buf`; false if the input ended first
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> StoreResult<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn le_bytes<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

/// Non-blocking handle used by the message log to queue records
#[derive(Clone)]
pub struct JournalWriter {
    tx: mpsc::UnboundedSender<JournalRecord>,
}

impl JournalWriter {
    /// Queue a record; never blocks the caller
    pub fn record(&self, record: JournalRecord) {
        if self.tx.send(record).is_err() {
            core_metrics::record_counter(JOURNAL_ERRORS, 1);
            warn!("journal writer stopped, record dropped");
        }
    }
}

/// Move `journal` onto a blocking task that writes queued records in order.
///
/// The task finishes once every `JournalWriter` clone is dropped and
/// returns the number of records written.
pub fn spawn_journal(mut journal: Journal) -> (JournalWriter, JoinHandle<u64>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<JournalRecord>();

    let handle = tokio::task::spawn_blocking(move || {
        let mut written = 0u64;
        while let Some(record) = rx.blocking_recv() {
            match journal.append(&record) {
                Ok(seq) => {
                    written += 1;
                    core_metrics::record_counter(JOURNAL_RECORDS, 1);
                    debug!(seq, conversation_id = %record.conversation_id(), "journal record written");
                }
                Err(e) => {
                    core_metrics::record_counter(JOURNAL_ERRORS, 1);
                    error!(error = %e, "journal write failed");
                }
            }
        }
        info!(written, path = %journal.path().display(), "journal writer stopped");
        written
    });

    (JournalWriter { tx }, handle)
}
