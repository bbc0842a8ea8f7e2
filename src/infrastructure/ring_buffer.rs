// Fixed-capacity ring buffer of fixed-size records with a write-through backing file
use crate::domain::cycle::FixedRecord;
use bytes::{Buf, BufMut};
use std::collections::VecDeque;
use std::collections::vec_deque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAGIC: &[u8; 4] = b"PMRB";
const VERSION: u16 = 2;
pub const HEADER_SIZE: usize = 24;
/// Per-slot sequence number preceding each record
const SEQ_SIZE: usize = 8;

#[derive(Debug, Error)]
pub enum RingBufferError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("schema mismatch in {path}: file stores {stored}-byte records, schema expects {expected}")]
    SchemaMismatch {
        path: PathBuf,
        stored: usize,
        expected: usize,
    },

    #[error("capacity mismatch in {path}: file holds {stored} records, requested {requested}")]
    CapacityMismatch {
        path: PathBuf,
        stored: usize,
        requested: usize,
    },

    #[error("{path} is not a valid ring buffer file: {reason}")]
    BadHeader { path: PathBuf, reason: String },

    #[error("ring buffer capacity must be at least 1")]
    ZeroCapacity,

    #[error("{0} is not supported, the ring buffer is append-only")]
    Unsupported(&'static str),
}

impl RingBufferError {
    fn io(path: &Path, source: io::Error) -> Self {
        RingBufferError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// First difference found between the in-memory buffer and its backing file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Divergence {
    Capacity { file: usize, memory: usize },
    Size { file: usize, memory: usize },
    Cursor { file: usize, memory: usize },
    Element { index: usize },
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Divergence::Capacity { file, memory } => {
                write!(f, "capacity mismatch: file {}, mem {}", file, memory)
            }
            Divergence::Size { file, memory } => {
                write!(f, "current size mismatch: file {}, mem {}", file, memory)
            }
            Divergence::Cursor { file, memory } => {
                write!(f, "oldest slot mismatch: file {}, mem {}", file, memory)
            }
            Divergence::Element { index } => write!(f, "element mismatch at index {}", index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    capacity: u32,
    record_size: u32,
}

impl Header {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.put_slice(MAGIC);
        buf.put_u16(VERSION);
        buf.put_u16(0);
        buf.put_u32(self.capacity);
        buf.put_u32(self.record_size);
        buf.put_u64(0);
        buf
    }

    fn decode(mut buf: &[u8]) -> Result<Self, String> {
        if buf.len() < HEADER_SIZE {
            return Err(format!("header is {} bytes, expected {}", buf.len(), HEADER_SIZE));
        }
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if &magic != MAGIC {
            return Err("bad magic".to_string());
        }
        let version = buf.get_u16();
        if version != VERSION {
            return Err(format!("unsupported version {}", version));
        }
        let _reserved = buf.get_u16();

        let header = Header {
            capacity: buf.get_u32(),
            record_size: buf.get_u32(),
        };
        if header.capacity == 0 {
            return Err("zero capacity".to_string());
        }
        Ok(header)
    }
}

/// Occupied slots of a backing file, oldest first, as `(slot, seq)` pairs.
/// A slot with sequence number 0 has never been written.
fn occupied_slots(slots: &[u8], capacity: usize, slot_size: usize) -> Vec<(usize, u64)> {
    let mut occupied: Vec<(usize, u64)> = (0..capacity)
        .filter_map(|slot| {
            let mut bytes = &slots[slot * slot_size..slot * slot_size + SEQ_SIZE];
            let seq = bytes.get_u64();
            (seq != 0).then_some((slot, seq))
        })
        .collect();
    occupied.sort_by_key(|&(_, seq)| seq);
    occupied
}

/// Ring buffer holding the newest `capacity` records, oldest first.
///
/// Every `push` is a single slot write, synced before it returns; a failed
/// write leaves both copies as they were. Each slot carries a sequence
/// number, and the order is rebuilt from those on open, so a crash during a
/// push leaves either the old record or the new one in place. Only appends
/// are supported. One instance per backing file: two writers on the same
/// path will silently clobber each other's slots.
pub struct DurableRingBuffer<R: FixedRecord> {
    path: PathBuf,
    file: File,
    capacity: usize,
    /// Slot holding the oldest record
    head: usize,
    /// Sequence number the next push is written with
    next_seq: u64,
    records: VecDeque<R>,
}

impl<R: FixedRecord> fmt::Debug for DurableRingBuffer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableRingBuffer")
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .field("len", &self.records.len())
            .finish()
    }
}

impl<R: FixedRecord> DurableRingBuffer<R> {
    const SLOT_SIZE: usize = SEQ_SIZE + R::SIZE;

    /// Open `path`, creating an empty backing file if it does not exist.
    pub fn open(capacity: usize, path: impl AsRef<Path>) -> Result<Self, RingBufferError> {
        if capacity == 0 {
            return Err(RingBufferError::ZeroCapacity);
        }
        let path = path.as_ref().to_path_buf();

        match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => Self::load(capacity, path, file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::create(capacity, path),
            Err(e) => Err(RingBufferError::io(&path, e)),
        }
    }

    fn create(capacity: usize, path: PathBuf) -> Result<Self, RingBufferError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| RingBufferError::io(&path, e))?;

        let header = Header {
            capacity: capacity as u32,
            record_size: R::SIZE as u32,
        };
        let file_len = (HEADER_SIZE + capacity * Self::SLOT_SIZE) as u64;
        file.write_all(&header.encode())
            .and_then(|_| file.set_len(file_len))
            .and_then(|_| file.sync_all())
            .map_err(|e| RingBufferError::io(&path, e))?;

        tracing::info!(
            "Created ring buffer {} ({} x {} bytes)",
            path.display(),
            capacity,
            R::SIZE
        );

        Ok(Self {
            path,
            file,
            capacity,
            head: 0,
            next_seq: 1,
            records: VecDeque::with_capacity(capacity),
        })
    }

    fn load(capacity: usize, path: PathBuf, mut file: File) -> Result<Self, RingBufferError> {
        let (header, slots) = read_file(&path, &mut file)?;

        if header.record_size as usize != R::SIZE {
            return Err(RingBufferError::SchemaMismatch {
                path,
                stored: header.record_size as usize,
                expected: R::SIZE,
            });
        }
        if header.capacity as usize != capacity {
            return Err(RingBufferError::CapacityMismatch {
                path,
                stored: header.capacity as usize,
                requested: capacity,
            });
        }
        if slots.len() < capacity * Self::SLOT_SIZE {
            return Err(RingBufferError::BadHeader {
                path,
                reason: format!(
                    "file truncated: {} slot bytes, expected {}",
                    slots.len(),
                    capacity * Self::SLOT_SIZE
                ),
            });
        }

        let occupied = occupied_slots(&slots, capacity, Self::SLOT_SIZE);
        let (head, first_seq) = occupied.first().copied().unwrap_or((0, 1));
        let mut records = VecDeque::with_capacity(capacity);
        for (i, &(slot, seq)) in occupied.iter().enumerate() {
            if slot != (head + i) % capacity || first_seq.checked_add(i as u64) != Some(seq) {
                return Err(RingBufferError::BadHeader {
                    path,
                    reason: format!("slot {} is out of sequence (seq {})", slot, seq),
                });
            }
            let start = slot * Self::SLOT_SIZE + SEQ_SIZE;
            let mut bytes = &slots[start..start + R::SIZE];
            records.push_back(R::decode(&mut bytes));
        }
        let Some(next_seq) = first_seq.checked_add(records.len() as u64) else {
            return Err(RingBufferError::BadHeader {
                path,
                reason: "sequence numbers exhausted".to_string(),
            });
        };

        tracing::info!(
            "Opened ring buffer {} with {} of {} records",
            path.display(),
            records.len(),
            capacity
        );

        Ok(Self {
            path,
            file,
            capacity,
            head,
            next_seq,
            records,
        })
    }

    fn encode_slot(seq: u64, record: &R) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SLOT_SIZE);
        bytes.put_u64(seq);
        record.encode(&mut bytes);
        bytes
    }

    /// Sequence number of the record at `index`
    fn seq_of(&self, index: usize) -> u64 {
        self.next_seq - self.records.len() as u64 + index as u64
    }

    /// Append `record` as the newest entry, evicting the oldest when full.
    pub fn push(&mut self, record: R) -> Result<(), RingBufferError> {
        let len = self.records.len();
        let (slot, new_head) = if len < self.capacity {
            ((self.head + len) % self.capacity, self.head)
        } else {
            (self.head, (self.head + 1) % self.capacity)
        };

        // What the slot holds now, in case the write has to be undone
        let previous = match self.records.front() {
            Some(oldest) if len == self.capacity => Self::encode_slot(self.seq_of(0), oldest),
            _ => vec![0u8; Self::SLOT_SIZE],
        };
        let bytes = Self::encode_slot(self.next_seq, &record);

        let evicted = if len == self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);

        if let Err(e) = self.write_slot(slot, &bytes) {
            if let Err(restore) = self.write_slot(slot, &previous) {
                tracing::error!(
                    "Could not restore slot {} of {}: {}",
                    slot,
                    self.path.display(),
                    restore
                );
            }
            self.rollback(evicted);
            return Err(e);
        }

        self.head = new_head;
        self.next_seq += 1;
        Ok(())
    }

    fn rollback(&mut self, evicted: Option<R>) {
        self.records.pop_back();
        if let Some(old) = evicted {
            self.records.push_front(old);
        }
        tracing::warn!(
            "Push to {} failed, in-memory append rolled back",
            self.path.display()
        );
    }

    fn write_slot(&mut self, slot: usize, bytes: &[u8]) -> Result<(), RingBufferError> {
        let offset = (HEADER_SIZE + slot * Self::SLOT_SIZE) as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(bytes))
            .and_then(|_| self.file.sync_data())
            .map_err(|e| RingBufferError::io(&self.path, e))
    }

    /// Record at `index`, 0 being the oldest
    pub fn get(&self, index: usize) -> Option<&R> {
        self.records.get(index)
    }

    /// The most recently pushed record
    pub fn newest(&self) -> Option<&R> {
        self.records.len().checked_sub(1).and_then(|i| self.get(i))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records from oldest to newest
    pub fn iter(&self) -> vec_deque::Iter<'_, R> {
        self.records.iter()
    }

    pub fn pop(&mut self) -> Result<R, RingBufferError> {
        Err(RingBufferError::Unsupported("pop"))
    }

    pub fn shift(&mut self) -> Result<R, RingBufferError> {
        Err(RingBufferError::Unsupported("shift"))
    }

    pub fn dequeue(&mut self) -> Result<R, RingBufferError> {
        Err(RingBufferError::Unsupported("dequeue"))
    }

    pub fn enqueue(&mut self, _record: R) -> Result<(), RingBufferError> {
        Err(RingBufferError::Unsupported("enqueue"))
    }

    /// Re-read the backing file and compare it with memory.
    pub fn check_consistency(&self) -> Result<Option<Divergence>, RingBufferError> {
        let mut file = File::open(&self.path).map_err(|e| RingBufferError::io(&self.path, e))?;
        let (header, slots) = read_file(&self.path, &mut file)?;

        let file_capacity = header.capacity as usize;
        if file_capacity != self.capacity {
            return Ok(Some(Divergence::Capacity {
                file: file_capacity,
                memory: self.capacity,
            }));
        }
        if slots.len() < self.capacity * Self::SLOT_SIZE {
            return Ok(Some(Divergence::Size {
                file: slots.len() / Self::SLOT_SIZE,
                memory: self.records.len(),
            }));
        }

        let occupied = occupied_slots(&slots, self.capacity, Self::SLOT_SIZE);
        if occupied.len() != self.records.len() {
            return Ok(Some(Divergence::Size {
                file: occupied.len(),
                memory: self.records.len(),
            }));
        }
        if let Some(&(file_head, _)) = occupied.first() {
            if file_head != self.head {
                return Ok(Some(Divergence::Cursor {
                    file: file_head,
                    memory: self.head,
                }));
            }
        }

        for (index, record) in self.records.iter().enumerate() {
            let slot = (self.head + index) % self.capacity;
            let start = slot * Self::SLOT_SIZE;
            let stored = &slots[start..start + Self::SLOT_SIZE];
            if stored != Self::encode_slot(self.seq_of(index), record).as_slice() {
                return Ok(Some(Divergence::Element { index }));
            }
        }

        Ok(None)
    }

    #[cfg(test)]
    pub(crate) fn replace_file(&mut self, file: File) -> File {
        std::mem::replace(&mut self.file, file)
    }

    /// Flush and release the backing file.
    pub fn close(self) -> Result<(), RingBufferError> {
        self.file
            .sync_all()
            .map_err(|e| RingBufferError::io(&self.path, e))?;
        tracing::debug!("Closed ring buffer {}", self.path.display());
        Ok(())
    }
}

impl<'a, R: FixedRecord> IntoIterator for &'a DurableRingBuffer<R> {
    type Item = &'a R;
    type IntoIter = vec_deque::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn read_file(path: &Path, file: &mut File) -> Result<(Header, Vec<u8>), RingBufferError> {
    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut contents))
        .map_err(|e| RingBufferError::io(path, e))?;

    let header = Header::decode(&contents).map_err(|reason| RingBufferError::BadHeader {
        path: path.to_path_buf(),
        reason,
    })?;
    let slots = contents.split_off(HEADER_SIZE);
    Ok((header, slots))
}
