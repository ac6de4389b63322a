//! WAL record types and their wire format.
//!
//! Every record is a flat little-endian byte string:
//!
//! ```text
//! kind: u8 | lsn: u64 | txn_id: u64 | page_id: u32 |
//! key_len: u16 | key | val_len: u16 | value | checksum: u32
//! ```
//!
//! The fixed prefix through `key_len` is 23 bytes; the smallest possible
//! record (empty key and value) is 29 bytes.

use bytes::{Buf, BufMut, BytesMut};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;

/// Log Sequence Number: a monotonically increasing identifier assigned to
/// each WAL record. Resets to zero when the log is truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    pub fn next(self) -> Self {
        Lsn(self.0 + 1)
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lsn({})", self.0)
    }
}

/// Record kinds and their wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Insert = 1,
    Update = 2,
    Delete = 3,
    Checkpoint = 4,
    Begin = 5,
    Commit = 6,
    Abort = 7,
}

impl RecordKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Insert),
            2 => Some(Self::Update),
            3 => Some(Self::Delete),
            4 => Some(Self::Checkpoint),
            5 => Some(Self::Begin),
            6 => Some(Self::Commit),
            7 => Some(Self::Abort),
            _ => None,
        }
    }
}

/// A single WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub kind: RecordKind,
    pub lsn: Lsn,
    pub txn_id: u64,
    pub page_id: PageId,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Size of the fixed prefix through `key_len`.
const PREFIX_SIZE: usize = 1 + 8 + 8 + 4 + 2;

impl WalRecord {
    /// Total encoded size of this record.
    pub fn encoded_len(&self) -> usize {
        PREFIX_SIZE + self.key.len() + 2 + self.value.len() + 4
    }

    /// XOR-fold of the record fields into a u32. The u64 fields contribute
    /// their low 32 bits; key and value contribute byte by byte.
    pub fn checksum(&self) -> u32 {
        let mut sum = self.kind as u32;
        sum ^= self.lsn.0 as u32;
        sum ^= self.txn_id as u32;
        sum ^= self.page_id.0;
        for &b in &self.key {
            sum ^= u32::from(b);
        }
        for &b in &self.value {
            sum ^= u32::from(b);
        }
        sum
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u8(self.kind as u8);
        buf.put_u64_le(self.lsn.0);
        buf.put_u64_le(self.txn_id);
        buf.put_u32_le(self.page_id.0);
        buf.put_u16_le(self.key.len() as u16);
        buf.put_slice(&self.key);
        buf.put_u16_le(self.value.len() as u16);
        buf.put_slice(&self.value);
        buf.put_u32_le(self.checksum());
    }

    /// Decodes one record from the front of `buf`, advancing it past the
    /// record. Truncation, an unknown kind, or a checksum mismatch is
    /// [`StorageError::Corruption`].
    pub fn decode(buf: &mut &[u8]) -> StorageResult<Self> {
        if buf.remaining() < PREFIX_SIZE {
            return Err(StorageError::Corruption(
                "truncated record prefix".to_string(),
            ));
        }

        let kind_byte = buf.get_u8();
        let kind = RecordKind::from_u8(kind_byte).ok_or_else(|| {
            StorageError::Corruption(format!("unknown record kind {kind_byte}"))
        })?;
        let lsn = Lsn(buf.get_u64_le());
        let txn_id = buf.get_u64_le();
        let page_id = PageId(buf.get_u32_le());

        let key_len = buf.get_u16_le() as usize;
        if buf.remaining() < key_len {
            return Err(StorageError::Corruption("truncated key".to_string()));
        }
        let key = buf[..key_len].to_vec();
        buf.advance(key_len);

        if buf.remaining() < 2 {
            return Err(StorageError::Corruption(
                "truncated value length".to_string(),
            ));
        }
        let val_len = buf.get_u16_le() as usize;
        if buf.remaining() < val_len {
            return Err(StorageError::Corruption("truncated value".to_string()));
        }
        let value = buf[..val_len].to_vec();
        buf.advance(val_len);

        if buf.remaining() < 4 {
            return Err(StorageError::Corruption(
                "truncated checksum".to_string(),
            ));
        }
        let stored = buf.get_u32_le();

        let record = Self {
            kind,
            lsn,
            txn_id,
            page_id,
            key,
            value,
        };
        let computed = record.checksum();
        if stored != computed {
            return Err(StorageError::Corruption(format!(
                "record {} checksum mismatch: stored {stored:#010x}, computed {computed:#010x}",
                record.lsn
            )));
        }

        Ok(record)
    }
}
