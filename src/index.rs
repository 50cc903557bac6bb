//! The per-pool key-value index consulted by the server responder for all
//! `IO_REQUEST`/`INFO_REQUEST` traffic. Opaque from the wire's perspective:
//! just `put`/`get`/`erase`/`count`/`find`/`get_attribute` over key bytes.

use crate::error::StatusError;
use crate::protocol::AttributeType;
use dashmap::DashMap;
use std::time::{SystemTime, UNIX_EPOCH};

struct Record {
    value: Vec<u8>,
    write_epoch_secs: u64,
}

pub struct Index {
    records: DashMap<Vec<u8>, Record>,
}

impl Index {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// `replace = false` fails with `E_KEY_EXISTS` if `key` is already present.
    pub fn put(&self, key: &[u8], value: &[u8], replace: bool) -> Result<(), StatusError> {
        if !replace && self.records.contains_key(key) {
            return Err(StatusError::KeyExists);
        }
        let write_epoch_secs = now_epoch_secs();
        self.records.insert(
            key.to_vec(),
            Record {
                value: value.to_vec(),
                write_epoch_secs,
            },
        );
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, StatusError> {
        self.records
            .get(key)
            .map(|r| r.value.clone())
            .ok_or(StatusError::KeyNotFound)
    }

    pub fn erase(&self, key: &[u8]) -> Result<(), StatusError> {
        self.records.remove(key).map(|_| ()).ok_or(StatusError::KeyNotFound)
    }

    pub fn count(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn get_attribute(&self, key: &[u8], attr: AttributeType) -> Result<u64, StatusError> {
        match attr {
            AttributeType::Count => Ok(self.count()),
            AttributeType::PercentUsed => Ok(100),
            AttributeType::AutoHashtableExpansion => Ok(1),
            AttributeType::MemoryType => Ok(0),
            AttributeType::Crc32 => {
                let record = self.records.get(key).ok_or(StatusError::KeyNotFound)?;
                Ok(crc32(&record.value) as u64)
            }
            AttributeType::WriteEpochTime => {
                let record = self.records.get(key).ok_or(StatusError::KeyNotFound)?;
                Ok(record.write_epoch_secs)
            }
            AttributeType::ValueLen => {
                let record = self.records.get(key).ok_or(StatusError::KeyNotFound)?;
                Ok(record.value.len() as u64)
            }
            AttributeType::FindKey => Err(StatusError::BadParam),
        }
    }

    /// Return the first key at or past `offset` (in sorted order) containing
    /// `pattern` as a substring, plus its offset into that ordering — enough
    /// for a caller to resume enumeration from the returned offset.
    pub fn find(&self, pattern: &[u8], offset: u64) -> Result<(Vec<u8>, u64), StatusError> {
        let mut keys: Vec<Vec<u8>> = self.records.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        for (i, key) in keys.iter().enumerate() {
            if (i as u64) < offset {
                continue;
            }
            if contains_subslice(key, pattern) {
                return Ok((key.clone(), i as u64));
            }
        }
        Err(StatusError::KeyNotFound)
    }
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

const CRC32_POLY: u32 = 0xEDB8_8320;

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (CRC32_POLY & mask);
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_round_trips() {
        let idx = Index::new();
        idx.put(b"k1", b"v1", false).unwrap();
        assert_eq!(idx.get(b"k1").unwrap(), b"v1");
    }

    #[test]
    fn put_without_replace_on_existing_key_fails() {
        let idx = Index::new();
        idx.put(b"dup", b"a", false).unwrap();
        assert_eq!(idx.put(b"dup", b"b", false).unwrap_err(), StatusError::KeyExists);
        assert_eq!(idx.get(b"dup").unwrap(), b"a");
    }

    #[test]
    fn put_with_replace_overwrites() {
        let idx = Index::new();
        idx.put(b"dup", b"a", false).unwrap();
        idx.put(b"dup", b"b", true).unwrap();
        assert_eq!(idx.get(b"dup").unwrap(), b"b");
    }

    #[test]
    fn erase_then_get_is_not_found_and_erase_is_not_idempotent() {
        let idx = Index::new();
        idx.put(b"k1", b"v1", false).unwrap();
        idx.erase(b"k1").unwrap();
        assert_eq!(idx.get(b"k1").unwrap_err(), StatusError::KeyNotFound);
        assert_eq!(idx.erase(b"k1").unwrap_err(), StatusError::KeyNotFound);
    }

    #[test]
    fn count_reflects_live_keys() {
        let idx = Index::new();
        idx.put(b"a", b"1", false).unwrap();
        idx.put(b"b", b"2", false).unwrap();
        idx.erase(b"a").unwrap();
        assert_eq!(idx.count(), 1);
    }

    #[test]
    fn find_resumes_from_offset() {
        let idx = Index::new();
        idx.put(b"apple", b"1", false).unwrap();
        idx.put(b"apricot", b"2", false).unwrap();
        idx.put(b"banana", b"3", false).unwrap();

        let (first, off) = idx.find(b"ap", 0).unwrap();
        assert_eq!(first, b"apple");
        let (second, _) = idx.find(b"ap", off + 1).unwrap();
        assert_eq!(second, b"apricot");
    }

    #[test]
    fn crc32_attribute_is_stable() {
        let idx = Index::new();
        idx.put(b"k1", b"hello", false).unwrap();
        let a = idx.get_attribute(b"k1", AttributeType::Crc32).unwrap();
        let b = idx.get_attribute(b"k1", AttributeType::Crc32).unwrap();
        assert_eq!(a, b);
    }
}
