//! L2 — the pool manager contract: create/open/close/delete of named pools,
//! plus enumeration of the backing memory regions of an open pool.
//!
//! `InMemoryPoolManager` is the one backend carried in this crate: it
//! allocates each pool's backing storage from the region map's arena, so
//! `regions()` reports real, stable `(base, len)` ranges the way a
//! persistent devdax-backed pool manager would report its mapped file.

use crate::error::PoolError;
use crate::protocol::{POOL_FLAGS_CREATE_EXCL, POOL_FLAGS_READ_ONLY};
use crate::region_map::RegionMap;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One backing memory range of an open pool, suitable for remote exposure.
#[derive(Debug, Clone, Copy)]
pub struct IoVec {
    pub base: u64,
    pub len: u64,
}

/// A handle to an open pool.
#[derive(Debug, Clone)]
pub struct Pool {
    pub id: u64,
    pub name: String,
    pub size: u64,
    pub read_only: bool,
}

struct PoolRecord {
    name: String,
    size: u64,
    regions: Vec<IoVec>,
    read_only: bool,
}

/// Polymorphic contract any pool backend (in-memory, persistent devdax,
/// hash-indexed) implements.
pub trait PoolManager: Send + Sync {
    fn create_check(&self, size: u64) -> Result<(), PoolError>;
    fn close_check(&self, name: &str) -> Result<(), PoolError>;

    fn create(&self, name: &str, size: u64, flags: u32, expected_object_count: u64) -> Result<Pool, PoolError>;
    fn open(&self, name: &str, flags: u32) -> Result<Pool, PoolError>;
    fn close(&self, name: &str) -> Result<(), PoolError>;
    fn delete(&self, name: &str) -> Result<(), PoolError>;
    fn regions(&self, pool_id: u64) -> Result<Vec<IoVec>, PoolError>;

    /// Resolve a pool id back to its name, for callers (the server responder)
    /// that only see ids on subsequent requests.
    fn name_of(&self, pool_id: u64) -> Option<String>;
}

/// In-memory backend: each pool's storage is a `Vec<u8>` leaked for the
/// process lifetime and registered as a region-map arena.
pub struct InMemoryPoolManager {
    region_map: Arc<RegionMap>,
    by_name: DashMap<String, u64>,
    by_id: DashMap<u64, PoolRecord>,
    next_id: AtomicU64,
}

impl InMemoryPoolManager {
    pub fn new(region_map: Arc<RegionMap>) -> Self {
        Self {
            region_map,
            by_name: DashMap::new(),
            by_id: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn to_pool(id: u64, record: &PoolRecord) -> Pool {
        Pool {
            id,
            name: record.name.clone(),
            size: record.size,
            read_only: record.read_only,
        }
    }
}

impl PoolManager for InMemoryPoolManager {
    fn create_check(&self, size: u64) -> Result<(), PoolError> {
        if size == 0 {
            Err(PoolError::PoolFail)
        } else {
            Ok(())
        }
    }

    fn close_check(&self, name: &str) -> Result<(), PoolError> {
        if self.by_name.contains_key(name) {
            Ok(())
        } else {
            Err(PoolError::NotFound)
        }
    }

    fn create(&self, name: &str, size: u64, flags: u32, _expected_object_count: u64) -> Result<Pool, PoolError> {
        self.create_check(size)?;

        if let Some(existing) = self.by_name.get(name) {
            if flags & POOL_FLAGS_CREATE_EXCL != 0 {
                return Err(PoolError::AlreadyExists);
            }
            let id = *existing;
            drop(existing);
            return self
                .by_id
                .get(&id)
                .map(|r| Self::to_pool(id, &r))
                .ok_or(PoolError::RegionFail);
        }

        let backing: &'static mut [u8] = Box::leak(vec![0u8; size as usize].into_boxed_slice());
        let base = backing.as_ptr() as usize;
        self.region_map
            .add_arena(base, backing.len(), 0)
            .map_err(|_| PoolError::RegionFail)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = PoolRecord {
            name: name.to_string(),
            size,
            regions: vec![IoVec {
                base: base as u64,
                len: size,
            }],
            read_only: flags & POOL_FLAGS_READ_ONLY != 0,
        };
        let pool = Self::to_pool(id, &record);
        self.by_id.insert(id, record);
        self.by_name.insert(name.to_string(), id);
        Ok(pool)
    }

    fn open(&self, name: &str, flags: u32) -> Result<Pool, PoolError> {
        let id = *self.by_name.get(name).ok_or(PoolError::NotFound)?;
        let mut record = self.by_id.get_mut(&id).ok_or(PoolError::NotFound)?;
        if flags & POOL_FLAGS_READ_ONLY != 0 {
            record.read_only = true;
        }
        Ok(Self::to_pool(id, &record))
    }

    fn close(&self, name: &str) -> Result<(), PoolError> {
        self.close_check(name)?;
        // Closing does not release the backing region: the pool can be
        // reopened by name for the lifetime of this process.
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), PoolError> {
        let (_, id) = self.by_name.remove(name).ok_or(PoolError::NotFound)?;
        self.by_id.remove(&id);
        Ok(())
    }

    fn regions(&self, pool_id: u64) -> Result<Vec<IoVec>, PoolError> {
        self.by_id
            .get(&pool_id)
            .map(|r| r.regions.clone())
            .ok_or(PoolError::NotFound)
    }

    fn name_of(&self, pool_id: u64) -> Option<String> {
        self.by_id.get(&pool_id).map(|r| r.name.clone())
    }
}
