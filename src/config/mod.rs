use std::sync::Arc;

use bitflags::bitflags;

use crate::hash::{default_hash, HashFunction};
use crate::qsbr::Qsbr;
use crate::table::DataPtr;

bitflags! {
    /// Table behaviour flags, combined at creation time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TableFlags: u32 {
        /// Hint that hardware transactional memory is available. Accepted
        /// for interface compatibility; the lock path is unchanged.
        const TRANS_MEM_SUPPORT = 1 << 0;
        /// Multiple writer threads; enables the per-thread slot cache and
        /// the writer lock.
        const MULTI_WRITER_ADD = 1 << 1;
        /// Readers take the read lock, writers the write lock.
        const RW_CONCURRENCY = 1 << 2;
        /// Attach overflow buckets when both candidate buckets are full,
        /// so inserts up to the full capacity cannot fail.
        const EXT_TABLE = 1 << 3;
        /// Deletes clear the entry but never recycle the key slot; the
        /// application frees via `free_key_with_position`.
        const NO_FREE_ON_DEL = 1 << 4;
        /// Lock-free readers; writers still exclude each other. Implies
        /// `NO_FREE_ON_DEL`. Mutually exclusive with `RW_CONCURRENCY`.
        const RW_CONCURRENCY_LF = 1 << 5;
    }
}

/// Parameters for [`crate::CuckooTable::create`].
pub struct TableConfig {
    /// Registry name; must be unique among live tables.
    pub name: String,
    /// Capacity in keys.
    pub entries: u32,
    /// Fixed length of every key, in bytes.
    pub key_len: usize,
    pub hash_func: HashFunction,
    /// Init value handed to the hash function on every call.
    pub hash_init_val: u32,
    /// NUMA placement hint for the allocator. The default allocator has no
    /// placement control, so this is advisory only.
    pub socket_id: i32,
    pub flags: TableFlags,
}

impl TableConfig {
    pub fn new<S: Into<String>>(name: S, entries: u32, key_len: usize) -> Self {
        Self {
            name: name.into(),
            entries,
            key_len,
            hash_func: default_hash,
            hash_init_val: 0,
            socket_id: -1,
            flags: TableFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: TableFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_hash(mut self, hash_func: HashFunction, init_val: u32) -> Self {
        self.hash_func = hash_func;
        self.hash_init_val = init_val;
        self
    }
}

/// How delete publishes retired slots to the reclamation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcuMode {
    /// Push retired slots onto a defer queue; they are freed by later
    /// reclaim passes once their grace period elapses.
    DeferQueue,
    /// Block the deleting thread until all readers pass through a
    /// quiescent state, then free immediately.
    Sync,
}

/// Reclamation wiring for [`crate::CuckooTable::rcu_qsbr_add`].
pub struct RcuConfig {
    pub mode: RcuMode,
    /// Shared quiescent-state variable the application's readers report on.
    pub v: Arc<Qsbr>,
    /// Defer-queue capacity; 0 selects the table's total slot count.
    pub dq_size: u32,
    /// Backlog length past which enqueue runs a reclaim pass first.
    pub trigger_reclaim_limit: u32,
    /// Cap on entries freed per reclaim pass; 0 selects
    /// [`crate::DQ_RECLAIM_MAX`].
    pub max_reclaim_size: u32,
    /// Called with the retired slot's data pointer right before the slot is
    /// recycled.
    pub free_key_data: Option<Box<dyn Fn(DataPtr) + Send + Sync>>,
}

impl RcuConfig {
    pub fn new(v: Arc<Qsbr>, mode: RcuMode) -> Self {
        Self {
            mode,
            v,
            dq_size: 0,
            trigger_reclaim_limit: 0,
            max_reclaim_size: 0,
            free_key_data: None,
        }
    }
}
