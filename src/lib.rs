/// Table creation parameters and concurrency flags
pub mod config;
/// Hash function type and bucket addressing math
pub mod hash;
/// Quiescent-state-based reclamation service
pub mod qsbr;
/// The cuckoo hash table itself
pub mod table;

/// Crate error type
mod error;
/// Set of compiler hints
mod hint;
/// Process-wide name registry
mod registry;
/// MPMC free-index ring
mod ring;

pub use crate::config::{RcuConfig, RcuMode, TableConfig, TableFlags};
pub use crate::error::{FlowHashError, Result};
pub use crate::hash::{default_hash, HashFunction};
pub use crate::qsbr::{Qsbr, ReclaimStats};
pub use crate::table::{CuckooTable, DataPtr};

/// Entries per bucket. The dense bulk-lookup hit mask packs one bucket per
/// byte, so this is fixed at 8.
pub const BUCKET_ENTRIES: usize = 8;
/// Largest batch accepted by the bulk lookup calls.
pub const LOOKUP_BULK_MAX: usize = 64;
/// Upper bound on table capacity.
pub const ENTRIES_MAX: u32 = 1 << 30;
/// Free key indices held back per thread when the per-thread cache is on.
pub const THREAD_CACHE_SIZE: usize = 64;
/// Static bound on threads that get a private slot cache.
pub const MAX_THREAD_SLOTS: usize = 128;
/// Default cap on entries reclaimed in one defer-queue pass.
pub const DQ_RECLAIM_MAX: u32 = 16;
