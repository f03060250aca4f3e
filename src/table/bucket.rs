use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use crate::BUCKET_ENTRIES;

/// Key index value marking an unoccupied entry. Key-store slot 0 is a
/// reserved dummy so that 0 can serve as this sentinel.
pub(crate) const EMPTY_SLOT: u32 = 0;

/// Signature a cleared entry is left with. A user hash may legitimately
/// produce this value in its high 16 bits; every signature hit is therefore
/// confirmed against [`EMPTY_SLOT`] and the full key before it is trusted.
pub(crate) const NULL_SIGNATURE: u16 = 0;

/// Node budget of the breadth-first displacement search.
pub(crate) const BFS_QUEUE_LEN: usize = 1000;

/// Key-slot stride alignment.
pub(crate) const KEY_ALIGNMENT: usize = 16;

/// How far ahead of the compare loop the bulk-lookup pass prefetches keys.
pub(crate) const PREFETCH_OFFSET: usize = 4;

/// One cache line of the bucket array: 8 parallel (signature, key index)
/// entries plus the overflow-chain link.
///
/// Signatures are written under the writer lock but read by lock-free
/// readers, so they are atomic with relaxed ordering; a stale signature can
/// only cause a spurious hit that the key-index check and full key compare
/// reject. The key index is the guard variable: it is release-stored last by
/// writers, and an acquire load of a non-empty index makes the signature, key
/// bytes and data pointer of that slot visible.
#[repr(align(64))]
pub(crate) struct Bucket {
    sig_current: [AtomicU16; BUCKET_ENTRIES],
    key_idx: [AtomicU32; BUCKET_ENTRIES],
    /// 1-based index of the next overflow bucket, 0 at the end of the chain.
    next: AtomicU32,
}

impl Bucket {
    pub(crate) fn new() -> Self {
        const SIG_ZERO: AtomicU16 = AtomicU16::new(NULL_SIGNATURE);
        const IDX_ZERO: AtomicU32 = AtomicU32::new(EMPTY_SLOT);
        Self {
            sig_current: [SIG_ZERO; BUCKET_ENTRIES],
            key_idx: [IDX_ZERO; BUCKET_ENTRIES],
            next: AtomicU32::new(0),
        }
    }

    #[inline]
    pub(crate) fn sig(&self, i: usize) -> u16 {
        self.sig_current[i].load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_sig(&self, i: usize, sig: u16) {
        self.sig_current[i].store(sig, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn sigs(&self) -> &[AtomicU16; BUCKET_ENTRIES] {
        &self.sig_current
    }

    #[inline]
    pub(crate) fn key_idx(&self, i: usize, order: Ordering) -> u32 {
        self.key_idx[i].load(order)
    }

    #[inline]
    pub(crate) fn set_key_idx(&self, i: usize, idx: u32, order: Ordering) {
        self.key_idx[i].store(idx, order);
    }

    #[inline]
    pub(crate) fn next(&self) -> u32 {
        self.next.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_next(&self, idx: u32) {
        self.next.store(idx, Ordering::Release);
    }

    pub(crate) fn is_empty(&self) -> bool {
        (0..BUCKET_ENTRIES).all(|i| self.key_idx(i, Ordering::Relaxed) == EMPTY_SLOT)
    }

    /// Restore the pristine state. Only sound under exclusive access.
    pub(crate) fn clear(&self) {
        for i in 0..BUCKET_ENTRIES {
            self.sig_current[i].store(NULL_SIGNATURE, Ordering::Relaxed);
            self.key_idx[i].store(EMPTY_SLOT, Ordering::Relaxed);
        }
        self.next.store(0, Ordering::Relaxed);
    }
}
