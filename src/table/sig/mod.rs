//! Signature comparison.
//!
//! Produces a dense 16-bit hit mask over a key's two candidate buckets: bit
//! `i` is set when primary entry `i`'s stored signature equals the probe,
//! bit `i + 8` for the secondary bucket. The mask is a hint only: a cleared
//! entry keeps [`super::bucket::NULL_SIGNATURE`], which a probe can collide
//! with, so callers must confirm every hit against the empty key-index
//! sentinel and the full key bytes.

use crate::table::bucket::Bucket;

cfg_if::cfg_if! {
    // SSE2 compares all 8 signatures of a bucket in one instruction and the
    // pack/movemask pair folds both buckets into the dense mask directly.
    if #[cfg(all(
        target_feature = "sse2",
        any(target_arch = "x86", target_arch = "x86_64"),
        not(miri)
    ))] {
        mod sse2;
        use sse2 as imp;
    } else {
        #[path = "generic.rs"]
        mod generic;
        use generic as imp;
    }
}

/// Dense hit mask over (primary, secondary): low byte primary, high byte
/// secondary, one bit per entry.
#[inline]
pub(crate) fn compare_signatures(prim: &Bucket, sec: &Bucket, sig: u16) -> u16 {
    imp::compare_signatures(prim, sec, sig)
}

/// Primary-bucket half of a dense mask.
#[inline]
pub(crate) fn prim_hits(mask: u16) -> u32 {
    u32::from(mask & 0xff)
}

/// Secondary-bucket half of a dense mask.
#[inline]
pub(crate) fn sec_hits(mask: u16) -> u32 {
    u32::from(mask >> 8)
}
