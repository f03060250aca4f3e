use std::hash::Hasher;

/// Hash function over (key bytes, init value) producing the 32-bit value the
/// table derives its signature and bucket indices from.
pub type HashFunction = fn(key: &[u8], init_val: u32) -> u32;

/// Default hash, seeded FxHash over the raw key bytes.
///
/// Most flow keys are small, which is where FxHash does best.
pub fn default_hash(key: &[u8], init_val: u32) -> u32 {
    let mut state = fxhash::FxHasher32::default();
    state.write_u32(init_val);
    state.write(key);
    state.finish() as u32
}

// The high 16 bits of the hash become the per-entry signature and the low
// bits pick the primary bucket. XORing the primary index with the signature
// yields the secondary index, so an entry's alternative bucket can always be
// recovered from where it sits and what tag it carries, without re-hashing
// the key. Same scheme as MemC3 (Fan et al.).

#[inline]
pub(crate) fn short_sig(hash: u32) -> u16 {
    (hash >> 16) as u16
}

#[inline]
pub(crate) fn prim_bucket_index(hash: u32, bucket_mask: u32) -> u32 {
    hash & bucket_mask
}

#[inline]
pub(crate) fn alt_bucket_index(cur_bkt_idx: u32, sig: u16, bucket_mask: u32) -> u32 {
    (cur_bkt_idx ^ u32::from(sig)) & bucket_mask
}
