#[cfg(target_arch = "x86")]
use core::arch::x86::*;
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::*;

use crate::table::bucket::Bucket;

#[inline]
pub(crate) fn compare_signatures(prim: &Bucket, sec: &Bucket, sig: u16) -> u16 {
    // The signature array sits at offset 0 of the 64-byte-aligned bucket, so
    // the 16-byte load is aligned. Reading the atomics as one vector gives
    // plain-load semantics, which is all the hint contract needs: a torn or
    // stale signature at worst produces a spurious bit that full-key
    // confirmation rejects.
    unsafe {
        let probe = _mm_set1_epi16(sig as i16);
        let prim_cmp = _mm_cmpeq_epi16(
            _mm_load_si128(prim.sigs().as_ptr() as *const __m128i),
            probe,
        );
        let sec_cmp = _mm_cmpeq_epi16(
            _mm_load_si128(sec.sigs().as_ptr() as *const __m128i),
            probe,
        );
        // Saturating-pack the two 8x16 compare results into 16 lanes of
        // 0x00/0xff, then movemask collapses them into the dense mask with
        // the primary bucket in the low byte.
        _mm_movemask_epi8(_mm_packs_epi16(prim_cmp, sec_cmp)) as u16
    }
}
