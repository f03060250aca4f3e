use crate::table::bucket::Bucket;
use crate::BUCKET_ENTRIES;

#[inline]
pub(crate) fn compare_signatures(prim: &Bucket, sec: &Bucket, sig: u16) -> u16 {
    let mut mask = 0u16;
    for i in 0..BUCKET_ENTRIES {
        if prim.sig(i) == sig {
            mask |= 1 << i;
        }
        if sec.sig(i) == sig {
            mask |= 1 << (i + BUCKET_ENTRIES);
        }
    }
    mask
}
