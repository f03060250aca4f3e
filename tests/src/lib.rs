//! Integration tests for the flowhash table.

#[cfg(test)]
mod basic;
#[cfg(test)]
mod concurrent;

#[cfg(test)]
pub(crate) mod util {
    use std::sync::Arc;

    use flowhash::{CuckooTable, TableConfig, TableFlags};

    /// Identity hash: the key's 4 bytes, little endian. Makes signatures and
    /// bucket indices directly controllable from the key value.
    pub fn ident_hash(key: &[u8], _init: u32) -> u32 {
        u32::from_le_bytes(key[..4].try_into().unwrap())
    }

    pub fn key(v: u32) -> [u8; 4] {
        v.to_le_bytes()
    }

    /// A key whose hash has primary bucket `bkt` and signature `sig`.
    pub fn bucket_key(bkt: u32, sig: u16) -> [u8; 4] {
        ((u32::from(sig) << 16) | bkt).to_le_bytes()
    }

    pub fn ident_table(name: &str, entries: u32, flags: TableFlags) -> Arc<CuckooTable> {
        CuckooTable::create(
            TableConfig::new(name, entries, 4)
                .with_hash(ident_hash, 0)
                .with_flags(flags),
        )
        .unwrap()
    }
}
