use flowhash::{CuckooTable, DataPtr, FlowHashError, TableConfig, TableFlags};

use crate::util::{bucket_key, ident_hash, ident_table, key};

#[test]
fn fresh_insert() {
    let t = ident_table("basic_fresh", 16, TableFlags::empty());
    let data = b"A".as_ptr() as DataPtr;
    assert_eq!(t.add_key_data(&key(1), data).unwrap(), 0);
    let (idx, found) = t.lookup_data(&key(1)).unwrap();
    assert_eq!(idx, 0);
    assert_eq!(found, data);
}

#[test]
fn duplicate_update_reuses_the_slot() {
    let t = ident_table("basic_dup", 16, TableFlags::empty());
    let a = b"A".as_ptr() as DataPtr;
    let b = b"B".as_ptr() as DataPtr;
    assert_eq!(t.add_key_data(&key(1), a).unwrap(), 0);
    assert_eq!(t.add_key_data(&key(1), b).unwrap(), 0);
    let (idx, found) = t.lookup_data(&key(1)).unwrap();
    assert_eq!(idx, 0);
    assert_eq!(found, b);
    // No second slot was consumed.
    assert_eq!(t.count(), 1);
}

#[test]
fn ninth_key_in_a_bucket_moves_to_its_alternative() {
    let t = ident_table("basic_secondary", 16, TableFlags::empty());
    // Nine distinct keys, all with primary bucket 1.
    for sig in 0..9u16 {
        t.add_key(&bucket_key(1, sig)).unwrap();
    }
    assert_eq!(t.count(), 9);
    for sig in 0..9u16 {
        assert!(t.lookup(&bucket_key(1, sig)).is_ok());
    }
}

#[test]
fn delete_from_chain_shrinks_it() {
    // Keys that pile onto one bucket pair force overflow chains; deleting
    // them back out must leave the remaining keys reachable.
    let t = ident_table("basic_chain", 64, TableFlags::EXT_TABLE);
    // Primary bucket 1, signatures chosen so the secondary is bucket 0:
    // (1 ^ sig) & 7 == 0 whenever sig & 7 == 1.
    let sigs: Vec<u16> = (0..24u16).map(|i| (i << 3) | 1).collect();
    for sig in &sigs {
        t.add_key(&bucket_key(1, *sig)).unwrap();
    }
    assert_eq!(t.count(), sigs.len() as u32);

    // Drop every other key; chain compaction keeps the rest in place.
    for sig in sigs.iter().step_by(2) {
        t.del_key(&bucket_key(1, *sig)).unwrap();
    }
    for (i, sig) in sigs.iter().enumerate() {
        let r = t.lookup(&bucket_key(1, *sig));
        if i % 2 == 0 {
            assert!(matches!(r, Err(FlowHashError::NotFound)));
        } else {
            assert!(r.is_ok());
        }
    }

    // With chains shed and recycled, the freed space is reusable.
    for sig in sigs.iter().step_by(2) {
        t.add_key(&bucket_key(1, *sig)).unwrap();
    }
    assert_eq!(t.count(), sigs.len() as u32);
}

#[test]
fn capacity_is_exact_for_spread_keys() {
    let t = ident_table("basic_capacity", 16, TableFlags::empty());
    // Keys 0..16 split evenly across both buckets, so all 16 fit.
    for v in 0..16u32 {
        t.add_key(&key(v)).unwrap();
    }
    assert_eq!(t.count(), 16);
    assert!(matches!(t.add_key(&key(100)), Err(FlowHashError::NoSpace)));
    // One delete makes room again.
    t.del_key(&key(0)).unwrap();
    assert!(t.add_key(&key(100)).is_ok());
}

#[test]
fn count_tracks_live_keys() {
    let t = ident_table("basic_count", 16, TableFlags::empty());
    assert_eq!(t.count(), 0);
    for v in 0..10u32 {
        t.add_key(&key(v)).unwrap();
        assert_eq!(t.count(), v + 1);
    }
    for v in 0..5u32 {
        t.del_key(&key(v)).unwrap();
    }
    assert_eq!(t.count(), 5);
}

#[test]
fn precomputed_hash_variants_agree() {
    let t = ident_table("basic_hash", 16, TableFlags::empty());
    let k = key(7);
    let h = t.hash(&k);
    assert_eq!(h, ident_hash(&k, 0));
    let idx = t.add_key_with_hash(&k, h).unwrap();
    assert_eq!(t.lookup_with_hash(&k, h).unwrap(), idx);
    assert_eq!(t.lookup(&k).unwrap(), idx);
    assert_eq!(t.del_key_with_hash(&k, h).unwrap(), idx);
}

#[test]
fn default_hash_table_works_end_to_end() {
    let t = CuckooTable::create(TableConfig::new("basic_default_hash", 128, 16)).unwrap();
    let mut keys = Vec::new();
    for i in 0..100u64 {
        let mut k = [0u8; 16];
        k[..8].copy_from_slice(&i.to_le_bytes());
        keys.push(k);
    }
    for k in &keys {
        t.add_key(k).unwrap();
    }
    assert_eq!(t.count(), 100);
    for k in &keys {
        assert!(t.lookup(k).is_ok());
    }
    for k in &keys {
        t.del_key(k).unwrap();
    }
    assert_eq!(t.count(), 0);
}

#[test]
fn iteration_covers_main_and_overflow_entries() {
    let t = ident_table("basic_iter", 64, TableFlags::EXT_TABLE);
    // Enough colliding keys to spill into a chain.
    let sigs: Vec<u16> = (0..20u16).map(|i| (i << 3) | 1).collect();
    for sig in &sigs {
        t.add_key(&bucket_key(1, *sig)).unwrap();
    }
    let mut cursor = 0u32;
    let mut seen = 0;
    while t.iterate(&mut cursor).is_ok() {
        seen += 1;
    }
    assert_eq!(seen, sigs.len());
}

#[test]
fn wrong_key_length_is_rejected() {
    let t = ident_table("basic_badkey", 16, TableFlags::empty());
    assert!(matches!(
        t.add_key(&[1, 2, 3]),
        Err(FlowHashError::InvalidParameter(_))
    ));
    assert!(matches!(
        t.lookup(&[1, 2, 3, 4, 5]),
        Err(FlowHashError::InvalidParameter(_))
    ));
}
