use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flowhash::{DataPtr, FlowHashError, Qsbr, RcuConfig, RcuMode, TableFlags};

use crate::util::{bucket_key, ident_table};

#[test]
fn multi_writer_inserts_are_all_visible() {
    let t = ident_table("conc_mw", 4096, TableFlags::MULTI_WRITER_ADD);
    let writers = 4;
    let per_writer = 512u32;

    thread::scope(|s| {
        for w in 0..writers {
            let t = &t;
            s.spawn(move || {
                for i in 0..per_writer {
                    let v = (w as u32) * per_writer + i;
                    t.add_key(&v.to_le_bytes()).unwrap();
                }
            });
        }
    });

    assert_eq!(t.count(), writers as u32 * per_writer);
    for v in 0..writers as u32 * per_writer {
        assert!(t.lookup(&v.to_le_bytes()).is_ok());
    }
}

#[test]
fn locked_readers_race_a_writer() {
    let t = ident_table(
        "conc_rw",
        1024,
        TableFlags::RW_CONCURRENCY | TableFlags::MULTI_WRITER_ADD,
    );
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        let writer = {
            let t = &t;
            let stop = &stop;
            s.spawn(move || {
                for round in 0..200u32 {
                    for v in 0..256u32 {
                        t.add_key_data(&v.to_le_bytes(), (round + 1) as usize as DataPtr)
                            .unwrap();
                    }
                    for v in 0..256u32 {
                        t.del_key(&v.to_le_bytes()).unwrap();
                    }
                }
                stop.store(true, Ordering::Release);
            })
        };

        for _ in 0..3 {
            let t = &t;
            let stop = &stop;
            s.spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    for v in 0..256u32 {
                        match t.lookup_data(&v.to_le_bytes()) {
                            Ok((_, data)) => assert!(!data.is_null()),
                            Err(FlowHashError::NotFound) => {}
                            Err(e) => panic!("unexpected error {e:?}"),
                        }
                    }
                }
            });
        }

        writer.join().unwrap();
    });
}

/// A single writer keeps displacing one key between its candidate buckets by
/// filling and draining the bucket with decoys; lock-free readers must only
/// ever observe the key at its stable index, never a torn or foreign entry.
#[test]
fn lock_free_readers_survive_displacement() {
    let _ = env_logger::builder().is_test(true).try_init();
    let t = ident_table("conc_lf", 64, TableFlags::RW_CONCURRENCY_LF);
    let v = Arc::new(Qsbr::new(8));
    t.rcu_qsbr_add(RcuConfig::new(v.clone(), RcuMode::DeferQueue))
        .unwrap();

    // The watched key: primary bucket 1, signature 7, secondary bucket 6.
    let watched = bucket_key(1, 7);
    let data_tag = 0x515usize;
    let stable_idx = t.add_key_data(&watched, data_tag as DataPtr).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let hits = Arc::new(AtomicUsize::new(0));

    thread::scope(|s| {
        // Readers report quiescent between lookups so deferred slots drain.
        let mut readers = Vec::new();
        for r in 0..2usize {
            let t = t.clone();
            let v = v.clone();
            let stop = stop.clone();
            let hits = hits.clone();
            let watched = watched;
            readers.push(s.spawn(move || {
                v.register(r).unwrap();
                v.online(r);
                while !stop.load(Ordering::Acquire) {
                    match t.lookup_data(&watched) {
                        Ok((idx, d)) => {
                            assert_eq!(idx, stable_idx);
                            assert_eq!(d as usize, data_tag);
                            hits.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(FlowHashError::NotFound) => {
                            // The key is never deleted; a miss would mean a
                            // reader observed a half-applied displacement.
                            panic!("watched key vanished");
                        }
                        Err(e) => panic!("unexpected error {e:?}"),
                    }
                    v.quiescent(r);
                }
                v.offline(r);
                v.unregister(r).unwrap();
            }));
        }

        // Writer: decoy signatures are multiples of 8, so every decoy's
        // alternative bucket is its own bucket and only the watched key can
        // be displaced. Filling whichever bucket holds it bounces it to the
        // other side, twice per round.
        let decoy_sigs: Vec<u16> = (1..=8u16).map(|i| i * 8).collect();
        // Deleted decoy slots drain back through the defer queue, so an
        // insert can transiently see the table full while readers are slow
        // to quiesce; yield and retry.
        let add = |k: &[u8; 4]| loop {
            match t.add_key(k) {
                Ok(_) => break,
                Err(FlowHashError::NoSpace) => thread::yield_now(),
                Err(e) => panic!("unexpected error {e:?}"),
            }
        };
        for _ in 0..150u32 {
            for sig in &decoy_sigs {
                add(&bucket_key(1, *sig));
            }
            for sig in &decoy_sigs {
                t.del_key(&bucket_key(1, *sig)).unwrap();
            }
            for sig in &decoy_sigs {
                add(&bucket_key(6, *sig));
            }
            for sig in &decoy_sigs {
                t.del_key(&bucket_key(6, *sig)).unwrap();
            }
        }
        thread::sleep(Duration::from_millis(10));
        stop.store(true, Ordering::Release);

        for r in readers {
            r.join().unwrap();
        }
    });

    assert!(hits.load(Ordering::Relaxed) > 0);
    assert_eq!(t.lookup(&watched).unwrap(), stable_idx);
}

#[test]
fn deferred_slots_come_back_after_grace_periods() {
    let t = ident_table("conc_rcu_dq", 16, TableFlags::RW_CONCURRENCY_LF);
    let v = Arc::new(Qsbr::new(2));
    let mut cfg = RcuConfig::new(v.clone(), RcuMode::DeferQueue);
    cfg.trigger_reclaim_limit = 0;
    t.rcu_qsbr_add(cfg).unwrap();

    v.register(0).unwrap();
    v.online(0);

    // Fill completely, then delete everything; the slots sit in the defer
    // queue until the reader reports a quiescent state.
    for i in 0..16u32 {
        t.add_key(&crate::util::key(i)).unwrap();
    }
    for i in 0..16u32 {
        t.del_key(&crate::util::key(i)).unwrap();
    }
    assert_eq!(t.count(), 16);

    // Reader quiesces: the next inserts reclaim their slots on demand.
    v.quiescent(0);
    for i in 16..32u32 {
        t.add_key(&crate::util::key(i)).unwrap();
    }
    assert_eq!(t.count(), 16 + 16 - 16);
}

#[test]
fn sync_mode_frees_inline() {
    let freed = Arc::new(AtomicUsize::new(0));
    let t = ident_table("conc_rcu_sync", 16, TableFlags::RW_CONCURRENCY_LF);
    let v = Arc::new(Qsbr::new(2));
    let mut cfg = RcuConfig::new(v.clone(), RcuMode::Sync);
    let freed_cb = freed.clone();
    cfg.free_key_data = Some(Box::new(move |_| {
        freed_cb.fetch_add(1, Ordering::Relaxed);
    }));
    t.rcu_qsbr_add(cfg).unwrap();

    // No readers are registered, so synchronize returns at once and the
    // slot recycles inline.
    t.add_key(&crate::util::key(1)).unwrap();
    t.del_key(&crate::util::key(1)).unwrap();
    assert_eq!(freed.load(Ordering::Relaxed), 1);
    assert_eq!(t.count(), 0);

    // The whole capacity can cycle through add/del without leaking slots.
    for round in 0..4u32 {
        for i in 0..16u32 {
            t.add_key(&crate::util::key(round * 100 + i)).unwrap();
        }
        for i in 0..16u32 {
            t.del_key(&crate::util::key(round * 100 + i)).unwrap();
        }
    }
    assert_eq!(t.count(), 0);
}

#[test]
fn duplicate_rcu_registration_is_rejected() {
    let t = ident_table("conc_rcu_dup", 16, TableFlags::RW_CONCURRENCY_LF);
    let v = Arc::new(Qsbr::new(2));
    t.rcu_qsbr_add(RcuConfig::new(v.clone(), RcuMode::DeferQueue))
        .unwrap();
    assert!(matches!(
        t.rcu_qsbr_add(RcuConfig::new(v, RcuMode::DeferQueue)),
        Err(FlowHashError::Exists(_))
    ));
}

#[test]
fn explicit_reclaim_reports_progress() {
    let t = ident_table("conc_reclaim", 16, TableFlags::RW_CONCURRENCY_LF);
    let v = Arc::new(Qsbr::new(2));
    // A high trigger keeps enqueue from reclaiming on its own.
    let mut cfg = RcuConfig::new(v.clone(), RcuMode::DeferQueue);
    cfg.trigger_reclaim_limit = 1000;
    t.rcu_qsbr_add(cfg).unwrap();

    for i in 0..8u32 {
        t.add_key(&crate::util::key(i)).unwrap();
    }
    for i in 0..8u32 {
        t.del_key(&crate::util::key(i)).unwrap();
    }

    // No reader has ever come online: everything is reclaimable, bounded by
    // max_reclaim_size per pass.
    let stats = t.rcu_qsbr_dq_reclaim().unwrap();
    assert!(stats.freed > 0);
    let mut total = stats.freed;
    while total < 8 {
        let s = t.rcu_qsbr_dq_reclaim().unwrap();
        if s.freed == 0 {
            break;
        }
        total += s.freed;
    }
    assert_eq!(total, 8);
    assert_eq!(t.count(), 0);
}
