//! Bucketized cuckoo hash table with selectable concurrency modes.
//!
//! Every key hashes once; the high 16 bits become its stored signature, the
//! low bits its primary bucket, and primary-XOR-signature its secondary
//! bucket. A key lives in one of those two buckets or, with `EXT_TABLE`, in
//! an overflow chain hanging off the secondary. Writers publish an entry by
//! release-storing its key index last, so a reader that acquire-loads a
//! non-empty index sees the signature, key bytes and data pointer behind it.
//! Displacements and chain compactions bump a table-change counter that
//! lock-free readers re-check after every scan.

pub(crate) mod bucket;
mod cache;
mod key_store;
mod sig;

use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use once_cell::sync::OnceCell;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{RcuConfig, RcuMode, TableConfig, TableFlags};
use crate::error::{FlowHashError, Result};
use crate::hash::{alt_bucket_index, prim_bucket_index, short_sig, HashFunction};
use crate::hint::{likely, prefetch_read, unlikely};
use crate::qsbr::{DeferQueue, Qsbr, ReclaimStats};
use crate::registry;
use crate::ring::FreeRing;
use crate::{
    BUCKET_ENTRIES, DQ_RECLAIM_MAX, ENTRIES_MAX, LOOKUP_BULK_MAX, MAX_THREAD_SLOTS,
    THREAD_CACHE_SIZE,
};

use self::bucket::{Bucket, BFS_QUEUE_LEN, EMPTY_SLOT, NULL_SIGNATURE, PREFETCH_OFFSET};
use self::cache::LocalCache;
use self::key_store::KeyStore;

/// Opaque application data associated with a key.
pub type DataPtr = *mut ();

/// Record retired on delete and recycled once no reader can observe it.
#[derive(Clone, Copy)]
struct ReclaimEntry {
    key_idx: u32,
    /// 1-based overflow bucket riding along with the key slot, 0 if none.
    ext_bkt_idx: u32,
}

struct RcuState {
    v: Arc<Qsbr>,
    max_reclaim_size: u32,
    free_key_data: Option<Box<dyn Fn(DataPtr) + Send + Sync>>,
    /// `None` in sync mode: delete blocks for the grace period instead.
    dq: Option<DeferQueue<ReclaimEntry>>,
}

/// A fixed-capacity concurrent cuckoo hash table.
///
/// Created via [`CuckooTable::create`]; all operations take `&self`. Which
/// operations may run concurrently is governed by the [`TableFlags`] given
/// at creation.
pub struct CuckooTable {
    name: String,
    entries: u32,
    num_buckets: u32,
    bucket_mask: u32,
    key_len: usize,
    hash_func: HashFunction,
    hash_init_val: u32,

    use_local_cache: bool,
    ext_table: bool,
    rw_concurrency: bool,
    rw_concurrency_lf: bool,
    writer_takes_lock: bool,
    no_free_on_del: bool,

    buckets: Box<[Bucket]>,
    buckets_ext: Box<[Bucket]>,
    key_store: KeyStore,
    free_slots: FreeRing,
    free_ext_bkts: Option<FreeRing>,
    /// Per-position unlinked overflow bucket awaiting
    /// [`free_key_with_position`](Self::free_key_with_position); allocated
    /// only for ext tables that defer frees.
    ext_bkt_to_free: Box<[AtomicU32]>,
    tbl_chng_cnt: CachePadded<AtomicU32>,
    readwrite_lock: RwLock<()>,
    local_free_slots: Box<[CachePadded<LocalCache>]>,
    rcu: OnceCell<RcuState>,
}

enum SlotInsert {
    /// The key already existed; its data pointer was swapped in place.
    Updated(usize),
    Inserted,
    Full,
}

#[derive(Clone, Copy, Default)]
struct BfsNode {
    bkt_idx: u32,
    /// Queue index of the node this bucket was expanded from, -1 at the root.
    prev: i32,
    prev_slot: i32,
}

impl CuckooTable {
    pub fn create(config: TableConfig) -> Result<Arc<CuckooTable>> {
        let flags = config.flags;
        if config.name.is_empty() {
            return Err(FlowHashError::InvalidParameter("name must not be empty"));
        }
        if config.entries < BUCKET_ENTRIES as u32 || config.entries > ENTRIES_MAX {
            return Err(FlowHashError::InvalidParameter("entries out of range"));
        }
        if config.key_len == 0 {
            return Err(FlowHashError::InvalidParameter("key_len must be non-zero"));
        }
        if flags.contains(TableFlags::RW_CONCURRENCY | TableFlags::RW_CONCURRENCY_LF) {
            return Err(FlowHashError::InvalidParameter(
                "RW_CONCURRENCY and RW_CONCURRENCY_LF are mutually exclusive",
            ));
        }

        let use_local_cache = flags.contains(TableFlags::MULTI_WRITER_ADD);
        let rw_concurrency = flags.contains(TableFlags::RW_CONCURRENCY);
        let rw_concurrency_lf = flags.contains(TableFlags::RW_CONCURRENCY_LF);
        let ext_table = flags.contains(TableFlags::EXT_TABLE);
        // Lock-free readers must never observe a recycled slot, so the flag
        // forces deferred frees.
        let no_free_on_del = flags.contains(TableFlags::NO_FREE_ON_DEL) || rw_concurrency_lf;
        let writer_takes_lock = use_local_cache || rw_concurrency || rw_concurrency_lf;

        // Slot 0 is the dummy backing the empty sentinel. With per-thread
        // caches the ring also covers the indices every other thread can
        // have parked in its cache.
        let num_key_slots = if use_local_cache {
            config.entries + (MAX_THREAD_SLOTS as u32 - 1) * (THREAD_CACHE_SIZE as u32 - 1) + 1
        } else {
            config.entries + 1
        };

        let num_buckets = config.entries.next_power_of_two() / BUCKET_ENTRIES as u32;
        let bucket_mask = num_buckets - 1;

        if config.socket_id >= 0 {
            log::debug!(
                "{}: socket hint {} noted; allocator has no NUMA placement",
                config.name,
                config.socket_id
            );
        }

        let free_slots = FreeRing::with_capacity(num_key_slots as usize);
        free_slots.populate(num_key_slots - 1);

        let buckets: Box<[Bucket]> = (0..num_buckets).map(|_| Bucket::new()).collect();
        let (buckets_ext, free_ext_bkts): (Box<[Bucket]>, Option<FreeRing>) = if ext_table {
            let ring = FreeRing::with_capacity(num_buckets as usize + 1);
            ring.populate(num_buckets);
            ((0..num_buckets).map(|_| Bucket::new()).collect(), Some(ring))
        } else {
            (Box::new([]), None)
        };
        let ext_bkt_to_free: Box<[AtomicU32]> = if ext_table && no_free_on_del {
            (0..num_key_slots).map(|_| AtomicU32::new(0)).collect()
        } else {
            Box::new([])
        };

        let key_store = KeyStore::new(num_key_slots as usize, config.key_len)?;

        let local_free_slots: Box<[CachePadded<LocalCache>]> = if use_local_cache {
            (0..MAX_THREAD_SLOTS)
                .map(|_| CachePadded::new(LocalCache::new()))
                .collect()
        } else {
            Box::new([])
        };

        let table = Arc::new(CuckooTable {
            name: config.name,
            entries: config.entries,
            num_buckets,
            bucket_mask,
            key_len: config.key_len,
            hash_func: config.hash_func,
            hash_init_val: config.hash_init_val,
            use_local_cache,
            ext_table,
            rw_concurrency,
            rw_concurrency_lf,
            writer_takes_lock,
            no_free_on_del,
            buckets,
            buckets_ext,
            key_store,
            free_slots,
            free_ext_bkts,
            ext_bkt_to_free,
            tbl_chng_cnt: CachePadded::new(AtomicU32::new(0)),
            readwrite_lock: RwLock::new(()),
            local_free_slots,
            rcu: OnceCell::new(),
        });

        registry::insert(&table.name, &table)?;
        Ok(table)
    }

    /// Look up a live table by name.
    pub fn find_existing(name: &str) -> Result<Arc<CuckooTable>> {
        registry::find(name).ok_or(FlowHashError::NotFound)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// The table's hash of `key`, for the `*_with_hash` call forms.
    #[inline]
    pub fn hash(&self, key: &[u8]) -> u32 {
        (self.hash_func)(key, self.hash_init_val)
    }

    /// Largest external index this table can ever hand out.
    pub fn max_key_id(&self) -> u32 {
        if self.use_local_cache {
            self.entries + (MAX_THREAD_SLOTS as u32 - 1) * (THREAD_CACHE_SIZE as u32 - 1)
        } else {
            self.entries
        }
    }

    /// Number of live keys. Concurrent writers make this an estimate: an
    /// index mid-flight between a thread cache and the ring can be counted
    /// in both for a moment.
    pub fn count(&self) -> u32 {
        let total = self.max_key_id();
        let cached: u32 = self.local_free_slots.iter().map(|c| c.len()).sum();
        total
            .saturating_sub(self.free_slots.count() as u32)
            .saturating_sub(cached)
    }

    // ------------------------------------------------------------------
    // locking

    #[inline]
    fn writer_lock(&self) -> Option<RwLockWriteGuard<'_, ()>> {
        self.writer_takes_lock.then(|| self.readwrite_lock.write())
    }

    #[inline]
    fn reader_lock(&self) -> Option<RwLockReadGuard<'_, ()>> {
        self.rw_concurrency.then(|| self.readwrite_lock.read())
    }

    /// Publish a table change to lock-free readers. Only one writer is ever
    /// inside the lock, so the counter read can be relaxed; the release
    /// store plus fence keep the entry rewrites that follow from being
    /// observed without the bump.
    #[inline]
    fn bump_change_counter(&self) {
        let cnt = self.tbl_chng_cnt.load(Ordering::Relaxed);
        self.tbl_chng_cnt.store(cnt + 1, Ordering::Release);
        fence(Ordering::Release);
    }

    // ------------------------------------------------------------------
    // buckets and chains

    #[inline]
    fn ext_bucket(&self, idx: u32) -> &Bucket {
        debug_assert!(idx != 0);
        &self.buckets_ext[(idx - 1) as usize]
    }

    /// Walk a bucket and its overflow chain, starting at `start` itself.
    #[inline]
    fn chain<'t>(&'t self, start: &'t Bucket) -> ChainIter<'t> {
        ChainIter {
            table: self,
            cur: Some(start),
        }
    }

    #[inline]
    fn last_bucket<'t>(&'t self, start: &'t Bucket) -> &'t Bucket {
        self.chain(start).last().unwrap_or(start)
    }

    #[inline]
    fn check_key(&self, key: &[u8]) -> Result<()> {
        if unlikely(key.len() != self.key_len) {
            return Err(FlowHashError::InvalidParameter("key length mismatch"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // slot allocator

    #[inline]
    fn local_cache(&self) -> Option<&LocalCache> {
        if !self.use_local_cache {
            return None;
        }
        let slot = cache::thread_slot()?;
        Some(&self.local_free_slots[slot])
    }

    fn alloc_slot(&self) -> u32 {
        if let Some(cache) = self.local_cache() {
            // Safety: `local_cache` returns the calling thread's own slot.
            unsafe { cache.alloc(&self.free_slots) }.unwrap_or(EMPTY_SLOT)
        } else {
            self.free_slots.dequeue().unwrap_or(EMPTY_SLOT)
        }
    }

    /// One bounded reclaim pass on exhaustion, then a single retry.
    fn alloc_slot_with_reclaim(&self) -> Result<u32> {
        let mut slot_id = self.alloc_slot();
        if slot_id == EMPTY_SLOT && self.dq_configured() {
            {
                let _g = self.writer_lock();
                self.dq_reclaim_pass();
            }
            slot_id = self.alloc_slot();
        }
        if slot_id == EMPTY_SLOT {
            return Err(FlowHashError::NoSpace);
        }
        Ok(slot_id)
    }

    fn free_slot(&self, slot_id: u32) {
        if let Some(cache) = self.local_cache() {
            // Safety: `local_cache` returns the calling thread's own slot.
            if !unsafe { cache.free(&self.free_slots, slot_id) } {
                log::error!("{}: free-slot ring full, cache flush failed", self.name);
            }
            return;
        }
        if !self.free_slots.enqueue(slot_id) {
            log::error!("{}: free-slot ring full, index {} lost", self.name, slot_id);
        }
    }

    // ------------------------------------------------------------------
    // reclamation bridge

    fn dq_configured(&self) -> bool {
        self.rcu.get().map_or(false, |r| r.dq.is_some())
    }

    fn immediate_free_on_del(&self) -> bool {
        !self.no_free_on_del && self.rcu.get().is_none()
    }

    fn dq_reclaim_pass(&self) -> Option<ReclaimStats> {
        let rcu = self.rcu.get()?;
        let dq = rcu.dq.as_ref()?;
        Some(dq.reclaim(rcu.max_reclaim_size as usize, &mut |e| {
            self.free_reclaimed(e)
        }))
    }

    /// Grace period has elapsed: run the user callback and recycle the slot
    /// (and any overflow bucket that was retired with it).
    fn free_reclaimed(&self, e: ReclaimEntry) {
        if let Some(rcu) = self.rcu.get() {
            if let Some(cb) = &rcu.free_key_data {
                cb(self.key_store.pdata(e.key_idx).load(Ordering::Relaxed));
            }
        }
        if e.ext_bkt_idx != 0 {
            if let Some(ring) = &self.free_ext_bkts {
                if !ring.enqueue(e.ext_bkt_idx) {
                    log::error!(
                        "{}: overflow-bucket ring full, index {} lost",
                        self.name,
                        e.ext_bkt_idx
                    );
                }
            }
        }
        self.free_slot(e.key_idx);
    }

    /// Wire up QSBR reclamation. May be called once per table.
    pub fn rcu_qsbr_add(&self, cfg: RcuConfig) -> Result<()> {
        if self.rcu.get().is_some() {
            return Err(FlowHashError::Exists(format!("{} rcu config", self.name)));
        }
        let max_reclaim_size = if cfg.max_reclaim_size == 0 {
            DQ_RECLAIM_MAX
        } else {
            cfg.max_reclaim_size
        };
        let dq = match cfg.mode {
            RcuMode::Sync => None,
            RcuMode::DeferQueue => {
                let size = if cfg.dq_size == 0 {
                    self.key_store.slots() as u32
                } else {
                    cfg.dq_size
                };
                Some(DeferQueue::new(
                    cfg.v.clone(),
                    size as usize,
                    cfg.trigger_reclaim_limit as usize,
                    max_reclaim_size as usize,
                ))
            }
        };
        let state = RcuState {
            v: cfg.v,
            max_reclaim_size,
            free_key_data: cfg.free_key_data,
            dq,
        };
        self.rcu
            .set(state)
            .map_err(|_| FlowHashError::Exists(format!("{} rcu config", self.name)))
    }

    /// Explicit bounded reclaim of the defer queue.
    pub fn rcu_qsbr_dq_reclaim(&self) -> Result<ReclaimStats> {
        if !self.dq_configured() {
            return Err(FlowHashError::InvalidParameter("no defer queue configured"));
        }
        self.dq_reclaim_pass()
            .ok_or(FlowHashError::Internal("defer queue vanished"))
    }

    // ------------------------------------------------------------------
    // insert engine

    /// Search `bkt` for `key`; on a match, swap the data pointer in place.
    /// Caller holds the writer lock.
    fn search_and_update(&self, bkt: &Bucket, key: &[u8], sig: u16, data: DataPtr) -> Option<usize> {
        for i in 0..BUCKET_ENTRIES {
            let key_idx = bkt.key_idx(i, Ordering::Relaxed);
            if bkt.sig(i) == sig
                && key_idx != EMPTY_SLOT
                && self.key_store.key_eq(key_idx, key)
            {
                // pdata guards the application data: release it so readers
                // that match the key see the new value.
                self.key_store.pdata(key_idx).store(data, Ordering::Release);
                return Some((key_idx - 1) as usize);
            }
        }
        None
    }

    fn dup_check(
        &self,
        prim_bkt: &Bucket,
        sec_bkt: &Bucket,
        key: &[u8],
        sig: u16,
        data: DataPtr,
    ) -> Option<usize> {
        if let Some(ext) = self.search_and_update(prim_bkt, key, sig, data) {
            return Some(ext);
        }
        for bkt in self.chain(sec_bkt) {
            if let Some(ext) = self.search_and_update(bkt, key, sig, data) {
                return Some(ext);
            }
        }
        None
    }

    /// Try the primary bucket only, without displacing anything.
    fn cuckoo_insert(
        &self,
        prim_bkt: &Bucket,
        sec_bkt: &Bucket,
        key: &[u8],
        data: DataPtr,
        sig: u16,
        new_idx: u32,
    ) -> SlotInsert {
        let _g = self.writer_lock();
        // A duplicate may have been inserted between the unlocked check and
        // here.
        if let Some(ext) = self.dup_check(prim_bkt, sec_bkt, key, sig, data) {
            return SlotInsert::Updated(ext);
        }
        for i in 0..BUCKET_ENTRIES {
            if likely(prim_bkt.key_idx(i, Ordering::Relaxed) == EMPTY_SLOT) {
                prim_bkt.set_sig(i, sig);
                // key_idx is the guard for the signature and key bytes;
                // publish it last.
                prim_bkt.set_key_idx(i, new_idx, Ordering::Release);
                return SlotInsert::Inserted;
            }
        }
        SlotInsert::Full
    }

    /// Shift entries along the BFS path ending at `queue[leaf]`/`leaf_slot`
    /// and put the new entry into the freed root slot. Returns `None` when
    /// the path was invalidated by a concurrent writer.
    #[allow(clippy::too_many_arguments)]
    fn cuckoo_move_insert(
        &self,
        start_bkt: &Bucket,
        other_bkt: &Bucket,
        key: &[u8],
        data: DataPtr,
        sig: u16,
        new_idx: u32,
        queue: &[BfsNode],
        leaf: usize,
        leaf_slot: usize,
    ) -> Option<SlotInsert> {
        let _g = self.writer_lock();

        let mut curr = leaf;
        let mut curr_slot = leaf_slot;
        let mut curr_bkt = &self.buckets[queue[curr].bkt_idx as usize];

        // The empty slot may be gone by the time the lock is ours.
        if curr_bkt.key_idx(curr_slot, Ordering::Relaxed) != EMPTY_SLOT {
            return None;
        }

        if let Some(ext) = self.dup_check(start_bkt, other_bkt, key, sig, data) {
            return Some(SlotInsert::Updated(ext));
        }

        while likely(queue[curr].prev >= 0) {
            let prev = queue[curr].prev as usize;
            let prev_slot = queue[curr].prev_slot as usize;
            let prev_bkt = &self.buckets[queue[prev].bkt_idx as usize];

            let prev_alt_idx = alt_bucket_index(
                queue[prev].bkt_idx,
                prev_bkt.sig(prev_slot),
                self.bucket_mask,
            );
            if unlikely(prev_alt_idx != queue[curr].bkt_idx) {
                // The path edge no longer holds; revert the hole to empty,
                // otherwise the shifted key would exist twice.
                curr_bkt.set_key_idx(curr_slot, EMPTY_SLOT, Ordering::Release);
                return None;
            }

            if self.rw_concurrency_lf {
                // Announce the move before the entry appears in its new
                // bucket; a racing reader re-checks the counter and rescans.
                self.bump_change_counter();
            }

            // Swapping in the displaced entry's signature keeps its
            // alternative-bucket identity intact for later displacements.
            curr_bkt.set_sig(curr_slot, prev_bkt.sig(prev_slot));
            curr_bkt.set_key_idx(
                curr_slot,
                prev_bkt.key_idx(prev_slot, Ordering::Relaxed),
                Ordering::Release,
            );

            curr_slot = prev_slot;
            curr = prev;
            curr_bkt = prev_bkt;
        }

        if self.rw_concurrency_lf {
            self.bump_change_counter();
        }
        curr_bkt.set_sig(curr_slot, sig);
        curr_bkt.set_key_idx(curr_slot, new_idx, Ordering::Release);

        Some(SlotInsert::Inserted)
    }

    /// Breadth-first displacement search from `start_bkt_idx`, bounded by
    /// the queue length. Expansion follows every entry to its alternative
    /// bucket; the first empty slot found terminates the path.
    #[allow(clippy::too_many_arguments)]
    fn cuckoo_make_space(
        &self,
        start_bkt_idx: u32,
        start_bkt: &Bucket,
        other_bkt: &Bucket,
        key: &[u8],
        data: DataPtr,
        sig: u16,
        new_idx: u32,
    ) -> SlotInsert {
        let mut queue = [BfsNode::default(); BFS_QUEUE_LEN];
        let mut tail = 0usize;
        let mut head = 1usize;
        queue[0] = BfsNode {
            bkt_idx: start_bkt_idx,
            prev: -1,
            prev_slot: -1,
        };

        while likely(tail != head && head < BFS_QUEUE_LEN - BUCKET_ENTRIES) {
            let curr_idx = queue[tail].bkt_idx;
            let curr_bkt = &self.buckets[curr_idx as usize];
            for i in 0..BUCKET_ENTRIES {
                if curr_bkt.key_idx(i, Ordering::Relaxed) == EMPTY_SLOT {
                    if let Some(outcome) = self.cuckoo_move_insert(
                        start_bkt, other_bkt, key, data, sig, new_idx, &queue, tail, i,
                    ) {
                        return outcome;
                    }
                    // Path went stale; keep searching with the queue as is.
                }
                let alt_idx = alt_bucket_index(curr_idx, curr_bkt.sig(i), self.bucket_mask);
                queue[head] = BfsNode {
                    bkt_idx: alt_idx,
                    prev: tail as i32,
                    prev_slot: i as i32,
                };
                head += 1;
            }
            tail += 1;
        }

        SlotInsert::Full
    }

    /// Overflow fallback: any empty entry in the secondary chain, else link
    /// a fresh overflow bucket as the new chain tail.
    fn add_ext(
        &self,
        prim_bkt: &Bucket,
        sec_bkt: &Bucket,
        key: &[u8],
        data: DataPtr,
        sig: u16,
        slot_id: u32,
    ) -> Result<usize> {
        let _g = self.writer_lock();

        if let Some(ext) = self.dup_check(prim_bkt, sec_bkt, key, sig, data) {
            self.free_slot(slot_id);
            return Ok(ext);
        }

        for bkt in self.chain(sec_bkt) {
            for i in 0..BUCKET_ENTRIES {
                if likely(bkt.key_idx(i, Ordering::Relaxed) == EMPTY_SLOT) {
                    bkt.set_sig(i, sig);
                    bkt.set_key_idx(i, slot_id, Ordering::Release);
                    return Ok((slot_id - 1) as usize);
                }
            }
        }

        let ring = self
            .free_ext_bkts
            .as_ref()
            .ok_or(FlowHashError::Internal("overflow ring missing"))?;
        let mut ext_id = ring.dequeue().unwrap_or(0);
        if ext_id == 0 && self.dq_configured() {
            self.dq_reclaim_pass();
            ext_id = ring.dequeue().unwrap_or(0);
        }
        if ext_id == 0 {
            self.free_slot(slot_id);
            return Err(FlowHashError::NoSpace);
        }

        let ext_bkt = self.ext_bucket(ext_id);
        ext_bkt.set_sig(0, sig);
        ext_bkt.set_key_idx(0, slot_id, Ordering::Release);
        // Publish the populated bucket before readers can reach it through
        // the chain.
        self.last_bucket(sec_bkt).set_next(ext_id);
        Ok((slot_id - 1) as usize)
    }

    fn add_inner(&self, key: &[u8], hash: u32, data: DataPtr) -> Result<usize> {
        self.check_key(key)?;
        let sig = short_sig(hash);
        let prim_idx = prim_bucket_index(hash, self.bucket_mask);
        let sec_idx = alt_bucket_index(prim_idx, sig, self.bucket_mask);
        let prim_bkt = &self.buckets[prim_idx as usize];
        let sec_bkt = &self.buckets[sec_idx as usize];
        prefetch_read(prim_bkt as *const Bucket);
        prefetch_read(sec_bkt as *const Bucket);

        {
            let _g = self.writer_lock();
            if let Some(ext) = self.dup_check(prim_bkt, sec_bkt, key, sig, data) {
                return Ok(ext);
            }
        }

        let slot_id = self.alloc_slot_with_reclaim()?;

        // pdata guards the application data; the key bytes of a slot that
        // was never published race with nothing.
        self.key_store.pdata(slot_id).store(data, Ordering::Release);
        self.key_store.write_key(slot_id, key);

        match self.cuckoo_insert(prim_bkt, sec_bkt, key, data, sig, slot_id) {
            SlotInsert::Inserted => return Ok((slot_id - 1) as usize),
            SlotInsert::Updated(ext) => {
                self.free_slot(slot_id);
                return Ok(ext);
            }
            SlotInsert::Full => {}
        }

        // Primary full: displace, starting at the primary...
        match self.cuckoo_make_space(prim_idx, prim_bkt, sec_bkt, key, data, sig, slot_id) {
            SlotInsert::Inserted => return Ok((slot_id - 1) as usize),
            SlotInsert::Updated(ext) => {
                self.free_slot(slot_id);
                return Ok(ext);
            }
            SlotInsert::Full => {}
        }

        // ...then from the secondary, for better occupancy.
        match self.cuckoo_make_space(sec_idx, sec_bkt, prim_bkt, key, data, sig, slot_id) {
            SlotInsert::Inserted => return Ok((slot_id - 1) as usize),
            SlotInsert::Updated(ext) => {
                self.free_slot(slot_id);
                return Ok(ext);
            }
            SlotInsert::Full => {}
        }

        if !self.ext_table {
            self.free_slot(slot_id);
            return Err(FlowHashError::NoSpace);
        }
        self.add_ext(prim_bkt, sec_bkt, key, data, sig, slot_id)
    }

    /// Insert `key` with a null data pointer. Returns the external index;
    /// inserting an existing key returns its current index.
    pub fn add_key(&self, key: &[u8]) -> Result<usize> {
        self.add_inner(key, self.hash(key), std::ptr::null_mut())
    }

    pub fn add_key_with_hash(&self, key: &[u8], hash: u32) -> Result<usize> {
        self.add_inner(key, hash, std::ptr::null_mut())
    }

    /// Insert `key` -> `data`, updating the data in place if the key exists.
    pub fn add_key_data(&self, key: &[u8], data: DataPtr) -> Result<usize> {
        self.add_inner(key, self.hash(key), data)
    }

    pub fn add_key_with_hash_data(&self, key: &[u8], hash: u32, data: DataPtr) -> Result<usize> {
        self.add_inner(key, hash, data)
    }

    // ------------------------------------------------------------------
    // lookup engine

    /// Bucket scan under the reader lock (or external serialisation).
    fn search_one_bucket_l(&self, bkt: &Bucket, key: &[u8], sig: u16) -> Option<(u32, DataPtr)> {
        for i in 0..BUCKET_ENTRIES {
            let key_idx = bkt.key_idx(i, Ordering::Relaxed);
            if bkt.sig(i) == sig
                && key_idx != EMPTY_SLOT
                && self.key_store.key_eq(key_idx, key)
            {
                let data = self.key_store.pdata(key_idx).load(Ordering::Relaxed);
                return Some((key_idx, data));
            }
        }
        None
    }

    /// Lock-free bucket scan. The signature compare runs before the
    /// acquire-load of the key index; a stale signature paired with a fresh
    /// index can only fail the full key compare.
    fn search_one_bucket_lf(&self, bkt: &Bucket, key: &[u8], sig: u16) -> Option<(u32, DataPtr)> {
        for i in 0..BUCKET_ENTRIES {
            if bkt.sig(i) == sig {
                let key_idx = bkt.key_idx(i, Ordering::Acquire);
                if key_idx != EMPTY_SLOT && self.key_store.key_eq(key_idx, key) {
                    let data = self.key_store.pdata(key_idx).load(Ordering::Acquire);
                    return Some((key_idx, data));
                }
            }
        }
        None
    }

    fn lookup_l(
        &self,
        prim_bkt: &Bucket,
        sec_bkt: &Bucket,
        key: &[u8],
        sig: u16,
    ) -> Result<(usize, DataPtr)> {
        let _g = self.reader_lock();
        if let Some((key_idx, data)) = self.search_one_bucket_l(prim_bkt, key, sig) {
            return Ok(((key_idx - 1) as usize, data));
        }
        for bkt in self.chain(sec_bkt) {
            if let Some((key_idx, data)) = self.search_one_bucket_l(bkt, key, sig) {
                return Ok(((key_idx - 1) as usize, data));
            }
        }
        Err(FlowHashError::NotFound)
    }

    fn lookup_lf(
        &self,
        prim_bkt: &Bucket,
        sec_bkt: &Bucket,
        key: &[u8],
        sig: u16,
    ) -> Result<(usize, DataPtr)> {
        loop {
            // Counter first, acquire: no scan load may be hoisted above it.
            let cnt_b = self.tbl_chng_cnt.load(Ordering::Acquire);

            if let Some((key_idx, data)) = self.search_one_bucket_lf(prim_bkt, key, sig) {
                return Ok(((key_idx - 1) as usize, data));
            }
            for bkt in self.chain(sec_bkt) {
                if let Some((key_idx, data)) = self.search_one_bucket_lf(bkt, key, sig) {
                    return Ok(((key_idx - 1) as usize, data));
                }
            }

            // Keep the scan's loads above the counter re-read, then rescan
            // if a displacement or compaction moved entries mid-scan.
            fence(Ordering::Acquire);
            let cnt_a = self.tbl_chng_cnt.load(Ordering::Acquire);
            if likely(cnt_a == cnt_b) {
                return Err(FlowHashError::NotFound);
            }
        }
    }

    fn lookup_inner(&self, key: &[u8], hash: u32) -> Result<(usize, DataPtr)> {
        self.check_key(key)?;
        let sig = short_sig(hash);
        let prim_idx = prim_bucket_index(hash, self.bucket_mask);
        let sec_idx = alt_bucket_index(prim_idx, sig, self.bucket_mask);
        let prim_bkt = &self.buckets[prim_idx as usize];
        let sec_bkt = &self.buckets[sec_idx as usize];
        if self.rw_concurrency_lf {
            self.lookup_lf(prim_bkt, sec_bkt, key, sig)
        } else {
            self.lookup_l(prim_bkt, sec_bkt, key, sig)
        }
    }

    /// External index of `key`, or [`FlowHashError::NotFound`].
    pub fn lookup(&self, key: &[u8]) -> Result<usize> {
        self.lookup_inner(key, self.hash(key)).map(|(idx, _)| idx)
    }

    pub fn lookup_with_hash(&self, key: &[u8], hash: u32) -> Result<usize> {
        self.lookup_inner(key, hash).map(|(idx, _)| idx)
    }

    /// External index and data pointer of `key`.
    pub fn lookup_data(&self, key: &[u8]) -> Result<(usize, DataPtr)> {
        self.lookup_inner(key, self.hash(key))
    }

    pub fn lookup_with_hash_data(&self, key: &[u8], hash: u32) -> Result<(usize, DataPtr)> {
        self.lookup_inner(key, hash)
    }

    // ------------------------------------------------------------------
    // bulk lookup

    /// Confirm signature hits against the key store, locked flavour.
    #[inline]
    fn confirm_mask_l(&self, bkt: &Bucket, mut mask: u32, key: &[u8]) -> Option<(u32, DataPtr)> {
        while mask != 0 {
            let hit = mask.trailing_zeros() as usize;
            let key_idx = bkt.key_idx(hit, Ordering::Relaxed);
            if key_idx != EMPTY_SLOT && self.key_store.key_eq(key_idx, key) {
                let data = self.key_store.pdata(key_idx).load(Ordering::Relaxed);
                return Some((key_idx, data));
            }
            mask &= mask - 1;
        }
        None
    }

    #[inline]
    fn confirm_mask_lf(&self, bkt: &Bucket, mut mask: u32, key: &[u8]) -> Option<(u32, DataPtr)> {
        while mask != 0 {
            let hit = mask.trailing_zeros() as usize;
            let key_idx = bkt.key_idx(hit, Ordering::Acquire);
            if key_idx != EMPTY_SLOT && self.key_store.key_eq(key_idx, key) {
                let data = self.key_store.pdata(key_idx).load(Ordering::Acquire);
                return Some((key_idx, data));
            }
            mask &= mask - 1;
        }
        None
    }

    /// Prefetch the key slot behind the first signature hit of `mask`.
    #[inline]
    fn prefetch_first_hit(&self, bkt: &Bucket, mask: u32) {
        if mask != 0 {
            let first = mask.trailing_zeros() as usize;
            let key_idx = bkt.key_idx(first, Ordering::Relaxed);
            prefetch_read(self.key_store.pdata(key_idx) as *const _);
        }
    }

    fn bulk_search_l(
        &self,
        keys: &[&[u8]],
        sigs: &[u16],
        prim: &[u32],
        sec: &[u32],
        positions: &mut [Option<usize>],
        mut data: Option<&mut [Option<DataPtr>]>,
    ) -> u64 {
        let n = keys.len();
        let mut hits = 0u64;
        let mut masks = [0u16; LOOKUP_BULK_MAX];

        let _g = self.reader_lock();

        // Signature pass; prefetch the key slot of each first hit so the
        // compare pass finds it resident.
        for i in 0..n {
            let pb = &self.buckets[prim[i] as usize];
            let sb = &self.buckets[sec[i] as usize];
            masks[i] = sig::compare_signatures(pb, sb, sigs[i]);
            if sig::prim_hits(masks[i]) != 0 {
                self.prefetch_first_hit(pb, sig::prim_hits(masks[i]));
            } else {
                self.prefetch_first_hit(sb, sig::sec_hits(masks[i]));
            }
        }

        // Full-key confirmation, primary hits first.
        for i in 0..n {
            positions[i] = None;
            let pb = &self.buckets[prim[i] as usize];
            let sb = &self.buckets[sec[i] as usize];
            let found = self
                .confirm_mask_l(pb, sig::prim_hits(masks[i]), keys[i])
                .or_else(|| self.confirm_mask_l(sb, sig::sec_hits(masks[i]), keys[i]));
            if let Some((key_idx, d)) = found {
                positions[i] = Some((key_idx - 1) as usize);
                if let Some(out) = data.as_deref_mut() {
                    out[i] = Some(d);
                }
                hits |= 1 << i;
            }
        }

        // Only the stragglers pay for the overflow chains.
        if self.ext_table && hits != full_mask(n) {
            for i in 0..n {
                if hits & (1 << i) != 0 {
                    continue;
                }
                let sb = &self.buckets[sec[i] as usize];
                let first = sb.next();
                if first == 0 {
                    continue;
                }
                for bkt in self.chain(self.ext_bucket(first)) {
                    if let Some((key_idx, d)) = self.search_one_bucket_l(bkt, keys[i], sigs[i]) {
                        positions[i] = Some((key_idx - 1) as usize);
                        if let Some(out) = data.as_deref_mut() {
                            out[i] = Some(d);
                        }
                        hits |= 1 << i;
                        break;
                    }
                }
            }
        }

        hits
    }

    fn bulk_search_lf(
        &self,
        keys: &[&[u8]],
        sigs: &[u16],
        prim: &[u32],
        sec: &[u32],
        positions: &mut [Option<usize>],
        mut data: Option<&mut [Option<DataPtr>]>,
    ) -> u64 {
        let n = keys.len();
        let mut masks = [0u16; LOOKUP_BULK_MAX];

        loop {
            let mut hits = 0u64;
            let cnt_b = self.tbl_chng_cnt.load(Ordering::Acquire);

            for i in 0..n {
                let pb = &self.buckets[prim[i] as usize];
                let sb = &self.buckets[sec[i] as usize];
                masks[i] = sig::compare_signatures(pb, sb, sigs[i]);
                if sig::prim_hits(masks[i]) != 0 {
                    self.prefetch_first_hit(pb, sig::prim_hits(masks[i]));
                } else {
                    self.prefetch_first_hit(sb, sig::sec_hits(masks[i]));
                }
            }

            for i in 0..n {
                positions[i] = None;
                if let Some(out) = data.as_deref_mut() {
                    out[i] = None;
                }
                let pb = &self.buckets[prim[i] as usize];
                let sb = &self.buckets[sec[i] as usize];
                let found = self
                    .confirm_mask_lf(pb, sig::prim_hits(masks[i]), keys[i])
                    .or_else(|| self.confirm_mask_lf(sb, sig::sec_hits(masks[i]), keys[i]));
                if let Some((key_idx, d)) = found {
                    positions[i] = Some((key_idx - 1) as usize);
                    if let Some(out) = data.as_deref_mut() {
                        out[i] = Some(d);
                    }
                    hits |= 1 << i;
                }
            }

            // Every hit was individually confirmed against the key bytes,
            // so a full house needs no counter re-check.
            if hits == full_mask(n) {
                return hits;
            }

            if self.ext_table {
                for i in 0..n {
                    if hits & (1 << i) != 0 {
                        continue;
                    }
                    let sb = &self.buckets[sec[i] as usize];
                    let first = sb.next();
                    if first == 0 {
                        continue;
                    }
                    for bkt in self.chain(self.ext_bucket(first)) {
                        if let Some((key_idx, d)) =
                            self.search_one_bucket_lf(bkt, keys[i], sigs[i])
                        {
                            positions[i] = Some((key_idx - 1) as usize);
                            if let Some(out) = data.as_deref_mut() {
                                out[i] = Some(d);
                            }
                            hits |= 1 << i;
                            break;
                        }
                    }
                }
            }

            fence(Ordering::Acquire);
            let cnt_a = self.tbl_chng_cnt.load(Ordering::Acquire);
            if likely(cnt_a == cnt_b) {
                return hits;
            }
        }
    }

    fn bulk_inner(
        &self,
        keys: &[&[u8]],
        hashes: Option<&[u32]>,
        positions: &mut [Option<usize>],
        data: Option<&mut [Option<DataPtr>]>,
    ) -> Result<u64> {
        let n = keys.len();
        if n == 0 || n > LOOKUP_BULK_MAX {
            return Err(FlowHashError::InvalidParameter("bulk size out of range"));
        }
        if positions.len() < n {
            return Err(FlowHashError::InvalidParameter("positions too short"));
        }
        if let Some(h) = hashes {
            if h.len() < n {
                return Err(FlowHashError::InvalidParameter("hashes too short"));
            }
        }
        if let Some(d) = &data {
            if d.len() < n {
                return Err(FlowHashError::InvalidParameter("data too short"));
            }
        }
        for key in keys {
            self.check_key(key)?;
        }

        let mut sigs = [0u16; LOOKUP_BULK_MAX];
        let mut prim = [0u32; LOOKUP_BULK_MAX];
        let mut sec = [0u32; LOOKUP_BULK_MAX];

        // Pipeline: keys a few iterations ahead, both candidate buckets as
        // soon as their indices are known.
        for key in keys.iter().take(PREFETCH_OFFSET) {
            prefetch_read(key.as_ptr());
        }
        for i in 0..n {
            if i + PREFETCH_OFFSET < n {
                prefetch_read(keys[i + PREFETCH_OFFSET].as_ptr());
            }
            let hash = match hashes {
                Some(h) => h[i],
                None => self.hash(keys[i]),
            };
            sigs[i] = short_sig(hash);
            prim[i] = prim_bucket_index(hash, self.bucket_mask);
            sec[i] = alt_bucket_index(prim[i], sigs[i], self.bucket_mask);
            prefetch_read(&self.buckets[prim[i] as usize] as *const Bucket);
            prefetch_read(&self.buckets[sec[i] as usize] as *const Bucket);
        }

        let hits = if self.rw_concurrency_lf {
            self.bulk_search_lf(keys, &sigs[..n], &prim[..n], &sec[..n], positions, data)
        } else {
            self.bulk_search_l(keys, &sigs[..n], &prim[..n], &sec[..n], positions, data)
        };
        Ok(hits)
    }

    /// Look up up to [`LOOKUP_BULK_MAX`] keys in one pipelined pass.
    /// `positions[i]` receives what `lookup(keys[i])` would return.
    pub fn lookup_bulk(&self, keys: &[&[u8]], positions: &mut [Option<usize>]) -> Result<()> {
        self.bulk_inner(keys, None, positions, None).map(|_| ())
    }

    pub fn lookup_with_hash_bulk(
        &self,
        keys: &[&[u8]],
        hashes: &[u32],
        positions: &mut [Option<usize>],
    ) -> Result<()> {
        self.bulk_inner(keys, Some(hashes), positions, None)
            .map(|_| ())
    }

    /// Bulk lookup that also returns data pointers. The result is the hit
    /// mask (bit `i` set when `keys[i]` was found); `mask.count_ones()` is
    /// the number of hits.
    pub fn lookup_bulk_data(&self, keys: &[&[u8]], data: &mut [Option<DataPtr>]) -> Result<u64> {
        let mut positions = [None; LOOKUP_BULK_MAX];
        let n = keys.len().min(LOOKUP_BULK_MAX);
        self.bulk_inner(keys, None, &mut positions[..n], Some(data))
    }

    pub fn lookup_with_hash_bulk_data(
        &self,
        keys: &[&[u8]],
        hashes: &[u32],
        data: &mut [Option<DataPtr>],
    ) -> Result<u64> {
        let mut positions = [None; LOOKUP_BULK_MAX];
        let n = keys.len().min(LOOKUP_BULK_MAX);
        self.bulk_inner(keys, Some(hashes), &mut positions[..n], Some(data))
    }

    // ------------------------------------------------------------------
    // delete engine

    /// Search `bkt` for `key` and clear the matching entry. Returns the
    /// entry's position in the bucket and the removed key index. Caller
    /// holds the writer lock.
    fn search_and_remove(&self, bkt: &Bucket, key: &[u8], sig: u16) -> Option<(usize, u32)> {
        for i in 0..BUCKET_ENTRIES {
            let key_idx = bkt.key_idx(i, Ordering::Acquire);
            if bkt.sig(i) == sig
                && key_idx != EMPTY_SLOT
                && self.key_store.key_eq(key_idx, key)
            {
                bkt.set_sig(i, NULL_SIGNATURE);
                if self.immediate_free_on_del() {
                    self.free_slot(key_idx);
                }
                bkt.set_key_idx(i, EMPTY_SLOT, Ordering::Release);
                return Some((i, key_idx));
            }
        }
        None
    }

    /// Move the last live entry of the chain's last bucket into the hole at
    /// `(cur_bkt, pos)` so chains stay dense and can shed their tails.
    fn compact_chain(&self, cur_bkt: &Bucket, pos: usize) {
        if cur_bkt.next() == 0 {
            return;
        }
        let last_bkt = self.last_bucket(cur_bkt);
        for i in (0..BUCKET_ENTRIES).rev() {
            let key_idx = last_bkt.key_idx(i, Ordering::Relaxed);
            if key_idx != EMPTY_SLOT {
                cur_bkt.set_sig(pos, last_bkt.sig(i));
                cur_bkt.set_key_idx(pos, key_idx, Ordering::Release);
                if self.rw_concurrency_lf {
                    // The entry briefly exists twice; announce before the
                    // source is cleared so a reader that missed both spots
                    // retries.
                    self.bump_change_counter();
                }
                last_bkt.set_sig(i, NULL_SIGNATURE);
                last_bkt.set_key_idx(i, EMPTY_SLOT, Ordering::Release);
                return;
            }
        }
    }

    /// Unlink the chain's trailing bucket if it emptied out. Returns the
    /// overflow index to ride along in the reclamation record, or 0.
    fn recycle_trailing(&self, root: &Bucket, removed_key_idx: u32) -> u32 {
        let first = root.next();
        if first == 0 {
            return 0;
        }
        let mut prev = root;
        let mut last_idx = first;
        loop {
            let nxt = self.ext_bucket(last_idx).next();
            if nxt == 0 {
                break;
            }
            prev = self.ext_bucket(last_idx);
            last_idx = nxt;
        }
        let last_bkt = self.ext_bucket(last_idx);
        if !last_bkt.is_empty() {
            return 0;
        }
        prev.set_next(0);

        if self.immediate_free_on_del() {
            if let Some(ring) = &self.free_ext_bkts {
                if !ring.enqueue(last_idx) {
                    log::error!(
                        "{}: overflow-bucket ring full, index {} lost",
                        self.name,
                        last_idx
                    );
                }
            }
            0
        } else if self.rcu.get().is_some() {
            // Freed together with the key slot once the grace period ends.
            last_idx
        } else {
            // No reclamation service: stash for free_key_with_position.
            self.ext_bkt_to_free[(removed_key_idx - 1) as usize]
                .store(last_idx, Ordering::Relaxed);
            0
        }
    }

    fn publish_reclaim(&self, key_idx: u32, ext_bkt_idx: u32) {
        let Some(rcu) = self.rcu.get() else { return };
        let entry = ReclaimEntry {
            key_idx,
            ext_bkt_idx,
        };
        match &rcu.dq {
            None => {
                // Sync mode: ride out the grace period right here.
                rcu.v.synchronize();
                self.free_reclaimed(entry);
            }
            Some(dq) => {
                if dq.enqueue(entry, &mut |e| self.free_reclaimed(e)).is_err() {
                    log::error!("{}: reclamation enqueue failed", self.name);
                }
            }
        }
    }

    fn del_inner(&self, key: &[u8], hash: u32) -> Result<usize> {
        self.check_key(key)?;
        let sig = short_sig(hash);
        let prim_idx = prim_bucket_index(hash, self.bucket_mask);
        let sec_idx = alt_bucket_index(prim_idx, sig, self.bucket_mask);
        let prim_bkt = &self.buckets[prim_idx as usize];
        let sec_bkt = &self.buckets[sec_idx as usize];

        let _g = self.writer_lock();

        let mut removed: Option<(&Bucket, u32)> = None;
        if let Some((pos, key_idx)) = self.search_and_remove(prim_bkt, key, sig) {
            self.compact_chain(prim_bkt, pos);
            removed = Some((prim_bkt, key_idx));
        } else {
            for bkt in self.chain(sec_bkt) {
                if let Some((pos, key_idx)) = self.search_and_remove(bkt, key, sig) {
                    self.compact_chain(bkt, pos);
                    removed = Some((sec_bkt, key_idx));
                    break;
                }
            }
        }

        let Some((chain_root, key_idx)) = removed else {
            return Err(FlowHashError::NotFound);
        };

        let ext_bkt_idx = self.recycle_trailing(chain_root, key_idx);
        self.publish_reclaim(key_idx, ext_bkt_idx);
        Ok((key_idx - 1) as usize)
    }

    /// Remove `key`. Returns the external index it occupied. What happens to
    /// the key slot depends on the mode: freed immediately, deferred to the
    /// reclamation service, or left to `free_key_with_position`.
    pub fn del_key(&self, key: &[u8]) -> Result<usize> {
        self.del_inner(key, self.hash(key))
    }

    pub fn del_key_with_hash(&self, key: &[u8], hash: u32) -> Result<usize> {
        self.del_inner(key, hash)
    }

    // ------------------------------------------------------------------
    // position APIs

    /// Copy of the key stored at `position`. Verified by re-lookup, so a
    /// position whose slot was deleted or recycled reports `NotFound`.
    pub fn get_key_with_position(&self, position: usize) -> Result<Vec<u8>> {
        if position >= self.key_store.slots() - 1 {
            return Err(FlowHashError::InvalidParameter("position out of range"));
        }
        let key_idx = position as u32 + 1;
        let key = self.key_store.key_copy(key_idx);
        if self.lookup(&key)? != position {
            return Err(FlowHashError::NotFound);
        }
        Ok(key)
    }

    /// Hand a no-longer-referenced slot back to the allocator; the
    /// application's side of the `NO_FREE_ON_DEL` contract.
    pub fn free_key_with_position(&self, position: usize) -> Result<()> {
        if position >= self.key_store.slots() - 1 {
            return Err(FlowHashError::InvalidParameter("position out of range"));
        }
        let key_idx = position as u32 + 1;
        if !self.ext_bkt_to_free.is_empty() {
            let pending = self.ext_bkt_to_free[position].swap(0, Ordering::Relaxed);
            if pending != 0 {
                if let Some(ring) = &self.free_ext_bkts {
                    if !ring.enqueue(pending) {
                        log::error!(
                            "{}: overflow-bucket ring full, index {} lost",
                            self.name,
                            pending
                        );
                    }
                }
            }
        }
        self.free_slot(key_idx);
        Ok(())
    }

    // ------------------------------------------------------------------
    // iteration

    /// Advance the cursor to the next occupied entry and return (key copy,
    /// data pointer, external index).
    ///
    /// No snapshot semantics: under concurrent writes an entry may be seen
    /// zero, one or two times across a full walk.
    pub fn iterate(&self, next: &mut u32) -> Result<(Vec<u8>, DataPtr, usize)> {
        let total_main = self.num_buckets * BUCKET_ENTRIES as u32;
        let total = total_main * 2;

        let mut position = EMPTY_SLOT;
        let mut cursor = *next;

        while cursor < total_main {
            let bkt = &self.buckets[(cursor / BUCKET_ENTRIES as u32) as usize];
            position = bkt.key_idx((cursor % BUCKET_ENTRIES as u32) as usize, Ordering::Acquire);
            if position != EMPTY_SLOT {
                break;
            }
            cursor += 1;
        }

        if position == EMPTY_SLOT {
            if !self.ext_table {
                return Err(FlowHashError::NotFound);
            }
            cursor = cursor.max(total_main);
            while cursor < total {
                let rel = cursor - total_main;
                let bkt = &self.buckets_ext[(rel / BUCKET_ENTRIES as u32) as usize];
                position = bkt.key_idx((rel % BUCKET_ENTRIES as u32) as usize, Ordering::Acquire);
                if position != EMPTY_SLOT {
                    break;
                }
                cursor += 1;
            }
            if position == EMPTY_SLOT {
                return Err(FlowHashError::NotFound);
            }
        }

        let (key, data) = {
            let _g = self.reader_lock();
            (
                self.key_store.key_copy(position),
                self.key_store.pdata(position).load(Ordering::Acquire),
            )
        };
        *next = cursor + 1;
        Ok((key, data, (position - 1) as usize))
    }

    // ------------------------------------------------------------------
    // reset

    /// Restore the freshly-created state. The caller must guarantee
    /// exclusive access beyond the writer lock: no concurrent readers, no
    /// other writers mid-operation.
    pub fn reset(&self) {
        let _g = self.writer_lock();

        if let Some(rcu) = self.rcu.get() {
            if let Some(dq) = rcu.dq.as_ref() {
                let stats = dq.reclaim(usize::MAX, &mut |e| self.free_reclaimed(e));
                if stats.pending != 0 {
                    log::error!(
                        "{}: reset with {} reclamation entries still pending",
                        self.name,
                        stats.pending
                    );
                }
            }
        }

        for bkt in self.buckets.iter() {
            bkt.clear();
        }
        for bkt in self.buckets_ext.iter() {
            bkt.clear();
        }
        self.key_store.zero();
        self.tbl_chng_cnt.store(0, Ordering::Relaxed);

        self.free_slots.reset();
        self.free_slots.populate(self.key_store.slots() as u32 - 1);
        if let Some(ring) = &self.free_ext_bkts {
            ring.reset();
            ring.populate(self.num_buckets);
        }
        for cache in self.local_free_slots.iter() {
            cache.clear();
        }
        for pending in self.ext_bkt_to_free.iter() {
            pending.store(0, Ordering::Relaxed);
        }
    }
}

impl Drop for CuckooTable {
    fn drop(&mut self) {
        registry::remove(&self.name);
    }
}

struct ChainIter<'t> {
    table: &'t CuckooTable,
    cur: Option<&'t Bucket>,
}

impl<'t> Iterator for ChainIter<'t> {
    type Item = &'t Bucket;

    #[inline]
    fn next(&mut self) -> Option<&'t Bucket> {
        let bkt = self.cur?;
        let nxt = bkt.next();
        self.cur = if nxt != 0 {
            Some(self.table.ext_bucket(nxt))
        } else {
            None
        };
        Some(bkt)
    }
}

#[inline]
fn full_mask(n: usize) -> u64 {
    if n == 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}
