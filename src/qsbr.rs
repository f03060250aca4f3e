//! Quiescent-state-based reclamation.
//!
//! Writers that retire a resource cannot recycle it while a reader may still
//! hold a reference obtained without locks. [`Qsbr`] tracks, per reader
//! thread, the most recent global token the thread has acknowledged; a
//! resource retired under token `t` is safe to free once every online reader
//! has reported a counter >= `t`. [`DeferQueue`] holds retired records until
//! that point and hands them to a free callback.
//!
//! Reader side: `register` a thread slot once, call `quiescent` from the
//! polling loop whenever no table references are held, and `offline` before
//! blocking.

use std::collections::VecDeque;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::error::{FlowHashError, Result};

/// Counter value meaning "thread is not reading".
const OFFLINE: u64 = 0;
/// First token handed out; keeps `OFFLINE` unambiguous.
const TOKEN_INIT: u64 = 1;

struct ReaderSlot {
    /// Last token acknowledged, or `OFFLINE`.
    cnt: AtomicU64,
    registered: AtomicBool,
}

/// Shared quiescent-state variable.
pub struct Qsbr {
    token: CachePadded<AtomicU64>,
    slots: Box<[CachePadded<ReaderSlot>]>,
}

impl Qsbr {
    pub fn new(max_threads: usize) -> Self {
        let slots = (0..max_threads)
            .map(|_| {
                CachePadded::new(ReaderSlot {
                    cnt: AtomicU64::new(OFFLINE),
                    registered: AtomicBool::new(false),
                })
            })
            .collect();
        Self {
            token: CachePadded::new(AtomicU64::new(TOKEN_INIT)),
            slots,
        }
    }

    pub fn max_threads(&self) -> usize {
        self.slots.len()
    }

    /// Claim `thread_id` for the calling reader. The slot starts offline.
    pub fn register(&self, thread_id: usize) -> Result<()> {
        let slot = self
            .slots
            .get(thread_id)
            .ok_or(FlowHashError::InvalidParameter("thread_id out of range"))?;
        slot.cnt.store(OFFLINE, Ordering::Relaxed);
        slot.registered.store(true, Ordering::Release);
        Ok(())
    }

    pub fn unregister(&self, thread_id: usize) -> Result<()> {
        let slot = self
            .slots
            .get(thread_id)
            .ok_or(FlowHashError::InvalidParameter("thread_id out of range"))?;
        slot.cnt.store(OFFLINE, Ordering::Release);
        slot.registered.store(false, Ordering::Release);
        Ok(())
    }

    /// Mark the reader as actively reading again.
    ///
    /// The seq-cst fence keeps the reader's subsequent table loads from
    /// moving above the counter store that makes it visible to writers.
    #[inline]
    pub fn online(&self, thread_id: usize) {
        let t = self.token.load(Ordering::Relaxed);
        self.slots[thread_id].cnt.store(t, Ordering::Relaxed);
        fence(Ordering::SeqCst);
    }

    /// Mark the reader as blocked; writers stop waiting on it.
    #[inline]
    pub fn offline(&self, thread_id: usize) {
        self.slots[thread_id].cnt.store(OFFLINE, Ordering::Release);
    }

    /// Report a quiescent state: the reader holds no table references.
    #[inline]
    pub fn quiescent(&self, thread_id: usize) {
        let t = self.token.load(Ordering::Acquire);
        self.slots[thread_id].cnt.store(t, Ordering::Release);
    }

    /// Open a new grace period and return its token.
    #[inline]
    pub fn start(&self) -> u64 {
        self.token.fetch_add(1, Ordering::Release) + 1
    }

    /// Whether every online registered reader has acknowledged `token`.
    /// With `wait`, spins until they have.
    pub fn check(&self, token: u64, wait: bool) -> bool {
        for slot in self.slots.iter() {
            if !slot.registered.load(Ordering::Acquire) {
                continue;
            }
            loop {
                let c = slot.cnt.load(Ordering::Acquire);
                if c == OFFLINE || c >= token {
                    break;
                }
                if !wait {
                    return false;
                }
                std::hint::spin_loop();
            }
        }
        true
    }

    /// Block until all current readers have passed through a quiescent state.
    pub fn synchronize(&self) {
        let token = self.start();
        self.check(token, true);
    }
}

/// Counters reported by a reclaim pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Entries freed by this pass.
    pub freed: u32,
    /// Entries still waiting for their grace period.
    pub pending: u32,
    /// Queue slots currently unused.
    pub available: u32,
}

/// FIFO of retired records, each stamped with the grace-period token that
/// must elapse before its free callback may run.
///
/// The free callback is supplied per call rather than stored, so the queue
/// does not have to hold a reference back into the structure that owns it.
pub struct DeferQueue<T: Copy> {
    v: std::sync::Arc<Qsbr>,
    size: usize,
    trigger_reclaim_limit: usize,
    max_reclaim_size: usize,
    q: Mutex<VecDeque<(u64, T)>>,
}

impl<T: Copy> DeferQueue<T> {
    pub fn new(
        v: std::sync::Arc<Qsbr>,
        size: usize,
        trigger_reclaim_limit: usize,
        max_reclaim_size: usize,
    ) -> Self {
        Self {
            v,
            size,
            trigger_reclaim_limit,
            max_reclaim_size,
            q: Mutex::new(VecDeque::with_capacity(size)),
        }
    }

    pub fn len(&self) -> usize {
        self.q.lock().len()
    }

    /// Retire `entry`. Runs a bounded reclaim pass first when the backlog
    /// has crossed the trigger limit, and a forced pass when the queue is
    /// full; fails only if the queue is still full after that.
    pub fn enqueue(&self, entry: T, free: &mut dyn FnMut(T)) -> Result<()> {
        if self.len() >= self.trigger_reclaim_limit {
            self.reclaim(self.max_reclaim_size, free);
        }
        let token = self.v.start();
        let mut q = self.q.lock();
        if q.len() >= self.size {
            drop(q);
            self.reclaim(self.max_reclaim_size, free);
            q = self.q.lock();
            if q.len() >= self.size {
                return Err(FlowHashError::Internal("defer queue overflow"));
            }
        }
        q.push_back((token, entry));
        Ok(())
    }

    /// Free up to `max` entries whose grace period has elapsed. Entries are
    /// token-ordered, so the pass stops at the first one still pending.
    pub fn reclaim(&self, max: usize, free: &mut dyn FnMut(T)) -> ReclaimStats {
        let mut freed = 0u32;
        let mut q = self.q.lock();
        while (freed as usize) < max {
            match q.front() {
                Some(&(token, entry)) if self.v.check(token, false) => {
                    q.pop_front();
                    free(entry);
                    freed += 1;
                }
                _ => break,
            }
        }
        ReclaimStats {
            freed,
            pending: q.len() as u32,
            available: (self.size - q.len()) as u32,
        }
    }
}
