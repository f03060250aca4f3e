use crossbeam_queue::ArrayQueue;

/// MPMC ring of free 32-bit indices.
///
/// Backs both the key-slot allocator and the overflow-bucket allocator. The
/// queue is multi-producer multi-consumer throughout, so the single and burst
/// call forms differ only in how many items they move.
pub(crate) struct FreeRing {
    q: ArrayQueue<u32>,
}

impl FreeRing {
    pub(crate) fn with_capacity(cap: usize) -> Self {
        Self {
            q: ArrayQueue::new(cap),
        }
    }

    /// Refill with `1..=n`, the initial population of a fresh table.
    pub(crate) fn populate(&self, n: u32) {
        for i in 1..=n {
            // Cannot fail: capacity is sized for the full population.
            let _ = self.q.push(i);
        }
    }

    #[inline]
    pub(crate) fn enqueue(&self, idx: u32) -> bool {
        self.q.push(idx).is_ok()
    }

    #[inline]
    pub(crate) fn dequeue(&self) -> Option<u32> {
        self.q.pop()
    }

    /// Dequeue up to `out.len()` indices, returning how many were moved.
    pub(crate) fn dequeue_burst(&self, out: &mut [u32]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.q.pop() {
                Some(idx) => {
                    out[n] = idx;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Enqueue as many of `xs` as fit, returning how many were moved.
    pub(crate) fn enqueue_burst(&self, xs: &[u32]) -> usize {
        let mut n = 0;
        while n < xs.len() {
            if self.q.push(xs[n]).is_err() {
                break;
            }
            n += 1;
        }
        n
    }

    #[inline]
    pub(crate) fn count(&self) -> usize {
        self.q.len()
    }

    /// Drop every queued index. Only sound under exclusive access.
    pub(crate) fn reset(&self) {
        while self.q.pop().is_some() {}
    }
}
