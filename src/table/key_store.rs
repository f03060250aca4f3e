use core::ptr::NonNull;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::sync::atomic::AtomicPtr;

use crate::error::{FlowHashError, Result};
use crate::table::bucket::KEY_ALIGNMENT;

/// Offset of the key bytes within a slot; the atomic data pointer sits at
/// offset 0.
const KEY_OFFSET: usize = std::mem::size_of::<AtomicPtr<()>>();

/// Fixed array of key slots in one zeroed allocation.
///
/// Slot layout is `{ pdata: AtomicPtr, key: [u8; key_len] }` padded out to a
/// `KEY_ALIGNMENT` multiple. Slot 0 is the reserved dummy that backs the
/// empty-entry sentinel and is never written.
pub(crate) struct KeyStore {
    base: NonNull<u8>,
    layout: Layout,
    stride: usize,
    slots: usize,
    key_len: usize,
}

// Slots hold an atomic pointer plus key bytes that are only written while
// the slot is unpublished (fresh from the allocator) or under exclusive
// access; concurrent readers are fenced off by the key-index publication
// protocol and, in lock-free mode, by deferred reclamation.
unsafe impl Send for KeyStore {}
unsafe impl Sync for KeyStore {}

impl KeyStore {
    pub(crate) fn new(slots: usize, key_len: usize) -> Result<Self> {
        let stride = (KEY_OFFSET + key_len + KEY_ALIGNMENT - 1) & !(KEY_ALIGNMENT - 1);
        let size = stride
            .checked_mul(slots)
            .ok_or(FlowHashError::InvalidParameter("key store too large"))?;
        let layout = Layout::from_size_align(size, 64)
            .map_err(|_| FlowHashError::InvalidParameter("key store too large"))?;
        let base = NonNull::new(unsafe { alloc_zeroed(layout) })
            .ok_or(FlowHashError::AllocationFailed)?;
        Ok(Self {
            base,
            layout,
            stride,
            slots,
            key_len,
        })
    }

    #[inline]
    pub(crate) fn slots(&self) -> usize {
        self.slots
    }

    #[inline]
    fn slot_ptr(&self, idx: u32) -> *mut u8 {
        debug_assert!((idx as usize) < self.slots);
        unsafe { self.base.as_ptr().add(idx as usize * self.stride) }
    }

    /// The slot's data pointer.
    #[inline]
    pub(crate) fn pdata(&self, idx: u32) -> &AtomicPtr<()> {
        unsafe { &*(self.slot_ptr(idx) as *const AtomicPtr<()>) }
    }

    #[inline]
    fn key_ptr(&self, idx: u32) -> *mut u8 {
        unsafe { self.slot_ptr(idx).add(KEY_OFFSET) }
    }

    /// Write the key bytes of an unpublished slot.
    #[inline]
    pub(crate) fn write_key(&self, idx: u32, key: &[u8]) {
        debug_assert_eq!(key.len(), self.key_len);
        unsafe {
            std::ptr::copy_nonoverlapping(key.as_ptr(), self.key_ptr(idx), self.key_len);
        }
    }

    /// Compare the slot's key bytes against `key`.
    #[inline]
    pub(crate) fn key_eq(&self, idx: u32, key: &[u8]) -> bool {
        debug_assert_eq!(key.len(), self.key_len);
        unsafe {
            let stored = std::slice::from_raw_parts(self.key_ptr(idx), self.key_len);
            stored == key
        }
    }

    /// Copy out the slot's key bytes.
    pub(crate) fn key_copy(&self, idx: u32) -> Vec<u8> {
        unsafe { std::slice::from_raw_parts(self.key_ptr(idx), self.key_len).to_vec() }
    }

    /// Zero every slot. Only sound under exclusive access.
    pub(crate) fn zero(&self) {
        unsafe {
            std::ptr::write_bytes(self.base.as_ptr(), 0, self.layout.size());
        }
    }
}

impl Drop for KeyStore {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.base.as_ptr(), self.layout);
        }
    }
}
