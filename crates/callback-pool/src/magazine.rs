//! Slots and magazines: the trampoline slab
//!
//! A slot is one physical trampoline plus its current callback binding; a
//! magazine is a fixed-capacity slab of slots all created for the same
//! signature. Slots are allocated lazily as a magazine is drawn down and
//! return to its free list only when the whole magazine is recycled.
//!
//! Release is reference-driven: a slot destroys its own trampoline when the
//! last `Arc` to it drops while the slot is still pool-owned
//! (`autorelease`). Dropping a magazine drops its tracked slots, so an
//! abandoned pool returns every pooled trampoline to the backend with no
//! explicit call.

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::callback::{noop_callback, proxy_dispatch, CallbackProxy, NativeCallback};
use crate::error::PoolError;
use crate::signature::CallSignature;
use crate::trampoline::{CodeAddress, DispatchDescriptor, TrampolineBackend, TrampolineHandle};

/// One reusable trampoline and its current callback binding.
pub(crate) struct Slot {
    trampoline: TrampolineHandle,
    code: CodeAddress,
    proxy: ManuallyDrop<Box<CallbackProxy>>,
    autorelease: AtomicBool,
    backend: Arc<dyn TrampolineBackend>,
}

impl Slot {
    /// Allocate a trampoline and wrap it in a fresh slot. `None` means the
    /// backend could not allocate.
    fn create(
        signature: &Arc<CallSignature>,
        backend: Arc<dyn TrampolineBackend>,
    ) -> Option<Arc<Slot>> {
        let proxy = Box::new(CallbackProxy::new());
        // The box gives the dispatch entry a stable address for the life of
        // the slot (or of the process, if ownership is transferred away).
        let descriptor = DispatchDescriptor {
            entry: proxy_dispatch,
            user_data: &*proxy as *const CallbackProxy as *mut c_void,
        };
        let raw = backend.create_trampoline(signature, descriptor)?;
        Some(Arc::new(Slot {
            trampoline: raw.handle,
            code: raw.code,
            proxy: ManuallyDrop::new(proxy),
            autorelease: AtomicBool::new(true),
            backend,
        }))
    }

    pub(crate) fn code_address(&self) -> CodeAddress {
        self.code
    }

    pub(crate) fn bind(&self, callback: Arc<dyn NativeCallback>) {
        self.proxy.rebind(callback);
    }

    /// Park the slot on the no-op callback until it is dispensed again.
    fn reset(&self) {
        self.proxy.rebind(noop_callback());
    }

    pub(crate) fn autorelease(&self) -> bool {
        self.autorelease.load(Ordering::Acquire)
    }

    pub(crate) fn set_autorelease(&self, autorelease: bool) {
        self.autorelease.store(autorelease, Ordering::Release);
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.autorelease.load(Ordering::Acquire) {
            // Safety: the handle came from create_trampoline on this backend
            // and this is the only place the pool releases it.
            unsafe { self.backend.destroy_trampoline(self.trampoline) };
            // Safety: the proxy is dropped exactly once, here.
            unsafe { ManuallyDrop::drop(&mut self.proxy) };
        }
        // autorelease == false: trampoline ownership was transferred to the
        // caller and native code may still invoke it, so the proxy must
        // outlive this slot. It leaks, along with the trampoline.
    }
}

struct MagazineSlots {
    all: Vec<Arc<Slot>>,
    free: Vec<Arc<Slot>>,
}

/// Fixed-capacity slab of slots for one signature.
pub(crate) struct Magazine {
    signature: Arc<CallSignature>,
    backend: Arc<dyn TrampolineBackend>,
    capacity: usize,
    slots: Mutex<MagazineSlots>,
}

impl Magazine {
    pub(crate) fn new(
        signature: Arc<CallSignature>,
        backend: Arc<dyn TrampolineBackend>,
        capacity: usize,
    ) -> Self {
        Magazine {
            signature,
            backend,
            capacity,
            slots: Mutex::new(MagazineSlots {
                all: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    /// Serve a free slot, lazily allocating up to capacity.
    ///
    /// `Ok(None)` means the magazine is exhausted and the pool should move
    /// on to another one; `Err` means the backend failed to allocate and
    /// the error must surface to the dispensing caller.
    pub(crate) fn try_get_free_slot(&self) -> Result<Option<Arc<Slot>>, PoolError> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.free.pop() {
            return Ok(Some(slot));
        }
        if slots.all.len() >= self.capacity {
            return Ok(None);
        }
        let slot = Slot::create(&self.signature, self.backend.clone()).ok_or(
            PoolError::TrampolineExhausted {
                signature: self.signature.id(),
            },
        )?;
        slots.all.push(slot.clone());
        Ok(Some(slot))
    }

    /// Whether every tracked slot is free
    pub(crate) fn is_full(&self) -> bool {
        let slots = self.slots.lock();
        slots.free.len() == slots.all.len()
    }

    /// Reset for a new dispensing episode.
    ///
    /// Slots the caller opted out of (`autorelease == false`) are dropped
    /// from the tracked set — their trampolines are no longer the pool's
    /// concern. Every remaining slot is parked on the no-op callback and
    /// returned to the free list. Returns the tracked count afterwards.
    pub(crate) fn recycle(&self) -> usize {
        let mut slots = self.slots.lock();
        let MagazineSlots { all, free } = &mut *slots;
        free.clear();
        all.retain(|slot| slot.autorelease());
        for slot in all.iter() {
            slot.reset();
            free.push(slot.clone());
        }
        all.len()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.slots.lock().free.len()
    }

    pub(crate) fn tracked_count(&self) -> usize {
        self.slots.lock().all.len()
    }
}
