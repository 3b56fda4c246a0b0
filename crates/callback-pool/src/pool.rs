//! Pool, holder lists, and the dispense/recycle state machine
//!
//! A pool owns every magazine for one call signature. Dispensing serves
//! from the head of `partial`; magazines that recycled fully stocked wait
//! in `full` and take precedence, so freed trampolines are reused before
//! the backend is asked for new ones.
//!
//! Reclamation is holder-driven. All handles issued during one magazine's
//! dispensing episode share a single [`MagazineHolder`]; when the last of
//! them drops, the holder's drop recycles the magazine back into the pool
//! as one event. If the pool itself is already gone, the holder does
//! nothing and slot drop glue releases the remaining trampolines.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::callback::NativeCallback;
use crate::error::PoolError;
use crate::handle::CallbackHandle;
use crate::magazine::Magazine;
use crate::signature::CallSignature;
use crate::trampoline::TrampolineBackend;

/// Keeps a magazine's dispensing episode alive.
///
/// One holder exists per episode — the span during which a magazine is
/// handing out slots. The pool's lists and every outstanding handle hold
/// strong references; the drop of the last one triggers the recycle.
pub(crate) struct MagazineHolder {
    pool: Weak<CallbackPool>,
    magazine: Arc<Magazine>,
}

impl Drop for MagazineHolder {
    fn drop(&mut self) {
        // A dead pool is the expected terminal state: the magazine's slots
        // release their own trampolines when their last references go.
        if let Some(pool) = self.pool.upgrade() {
            pool.recycle(&self.magazine);
        }
    }
}

#[derive(Default)]
struct PoolState {
    partial: VecDeque<Arc<MagazineHolder>>,
    full: VecDeque<Arc<MagazineHolder>>,
    live: Vec<Arc<Magazine>>,
}

/// All magazines servicing one call signature.
///
/// Created and cached by [`PoolRegistry`](crate::registry::PoolRegistry).
/// `dispense` and `recycle` are the only entry points that touch pool
/// state, and both hold the pool mutex, so they never interleave.
pub struct CallbackPool {
    signature: Arc<CallSignature>,
    backend: Arc<dyn TrampolineBackend>,
    magazine_capacity: usize,
    // Handed to every holder so recycling can find its way back without
    // keeping the pool alive.
    weak_self: Weak<CallbackPool>,
    state: Mutex<PoolState>,
}

impl CallbackPool {
    pub(crate) fn new(
        signature: Arc<CallSignature>,
        backend: Arc<dyn TrampolineBackend>,
        magazine_capacity: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| CallbackPool {
            signature,
            backend,
            magazine_capacity,
            weak_self: weak.clone(),
            state: Mutex::new(PoolState::default()),
        })
    }

    /// The signature this pool serves
    pub fn signature(&self) -> &Arc<CallSignature> {
        &self.signature
    }

    /// Number of magazines currently managed by this pool
    pub fn magazine_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Dispense a slot bound to `callback`.
    ///
    /// The returned handle keeps the slot's trampoline valid; native code
    /// may call its [`code_address`](CallbackHandle::code_address) until
    /// the handle is dropped or disposed.
    pub fn dispense(&self, callback: Arc<dyn NativeCallback>) -> Result<CallbackHandle, PoolError> {
        loop {
            let retired;
            {
                let mut state = self.state.lock();
                // Recycled magazines are served first: their slots reuse
                // trampolines that already exist.
                if let Some(restocked) = state.full.pop_front() {
                    state.partial.push_front(restocked);
                }
                let holder = match state.partial.front() {
                    Some(holder) => holder.clone(),
                    None => {
                        let magazine = Arc::new(Magazine::new(
                            self.signature.clone(),
                            self.backend.clone(),
                            self.magazine_capacity,
                        ));
                        state.live.push(magazine.clone());
                        let holder = Arc::new(MagazineHolder {
                            pool: self.weak_self.clone(),
                            magazine,
                        });
                        state.partial.push_front(holder.clone());
                        holder
                    }
                };
                match holder.magazine.try_get_free_slot()? {
                    Some(slot) => {
                        slot.bind(callback);
                        return Ok(CallbackHandle::new(slot, holder));
                    }
                    None => {
                        // Head magazine has no capacity left. Retire its
                        // holder; outstanding handles keep it alive, and if
                        // none remain the drop below recycles it in time
                        // for the next attempt.
                        retired = state.partial.pop_front();
                    }
                }
            }
            // Dropped outside the lock: the holder's recycle re-acquires it.
            drop(retired);
        }
    }

    /// Return a magazine to service after its episode ended.
    ///
    /// Invoked only from [`MagazineHolder`]'s drop. The magazine resets
    /// (opted-out slots fall out of tracking, the rest restock the free
    /// list) and re-enters the holder lists under a new holder — the old
    /// one is mid-drop and cannot be reused.
    pub(crate) fn recycle(&self, magazine: &Arc<Magazine>) {
        let mut unmanaged = None;
        let mut state = self.state.lock();
        let tracked = magazine.recycle();
        if tracked == 0 {
            // Every slot was transferred away; the magazine is no longer
            // pool-managed.
            if let Some(idx) = state
                .live
                .iter()
                .position(|live| Arc::ptr_eq(live, magazine))
            {
                unmanaged = Some(state.live.swap_remove(idx));
            }
        } else {
            let holder = Arc::new(MagazineHolder {
                pool: self.weak_self.clone(),
                magazine: magazine.clone(),
            });
            if magazine.is_full() {
                state.full.push_back(holder);
            } else {
                state.partial.push_back(holder);
            }
        }
        drop(state);
        // Dropping a magazine can call into the backend; keep that outside
        // the pool lock.
        drop(unmanaged);
    }
}
