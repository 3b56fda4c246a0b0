//! Caller-visible handle around a dispensed slot

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::PoolError;
use crate::magazine::Slot;
use crate::pool::MagazineHolder;
use crate::trampoline::CodeAddress;

/// A dispensed callback trampoline.
///
/// Holding the handle keeps the trampoline bound and callable. Dropping it
/// makes the slot reclaimable the next time its magazine recycles — which
/// happens once every handle from the same dispensing episode is gone.
/// There is no release call to forget.
pub struct CallbackHandle {
    slot: Arc<Slot>,
    // Shared with every handle of the episode; the last drop recycles the
    // magazine.
    _holder: Arc<MagazineHolder>,
    disposed: AtomicBool,
}

impl CallbackHandle {
    pub(crate) fn new(slot: Arc<Slot>, holder: Arc<MagazineHolder>) -> Self {
        CallbackHandle {
            slot,
            _holder: holder,
            disposed: AtomicBool::new(false),
        }
    }

    /// Address native code calls. Valid while the handle is live.
    pub fn code_address(&self) -> CodeAddress {
        self.slot.code_address()
    }

    /// Control whether the pool may reclaim and reuse this slot.
    ///
    /// `false` transfers ownership of the native trampoline to the caller
    /// permanently: the pool drops all bookkeeping for the slot at the next
    /// recycle and will never free or re-dispense it. Touches only the
    /// slot, so it is correct wherever the slot's magazine currently sits.
    pub fn set_autorelease(&self, autorelease: bool) {
        self.slot.set_autorelease(autorelease);
    }

    /// Whether the slot is still pool-managed
    pub fn is_autorelease(&self) -> bool {
        self.slot.autorelease()
    }

    /// Mark the slot reclaimable.
    ///
    /// Frees nothing immediately; the slot returns to service when its
    /// magazine next recycles. Calling this twice is a caller bug and
    /// fails with [`PoolError::AlreadyDisposed`].
    pub fn dispose(&self) -> Result<(), PoolError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Err(PoolError::AlreadyDisposed);
        }
        self.slot.set_autorelease(true);
        Ok(())
    }
}

impl fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHandle")
            .field("code", &self.slot.code_address())
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish()
    }
}
