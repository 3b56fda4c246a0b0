//! Callback trait, call frame, and the dispatch entry native code reaches
//!
//! Marshaling individual values is not this crate's concern: a callback
//! receives the raw return/parameter buffer addresses in a [`CallFrame`]
//! and decodes them with whatever marshaling layer sits above the pool.

use std::ffi::c_void;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// Buffer addresses for one native invocation.
///
/// Built on the stack of the dispatching thread and valid only for the
/// duration of [`NativeCallback::invoke`].
#[derive(Debug)]
pub struct CallFrame {
    return_buffer: *mut c_void,
    param_buffer: *mut c_void,
}

impl CallFrame {
    /// Wrap the buffer addresses of one invocation
    pub fn new(return_buffer: *mut c_void, param_buffer: *mut c_void) -> Self {
        CallFrame {
            return_buffer,
            param_buffer,
        }
    }

    /// Address the callback must write its return value to
    pub fn return_buffer(&self) -> *mut c_void {
        self.return_buffer
    }

    /// Address of the packed parameter buffer
    pub fn param_buffer(&self) -> *mut c_void {
        self.param_buffer
    }
}

/// A managed callback object reachable from native code.
///
/// Implementations decode `frame` using the call signature they were
/// registered under.
pub trait NativeCallback: Send + Sync {
    /// Called on the native thread that invoked the trampoline
    fn invoke(&self, frame: &CallFrame);
}

struct NoopCallback;

impl NativeCallback for NoopCallback {
    fn invoke(&self, _frame: &CallFrame) {}
}

static NOOP_CALLBACK: Lazy<Arc<dyn NativeCallback>> = Lazy::new(|| Arc::new(NoopCallback));

/// The shared do-nothing callback recycled slots are parked on
pub(crate) fn noop_callback() -> Arc<dyn NativeCallback> {
    NOOP_CALLBACK.clone()
}

/// Rebindable dispatch target owned by one slot.
///
/// The trampoline's user-data pointer addresses this cell for the slot's
/// entire existence, so rebinding redirects future native invocations
/// without touching native state. Recycling parks the cell on the no-op
/// callback; a stray native call into a recycled-but-not-redispensed slot
/// lands there instead of in freed memory.
pub(crate) struct CallbackProxy {
    target: RwLock<Arc<dyn NativeCallback>>,
}

impl CallbackProxy {
    pub(crate) fn new() -> Self {
        CallbackProxy {
            target: RwLock::new(noop_callback()),
        }
    }

    pub(crate) fn rebind(&self, callback: Arc<dyn NativeCallback>) {
        *self.target.write() = callback;
    }

    pub(crate) fn current(&self) -> Arc<dyn NativeCallback> {
        self.target.read().clone()
    }
}

/// C-ABI entry registered with every trampoline the pool creates.
///
/// # Safety
///
/// `user_data` must point at the [`CallbackProxy`] the trampoline was
/// created with, and that proxy must still be alive. The pool guarantees
/// both for as long as the trampoline itself is alive.
pub(crate) unsafe extern "C" fn proxy_dispatch(
    return_buffer: *mut c_void,
    param_buffer: *mut c_void,
    user_data: *mut c_void,
) {
    let proxy = &*(user_data as *const CallbackProxy);
    // Clone the target out so the proxy can be rebound mid-invocation.
    let callback = proxy.current();
    callback.invoke(&CallFrame::new(return_buffer, param_buffer));
}
