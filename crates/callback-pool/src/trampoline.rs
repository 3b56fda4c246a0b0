//! The consumed interface to the native trampoline allocator
//!
//! A trampoline is a native callable entry point that native code invokes
//! like an ordinary function pointer; invoking it redirects into managed
//! dispatch. Creating one is the expensive operation this crate exists to
//! amortize. The pool consumes the allocator through [`TrampolineBackend`]
//! and never assumes anything about the native representation beyond the
//! opaque handle/address pair returned here.

use std::ffi::c_void;

use crate::signature::CallSignature;

/// Entry point a trampoline forwards native invocations to.
///
/// Invoked by native code through the trampoline with the return buffer
/// address, the parameter buffer address, and the user-data pointer the
/// trampoline was created with.
pub type DispatchFn = unsafe extern "C" fn(
    return_buffer: *mut c_void,
    param_buffer: *mut c_void,
    user_data: *mut c_void,
);

/// Dispatch target to bind into a newly created trampoline
#[derive(Debug, Clone, Copy)]
pub struct DispatchDescriptor {
    /// Function the trampoline must tail into
    pub entry: DispatchFn,
    /// Opaque pointer passed back verbatim on every invocation
    pub user_data: *mut c_void,
}

/// Opaque native handle for one allocated trampoline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrampolineHandle(usize);

impl TrampolineHandle {
    /// Wrap a raw native handle value
    pub fn new(raw: usize) -> Self {
        TrampolineHandle(raw)
    }

    /// Get the raw native handle value
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Address of a trampoline's callable code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeAddress(usize);

impl CodeAddress {
    /// Wrap a raw code address
    pub fn new(raw: usize) -> Self {
        CodeAddress(raw)
    }

    /// The address as an integer
    pub fn as_usize(self) -> usize {
        self.0
    }

    /// The address as a pointer, for handing to native code
    pub fn as_ptr(self) -> *const c_void {
        self.0 as *const c_void
    }
}

/// One freshly allocated trampoline
#[derive(Debug, Clone, Copy)]
pub struct RawTrampoline {
    /// Handle to release the trampoline with
    pub handle: TrampolineHandle,
    /// Address native code calls
    pub code: CodeAddress,
}

/// Native trampoline allocator.
///
/// Implemented over the underlying call-dispatch library (libffi closures,
/// a JIT stub emitter, ...). The pool is the only caller.
pub trait TrampolineBackend: Send + Sync {
    /// Allocate one trampoline for `signature` that forwards invocations to
    /// `dispatch`. Returns `None` when native allocation fails; the pool
    /// reports that to its caller as a resource error and does not retry.
    fn create_trampoline(
        &self,
        signature: &CallSignature,
        dispatch: DispatchDescriptor,
    ) -> Option<RawTrampoline>;

    /// Release a trampoline created by [`create_trampoline`].
    ///
    /// # Safety
    ///
    /// `handle` must have come from `create_trampoline` on this backend.
    /// The pool calls this at most once per handle, and never while it can
    /// still hand the trampoline out.
    ///
    /// [`create_trampoline`]: TrampolineBackend::create_trampoline
    unsafe fn destroy_trampoline(&self, handle: TrampolineHandle);
}
