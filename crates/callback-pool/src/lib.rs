//! Pooled native callback trampolines
//!
//! This crate exposes managed callback objects to native code that expects
//! plain function-pointer callbacks. Native trampolines are expensive to
//! create (they require allocating native state and registering it with the
//! underlying call-dispatch library), so they are pooled per call signature
//! and reused:
//! - **Registry**: one pool per call signature, created lazily (`registry`)
//! - **Pool**: dispenses slots out of fixed-capacity magazines (`pool`)
//! - **Handle**: the caller-visible wrapper whose lifetime drives
//!   reclamation (`handle`)
//! - **Backend**: the narrow interface to the native trampoline allocator
//!   (`trampoline`)
//!
//! Reclamation is reachability-driven rather than reference-counted by the
//! caller: every handle dispensed during one magazine's active span shares a
//! single holder, and when the last of those handles is dropped the holder's
//! drop recycles the whole magazine back into its pool. Abandoning a pool
//! entirely releases its trampolines through slot drop glue, so no explicit
//! release call is ever required.
//!
//! # Example
//!
//! ```rust,ignore
//! use callback_pool::{CallSignature, CallingConvention, NativeType, PoolRegistry};
//!
//! let registry = PoolRegistry::new(backend);
//! let signature = CallSignature::new(
//!     NativeType::SInt32,
//!     vec![NativeType::Pointer, NativeType::SInt32],
//!     CallingConvention::Default,
//!     false,
//! );
//! let pool = registry.get_or_create_pool(&signature);
//! let handle = pool.dispense(callback)?;
//! hand_to_native(handle.code_address().as_ptr());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Callback trait, call frame, and the dispatch entry native code reaches
pub mod callback;

/// Error types for pool operations
pub mod error;

/// Caller-visible handle around a dispensed slot
pub mod handle;

/// Pool, holder lists, and the dispense/recycle state machine
pub mod pool;

/// Signature-keyed pool registry and configuration
pub mod registry;

/// Call signatures: the identity key for pooling
pub mod signature;

/// The consumed interface to the native trampoline allocator
pub mod trampoline;

mod magazine;

pub use callback::{CallFrame, NativeCallback};
pub use error::PoolError;
pub use handle::CallbackHandle;
pub use pool::CallbackPool;
pub use registry::{PoolConfig, PoolRegistry};
pub use signature::{CallSignature, CallingConvention, NativeType, SignatureId};
pub use trampoline::{
    CodeAddress, DispatchDescriptor, DispatchFn, RawTrampoline, TrampolineBackend,
    TrampolineHandle,
};
