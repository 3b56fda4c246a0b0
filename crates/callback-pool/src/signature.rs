//! Call signatures: the identity key for pooling
//!
//! A [`CallSignature`] names a native function shape — return type,
//! parameter types, calling convention, and whether errno must be captured
//! after the call. The pool layer treats it as an opaque identity: equality
//! and hashing go through a process-unique [`SignatureId`], never through
//! the type lists, so two structurally identical signatures still get
//! independent pools. Type layout and marshaling are out of scope here;
//! the backend consumes the shape when it builds a trampoline.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a call signature
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SignatureId(u64);

static NEXT_SIGNATURE_ID: AtomicU64 = AtomicU64::new(1);

impl SignatureId {
    /// Generate a new unique SignatureId
    pub fn new() -> Self {
        SignatureId(NEXT_SIGNATURE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for SignatureId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SignatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Native value shape of one parameter or return slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum NativeType {
    Void,
    SInt8,
    UInt8,
    SInt16,
    UInt16,
    SInt32,
    UInt32,
    SInt64,
    UInt64,
    Float,
    Double,
    Pointer,
}

/// Calling convention a trampoline is created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallingConvention {
    /// The platform's default C convention
    #[default]
    Default,
    /// Windows stdcall
    Stdcall,
}

/// Identity of a native function shape.
///
/// Immutable once published. Shared as `Arc<CallSignature>` across every
/// pool, magazine, and slot derived from it; the registry references it
/// only weakly and never extends its lifetime beyond what the caller holds.
#[derive(Debug)]
pub struct CallSignature {
    id: SignatureId,
    return_type: NativeType,
    param_types: Vec<NativeType>,
    convention: CallingConvention,
    save_errno: bool,
}

impl CallSignature {
    /// Create a new signature with a fresh identity
    pub fn new(
        return_type: NativeType,
        param_types: Vec<NativeType>,
        convention: CallingConvention,
        save_errno: bool,
    ) -> Arc<Self> {
        Arc::new(CallSignature {
            id: SignatureId::new(),
            return_type,
            param_types,
            convention,
            save_errno,
        })
    }

    /// The signature's unique identity
    pub fn id(&self) -> SignatureId {
        self.id
    }

    /// Return type of the native function shape
    pub fn return_type(&self) -> NativeType {
        self.return_type
    }

    /// Parameter types of the native function shape
    pub fn param_types(&self) -> &[NativeType] {
        &self.param_types
    }

    /// Calling convention trampolines must be created with
    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    /// Whether errno must be captured immediately after native calls
    pub fn save_errno(&self) -> bool {
        self.save_errno
    }
}

impl PartialEq for CallSignature {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CallSignature {}

impl std::hash::Hash for CallSignature {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
