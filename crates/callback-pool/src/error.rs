//! Error types for pool operations

use thiserror::Error;

use crate::signature::SignatureId;

/// Errors that can occur while dispensing or disposing pooled callbacks
#[derive(Debug, Error)]
pub enum PoolError {
    /// The native backend could not allocate a trampoline (out of native
    /// memory or closure slots). Surfaces synchronously from `dispense`.
    #[error("native trampoline allocation failed for signature {signature}")]
    TrampolineExhausted {
        /// Signature the allocation was requested for
        signature: SignatureId,
    },

    /// `dispose` was called a second time on the same handle
    #[error("callback handle already disposed")]
    AlreadyDisposed,
}
