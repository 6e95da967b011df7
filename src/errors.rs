//! Error types for the fog wallet libraries
//!
//! Every fallible operation in this crate returns [`FogWalletResult`]. The
//! narrower error enums are kept separate so that collaborators and pure
//! functions (coin selection, RNG construction) can be used without pulling
//! in the whole taxonomy, and are lifted into [`FogWalletError`] with `?`.

use thiserror::Error;

/// Result alias used throughout the crate
pub type FogWalletResult<T> = Result<T, FogWalletError>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum FogWalletError {
    /// Malformed key, seed or persisted state bytes
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// The query service answered in a way that violates the protocol
    #[error("Invalid remote response: {0}")]
    InvalidRemoteResponse(String),

    /// Coin selection could not produce a plan
    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    /// Network or attestation failure reported by a collaborator
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// A block range with `end <= start`
    #[error("Invalid block range: [{start}, {end})")]
    InvalidBlockRange { start: u64, end: u64 },

    /// Persistence backend failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// The operation observed a cancellation request between rounds
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration values are inconsistent
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl FogWalletError {
    /// Whether retrying the whole operation may succeed.
    ///
    /// Only transport failures qualify. Protocol violations and local data
    /// errors repeat deterministically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FogWalletError::Service(ServiceError::Network(_))
                | FogWalletError::Service(ServiceError::Timeout)
        )
    }
}

/// Errors raised while decoding keys, seeds or persisted state
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerializationError {
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Bytes do not encode a valid public key")]
    InvalidPublicKey,

    #[error("Bytes are not a canonical scalar")]
    NonCanonicalScalar,

    #[error("Unsupported generator version {0}")]
    UnsupportedVersion(u32),

    #[error("Unsupported store format version {0}")]
    UnsupportedStoreVersion(u8),

    #[error("Encoding failed: {0}")]
    Encoding(String),
}

impl From<std::io::Error> for SerializationError {
    fn from(e: std::io::Error) -> Self {
        SerializationError::Encoding(e.to_string())
    }
}

/// Errors from the versioned crypto box
///
/// During trial decryption these mean "not addressed to this account" and
/// are expected for most inputs.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("Ciphertext is too short")]
    Truncated,

    #[error("Unsupported crypto box version {0}")]
    UnsupportedVersion(u8),

    #[error("Ephemeral key is not a valid curve point")]
    InvalidEphemeralKey,

    #[error("Authentication tag mismatch")]
    AuthenticationFailed,
}

/// Coin selection failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: u128, required: u128 },

    /// Funds exist but need more inputs than one transaction may carry.
    /// Callers should run a merge plan and select again.
    #[error("Outputs are fragmented: {required_inputs} inputs needed, at most {max_inputs} allowed")]
    Fragmented {
        required_inputs: usize,
        max_inputs: usize,
    },

    #[error("Nothing to merge: {candidates} candidate output(s)")]
    NothingToMerge { candidates: usize },
}

/// Failures reported by external collaborators
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Attestation error: {0}")]
    Attestation(String),

    #[error("Request timed out")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_errors_are_retryable() {
        assert!(FogWalletError::from(ServiceError::Timeout).is_retryable());
        assert!(FogWalletError::from(ServiceError::Network("reset".into())).is_retryable());
        assert!(!FogWalletError::from(ServiceError::Attestation("bad quote".into())).is_retryable());
        assert!(!FogWalletError::InvalidRemoteResponse("bad key".into()).is_retryable());
        assert!(!FogWalletError::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = FogWalletError::from(SelectionError::Fragmented {
            required_inputs: 20,
            max_inputs: 16,
        });
        assert_eq!(
            err.to_string(),
            "Selection error: Outputs are fragmented: 20 inputs needed, at most 16 allowed"
        );
        let err = FogWalletError::InvalidBlockRange { start: 5, end: 5 };
        assert_eq!(err.to_string(), "Invalid block range: [5, 5)");
    }
}
