use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{FogWalletError, FogWalletResult, SerializationError};

macro_rules! hex_bytes_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
            BorshSerialize,
            BorshDeserialize,
        )]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }
    };
}

hex_bytes_newtype!(
    /// Globally unique public key of an output
    OutputPublicKey
);

hex_bytes_newtype!(
    /// Double-spend tag observed on the ledger when an output is spent
    KeyImage
);

/// Output status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStatus {
    Unspent = 0,
    Spent = 1,
}

impl From<OutputStatus> for u32 {
    fn from(status: OutputStatus) -> Self {
        status as u32
    }
}

/// Where and when an output was spent
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct SpentInfo {
    pub position: u64,
    pub time: u64,
}

/// Decrypted payload of a search result or ledger record
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct OutputPayload {
    pub public_key: OutputPublicKey,
    pub token_id: u64,
    pub value: u64,
    pub key_image: Option<KeyImage>,
    pub received_position: u64,
    pub received_time: u64,
    pub subaddress_index: u64,
}

impl OutputPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        Ok(borsh::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        Ok(Self::try_from_slice(bytes)?)
    }
}

/// An output discovered to belong to the account
///
/// Identity is the public key. Value and token are fixed at construction;
/// the only later mutation is [`OwnedOutput::mark_spent`].
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct OwnedOutput {
    public_key: OutputPublicKey,
    token_id: u64,
    value: u64,
    key_image: Option<KeyImage>,
    received_position: u64,
    received_time: u64,
    spent: Option<SpentInfo>,
    subaddress_index: u64,
}

impl OwnedOutput {
    pub fn from_payload(payload: OutputPayload) -> Self {
        Self {
            public_key: payload.public_key,
            token_id: payload.token_id,
            value: payload.value,
            key_image: payload.key_image,
            received_position: payload.received_position,
            received_time: payload.received_time,
            spent: None,
            subaddress_index: payload.subaddress_index,
        }
    }

    /// Parse a decrypted plaintext
    pub fn from_plaintext(plaintext: &[u8]) -> Result<Self, SerializationError> {
        OutputPayload::from_bytes(plaintext).map(Self::from_payload)
    }

    pub fn public_key(&self) -> &OutputPublicKey {
        &self.public_key
    }

    pub fn token_id(&self) -> u64 {
        self.token_id
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn key_image(&self) -> Option<&KeyImage> {
        self.key_image.as_ref()
    }

    pub fn received_position(&self) -> u64 {
        self.received_position
    }

    pub fn received_time(&self) -> u64 {
        self.received_time
    }

    pub fn subaddress_index(&self) -> u64 {
        self.subaddress_index
    }

    pub fn spent(&self) -> Option<&SpentInfo> {
        self.spent.as_ref()
    }

    pub fn status(&self) -> OutputStatus {
        if self.spent.is_some() {
            OutputStatus::Spent
        } else {
            OutputStatus::Unspent
        }
    }

    pub fn is_spent(&self) -> bool {
        self.spent.is_some()
    }

    /// Record the spend. Returns `false` when the output was already spent.
    pub fn mark_spent(&mut self, position: u64, time: u64) -> FogWalletResult<bool> {
        if position < self.received_position {
            return Err(FogWalletError::InvalidRemoteResponse(format!(
                "output {} spent at {position} before it was received at {}",
                self.public_key, self.received_position
            )));
        }
        if self.spent.is_some() {
            return Ok(false);
        }
        self.spent = Some(SpentInfo { position, time });
        Ok(true)
    }
}
