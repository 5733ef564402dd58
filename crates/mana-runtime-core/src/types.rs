//! Strong type definitions for the mana runtime.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Native token balance.
pub type Balance = u64;

/// Prepaid computation budget.
pub type Mana = u64;

/// Per-originator replay guard.
pub type Nonce = u64;

/// Maximum length of an account identifier, in bytes.
pub const MAX_ACCOUNT_ID_LEN: usize = 64;

/// Output slot of the settlement (ManaAccounting) receipt of an execution.
pub const SETTLEMENT_SLOT: u32 = 0;

/// Output slot of the CallbackResult receipt of an execution.
pub const CALLBACK_SLOT: u32 = 1;

/// Output slot of the Refund receipt of a failed execution.
pub const REFUND_SLOT: u32 = 2;

/// First output slot used by calls a contract emits.
pub const FIRST_CALL_SLOT: u32 = 8;

/// A human-readable account (or contract) identifier.
///
/// Contracts live on accounts, so the same type names both.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account id. No validation is performed here; see
    /// [`AccountId::is_valid`].
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Non-empty and no longer than [`MAX_ACCOUNT_ID_LEN`].
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0.len() <= MAX_ACCOUNT_ID_LEN
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A 32-byte receipt identifier, computed as Blake3(canonical_bytes(receipt)).
///
/// Two receipts with the same content have the same ReceiptId.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReceiptId(pub [u8; 32]);

impl ReceiptId {
    /// Create a new ReceiptId from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash arbitrary bytes into a receipt id.
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self(decode_hex32(s)?))
    }

    /// The zero receipt ID (used as a sentinel).
    pub const ZERO: Self = Self([0u8; 32]);
}

impl fmt::Debug for ReceiptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReceiptId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for ReceiptId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for ReceiptId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for ReceiptId {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into()?;
        Ok(Self(arr))
    }
}

/// Opaque correlation token linking a deferred call to the site awaiting it.
///
/// Derived from Blake3(domain || parent receipt id || index), so replaying
/// the parent regenerates the same id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallbackId(pub [u8; 32]);

impl CallbackId {
    /// Derive the id of the `index`-th callback registered while processing `parent`.
    pub fn derive(parent: &ReceiptId, index: u32) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"mana-callback-v0:");
        hasher.update(&parent.0);
        hasher.update(&index.to_be_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self(decode_hex32(s)?))
    }
}

impl fmt::Debug for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallbackId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for CallbackId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for CallbackId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Derive the nonce of a receipt the runtime emits while processing `parent`.
///
/// Each output of one execution uses a distinct `slot`. The derivation is
/// deterministic, so re-processing a parent produces byte-identical children
/// which the nonce guard then drops.
pub fn derive_nonce(parent: &ReceiptId, slot: u32) -> Nonce {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"mana-nonce-v0:");
    hasher.update(&parent.0);
    hasher.update(&slot.to_be_bytes());
    let hash = hasher.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_be_bytes(first)
}

fn decode_hex32(s: &str) -> Result<[u8; 32], hex::FromHexError> {
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}
