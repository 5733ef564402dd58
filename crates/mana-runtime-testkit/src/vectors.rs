//! Golden test vectors for deterministic verification.
//!
//! These vectors pin the canonical wire encoding. Any change to field
//! numbers, map ordering, or the absent-versus-empty rule breaks them.

use bytes::Bytes;

use mana_runtime_core::{
    access_key_bytes, canonical_bytes, AccessKey, AccountId, AccountingInfo, CallBuilder,
    CallbackId, CallbackInfo, CallbackResult, ManaAccounting, ReceiptBody, ReceiptTransaction,
};

/// A message covered by a vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VectorMessage {
    Receipt(ReceiptTransaction),
    AccessKey(AccessKey),
}

impl VectorMessage {
    /// Canonical bytes of the message.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Receipt(receipt) => canonical_bytes(receipt),
            Self::AccessKey(key) => access_key_bytes(key),
        }
    }
}

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub message: VectorMessage,
    /// Expected canonical encoding (hex).
    pub expected_hex: &'static str,
}

fn callback_info() -> CallbackInfo {
    CallbackInfo {
        id: CallbackId::from_bytes([0x11; 32]),
        result_index: 0,
        receiver: AccountId::new("fanout"),
    }
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "Unrestricted access key",
            message: VectorMessage::AccessKey(AccessKey::new(100)),
            expected_hex: "a1011864",
        },
        GoldenVector {
            name: "Access key restricted to the empty contract id",
            message: VectorMessage::AccessKey(AccessKey::new(100).contract("")),
            expected_hex: "a20118640360",
        },
        GoldenVector {
            name: "Fully restricted delegated access key",
            message: VectorMessage::AccessKey(
                AccessKey::new(1000)
                    .balance_owner("sponsor")
                    .contract("counter")
                    .method("increment"),
            ),
            expected_hex: "a4011903e8026773706f6e736f720367636f756e7465720469696e6372656d656e74",
        },
        GoldenVector {
            name: "AsyncCall with empty args",
            message: VectorMessage::Receipt(
                CallBuilder::new("alice", "counter", 1)
                    .method("increment")
                    .mana(100)
                    .build(),
            ),
            expected_hex: "a40165616c6963650267636f756e746572030104a501000218640369696e6372656d656e74044006a20165616c6963650267636f756e746572",
        },
        GoldenVector {
            name: "CallbackResult with absent result",
            message: VectorMessage::Receipt(ReceiptTransaction::new(
                AccountId::new("counter"),
                AccountId::new("fanout"),
                2,
                ReceiptBody::CallbackResult(CallbackResult {
                    info: callback_info(),
                    result: None,
                }),
            )),
            expected_hex: "a40167636f756e746572026666616e6f7574030205a101a301582011111111111111111111111111111111111111111111111111111111111111110200036666616e6f7574",
        },
        GoldenVector {
            name: "CallbackResult with empty result",
            message: VectorMessage::Receipt(ReceiptTransaction::new(
                AccountId::new("counter"),
                AccountId::new("fanout"),
                2,
                ReceiptBody::CallbackResult(CallbackResult {
                    info: callback_info(),
                    result: Some(Bytes::new()),
                }),
            )),
            expected_hex: "a40167636f756e746572026666616e6f7574030205a201a301582011111111111111111111111111111111111111111111111111111111111111110200036666616e6f75740240",
        },
        GoldenVector {
            name: "Refund",
            message: VectorMessage::Receipt(ReceiptTransaction::new(
                AccountId::new("alice"),
                AccountId::new("bob"),
                7,
                ReceiptBody::Refund(50),
            )),
            expected_hex: "a40165616c6963650263626f620307061832",
        },
        GoldenVector {
            name: "ManaAccounting",
            message: VectorMessage::Receipt(ReceiptTransaction::new(
                AccountId::new("counter"),
                AccountId::new("alice"),
                3,
                ReceiptBody::ManaAccounting(ManaAccounting {
                    accounting_info: AccountingInfo {
                        originator: AccountId::new("alice"),
                        contract_id: Some(AccountId::new("counter")),
                    },
                    mana_refund: 20,
                    gas_used: 80,
                }),
            )),
            expected_hex: "a40167636f756e7465720265616c696365030307a301a20165616c6963650267636f756e7465720214031850",
        },
    ]
}

/// Verify all golden vectors against the current encoder.
///
/// Returns `(name, matches, actual_hex)` per vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let hex = hex::encode(v.message.encode());
            (v.name.to_string(), hex == v.expected_hex, hex)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mana_runtime_core::{decode_access_key, decode_receipt};

    #[test]
    fn test_vectors_match() {
        for (name, matches, hex) in verify_all_vectors() {
            assert!(matches, "Vector '{}' encoded as {}", name, hex);
        }
    }

    #[test]
    fn test_vectors_decode_to_their_message() {
        for vector in all_vectors() {
            let bytes = hex::decode(vector.expected_hex).unwrap();
            let decoded = match &vector.message {
                VectorMessage::Receipt(_) => VectorMessage::Receipt(decode_receipt(&bytes).unwrap()),
                VectorMessage::AccessKey(_) => {
                    VectorMessage::AccessKey(decode_access_key(&bytes).unwrap())
                }
            };
            assert_eq!(decoded, vector.message, "Vector '{}'", vector.name);
        }
    }

    #[test]
    fn test_absent_and_empty_differ() {
        let vectors = all_vectors();
        let absent = vectors
            .iter()
            .find(|v| v.name == "CallbackResult with absent result")
            .unwrap();
        let empty = vectors
            .iter()
            .find(|v| v.name == "CallbackResult with empty result")
            .unwrap();

        assert_ne!(absent.expected_hex, empty.expected_hex);
        assert_ne!(
            absent.message.encode(),
            empty.message.encode(),
        );
    }
}
