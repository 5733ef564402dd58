//! Proptest generators for property-based testing.
//!
//! Receipts produced here pass structural validation.

use bytes::Bytes;
use proptest::prelude::*;

use mana_runtime_core::{
    AccessKey, AccountId, AccountingInfo, AsyncCall, CallbackId, CallbackInfo, CallbackResult,
    ManaAccounting, ReceiptBody, ReceiptTransaction,
};

/// Generate a valid account id.
pub fn account_id() -> impl Strategy<Value = AccountId> {
    "[a-z][a-z0-9_.-]{0,15}".prop_map(AccountId::new)
}

/// Generate a random CallbackId.
pub fn callback_id() -> impl Strategy<Value = CallbackId> {
    any::<[u8; 32]>().prop_map(CallbackId::from_bytes)
}

/// Generate a method name.
pub fn method_name() -> impl Strategy<Value = String> {
    "[a-z_]{1,16}".prop_map(String::from)
}

/// Generate argument bytes of specified max length.
pub fn args(max_len: usize) -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..=max_len).prop_map(Bytes::from)
}

/// Generate an amount that cannot overflow when added to another one.
pub fn budget_part() -> impl Strategy<Value = u64> {
    prop_oneof![0u64..=1_000, 0u64..=u64::MAX / 2]
}

/// Generate an access key that passes validation.
///
/// Contract ids may be empty, which restricts the key to the empty id and
/// must survive encoding as distinct from no restriction.
pub fn access_key() -> impl Strategy<Value = AccessKey> {
    (
        any::<u64>(),
        proptest::option::of(account_id()),
        proptest::option::of(prop_oneof![Just(String::new()), "[a-z]{1,8}".prop_map(String::from)]),
        proptest::option::of(method_name()),
    )
        .prop_map(|(amount, owner, contract, method)| AccessKey {
            amount,
            balance_owner: owner,
            method_name: contract.as_ref().and(method),
            contract_id: contract.map(AccountId::new),
        })
}

/// Generate CallbackInfo addressed to `receiver`.
pub fn callback_info(receiver: AccountId) -> impl Strategy<Value = CallbackInfo> {
    (callback_id(), any::<u32>()).prop_map(move |(id, result_index)| CallbackInfo {
        id,
        result_index,
        receiver: receiver.clone(),
    })
}

fn async_call(originator: AccountId) -> impl Strategy<Value = ReceiptBody> {
    (
        budget_part(),
        budget_part(),
        method_name(),
        args(64),
        proptest::option::of(account_id().prop_flat_map(callback_info)),
        proptest::option::of(account_id()),
    )
        .prop_map(move |(amount, mana, method_name, args, callback, contract)| {
            ReceiptBody::AsyncCall(AsyncCall {
                amount,
                mana,
                method_name,
                args,
                callback,
                accounting_info: AccountingInfo {
                    originator: originator.clone(),
                    contract_id: contract,
                },
            })
        })
}

fn callback_result(receiver: AccountId) -> impl Strategy<Value = ReceiptBody> {
    (callback_info(receiver), proptest::option::of(args(32))).prop_map(|(info, result)| {
        ReceiptBody::CallbackResult(CallbackResult { info, result })
    })
}

fn mana_accounting(receiver: AccountId) -> impl Strategy<Value = ReceiptBody> {
    (budget_part(), budget_part(), proptest::option::of(account_id())).prop_map(
        move |(mana_refund, gas_used, contract)| {
            ReceiptBody::ManaAccounting(ManaAccounting {
                accounting_info: AccountingInfo {
                    originator: receiver.clone(),
                    contract_id: contract,
                },
                mana_refund,
                gas_used,
            })
        },
    )
}

/// Generate a structurally valid receipt of any kind.
pub fn receipt() -> impl Strategy<Value = ReceiptTransaction> {
    (account_id(), account_id(), any::<u64>())
        .prop_flat_map(|(originator, receiver, nonce)| {
            let body = prop_oneof![
                async_call(originator.clone()),
                callback_result(receiver.clone()),
                (1u64..=u64::MAX).prop_map(ReceiptBody::Refund),
                mana_accounting(receiver.clone()),
            ];
            body.prop_map(move |body| {
                ReceiptTransaction::new(originator.clone(), receiver.clone(), nonce, body)
            })
        })
}

/// Parameters for a single metered call to the sample counter.
#[derive(Debug, Clone)]
pub struct CallParams {
    pub amount: u64,
    pub mana: u64,
    /// Mana the call tries to consume with `spend`.
    pub spend: u64,
}

impl Arbitrary for CallParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            0u64..=1_000, // amount
            0u64..=500,   // mana
            0u64..=600,   // spend
        )
            .prop_map(|(amount, mana, spend)| CallParams { amount, mana, spend })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mana_runtime_core::{
        access_key_bytes, canonical_bytes, decode_access_key, decode_receipt, validate_receipt,
    };

    proptest! {
        #[test]
        fn test_generated_receipts_are_valid(receipt in receipt()) {
            prop_assert!(validate_receipt(&receipt).is_ok());
        }

        #[test]
        fn test_generated_keys_are_valid(key in access_key()) {
            prop_assert!(key.validate().is_ok());
        }

        #[test]
        fn test_receipt_roundtrip(receipt in receipt()) {
            let bytes = canonical_bytes(&receipt);
            let decoded = decode_receipt(&bytes).unwrap();

            prop_assert_eq!(&decoded, &receipt);
            prop_assert_eq!(decoded.compute_id(), receipt.compute_id());
        }

        #[test]
        fn test_access_key_roundtrip(key in access_key()) {
            let decoded = decode_access_key(&access_key_bytes(&key)).unwrap();
            prop_assert_eq!(decoded, key);
        }

        #[test]
        fn test_receipt_id_unique_with_different_nonce(
            receipt in receipt(),
            other_nonce in any::<u64>(),
        ) {
            prop_assume!(other_nonce != receipt.nonce);

            let mut other = receipt.clone();
            other.nonce = other_nonce;

            prop_assert_ne!(receipt.compute_id(), other.compute_id());
        }
    }
}
