//! End-to-end settlement scenarios.
//!
//! Each test drives a runtime with the sample contracts through one
//! situation the settlement rules must handle.

use mana_runtime::core::{CallbackInfo, CallbackResult, ManaAccounting};
use mana_runtime::{
    AccessKey, AccountId, CallbackId, ContractError, DropReason, ReceiptBody, ReceiptTransaction,
    RoutingOutcome, RuntimeError,
};
use mana_runtime_testkit::contracts::{encode_u64, COUNT_KEY};
use mana_runtime_testkit::fixtures::TestFixture;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn settlement_of(outcome: &RoutingOutcome) -> ManaAccounting {
    match outcome.emitted().first().map(|r| &r.body) {
        Some(ReceiptBody::ManaAccounting(accounting)) => accounting.clone(),
        other => panic!("expected a settlement first, got {other:?}"),
    }
}

#[tokio::test]
async fn test_key_for_other_contract_is_unauthorized() {
    init_tracing();
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 1_000)]).await.unwrap();

    let alice = AccountId::new("alice");
    fixture
        .runtime
        .set_access_key(&alice, Some(AccessKey::new(500).contract("counter-a")))
        .await
        .unwrap();

    let nonce = fixture.nonce();
    let tx = mana_runtime::CallBuilder::new("alice", "counter", nonce)
        .method("increment")
        .mana(100)
        .build();
    let err = fixture.runtime.submit(tx).await.unwrap_err();

    assert!(matches!(err, RuntimeError::Unauthorized(_)), "got {err:?}");
    assert_eq!(fixture.balance("alice").await.unwrap(), 1_000);
    assert_eq!(fixture.runtime.receipt_status(&alice, nonce).await.unwrap(), None);
    assert_eq!(fixture.runtime.queue_len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unused_mana_is_refunded() {
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 1_000)]).await.unwrap();

    let outcome = fixture
        .call("alice", "counter", "spend", encode_u64(80), 0, 100)
        .await
        .unwrap();

    let accounting = settlement_of(&outcome);
    assert_eq!(accounting.mana_refund, 20);
    assert_eq!(accounting.gas_used, 80);
    assert!(matches!(outcome, RoutingOutcome::Settled { success: true, gas_used: 80, .. }));

    // The whole budget is held until the settlement is reconciled
    assert_eq!(fixture.balance("alice").await.unwrap(), 900);
    fixture.settle().await.unwrap();
    assert_eq!(fixture.balance("alice").await.unwrap(), 920);
}

#[tokio::test]
async fn test_unknown_callback_changes_nothing() {
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 1_000), ("fanout", 1_000)]).await.unwrap();

    let result = ReceiptTransaction::new(
        AccountId::new("counter"),
        AccountId::new("fanout"),
        fixture.nonce(),
        ReceiptBody::CallbackResult(CallbackResult {
            info: CallbackInfo {
                id: CallbackId::from_bytes([9; 32]),
                result_index: 0,
                receiver: AccountId::new("fanout"),
            },
            result: Some(encode_u64(1)),
        }),
    );
    let (originator, nonce) = (result.originator.clone(), result.nonce);
    fixture.runtime.deliver(result).await.unwrap();

    let report = fixture.settle().await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(report.processed, 0);

    assert_eq!(fixture.runtime.receipt_status(&originator, nonce).await.unwrap(), None);
    assert_eq!(fixture.total(&["alice", "fanout"]).await.unwrap(), 2_000);
    assert_eq!(fixture.runtime.queue_len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_duplicate_nonce_is_dropped() {
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 1_000)]).await.unwrap();
    let nonce = fixture.nonce();

    let first = mana_runtime::CallBuilder::new("alice", "counter", nonce)
        .method("increment")
        .mana(100)
        .build();
    fixture.runtime.submit(first).await.unwrap();
    let balance = fixture.balance("alice").await.unwrap();

    // Same originator and nonce, different content
    let second = mana_runtime::CallBuilder::new("alice", "counter", nonce)
        .method("increment")
        .mana(300)
        .build();
    let outcome = fixture.runtime.submit(second).await.unwrap();

    assert_eq!(outcome, RoutingOutcome::Dropped(DropReason::DuplicateNonce));
    assert_eq!(fixture.balance("alice").await.unwrap(), balance);
    assert_eq!(
        fixture
            .runtime
            .storage(&AccountId::new("counter"), COUNT_KEY)
            .await
            .unwrap(),
        Some(1u64.to_le_bytes().to_vec())
    );
}

#[tokio::test]
async fn test_trap_rolls_back_but_charges() {
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 1_000)]).await.unwrap();

    let outcome = fixture
        .call("alice", "counter", "burn", encode_u64(40), 0, 100)
        .await
        .unwrap();

    let accounting = settlement_of(&outcome);
    assert_eq!(accounting.mana_refund, 0);
    assert_eq!(accounting.gas_used, 40);
    match &outcome {
        RoutingOutcome::Settled {
            success, failure, ..
        } => {
            assert!(!success);
            assert_eq!(failure, &Some(ContractError::Trap("burned".into())));
        }
        other => panic!("expected settlement, got {other:?}"),
    }

    // The counter write was discarded
    assert_eq!(
        fixture
            .runtime
            .storage(&AccountId::new("counter"), COUNT_KEY)
            .await
            .unwrap(),
        None
    );

    // The unconsumed 60 come back through a refund
    let refund = outcome
        .emitted()
        .iter()
        .find_map(|r| match r.body {
            ReceiptBody::Refund(amount) => Some(amount),
            _ => None,
        })
        .unwrap();
    assert_eq!(refund, 60);

    fixture.settle().await.unwrap();
    assert_eq!(fixture.balance("alice").await.unwrap(), 960);
}

#[tokio::test]
async fn test_exhaustion_is_charged_in_full() {
    let fixture = TestFixture::with_config(Default::default());
    fixture.fund(&[("alice", 1_000)]).await.unwrap();

    let outcome = fixture
        .call("alice", "counter", "exhaust", &b""[..], 25, 30)
        .await
        .unwrap();

    match &outcome {
        RoutingOutcome::Settled {
            success,
            gas_used,
            failure,
            ..
        } => {
            assert!(!success);
            assert_eq!(*gas_used, 30);
            assert_eq!(failure, &Some(ContractError::ManaExhausted { limit: 30 }));
        }
        other => panic!("expected settlement, got {other:?}"),
    }

    // The attached amount returns; the mana is gone
    fixture.settle().await.unwrap();
    assert_eq!(fixture.balance("alice").await.unwrap(), 970);
    assert_eq!(fixture.balance("counter").await.unwrap(), 0);
}

#[tokio::test]
async fn test_delegated_key_charges_owner() {
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 0), ("sponsor", 500)]).await.unwrap();
    fixture
        .runtime
        .set_access_key(
            &AccountId::new("alice"),
            Some(AccessKey::new(0).balance_owner("sponsor").contract("counter")),
        )
        .await
        .unwrap();

    fixture
        .call("alice", "counter", "spend", encode_u64(10), 0, 50)
        .await
        .unwrap();
    assert_eq!(fixture.balance("sponsor").await.unwrap(), 450);

    fixture.settle().await.unwrap();
    assert_eq!(fixture.balance("sponsor").await.unwrap(), 490);
    assert_eq!(fixture.balance("alice").await.unwrap(), 0);

    // Beyond the owner's balance
    let err = fixture
        .call("alice", "counter", "spend", encode_u64(0), 0, 1_000)
        .await
        .unwrap_err();
    let err = err.downcast::<RuntimeError>().unwrap();
    assert!(matches!(
        err,
        RuntimeError::InsufficientBalance {
            requested: 1_000,
            available: 490,
            ..
        }
    ));
}
