//! Exactly-once delivery, fan-in callbacks, conservation, persistence and
//! the background worker.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use proptest::prelude::*;

use mana_runtime::core::{AccountingInfo, CallbackInfo, CallbackResult, ManaAccounting};
use mana_runtime::store::{MemoryStore, ReceiptStatus, Store};
use mana_runtime::{
    AccountId, CallBuilder, CallContext, CallbackId, Contract, ContractError, HostResult,
    ReceiptBody, ReceiptKind, ReceiptTransaction, RoutingOutcome, RuntimeError,
};
use mana_runtime_testkit::contracts::{
    decode_u64, encode_u64, sample_registry, COUNT_KEY, TOTAL_KEY,
};
use mana_runtime_testkit::fixtures::{shuffled, zero_cost_config, TestFixture};
use mana_runtime_testkit::generators::CallParams;

fn receipt_id(outcome: &RoutingOutcome) -> mana_runtime::ReceiptId {
    match outcome {
        RoutingOutcome::Settled { receipt_id, .. } => *receipt_id,
        other => panic!("expected settlement, got {other:?}"),
    }
}

async fn stored_u64(fixture: &TestFixture, account: &str, key: &[u8]) -> Option<u64> {
    fixture
        .runtime
        .storage(&AccountId::new(account), key)
        .await
        .unwrap()
        .as_deref()
        .and_then(decode_u64)
}

/// Take every queued receipt of `kind` off the queue.
async fn hold_back(fixture: &TestFixture, kind: ReceiptKind) -> Vec<ReceiptTransaction> {
    let store = fixture.runtime.store();
    let mut held = Vec::new();
    for entry in store.queued(usize::MAX).await.unwrap() {
        if entry.receipt.kind() == kind {
            store.remove_queued(entry.seq).await.unwrap();
            held.push(entry.receipt);
        }
    }
    held
}

// =============================================================================
// EXACTLY-ONCE
// =============================================================================

#[tokio::test]
async fn test_replayed_delivery_processes_once() {
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 1_000)]).await.unwrap();

    let tx = CallBuilder::new("alice", "counter", fixture.nonce())
        .method("increment")
        .mana(100)
        .build();
    fixture.runtime.deliver(tx.clone()).await.unwrap();
    fixture.runtime.deliver(tx.clone()).await.unwrap();

    let report = fixture.settle().await.unwrap();

    // The call and its settlement; the replay is dropped
    assert_eq!(report.processed, 2);
    assert_eq!(report.dropped, 1);
    assert_eq!(stored_u64(&fixture, "counter", COUNT_KEY).await, Some(1));
    assert_eq!(fixture.balance("alice").await.unwrap(), 1_000);
    assert_eq!(
        fixture.runtime.receipt_status(&tx.originator, tx.nonce).await.unwrap(),
        Some(ReceiptStatus::Settled { success: true })
    );
}

#[tokio::test]
async fn test_replayed_settlement_is_dropped() {
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 1_000)]).await.unwrap();

    let outcome = fixture
        .call("alice", "counter", "spend", encode_u64(30), 0, 100)
        .await
        .unwrap();
    let settlement = outcome.emitted()[0].clone();
    assert_eq!(settlement.kind(), ReceiptKind::ManaAccounting);

    fixture.settle().await.unwrap();
    assert_eq!(fixture.balance("alice").await.unwrap(), 970);

    fixture.runtime.deliver(settlement.clone()).await.unwrap();
    let report = fixture.settle().await.unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(fixture.balance("alice").await.unwrap(), 970);
    assert_eq!(
        fixture
            .runtime
            .receipt_status(&settlement.originator, settlement.nonce)
            .await
            .unwrap(),
        Some(ReceiptStatus::Reconciled)
    );
}

#[tokio::test]
async fn test_concurrent_calls_serialize_on_receiver() {
    let fixture = TestFixture::new();
    let callers: Vec<String> = (0..16).map(|i| format!("user{i}")).collect();
    for caller in &callers {
        fixture.fund(&[(caller.as_str(), 100)]).await.unwrap();
    }

    let mut tasks = Vec::new();
    for caller in &callers {
        let runtime = fixture.runtime.clone();
        let tx = CallBuilder::new(caller.as_str(), "counter", 1)
            .method("increment")
            .mana(10)
            .build();
        tasks.push(tokio::spawn(async move { runtime.submit(tx).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(stored_u64(&fixture, "counter", COUNT_KEY).await, Some(16));
}

// =============================================================================
// FAN-IN CALLBACKS
// =============================================================================

#[tokio::test]
async fn test_fan_in_resumes_once_with_all_results() {
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 1_000), ("fanout", 1_000)]).await.unwrap();

    let outcome = fixture
        .call("alice", "fanout", "fan_out", &b"counter-a,counter-b"[..], 0, 10)
        .await
        .unwrap();
    let callback = CallbackId::derive(&receipt_id(&outcome), 0);

    let pending = fixture.runtime.pending_callback(&callback).await.unwrap().unwrap();
    assert_eq!(pending.expected, 2);
    assert_eq!(pending.receiver, AccountId::new("fanout"));

    let report = fixture.settle().await.unwrap();
    assert_eq!(report.rejected + report.quarantined, 0);

    assert_eq!(stored_u64(&fixture, "fanout", TOTAL_KEY).await, Some(2));
    assert!(fixture.runtime.pending_callback(&callback).await.unwrap().is_none());

    // Every budget was refunded in full
    assert_eq!(fixture.balance("alice").await.unwrap(), 1_000);
    assert_eq!(fixture.balance("fanout").await.unwrap(), 1_000);
}

#[tokio::test]
async fn test_fan_in_is_independent_of_arrival_order() {
    for seed in 0..4 {
        let fixture = TestFixture::new();
        fixture.fund(&[("alice", 1_000), ("fanout", 1_000)]).await.unwrap();

        let outcome = fixture
            .call("alice", "fanout", "fan_out", &b"counter,counter-a,counter-b"[..], 0, 10)
            .await
            .unwrap();
        assert_eq!(outcome.emitted().len(), 4);

        // Release the children one at a time in a shuffled order
        let calls = hold_back(&fixture, ReceiptKind::AsyncCall).await;
        assert_eq!(calls.len(), 3);
        fixture.settle().await.unwrap();

        for call in shuffled(calls, seed) {
            fixture.runtime.deliver(call).await.unwrap();
            let report = fixture.settle().await.unwrap();
            assert_eq!(report.rejected + report.quarantined, 0, "seed {seed}");
        }

        assert_eq!(stored_u64(&fixture, "fanout", TOTAL_KEY).await, Some(3), "seed {seed}");
        assert_eq!(fixture.balance("fanout").await.unwrap(), 1_000, "seed {seed}");
    }
}

#[tokio::test]
async fn test_filled_slot_keeps_first_result() {
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 1_000), ("fanout", 1_000)]).await.unwrap();

    let outcome = fixture
        .call("alice", "fanout", "fan_out", &b"counter-a,counter-b"[..], 0, 10)
        .await
        .unwrap();
    let callback = CallbackId::derive(&receipt_id(&outcome), 0);

    // A result for slot 0 arrives before the real one
    let early = ReceiptTransaction::new(
        AccountId::new("counter-a"),
        AccountId::new("fanout"),
        fixture.nonce(),
        ReceiptBody::CallbackResult(CallbackResult {
            info: CallbackInfo {
                id: callback,
                result_index: 0,
                receiver: AccountId::new("fanout"),
            },
            result: Some(encode_u64(7)),
        }),
    );
    let outcome = fixture.runtime.submit(early.clone()).await;
    assert!(outcome.is_err(), "callback results are generated by the runtime");
    fixture.runtime.deliver(early).await.unwrap();

    let report = fixture.settle().await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(stored_u64(&fixture, "fanout", TOTAL_KEY).await, Some(8));
}

#[tokio::test]
async fn test_unused_callback_is_released() {
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 1_000), ("fanout", 1_000)]).await.unwrap();

    let outcome = fixture
        .call("alice", "fanout", "reserve", &b""[..], 0, 10)
        .await
        .unwrap();
    let callback = CallbackId::derive(&receipt_id(&outcome), 0);

    assert!(fixture.runtime.pending_callback(&callback).await.unwrap().is_none());
    assert_eq!(fixture.balance("fanout").await.unwrap(), 1_000);
}

// =============================================================================
// FAILURES OFF THE SUBMIT PATH
// =============================================================================

#[tokio::test]
async fn test_overrun_is_quarantined() {
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 1_000)]).await.unwrap();

    // A settlement no call was granted for
    let forged = ReceiptTransaction::new(
        AccountId::new("counter"),
        AccountId::new("alice"),
        fixture.nonce(),
        ReceiptBody::ManaAccounting(ManaAccounting {
            accounting_info: AccountingInfo {
                originator: AccountId::new("alice"),
                contract_id: Some(AccountId::new("counter")),
            },
            mana_refund: 500,
            gas_used: 0,
        }),
    );
    fixture.runtime.deliver(forged.clone()).await.unwrap();

    let report = fixture.settle().await.unwrap();
    assert_eq!(report.quarantined, 1);
    assert_eq!(fixture.balance("alice").await.unwrap(), 1_000);

    let quarantined = fixture.runtime.quarantined().await.unwrap();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0].receipt, forged);
    assert!(quarantined[0].reason.contains("mana overrun"));
}

#[tokio::test]
async fn test_queued_call_from_unknown_account_is_rejected() {
    let fixture = TestFixture::new();

    let tx = CallBuilder::new("ghost", "counter", 1)
        .method("increment")
        .mana(10)
        .build();
    fixture.runtime.deliver(tx).await.unwrap();

    let report = fixture.settle().await.unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(fixture.runtime.queue_len().await.unwrap(), 0);
    assert_eq!(
        fixture.runtime.receipt_status(&AccountId::new("ghost"), 1).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_forged_call_cannot_take_emitted_grant() {
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 1_000), ("fanout", 1_000)]).await.unwrap();

    let outcome = fixture
        .call("alice", "fanout", "fan_out", &b"counter-a"[..], 0, 10)
        .await
        .unwrap();
    let callback = CallbackId::derive(&receipt_id(&outcome), 0);
    let child = outcome
        .emitted()
        .iter()
        .find(|r| r.kind() == ReceiptKind::AsyncCall)
        .cloned()
        .unwrap();

    // Reuses the child's (originator, nonce) with different content
    let forged = CallBuilder::new("fanout", "counter-a", child.nonce)
        .method("increment")
        .mana(20)
        .build();
    let err = fixture.runtime.submit(forged.clone()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::GrantMismatch { .. }), "got {err:?}");

    // The genuine child is not accepted outside the queue either
    let err = fixture.runtime.submit(child.clone()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::GrantMismatch { .. }), "got {err:?}");

    // Queued ahead of the genuine child in the same lane
    hold_back(&fixture, ReceiptKind::AsyncCall).await;
    fixture.runtime.deliver(forged).await.unwrap();
    fixture.runtime.deliver(child).await.unwrap();

    let report = fixture.settle().await.unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(report.quarantined, 0);

    assert_eq!(stored_u64(&fixture, "counter-a", COUNT_KEY).await, Some(1));
    assert_eq!(stored_u64(&fixture, "fanout", TOTAL_KEY).await, Some(1));
    assert!(fixture.runtime.pending_callback(&callback).await.unwrap().is_none());
    assert_eq!(fixture.balance("fanout").await.unwrap(), 1_000);
    assert_eq!(fixture.balance("alice").await.unwrap(), 1_000);
}

#[tokio::test]
async fn test_forged_settlement_cannot_redirect_refund() {
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 1_000)]).await.unwrap();

    let outcome = fixture
        .call("alice", "counter", "spend", encode_u64(30), 0, 100)
        .await
        .unwrap();
    let settlement = outcome.emitted()[0].clone();

    // An AsyncCall aimed at the settlement's grant
    let takeover = CallBuilder::new("counter", "alice", settlement.nonce)
        .method("increment")
        .mana(100)
        .build();
    let err = fixture.runtime.submit(takeover).await.unwrap_err();
    assert!(matches!(err, RuntimeError::GrantMismatch { .. }), "got {err:?}");

    // A settlement claiming the whole budget back, queued first
    let forged = ReceiptTransaction::new(
        settlement.originator.clone(),
        settlement.receiver.clone(),
        settlement.nonce,
        ReceiptBody::ManaAccounting(ManaAccounting {
            accounting_info: AccountingInfo {
                originator: AccountId::new("alice"),
                contract_id: Some(AccountId::new("counter")),
            },
            mana_refund: 100,
            gas_used: 0,
        }),
    );
    hold_back(&fixture, ReceiptKind::ManaAccounting).await;
    fixture.runtime.deliver(forged.clone()).await.unwrap();
    fixture.runtime.deliver(settlement.clone()).await.unwrap();

    let report = fixture.settle().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.quarantined, 1);

    assert_eq!(fixture.balance("alice").await.unwrap(), 970);
    assert_eq!(fixture.runtime.quarantined().await.unwrap()[0].receipt, forged);
    assert_eq!(
        fixture
            .runtime
            .receipt_status(&settlement.originator, settlement.nonce)
            .await
            .unwrap(),
        Some(ReceiptStatus::Reconciled)
    );
}

#[tokio::test]
async fn test_overflowing_refund_is_quarantined() {
    let fixture = TestFixture::new();
    fixture.fund(&[("whale", u64::MAX)]).await.unwrap();

    let refund = ReceiptTransaction::new(
        AccountId::new("counter"),
        AccountId::new("whale"),
        fixture.nonce(),
        ReceiptBody::Refund(10),
    );
    fixture.runtime.deliver(refund.clone()).await.unwrap();

    let report = fixture.settle().await.unwrap();
    assert_eq!(report.quarantined, 1);
    assert_eq!(report.rejected, 0);
    assert_eq!(fixture.balance("whale").await.unwrap(), u64::MAX);

    let quarantined = fixture.runtime.quarantined().await.unwrap();
    assert_eq!(quarantined[0].receipt, refund);
    assert!(quarantined[0].reason.contains("balance overflow"));
}

/// Emits a call whose args exceed the configured limit, attached to a
/// callback with reserved mana.
struct Oversized;

#[async_trait]
impl Contract for Oversized {
    async fn call(
        &self,
        ctx: &mut CallContext<'_, '_>,
        _method: &str,
        _args: &[u8],
    ) -> HostResult<Option<Bytes>> {
        let callback = ctx.create_callback("sum", 10).await?;
        ctx.call("counter", "increment", vec![0u8; 70_000], 5, 20, Some(callback))
            .await?;
        Ok(None)
    }
}

#[tokio::test]
async fn test_oversized_emitted_call_keeps_balances() {
    let registry = sample_registry().with("big", Oversized);
    let fixture = TestFixture::with_parts(MemoryStore::new(), registry, zero_cost_config()).unwrap();
    fixture.fund(&[("alice", 1_000), ("big", 100)]).await.unwrap();
    let accounts = ["alice", "big", "counter"];

    let outcome = fixture.call("alice", "big", "go", &b""[..], 0, 50).await.unwrap();
    match &outcome {
        RoutingOutcome::Settled { success, failure, .. } => {
            assert!(!success);
            assert!(matches!(failure, Some(ContractError::Trap(msg)) if msg.contains("exceed")));
        }
        other => panic!("expected settlement, got {other:?}"),
    }
    assert!(outcome.emitted().iter().all(|r| r.kind() != ReceiptKind::AsyncCall));

    let report = fixture.settle().await.unwrap();
    assert_eq!(report.rejected + report.quarantined, 0);
    assert_eq!(fixture.total(&accounts).await.unwrap(), 1_100);
    assert_eq!(fixture.balance("big").await.unwrap(), 100);
    assert_eq!(fixture.balance("alice").await.unwrap(), 1_000);
}

// =============================================================================
// PERSISTENCE AND WORKER
// =============================================================================

#[tokio::test]
async fn test_sqlite_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runtime.db");
    let nonce;

    {
        let fixture = TestFixture::sqlite(&path).unwrap();
        fixture.fund(&[("alice", 1_000)]).await.unwrap();
        let outcome = fixture
            .call("alice", "counter", "spend", encode_u64(25), 0, 100)
            .await
            .unwrap();
        nonce = fixture.nonce() - 1;
        assert!(matches!(outcome, RoutingOutcome::Settled { success: true, .. }));
    }

    let fixture = TestFixture::sqlite(&path).unwrap();
    assert_eq!(fixture.runtime.queue_len().await.unwrap(), 1);
    assert_eq!(fixture.balance("alice").await.unwrap(), 900);

    let report = fixture.settle().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(fixture.balance("alice").await.unwrap(), 975);
    assert_eq!(
        fixture
            .runtime
            .receipt_status(&AccountId::new("alice"), nonce)
            .await
            .unwrap(),
        Some(ReceiptStatus::Settled { success: true })
    );
}

#[tokio::test]
async fn test_worker_drains_queue() {
    let fixture = TestFixture::new();
    fixture.fund(&[("alice", 1_000)]).await.unwrap();
    let worker = fixture.runtime.spawn_worker();

    fixture
        .call("alice", "counter", "spend", encode_u64(10), 0, 50)
        .await
        .unwrap();

    let drained = async {
        while fixture.runtime.queue_len().await.unwrap() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), drained)
        .await
        .unwrap();

    worker.shutdown().await.unwrap();
    assert_eq!(fixture.balance("alice").await.unwrap(), 990);
}

// =============================================================================
// CONSERVATION
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_mana_is_conserved(params: CallParams) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let fixture = TestFixture::with_config(Default::default());
            fixture.fund(&[("alice", 10_000)]).await.unwrap();

            let outcome = fixture
                .call("alice", "counter", "spend", encode_u64(params.spend), params.amount, params.mana)
                .await
                .unwrap();

            let (success, gas_used) = match &outcome {
                RoutingOutcome::Settled { success, gas_used, .. } => (*success, *gas_used),
                other => panic!("expected settlement, got {other:?}"),
            };

            let accounting = match &outcome.emitted()[0].body {
                ReceiptBody::ManaAccounting(a) => a.clone(),
                other => panic!("expected settlement, got {other:?}"),
            };
            let refund: u64 = outcome
                .emitted()
                .iter()
                .filter_map(|r| match r.body {
                    ReceiptBody::Refund(amount) => Some(amount),
                    _ => None,
                })
                .sum();

            assert_eq!(accounting.gas_used, gas_used);
            if success {
                assert_eq!(accounting.mana_refund + accounting.gas_used, params.mana);
                assert_eq!(refund, 0);
            } else {
                assert_eq!(accounting.mana_refund, 0);
                assert_eq!(refund, params.amount + params.mana - gas_used);
            }

            fixture.settle().await.unwrap();
            let total = fixture.total(&["alice", "counter"]).await.unwrap();
            assert_eq!(total, 10_000 - gas_used);
        });
    }
}
