//! ReceiptRouter: top-level dispatch of receipts.
//!
//! The router enforces the nonce guard, sends each body variant to the
//! component that handles it, and commits everything the receipt caused
//! as one batch together with its archive record.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use mana_runtime_auth::{funding_source, AccessKeyAuthorizer, AccessRequest, Verdict};
use mana_runtime_core::{
    canonical_bytes, validate_receipt, AccountId, AccountingInfo, AsyncCall, Balance, CallbackId,
    Mana, ReceiptBody, ReceiptId, ReceiptTransaction,
};
use mana_runtime_store::{
    now_millis, ArchivedReceipt, CommitResult, GrantKind, ReceiptStatus, Store,
};

use crate::callbacks::{CallbackResolver, Resolution};
use crate::config::ExecutionConfig;
use crate::error::{Result, RuntimeError, Severity};
use crate::executor::{
    AsyncCallExecutor, ContractError, ContractRegistry, Entry, ExecutionRequest,
};
use crate::ledger::ManaLedger;
use crate::refunds::RefundIssuer;
use crate::staging::Staging;

/// Why a receipt was dropped without effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// `(originator, nonce)` was already processed.
    DuplicateNonce,
    /// No pending registration matches the callback result.
    UnknownCallback(CallbackId),
    /// The callback slot already holds a result.
    SlotTaken { id: CallbackId, index: u32 },
}

/// What processing a receipt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingOutcome {
    /// An AsyncCall ran and was charged.
    Settled {
        receipt_id: ReceiptId,
        success: bool,
        gas_used: Mana,
        result: Option<Bytes>,
        failure: Option<ContractError>,
        emitted: Vec<ReceiptTransaction>,
    },
    /// A CallbackResult filled its slot, resuming the receiver if it was
    /// the last one.
    Resolved {
        receipt_id: ReceiptId,
        callback: CallbackId,
        resumed: bool,
        emitted: Vec<ReceiptTransaction>,
    },
    /// A refund was credited.
    Credited { account: AccountId, amount: Balance },
    /// A ManaAccounting receipt was reconciled.
    Reconciled {
        payer: AccountId,
        refunded: Mana,
        burnt: Mana,
    },
    /// The receipt was dropped with no mutation.
    Dropped(DropReason),
}

impl RoutingOutcome {
    /// Receipts emitted by processing.
    pub fn emitted(&self) -> &[ReceiptTransaction] {
        match self {
            Self::Settled { emitted, .. } | Self::Resolved { emitted, .. } => emitted,
            _ => &[],
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped(_))
    }
}

/// Dispatches receipts to the settlement components.
pub struct ReceiptRouter<S: Store> {
    store: Arc<S>,
    executor: AsyncCallExecutor,
    authorizer: AccessKeyAuthorizer,
    ledger: ManaLedger,
    resolver: CallbackResolver,
    refunds: RefundIssuer,
    max_args_len: usize,
}

impl<S: Store> ReceiptRouter<S> {
    pub fn new(store: Arc<S>, registry: Arc<ContractRegistry>, config: ExecutionConfig) -> Self {
        Self {
            store,
            max_args_len: config.max_args_len,
            executor: AsyncCallExecutor::new(registry, config),
            authorizer: AccessKeyAuthorizer,
            ledger: ManaLedger,
            resolver: CallbackResolver,
            refunds: RefundIssuer,
        }
    }

    /// Accounts whose state processing `receipt` may mutate.
    ///
    /// The caller holds their guards while dispatching. The set depends on
    /// stored grants and keys, so it is recomputed under the guards to make
    /// sure it did not change.
    pub async fn accounts_touched(&self, receipt: &ReceiptTransaction) -> Result<Vec<AccountId>> {
        let mut accounts = vec![receipt.receiver.clone(), receipt.originator.clone()];

        match &receipt.body {
            ReceiptBody::AsyncCall(_) => {
                match self.store.get_grant(&receipt.originator, receipt.nonce).await? {
                    Some(grant) => accounts.push(grant.payer),
                    None => {
                        let owner = self
                            .store
                            .get_account(&receipt.originator)
                            .await?
                            .and_then(|a| a.access_key)
                            .and_then(|k| k.balance_owner);
                        accounts.extend(owner);
                    }
                }
            }
            ReceiptBody::ManaAccounting(_) => {
                if let Some(grant) = self.store.get_grant(&receipt.originator, receipt.nonce).await? {
                    accounts.push(grant.payer);
                }
            }
            ReceiptBody::CallbackResult(_) | ReceiptBody::Refund(_) => {}
        }

        accounts.sort();
        accounts.dedup();
        Ok(accounts)
    }

    /// Whether `receipt` was generated by the runtime rather than authored
    /// by a user.
    ///
    /// Every kind but AsyncCall is. An AsyncCall is when a contract emitted
    /// it, which shows as a call grant bound to its id.
    pub async fn is_runtime_generated(&self, receipt: &ReceiptTransaction) -> Result<bool> {
        if receipt.kind().is_runtime_generated() {
            return Ok(true);
        }
        Ok(self
            .store
            .get_grant(&receipt.originator, receipt.nonce)
            .await?
            .is_some_and(|g| g.funds(GrantKind::Call, &receipt.compute_id())))
    }

    /// Process `receipt` exactly once.
    ///
    /// `queued` is the receipt's queue position, consumed by the same commit.
    /// Benign failures come back as [`RoutingOutcome::Dropped`]; everything
    /// else that fails is an error and leaves no trace in the store.
    pub async fn dispatch(
        &self,
        receipt: &ReceiptTransaction,
        queued: Option<u64>,
    ) -> Result<RoutingOutcome> {
        match self.route(receipt, queued).await {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.severity() == Severity::Benign => {
                let reason = match err {
                    RuntimeError::UnknownCallback(id) => DropReason::UnknownCallback(id),
                    RuntimeError::CallbackSlotTaken { id, index } => {
                        DropReason::SlotTaken { id, index }
                    }
                    _ => DropReason::DuplicateNonce,
                };
                info!(
                    originator = %receipt.originator,
                    nonce = receipt.nonce,
                    reason = ?reason,
                    "receipt dropped"
                );
                Ok(RoutingOutcome::Dropped(reason))
            }
            Err(err) => {
                if err.severity() == Severity::Rejected {
                    warn!(
                        originator = %receipt.originator,
                        nonce = receipt.nonce,
                        receiver = %receipt.receiver,
                        error = %err,
                        "receipt rejected"
                    );
                }
                Err(err)
            }
        }
    }

    async fn route(
        &self,
        receipt: &ReceiptTransaction,
        queued: Option<u64>,
    ) -> Result<RoutingOutcome> {
        validate_receipt(receipt)?;

        if self.store.is_processed(&receipt.originator, receipt.nonce).await? {
            debug!(
                originator = %receipt.originator,
                nonce = receipt.nonce,
                "duplicate nonce"
            );
            return Err(RuntimeError::DuplicateNonce {
                originator: receipt.originator.clone(),
                nonce: receipt.nonce,
            });
        }

        let receipt_id = receipt.compute_id();
        let mut staging = Staging::new(self.store.as_ref());

        let (outcome, status) = match &receipt.body {
            ReceiptBody::AsyncCall(call) => {
                let payer = self
                    .fund(&mut staging, receipt, receipt_id, call, queued.is_some())
                    .await?;
                let outcome = self
                    .executor
                    .execute(
                        &mut staging,
                        ExecutionRequest {
                            receipt_id,
                            account: &receipt.receiver,
                            caller: &receipt.originator,
                            payer: &payer,
                            amount: call.amount,
                            mana: call.mana,
                            entry: Entry::Call {
                                method: &call.method_name,
                                args: &call.args,
                            },
                            callback: call.callback.as_ref(),
                            accounting: &call.accounting_info,
                        },
                    )
                    .await?;
                let status = ReceiptStatus::Settled {
                    success: outcome.success,
                };
                (
                    RoutingOutcome::Settled {
                        receipt_id,
                        success: outcome.success,
                        gas_used: outcome.gas_used,
                        result: outcome.result,
                        failure: outcome.failure,
                        emitted: outcome.emitted,
                    },
                    status,
                )
            }
            ReceiptBody::CallbackResult(result) => {
                let resolution = self
                    .resolver
                    .resolve(&mut staging, &self.executor, receipt_id, receipt, result)
                    .await?;
                let (resumed, emitted) = match resolution {
                    Resolution::Pending { .. } => (false, Vec::new()),
                    Resolution::Resumed(outcome) => (true, outcome.emitted),
                };
                (
                    RoutingOutcome::Resolved {
                        receipt_id,
                        callback: result.info.id,
                        resumed,
                        emitted,
                    },
                    ReceiptStatus::Resolved,
                )
            }
            ReceiptBody::Refund(amount) => {
                let info = AccountingInfo {
                    originator: receipt.receiver.clone(),
                    contract_id: None,
                };
                self.refunds.issue(&mut staging, *amount, &info).await?;
                (
                    RoutingOutcome::Credited {
                        account: info.originator,
                        amount: *amount,
                    },
                    ReceiptStatus::Credited,
                )
            }
            ReceiptBody::ManaAccounting(accounting) => {
                let settlement = self.ledger.settle(&mut staging, receipt, accounting).await?;
                (
                    RoutingOutcome::Reconciled {
                        payer: settlement.payer,
                        refunded: settlement.refunded,
                        burnt: settlement.burnt,
                    },
                    ReceiptStatus::Reconciled,
                )
            }
        };

        let mut batch = staging.into_batch();
        batch.enqueue = outcome.emitted().to_vec();
        batch.dequeue = queued;
        batch.archive = Some(ArchivedReceipt {
            id: receipt_id,
            originator: receipt.originator.clone(),
            nonce: receipt.nonce,
            receiver: receipt.receiver.clone(),
            kind: receipt.kind(),
            status,
            canonical: canonical_bytes(receipt),
            processed_at: now_millis(),
        });

        match self.store.commit(batch).await? {
            CommitResult::Committed => {
                debug!(
                    originator = %receipt.originator,
                    nonce = receipt.nonce,
                    receiver = %receipt.receiver,
                    kind = ?receipt.kind(),
                    emitted = outcome.emitted().len(),
                    "receipt processed"
                );
                Ok(outcome)
            }
            CommitResult::AlreadyProcessed => Err(RuntimeError::DuplicateNonce {
                originator: receipt.originator.clone(),
                nonce: receipt.nonce,
            }),
        }
    }

    /// Authorize and fund an AsyncCall, returning the payer.
    ///
    /// Calls emitted by contracts were funded at emission and carry a grant
    /// bound to their receipt id. Only that exact receipt, arriving through
    /// the queue, may consume it; consuming it replaces authorization. A
    /// receipt reusing a granted `(originator, nonce)` is refused so the
    /// genuine one still finds its funding. Anything else is checked against
    /// the originator's access key and debited here.
    async fn fund(
        &self,
        staging: &mut Staging<'_>,
        receipt: &ReceiptTransaction,
        receipt_id: ReceiptId,
        call: &AsyncCall,
        from_queue: bool,
    ) -> Result<AccountId> {
        if let Some(grant) = staging.grant(&receipt.originator, receipt.nonce).await? {
            if !from_queue || !grant.funds(GrantKind::Call, &receipt_id) {
                return Err(RuntimeError::GrantMismatch {
                    originator: receipt.originator.clone(),
                    nonce: receipt.nonce,
                });
            }
            staging.delete_grant(&receipt.originator, receipt.nonce);
            return Ok(grant.payer);
        }

        if call.args.len() > self.max_args_len {
            return Err(RuntimeError::MalformedReceipt(format!(
                "args of {} bytes exceed limit of {}",
                call.args.len(),
                self.max_args_len
            )));
        }

        let account = staging
            .account(&receipt.originator)
            .await?
            .ok_or_else(|| {
                RuntimeError::Unauthorized(format!("unknown originator {}", receipt.originator))
            })?;

        let requested = call
            .budget()
            .ok_or_else(|| RuntimeError::MalformedReceipt("call budget overflows".into()))?;
        let source = funding_source(&receipt.originator, account.access_key.as_ref());

        if let Some(key) = &account.access_key {
            let delegated = match &key.balance_owner {
                Some(owner) => staging.account(owner).await?.map(|a| a.balance),
                None => None,
            };
            let request = AccessRequest::new(&receipt.receiver, &call.method_name, requested);

            match self.authorizer.authorize(key, &request, delegated) {
                Verdict::Authorized => {}
                Verdict::Unauthorized(reason) => {
                    return Err(RuntimeError::Unauthorized(reason.to_string()))
                }
                Verdict::InsufficientBalance {
                    requested,
                    available,
                } => {
                    return Err(RuntimeError::InsufficientBalance {
                        account: source.payer.clone(),
                        requested,
                        available,
                    })
                }
            }
        }

        staging.debit(&source.payer, requested).await?;

        if source.draws_allowance {
            if let Some(mut account) = staging.account(&receipt.originator).await? {
                if let Some(key) = account.access_key.as_mut() {
                    key.amount -= requested;
                }
                staging.put_account(&receipt.originator, account);
            }
        }

        Ok(source.payer)
    }
}
