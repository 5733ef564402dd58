//! AsyncCallExecutor: runs contract code under a mana budget.
//!
//! The contract layer itself is external. Contracts implement [`Contract`]
//! and reach runtime state only through the metered [`CallContext`]. Every
//! host operation charges mana, and the call halts as soon as the budget is
//! exhausted.
//!
//! A call never suspends. Outgoing calls are emitted as receipts, and a
//! caller waiting on results registers a callback that a later, independent
//! receipt resumes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use mana_runtime_core::{
    derive_nonce, AccountId, AccountingInfo, AsyncCall, Balance, CallbackId, CallbackInfo,
    CallbackResult, Mana, ManaAccounting, ReceiptBody, ReceiptId, ReceiptTransaction,
    CALLBACK_SLOT, FIRST_CALL_SLOT, REFUND_SLOT, SETTLEMENT_SLOT,
};
use mana_runtime_store::{GrantKind, ManaGrant, PendingCallback};

use crate::config::ExecutionConfig;
use crate::error::{Result, RuntimeError};
use crate::staging::Staging;

/// Why a contract invocation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    /// The mana budget ran out.
    #[error("mana exhausted (limit {limit})")]
    ManaExhausted { limit: Mana },

    /// The contract trapped.
    #[error("trap: {0}")]
    Trap(String),

    /// The contract aborted explicitly.
    #[error("aborted: {0}")]
    Abort(String),

    /// The contract has no such method or continuation.
    #[error("no method {0}")]
    MissingMethod(String),

    /// No contract is deployed on the account.
    #[error("no contract on {0}")]
    NoContract(AccountId),

    /// The contract tried to spend more than its balance.
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Balance, available: Balance },

    /// The contract attached a call to a callback it did not create.
    #[error("unknown callback {0}")]
    UnknownCallback(CallbackId),

    /// The host failed outside contract control. Aborts processing of the
    /// whole receipt instead of settling the call.
    #[error("host failure: {0}")]
    Host(String),
}

/// Result of a host operation.
pub type HostResult<T> = std::result::Result<T, ContractError>;

/// Contract code, invoked by the executor.
#[async_trait]
pub trait Contract: Send + Sync {
    /// Run `method` with `args`.
    async fn call(
        &self,
        ctx: &mut CallContext<'_, '_>,
        method: &str,
        args: &[u8],
    ) -> HostResult<Option<Bytes>>;

    /// Resume `continuation` with the results of a completed callback, in
    /// result-index order.
    async fn resume(
        &self,
        ctx: &mut CallContext<'_, '_>,
        continuation: &str,
        results: &[Option<Bytes>],
    ) -> HostResult<Option<Bytes>> {
        let _ = (ctx, results);
        Err(ContractError::MissingMethod(continuation.to_string()))
    }
}

/// Contracts by the account they are deployed on.
#[derive(Clone, Default)]
pub struct ContractRegistry {
    contracts: HashMap<AccountId, Arc<dyn Contract>>,
}

impl ContractRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy `contract` on `account`, replacing any previous one.
    pub fn register(&mut self, account: impl Into<AccountId>, contract: impl Contract + 'static) {
        self.contracts.insert(account.into(), Arc::new(contract));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, account: impl Into<AccountId>, contract: impl Contract + 'static) -> Self {
        self.register(account, contract);
        self
    }

    /// The contract deployed on `account`.
    pub fn get(&self, account: &AccountId) -> Option<Arc<dyn Contract>> {
        self.contracts.get(account).cloned()
    }
}

impl fmt::Debug for ContractRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.contracts.keys()).finish()
    }
}

/// Mana consumption of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meter {
    limit: Mana,
    used: Mana,
}

impl Meter {
    /// A meter with nothing used.
    pub fn new(limit: Mana) -> Self {
        Self { limit, used: 0 }
    }

    /// Consume `units`. Exhaustion consumes the whole budget.
    pub fn charge(&mut self, units: Mana) -> HostResult<()> {
        match self.used.checked_add(units) {
            Some(total) if total <= self.limit => {
                self.used = total;
                Ok(())
            }
            _ => {
                self.used = self.limit;
                Err(ContractError::ManaExhausted { limit: self.limit })
            }
        }
    }

    pub fn used(&self) -> Mana {
        self.used
    }

    pub fn remaining(&self) -> Mana {
        self.limit - self.used
    }
}

fn host(err: RuntimeError) -> ContractError {
    match err {
        RuntimeError::InsufficientBalance {
            requested,
            available,
            ..
        } => ContractError::InsufficientBalance {
            requested,
            available,
        },
        RuntimeError::BalanceOverflow(account) => {
            ContractError::Trap(format!("balance overflow on {account}"))
        }
        other => ContractError::Host(other.to_string()),
    }
}

/// The metered host interface handed to a contract.
pub struct CallContext<'a, 's> {
    staging: &'a mut Staging<'s>,
    config: &'a ExecutionConfig,
    meter: Meter,
    receipt_id: ReceiptId,
    account: AccountId,
    caller: AccountId,
    amount: Balance,
    outgoing: Vec<ReceiptTransaction>,
    created: Vec<CallbackId>,
}

impl<'a, 's> CallContext<'a, 's> {
    /// Account the contract runs as.
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Originator of the receipt being executed.
    pub fn caller(&self) -> &AccountId {
        &self.caller
    }

    /// Balance attached to the call. Already credited to [`account`](Self::account).
    pub fn attached_amount(&self) -> Balance {
        self.amount
    }

    /// Id of the receipt being executed.
    pub fn receipt_id(&self) -> ReceiptId {
        self.receipt_id
    }

    pub fn mana_used(&self) -> Mana {
        self.meter.used()
    }

    pub fn mana_remaining(&self) -> Mana {
        self.meter.remaining()
    }

    /// Consume `units` of mana for contract computation.
    pub fn charge(&mut self, units: Mana) -> HostResult<()> {
        self.meter.charge(units)
    }

    /// Abort the call. Its effects are rolled back; consumed mana is kept.
    pub fn abort<T>(&self, reason: impl Into<String>) -> HostResult<T> {
        Err(ContractError::Abort(reason.into()))
    }

    /// Current balance of the contract account.
    pub async fn balance(&mut self) -> HostResult<Balance> {
        self.charge(self.config.storage_read_cost)?;
        self.staging.balance(&self.account).await.map_err(host)
    }

    /// Read a key from the contract's storage.
    pub async fn storage_read(&mut self, key: &[u8]) -> HostResult<Option<Vec<u8>>> {
        self.charge(self.config.storage_read_cost)?;
        self.staging.storage(&self.account, key).await.map_err(host)
    }

    /// Write a key in the contract's storage.
    pub fn storage_write(&mut self, key: &[u8], value: impl Into<Vec<u8>>) -> HostResult<()> {
        let value = value.into();
        let bytes = (key.len() + value.len()) as u64;
        self.charge(bytes.saturating_mul(self.config.storage_write_cost_per_byte))?;
        self.staging.put_storage(&self.account, key, value);
        Ok(())
    }

    /// Remove a key from the contract's storage.
    pub fn storage_remove(&mut self, key: &[u8]) -> HostResult<()> {
        let bytes = key.len() as u64;
        self.charge(bytes.saturating_mul(self.config.storage_write_cost_per_byte))?;
        self.staging.remove_storage(&self.account, key);
        Ok(())
    }

    /// Register a callback that resumes `continuation` on this account once
    /// every call attached to it has delivered a result.
    ///
    /// `mana` is reserved from the account balance for the continuation. A
    /// callback that ends the call with no calls attached is released and
    /// its mana returned.
    pub async fn create_callback(&mut self, continuation: &str, mana: Mana) -> HostResult<CallbackId> {
        self.charge(self.config.promise_base_cost)?;
        if continuation.is_empty() {
            return Err(ContractError::Trap("empty continuation".into()));
        }

        let id = CallbackId::derive(&self.receipt_id, self.created.len() as u32);
        self.staging.debit(&self.account, mana).await.map_err(host)?;
        self.staging.put_callback(PendingCallback::new(
            id,
            self.account.clone(),
            continuation.to_string(),
            mana,
        ));
        self.created.push(id);
        Ok(id)
    }

    /// Emit an asynchronous call.
    ///
    /// `amount + mana` is debited from this account now and granted to the
    /// emitted receipt, which alone may consume the grant. With `callback`,
    /// the call's result fills the next slot of that callback.
    pub async fn call(
        &mut self,
        receiver: impl Into<AccountId>,
        method: &str,
        args: impl Into<Bytes>,
        amount: Balance,
        mana: Mana,
        callback: Option<CallbackId>,
    ) -> HostResult<()> {
        self.charge(self.config.promise_base_cost)?;

        let receiver = receiver.into();
        if !receiver.is_valid() {
            return Err(ContractError::Trap(format!("invalid receiver {receiver:?}")));
        }
        if method.is_empty() {
            return Err(ContractError::Trap("empty method name".into()));
        }
        let args: Bytes = args.into();
        if args.len() > self.config.max_args_len {
            return Err(ContractError::Trap(format!(
                "args of {} bytes exceed limit of {}",
                args.len(),
                self.config.max_args_len
            )));
        }
        let budget = amount
            .checked_add(mana)
            .ok_or_else(|| ContractError::Trap("call budget overflows".into()))?;

        self.staging.debit(&self.account, budget).await.map_err(host)?;

        let callback = match callback {
            Some(id) => {
                if !self.created.contains(&id) {
                    return Err(ContractError::UnknownCallback(id));
                }
                let mut registration = self
                    .staging
                    .callback(&id)
                    .await
                    .map_err(host)?
                    .ok_or(ContractError::UnknownCallback(id))?;
                let result_index = registration.expected;
                registration.expected += 1;
                self.staging.put_callback(registration);
                Some(CallbackInfo {
                    id,
                    result_index,
                    receiver: self.account.clone(),
                })
            }
            None => None,
        };

        let slot = FIRST_CALL_SLOT.saturating_add(self.outgoing.len() as u32);
        let nonce = derive_nonce(&self.receipt_id, slot);

        let receipt = ReceiptTransaction::new(
            self.account.clone(),
            receiver.clone(),
            nonce,
            ReceiptBody::AsyncCall(AsyncCall {
                amount,
                mana,
                method_name: method.to_string(),
                args,
                callback,
                accounting_info: AccountingInfo {
                    originator: self.account.clone(),
                    contract_id: Some(receiver),
                },
            }),
        );

        self.staging.put_grant(
            &self.account,
            nonce,
            ManaGrant {
                kind: GrantKind::Call,
                receipt: receipt.compute_id(),
                payer: self.account.clone(),
                amount,
                mana,
            },
        );
        self.outgoing.push(receipt);
        Ok(())
    }
}

/// What to invoke.
#[derive(Debug, Clone, Copy)]
pub enum Entry<'r> {
    /// A method named by an AsyncCall.
    Call { method: &'r str, args: &'r [u8] },
    /// A continuation whose callback completed.
    Resume {
        continuation: &'r str,
        results: &'r [Option<Bytes>],
    },
}

/// An authorized, funded invocation.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'r> {
    /// Receipt being executed; child nonces derive from it.
    pub receipt_id: ReceiptId,
    /// Account whose contract runs.
    pub account: &'r AccountId,
    pub caller: &'r AccountId,
    /// Account credited with unspent budget.
    pub payer: &'r AccountId,
    /// Attached balance, credited to `account` on success.
    pub amount: Balance,
    pub mana: Mana,
    pub entry: Entry<'r>,
    /// Where to deliver the result.
    pub callback: Option<&'r CallbackInfo>,
    pub accounting: &'r AccountingInfo,
}

/// Result of running a call to completion or failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Value produced by a successful call.
    pub result: Option<Bytes>,
    pub gas_used: Mana,
    /// Mana returned through the settlement receipt.
    pub mana_refund: Mana,
    pub failure: Option<ContractError>,
    /// Settlement, callback result, refund and outgoing calls, in that order.
    pub emitted: Vec<ReceiptTransaction>,
}

/// Runs contract invocations against staged state.
#[derive(Debug, Clone)]
pub struct AsyncCallExecutor {
    registry: Arc<ContractRegistry>,
    config: ExecutionConfig,
}

impl AsyncCallExecutor {
    pub fn new(registry: Arc<ContractRegistry>, config: ExecutionConfig) -> Self {
        Self { registry, config }
    }

    /// Execute `req` under a budget of `req.mana`.
    ///
    /// On success the call's effects stay staged. On failure they are
    /// discarded, the consumed mana is charged, and the rest of the budget
    /// returns to the payer through a Refund receipt. Either way the emitted
    /// settlement gets a grant bound to it, staged after any rollback.
    ///
    /// # Errors
    ///
    /// Only host failures and balance overflows surface as errors; contract
    /// failures are part of the outcome.
    pub async fn execute(
        &self,
        staging: &mut Staging<'_>,
        req: ExecutionRequest<'_>,
    ) -> Result<ExecutionOutcome> {
        let checkpoint = staging.checkpoint();
        let mut meter = Meter::new(req.mana);
        let (result, outgoing, created) = self.invoke(staging, &req, &mut meter).await;

        match result {
            Ok(value) => {
                // Release callbacks that never got a call attached
                for id in &created {
                    if let Some(registration) = staging.callback(id).await? {
                        if registration.expected == 0 {
                            staging.delete_callback(id);
                            staging.credit(req.account, registration.mana).await?;
                        }
                    }
                }

                let gas_used = meter.used();
                let mana_refund = req.mana - gas_used;

                let mut emitted = vec![settlement(staging, &req, mana_refund, gas_used)];
                if let Some(info) = req.callback {
                    emitted.push(callback_result(&req, info, value.clone()));
                }
                emitted.extend(outgoing);

                debug!(
                    account = %req.account,
                    receipt = %req.receipt_id,
                    gas_used,
                    calls = emitted.len(),
                    "call completed"
                );

                Ok(ExecutionOutcome {
                    success: true,
                    result: value,
                    gas_used,
                    mana_refund,
                    failure: None,
                    emitted,
                })
            }
            Err(ContractError::Host(msg)) => Err(RuntimeError::Host(msg)),
            Err(failure) => {
                staging.restore(checkpoint);

                let gas_used = meter.used();
                let returned = req.amount.saturating_add(req.mana - gas_used);

                let mut emitted = vec![settlement(staging, &req, 0, gas_used)];
                if returned > 0 {
                    emitted.push(ReceiptTransaction::new(
                        req.account.clone(),
                        req.payer.clone(),
                        derive_nonce(&req.receipt_id, REFUND_SLOT),
                        ReceiptBody::Refund(returned),
                    ));
                }
                if let Some(info) = req.callback {
                    emitted.push(callback_result(&req, info, None));
                }

                debug!(
                    account = %req.account,
                    receipt = %req.receipt_id,
                    gas_used,
                    error = %failure,
                    "call failed"
                );

                Ok(ExecutionOutcome {
                    success: false,
                    result: None,
                    gas_used,
                    mana_refund: 0,
                    failure: Some(failure),
                    emitted,
                })
            }
        }
    }

    async fn invoke(
        &self,
        staging: &mut Staging<'_>,
        req: &ExecutionRequest<'_>,
        meter: &mut Meter,
    ) -> (HostResult<Option<Bytes>>, Vec<ReceiptTransaction>, Vec<CallbackId>) {
        if let Err(e) = meter.charge(self.config.base_call_cost) {
            return (Err(e), Vec::new(), Vec::new());
        }
        if let Err(e) = staging.credit(req.account, req.amount).await {
            return (Err(host(e)), Vec::new(), Vec::new());
        }
        let Some(contract) = self.registry.get(req.account) else {
            return (
                Err(ContractError::NoContract(req.account.clone())),
                Vec::new(),
                Vec::new(),
            );
        };

        let mut ctx = CallContext {
            staging,
            config: &self.config,
            meter: *meter,
            receipt_id: req.receipt_id,
            account: req.account.clone(),
            caller: req.caller.clone(),
            amount: req.amount,
            outgoing: Vec::new(),
            created: Vec::new(),
        };

        let result = match req.entry {
            Entry::Call { method, args } => contract.call(&mut ctx, method, args).await,
            Entry::Resume {
                continuation,
                results,
            } => contract.resume(&mut ctx, continuation, results).await,
        };

        *meter = ctx.meter;
        (result, ctx.outgoing, ctx.created)
    }
}

/// Build the settlement receipt and stage the grant it settles against.
fn settlement(
    staging: &mut Staging<'_>,
    req: &ExecutionRequest<'_>,
    mana_refund: Mana,
    gas_used: Mana,
) -> ReceiptTransaction {
    let receipt = ReceiptTransaction::new(
        req.account.clone(),
        req.accounting.originator.clone(),
        derive_nonce(&req.receipt_id, SETTLEMENT_SLOT),
        ReceiptBody::ManaAccounting(ManaAccounting {
            accounting_info: req.accounting.clone(),
            mana_refund,
            gas_used,
        }),
    );
    staging.put_grant(
        req.account,
        receipt.nonce,
        ManaGrant {
            kind: GrantKind::Settlement,
            receipt: receipt.compute_id(),
            payer: req.payer.clone(),
            amount: 0,
            mana: req.mana,
        },
    );
    receipt
}

fn callback_result(
    req: &ExecutionRequest<'_>,
    info: &CallbackInfo,
    result: Option<Bytes>,
) -> ReceiptTransaction {
    ReceiptTransaction::new(
        req.account.clone(),
        info.receiver.clone(),
        derive_nonce(&req.receipt_id, CALLBACK_SLOT),
        ReceiptBody::CallbackResult(CallbackResult {
            info: info.clone(),
            result,
        }),
    )
}
