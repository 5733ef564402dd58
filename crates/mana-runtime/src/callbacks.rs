//! CallbackResolver: matches deferred results to pending registrations.
//!
//! A registration has one slot per call attached to it. Each CallbackResult
//! fills exactly one slot; the receiver's continuation runs once every slot
//! is filled, with the results in slot order.

use mana_runtime_core::{AccountingInfo, CallbackResult, ReceiptId, ReceiptTransaction};
use mana_runtime_store::SlotFill;
use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::executor::{AsyncCallExecutor, Entry, ExecutionOutcome, ExecutionRequest};
use crate::staging::Staging;

/// Result of resolving one CallbackResult.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The slot was filled; more results are outstanding.
    Pending { filled: u32, expected: u32 },
    /// The last slot was filled and the continuation ran.
    Resumed(ExecutionOutcome),
}

/// Resolves CallbackResult receipts.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallbackResolver;

impl CallbackResolver {
    /// Resolve `result`, carried by `receipt` with id `receipt_id`.
    ///
    /// # Errors
    ///
    /// - `UnknownCallback` if no registration for the id exists, it belongs
    ///   to another receiver, or the result index names no slot
    /// - `CallbackSlotTaken` if the slot is already filled
    ///
    /// Both are benign and stage nothing.
    pub async fn resolve(
        &self,
        staging: &mut Staging<'_>,
        executor: &AsyncCallExecutor,
        receipt_id: ReceiptId,
        receipt: &ReceiptTransaction,
        result: &CallbackResult,
    ) -> Result<Resolution> {
        let info = &result.info;
        let unknown = || RuntimeError::UnknownCallback(info.id);

        let mut registration = staging.callback(&info.id).await?.ok_or_else(unknown)?;
        if registration.receiver != info.receiver {
            return Err(unknown());
        }

        match registration.fill(info.result_index, result.result.clone()) {
            SlotFill::Filled => {}
            SlotFill::AlreadyFilled => {
                return Err(RuntimeError::CallbackSlotTaken {
                    id: info.id,
                    index: info.result_index,
                })
            }
            SlotFill::OutOfRange => return Err(unknown()),
        }

        if !registration.is_complete() {
            let filled = registration.results.len() as u32;
            let expected = registration.expected;
            debug!(callback = %info.id, filled, expected, "callback slot filled");
            staging.put_callback(registration);
            return Ok(Resolution::Pending { filled, expected });
        }

        staging.delete_callback(&info.id);

        let results = registration.ordered_results();
        let accounting = AccountingInfo {
            originator: registration.receiver.clone(),
            contract_id: Some(registration.receiver.clone()),
        };

        let outcome = executor
            .execute(
                staging,
                ExecutionRequest {
                    receipt_id,
                    account: &registration.receiver,
                    caller: &receipt.originator,
                    payer: &registration.receiver,
                    amount: 0,
                    mana: registration.mana,
                    entry: Entry::Resume {
                        continuation: &registration.continuation,
                        results: &results,
                    },
                    callback: None,
                    accounting: &accounting,
                },
            )
            .await?;

        debug!(
            callback = %info.id,
            receiver = %registration.receiver,
            success = outcome.success,
            "callback resumed"
        );
        Ok(Resolution::Resumed(outcome))
    }
}
