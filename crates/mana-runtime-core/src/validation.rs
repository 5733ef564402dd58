//! Receipt validation: structural checks that need no ledger state.

use crate::error::ValidationError;
use crate::receipt::{ReceiptBody, ReceiptTransaction};
use crate::types::AccountId;

fn check_account(id: &AccountId) -> Result<(), ValidationError> {
    if !id.is_valid() {
        return Err(ValidationError::InvalidAccountId(id.clone()));
    }
    Ok(())
}

/// Validate a receipt's structure.
///
/// This performs:
/// - Account id checks on originator and receiver
/// - Per-body addressing rules
/// - Budget overflow check for calls
pub fn validate_receipt(receipt: &ReceiptTransaction) -> Result<(), ValidationError> {
    // 1. Addresses
    check_account(&receipt.originator)?;
    check_account(&receipt.receiver)?;

    match &receipt.body {
        ReceiptBody::AsyncCall(call) => {
            // 2. The originator pays for its own calls
            if call.accounting_info.originator != receipt.originator {
                return Err(ValidationError::OriginatorMismatch {
                    originator: receipt.originator.clone(),
                    accounting: call.accounting_info.originator.clone(),
                });
            }

            // 3. A call names a method
            if call.method_name.is_empty() {
                return Err(ValidationError::EmptyMethodName);
            }

            // 4. amount + mana must be representable
            if call.budget().is_none() {
                return Err(ValidationError::BudgetOverflow);
            }

            if let Some(callback) = &call.callback {
                check_account(&callback.receiver)?;
            }
        }
        ReceiptBody::CallbackResult(result) => {
            // 5. Results are delivered to the account being resumed
            if result.info.receiver != receipt.receiver {
                return Err(ValidationError::CallbackReceiverMismatch {
                    receiver: receipt.receiver.clone(),
                    callback: result.info.receiver.clone(),
                });
            }
        }
        ReceiptBody::Refund(amount) => {
            if *amount == 0 {
                return Err(ValidationError::ZeroRefund);
            }
        }
        ReceiptBody::ManaAccounting(accounting) => {
            // 6. Accounting is addressed to the account that initiated the call
            if accounting.accounting_info.originator != receipt.receiver {
                return Err(ValidationError::AccountingReceiverMismatch {
                    expected: accounting.accounting_info.originator.clone(),
                    got: receipt.receiver.clone(),
                });
            }
            if accounting.total().is_none() {
                return Err(ValidationError::BudgetOverflow);
            }
        }
    }

    Ok(())
}
