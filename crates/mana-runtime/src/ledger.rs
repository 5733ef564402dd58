//! ManaLedger: reconciles settlement receipts against granted budgets.
//!
//! Every executed call stages a grant recording who paid for its mana. The
//! ManaAccounting receipt the call emits is settled against that grant here:
//! the refund goes back to the payer and the grant is consumed.

use mana_runtime_core::{AccountId, Mana, ManaAccounting, ReceiptTransaction};
use mana_runtime_store::GrantKind;
use tracing::{error, warn};

use crate::error::{Result, RuntimeError};
use crate::staging::Staging;

/// Result of settling a ManaAccounting receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// Account credited with the refund.
    pub payer: AccountId,
    pub refunded: Mana,
    /// Mana consumed by the call and removed from circulation.
    pub burnt: Mana,
}

/// Settles ManaAccounting receipts.
///
/// Mutations go through the staging overlay of the receipt being processed,
/// which runs under the account guards of the receiver and the payer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManaLedger;

impl ManaLedger {
    /// Settle `accounting`, carried by `receipt`.
    ///
    /// # Errors
    ///
    /// `GrantMismatch` if the grant at `(originator, nonce)` was made for a
    /// different receipt. `ManaOverrun` if `mana_refund + gas_used` exceeds
    /// the granted mana, or if no grant exists for the receipt (granted
    /// counts as zero). Nothing is staged in either case.
    pub async fn settle(
        &self,
        staging: &mut Staging<'_>,
        receipt: &ReceiptTransaction,
        accounting: &ManaAccounting,
    ) -> Result<Settlement> {
        let grant = staging.grant(&receipt.originator, receipt.nonce).await?;
        if let Some(grant) = &grant {
            if !grant.funds(GrantKind::Settlement, &receipt.compute_id()) {
                warn!(
                    originator = %receipt.originator,
                    nonce = receipt.nonce,
                    "settlement does not match its grant"
                );
                return Err(RuntimeError::GrantMismatch {
                    originator: receipt.originator.clone(),
                    nonce: receipt.nonce,
                });
            }
        }
        let granted = grant.as_ref().map_or(0, |g| g.mana);
        let reported = u128::from(accounting.mana_refund) + u128::from(accounting.gas_used);

        let grant = match grant {
            Some(grant) if reported <= u128::from(granted) => grant,
            _ => {
                error!(
                    originator = %receipt.originator,
                    nonce = receipt.nonce,
                    granted,
                    reported = %reported,
                    "mana overrun"
                );
                return Err(RuntimeError::ManaOverrun {
                    originator: receipt.originator.clone(),
                    nonce: receipt.nonce,
                    granted,
                    reported,
                });
            }
        };

        staging.credit(&grant.payer, accounting.mana_refund).await?;
        staging.delete_grant(&receipt.originator, receipt.nonce);

        Ok(Settlement {
            payer: grant.payer,
            refunded: accounting.mana_refund,
            burnt: accounting.gas_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mana_runtime_core::{AccountingInfo, ReceiptBody};
    use mana_runtime_store::{ManaGrant, MemoryStore};

    fn accounting_receipt(refund: Mana, used: Mana) -> (ReceiptTransaction, ManaAccounting) {
        let accounting = ManaAccounting {
            accounting_info: AccountingInfo {
                originator: AccountId::new("alice"),
                contract_id: Some(AccountId::new("counter")),
            },
            mana_refund: refund,
            gas_used: used,
        };
        let receipt = ReceiptTransaction::new(
            AccountId::new("counter"),
            AccountId::new("alice"),
            77,
            ReceiptBody::ManaAccounting(accounting.clone()),
        );
        (receipt, accounting)
    }

    fn grant(staging: &mut Staging<'_>, receipt: &ReceiptTransaction, mana: Mana) {
        staging.put_grant(
            &AccountId::new("counter"),
            77,
            ManaGrant {
                kind: GrantKind::Settlement,
                receipt: receipt.compute_id(),
                payer: AccountId::new("sponsor"),
                amount: 0,
                mana,
            },
        );
    }

    #[tokio::test]
    async fn test_refund_goes_to_payer() {
        let store = MemoryStore::new();
        let mut staging = Staging::new(&store);
        let (receipt, accounting) = accounting_receipt(20, 80);
        grant(&mut staging, &receipt, 100);

        let settlement = ManaLedger.settle(&mut staging, &receipt, &accounting).await.unwrap();

        assert_eq!(settlement.payer, AccountId::new("sponsor"));
        assert_eq!(settlement.refunded, 20);
        assert_eq!(settlement.burnt, 80);
        assert_eq!(staging.balance(&AccountId::new("sponsor")).await.unwrap(), 20);
        assert!(staging
            .grant(&AccountId::new("counter"), 77)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_overrun_is_rejected() {
        let store = MemoryStore::new();
        let mut staging = Staging::new(&store);
        let (receipt, accounting) = accounting_receipt(30, 80);
        grant(&mut staging, &receipt, 100);

        let err = ManaLedger
            .settle(&mut staging, &receipt, &accounting)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::ManaOverrun {
                granted: 100,
                reported: 110,
                ..
            }
        ));
        assert_eq!(staging.balance(&AccountId::new("sponsor")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_grant_is_overrun() {
        let store = MemoryStore::new();
        let mut staging = Staging::new(&store);

        let (receipt, accounting) = accounting_receipt(0, 0);
        let err = ManaLedger
            .settle(&mut staging, &receipt, &accounting)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ManaOverrun { granted: 0, .. }));
    }

    #[tokio::test]
    async fn test_grant_of_other_settlement_is_not_consumed() {
        let store = MemoryStore::new();
        let mut staging = Staging::new(&store);
        let (genuine, _) = accounting_receipt(20, 80);
        grant(&mut staging, &genuine, 100);

        // Same key, different content
        let (forged, accounting) = accounting_receipt(100, 0);
        let err = ManaLedger
            .settle(&mut staging, &forged, &accounting)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::GrantMismatch { nonce: 77, .. }));

        assert_eq!(staging.balance(&AccountId::new("sponsor")).await.unwrap(), 0);
        assert!(staging
            .grant(&AccountId::new("counter"), 77)
            .await
            .unwrap()
            .is_some());
    }
}
