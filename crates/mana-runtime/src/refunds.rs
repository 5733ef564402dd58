//! RefundIssuer: returns unspent balance.

use mana_runtime_core::{AccountingInfo, Balance};
use tracing::debug;

use crate::error::Result;
use crate::staging::Staging;

/// Credits refunds. Refunds are runtime-generated, so there is no
/// authorization step; exactly-once comes from the router's nonce guard.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefundIssuer;

impl RefundIssuer {
    /// Credit `amount` to `info.originator`, creating the account if needed.
    pub async fn issue(
        &self,
        staging: &mut Staging<'_>,
        amount: Balance,
        info: &AccountingInfo,
    ) -> Result<()> {
        staging.credit(&info.originator, amount).await?;
        debug!(account = %info.originator, amount, "refund credited");
        Ok(())
    }
}
