//! Payer resolution.
//!
//! Decides which account funds a user-originated call and whether the
//! originator's key allowance is drawn down alongside the balance.

use mana_runtime_core::{AccessKey, AccountId};

/// Where the budget of a call comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingSource {
    /// Account whose balance is debited and later refunded.
    pub payer: AccountId,
    /// Whether the originator's key allowance is decremented too.
    pub draws_allowance: bool,
}

/// Resolve the funding source for a call originated by `originator`.
///
/// - No key: the originator pays from its own balance.
/// - Delegated key: the `balance_owner` pays; its balance is the limit.
/// - Limited key: the originator pays and the key allowance is drawn down.
pub fn funding_source(originator: &AccountId, key: Option<&AccessKey>) -> FundingSource {
    match key {
        None => FundingSource {
            payer: originator.clone(),
            draws_allowance: false,
        },
        Some(AccessKey {
            balance_owner: Some(owner),
            ..
        }) => FundingSource {
            payer: owner.clone(),
            draws_allowance: false,
        },
        Some(_) => FundingSource {
            payer: originator.clone(),
            draws_allowance: true,
        },
    }
}
