//! Sample contracts for exercising the runtime.
//!
//! Values cross the contract boundary as little-endian `u64`.

use async_trait::async_trait;
use bytes::Bytes;

use mana_runtime::{CallContext, Contract, ContractError, ContractRegistry, HostResult};

/// Storage key of the counter value.
pub const COUNT_KEY: &[u8] = b"count";

/// Storage key of the fan-in total.
pub const TOTAL_KEY: &[u8] = b"total";

/// Mana each fan-out child call is given.
pub const CHILD_MANA: u64 = 20;

/// Mana reserved for the fan-in continuation.
pub const CONTINUATION_MANA: u64 = 50;

/// Encode a value for a contract boundary.
pub fn encode_u64(value: u64) -> Bytes {
    Bytes::copy_from_slice(&value.to_le_bytes())
}

/// Decode a value from a contract boundary.
pub fn decode_u64(bytes: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(bytes).ok().map(u64::from_le_bytes)
}

fn arg_u64(args: &[u8]) -> HostResult<u64> {
    decode_u64(args).ok_or_else(|| ContractError::Trap("expected a u64 argument".into()))
}

/// A counter with methods for steering mana consumption.
///
/// - `increment`: add one, return the new value
/// - `get`: return the value
/// - `spend(units)`: consume `units` of mana and succeed
/// - `burn(units)`: write the counter, consume `units`, then trap
/// - `exhaust`: consume mana until the budget runs out
#[derive(Debug, Clone, Copy, Default)]
pub struct Counter;

impl Counter {
    async fn read(ctx: &mut CallContext<'_, '_>) -> HostResult<u64> {
        let stored = ctx.storage_read(COUNT_KEY).await?;
        Ok(stored.as_deref().and_then(decode_u64).unwrap_or(0))
    }
}

#[async_trait]
impl Contract for Counter {
    async fn call(
        &self,
        ctx: &mut CallContext<'_, '_>,
        method: &str,
        args: &[u8],
    ) -> HostResult<Option<Bytes>> {
        match method {
            "increment" => {
                let next = Self::read(ctx).await?.saturating_add(1);
                ctx.storage_write(COUNT_KEY, next.to_le_bytes().to_vec())?;
                Ok(Some(encode_u64(next)))
            }
            "get" => Ok(Some(encode_u64(Self::read(ctx).await?))),
            "spend" => {
                ctx.charge(arg_u64(args)?)?;
                Ok(None)
            }
            "burn" => {
                ctx.storage_write(COUNT_KEY, 999u64.to_le_bytes().to_vec())?;
                ctx.charge(arg_u64(args)?)?;
                Err(ContractError::Trap("burned".into()))
            }
            "exhaust" => loop {
                ctx.charge(1)?;
            },
            other => Err(ContractError::MissingMethod(other.to_string())),
        }
    }
}

/// Calls several contracts and sums their results once all have answered.
///
/// - `fan_out(targets)`: `targets` is a comma-separated list of accounts,
///   each called with `increment`
/// - `reserve`: register a callback and attach nothing to it
///
/// The `sum` continuation stores the total under [`TOTAL_KEY`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FanOut;

#[async_trait]
impl Contract for FanOut {
    async fn call(
        &self,
        ctx: &mut CallContext<'_, '_>,
        method: &str,
        args: &[u8],
    ) -> HostResult<Option<Bytes>> {
        match method {
            "fan_out" => {
                let targets = std::str::from_utf8(args)
                    .map_err(|_| ContractError::Trap("targets are not utf-8".into()))?;
                let callback = ctx.create_callback("sum", CONTINUATION_MANA).await?;
                for target in targets.split(',').filter(|t| !t.is_empty()) {
                    ctx.call(target, "increment", Bytes::new(), 0, CHILD_MANA, Some(callback))
                        .await?;
                }
                Ok(None)
            }
            "reserve" => {
                ctx.create_callback("sum", CONTINUATION_MANA).await?;
                Ok(None)
            }
            other => Err(ContractError::MissingMethod(other.to_string())),
        }
    }

    async fn resume(
        &self,
        ctx: &mut CallContext<'_, '_>,
        continuation: &str,
        results: &[Option<Bytes>],
    ) -> HostResult<Option<Bytes>> {
        if continuation != "sum" {
            return Err(ContractError::MissingMethod(continuation.to_string()));
        }
        let total: u64 = results
            .iter()
            .map(|r| r.as_deref().and_then(decode_u64).unwrap_or(0))
            .fold(0, u64::saturating_add);
        ctx.storage_write(TOTAL_KEY, total.to_le_bytes().to_vec())?;
        Ok(Some(encode_u64(total)))
    }
}

/// Registry with [`Counter`] on `counter`, `counter-a` and `counter-b`, and
/// [`FanOut`] on `fanout`.
pub fn sample_registry() -> ContractRegistry {
    ContractRegistry::new()
        .with("counter", Counter)
        .with("counter-a", Counter)
        .with("counter-b", Counter)
        .with("fanout", FanOut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_boundary_encoding() {
        assert_eq!(decode_u64(&encode_u64(42)), Some(42));
        assert_eq!(decode_u64(b"short"), None);
    }
}
