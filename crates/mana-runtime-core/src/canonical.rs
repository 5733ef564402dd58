//! Canonical CBOR encoding for wire messages.
//!
//! Every message is a CBOR map with small integer keys (the field numbers
//! in [`keys`]). The encoding follows RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//!
//! Optional fields that are absent are omitted from the map. A present but
//! empty value is encoded as an empty string, so absence and emptiness stay
//! distinguishable. Decoding re-encodes the parsed value and rejects input
//! that is not byte-identical, which keeps receipt ids stable across nodes.

use bytes::Bytes;
use ciborium::value::Value;

use crate::access_key::AccessKey;
use crate::error::CoreError;
use crate::receipt::{
    AccountingInfo, AsyncCall, CallbackInfo, CallbackResult, ManaAccounting, ReceiptBody,
    ReceiptTransaction,
};
use crate::types::{AccountId, CallbackId};

/// Field numbers. Keys 0-23 encode as single bytes in CBOR.
pub mod keys {
    pub mod access_key {
        pub const AMOUNT: u64 = 1;
        pub const BALANCE_OWNER: u64 = 2;
        pub const CONTRACT_ID: u64 = 3;
        pub const METHOD_NAME: u64 = 4;
    }

    pub mod accounting_info {
        pub const ORIGINATOR: u64 = 1;
        pub const CONTRACT_ID: u64 = 2;
    }

    pub mod callback_info {
        pub const ID: u64 = 1;
        pub const RESULT_INDEX: u64 = 2;
        pub const RECEIVER: u64 = 3;
    }

    pub mod async_call {
        pub const AMOUNT: u64 = 1;
        pub const MANA: u64 = 2;
        pub const METHOD_NAME: u64 = 3;
        pub const ARGS: u64 = 4;
        pub const CALLBACK: u64 = 5;
        pub const ACCOUNTING_INFO: u64 = 6;
    }

    pub mod callback_result {
        pub const INFO: u64 = 1;
        pub const RESULT: u64 = 2;
    }

    pub mod mana_accounting {
        pub const ACCOUNTING_INFO: u64 = 1;
        pub const MANA_REFUND: u64 = 2;
        pub const GAS_USED: u64 = 3;
    }

    pub mod receipt {
        pub const ORIGINATOR: u64 = 1;
        pub const RECEIVER: u64 = 2;
        pub const NONCE: u64 = 3;
        pub const NEW_CALL: u64 = 4;
        pub const CALLBACK: u64 = 5;
        pub const REFUND: u64 = 6;
        pub const MANA_ACCOUNTING: u64 = 7;
    }
}

/// Encode a receipt to canonical bytes.
pub fn canonical_bytes(receipt: &ReceiptTransaction) -> Vec<u8> {
    encode_cbor_value_canonical(&receipt_to_value(receipt))
}

/// Encode an access key to canonical bytes.
pub fn access_key_bytes(key: &AccessKey) -> Vec<u8> {
    encode_cbor_value_canonical(&access_key_to_value(key))
}

/// Decode a receipt from canonical bytes.
pub fn decode_receipt(bytes: &[u8]) -> Result<ReceiptTransaction, CoreError> {
    let value = read_value(bytes)?;
    let receipt = value_to_receipt(&value)?;
    if canonical_bytes(&receipt) != bytes {
        return Err(CoreError::NonCanonical);
    }
    Ok(receipt)
}

/// Decode an access key from canonical bytes.
///
/// Keys with a method restriction but no contract restriction are rejected.
pub fn decode_access_key(bytes: &[u8]) -> Result<AccessKey, CoreError> {
    let value = read_value(bytes)?;
    let key = value_to_access_key(&value)?;
    if access_key_bytes(&key) != bytes {
        return Err(CoreError::NonCanonical);
    }
    key.validate()?;
    Ok(key)
}

// ─────────────────────────────────────────────────────────────────────────────
// Message -> Value
// ─────────────────────────────────────────────────────────────────────────────

fn entry(key: u64, value: Value) -> (Value, Value) {
    (Value::Integer(key.into()), value)
}

fn uint(n: u64) -> Value {
    Value::Integer(n.into())
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn access_key_to_value(key: &AccessKey) -> Value {
    use keys::access_key::*;

    let mut entries = vec![entry(AMOUNT, uint(key.amount))];
    if let Some(owner) = &key.balance_owner {
        entries.push(entry(BALANCE_OWNER, text(owner.as_str())));
    }
    if let Some(contract) = &key.contract_id {
        entries.push(entry(CONTRACT_ID, text(contract.as_str())));
    }
    if let Some(method) = &key.method_name {
        entries.push(entry(METHOD_NAME, text(method)));
    }
    Value::Map(entries)
}

fn accounting_info_to_value(info: &AccountingInfo) -> Value {
    use keys::accounting_info::*;

    let mut entries = vec![entry(ORIGINATOR, text(info.originator.as_str()))];
    if let Some(contract) = &info.contract_id {
        entries.push(entry(CONTRACT_ID, text(contract.as_str())));
    }
    Value::Map(entries)
}

fn callback_info_to_value(info: &CallbackInfo) -> Value {
    use keys::callback_info::*;

    Value::Map(vec![
        entry(ID, Value::Bytes(info.id.0.to_vec())),
        entry(RESULT_INDEX, uint(info.result_index.into())),
        entry(RECEIVER, text(info.receiver.as_str())),
    ])
}

fn async_call_to_value(call: &AsyncCall) -> Value {
    use keys::async_call::*;

    let mut entries = vec![
        entry(AMOUNT, uint(call.amount)),
        entry(MANA, uint(call.mana)),
        entry(METHOD_NAME, text(&call.method_name)),
        entry(ARGS, Value::Bytes(call.args.to_vec())),
    ];
    if let Some(callback) = &call.callback {
        entries.push(entry(CALLBACK, callback_info_to_value(callback)));
    }
    entries.push(entry(ACCOUNTING_INFO, accounting_info_to_value(&call.accounting_info)));
    Value::Map(entries)
}

fn callback_result_to_value(result: &CallbackResult) -> Value {
    use keys::callback_result::*;

    let mut entries = vec![entry(INFO, callback_info_to_value(&result.info))];
    if let Some(bytes) = &result.result {
        entries.push(entry(RESULT, Value::Bytes(bytes.to_vec())));
    }
    Value::Map(entries)
}

fn mana_accounting_to_value(accounting: &ManaAccounting) -> Value {
    use keys::mana_accounting::*;

    Value::Map(vec![
        entry(ACCOUNTING_INFO, accounting_info_to_value(&accounting.accounting_info)),
        entry(MANA_REFUND, uint(accounting.mana_refund)),
        entry(GAS_USED, uint(accounting.gas_used)),
    ])
}

fn receipt_to_value(receipt: &ReceiptTransaction) -> Value {
    use keys::receipt::*;

    let body = match &receipt.body {
        ReceiptBody::AsyncCall(call) => entry(NEW_CALL, async_call_to_value(call)),
        ReceiptBody::CallbackResult(result) => entry(CALLBACK, callback_result_to_value(result)),
        ReceiptBody::Refund(amount) => entry(REFUND, uint(*amount)),
        ReceiptBody::ManaAccounting(accounting) => {
            entry(MANA_ACCOUNTING, mana_accounting_to_value(accounting))
        }
    };

    Value::Map(vec![
        entry(ORIGINATOR, text(receipt.originator.as_str())),
        entry(RECEIVER, text(receipt.receiver.as_str())),
        entry(NONCE, uint(receipt.nonce)),
        body,
    ])
}

// ─────────────────────────────────────────────────────────────────────────────
// Canonical writer
// ─────────────────────────────────────────────────────────────────────────────

/// Encode a CBOR Value to canonical bytes.
fn encode_cbor_value_canonical(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

/// Recursively encode a CBOR value.
///
/// Only the value types produced by this module are supported.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => {
            encode_uint(buf, 4, arr.len() as u64);
            for item in arr {
                encode_value_to(buf, item);
            }
        }
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        _ => unreachable!("wire messages never contain floats or tags"),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a byte string (major type 2).
fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut key_value_pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();

    key_value_pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, key_value_pairs.len() as u64);
    for (key_bytes, value) in key_value_pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value -> Message
// ─────────────────────────────────────────────────────────────────────────────

fn read_value(bytes: &[u8]) -> Result<Value, CoreError> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
}

/// A decoded CBOR map with integer keys.
struct Fields<'a> {
    message: &'static str,
    entries: &'a [(Value, Value)],
}

impl<'a> Fields<'a> {
    fn new(
        message: &'static str,
        value: &'a Value,
        known: &[u64],
        malformed: fn(String) -> CoreError,
    ) -> Result<Self, CoreError> {
        let entries = match value {
            Value::Map(m) => m.as_slice(),
            _ => return Err(malformed(format!("{message}: expected map"))),
        };
        for (k, _) in entries {
            let known_key = match k {
                Value::Integer(i) => u64::try_from(*i).map(|n| known.contains(&n)).unwrap_or(false),
                _ => false,
            };
            if !known_key {
                return Err(malformed(format!("{message}: unknown field {k:?}")));
            }
        }
        Ok(Self { message, entries })
    }

    fn get(&self, key: u64) -> Option<&'a Value> {
        let wanted = Value::Integer(key.into());
        self.entries.iter().find(|(k, _)| *k == wanted).map(|(_, v)| v)
    }

    fn required(&self, key: u64, name: &str) -> Result<&'a Value, CoreError> {
        self.get(key)
            .ok_or_else(|| CoreError::MalformedReceipt(format!("{}: missing {name}", self.message)))
    }
}

fn as_u64(value: &Value, name: &str) -> Result<u64, CoreError> {
    match value {
        Value::Integer(i) => u64::try_from(*i)
            .map_err(|_| CoreError::MalformedReceipt(format!("{name}: out of range"))),
        _ => Err(CoreError::MalformedReceipt(format!("{name}: expected unsigned integer"))),
    }
}

fn as_text(value: &Value, name: &str) -> Result<String, CoreError> {
    match value {
        Value::Text(s) => Ok(s.clone()),
        _ => Err(CoreError::MalformedReceipt(format!("{name}: expected text"))),
    }
}

fn as_bytes(value: &Value, name: &str) -> Result<Bytes, CoreError> {
    match value {
        Value::Bytes(b) => Ok(Bytes::from(b.clone())),
        _ => Err(CoreError::MalformedReceipt(format!("{name}: expected bytes"))),
    }
}

fn value_to_access_key(value: &Value) -> Result<AccessKey, CoreError> {
    use keys::access_key::*;

    let fields = Fields::new(
        "access key",
        value,
        &[AMOUNT, BALANCE_OWNER, CONTRACT_ID, METHOD_NAME],
        CoreError::MalformedAccessKey,
    )?;
    let text_field = |key: u64, name: &str| -> Result<Option<String>, CoreError> {
        fields
            .get(key)
            .map(|v| match v {
                Value::Text(s) => Ok(s.clone()),
                _ => Err(CoreError::MalformedAccessKey(format!("{name}: expected text"))),
            })
            .transpose()
    };

    let amount = match fields.get(AMOUNT) {
        Some(Value::Integer(i)) => u64::try_from(*i)
            .map_err(|_| CoreError::MalformedAccessKey("amount: out of range".into()))?,
        _ => return Err(CoreError::MalformedAccessKey("missing amount".into())),
    };

    Ok(AccessKey {
        amount,
        balance_owner: text_field(BALANCE_OWNER, "balance_owner")?.map(AccountId::new),
        contract_id: text_field(CONTRACT_ID, "contract_id")?.map(AccountId::new),
        method_name: text_field(METHOD_NAME, "method_name")?,
    })
}

fn value_to_accounting_info(value: &Value) -> Result<AccountingInfo, CoreError> {
    use keys::accounting_info::*;

    let fields = Fields::new(
        "accounting info",
        value,
        &[ORIGINATOR, CONTRACT_ID],
        CoreError::MalformedReceipt,
    )?;
    Ok(AccountingInfo {
        originator: AccountId::new(as_text(fields.required(ORIGINATOR, "originator")?, "originator")?),
        contract_id: fields
            .get(CONTRACT_ID)
            .map(|v| as_text(v, "contract_id").map(AccountId::new))
            .transpose()?,
    })
}

fn value_to_callback_info(value: &Value) -> Result<CallbackInfo, CoreError> {
    use keys::callback_info::*;

    let fields = Fields::new(
        "callback info",
        value,
        &[ID, RESULT_INDEX, RECEIVER],
        CoreError::MalformedReceipt,
    )?;
    let id = match fields.required(ID, "id")? {
        Value::Bytes(b) if b.len() == 32 => {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(b);
            CallbackId(arr)
        }
        _ => return Err(CoreError::MalformedReceipt("callback id: expected 32 bytes".into())),
    };
    let result_index = as_u64(fields.required(RESULT_INDEX, "result_index")?, "result_index")?;
    let result_index = u32::try_from(result_index)
        .map_err(|_| CoreError::MalformedReceipt("result_index: out of range".into()))?;

    Ok(CallbackInfo {
        id,
        result_index,
        receiver: AccountId::new(as_text(fields.required(RECEIVER, "receiver")?, "receiver")?),
    })
}

fn value_to_async_call(value: &Value) -> Result<AsyncCall, CoreError> {
    use keys::async_call::*;

    let fields = Fields::new(
        "async call",
        value,
        &[AMOUNT, MANA, METHOD_NAME, ARGS, CALLBACK, ACCOUNTING_INFO],
        CoreError::MalformedReceipt,
    )?;
    Ok(AsyncCall {
        amount: as_u64(fields.required(AMOUNT, "amount")?, "amount")?,
        mana: as_u64(fields.required(MANA, "mana")?, "mana")?,
        method_name: as_text(fields.required(METHOD_NAME, "method_name")?, "method_name")?,
        args: as_bytes(fields.required(ARGS, "args")?, "args")?,
        callback: fields.get(CALLBACK).map(value_to_callback_info).transpose()?,
        accounting_info: value_to_accounting_info(
            fields.required(ACCOUNTING_INFO, "accounting_info")?,
        )?,
    })
}

fn value_to_callback_result(value: &Value) -> Result<CallbackResult, CoreError> {
    use keys::callback_result::*;

    let fields = Fields::new("callback result", value, &[INFO, RESULT], CoreError::MalformedReceipt)?;
    Ok(CallbackResult {
        info: value_to_callback_info(fields.required(INFO, "info")?)?,
        result: fields.get(RESULT).map(|v| as_bytes(v, "result")).transpose()?,
    })
}

fn value_to_mana_accounting(value: &Value) -> Result<ManaAccounting, CoreError> {
    use keys::mana_accounting::*;

    let fields = Fields::new(
        "mana accounting",
        value,
        &[ACCOUNTING_INFO, MANA_REFUND, GAS_USED],
        CoreError::MalformedReceipt,
    )?;
    Ok(ManaAccounting {
        accounting_info: value_to_accounting_info(
            fields.required(ACCOUNTING_INFO, "accounting_info")?,
        )?,
        mana_refund: as_u64(fields.required(MANA_REFUND, "mana_refund")?, "mana_refund")?,
        gas_used: as_u64(fields.required(GAS_USED, "gas_used")?, "gas_used")?,
    })
}

fn value_to_receipt(value: &Value) -> Result<ReceiptTransaction, CoreError> {
    use keys::receipt::*;

    let fields = Fields::new(
        "receipt",
        value,
        &[ORIGINATOR, RECEIVER, NONCE, NEW_CALL, CALLBACK, REFUND, MANA_ACCOUNTING],
        CoreError::MalformedReceipt,
    )?;

    let branches: Vec<u64> = [NEW_CALL, CALLBACK, REFUND, MANA_ACCOUNTING]
        .into_iter()
        .filter(|key| fields.get(*key).is_some())
        .collect();
    let body = match branches.as_slice() {
        [NEW_CALL] => ReceiptBody::AsyncCall(value_to_async_call(fields.required(NEW_CALL, "new_call")?)?),
        [CALLBACK] => ReceiptBody::CallbackResult(value_to_callback_result(
            fields.required(CALLBACK, "callback")?,
        )?),
        [REFUND] => ReceiptBody::Refund(as_u64(fields.required(REFUND, "refund")?, "refund")?),
        [MANA_ACCOUNTING] => ReceiptBody::ManaAccounting(value_to_mana_accounting(
            fields.required(MANA_ACCOUNTING, "mana_accounting")?,
        )?),
        [] => return Err(CoreError::MalformedReceipt("receipt has no body".into())),
        _ => {
            return Err(CoreError::MalformedReceipt(format!(
                "receipt populates {} body branches",
                branches.len()
            )))
        }
    };

    Ok(ReceiptTransaction {
        originator: AccountId::new(as_text(fields.required(ORIGINATOR, "originator")?, "originator")?),
        receiver: AccountId::new(as_text(fields.required(RECEIVER, "receiver")?, "receiver")?),
        nonce: as_u64(fields.required(NONCE, "nonce")?, "nonce")?,
        body,
    })
}
