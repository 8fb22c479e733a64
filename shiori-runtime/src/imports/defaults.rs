//! The `defaults` import namespace: key/value settings
//!
//! `get` encodes whatever the injected store returns into postcard bytes
//! the plugin interprets through its own reader; `set` reads a value back
//! from plugin memory using an explicit kind tag. Persistence lives in
//! the collaborator, not here.

use crate::abi::StdError;
use crate::bridge::SettingValue;
use crate::codec;
use crate::host::HostState;
use crate::imports::{read_bytes, read_string};
use crate::value::Value;
use anyhow::Result;
use wasmtime::{Caller, Linker};

/// Kind tags for `defaults.set`.
const KIND_DATA: i32 = 0;
const KIND_BOOL: i32 = 1;
const KIND_INT: i32 = 2;
const KIND_FLOAT: i32 = 3;
const KIND_STRING: i32 = 4;
const KIND_STRING_ARRAY: i32 = 5;
const KIND_NULL: i32 = 6;

/// Postcard byte form of a settings value as the plugin reads it.
pub(crate) fn encode_setting(value: &SettingValue) -> Vec<u8> {
    match value {
        SettingValue::Null => Vec::new(),
        SettingValue::Bool(b) => codec::encode(b),
        SettingValue::Int(i) => codec::encode(i),
        SettingValue::Float(f) => codec::encode(f),
        SettingValue::String(s) => codec::encode(s),
        SettingValue::StringArray(items) => codec::encode(items),
        SettingValue::Data(bytes) => bytes.clone(),
    }
}

fn decode_setting(kind: i32, bytes: &[u8]) -> Option<SettingValue> {
    match kind {
        KIND_DATA => Some(SettingValue::Data(bytes.to_vec())),
        KIND_BOOL => postcard::from_bytes(bytes).ok().map(SettingValue::Bool),
        KIND_INT => postcard::from_bytes(bytes).ok().map(SettingValue::Int),
        KIND_FLOAT => postcard::from_bytes(bytes).ok().map(SettingValue::Float),
        KIND_STRING => postcard::from_bytes(bytes).ok().map(SettingValue::String),
        KIND_STRING_ARRAY => postcard::from_bytes(bytes)
            .ok()
            .map(SettingValue::StringArray),
        KIND_NULL => Some(SettingValue::Null),
        _ => None,
    }
}

pub fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(
        "defaults",
        "get",
        |mut caller: Caller<'_, HostState>, key_ptr: i32, key_len: i32| -> i32 {
            let Some(key) = read_string(&mut caller, key_ptr, key_len) else {
                return StdError::InvalidString.code();
            };
            let state = caller.data_mut();
            let value = state.settings.get(&key);
            let bytes = encode_setting(&value);
            state.table.allocate_value(Value::Bytes(bytes))
        },
    )?;

    linker.func_wrap(
        "defaults",
        "set",
        |mut caller: Caller<'_, HostState>,
         key_ptr: i32,
         key_len: i32,
         kind: i32,
         value_ptr: i32,
         value_len: i32|
         -> i32 {
            let Some(key) = read_string(&mut caller, key_ptr, key_len) else {
                return StdError::InvalidString.code();
            };
            let bytes = if value_len > 0 {
                match read_bytes(&mut caller, value_ptr, value_len) {
                    Some(bytes) => bytes,
                    None => return StdError::InvalidBufferSize.code(),
                }
            } else {
                Vec::new()
            };
            let Some(value) = decode_setting(kind, &bytes) else {
                return StdError::InvalidString.code();
            };
            caller.data_mut().settings.set(&key, value);
            0
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting_encoding_table() {
        assert!(encode_setting(&SettingValue::Null).is_empty());
        assert_eq!(encode_setting(&SettingValue::Bool(true)), vec![1]);
        // zigzag(-2) == 3
        assert_eq!(encode_setting(&SettingValue::Int(-2)), vec![3]);
        assert_eq!(
            encode_setting(&SettingValue::String("ab".into())),
            vec![2, b'a', b'b']
        );
        assert_eq!(
            encode_setting(&SettingValue::Float(1.0)),
            1.0f32.to_le_bytes().to_vec()
        );
    }

    #[test]
    fn test_setting_decode_roundtrip() {
        for value in [
            SettingValue::Bool(true),
            SettingValue::Int(42),
            SettingValue::Float(2.5),
            SettingValue::String("hello".into()),
            SettingValue::StringArray(vec!["a".into(), "b".into()]),
        ] {
            let kind = match value {
                SettingValue::Bool(_) => KIND_BOOL,
                SettingValue::Int(_) => KIND_INT,
                SettingValue::Float(_) => KIND_FLOAT,
                SettingValue::String(_) => KIND_STRING,
                SettingValue::StringArray(_) => KIND_STRING_ARRAY,
                _ => unreachable!(),
            };
            let bytes = encode_setting(&value);
            assert_eq!(decode_setting(kind, &bytes), Some(value));
        }
        assert_eq!(decode_setting(KIND_NULL, &[]), Some(SettingValue::Null));
        assert_eq!(decode_setting(99, &[]), None);
    }
}
