//! The `std` import namespace: dynamic values, buffers, and dates

use crate::abi::StdError;
use crate::codec;
use crate::date;
use crate::host::HostState;
use crate::imports::{read_opt_string, read_string, write_bytes};
use crate::table::Resource;
use crate::value::Value;
use anyhow::Result;
use wasmtime::{Caller, Linker};

/// The byte form `buffer_len` / `read_buffer` agree on.
fn payload_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Some(bytes.clone()),
        Value::String(s) => Some(codec::encode(s)),
        Value::Array(items) => {
            let strings: Option<Vec<&String>> = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect();
            strings.map(|s| codec::encode(&s))
        }
        _ => None,
    }
}

pub fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap("std", "destroy", |mut caller: Caller<'_, HostState>, rid: i32| {
        caller.data_mut().table.destroy(rid);
    })?;

    linker.func_wrap(
        "std",
        "buffer_len",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            let state = caller.data_mut();
            let Some(value) = state.table.value(rid) else {
                return StdError::InvalidDescriptor.code();
            };
            match payload_bytes(value) {
                Some(bytes) => {
                    let len = bytes.len() as i32;
                    state.table.update(rid, Resource::Value(Value::Bytes(bytes)));
                    len
                }
                None => StdError::InvalidDescriptor.code(),
            }
        },
    )?;

    linker.func_wrap(
        "std",
        "read_buffer",
        |mut caller: Caller<'_, HostState>, rid: i32, ptr: i32, size: i32| -> i32 {
            let bytes = match caller.data().table.value(rid).and_then(payload_bytes) {
                Some(bytes) => bytes,
                None => return StdError::InvalidDescriptor.code(),
            };
            if size < 0 || size as usize > bytes.len() {
                return StdError::InvalidBufferSize.code();
            }
            if write_bytes(&mut caller, ptr, &bytes[..size as usize]) {
                0
            } else {
                StdError::FailedMemoryWrite.code()
            }
        },
    )?;

    linker.func_wrap(
        "std",
        "typeof",
        |caller: Caller<'_, HostState>, rid: i32| -> i32 {
            match caller.data().table.get(rid) {
                Some(Resource::Value(value)) => value.kind_code(),
                Some(_) => crate::value::kind::UNKNOWN,
                None => StdError::InvalidDescriptor.code(),
            }
        },
    )?;

    // Constructors.

    linker.func_wrap("std", "create_null", |mut caller: Caller<'_, HostState>| -> i32 {
        caller.data_mut().table.allocate_value(Value::Null)
    })?;

    linker.func_wrap(
        "std",
        "create_int",
        |mut caller: Caller<'_, HostState>, value: i64| -> i32 {
            caller.data_mut().table.allocate_value(Value::Int(value))
        },
    )?;

    linker.func_wrap(
        "std",
        "create_float",
        |mut caller: Caller<'_, HostState>, value: f64| -> i32 {
            caller.data_mut().table.allocate_value(Value::Float(value))
        },
    )?;

    linker.func_wrap(
        "std",
        "create_string",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> i32 {
            match read_string(&mut caller, ptr, len) {
                Some(text) => caller.data_mut().table.allocate_value(Value::String(text)),
                None => StdError::InvalidString.code(),
            }
        },
    )?;

    linker.func_wrap(
        "std",
        "create_bool",
        |mut caller: Caller<'_, HostState>, value: i32| -> i32 {
            caller
                .data_mut()
                .table
                .allocate_value(Value::Bool(value != 0))
        },
    )?;

    linker.func_wrap("std", "create_object", |mut caller: Caller<'_, HostState>| -> i32 {
        caller
            .data_mut()
            .table
            .allocate_value(Value::Object(Default::default()))
    })?;

    linker.func_wrap("std", "create_array", |mut caller: Caller<'_, HostState>| -> i32 {
        caller.data_mut().table.allocate_value(Value::Array(Vec::new()))
    })?;

    linker.func_wrap(
        "std",
        "create_date",
        |mut caller: Caller<'_, HostState>, seconds: f64| -> i32 {
            caller.data_mut().table.allocate_value(Value::Date(seconds))
        },
    )?;

    linker.func_wrap(
        "std",
        "copy",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            let state = caller.data_mut();
            match state.table.value(rid).cloned() {
                Some(value) => state.table.allocate_value(value),
                None => StdError::InvalidDescriptor.code(),
            }
        },
    )?;

    // Object operations.

    linker.func_wrap(
        "std",
        "object_len",
        |caller: Caller<'_, HostState>, rid: i32| -> i32 {
            match caller.data().table.value(rid) {
                Some(Value::Object(map)) => map.len() as i32,
                _ => StdError::InvalidDescriptor.code(),
            }
        },
    )?;

    linker.func_wrap(
        "std",
        "object_get",
        |mut caller: Caller<'_, HostState>, rid: i32, key_ptr: i32, key_len: i32| -> i32 {
            let Some(key) = read_string(&mut caller, key_ptr, key_len) else {
                return StdError::InvalidString.code();
            };
            let state = caller.data_mut();
            match state.table.value(rid) {
                Some(Value::Object(map)) => {
                    let member = map.get(&key).cloned().unwrap_or(Value::Null);
                    state.table.allocate_value(member)
                }
                _ => StdError::InvalidDescriptor.code(),
            }
        },
    )?;

    linker.func_wrap(
        "std",
        "object_set",
        |mut caller: Caller<'_, HostState>,
         rid: i32,
         key_ptr: i32,
         key_len: i32,
         value_rid: i32|
         -> i32 {
            let Some(key) = read_string(&mut caller, key_ptr, key_len) else {
                return StdError::InvalidString.code();
            };
            let state = caller.data_mut();
            let Some(value) = state.table.value(value_rid).cloned() else {
                return StdError::InvalidDescriptor.code();
            };
            if !matches!(state.table.value(rid), Some(Value::Object(_))) {
                return StdError::InvalidDescriptor.code();
            }
            state.table.retain_embedded(&value);
            let old = match state.table.value_mut(rid) {
                Some(Value::Object(map)) => map.insert(key, value),
                _ => None,
            };
            if let Some(old) = old {
                state.table.release_embedded(&old);
            }
            0
        },
    )?;

    linker.func_wrap(
        "std",
        "object_remove",
        |mut caller: Caller<'_, HostState>, rid: i32, key_ptr: i32, key_len: i32| -> i32 {
            let Some(key) = read_string(&mut caller, key_ptr, key_len) else {
                return StdError::InvalidString.code();
            };
            let state = caller.data_mut();
            let removed = match state.table.value_mut(rid) {
                Some(Value::Object(map)) => map.remove(&key),
                _ => return StdError::InvalidDescriptor.code(),
            };
            if let Some(removed) = removed {
                state.table.release_embedded(&removed);
            }
            0
        },
    )?;

    linker.func_wrap(
        "std",
        "object_keys",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            let state = caller.data_mut();
            match state.table.value(rid) {
                Some(Value::Object(map)) => {
                    let keys = map.keys().cloned().map(Value::String).collect();
                    state.table.allocate_value(Value::Array(keys))
                }
                _ => StdError::InvalidDescriptor.code(),
            }
        },
    )?;

    linker.func_wrap(
        "std",
        "object_values",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            let state = caller.data_mut();
            match state.table.value(rid) {
                Some(Value::Object(map)) => {
                    let members = map.values().cloned().collect();
                    state.table.allocate_value(Value::Array(members))
                }
                _ => StdError::InvalidDescriptor.code(),
            }
        },
    )?;

    // Array operations.

    linker.func_wrap(
        "std",
        "array_len",
        |caller: Caller<'_, HostState>, rid: i32| -> i32 {
            match caller.data().table.value(rid) {
                Some(Value::Array(items)) => items.len() as i32,
                _ => StdError::InvalidDescriptor.code(),
            }
        },
    )?;

    linker.func_wrap(
        "std",
        "array_get",
        |mut caller: Caller<'_, HostState>, rid: i32, index: i32| -> i32 {
            let state = caller.data_mut();
            match state.table.value(rid) {
                Some(Value::Array(items)) => match items.get(index.max(0) as usize).cloned() {
                    Some(member) => state.table.allocate_value(member),
                    None => StdError::InvalidDescriptor.code(),
                },
                _ => StdError::InvalidDescriptor.code(),
            }
        },
    )?;

    linker.func_wrap(
        "std",
        "array_set",
        |mut caller: Caller<'_, HostState>, rid: i32, index: i32, value_rid: i32| -> i32 {
            let state = caller.data_mut();
            let Some(value) = state.table.value(value_rid).cloned() else {
                return StdError::InvalidDescriptor.code();
            };
            let index = index.max(0) as usize;
            let in_range = matches!(
                state.table.value(rid),
                Some(Value::Array(items)) if index < items.len()
            );
            if !in_range {
                return StdError::InvalidDescriptor.code();
            }
            state.table.retain_embedded(&value);
            let old = match state.table.value_mut(rid) {
                Some(Value::Array(items)) => {
                    std::mem::replace(&mut items[index], value)
                }
                _ => return StdError::InvalidDescriptor.code(),
            };
            state.table.release_embedded(&old);
            0
        },
    )?;

    linker.func_wrap(
        "std",
        "array_append",
        |mut caller: Caller<'_, HostState>, rid: i32, value_rid: i32| -> i32 {
            let state = caller.data_mut();
            let Some(value) = state.table.value(value_rid).cloned() else {
                return StdError::InvalidDescriptor.code();
            };
            if !matches!(state.table.value(rid), Some(Value::Array(_))) {
                return StdError::InvalidDescriptor.code();
            }
            state.table.retain_embedded(&value);
            if let Some(Value::Array(items)) = state.table.value_mut(rid) {
                items.push(value);
            }
            0
        },
    )?;

    linker.func_wrap(
        "std",
        "array_remove",
        |mut caller: Caller<'_, HostState>, rid: i32, index: i32| -> i32 {
            let state = caller.data_mut();
            let removed = match state.table.value_mut(rid) {
                Some(Value::Array(items)) => {
                    let index = index.max(0) as usize;
                    if index < items.len() {
                        items.remove(index)
                    } else {
                        return StdError::InvalidDescriptor.code();
                    }
                }
                _ => return StdError::InvalidDescriptor.code(),
            };
            state.table.release_embedded(&removed);
            0
        },
    )?;

    // String and number readers.

    linker.func_wrap(
        "std",
        "string_len",
        |caller: Caller<'_, HostState>, rid: i32| -> i32 {
            match caller.data().table.value(rid).and_then(Value::to_display_string) {
                Some(text) => text.len() as i32,
                None => StdError::InvalidDescriptor.code(),
            }
        },
    )?;

    linker.func_wrap(
        "std",
        "read_string",
        |mut caller: Caller<'_, HostState>, rid: i32, ptr: i32, size: i32| -> i32 {
            let Some(text) = caller.data().table.value(rid).and_then(Value::to_display_string)
            else {
                return StdError::InvalidDescriptor.code();
            };
            if size < 0 || size as usize > text.len() {
                return StdError::InvalidBufferSize.code();
            }
            if write_bytes(&mut caller, ptr, &text.as_bytes()[..size as usize]) {
                0
            } else {
                StdError::FailedMemoryWrite.code()
            }
        },
    )?;

    linker.func_wrap(
        "std",
        "read_int",
        |caller: Caller<'_, HostState>, rid: i32| -> i64 {
            caller
                .data()
                .table
                .value(rid)
                .and_then(Value::as_int)
                .unwrap_or(-1)
        },
    )?;

    linker.func_wrap(
        "std",
        "read_float",
        |caller: Caller<'_, HostState>, rid: i32| -> f64 {
            caller
                .data()
                .table
                .value(rid)
                .and_then(Value::as_float)
                .unwrap_or(-1.0)
        },
    )?;

    linker.func_wrap(
        "std",
        "read_bool",
        |caller: Caller<'_, HostState>, rid: i32| -> i32 {
            caller
                .data()
                .table
                .value(rid)
                .and_then(Value::as_bool)
                .map(|b| b as i32)
                .unwrap_or(StdError::InvalidDescriptor.code())
        },
    )?;

    linker.func_wrap(
        "std",
        "read_date",
        |caller: Caller<'_, HostState>, rid: i32| -> f64 {
            caller
                .data()
                .table
                .value(rid)
                .and_then(Value::as_date)
                .unwrap_or(-1.0)
        },
    )?;

    linker.func_wrap(
        "std",
        "read_date_string",
        |mut caller: Caller<'_, HostState>,
         rid: i32,
         format_ptr: i32,
         format_len: i32,
         locale_ptr: i32,
         locale_len: i32,
         timezone_ptr: i32,
         timezone_len: i32|
         -> f64 {
            let format = read_opt_string(&mut caller, format_ptr, format_len);
            let locale = read_opt_string(&mut caller, locale_ptr, locale_len);
            let timezone = read_opt_string(&mut caller, timezone_ptr, timezone_len);
            let Some(text) = caller.data().table.value(rid).and_then(Value::to_display_string)
            else {
                return StdError::InvalidDescriptor.code() as f64;
            };
            match date::parse_date(
                &text,
                format.as_deref(),
                locale.as_deref(),
                timezone.as_deref(),
            ) {
                Some(seconds) => seconds as f64,
                None => StdError::InvalidDateString.code() as f64,
            }
        },
    )?;

    linker.func_wrap(
        "std",
        "parse_date",
        |mut caller: Caller<'_, HostState>,
         ptr: i32,
         len: i32,
         format_ptr: i32,
         format_len: i32,
         locale_ptr: i32,
         locale_len: i32,
         timezone_ptr: i32,
         timezone_len: i32|
         -> i64 {
            let Some(text) = read_string(&mut caller, ptr, len) else {
                return StdError::InvalidString.code() as i64;
            };
            let format = read_opt_string(&mut caller, format_ptr, format_len);
            let locale = read_opt_string(&mut caller, locale_ptr, locale_len);
            let timezone = read_opt_string(&mut caller, timezone_ptr, timezone_len);
            match date::parse_date(
                &text,
                format.as_deref(),
                locale.as_deref(),
                timezone.as_deref(),
            ) {
                Some(seconds) => seconds,
                None => StdError::InvalidDateString.code() as i64,
            }
        },
    )?;

    linker.func_wrap("std", "current_date", |_caller: Caller<'_, HostState>| -> f64 {
        date::current_date_seconds()
    })?;

    linker.func_wrap("std", "utc_offset", |_caller: Caller<'_, HostState>| -> i64 {
        date::utc_offset_seconds()
    })?;

    Ok(())
}
