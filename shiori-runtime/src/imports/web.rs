//! The `js` import namespace: sandboxed expression evaluation
//!
//! Webview functions exist as stubs returning negative errors; nothing in
//! this runtime renders web content.

use crate::abi::JsAbiError;
use crate::host::HostState;
use crate::imports::read_string;
use crate::js::JsContext;
use crate::table::Resource;
use crate::value::Value;
use anyhow::Result;
use wasmtime::{Caller, Linker};

pub fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap("js", "context_create", |mut caller: Caller<'_, HostState>| -> i32 {
        caller
            .data_mut()
            .table
            .allocate(Resource::JsContext(JsContext::new()))
    })?;

    linker.func_wrap(
        "js",
        "context_eval",
        |mut caller: Caller<'_, HostState>, rid: i32, ptr: i32, len: i32| -> i32 {
            let Some(source) = read_string(&mut caller, ptr, len) else {
                return JsAbiError::InvalidString.code();
            };
            let state = caller.data_mut();
            let result = match state.table.get_mut(rid) {
                Some(Resource::JsContext(context)) => context.eval(&source),
                _ => return JsAbiError::InvalidContext.code(),
            };
            match result {
                Ok(value) => state
                    .table
                    .allocate_value(Value::String(value.to_output_string())),
                Err(err) => {
                    tracing::debug!(source = %state.source_id, %err, "js eval failed");
                    JsAbiError::MissingResult.code()
                }
            }
        },
    )?;

    linker.func_wrap(
        "js",
        "context_get",
        |mut caller: Caller<'_, HostState>, rid: i32, name_ptr: i32, name_len: i32| -> i32 {
            let Some(name) = read_string(&mut caller, name_ptr, name_len) else {
                return JsAbiError::InvalidString.code();
            };
            let state = caller.data_mut();
            let value = match state.table.get(rid) {
                Some(Resource::JsContext(context)) => match context.get(&name) {
                    Some(value) => value.to_output_string(),
                    None => return JsAbiError::MissingResult.code(),
                },
                _ => return JsAbiError::InvalidContext.code(),
            };
            state.table.allocate_value(Value::String(value))
        },
    )?;

    // Webview stubs.
    linker.func_wrap("js", "webview_create", |_: Caller<'_, HostState>| -> i32 {
        JsAbiError::MissingResult.code()
    })?;
    linker.func_wrap(
        "js",
        "webview_load",
        |_: Caller<'_, HostState>, _rid: i32, _ptr: i32, _len: i32| -> i32 {
            JsAbiError::InvalidContext.code()
        },
    )?;
    linker.func_wrap(
        "js",
        "webview_load_html",
        |_: Caller<'_, HostState>, _rid: i32, _ptr: i32, _len: i32| -> i32 {
            JsAbiError::InvalidContext.code()
        },
    )?;
    linker.func_wrap(
        "js",
        "webview_eval",
        |_: Caller<'_, HostState>, _rid: i32, _ptr: i32, _len: i32| -> i32 {
            JsAbiError::InvalidContext.code()
        },
    )?;

    Ok(())
}
