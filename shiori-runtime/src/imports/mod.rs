//! Import namespaces provided to plugins
//!
//! Each submodule registers one wasm import namespace on the linker.
//! Trampolines never unwind into the guest: every failure becomes a
//! negative return code, except `env.abort` which is the one deliberate
//! trap.

use crate::host::HostState;
use anyhow::Result;
use wasmtime::{Caller, Extern, Linker, Memory};

pub mod canvas;
pub mod defaults;
pub mod env;
pub mod html;
pub mod json;
pub mod net;
pub mod values;
pub mod web;

/// Register every namespace on the linker.
pub fn register_all(linker: &mut Linker<HostState>) -> Result<()> {
    values::register(linker)?;
    net::register(linker)?;
    html::register(linker)?;
    json::register(linker)?;
    defaults::register(linker)?;
    env::register(linker)?;
    canvas::register(linker)?;
    web::register(linker)?;
    Ok(())
}

pub(crate) fn memory_of(caller: &mut Caller<'_, HostState>) -> Option<Memory> {
    match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => Some(memory),
        _ => None,
    }
}

/// Copy `len` bytes out of plugin memory.
pub(crate) fn read_bytes(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> Option<Vec<u8>> {
    if ptr < 0 || len < 0 {
        return None;
    }
    let memory = memory_of(caller)?;
    let data = memory.data(&caller);
    let start = ptr as usize;
    let end = start.checked_add(len as usize)?;
    if end > data.len() {
        return None;
    }
    Some(data[start..end].to_vec())
}

/// Read a UTF-8 string out of plugin memory.
pub(crate) fn read_string(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> Option<String> {
    let bytes = read_bytes(caller, ptr, len)?;
    String::from_utf8(bytes).ok()
}

/// Read an optional string: a non-positive pointer means absent.
pub(crate) fn read_opt_string(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> Option<String> {
    if ptr <= 0 || len < 0 {
        return None;
    }
    read_string(caller, ptr, len)
}

/// Write bytes into plugin memory. Returns false on out-of-bounds.
pub(crate) fn write_bytes(caller: &mut Caller<'_, HostState>, ptr: i32, bytes: &[u8]) -> bool {
    if ptr < 0 {
        return false;
    }
    let Some(memory) = memory_of(caller) else {
        return false;
    };
    memory.write(caller, ptr as usize, bytes).is_ok()
}
