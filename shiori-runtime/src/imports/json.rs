//! The `json` import namespace: byte buffer to generic value

use crate::abi::StdError;
use crate::host::HostState;
use crate::imports::read_bytes;
use crate::value::Value;
use anyhow::Result;
use wasmtime::{Caller, Linker};

pub fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(
        "json",
        "parse",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> i32 {
            let Some(bytes) = read_bytes(&mut caller, ptr, len) else {
                return StdError::InvalidBufferSize.code();
            };
            match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(json) => caller.data_mut().table.allocate_value(Value::from_json(json)),
                Err(err) => {
                    tracing::debug!(%err, "json.parse failed");
                    StdError::InvalidString.code()
                }
            }
        },
    )?;
    Ok(())
}
