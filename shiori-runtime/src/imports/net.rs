//! The `net` import namespace: request building, synchronous send, and
//! response inspection

use crate::abi::NetError;
use crate::canvas::CanvasImage;
use crate::host::HostState;
use crate::html::HtmlDocument;
use crate::imports::{read_string, write_bytes};
use crate::net::RequestState;
use crate::table::Resource;
use crate::value::Value;
use anyhow::Result;
use wasmtime::{Caller, Linker};

fn request_mut<'a>(state: &'a mut HostState, rid: i32) -> Result<&'a mut RequestState, NetError> {
    match state.table.get_mut(rid) {
        Some(Resource::Request(request)) => Ok(request),
        Some(_) | None => Err(NetError::InvalidDescriptor),
    }
}

fn send_one(state: &mut HostState, rid: i32) -> Result<(), NetError> {
    let HostState {
        table,
        jar,
        bridge,
        ..
    } = state;
    let request = match table.get_mut(rid) {
        Some(Resource::Request(request)) => request,
        _ => return Err(NetError::InvalidDescriptor),
    };
    request.send(bridge.as_ref(), jar)
}

pub fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(
        "net",
        "init",
        |mut caller: Caller<'_, HostState>, method: i32| -> i32 {
            let state = caller.data_mut();
            let request = RequestState::new(method, &state.limits.default_user_agent);
            state.table.allocate(Resource::Request(request))
        },
    )?;

    linker.func_wrap(
        "net",
        "set_url",
        |mut caller: Caller<'_, HostState>, rid: i32, ptr: i32, len: i32| -> i32 {
            let Some(url) = read_string(&mut caller, ptr, len) else {
                return NetError::InvalidString.code();
            };
            match request_mut(caller.data_mut(), rid) {
                Ok(request) => match request.set_url(&url) {
                    Ok(()) => 0,
                    Err(err) => err.code(),
                },
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "net",
        "set_header",
        |mut caller: Caller<'_, HostState>,
         rid: i32,
         key_ptr: i32,
         key_len: i32,
         value_ptr: i32,
         value_len: i32|
         -> i32 {
            let (Some(key), Some(value)) = (
                read_string(&mut caller, key_ptr, key_len),
                read_string(&mut caller, value_ptr, value_len),
            ) else {
                return NetError::InvalidString.code();
            };
            match request_mut(caller.data_mut(), rid) {
                Ok(request) => {
                    request.set_header(&key, &value);
                    0
                }
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "net",
        "set_body",
        |mut caller: Caller<'_, HostState>, rid: i32, ptr: i32, len: i32| -> i32 {
            let Some(body) = crate::imports::read_bytes(&mut caller, ptr, len) else {
                return NetError::InvalidBufferSize.code();
            };
            match request_mut(caller.data_mut(), rid) {
                Ok(request) => {
                    request.body = Some(body);
                    0
                }
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "net",
        "send",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            match send_one(caller.data_mut(), rid) {
                Ok(()) => 0,
                Err(err) => err.code(),
            }
        },
    )?;

    // Sequential batch send. Per-request error codes are written back over
    // the same i32 array.
    linker.func_wrap(
        "net",
        "send_all",
        |mut caller: Caller<'_, HostState>, ptr: i32, count: i32| -> i32 {
            let Some(byte_len) = count.checked_mul(4).filter(|len| *len >= 0) else {
                return NetError::InvalidBufferSize.code();
            };
            let Some(bytes) = crate::imports::read_bytes(&mut caller, ptr, byte_len) else {
                return NetError::InvalidBufferSize.code();
            };
            let rids: Vec<i32> = bytes
                .chunks_exact(4)
                .map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap()))
                .collect();
            let mut codes = Vec::with_capacity(rids.len());
            for rid in rids {
                let code = match send_one(caller.data_mut(), rid) {
                    Ok(()) => 0,
                    Err(err) => err.code(),
                };
                codes.push(code);
            }
            let out: Vec<u8> = codes.iter().flat_map(|c| c.to_le_bytes()).collect();
            if write_bytes(&mut caller, ptr, &out) {
                0
            } else {
                NetError::FailedMemoryWrite.code()
            }
        },
    )?;

    // Response inspection.

    linker.func_wrap(
        "net",
        "data_len",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            match request_mut(caller.data_mut(), rid).and_then(|r| r.response()) {
                Ok(response) => response.remaining() as i32,
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "net",
        "read_data",
        |mut caller: Caller<'_, HostState>, rid: i32, ptr: i32, size: i32| -> i32 {
            let chunk = {
                let response = match request_mut(caller.data_mut(), rid)
                    .and_then(|r| r.response_mut())
                {
                    Ok(response) => response,
                    Err(err) => return err.code(),
                };
                if size < 0 || size as usize > response.remaining() {
                    return NetError::InvalidBufferSize.code();
                }
                let start = response.bytes_read;
                response.bytes_read += size as usize;
                response.body[start..start + size as usize].to_vec()
            };
            if write_bytes(&mut caller, ptr, &chunk) {
                0
            } else {
                NetError::FailedMemoryWrite.code()
            }
        },
    )?;

    linker.func_wrap(
        "net",
        "get_status_code",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            match request_mut(caller.data_mut(), rid).and_then(|r| r.response()) {
                Ok(response) => response.status as i32,
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "net",
        "get_header",
        |mut caller: Caller<'_, HostState>, rid: i32, key_ptr: i32, key_len: i32| -> i32 {
            let Some(key) = read_string(&mut caller, key_ptr, key_len) else {
                return NetError::InvalidString.code();
            };
            let state = caller.data_mut();
            let value = match request_mut(state, rid).and_then(|r| r.response()) {
                Ok(response) => response.headers.get(&key.to_ascii_lowercase()).cloned(),
                Err(err) => return err.code(),
            };
            match value {
                Some(value) => caller.data_mut().table.allocate_value(Value::String(value)),
                None => NetError::MissingData.code(),
            }
        },
    )?;

    linker.func_wrap(
        "net",
        "get_image",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            let state = caller.data_mut();
            let body = match request_mut(state, rid).and_then(|r| r.response()) {
                Ok(response) => response.body.clone(),
                Err(err) => return err.code(),
            };
            match CanvasImage::decode(&body) {
                Ok(image) => state.table.allocate(Resource::Image(image)),
                Err(_) => NetError::NotAnImage.code(),
            }
        },
    )?;

    // Parse the response body as HTML, with the request url as base URI.
    linker.func_wrap(
        "net",
        "html",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            let state = caller.data_mut();
            let (body, base) = {
                let request = match request_mut(state, rid) {
                    Ok(request) => request,
                    Err(err) => return err.code(),
                };
                let base = request.url.as_ref().map(|u| u.to_string());
                match request.response() {
                    Ok(response) => (response.body.clone(), base),
                    Err(err) => return err.code(),
                }
            };
            let text = String::from_utf8_lossy(&body);
            let document = HtmlDocument::parse(&text, base.as_deref());
            state
                .table
                .allocate_value(Value::Document(Box::new(document)))
        },
    )?;

    linker.func_wrap(
        "net",
        "json",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            let state = caller.data_mut();
            let body = match request_mut(state, rid).and_then(|r| r.response()) {
                Ok(response) => response.body.clone(),
                Err(err) => return err.code(),
            };
            if body.is_empty() {
                return NetError::MissingData.code();
            }
            match serde_json::from_slice::<serde_json::Value>(&body) {
                Ok(json) => state.table.allocate_value(Value::from_json(json)),
                Err(_) => NetError::InvalidString.code(),
            }
        },
    )?;

    Ok(())
}
