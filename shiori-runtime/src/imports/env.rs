//! The `env` namespace (abort, print, sleep, partial results) and the
//! legacy `aidoku` object constructors

use crate::codec;
use crate::host::{AbortInfo, HostState};
use crate::imports::{memory_of, read_string};
use crate::value::Value;
use anyhow::Result;
use shiori_types::HomePartialResult;
use std::collections::BTreeMap;
use wasmtime::{Caller, Linker};

/// Read an AssemblyScript string: UTF-16LE data with a 32-bit LE byte
/// length at `ptr - 4`, falling back to a single length byte when the
/// 4-byte length is out of range.
fn read_as_string(caller: &mut Caller<'_, HostState>, ptr: i32) -> String {
    if ptr < 4 {
        return String::new();
    }
    let Some(memory) = memory_of(caller) else {
        return String::new();
    };
    let data = memory.data(&caller);
    let ptr = ptr as usize;
    let header: [u8; 4] = match data.get(ptr - 4..ptr).and_then(|b| b.try_into().ok()) {
        Some(header) => header,
        None => return String::new(),
    };
    let mut len = u32::from_le_bytes(header) as usize;
    if ptr + len > data.len() || len > (1 << 24) {
        len = header[0] as usize;
        if ptr + len > data.len() {
            return String::new();
        }
    }
    let units: Vec<u16> = data[ptr..ptr + len]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

pub fn register(linker: &mut Linker<HostState>) -> Result<()> {
    // The one deliberate trap in the import surface.
    linker.func_wrap(
        "env",
        "abort",
        |mut caller: Caller<'_, HostState>,
         message_ptr: i32,
         file_ptr: i32,
         line: i32,
         column: i32|
         -> anyhow::Result<()> {
            let message = read_as_string(&mut caller, message_ptr);
            let file = read_as_string(&mut caller, file_ptr);
            let state = caller.data_mut();
            tracing::error!(
                source = %state.source_id,
                %message, %file, line, column,
                "plugin abort"
            );
            state.abort = Some(AbortInfo {
                message: message.clone(),
                file,
                line: line.max(0) as u32,
                column: column.max(0) as u32,
            });
            Err(anyhow::anyhow!("abort: {message}"))
        },
    )?;

    linker.func_wrap(
        "env",
        "print",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| {
            if let Some(message) = read_string(&mut caller, ptr, len) {
                tracing::info!(source = %caller.data().source_id, "{message}");
            }
        },
    )?;

    // Blocks the plugin thread; the plugin expects synchronous semantics.
    linker.func_wrap("env", "sleep", |_caller: Caller<'_, HostState>, seconds: i32| {
        let seconds = seconds.clamp(0, 60) as u64;
        std::thread::sleep(std::time::Duration::from_secs(seconds));
    })?;

    linker.func_wrap(
        "env",
        "send_partial_result",
        |mut caller: Caller<'_, HostState>, ptr: i32| {
            let payload = {
                let Some(memory) = memory_of(&mut caller) else {
                    return;
                };
                codec::read_result_payload(memory.data(&caller), ptr)
            };
            let Some(payload) = payload else {
                return;
            };
            let Some(partial) = codec::decode::<HomePartialResult>(&payload, "home partial")
            else {
                return;
            };
            let state = caller.data_mut();
            let snapshot = state.partials.push(partial);
            if let Some(sink) = state.partial_sink.as_mut() {
                sink(snapshot);
            }
        },
    )?;

    register_legacy_constructors(linker)?;
    Ok(())
}

/// Legacy object constructors under the `aidoku` namespace. These build
/// generic objects with the historical field names; the legacy dispatcher
/// reads them back.
fn register_legacy_constructors(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(
        "aidoku",
        "create_manga",
        |mut caller: Caller<'_, HostState>,
         key_ptr: i32,
         key_len: i32,
         title_ptr: i32,
         title_len: i32,
         cover_ptr: i32,
         cover_len: i32,
         author_ptr: i32,
         author_len: i32,
         description_ptr: i32,
         description_len: i32,
         url_ptr: i32,
         url_len: i32,
         status: i32,
         nsfw: i32,
         viewer: i32|
         -> i32 {
            let Some(key) = read_string(&mut caller, key_ptr, key_len) else {
                return crate::abi::StdError::InvalidString.code();
            };
            let title = read_string(&mut caller, title_ptr, title_len).unwrap_or_default();
            let cover = crate::imports::read_opt_string(&mut caller, cover_ptr, cover_len);
            let author = crate::imports::read_opt_string(&mut caller, author_ptr, author_len);
            let description =
                crate::imports::read_opt_string(&mut caller, description_ptr, description_len);
            let url = crate::imports::read_opt_string(&mut caller, url_ptr, url_len);

            let mut map = BTreeMap::new();
            map.insert("id".to_string(), Value::String(key));
            map.insert("title".to_string(), Value::String(title));
            if let Some(cover) = cover {
                map.insert("cover".to_string(), Value::String(cover));
            }
            if let Some(author) = author {
                map.insert("author".to_string(), Value::String(author));
            }
            if let Some(description) = description {
                map.insert("description".to_string(), Value::String(description));
            }
            if let Some(url) = url {
                map.insert("url".to_string(), Value::String(url));
            }
            map.insert("status".to_string(), Value::Int(status as i64));
            map.insert("nsfw".to_string(), Value::Int(nsfw as i64));
            map.insert("viewer".to_string(), Value::Int(viewer as i64));
            caller.data_mut().table.allocate_value(Value::Object(map))
        },
    )?;

    linker.func_wrap(
        "aidoku",
        "create_manga_result",
        |mut caller: Caller<'_, HostState>, array_rid: i32, has_more: i32| -> i32 {
            let state = caller.data_mut();
            let Some(entries) = state.table.value(array_rid).cloned() else {
                return crate::abi::StdError::InvalidDescriptor.code();
            };
            let mut map = BTreeMap::new();
            map.insert("manga".to_string(), entries);
            map.insert("hasMore".to_string(), Value::Bool(has_more != 0));
            state.table.allocate_value(Value::Object(map))
        },
    )?;

    linker.func_wrap(
        "aidoku",
        "create_chapter",
        |mut caller: Caller<'_, HostState>,
         key_ptr: i32,
         key_len: i32,
         title_ptr: i32,
         title_len: i32,
         volume: f32,
         chapter: f32,
         date_updated: f64,
         scanlator_ptr: i32,
         scanlator_len: i32,
         url_ptr: i32,
         url_len: i32,
         lang_ptr: i32,
         lang_len: i32|
         -> i32 {
            let Some(key) = read_string(&mut caller, key_ptr, key_len) else {
                return crate::abi::StdError::InvalidString.code();
            };
            let title = crate::imports::read_opt_string(&mut caller, title_ptr, title_len);
            let scanlator =
                crate::imports::read_opt_string(&mut caller, scanlator_ptr, scanlator_len);
            let url = crate::imports::read_opt_string(&mut caller, url_ptr, url_len);
            let lang = crate::imports::read_opt_string(&mut caller, lang_ptr, lang_len);

            let mut map = BTreeMap::new();
            map.insert("id".to_string(), Value::String(key));
            if let Some(title) = title {
                map.insert("title".to_string(), Value::String(title));
            }
            map.insert("volume".to_string(), Value::Float(volume as f64));
            map.insert("chapter".to_string(), Value::Float(chapter as f64));
            map.insert("dateUpdated".to_string(), Value::Date(date_updated));
            if let Some(scanlator) = scanlator {
                map.insert("scanlator".to_string(), Value::String(scanlator));
            }
            if let Some(url) = url {
                map.insert("url".to_string(), Value::String(url));
            }
            if let Some(lang) = lang {
                map.insert("lang".to_string(), Value::String(lang));
            }
            caller.data_mut().table.allocate_value(Value::Object(map))
        },
    )?;

    linker.func_wrap(
        "aidoku",
        "create_page",
        |mut caller: Caller<'_, HostState>,
         index: i32,
         url_ptr: i32,
         url_len: i32,
         base64_ptr: i32,
         base64_len: i32,
         text_ptr: i32,
         text_len: i32|
         -> i32 {
            let url = crate::imports::read_opt_string(&mut caller, url_ptr, url_len);
            let base64 = crate::imports::read_opt_string(&mut caller, base64_ptr, base64_len);
            let text = crate::imports::read_opt_string(&mut caller, text_ptr, text_len);

            let mut map = BTreeMap::new();
            map.insert("index".to_string(), Value::Int(index as i64));
            if let Some(url) = url {
                map.insert("url".to_string(), Value::String(url));
            }
            if let Some(base64) = base64 {
                map.insert("base64".to_string(), Value::String(base64));
            }
            if let Some(text) = text {
                map.insert("text".to_string(), Value::String(text));
            }
            caller.data_mut().table.allocate_value(Value::Object(map))
        },
    )?;

    Ok(())
}
