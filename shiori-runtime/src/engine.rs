//! wasmtime engine and linker wiring
//!
//! One [`Runtime`] is built per process (or per pool of sources); every
//! import namespace is registered on its linker once, and each plugin
//! instantiation clones the linker so unknown imports can be turned into
//! traps per module.

use crate::host::HostState;
use crate::imports;
use anyhow::Result;
use wasmtime::{Config, Engine, Instance, Linker, Module, ResourceLimiter, Store};

/// Shared engine with all host import namespaces registered
pub struct Runtime {
    engine: Engine,
    linker: Linker<HostState>,
}

impl Runtime {
    pub fn new() -> Result<Self> {
        let mut config = Config::new();
        config.wasm_bulk_memory(true);
        config.wasm_multi_memory(false);

        let engine = Engine::new(&config)?;
        let mut linker = Linker::new(&engine);
        imports::register_all(&mut linker)?;

        Ok(Self { engine, linker })
    }

    pub(crate) fn instantiate(
        &self,
        wasm: &[u8],
        state: HostState,
    ) -> Result<(Store<HostState>, Instance)> {
        let module = Module::new(&self.engine, wasm)?;
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| state as &mut dyn ResourceLimiter);

        // A plugin compiled against a newer import surface should fail at
        // the call, not at instantiation.
        let mut linker = self.linker.clone();
        linker.define_unknown_imports_as_traps(&module)?;
        let instance = linker.instantiate(&mut store, &module)?;
        Ok((store, instance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::RuntimeLimits;
    use crate::bridge::{MemorySettings, OfflineBridge};
    use std::sync::Arc;

    fn test_state() -> HostState {
        HostState::new(
            "test.source".into(),
            Arc::new(OfflineBridge),
            Arc::new(MemorySettings::new()),
            RuntimeLimits::default(),
        )
    }

    #[test]
    fn test_runtime_creation() {
        assert!(Runtime::new().is_ok());
    }

    #[test]
    fn test_instantiate_minimal_module() {
        let runtime = Runtime::new().unwrap();
        let wasm = wat::parse_str(
            r#"(module
                (memory (export "memory") 1)
                (func (export "start")))"#,
        )
        .unwrap();
        let (mut store, instance) = runtime.instantiate(&wasm, test_state()).unwrap();
        let start = instance
            .get_typed_func::<(), ()>(&mut store, "start")
            .unwrap();
        start.call(&mut store, ()).unwrap();
    }

    #[test]
    fn test_json_import_produces_object_value() {
        let runtime = Runtime::new().unwrap();
        let wasm = wat::parse_str(
            r#"(module
                (import "json" "parse" (func $parse (param i32 i32) (result i32)))
                (import "std" "typeof" (func $typeof (param i32) (result i32)))
                (memory (export "memory") 1)
                (data (i32.const 0) "{\22a\22:1}")
                (func (export "run") (result i32)
                    (call $typeof (call $parse (i32.const 0) (i32.const 7)))))"#,
        )
        .unwrap();
        let (mut store, instance) = runtime.instantiate(&wasm, test_state()).unwrap();
        let run = instance
            .get_typed_func::<(), i32>(&mut store, "run")
            .unwrap();
        assert_eq!(run.call(&mut store, ()).unwrap(), crate::value::kind::OBJECT);
    }

    #[test]
    fn test_net_send_without_bridge_reports_request_error() {
        let runtime = Runtime::new().unwrap();
        let wasm = wat::parse_str(
            r#"(module
                (import "net" "init" (func $init (param i32) (result i32)))
                (import "net" "set_url" (func $set_url (param i32 i32 i32) (result i32)))
                (import "net" "send" (func $send (param i32) (result i32)))
                (memory (export "memory") 1)
                (data (i32.const 0) "https://x.y/")
                (func (export "run") (result i32)
                    (local $request i32)
                    (local.set $request (call $init (i32.const 0)))
                    (drop (call $set_url (local.get $request) (i32.const 0) (i32.const 12)))
                    (call $send (local.get $request))))"#,
        )
        .unwrap();
        let (mut store, instance) = runtime.instantiate(&wasm, test_state()).unwrap();
        let run = instance
            .get_typed_func::<(), i32>(&mut store, "run")
            .unwrap();
        // The offline bridge answers with a transport error.
        assert_eq!(run.call(&mut store, ()).unwrap(), -10);
    }

    #[test]
    fn test_defaults_roundtrip_through_imports() {
        let runtime = Runtime::new().unwrap();
        // set("k", Int, zigzag(21)) then get("k") and read it back.
        let wasm = wat::parse_str(
            r#"(module
                (import "defaults" "set" (func $set (param i32 i32 i32 i32 i32) (result i32)))
                (import "defaults" "get" (func $get (param i32 i32) (result i32)))
                (import "std" "read_int" (func $read_int (param i32) (result i64)))
                (memory (export "memory") 1)
                (data (i32.const 0) "k")
                (data (i32.const 8) "\2a")
                (func (export "run") (result i64)
                    (drop (call $set (i32.const 0) (i32.const 1) (i32.const 2) (i32.const 8) (i32.const 1)))
                    (call $read_int (call $get (i32.const 0) (i32.const 1)))))"#,
        )
        .unwrap();
        let (mut store, instance) = runtime.instantiate(&wasm, test_state()).unwrap();
        let run = instance
            .get_typed_func::<(), i64>(&mut store, "run")
            .unwrap();
        assert_eq!(run.call(&mut store, ()).unwrap(), 21);
    }

    #[test]
    fn test_html_imports_select_and_read() {
        let runtime = Runtime::new().unwrap();
        let html = "<div><a class=x>one</a><a class=x>two</a></div>";
        let wasm = wat::parse_str(&format!(
            r#"(module
                (import "html" "parse" (func $parse (param i32 i32 i32 i32) (result i32)))
                (import "html" "select" (func $select (param i32 i32 i32) (result i32)))
                (import "html" "size" (func $size (param i32) (result i32)))
                (memory (export "memory") 1)
                (data (i32.const 0) "{html}")
                (data (i32.const 256) "a.x")
                (func (export "run") (result i32)
                    (call $size
                        (call $select
                            (call $parse (i32.const 0) (i32.const {len}) (i32.const -1) (i32.const 0))
                            (i32.const 256) (i32.const 3)))))"#,
            html = html.replace('"', "\\22"),
            len = html.len(),
        ))
        .unwrap();
        let (mut store, instance) = runtime.instantiate(&wasm, test_state()).unwrap();
        let run = instance
            .get_typed_func::<(), i32>(&mut store, "run")
            .unwrap();
        assert_eq!(run.call(&mut store, ()).unwrap(), 2);
    }

    #[test]
    fn test_js_eval_through_imports() {
        let runtime = Runtime::new().unwrap();
        let script = "'a'+(1+2)";
        let wasm = wat::parse_str(&format!(
            r#"(module
                (import "js" "context_create" (func $create (result i32)))
                (import "js" "context_eval" (func $eval (param i32 i32 i32) (result i32)))
                (import "std" "string_len" (func $len (param i32) (result i32)))
                (memory (export "memory") 1)
                (data (i32.const 0) "{script}")
                (func (export "run") (result i32)
                    (call $len
                        (call $eval (call $create) (i32.const 0) (i32.const {len})))))"#,
            len = script.len(),
        ))
        .unwrap();
        let (mut store, instance) = runtime.instantiate(&wasm, test_state()).unwrap();
        let run = instance
            .get_typed_func::<(), i32>(&mut store, "run")
            .unwrap();
        // "a3"
        assert_eq!(run.call(&mut store, ()).unwrap(), 2);
    }

    #[test]
    fn test_module_with_imports_instantiates() {
        let runtime = Runtime::new().unwrap();
        let wasm = wat::parse_str(
            r#"(module
                (import "std" "create_int" (func $create_int (param i64) (result i32)))
                (import "std" "destroy" (func $destroy (param i32)))
                (memory (export "memory") 1)
                (func (export "run") (result i32)
                    (call $create_int (i64.const 7))))"#,
        )
        .unwrap();
        let (mut store, instance) = runtime.instantiate(&wasm, test_state()).unwrap();
        let run = instance
            .get_typed_func::<(), i32>(&mut store, "run")
            .unwrap();
        let rid = run.call(&mut store, ()).unwrap();
        assert!(rid > 0);
    }
}
