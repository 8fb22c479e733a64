//! shiori-runtime - WebAssembly embedding core for content-source plugins
//!
//! This crate hosts sandboxed content-source plugins packaged as wasm
//! modules. It provides:
//!
//! - **Resource table**: unified id-to-object map with reference counting
//!   and scoped cleanup
//! - **ABI dispatcher**: detects the plugin's calling convention and
//!   drives its exported entry points
//! - **Import namespaces**: `std`, `net`, `html`, `json`, `defaults`,
//!   `env`, `aidoku`, `canvas`, and `js` capability surfaces the plugin
//!   calls back into
//! - **Partial home protocol**: progressive delivery of home-layout
//!   components during a home call
//!
//! ## Architecture
//!
//! A [`Runtime`] owns the wasmtime engine and a linker with every import
//! registered. [`Runtime::load_source`] instantiates a plugin with its
//! manifest and two injected collaborators: a blocking [`HttpBridge`] and
//! a [`SettingsStore`]. The resulting [`Source`] exposes the decoded
//! domain operations (search, details, chapters, pages, filters,
//! listings, home, image requests).
//!
//! ## Example
//!
//! ```no_run
//! use shiori_runtime::{MemorySettings, OfflineBridge, Runtime, RuntimeLimits};
//! use shiori_types::SourceManifest;
//! use std::sync::Arc;
//!
//! let runtime = Runtime::new().unwrap();
//! let wasm = std::fs::read("Payload/main.wasm").unwrap();
//! let manifest = SourceManifest::new("en.example", "Example");
//! let mut source = runtime
//!     .load_source(
//!         &wasm,
//!         manifest,
//!         Arc::new(OfflineBridge),
//!         Arc::new(MemorySettings::new()),
//!         RuntimeLimits::default(),
//!     )
//!     .unwrap();
//! let results = source.get_search_manga_list(Some("query"), 1, &[]).unwrap();
//! println!("{} entries", results.entries.len());
//! ```
//!
//! ## Concurrency
//!
//! A plugin instance is single-threaded cooperative: one exported call in
//! flight at a time, and only `net.send` may block (it calls the injected
//! bridge). Instances share no state; a multi-threaded host runs one
//! instance per thread or serializes at the instance boundary.
//!
//! ## Safety
//!
//! Plugins run sandboxed: guest memory growth is capped, every import
//! returns error codes instead of unwinding, and the only deliberate trap
//! is `env.abort`.

pub mod abi;
pub mod bridge;
pub mod canvas;
pub mod codec;
pub mod date;
pub mod dispatch;
pub mod engine;
pub mod home;
pub mod host;
pub mod html;
pub mod imports;
pub mod js;
pub mod legacy;
pub mod net;
pub mod table;
pub mod value;

pub use abi::{
    CanvasError, HtmlError, JsAbiError, NetError, RunnerError, RuntimeLimits, StdError,
};

pub use bridge::{
    HttpBridge, HttpRequest, HttpResponse, MemorySettings, OfflineBridge, SettingValue,
    SettingsStore,
};

#[cfg(feature = "bridge-ureq")]
pub use bridge::UreqBridge;

pub use codec::{ImageRequest, ImageResponse};

pub use dispatch::{AbiMode, Capabilities, PageImageResponse, Source};

pub use engine::Runtime;

pub use home::HomeAccumulator;

pub use js::{JsContext, JsError, JsValue};

pub use net::CookieJar;

pub use table::{ResourceKind, ResourceTable, Rid, Scope};

pub use value::Value;
