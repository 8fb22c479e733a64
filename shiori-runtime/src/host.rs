//! Per-instance host state
//!
//! Everything the import trampolines touch lives here, inside the
//! wasmtime store: the resource table, the cookie jar, the injected
//! collaborators, and the partial-home accumulator. Each plugin instance
//! owns its state exclusively; instances share nothing.

use crate::abi::RuntimeLimits;
use crate::bridge::{HttpBridge, SettingsStore};
use crate::home::HomeAccumulator;
use crate::net::CookieJar;
use crate::table::ResourceTable;
use shiori_types::HomeLayout;
use std::sync::Arc;

/// Details captured from `env.abort` before the trap unwinds.
#[derive(Debug, Clone)]
pub struct AbortInfo {
    pub message: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// Host-side state for one plugin instance
pub struct HostState {
    pub(crate) source_id: String,
    pub(crate) table: ResourceTable,
    pub(crate) jar: CookieJar,
    pub(crate) bridge: Arc<dyn HttpBridge>,
    pub(crate) settings: Arc<dyn SettingsStore>,
    pub(crate) limits: RuntimeLimits,
    pub(crate) partials: HomeAccumulator,
    pub(crate) partial_sink: Option<Box<dyn FnMut(HomeLayout)>>,
    pub(crate) abort: Option<AbortInfo>,
}

impl HostState {
    pub fn new(
        source_id: String,
        bridge: Arc<dyn HttpBridge>,
        settings: Arc<dyn SettingsStore>,
        limits: RuntimeLimits,
    ) -> Self {
        Self {
            source_id,
            table: ResourceTable::new(),
            jar: CookieJar::new(),
            bridge,
            settings,
            limits,
            partials: HomeAccumulator::new(),
            partial_sink: None,
            abort: None,
        }
    }
}

impl std::fmt::Debug for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostState")
            .field("source_id", &self.source_id)
            .field("descriptors", &self.table.len())
            .field("cookies", &self.jar.len())
            .finish_non_exhaustive()
    }
}

/// Guest memory growth is capped by the configured limit.
impl wasmtime::ResourceLimiter for HostState {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        Ok(desired <= self.limits.max_memory)
    }

    fn table_growing(
        &mut self,
        _current: u32,
        desired: u32,
        _maximum: Option<u32>,
    ) -> anyhow::Result<bool> {
        const MAX_TABLE_ELEMENTS: u32 = 100_000;
        Ok(desired <= MAX_TABLE_ELEMENTS)
    }
}
