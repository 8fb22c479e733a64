//! ABI dispatcher
//!
//! Detects which calling convention a plugin speaks, drives its exported
//! entry points, and decodes result payloads into domain values. Every
//! descriptor allocated for call arguments is tracked in a scope drained
//! on all exit paths; descriptors the plugin allocates through imports are
//! its own to destroy (the sweeper covers the rest).

use crate::abi::{
    RunnerError, RuntimeLimits, RESULT_REQUEST_ERROR, RESULT_UNIMPLEMENTED,
};
use crate::bridge::{HttpBridge, SettingsStore};
use crate::canvas::CanvasImage;
use crate::codec::{self, ImageRequest, ImageResponse};
use crate::engine::Runtime;
use crate::host::HostState;
use crate::legacy;
use crate::net::RequestState;
use crate::table::{Resource, Scope};
use crate::value::Value;
use shiori_types::{
    Chapter, Filter, FilterValue, HomeLayout, Listing, Manga, MangaPageResult, Page, PageContext,
    SourceManifest,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use wasmtime::{Instance, Store, Val};

/// Which calling convention the plugin speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiMode {
    /// Postcard result pointers.
    Modern,
    /// Generic object descriptors.
    Legacy,
}

/// What the plugin can do, derived from its exports and manifest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub has_home: bool,
    pub has_image_processor: bool,
    pub has_image_request_provider: bool,
    pub has_listing_provider: bool,
    pub has_dynamic_listings: bool,
    pub handles_basic_login: bool,
    pub handles_web_login: bool,
}

/// Response metadata handed to `process_page_image`
#[derive(Debug, Clone, Default)]
pub struct PageImageResponse {
    pub code: u16,
    pub headers: BTreeMap<String, String>,
    pub request_url: Option<String>,
    pub request_headers: BTreeMap<String, String>,
}

/// A loaded plugin instance
///
/// One instance is single-threaded and cooperative: one exported call in
/// flight at a time, with the plugin re-entering the host through imports.
pub struct Source {
    store: Store<HostState>,
    instance: Instance,
    mode: AbiMode,
    manifest: SourceManifest,
    capabilities: Capabilities,
}

impl Runtime {
    /// Instantiate a plugin and run its `start` export if present.
    pub fn load_source(
        &self,
        wasm: &[u8],
        manifest: SourceManifest,
        bridge: Arc<dyn HttpBridge>,
        settings: Arc<dyn SettingsStore>,
        limits: RuntimeLimits,
    ) -> Result<Source, RunnerError> {
        let state = HostState::new(manifest.info.id.clone(), bridge, settings, limits);
        let (store, instance) = self.instantiate(wasm, state)?;
        let mut source = Source {
            store,
            instance,
            mode: AbiMode::Modern,
            manifest,
            capabilities: Capabilities::default(),
        };
        source.mode = source.detect_mode();
        source.capabilities = source.detect_capabilities();
        tracing::debug!(
            source = %source.manifest.info.id,
            mode = ?source.mode,
            "source loaded"
        );

        if source.has_export("start") {
            let mut results: [Val; 0] = [];
            source.call_raw("start", &[], &mut results)?;
        }
        Ok(source)
    }
}

impl Source {
    pub fn manifest(&self) -> &SourceManifest {
        &self.manifest
    }

    pub fn mode(&self) -> AbiMode {
        self.mode
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Live descriptor count, mostly useful for leak diagnostics.
    pub fn descriptor_count(&self) -> usize {
        self.store.data().table.len()
    }

    /// Run the age/population sweep now.
    pub fn sweep(&mut self) {
        let limits = self.store.data().limits.clone();
        self.store.data_mut().table.sweep(&limits);
    }

    fn detect_mode(&mut self) -> AbiMode {
        if self.has_export("get_search_manga_list") || self.has_export("get_manga_update") {
            AbiMode::Modern
        } else if self.has_export("get_manga_details") || self.has_export("get_chapter_list") {
            AbiMode::Legacy
        } else {
            AbiMode::Modern
        }
    }

    fn detect_capabilities(&mut self) -> Capabilities {
        let config = self.manifest.config.clone().unwrap_or_default();
        Capabilities {
            has_home: self.mode == AbiMode::Modern && self.has_export("get_home"),
            has_image_processor: self.has_export("process_page_image"),
            has_image_request_provider: self.has_export("get_image_request")
                || self.has_export("modify_image_request"),
            has_listing_provider: self.mode == AbiMode::Modern && self.has_export("get_manga_list"),
            has_dynamic_listings: self.has_export("get_listings"),
            handles_basic_login: config.handles_basic_login || self.has_export("handle_basic_login"),
            handles_web_login: config.handles_web_login || self.has_export("handle_web_login"),
        }
    }

    fn has_export(&mut self, name: &str) -> bool {
        self.instance.get_func(&mut self.store, name).is_some()
    }

    fn state(&mut self) -> &mut HostState {
        self.store.data_mut()
    }

    // ===== Call plumbing =====

    fn call_raw(
        &mut self,
        name: &'static str,
        params: &[Val],
        results: &mut [Val],
    ) -> Result<(), RunnerError> {
        let limits = self.store.data().limits.clone();
        self.store.data_mut().table.maybe_sweep(&limits);

        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or(RunnerError::MissingExport(name))?;
        func.call(&mut self.store, params, results).map_err(|err| {
            let state = self.store.data_mut();
            match state.abort.take() {
                Some(abort) => RunnerError::Abort {
                    source_id: state.source_id.clone(),
                    message: abort.message,
                    file: abort.file,
                    line: abort.line,
                    column: abort.column,
                },
                None => RunnerError::Wasm(err),
            }
        })
    }

    /// Call an export returning an i32 (rid or result pointer).
    fn call_i32(&mut self, name: &'static str, params: &[Val]) -> Result<i32, RunnerError> {
        let mut results = [Val::I32(0)];
        self.call_raw(name, params, &mut results)?;
        match results[0] {
            Val::I32(value) => Ok(value),
            _ => Err(RunnerError::Plugin(-1)),
        }
    }

    /// Call a modern export and read the payload behind its result pointer.
    fn call_result(
        &mut self,
        name: &'static str,
        params: &[Val],
    ) -> Result<Option<Vec<u8>>, RunnerError> {
        let ptr = self.call_i32(name, params)?;
        if ptr < 0 {
            return Err(match ptr {
                RESULT_UNIMPLEMENTED => RunnerError::Unimplemented,
                RESULT_REQUEST_ERROR => RunnerError::Request,
                code => RunnerError::Plugin(code),
            });
        }
        let payload = {
            let memory = self
                .instance
                .get_memory(&mut self.store, "memory")
                .ok_or(RunnerError::MissingMemory)?;
            codec::read_result_payload(memory.data(&self.store), ptr)
        };
        // Hand the allocation back to the plugin.
        if ptr > 0 {
            if let Ok(free) = self
                .instance
                .get_typed_func::<i32, ()>(&mut self.store, "free_result")
            {
                let _ = free.call(&mut self.store, ptr);
            }
        }
        Ok(payload)
    }

    /// Run `f` with a scope; every descriptor it tracks is force-removed
    /// on all exit paths.
    fn with_scope<T>(
        &mut self,
        f: impl FnOnce(&mut Self, &mut Scope) -> Result<T, RunnerError>,
    ) -> Result<T, RunnerError> {
        let mut scope = Scope::new();
        let result = f(self, &mut scope);
        scope.cleanup(&mut self.store.data_mut().table);
        result
    }

    fn alloc_blob(&mut self, scope: &mut Scope, bytes: Vec<u8>) -> Result<i32, RunnerError> {
        let rid = self.state().table.allocate_value(Value::Bytes(bytes));
        scope.track(rid)
    }

    fn alloc_value(&mut self, scope: &mut Scope, value: Value) -> Result<i32, RunnerError> {
        let rid = self.state().table.allocate_value(value);
        scope.track(rid)
    }

    // ===== Modern operations =====

    /// Search (or filtered browse) on the source.
    pub fn get_search_manga_list(
        &mut self,
        query: Option<&str>,
        page: i32,
        filters: &[FilterValue],
    ) -> Result<MangaPageResult, RunnerError> {
        if self.mode == AbiMode::Legacy {
            return self.legacy_search(query, page, filters);
        }
        self.with_scope(|source, scope| {
            let query_rid = match query {
                Some(query) => source.alloc_blob(scope, codec::encode(&query.to_string()))?,
                None => -1,
            };
            let filters_rid = source.alloc_blob(scope, codec::encode(&filters.to_vec()))?;
            let payload = source.call_result(
                "get_search_manga_list",
                &[Val::I32(query_rid), Val::I32(page), Val::I32(filters_rid)],
            )?;
            Ok(payload
                .and_then(|bytes| codec::decode::<MangaPageResult>(&bytes, "manga page result"))
                .unwrap_or_default())
        })
    }

    /// Fetch details and/or chapters for an entry.
    pub fn get_manga_update(
        &mut self,
        manga: &Manga,
        needs_details: bool,
        needs_chapters: bool,
    ) -> Result<Manga, RunnerError> {
        if self.mode == AbiMode::Legacy {
            return self.legacy_manga_update(manga, needs_details, needs_chapters);
        }
        self.with_scope(|source, scope| {
            let manga_rid = source.alloc_blob(scope, codec::encode(manga))?;
            let payload = source.call_result(
                "get_manga_update",
                &[
                    Val::I32(manga_rid),
                    Val::I32(needs_details as i32),
                    Val::I32(needs_chapters as i32),
                ],
            )?;
            Ok(payload
                .and_then(|bytes| codec::decode::<Manga>(&bytes, "manga update"))
                .unwrap_or_else(|| manga.clone()))
        })
    }

    /// Page list for a chapter.
    pub fn get_page_list(
        &mut self,
        manga: &Manga,
        chapter: &Chapter,
    ) -> Result<Vec<Page>, RunnerError> {
        if self.mode == AbiMode::Legacy {
            return self.legacy_page_list(chapter);
        }
        self.with_scope(|source, scope| {
            let manga_rid = source.alloc_blob(scope, codec::encode(manga))?;
            let chapter_rid = source.alloc_blob(scope, codec::encode(chapter))?;
            let payload = source.call_result(
                "get_page_list",
                &[Val::I32(manga_rid), Val::I32(chapter_rid)],
            )?;
            Ok(payload
                .and_then(|bytes| codec::decode::<Vec<Page>>(&bytes, "page list"))
                .unwrap_or_default())
        })
    }

    /// The source's search filters: the export when present, otherwise the
    /// manifest's.
    pub fn get_filters(&mut self) -> Result<Vec<Filter>, RunnerError> {
        if self.mode == AbiMode::Legacy || !self.has_export("get_filters") {
            return Ok(self.manifest.filters.clone());
        }
        let payload = match self.call_result("get_filters", &[]) {
            Ok(payload) => payload,
            Err(RunnerError::Unimplemented) => return Ok(self.manifest.filters.clone()),
            Err(err) => return Err(err),
        };
        Ok(payload
            .and_then(|bytes| codec::decode::<Vec<Filter>>(&bytes, "filters"))
            .unwrap_or_else(|| self.manifest.filters.clone()))
    }

    /// The source's listings: dynamic when exported, manifest otherwise.
    pub fn get_listings(&mut self) -> Result<Vec<Listing>, RunnerError> {
        if self.mode == AbiMode::Legacy || !self.has_export("get_listings") {
            return Ok(self.manifest.listings.clone());
        }
        let payload = match self.call_result("get_listings", &[]) {
            Ok(payload) => payload,
            Err(RunnerError::Unimplemented) => return Ok(self.manifest.listings.clone()),
            Err(err) => return Err(err),
        };
        Ok(payload
            .and_then(|bytes| codec::decode::<Vec<Listing>>(&bytes, "listings"))
            .unwrap_or_else(|| self.manifest.listings.clone()))
    }

    /// One page of a listing.
    pub fn get_manga_list(
        &mut self,
        listing: &Listing,
        page: i32,
    ) -> Result<MangaPageResult, RunnerError> {
        if self.mode == AbiMode::Legacy {
            return self.legacy_search(None, page, &[]);
        }
        self.with_scope(|source, scope| {
            let listing_rid = source.alloc_blob(scope, codec::encode(listing))?;
            let payload = source
                .call_result("get_manga_list", &[Val::I32(listing_rid), Val::I32(page)])?;
            Ok(payload
                .and_then(|bytes| codec::decode::<MangaPageResult>(&bytes, "manga page result"))
                .unwrap_or_default())
        })
    }

    /// The home layout, with components streamed through `on_partial` as
    /// the plugin emits them. Partials are authoritative when present.
    pub fn get_home(
        &mut self,
        on_partial: Option<Box<dyn FnMut(HomeLayout)>>,
    ) -> Result<HomeLayout, RunnerError> {
        {
            let state = self.state();
            state.partials.clear();
            state.partial_sink = on_partial;
        }
        let result = self.call_result("get_home", &[]);

        let state = self.state();
        state.partial_sink = None;
        let accumulated = if state.partials.is_empty() {
            None
        } else {
            Some(state.partials.snapshot())
        };
        state.partials.clear();

        let payload = result?;
        Ok(match accumulated {
            Some(layout) => layout,
            None => payload
                .and_then(|bytes| codec::decode::<HomeLayout>(&bytes, "home layout"))
                .unwrap_or_default(),
        })
    }

    /// Ask the source how to fetch an image url.
    pub fn get_image_request(
        &mut self,
        url: &str,
        context: Option<&PageContext>,
    ) -> Result<ImageRequest, RunnerError> {
        if self.mode == AbiMode::Legacy || !self.has_export("get_image_request") {
            return self.legacy_image_request(url);
        }
        self.with_scope(|source, scope| {
            let url_rid = source.alloc_blob(scope, codec::encode(&url.to_string()))?;
            let context_rid = match context {
                Some(context) => source.alloc_blob(scope, codec::encode(context))?,
                None => -1,
            };
            let payload = source.call_result(
                "get_image_request",
                &[Val::I32(url_rid), Val::I32(context_rid)],
            )?;
            let mut request = payload
                .and_then(|bytes| codec::decode::<ImageRequest>(&bytes, "image request"))
                .unwrap_or_default();
            if request.url.is_none() {
                request.url = Some(url.to_string());
            }
            Ok(request)
        })
    }

    /// Run the source's image post-processor over raw image bytes.
    pub fn process_page_image(
        &mut self,
        image: &[u8],
        response: PageImageResponse,
        context: Option<&PageContext>,
    ) -> Result<Vec<u8>, RunnerError> {
        let decoded = CanvasImage::decode(image)
            .map_err(|err| RunnerError::Plugin(err.code()))?;
        self.with_scope(|source, scope| {
            let image_rid = {
                let rid = source.state().table.allocate(Resource::Image(decoded));
                scope.track(rid)?
            };
            let wire = ImageResponse {
                code: response.code,
                headers: response.headers,
                request_url: response.request_url,
                request_headers: response.request_headers,
                image: image_rid,
            };
            let response_rid = source.alloc_blob(scope, codec::encode(&wire))?;
            let context_rid = match context {
                Some(context) => source.alloc_blob(scope, codec::encode(context))?,
                None => -1,
            };
            let payload = source.call_result(
                "process_page_image",
                &[Val::I32(response_rid), Val::I32(context_rid)],
            )?;
            let result_rid = payload
                .and_then(|bytes| codec::decode::<i32>(&bytes, "processed image rid"))
                .unwrap_or(image_rid);

            let png = match source.state().table.get(result_rid) {
                Some(Resource::Image(image)) => image
                    .png_bytes()
                    .map_err(|err| RunnerError::Plugin(err.code()))?,
                _ => return Err(RunnerError::Plugin(-1)),
            };
            if result_rid != image_rid {
                source.state().table.force_remove(result_rid);
            }
            Ok(png)
        })
    }

    // ===== Legacy operations =====

    fn legacy_search(
        &mut self,
        query: Option<&str>,
        page: i32,
        filters: &[FilterValue],
    ) -> Result<MangaPageResult, RunnerError> {
        self.with_scope(|source, scope| {
            let mut members = Vec::new();
            if let Some(query) = query {
                members.push(legacy::query_to_object(query));
            }
            members.extend(filters.iter().map(legacy::filter_value_to_object));
            let filters_rid = source.alloc_value(scope, Value::Array(members))?;

            let result_rid =
                source.call_i32("get_manga_list", &[Val::I32(filters_rid), Val::I32(page)])?;
            let result = source
                .state()
                .table
                .value(result_rid)
                .and_then(legacy::object_to_page_result)
                .unwrap_or_default();
            source.state().table.force_remove(result_rid);
            Ok(result)
        })
    }

    fn legacy_manga_update(
        &mut self,
        manga: &Manga,
        needs_details: bool,
        needs_chapters: bool,
    ) -> Result<Manga, RunnerError> {
        self.with_scope(|source, scope| {
            let manga_rid = source.alloc_value(scope, legacy::manga_to_object(manga))?;
            let mut updated = manga.clone();

            if needs_details {
                let details_rid =
                    source.call_i32("get_manga_details", &[Val::I32(manga_rid)])?;
                if let Some(details) = source
                    .state()
                    .table
                    .value(details_rid)
                    .and_then(legacy::object_to_manga)
                {
                    updated.copy_from(details);
                }
                source.state().table.force_remove(details_rid);
            }

            if needs_chapters {
                let chapters_rid =
                    source.call_i32("get_chapter_list", &[Val::I32(manga_rid)])?;
                let chapters = match source.state().table.value(chapters_rid) {
                    Some(Value::Array(items)) => {
                        items.iter().filter_map(legacy::object_to_chapter).collect()
                    }
                    _ => Vec::new(),
                };
                source.state().table.force_remove(chapters_rid);
                updated.chapters = Some(chapters);
            }

            Ok(updated)
        })
    }

    fn legacy_page_list(&mut self, chapter: &Chapter) -> Result<Vec<Page>, RunnerError> {
        self.with_scope(|source, scope| {
            let mut map = BTreeMap::new();
            map.insert("id".to_string(), Value::String(chapter.key.clone()));
            if let Some(title) = &chapter.title {
                map.insert("title".to_string(), Value::String(title.clone()));
            }
            let chapter_rid = source.alloc_value(scope, Value::Object(map))?;

            let pages_rid = source.call_i32("get_page_list", &[Val::I32(chapter_rid)])?;
            let pages = match source.state().table.value(pages_rid) {
                Some(Value::Array(items)) => {
                    items.iter().filter_map(legacy::object_to_page).collect()
                }
                _ => Vec::new(),
            };
            source.state().table.force_remove(pages_rid);
            Ok(pages)
        })
    }

    /// Legacy sources mutate a request descriptor by side effect instead
    /// of returning a result pointer.
    fn legacy_image_request(&mut self, url: &str) -> Result<ImageRequest, RunnerError> {
        let has_modifier = self.has_export("modify_image_request");
        self.with_scope(|source, scope| {
            let request_rid = {
                let state = source.state();
                let agent = state.limits.default_user_agent.clone();
                let mut request = RequestState::new(0, &agent);
                let _ = request.set_url(url);
                let rid = state.table.allocate(Resource::Request(request));
                scope.track(rid)?
            };
            if has_modifier {
                let mut results: [Val; 0] = [];
                source.call_raw("modify_image_request", &[Val::I32(request_rid)], &mut results)?;
            }
            let state = source.state();
            let request = match state.table.get(request_rid) {
                Some(Resource::Request(request)) => request,
                _ => return Err(RunnerError::Plugin(-1)),
            };
            Ok(ImageRequest {
                url: request.url.as_ref().map(|u| u.to_string()),
                headers: request
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            })
        })
    }
}
