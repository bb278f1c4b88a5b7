use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::consumer::AssetContext;
use crate::key::AssetKey;
use crate::loader::{AssetLoader, AssetOutputType, LoadResult};
use crate::managed::AssetPayloadCache;
use crate::manager::ManagerShared;

/// One outstanding load, shared by every consumer with an equivalent
/// request.
///
/// The handler carries the request parameters to the loader and the result
/// back to the manager. It is reference counted by consumers: when the last
/// consumer lets go it is scheduled for cancellation, and a completion that
/// races the cancellation is discarded. The count and scheduling flags are
/// only mutated under the manager lock.
pub struct LoaderRequestHandler {
    manager: Weak<ManagerShared>,
    context: Option<AssetContext>,
    key: AssetKey,
    payload_cache: AssetPayloadCache,
    url: String,
    output_type: AssetOutputType,
    requested_width: i32,
    requested_height: i32,
    attached_data: serde_json::Value,
    loader: Arc<dyn AssetLoader>,
    consumers_count: AtomicUsize,
    scheduled_for_load: AtomicBool,
    scheduled_for_cancelation: AtomicBool,
    load_started: AtomicBool,
    canceled: AtomicBool,
    last_load_result: Mutex<Option<LoadResult>>,
}

impl LoaderRequestHandler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        manager: Weak<ManagerShared>,
        context: Option<AssetContext>,
        key: AssetKey,
        payload_cache: AssetPayloadCache,
        url: String,
        output_type: AssetOutputType,
        requested_width: i32,
        requested_height: i32,
        attached_data: serde_json::Value,
        loader: Arc<dyn AssetLoader>,
    ) -> Self {
        Self {
            manager,
            context,
            key,
            payload_cache,
            url,
            output_type,
            requested_width,
            requested_height,
            attached_data,
            loader,
            consumers_count: AtomicUsize::new(0),
            scheduled_for_load: AtomicBool::new(false),
            scheduled_for_cancelation: AtomicBool::new(false),
            load_started: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            last_load_result: Mutex::new(None),
        }
    }

    /// The key of the asset being loaded.
    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    /// The resolved URL to load from.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The output type every consumer of this request asked for.
    pub fn output_type(&self) -> AssetOutputType {
        self.output_type
    }

    /// Requested width in pixels.
    pub fn requested_width(&self) -> i32 {
        self.requested_width
    }

    /// Requested height in pixels.
    pub fn requested_height(&self) -> i32 {
        self.requested_height
    }

    /// Caller data attached to the request.
    pub fn attached_data(&self) -> &serde_json::Value {
        &self.attached_data
    }

    /// Opaque context of the consumer that created the request.
    pub fn context(&self) -> Option<&AssetContext> {
        self.context.as_ref()
    }

    /// Cache blob shared with other requests of the same loader on the
    /// same asset.
    pub fn payload_cache(&self) -> &AssetPayloadCache {
        &self.payload_cache
    }

    /// Delivers the load outcome to the manager.
    ///
    /// Called by the loader, from any thread, once per started load. A
    /// no-op when the manager is gone.
    pub fn complete(&self, result: LoadResult) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_load(self, result);
        }
    }

    /// Starts the load on first call; later calls are no-ops.
    pub(crate) fn start_load_if_needed(self: Arc<Self>) {
        if !self.load_started.swap(true, Ordering::SeqCst) {
            let loader = Arc::clone(&self.loader);
            loader.load(self);
        }
    }

    /// Cancels the request. Idempotent: the loader sees at most one call.
    pub(crate) fn cancel(self: Arc<Self>) {
        if !self.canceled.swap(true, Ordering::SeqCst) {
            let loader = Arc::clone(&self.loader);
            loader.cancel(&self);
        }
    }

    pub(crate) fn increment_consumers(&self) {
        self.consumers_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn decrement_consumers(&self) -> usize {
        self.consumers_count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Number of consumers currently pointing at this request.
    pub fn consumers_count(&self) -> usize {
        self.consumers_count.load(Ordering::SeqCst)
    }

    pub(crate) fn scheduled_for_load(&self) -> bool {
        self.scheduled_for_load.load(Ordering::SeqCst)
    }

    pub(crate) fn set_scheduled_for_load(&self) {
        self.scheduled_for_load.store(true, Ordering::SeqCst);
    }

    pub(crate) fn scheduled_for_cancelation(&self) -> bool {
        self.scheduled_for_cancelation.load(Ordering::SeqCst)
    }

    pub(crate) fn set_scheduled_for_cancelation(&self) {
        self.scheduled_for_cancelation.store(true, Ordering::SeqCst);
    }

    /// The cached result, for consumers that join after completion.
    pub(crate) fn last_load_result(&self) -> Option<LoadResult> {
        self.last_load_result.lock().clone()
    }

    pub(crate) fn set_last_load_result(&self, result: LoadResult) {
        *self.last_load_result.lock() = Some(result);
    }

    pub(crate) fn take_last_load_result(&self) -> Option<LoadResult> {
        self.last_load_result.lock().take()
    }
}
