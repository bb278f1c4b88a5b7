use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::bundle::{AssetCatalog, Bundle, ASSET_CATALOG_PATH};
use crate::bytes_store::{AssetBytesStore, ASSET_BYTES_URL_SCHEME};
use crate::consumer::{AssetConsumer, AssetConsumerState, AssetContext};
use crate::error::AssetError;
use crate::key::{self, AssetKey, AssetLocation};
use crate::loader::{
    AssetLoaderRegistry, AssetOutputType, DownloaderAssetLoaderAdapter, LoadResult, LoadedAsset,
    RemoteDownloader,
};
use crate::managed::{AssetState, ManagedAsset};
use crate::observable::ObservableAsset;
use crate::observer::{AssetLoadObserver, AssetsManagerListener};
use crate::remote::{RemoteModuleManager, RemoteModuleResources};
use crate::request::LoaderRequestHandler;
use crate::resource_loader::ResourceLoader;
use crate::threading::{MainThreadDispatcher, WorkerQueue};
use crate::transaction::Transaction;

/// Everything the manager mutates, guarded by one lock.
pub(crate) struct ManagerState {
    pub(crate) assets: HashMap<AssetKey, ManagedAsset>,
    /// Keys waiting for the next drain.
    scheduled_updates: VecDeque<AssetKey>,
    /// Queue of the drain in progress. Only touched while `drain_thread`
    /// matches the calling thread.
    txn_queue: VecDeque<AssetKey>,
    /// The thread currently running `perform_updates`, if any.
    drain_thread: Option<ThreadId>,
    pub(crate) pending_load_requests: VecDeque<Arc<LoaderRequestHandler>>,
    pending_flush_scheduled: bool,
    pause_updates_count: u32,
    resolve_id_sequence: u64,
    remove_unused_local_assets: bool,
    bytes_store: Option<Arc<AssetBytesStore>>,
    listener: Option<Arc<dyn AssetsManagerListener>>,
}

impl ManagerState {
    fn new() -> Self {
        Self {
            assets: HashMap::new(),
            scheduled_updates: VecDeque::new(),
            txn_queue: VecDeque::new(),
            drain_thread: None,
            pending_load_requests: VecDeque::new(),
            pending_flush_scheduled: false,
            pause_updates_count: 0,
            resolve_id_sequence: 0,
            remove_unused_local_assets: false,
            bytes_store: None,
            listener: None,
        }
    }
}

/// Shared core of the manager; public entry points and async completions
/// all funnel through here. Kept behind an `Arc` so in-flight callbacks can
/// hold weak handles that turn into no-ops once the manager is gone.
pub(crate) struct ManagerShared {
    weak_self: Weak<ManagerShared>,
    pub(crate) state: Mutex<ManagerState>,
    resource_loader: Option<Arc<dyn ResourceLoader>>,
    remote_modules: Arc<dyn RemoteModuleManager>,
    loaders: Arc<AssetLoaderRegistry>,
    worker: Arc<dyn WorkerQueue>,
    main_thread: Arc<dyn MainThreadDispatcher>,
}

/// Coordinates asset loading for the whole runtime.
///
/// A single-writer registry mapping [`AssetKey`]s to live load state. It
/// coalesces concurrent interest from many observers into at most one
/// outstanding load per unique request, drives each asset through
/// resolution, loading and notification, and cancels in-flight loads whose
/// last interested observer disappeared.
///
/// Entry points may be called from any thread; the state machine itself
/// only advances on the main thread, while resolution and loading run on
/// the worker queue.
pub struct AssetsManager {
    shared: Arc<ManagerShared>,
}

impl AssetsManager {
    /// Creates a manager wired to its collaborators.
    pub fn new(
        resource_loader: Option<Arc<dyn ResourceLoader>>,
        remote_modules: Arc<dyn RemoteModuleManager>,
        loaders: Arc<AssetLoaderRegistry>,
        worker: Arc<dyn WorkerQueue>,
        main_thread: Arc<dyn MainThreadDispatcher>,
    ) -> Self {
        let shared = Arc::new_cyclic(|weak_self| ManagerShared {
            weak_self: weak_self.clone(),
            state: Mutex::new(ManagerState::new()),
            resource_loader,
            remote_modules,
            loaders,
            worker,
            main_thread,
        });
        Self { shared }
    }

    /// True if `s` is an asset URL rather than an in-module path.
    pub fn is_asset_url(s: &str) -> bool {
        key::is_asset_url(s)
    }

    /// The registry loaders and downloaders are registered with.
    pub fn loader_registry(&self) -> &Arc<AssetLoaderRegistry> {
        &self.shared.loaders
    }

    /// Returns the observable handle for `key`, creating the managed asset
    /// if this is the first interest in it.
    pub fn get_asset(&self, key: &AssetKey) -> Arc<ObservableAsset> {
        let mut guard = self.shared.state.lock();
        self.shared.lock_free_get_asset(&mut guard, key)
    }

    /// Registers `bytes` with the bytes store and returns the observable
    /// for the minted URL key. The store and its loader adapter are
    /// installed on first use.
    pub fn create_asset_with_bytes(&self, bytes: Vec<u8>) -> Arc<ObservableAsset> {
        self.shared.create_asset_with_bytes(bytes)
    }

    /// True while a managed record exists for `key`.
    pub fn is_asset_alive(&self, key: &AssetKey) -> bool {
        self.shared.state.lock().assets.contains_key(key)
    }

    /// The successfully resolved location of `key`, if any.
    pub fn resolved_asset_location(&self, key: &AssetKey) -> Option<AssetLocation> {
        self.shared
            .state
            .lock()
            .assets
            .get(key)
            .and_then(|managed| managed.location().cloned())
    }

    /// Forces the resolved location of `key`, resetting consumers so they
    /// reload from it. A no-op when the key is already ready at the same
    /// location.
    pub fn set_resolved_asset_location(&self, key: &AssetKey, location: AssetLocation) {
        self.shared.set_resolved_asset_location(key, location);
    }

    /// Registers `observer`'s interest in `key` and schedules an update.
    #[allow(clippy::too_many_arguments)]
    pub fn add_asset_load_observer(
        &self,
        key: &AssetKey,
        observer: &Arc<dyn AssetLoadObserver>,
        context: Option<AssetContext>,
        output_type: AssetOutputType,
        preferred_width: i32,
        preferred_height: i32,
        attached_data: serde_json::Value,
    ) {
        self.shared.add_asset_load_observer(
            key,
            observer,
            context,
            output_type,
            preferred_width,
            preferred_height,
            attached_data,
        );
    }

    /// Withdraws `observer`'s interest in `key`. The consumer is removed by
    /// the update loop, cancelling its load if nothing else shares it.
    pub fn remove_asset_load_observer(&self, key: &AssetKey, observer: &Arc<dyn AssetLoadObserver>) {
        self.shared.remove_asset_load_observer(key, observer);
    }

    /// Declared entry point for changing an observer's preferred size.
    pub fn update_asset_load_observer_preferred_size(
        &self,
        key: &AssetKey,
        _observer: &Arc<dyn AssetLoadObserver>,
        _preferred_width: i32,
        _preferred_height: i32,
    ) {
        // TODO: apply the new preferred size to the matching consumer and
        // re-issue its load.
        let guard = self.shared.state.lock();
        if guard.assets.contains_key(key) {
            self.shared.schedule_asset_update(guard, key.clone());
        }
    }

    /// Installs (or clears) the update-loop listener.
    pub fn set_listener(&self, listener: Option<Arc<dyn AssetsManagerListener>>) {
        self.shared.state.lock().listener = listener;
    }

    /// When set, managed assets for local module keys are collected like
    /// URL keys once nothing references them.
    pub fn set_should_remove_unused_local_assets(&self, remove: bool) {
        self.shared.state.lock().remove_unused_local_assets = remove;
    }

    /// Suspends drains and load flushes until the matching
    /// [`Self::end_pause_updates`].
    pub fn begin_pause_updates(&self) {
        self.shared.state.lock().pause_updates_count += 1;
    }

    /// Ends a pause. When the last pause ends, queued updates drain (inline
    /// when called on the main thread) and load flushes resume.
    pub fn end_pause_updates(&self) {
        self.shared.end_pause_updates();
    }

    /// Drains queued updates inline. A no-op off the main thread or with
    /// nothing queued.
    pub fn flush_updates(&self) {
        self.shared.flush_updates();
    }

    /// Refreshes expected sizes of every observable whose key lives in
    /// `bundle`.
    pub fn on_asset_catalog_changed(&self, bundle: &Arc<dyn Bundle>) {
        self.shared.on_asset_catalog_changed(bundle);
    }
}

impl ManagerShared {
    fn weak_handle(&self) -> Weak<ManagerShared> {
        self.weak_self.clone()
    }

    fn lock_free_get_asset(
        &self,
        state: &mut ManagerState,
        key: &AssetKey,
    ) -> Arc<ObservableAsset> {
        let managed = state
            .assets
            .entry(key.clone())
            .or_insert_with(ManagedAsset::new);
        if let Some(observable) = managed.observable.upgrade() {
            return observable;
        }
        let observable = self.create_observable(key);
        managed.observable = Arc::downgrade(&observable);
        observable
    }

    fn create_observable(&self, key: &AssetKey) -> Arc<ObservableAsset> {
        let observable = Arc::new(ObservableAsset::new(key.clone(), self.weak_handle()));
        if let AssetKey::Bundled { bundle, path } = key {
            let catalog = bundle.asset_catalog(ASSET_CATALOG_PATH);
            update_observable_size(&observable, path, catalog.as_ref());
        }
        observable
    }

    fn create_asset_with_bytes(&self, bytes: Vec<u8>) -> Arc<ObservableAsset> {
        let mut guard = self.state.lock();
        let store = match &guard.bytes_store {
            Some(store) => Arc::clone(store),
            None => {
                let store = Arc::new(AssetBytesStore::new());
                let downloader: Arc<dyn RemoteDownloader> = Arc::clone(&store) as _;
                // Lets loaders registered for downloadable schemes serve
                // non-bytes outputs of minted URLs, and serves the bytes
                // output directly.
                self.loaders
                    .register_downloader(ASSET_BYTES_URL_SCHEME, Arc::clone(&downloader));
                self.loaders
                    .register_asset_loader(Arc::new(DownloaderAssetLoaderAdapter::new(
                        downloader,
                        vec![ASSET_BYTES_URL_SCHEME.to_owned()],
                    )));
                guard.bytes_store = Some(Arc::clone(&store));
                store
            }
        };
        let url = store.register_asset_bytes(bytes);
        let key = AssetKey::url(url);
        self.lock_free_get_asset(&mut guard, &key)
    }

    fn set_resolved_asset_location(&self, key: &AssetKey, location: AssetLocation) {
        let mut guard = self.state.lock();
        let has_consumers;
        {
            let state = &mut *guard;
            let ManagerState {
                assets,
                pending_load_requests,
                ..
            } = state;
            let managed = assets
                .entry(key.clone())
                .or_insert_with(ManagedAsset::new);
            if managed.state == AssetState::Ready && managed.location() == Some(&location) {
                return;
            }
            for consumer in &mut managed.consumers {
                consumer.last_result = None;
                consumer.state = AssetConsumerState::Initial;
                consumer.notified = false;
                update_consumer_request_handler(consumer, None, pending_load_requests);
            }
            managed.resolve_id = 0;
            managed.clear_payload_caches();
            managed.resolved_location = Some(Ok(location));
            managed.state = AssetState::Ready;
            has_consumers = managed.has_consumers();
        }
        self.schedule_flush_load_requests(&mut guard);
        if has_consumers {
            self.schedule_asset_update(guard, key.clone());
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add_asset_load_observer(
        &self,
        key: &AssetKey,
        observer: &Arc<dyn AssetLoadObserver>,
        context: Option<AssetContext>,
        output_type: AssetOutputType,
        preferred_width: i32,
        preferred_height: i32,
        attached_data: serde_json::Value,
    ) {
        let mut guard = self.state.lock();
        {
            let managed = guard
                .assets
                .entry(key.clone())
                .or_insert_with(ManagedAsset::new);
            managed.consumers.push(AssetConsumer::new(
                Arc::downgrade(observer),
                context,
                output_type,
                preferred_width,
                preferred_height,
                attached_data,
            ));
            if managed.state == AssetState::FailedRetryable {
                // A fresh consumer retries the resolution; consumers that
                // failed on the transient error ride along.
                managed.state = AssetState::Initial;
                managed.resolved_location = None;
                for consumer in &mut managed.consumers {
                    if consumer.state == AssetConsumerState::Failed {
                        consumer.state = AssetConsumerState::Initial;
                        consumer.last_result = None;
                        consumer.notified = false;
                    }
                }
            }
        }
        self.schedule_asset_update(guard, key.clone());
    }

    fn remove_asset_load_observer(&self, key: &AssetKey, observer: &Arc<dyn AssetLoadObserver>) {
        let mut guard = self.state.lock();
        let Some(managed) = guard.assets.get_mut(key) else {
            return;
        };
        if let Some(consumer) = managed
            .consumers
            .iter_mut()
            .find(|consumer| consumer.is_observer(observer))
        {
            consumer.clear_observer();
        }
        self.schedule_asset_update(guard, key.clone());
    }

    fn on_asset_catalog_changed(&self, bundle: &Arc<dyn Bundle>) {
        let catalog = bundle.asset_catalog(ASSET_CATALOG_PATH);
        let mut touched = Vec::new();
        let guard = self.state.lock();
        for (key, managed) in &guard.assets {
            if key.bundle().is_some_and(|b| b.name() == bundle.name()) {
                if let (Some(observable), Some(path)) = (managed.observable.upgrade(), key.path()) {
                    update_observable_size(&observable, path, catalog.as_ref());
                    touched.push(observable);
                }
            }
        }
        drop(guard);
        // Dropped outside the lock: one of these may be the last handle and
        // dropping it re-enters the manager.
        drop(touched);
    }

    /// Called by an observable when its last external handle drops, so the
    /// update loop can collect the managed asset.
    pub(crate) fn on_observable_destroyed(&self, key: &AssetKey) {
        debug!("observable of '{key}' destroyed");
        let guard = self.state.lock();
        if !guard.assets.contains_key(key) {
            return;
        }
        self.schedule_asset_update(guard, key.clone());
    }

    // --- update scheduling ---------------------------------------------

    /// Schedules an update for `key`, consuming the caller's lock guard.
    ///
    /// Inside a drain on the calling thread, the key joins the live
    /// transaction queue. Otherwise it joins the manager queue and, when it
    /// is the first entry and updates are not paused, triggers a drain:
    /// inline on the main thread, dispatched to it from anywhere else.
    fn schedule_asset_update(&self, mut guard: MutexGuard<'_, ManagerState>, key: AssetKey) {
        let state = &mut *guard;
        if state.drain_thread == Some(thread::current().id()) {
            debug!("scheduling asset update for '{key}' in the current transaction");
            enqueue_txn_update(state, &key);
            return;
        }
        debug!("scheduling asset update for '{key}' outside of a transaction");
        let trigger = state.pause_updates_count == 0 && state.scheduled_updates.is_empty();
        state.scheduled_updates.push_back(key);
        if trigger {
            if self.main_thread.is_current() {
                self.perform_updates(guard);
            } else {
                drop(guard);
                self.schedule_perform_updates();
            }
        }
    }

    fn schedule_perform_updates(&self) {
        let weak = self.weak_handle();
        self.main_thread.dispatch(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                let guard = shared.state.lock();
                shared.perform_updates(guard);
            }
        }));
    }

    /// Drains the update queue. Runs only on the main thread.
    fn perform_updates(&self, mut guard: MutexGuard<'_, ManagerState>) {
        debug_assert!(self.main_thread.is_current());
        if guard.drain_thread == Some(thread::current().id()) {
            // Re-entered from a callback mid-drain; fold the new work into
            // the live queue instead of nesting a second drain.
            let scheduled = std::mem::take(&mut guard.scheduled_updates);
            for key in scheduled {
                enqueue_txn_update(&mut guard, &key);
            }
            return;
        }
        guard.drain_thread = Some(thread::current().id());
        let scheduled = std::mem::take(&mut guard.scheduled_updates);
        debug!(
            "performing asset updates with {} initial operations",
            scheduled.len()
        );
        for key in scheduled {
            enqueue_txn_update(&mut guard, &key);
        }

        let mut transaction = Transaction::new(&self.state, guard);
        loop {
            transaction.acquire_lock();
            let Some(key) = transaction.state().txn_queue.pop_front() else {
                break;
            };
            self.update_asset(&mut transaction, &key);
        }
        transaction.state().drain_thread = None;
        let listener = transaction.state().listener.clone();
        transaction.release_lock();
        if let Some(listener) = listener {
            listener.on_performed_updates();
        }
    }

    fn update_asset(&self, transaction: &mut Transaction<'_>, key: &AssetKey) {
        let pre_state = {
            let state = transaction.state();
            let Some(managed) = state.assets.get(key) else {
                return;
            };
            managed.state
        };
        debug!("updating asset '{key}' in state {pre_state:?}");

        if !remove_managed_asset_if_needed(transaction.state(), key) {
            match pre_state {
                AssetState::Initial => {
                    let has_consumers = transaction
                        .state()
                        .assets
                        .get(key)
                        .is_some_and(ManagedAsset::has_consumers);
                    if has_consumers {
                        self.resolve_asset_location(transaction, key);
                    }
                }
                AssetState::ResolvingLocation => {}
                AssetState::Ready | AssetState::FailedRetryable | AssetState::FailedPermanently => {
                    self.update_asset_consumers(transaction, key);
                }
            }
        }

        let listener = transaction.state().listener.clone();
        if let Some(listener) = listener {
            let snapshot = transaction
                .state()
                .assets
                .get(key)
                .map_or(pre_state, |managed| managed.state);
            transaction.release_lock();
            listener.on_managed_asset_updated(key, snapshot);
            transaction.acquire_lock();
        }
    }

    // --- location resolution -------------------------------------------

    fn resolve_asset_location(&self, transaction: &mut Transaction<'_>, key: &AssetKey) {
        let resolve_id = {
            let state = transaction.state();
            let ManagerState {
                assets,
                resolve_id_sequence,
                ..
            } = state;
            let Some(managed) = assets.get_mut(key) else {
                return;
            };
            debug_assert_eq!(managed.state, AssetState::Initial);
            managed.state = AssetState::ResolvingLocation;
            *resolve_id_sequence += 1;
            managed.resolve_id = *resolve_id_sequence;
            *resolve_id_sequence
        };
        debug!("resolving asset location of '{key}'");

        match key {
            AssetKey::Url(url) => {
                // URL assets resolve to themselves, immediately.
                let location = AssetLocation::new(url.clone(), false);
                let state = transaction.state();
                if let Some(managed) = state.assets.get_mut(key) {
                    update_asset_location(key, managed, Ok(location));
                }
                enqueue_txn_update(state, key);
            }
            AssetKey::Bundled { bundle, .. } => {
                let bundle = Arc::clone(bundle);
                let weak = self.weak_handle();
                let key = key.clone();
                transaction.release_lock();
                if bundle.has_remote_assets() {
                    self.remote_modules.load_resources(
                        bundle.name(),
                        Box::new(move |result| {
                            let Some(shared) = weak.upgrade() else {
                                return;
                            };
                            let worker = Arc::clone(&shared.worker);
                            worker.dispatch(Box::new(move || {
                                shared.on_loading_remote_resources_completed(
                                    &key, result, resolve_id,
                                );
                            }));
                        }),
                    );
                } else {
                    self.worker.dispatch(Box::new(move || {
                        if let Some(shared) = weak.upgrade() {
                            shared.resolve_local_asset_location_and_update(&key, resolve_id);
                        }
                    }));
                }
            }
        }
    }

    fn resolve_remote_asset_location(
        &self,
        bundle: &Arc<dyn Bundle>,
        path: &str,
        result: &Result<Arc<dyn RemoteModuleResources>, AssetError>,
    ) -> Result<AssetLocation, AssetError> {
        let resources = match result {
            Ok(resources) => resources,
            Err(error) => return Err(error.clone()),
        };
        if let Some(cache_url) = resources.resource_cache_url(path) {
            return Ok(AssetLocation::new(cache_url, false));
        }
        if let Some(resource_loader) = &self.resource_loader {
            if let Some(url) = resource_loader.resolve_local_asset_url(bundle.name(), path) {
                return Ok(AssetLocation::new(url, true));
            }
        }
        Err(AssetError::NotFoundInRemoteModule {
            path: path.to_owned(),
            module: bundle.name().to_owned(),
            candidates: resources
                .all_urls()
                .into_iter()
                .map(|(path, _)| path)
                .collect(),
        })
    }

    fn resolve_local_asset_location(
        &self,
        bundle: &Arc<dyn Bundle>,
        path: &str,
    ) -> Result<AssetLocation, AssetError> {
        if let Some(resource_loader) = &self.resource_loader {
            if let Some(url) = resource_loader.resolve_local_asset_url(bundle.name(), path) {
                return Ok(AssetLocation::new(url, true));
            }
        }
        Err(AssetError::NotFoundInLocalModule {
            path: path.to_owned(),
            module: bundle.name().to_owned(),
        })
    }

    /// Worker-side completion of a local resolution.
    fn resolve_local_asset_location_and_update(&self, key: &AssetKey, resolve_id: u64) {
        let location = match (key.bundle(), key.path()) {
            (Some(bundle), Some(path)) => self.resolve_local_asset_location(bundle, path),
            _ => return,
        };
        let mut guard = self.state.lock();
        {
            let Some(managed) = guard.assets.get_mut(key) else {
                debug!("dropping local resolution of vanished asset '{key}'");
                return;
            };
            if managed.resolve_id != resolve_id {
                debug!(
                    "dropping stale local resolution of '{key}' (resolve id {resolve_id}, current {})",
                    managed.resolve_id
                );
                return;
            }
            update_asset_location(key, managed, location);
        }
        self.schedule_asset_update(guard, key.clone());
    }

    /// Worker-side completion of a remote module fetch.
    fn on_loading_remote_resources_completed(
        &self,
        key: &AssetKey,
        result: Result<Arc<dyn RemoteModuleResources>, AssetError>,
        resolve_id: u64,
    ) {
        let resolved = match (key.bundle(), key.path()) {
            (Some(bundle), Some(path)) => self.resolve_remote_asset_location(bundle, path, &result),
            _ => return,
        };
        let mut guard = self.state.lock();
        {
            let Some(managed) = guard.assets.get_mut(key) else {
                debug!("no managed asset found for '{key}'");
                return;
            };
            if managed.resolve_id != resolve_id {
                debug!(
                    "dropping stale remote resolution of '{key}' (resolve id {resolve_id}, current {})",
                    managed.resolve_id
                );
                return;
            }
            debug_assert_eq!(managed.state, AssetState::ResolvingLocation);
            match &result {
                Ok(_) => update_asset_location(key, managed, resolved),
                Err(error) => {
                    warn!("failed to load remote resources for '{key}': {error}");
                    managed.state = AssetState::FailedRetryable;
                    managed.resolved_location = Some(Err(error.clone()));
                }
            }
        }
        self.schedule_asset_update(guard, key.clone());
    }

    // --- consumer fan-out ----------------------------------------------

    fn update_asset_consumers(&self, transaction: &mut Transaction<'_>, key: &AssetKey) {
        let (candidate, has_more) = {
            let state = transaction.state();
            let Some(managed) = state.assets.get(key) else {
                return;
            };
            debug_assert!(matches!(
                managed.state,
                AssetState::Ready | AssetState::FailedRetryable | AssetState::FailedPermanently
            ));
            next_consumer_to_update(managed)
        };
        let Some(index) = candidate else {
            return;
        };
        if has_more {
            // Another step this drain for the remaining candidates.
            enqueue_txn_update(transaction.state(), key);
        }
        self.do_update_asset_consumer(transaction, key, index);
    }

    fn do_update_asset_consumer(
        &self,
        transaction: &mut Transaction<'_>,
        key: &AssetKey,
        index: usize,
    ) {
        enum Step {
            Remove,
            Fail(AssetError),
            Load,
            Notify(Option<LoadedAsset>, Option<AssetError>),
            Skip,
        }

        let step = {
            let state = transaction.state();
            let Some(managed) = state.assets.get(key) else {
                return;
            };
            let Some(consumer) = managed.consumers.get(index) else {
                return;
            };
            if consumer.observer_gone() {
                Step::Remove
            } else {
                match consumer.state {
                    AssetConsumerState::Initial => match managed.state {
                        AssetState::FailedRetryable | AssetState::FailedPermanently => Step::Fail(
                            managed
                                .resolution_error()
                                .cloned()
                                .expect("failed asset carries an error"),
                        ),
                        _ => Step::Load,
                    },
                    // Loading consumers are only selected for removal;
                    // treat anything else as a stray removal too.
                    AssetConsumerState::Loading => Step::Remove,
                    AssetConsumerState::Failed => {
                        let error = match &consumer.last_result {
                            Some(Err(error)) => error.clone(),
                            _ => AssetError::LoadFailed("load failed".to_owned()),
                        };
                        Step::Notify(None, Some(error))
                    }
                    AssetConsumerState::Loaded => {
                        let asset = match &consumer.last_result {
                            Some(Ok(asset)) => Some(Arc::clone(asset)),
                            _ => None,
                        };
                        Step::Notify(asset, None)
                    }
                    AssetConsumerState::Removed => Step::Skip,
                }
            }
        };

        match step {
            Step::Remove => self.remove_asset_consumer(transaction, key, index),
            Step::Fail(error) => {
                {
                    let state = transaction.state();
                    if let Some(consumer) = state
                        .assets
                        .get_mut(key)
                        .and_then(|managed| managed.consumers.get_mut(index))
                    {
                        consumer.state = AssetConsumerState::Failed;
                        consumer.last_result = Some(Err(error));
                    }
                }
                enqueue_txn_update(transaction.state(), key);
            }
            Step::Load => self.load_for_consumer(transaction, key, index),
            Step::Notify(asset, error) => {
                self.notify_asset_consumer(transaction, key, index, asset, error);
            }
            Step::Skip => {}
        }
    }

    fn remove_asset_consumer(&self, transaction: &mut Transaction<'_>, key: &AssetKey, index: usize) {
        let enqueued = {
            let state = transaction.state();
            let ManagerState {
                assets,
                pending_load_requests,
                ..
            } = state;
            let Some(managed) = assets.get_mut(key) else {
                return;
            };
            if index >= managed.consumers.len() {
                return;
            }
            let mut consumer = managed.consumers.remove(index);
            consumer.state = AssetConsumerState::Removed;
            consumer.last_result = None;
            update_consumer_request_handler(&mut consumer, None, pending_load_requests)
        };
        if enqueued {
            self.schedule_flush_load_requests(transaction.state());
        }
    }

    fn notify_asset_consumer(
        &self,
        transaction: &mut Transaction<'_>,
        key: &AssetKey,
        index: usize,
        asset: Option<LoadedAsset>,
        error: Option<AssetError>,
    ) {
        let (observer, observable) = {
            let state = transaction.state();
            let Some(managed) = state.assets.get_mut(key) else {
                return;
            };
            let observable = managed.observable.upgrade();
            let Some(consumer) = managed.consumers.get_mut(index) else {
                return;
            };
            let Some(observer) = consumer.observer() else {
                return;
            };
            consumer.notified = true;
            (observer, observable)
        };
        let error_string = error.map(|error| {
            warn!("notifying error for consumer of asset '{key}': {error}");
            error.to_string()
        });
        transaction.release_lock();
        observer.on_load(observable.as_ref(), asset, error_string);
        // Dropped while unlocked: the observable handle may be the last one
        // and its drop re-enters the manager.
        drop(observable);
        drop(observer);
        transaction.acquire_lock();
    }

    // --- load dispatch --------------------------------------------------

    fn load_for_consumer(&self, transaction: &mut Transaction<'_>, key: &AssetKey, index: usize) {
        let (location, output_type) = {
            let state = transaction.state();
            let Some(managed) = state.assets.get(key) else {
                return;
            };
            let Some(location) = managed.location().cloned() else {
                return;
            };
            let Some(consumer) = managed.consumers.get(index) else {
                return;
            };
            (location, consumer.output_type)
        };

        let Some(loader) = self.loaders.resolve(location.scheme(), output_type) else {
            {
                let state = transaction.state();
                if let Some(consumer) = state
                    .assets
                    .get_mut(key)
                    .and_then(|managed| managed.consumers.get_mut(index))
                {
                    consumer.state = AssetConsumerState::Failed;
                    consumer.last_result = Some(Err(AssetError::LoaderNotFound {
                        scheme: location.scheme().to_owned(),
                        output_type,
                    }));
                }
            }
            enqueue_txn_update(transaction.state(), key);
            return;
        };

        debug!("starting to load asset '{key}'");

        let enqueued = {
            let state = transaction.state();
            let ManagerState {
                assets,
                pending_load_requests,
                txn_queue,
                ..
            } = state;
            let Some(managed) = assets.get_mut(key) else {
                return;
            };
            let Some(consumer) = managed.consumers.get(index) else {
                return;
            };
            let preferred_width = consumer.preferred_width;
            let preferred_height = consumer.preferred_height;
            let attached_data = consumer.attached_data.clone();
            let context = consumer.context.clone();

            managed.consumers[index].state = AssetConsumerState::Loading;

            // When the loader can share artifacts, piggyback on a sibling's
            // request with the same parameters instead of starting another.
            let shared_request = if loader.can_reuse_loaded_assets() {
                managed
                    .consumers
                    .iter()
                    .enumerate()
                    .filter(|(sibling_index, _)| *sibling_index != index)
                    .find_map(|(_, sibling)| {
                        let request = sibling.request.as_ref()?;
                        (request.requested_width() == preferred_width
                            && request.requested_height() == preferred_height
                            && *request.attached_data() == attached_data
                            && sibling.output_type == output_type)
                            .then(|| Arc::clone(request))
                    })
            } else {
                None
            };

            let (request, reused) = match shared_request {
                Some(request) => (request, true),
                None => (
                    Arc::new(LoaderRequestHandler::new(
                        self.weak_handle(),
                        context,
                        key.clone(),
                        managed.payload_cache_for(&loader),
                        location.url().to_owned(),
                        output_type,
                        preferred_width,
                        preferred_height,
                        attached_data,
                        Arc::clone(&loader),
                    )),
                    false,
                ),
            };

            let enqueued = update_consumer_request_handler(
                &mut managed.consumers[index],
                Some(Arc::clone(&request)),
                pending_load_requests,
            );

            if reused {
                if let Some(result) = request.last_load_result() {
                    managed.consumers[index].apply_load_result(&result);
                    if !txn_queue.contains(key) {
                        txn_queue.push_back(key.clone());
                    }
                }
            }
            enqueued
        };
        if enqueued {
            self.schedule_flush_load_requests(transaction.state());
        }
    }

    fn schedule_flush_load_requests(&self, state: &mut ManagerState) {
        if !state.pending_flush_scheduled && !state.pending_load_requests.is_empty() {
            state.pending_flush_scheduled = true;
            let weak = self.weak_handle();
            self.worker.dispatch(Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.flush_load_requests();
                }
            }));
        }
    }

    /// Worker-side: starts or cancels every pending request. The lock is
    /// held between queue operations but never across loader calls.
    fn flush_load_requests(&self) {
        let mut guard = self.state.lock();
        loop {
            if guard.pause_updates_count != 0 {
                break;
            }
            let Some(request) = guard.pending_load_requests.pop_front() else {
                break;
            };
            if request.scheduled_for_cancelation() {
                // Release the cached artifact now rather than whenever the
                // request instance itself goes away.
                let last_result = request.take_last_load_result();
                drop(guard);
                request.cancel();
                drop(last_result);
            } else {
                drop(guard);
                request.start_load_if_needed();
            }
            guard = self.state.lock();
        }
        guard.pending_flush_scheduled = false;
    }

    // --- completion -----------------------------------------------------

    /// Called by a request handler when its loader delivered.
    pub(crate) fn on_load(&self, request: &LoaderRequestHandler, result: LoadResult) {
        let key = request.key().clone();
        match &result {
            Ok(_) => debug!("asset '{key}' finished loading"),
            Err(error) => warn!("asset '{key}' finished loading with error: {error}"),
        }
        let mut guard = self.state.lock();
        {
            let Some(managed) = guard.assets.get_mut(&key) else {
                return;
            };
            if request.scheduled_for_cancelation() {
                debug!("discarding load result of a canceled request for '{key}'");
                return;
            }
            // Cached for consumers that join this request later.
            request.set_last_load_result(result.clone());
            for consumer in &mut managed.consumers {
                if consumer
                    .request
                    .as_ref()
                    .is_some_and(|held| std::ptr::eq(Arc::as_ptr(held), request))
                {
                    consumer.apply_load_result(&result);
                }
            }
        }
        self.schedule_asset_update(guard, key);
    }

    // --- pause / flush ---------------------------------------------------

    fn end_pause_updates(&self) {
        let mut guard = self.state.lock();
        assert!(guard.pause_updates_count > 0, "unbalanced end_pause_updates");
        let is_main_thread = self.main_thread.is_current();
        if guard.pause_updates_count == 1 && !guard.scheduled_updates.is_empty() && is_main_thread {
            self.perform_updates(guard);
            guard = self.state.lock();
        }
        guard.pause_updates_count -= 1;
        if guard.pause_updates_count == 0 {
            self.schedule_flush_load_requests(&mut guard);
            if !guard.scheduled_updates.is_empty() {
                if is_main_thread {
                    // Updates arrived while the drain above was running.
                    self.perform_updates(guard);
                } else {
                    drop(guard);
                    self.schedule_perform_updates();
                }
            }
        }
    }

    fn flush_updates(&self) {
        let guard = self.state.lock();
        if guard.scheduled_updates.is_empty() || !self.main_thread.is_current() {
            return;
        }
        self.perform_updates(guard);
    }
}

// --- free helpers --------------------------------------------------------

fn enqueue_txn_update(state: &mut ManagerState, key: &AssetKey) {
    if !state.txn_queue.contains(key) {
        state.txn_queue.push_back(key.clone());
    }
}

fn update_observable_size(
    observable: &ObservableAsset,
    path: &str,
    catalog: Option<&Arc<AssetCatalog>>,
) {
    let specs = catalog
        .and_then(|catalog| catalog.specs_for_name(path))
        .unwrap_or_default();
    observable.set_expected_size(specs.width, specs.height);
}

/// Erases a managed asset nobody references anymore. Local module assets
/// are only collected when the manager is configured to do so.
fn remove_managed_asset_if_needed(state: &mut ManagerState, key: &AssetKey) -> bool {
    {
        let Some(managed) = state.assets.get(key) else {
            return false;
        };
        if (!key.is_url() && !state.remove_unused_local_assets)
            || managed.has_consumers()
            || managed.observable_alive()
        {
            return false;
        }
    }
    state.assets.remove(key);
    if let (Some(store), Some(url)) = (&state.bytes_store, key.as_url()) {
        if AssetBytesStore::is_asset_bytes_url(url) {
            store.unregister_asset_bytes(url);
        }
    }
    debug!("removed unused asset '{key}'");
    true
}

/// Picks the next consumer the update loop should advance.
///
/// Consumers are scanned in insertion order. Cleanup of a consumer whose
/// observer went away is eligible regardless of its notification state so a
/// removed observer can never strand it; everything else is eligible when
/// un-notified and settled (`Initial`, `Failed` or `Loaded`). The first
/// eligible consumer wins — a removal candidate found first keeps its
/// priority over later candidates — and `has_more` reports whether another
/// candidate is waiting.
fn next_consumer_to_update(managed: &ManagedAsset) -> (Option<usize>, bool) {
    let mut candidate = None;
    let mut candidates = 0usize;
    for (index, consumer) in managed.consumers.iter().enumerate() {
        let eligible = if consumer.observer_gone() {
            consumer.state != AssetConsumerState::Removed
        } else {
            !consumer.notified
                && matches!(
                    consumer.state,
                    AssetConsumerState::Initial
                        | AssetConsumerState::Failed
                        | AssetConsumerState::Loaded
                )
        };
        if !eligible {
            continue;
        }
        candidates += 1;
        if candidate.is_none() {
            candidate = Some(index);
        } else {
            break;
        }
    }
    (candidate, candidates > 1)
}

fn update_asset_location(
    key: &AssetKey,
    managed: &mut ManagedAsset,
    location: Result<AssetLocation, AssetError>,
) {
    debug_assert_eq!(managed.state, AssetState::ResolvingLocation);
    match location {
        Ok(location) => {
            debug!("updated asset location of '{key}'");
            managed.state = AssetState::Ready;
            managed.resolved_location = Some(Ok(location));
        }
        Err(error) => {
            warn!("failed to resolve asset location of '{key}': {error}");
            managed.state = AssetState::FailedPermanently;
            managed.resolved_location = Some(Err(error));
        }
    }
}

/// Swaps the request a consumer points at, maintaining handler refcounts
/// and scheduling newly idle or newly needed handlers for the flush pass.
/// Returns true when the pending queue changed.
fn update_consumer_request_handler(
    consumer: &mut AssetConsumer,
    new_request: Option<Arc<LoaderRequestHandler>>,
    pending: &mut VecDeque<Arc<LoaderRequestHandler>>,
) -> bool {
    let mut enqueued = false;
    let outgoing = std::mem::replace(&mut consumer.request, new_request.clone());
    if let Some(outgoing) = outgoing {
        if outgoing.decrement_consumers() == 0 && !outgoing.scheduled_for_cancelation() {
            outgoing.set_scheduled_for_cancelation();
            pending.push_back(outgoing);
            enqueued = true;
        }
    }
    if let Some(incoming) = new_request {
        incoming.increment_consumers();
        if !incoming.scheduled_for_load() {
            incoming.set_scheduled_for_load();
            pending.push_back(incoming);
            enqueued = true;
        }
    }
    enqueued
}

#[cfg(test)]
impl AssetsManager {
    pub(crate) fn managed_state(&self, key: &AssetKey) -> Option<AssetState> {
        self.shared
            .state
            .lock()
            .assets
            .get(key)
            .map(|managed| managed.state)
    }

    pub(crate) fn consumer_count(&self, key: &AssetKey) -> usize {
        self.shared
            .state
            .lock()
            .assets
            .get(key)
            .map_or(0, |managed| managed.consumers.len())
    }

    pub(crate) fn pending_load_request_count(&self) -> usize {
        self.shared.state.lock().pending_load_requests.len()
    }
}
