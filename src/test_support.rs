//! Deterministic fakes for every collaborator, used by the in-module test
//! suites. Main-thread and worker dispatch are manual pumps so tests drive
//! the pipeline step by step on one thread.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bundle::{AssetCatalog, Bundle};
use crate::error::AssetError;
use crate::loader::{AssetLoader, AssetOutputType, LoadedAsset};
use crate::observable::ObservableAsset;
use crate::observer::AssetLoadObserver;
use crate::remote::{RemoteModuleManager, RemoteModuleResources, RemoteResourcesCompletion};
use crate::request::LoaderRequestHandler;
use crate::resource_loader::ResourceLoader;
use crate::threading::{Job, MainThreadDispatcher, WorkerQueue};

/// Manual main-thread pump. The test thread counts as the main thread.
#[derive(Default)]
pub(crate) struct ManualMainThread {
    jobs: Mutex<VecDeque<Job>>,
}

impl ManualMainThread {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn run_pending(&self) {
        loop {
            let Some(job) = self.jobs.lock().pop_front() else {
                break;
            };
            job();
        }
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.jobs.lock().len()
    }
}

impl MainThreadDispatcher for ManualMainThread {
    fn is_current(&self) -> bool {
        true
    }

    fn dispatch(&self, job: Job) {
        self.jobs.lock().push_back(job);
    }
}

/// Manual worker pump.
#[derive(Default)]
pub(crate) struct ManualWorker {
    jobs: Mutex<VecDeque<Job>>,
}

impl ManualWorker {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn run_pending(&self) {
        loop {
            let Some(job) = self.jobs.lock().pop_front() else {
                break;
            };
            job();
        }
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.jobs.lock().len()
    }
}

impl WorkerQueue for ManualWorker {
    fn dispatch(&self, job: Job) {
        self.jobs.lock().push_back(job);
    }
}

/// One observer notification, as recorded by [`RecordingObserver`].
pub(crate) struct Notification {
    pub(crate) asset: Option<LoadedAsset>,
    pub(crate) error: Option<String>,
    pub(crate) had_observable: bool,
}

/// Observer recording every delivery.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingObserver {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn count(&self) -> usize {
        self.notifications.lock().len()
    }

    pub(crate) fn successes(&self) -> usize {
        self.notifications
            .lock()
            .iter()
            .filter(|n| n.asset.is_some())
            .count()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.notifications
            .lock()
            .iter()
            .filter_map(|n| n.error.clone())
            .collect()
    }

    pub(crate) fn last_asset(&self) -> Option<LoadedAsset> {
        self.notifications
            .lock()
            .last()
            .and_then(|n| n.asset.clone())
    }

    pub(crate) fn first_had_observable(&self) -> bool {
        self.notifications
            .lock()
            .first()
            .is_some_and(|n| n.had_observable)
    }
}

impl AssetLoadObserver for RecordingObserver {
    fn on_load(
        &self,
        observable: Option<&Arc<ObservableAsset>>,
        asset: Option<LoadedAsset>,
        error: Option<String>,
    ) {
        self.notifications.lock().push(Notification {
            asset,
            error,
            had_observable: observable.is_some(),
        });
    }
}

/// Bundle fake with a switchable catalog.
pub(crate) struct TestBundle {
    name: String,
    remote: bool,
    catalog: Mutex<Option<Arc<AssetCatalog>>>,
}

impl TestBundle {
    pub(crate) fn local(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            remote: false,
            catalog: Mutex::new(None),
        }
    }

    pub(crate) fn remote(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            remote: true,
            catalog: Mutex::new(None),
        }
    }

    pub(crate) fn set_catalog(&self, catalog: Arc<AssetCatalog>) {
        *self.catalog.lock() = Some(catalog);
    }
}

impl Bundle for TestBundle {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_remote_assets(&self) -> bool {
        self.remote
    }

    fn asset_catalog(&self, _path: &str) -> Option<Arc<AssetCatalog>> {
        self.catalog.lock().clone()
    }
}

/// Resource loader backed by a static `(module, path) -> url` table.
#[derive(Default)]
pub(crate) struct StaticResourceLoader {
    urls: HashMap<(String, String), String>,
}

impl StaticResourceLoader {
    pub(crate) fn with(entries: &[(&str, &str, &str)]) -> Self {
        let mut urls = HashMap::new();
        for (module, path, url) in entries {
            urls.insert(((*module).to_owned(), (*path).to_owned()), (*url).to_owned());
        }
        Self { urls }
    }
}

impl ResourceLoader for StaticResourceLoader {
    fn resolve_local_asset_url(&self, module_name: &str, path: &str) -> Option<String> {
        self.urls
            .get(&(module_name.to_owned(), path.to_owned()))
            .cloned()
    }
}

/// Remote module resources backed by a static `path -> url` table.
pub(crate) struct StaticRemoteResources {
    urls: Vec<(String, String)>,
}

impl StaticRemoteResources {
    pub(crate) fn with(entries: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            urls: entries
                .iter()
                .map(|(path, url)| ((*path).to_owned(), (*url).to_owned()))
                .collect(),
        })
    }
}

impl RemoteModuleResources for StaticRemoteResources {
    fn resource_cache_url(&self, path: &str) -> Option<String> {
        self.urls
            .iter()
            .find(|(candidate, _)| candidate == path)
            .map(|(_, url)| url.clone())
    }

    fn all_urls(&self) -> Vec<(String, String)> {
        self.urls.clone()
    }
}

/// Remote module manager completing each call with the next scripted
/// result. Completions run synchronously.
#[derive(Default)]
pub(crate) struct ScriptedRemoteModules {
    results: Mutex<VecDeque<Result<Arc<dyn RemoteModuleResources>, AssetError>>>,
    calls: AtomicUsize,
}

impl ScriptedRemoteModules {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push_result(&self, result: Result<Arc<dyn RemoteModuleResources>, AssetError>) {
        self.results.lock().push_back(result);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RemoteModuleManager for ScriptedRemoteModules {
    fn load_resources(&self, module_name: &str, completion: RemoteResourcesCompletion) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = self.results.lock().pop_front().unwrap_or_else(|| {
            Err(AssetError::RemoteModule {
                module: module_name.to_owned(),
                reason: "no scripted result".to_owned(),
            })
        });
        completion(result);
    }
}

enum FakeLoaderMode {
    /// Completes with the configured artifact inside `load`.
    Immediate,
    /// Parks requests until the test completes them.
    Manual,
}

/// Loader fake serving one `(scheme, output_type)` pair.
pub(crate) struct FakeLoader {
    scheme: String,
    output_type: AssetOutputType,
    reuse: bool,
    mode: FakeLoaderMode,
    artifact: Mutex<Option<LoadedAsset>>,
    pending: Mutex<Vec<Arc<LoaderRequestHandler>>>,
    loads: AtomicUsize,
    cancels: AtomicUsize,
}

impl FakeLoader {
    pub(crate) fn immediate(scheme: &str, output_type: AssetOutputType) -> Self {
        Self {
            scheme: scheme.to_owned(),
            output_type,
            reuse: false,
            mode: FakeLoaderMode::Immediate,
            artifact: Mutex::new(Some(Arc::new("artifact".to_owned()) as LoadedAsset)),
            pending: Mutex::new(Vec::new()),
            loads: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        }
    }

    pub(crate) fn manual(scheme: &str, output_type: AssetOutputType) -> Self {
        Self {
            mode: FakeLoaderMode::Manual,
            ..Self::immediate(scheme, output_type)
        }
    }

    pub(crate) fn reusable(mut self) -> Self {
        self.reuse = true;
        self
    }

    /// Makes `load` complete with `Ok(None)`.
    pub(crate) fn with_null_artifact(self) -> Self {
        *self.artifact.lock() = None;
        self
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub(crate) fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Completes every parked request with the configured artifact.
    pub(crate) fn complete_pending(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        let artifact = self.artifact.lock().clone();
        for request in pending {
            request.complete(Ok(artifact.clone()));
        }
    }

    /// Completes every parked request with an error.
    pub(crate) fn fail_pending(&self, message: &str) {
        let pending = std::mem::take(&mut *self.pending.lock());
        for request in pending {
            request.complete(Err(AssetError::LoadFailed(message.to_owned())));
        }
    }
}

impl AssetLoader for FakeLoader {
    fn handles(&self, scheme: &str, output_type: AssetOutputType) -> bool {
        scheme == self.scheme && output_type == self.output_type
    }

    fn can_reuse_loaded_assets(&self) -> bool {
        self.reuse
    }

    fn load(&self, request: Arc<LoaderRequestHandler>) {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            FakeLoaderMode::Immediate => {
                let artifact = self.artifact.lock().clone();
                request.complete(Ok(artifact));
            }
            FakeLoaderMode::Manual => self.pending.lock().push(request),
        }
    }

    fn cancel(&self, _request: &Arc<LoaderRequestHandler>) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}
