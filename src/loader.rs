use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AssetError;
use crate::request::LoaderRequestHandler;

/// The kind of artifact a consumer wants out of a load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssetOutputType {
    /// A decoded image.
    Image,
    /// The raw bytes of the asset.
    Bytes,
}

impl fmt::Display for AssetOutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Bytes => f.write_str("bytes"),
        }
    }
}

/// A decoded artifact, opaque to the coordination engine.
pub type LoadedAsset = Arc<dyn Any + Send + Sync>;

/// Outcome of one load. `Ok(None)` is a loader that reported success
/// without an artifact; consumers see it as [`AssetError::NullAsset`].
pub type LoadResult = Result<Option<LoadedAsset>, AssetError>;

/// Turns a resolved URL into a decoded artifact.
///
/// Loaders are driven through [`LoaderRequestHandler`]s: `load` starts the
/// work and the loader calls [`LoaderRequestHandler::complete`] exactly once
/// per started request, from any thread. `cancel` is advisory; a completion
/// racing a cancellation is discarded by the manager.
pub trait AssetLoader: Send + Sync {
    /// True if this loader serves the given scheme and output type.
    fn handles(&self, scheme: &str, output_type: AssetOutputType) -> bool;

    /// True if artifacts produced by this loader may be shared between
    /// consumers requesting the same size, output type and attached data.
    fn can_reuse_loaded_assets(&self) -> bool {
        false
    }

    /// Starts loading `request`.
    fn load(&self, request: Arc<LoaderRequestHandler>);

    /// Cancels an in-flight request. Called at most once per request.
    fn cancel(&self, _request: &Arc<LoaderRequestHandler>) {}
}

/// Fetches raw bytes for a URL scheme.
pub trait RemoteDownloader: Send + Sync {
    /// Downloads `url` and hands the bytes (or the failure) to `completion`.
    fn download(
        &self,
        url: &str,
        completion: Box<dyn FnOnce(Result<Arc<Vec<u8>>, AssetError>) + Send>,
    );
}

#[derive(Default)]
struct RegistryInner {
    loaders: Vec<Arc<dyn AssetLoader>>,
    downloaders: HashMap<String, Arc<dyn RemoteDownloader>>,
}

/// Registry of asset loaders and downloaders, keyed by URL scheme.
#[derive(Default)]
pub struct AssetLoaderRegistry {
    inner: Mutex<RegistryInner>,
}

impl AssetLoaderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a loader. Later registrations win when several loaders
    /// handle the same scheme and output type.
    pub fn register_asset_loader(&self, loader: Arc<dyn AssetLoader>) {
        self.inner.lock().loaders.push(loader);
    }

    /// Registers the downloader serving `scheme`.
    pub fn register_downloader(&self, scheme: &str, downloader: Arc<dyn RemoteDownloader>) {
        self.inner
            .lock()
            .downloaders
            .insert(scheme.to_owned(), downloader);
    }

    /// The loader for `(scheme, output_type)`, if one is registered.
    pub fn resolve(&self, scheme: &str, output_type: AssetOutputType) -> Option<Arc<dyn AssetLoader>> {
        self.inner
            .lock()
            .loaders
            .iter()
            .rev()
            .find(|loader| loader.handles(scheme, output_type))
            .cloned()
    }

    /// The downloader for `scheme`, if one is registered.
    pub fn downloader(&self, scheme: &str) -> Option<Arc<dyn RemoteDownloader>> {
        self.inner.lock().downloaders.get(scheme).cloned()
    }
}

/// Adapts a [`RemoteDownloader`] into a bytes-output [`AssetLoader`] for a
/// fixed set of schemes, so byte buffers minted by the bytes store can be
/// consumed through the regular loading pipeline.
pub struct DownloaderAssetLoaderAdapter {
    downloader: Arc<dyn RemoteDownloader>,
    schemes: Vec<String>,
}

impl DownloaderAssetLoaderAdapter {
    /// Wraps `downloader` for the given schemes.
    pub fn new(downloader: Arc<dyn RemoteDownloader>, schemes: Vec<String>) -> Self {
        Self {
            downloader,
            schemes,
        }
    }
}

impl AssetLoader for DownloaderAssetLoaderAdapter {
    fn handles(&self, scheme: &str, output_type: AssetOutputType) -> bool {
        output_type == AssetOutputType::Bytes && self.schemes.iter().any(|s| s == scheme)
    }

    fn can_reuse_loaded_assets(&self) -> bool {
        // The artifact is the immutable byte buffer itself.
        true
    }

    fn load(&self, request: Arc<LoaderRequestHandler>) {
        let url = request.url().to_string();
        self.downloader.download(
            &url,
            Box::new(move |result| {
                request.complete(result.map(|bytes| Some(bytes as LoadedAsset)));
            }),
        );
    }
}
