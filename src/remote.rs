use std::sync::Arc;

use crate::error::AssetError;

/// Completion callback of a remote module fetch.
pub type RemoteResourcesCompletion =
    Box<dyn FnOnce(Result<Arc<dyn RemoteModuleResources>, AssetError>) + Send>;

/// Fetches remote modules on demand.
///
/// Implemented by the host. `load_resources` may complete synchronously or
/// from any thread; the manager hops completions onto its worker queue.
pub trait RemoteModuleManager: Send + Sync {
    /// Fetches the named module and reports its URL manifest.
    fn load_resources(&self, module_name: &str, completion: RemoteResourcesCompletion);
}

/// The URL manifest of a fetched remote module.
pub trait RemoteModuleResources: Send + Sync {
    /// The cache URL of `path` inside the module, if the module ships it.
    fn resource_cache_url(&self, path: &str) -> Option<String>;

    /// Every `(path, url)` pair the module ships. Used for diagnostics.
    fn all_urls(&self) -> Vec<(String, String)>;
}
