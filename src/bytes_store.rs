use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AssetError;
use crate::loader::RemoteDownloader;

/// URL scheme under which in-memory byte buffers are served.
pub const ASSET_BYTES_URL_SCHEME: &str = "asset-bytes";

/// Allocator of synthetic URLs for caller-provided byte buffers.
///
/// Registering a buffer mints a `asset-bytes://<id>` URL; the store also
/// acts as the downloader for its own scheme so the buffers flow through
/// the regular loading pipeline. Buffers live until their URL is
/// unregistered, which the manager does when the last interest in the key
/// disappears.
#[derive(Default)]
pub struct AssetBytesStore {
    entries: Mutex<HashMap<String, Arc<Vec<u8>>>>,
    next_id: AtomicU64,
}

impl AssetBytesStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `url` was minted by an [`AssetBytesStore`].
    pub fn is_asset_bytes_url(url: &str) -> bool {
        url.strip_prefix(ASSET_BYTES_URL_SCHEME)
            .is_some_and(|rest| rest.starts_with("://"))
    }

    /// Registers a buffer and returns its synthetic URL.
    pub fn register_asset_bytes(&self, bytes: Vec<u8>) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let url = format!("{ASSET_BYTES_URL_SCHEME}://{id}");
        self.entries.lock().insert(url.clone(), Arc::new(bytes));
        url
    }

    /// Frees the buffer behind `url`. Unknown URLs are ignored.
    pub fn unregister_asset_bytes(&self, url: &str) {
        self.entries.lock().remove(url);
    }

    /// The buffer behind `url`, if still registered.
    pub fn bytes_for_url(&self, url: &str) -> Option<Arc<Vec<u8>>> {
        self.entries.lock().get(url).cloned()
    }
}

impl RemoteDownloader for AssetBytesStore {
    fn download(
        &self,
        url: &str,
        completion: Box<dyn FnOnce(Result<Arc<Vec<u8>>, AssetError>) + Send>,
    ) {
        let result = self
            .bytes_for_url(url)
            .ok_or_else(|| AssetError::LoadFailed(format!("no asset bytes registered for '{url}'")));
        completion(result);
    }
}
