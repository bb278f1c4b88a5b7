//! Runtime asset coordination.
//!
//! This crate maps stable asset identities ([`AssetKey`]) to live load
//! state. Observers register interest in an asset; the [`AssetsManager`]
//! resolves where the asset lives (local module, remote module, or an
//! in-memory byte buffer), coalesces equivalent requests into a single
//! outstanding load, and notifies every observer with the decoded artifact
//! or an error. Decoding, transport and caching belong to the host through
//! the collaborator traits ([`ResourceLoader`], [`RemoteModuleManager`],
//! [`AssetLoader`], [`MainThreadDispatcher`], [`WorkerQueue`]).

mod bundle;
mod bytes_store;
mod consumer;
mod error;
mod key;
mod loader;
mod managed;
mod manager;
mod observable;
mod observer;
mod remote;
mod request;
mod resource_loader;
mod threading;
mod transaction;

#[cfg(test)]
pub(crate) mod test_support;

pub use bundle::{AssetCatalog, AssetSpecs, Bundle, ASSET_CATALOG_PATH};
pub use bytes_store::{AssetBytesStore, ASSET_BYTES_URL_SCHEME};
pub use consumer::{AssetConsumerState, AssetContext};
pub use error::{AssetError, Result};
pub use key::{is_asset_url, AssetKey, AssetLocation};
pub use loader::{
    AssetLoader, AssetLoaderRegistry, AssetOutputType, DownloaderAssetLoaderAdapter, LoadResult,
    LoadedAsset, RemoteDownloader,
};
pub use managed::{AssetPayloadCache, AssetState};
pub use manager::AssetsManager;
pub use observable::ObservableAsset;
pub use observer::{AssetLoadObserver, AssetsManagerListener};
pub use remote::{RemoteModuleManager, RemoteModuleResources, RemoteResourcesCompletion};
pub use request::LoaderRequestHandler;
pub use resource_loader::ResourceLoader;
pub use threading::{Job, MainThreadDispatcher, ThreadWorkerQueue, WorkerQueue};
