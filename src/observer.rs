use std::sync::Arc;

use crate::key::AssetKey;
use crate::loader::LoadedAsset;
use crate::managed::AssetState;
use crate::observable::ObservableAsset;

/// Receives the outcome of an asset load.
///
/// Called on the main thread with the manager lock released; implementations
/// may call back into the manager. Exactly one of `asset` and `error` is
/// populated per delivery.
pub trait AssetLoadObserver: Send + Sync {
    /// Delivers a loaded artifact or a stringified error.
    ///
    /// `observable` is the key's handle when one is still alive.
    fn on_load(
        &self,
        observable: Option<&Arc<ObservableAsset>>,
        asset: Option<LoadedAsset>,
        error: Option<String>,
    );
}

/// Optional sink observing the manager's update loop.
pub trait AssetsManagerListener: Send + Sync {
    /// Called after each asset update step with a snapshot of the asset's
    /// state. The manager lock is released for the duration of the call.
    fn on_managed_asset_updated(&self, _key: &AssetKey, _state: AssetState) {}

    /// Called after a drain finishes, outside the lock.
    fn on_performed_updates(&self) {}
}
