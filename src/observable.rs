use std::sync::Weak;

use parking_lot::Mutex;

use crate::key::AssetKey;
use crate::manager::ManagerShared;

/// The caller-facing handle to an asset.
///
/// One observable exists per key while any external holder keeps it alive;
/// the manager only holds a weak reference. Dropping the last handle lets
/// the manager collect the asset once no observers remain either.
pub struct ObservableAsset {
    key: AssetKey,
    manager: Weak<ManagerShared>,
    expected_size: Mutex<(i32, i32)>,
}

impl ObservableAsset {
    pub(crate) fn new(key: AssetKey, manager: Weak<ManagerShared>) -> Self {
        Self {
            key,
            manager,
            expected_size: Mutex::new((0, 0)),
        }
    }

    /// The key this observable tracks.
    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    /// Expected pixel size from the module's asset catalog, `(0, 0)` when
    /// the catalog has no entry for the asset.
    pub fn expected_size(&self) -> (i32, i32) {
        *self.expected_size.lock()
    }

    pub(crate) fn set_expected_size(&self, width: i32, height: i32) {
        *self.expected_size.lock() = (width, height);
    }
}

impl Drop for ObservableAsset {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_observable_destroyed(&self.key);
        }
    }
}
