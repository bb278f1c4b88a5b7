use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Catalog path the manager reads expected asset sizes from.
pub const ASSET_CATALOG_PATH: &str = "res";

/// A module that ships assets.
///
/// Implemented by the host; the manager only reads the name, whether the
/// module's assets must be fetched remotely, and the asset catalog.
pub trait Bundle: Send + Sync {
    /// Module name, also the identity used when comparing keys.
    fn name(&self) -> &str;

    /// True if the module's assets are downloaded on demand.
    fn has_remote_assets(&self) -> bool;

    /// The catalog at `path` inside the module, if the module ships one.
    fn asset_catalog(&self, path: &str) -> Option<Arc<AssetCatalog>>;
}

/// Expected pixel dimensions of a catalogued asset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSpecs {
    /// Expected width in pixels.
    pub width: i32,
    /// Expected height in pixels.
    pub height: i32,
}

/// Per-module metadata about the assets it ships.
///
/// Hosts build or deserialize a catalog and hand it out through
/// [`Bundle::asset_catalog`]; observables expose the recorded sizes before
/// the asset itself is loaded.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AssetCatalog {
    specs: HashMap<String, AssetSpecs>,
}

impl AssetCatalog {
    /// Records the expected size for an asset path.
    pub fn insert(&mut self, name: impl Into<String>, specs: AssetSpecs) {
        self.specs.insert(name.into(), specs);
    }

    /// The recorded size for `name`, if any.
    pub fn specs_for_name(&self, name: &str) -> Option<AssetSpecs> {
        self.specs.get(name).copied()
    }
}
