use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::consumer::AssetConsumer;
use crate::error::AssetError;
use crate::key::AssetLocation;
use crate::loader::AssetLoader;
use crate::observable::ObservableAsset;

/// Where a managed asset is in its resolution lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetState {
    /// Nothing resolved yet.
    Initial,
    /// A resolution attempt is in flight.
    ResolvingLocation,
    /// The location is known; loads can be dispatched.
    Ready,
    /// Resolution failed transiently; a new observer retries it.
    FailedRetryable,
    /// Resolution failed and will not succeed without outside intervention.
    FailedPermanently,
}

/// Opaque blob an asset loader may persist across requests for the same
/// asset. Shared by every request handler created for one (asset, loader)
/// pair.
pub type AssetPayloadCache = Arc<Mutex<Option<Box<dyn Any + Send>>>>;

/// The manager's per-key record.
pub(crate) struct ManagedAsset {
    pub(crate) state: AssetState,
    pub(crate) resolve_id: u64,
    pub(crate) observable: Weak<ObservableAsset>,
    pub(crate) resolved_location: Option<Result<AssetLocation, AssetError>>,
    pub(crate) consumers: Vec<AssetConsumer>,
    payload_caches: HashMap<usize, AssetPayloadCache>,
}

impl ManagedAsset {
    pub(crate) fn new() -> Self {
        Self {
            state: AssetState::Initial,
            resolve_id: 0,
            observable: Weak::new(),
            resolved_location: None,
            consumers: Vec::new(),
            payload_caches: HashMap::new(),
        }
    }

    pub(crate) fn has_consumers(&self) -> bool {
        !self.consumers.is_empty()
    }

    pub(crate) fn observable_alive(&self) -> bool {
        self.observable.strong_count() > 0
    }

    /// The successfully resolved location. Valid only in `Ready`.
    pub(crate) fn location(&self) -> Option<&AssetLocation> {
        match &self.resolved_location {
            Some(Ok(location)) => Some(location),
            _ => None,
        }
    }

    /// The resolution error. Valid only in the failed states.
    pub(crate) fn resolution_error(&self) -> Option<&AssetError> {
        match &self.resolved_location {
            Some(Err(error)) => Some(error),
            _ => None,
        }
    }

    /// The payload cache shared by requests this loader serves for this
    /// asset, keyed by loader instance identity.
    pub(crate) fn payload_cache_for(&mut self, loader: &Arc<dyn AssetLoader>) -> AssetPayloadCache {
        let identity = Arc::as_ptr(loader).cast::<u8>() as usize;
        Arc::clone(
            self.payload_caches
                .entry(identity)
                .or_insert_with(AssetPayloadCache::default),
        )
    }

    pub(crate) fn clear_payload_caches(&mut self) {
        self.payload_caches.clear();
    }
}
