use std::any::Any;
use std::sync::{Arc, Weak};

use crate::error::AssetError;
use crate::loader::{AssetOutputType, LoadResult, LoadedAsset};
use crate::observer::AssetLoadObserver;
use crate::request::LoaderRequestHandler;

/// Opaque per-consumer context forwarded to loaders.
pub type AssetContext = Arc<dyn Any + Send + Sync>;

/// Where one consumer is in its load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetConsumerState {
    /// Registered, nothing dispatched yet.
    Initial,
    /// A request handler is in flight.
    Loading,
    /// The artifact arrived.
    Loaded,
    /// The load failed for this consumer.
    Failed,
    /// Terminal: the consumer left the managed asset.
    Removed,
}

/// One observer's registered interest in an asset.
pub(crate) struct AssetConsumer {
    observer: Option<Weak<dyn AssetLoadObserver>>,
    pub(crate) context: Option<AssetContext>,
    pub(crate) output_type: AssetOutputType,
    pub(crate) preferred_width: i32,
    pub(crate) preferred_height: i32,
    pub(crate) attached_data: serde_json::Value,
    pub(crate) state: AssetConsumerState,
    pub(crate) last_result: Option<Result<LoadedAsset, AssetError>>,
    pub(crate) notified: bool,
    pub(crate) request: Option<Arc<LoaderRequestHandler>>,
}

impl AssetConsumer {
    pub(crate) fn new(
        observer: Weak<dyn AssetLoadObserver>,
        context: Option<AssetContext>,
        output_type: AssetOutputType,
        preferred_width: i32,
        preferred_height: i32,
        attached_data: serde_json::Value,
    ) -> Self {
        Self {
            observer: Some(observer),
            context,
            output_type,
            preferred_width,
            preferred_height,
            attached_data,
            state: AssetConsumerState::Initial,
            last_result: None,
            notified: false,
            request: None,
        }
    }

    /// The observer, while it is both registered and alive.
    pub(crate) fn observer(&self) -> Option<Arc<dyn AssetLoadObserver>> {
        self.observer.as_ref().and_then(Weak::upgrade)
    }

    /// True once the observer was removed or dropped; the consumer is then
    /// cleanup work for the update loop.
    pub(crate) fn observer_gone(&self) -> bool {
        self.observer().is_none()
    }

    pub(crate) fn is_observer(&self, observer: &Arc<dyn AssetLoadObserver>) -> bool {
        self.observer
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr().cast::<u8>(), Arc::as_ptr(observer).cast::<u8>()))
    }

    pub(crate) fn clear_observer(&mut self) {
        self.observer = None;
    }

    /// Applies a load outcome delivered by a request handler.
    pub(crate) fn apply_load_result(&mut self, result: &LoadResult) {
        self.notified = false;
        match result {
            Ok(Some(asset)) => {
                self.state = AssetConsumerState::Loaded;
                self.last_result = Some(Ok(Arc::clone(asset)));
            }
            Ok(None) => {
                self.state = AssetConsumerState::Failed;
                self.last_result = Some(Err(AssetError::NullAsset));
            }
            Err(error) => {
                self.state = AssetConsumerState::Failed;
                self.last_result = Some(Err(error.clone()));
            }
        }
    }
}
