use crate::loader::AssetOutputType;

/// Error produced while coordinating an asset load.
///
/// Errors are values in this crate: they are stored on managed assets and
/// consumers, fanned out to every interested observer, and rendered as a
/// string at the observer boundary. Specific kinds are distinguished by the
/// place they are recorded, not by downcasting.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    /// No asset loader is registered for the resolved URL scheme and the
    /// output type the consumer asked for.
    #[error("cannot resolve an asset loader for URL scheme '{scheme}' and output type '{output_type}'")]
    LoaderNotFound {
        /// Scheme of the resolved asset location.
        scheme: String,
        /// Output type requested by the consumer.
        output_type: AssetOutputType,
    },

    /// Fetching the resources of a remote module failed. Retryable: a new
    /// observer resets the asset and resolves again.
    #[error("failed to load resources of remote module '{module}': {reason}")]
    RemoteModule {
        /// Name of the remote module.
        module: String,
        /// Transport-level failure description.
        reason: String,
    },

    /// The remote module completed but does not ship the asset, and the
    /// resource loader has no local fallback for it either.
    #[error("did not find asset '{path}' in remote module '{module}', candidates are: {candidates:?}")]
    NotFoundInRemoteModule {
        /// Path of the asset inside its module.
        path: String,
        /// Name of the remote module.
        module: String,
        /// Paths the module does ship, as a diagnostic.
        candidates: Vec<String>,
    },

    /// The resource loader has no URL for a local module asset.
    #[error("did not find asset '{path}' in local module '{module}'")]
    NotFoundInLocalModule {
        /// Path of the asset inside its module.
        path: String,
        /// Name of the local module.
        module: String,
    },

    /// The loader reported success but delivered no artifact.
    #[error("asset loader provided a null asset")]
    NullAsset,

    /// Failure reported by an asset loader or downloader.
    #[error("{0}")]
    LoadFailed(String),
}

/// Crate-wide result alias.
pub type Result<T, E = AssetError> = std::result::Result<T, E>;
