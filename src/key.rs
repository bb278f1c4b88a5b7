use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::bundle::Bundle;

/// Stable identity of an asset.
///
/// Either a path inside a module (`bundle:path`) or a free-standing URL.
/// Keys compare structurally; bundles compare by name.
#[derive(Clone)]
pub enum AssetKey {
    /// Asset shipped by a module, local or remote.
    Bundled {
        /// Owning module.
        bundle: Arc<dyn Bundle>,
        /// Path of the asset inside the module.
        path: String,
    },
    /// Asset addressed directly by URL.
    Url(String),
}

impl AssetKey {
    /// Creates a key for an asset inside a module.
    pub fn bundled(bundle: Arc<dyn Bundle>, path: impl Into<String>) -> Self {
        Self::Bundled {
            bundle,
            path: path.into(),
        }
    }

    /// Creates a key for a URL asset.
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    /// Returns true for URL keys.
    pub fn is_url(&self) -> bool {
        matches!(self, Self::Url(_))
    }

    /// The URL of a URL key.
    pub fn as_url(&self) -> Option<&str> {
        match self {
            Self::Url(url) => Some(url),
            Self::Bundled { .. } => None,
        }
    }

    /// The owning module of a bundled key.
    pub fn bundle(&self) -> Option<&Arc<dyn Bundle>> {
        match self {
            Self::Bundled { bundle, .. } => Some(bundle),
            Self::Url(_) => None,
        }
    }

    /// The in-module path of a bundled key.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Bundled { path, .. } => Some(path),
            Self::Url(_) => None,
        }
    }
}

/// Returns true if `s` looks like an asset URL rather than an in-module
/// path: it contains a scheme separator or is an inline image data URL.
pub fn is_asset_url(s: &str) -> bool {
    s.contains("://") || s.starts_with("data:image/")
}

impl PartialEq for AssetKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Bundled { bundle, path },
                Self::Bundled {
                    bundle: other_bundle,
                    path: other_path,
                },
            ) => bundle.name() == other_bundle.name() && path == other_path,
            (Self::Url(url), Self::Url(other_url)) => url == other_url,
            _ => false,
        }
    }
}

impl Eq for AssetKey {}

impl Hash for AssetKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Bundled { bundle, path } => {
                0u8.hash(state);
                bundle.name().hash(state);
                path.hash(state);
            }
            Self::Url(url) => {
                1u8.hash(state);
                url.hash(state);
            }
        }
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bundled { bundle, path } => write!(f, "{}:{}", bundle.name(), path),
            Self::Url(url) => f.write_str(url),
        }
    }
}

impl fmt::Debug for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Where a resolved asset lives.
///
/// Produced by location resolution; `is_local` distinguishes URLs served
/// from the application package from downloaded or caller-provided ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetLocation {
    url: String,
    is_local: bool,
}

impl AssetLocation {
    /// Creates a location from a URL.
    pub fn new(url: impl Into<String>, is_local: bool) -> Self {
        Self {
            url: url.into(),
            is_local,
        }
    }

    /// The resolved URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// True if the URL points into the local application package.
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// The URL scheme, used to pick an asset loader.
    pub fn scheme(&self) -> &str {
        if let Some(index) = self.url.find("://") {
            &self.url[..index]
        } else if self.url.starts_with("data:") {
            "data"
        } else {
            ""
        }
    }
}
