/// Resolves module-relative asset paths to local URLs.
///
/// Implemented by the host platform layer.
pub trait ResourceLoader: Send + Sync {
    /// The local URL of `path` inside `module_name`, or `None` if the
    /// application package does not ship it.
    fn resolve_local_asset_url(&self, module_name: &str, path: &str) -> Option<String>;
}
