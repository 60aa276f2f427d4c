//! Plugin capability interface.
//!
//! A [`Plugin`] contributes up to three tables of named callables: async
//! commands over JSON, line filters, and string transformers. The
//! [`PluginRegistry`] owns the registered entries and the install/uninstall
//! lifecycle.

mod registry;
mod text_plugin;

pub use registry::PluginRegistry;
pub use text_plugin::TextPlugin;

use futures::future::BoxFuture;
use std::sync::Arc;

/// An async command taking and returning JSON.
pub type CommandFn =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, anyhow::Result<serde_json::Value>> + Send + Sync>;

/// A line predicate.
pub type FilterFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A fallible string transformation.
pub type TransformFn = Arc<dyn Fn(String) -> anyhow::Result<String> + Send + Sync>;

/// A named bundle of commands, filters, and transformers.
///
/// Every table defaults to empty and both lifecycle hooks default to no-ops.
pub trait Plugin: Send + Sync {
    /// Unique plugin name; owner of everything it registers.
    fn name(&self) -> &str;

    /// Commands to register.
    fn commands(&self) -> Vec<(String, CommandFn)> {
        Vec::new()
    }

    /// Filters to register.
    fn filters(&self) -> Vec<(String, FilterFn)> {
        Vec::new()
    }

    /// Transformers to register.
    fn transformers(&self) -> Vec<(String, TransformFn)> {
        Vec::new()
    }

    /// Runs after the tables are registered.
    ///
    /// # Errors
    ///
    /// A failure unregisters everything this plugin added.
    fn install(&self, _registry: &PluginRegistry) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs before the plugin's entries are removed.
    ///
    /// # Errors
    ///
    /// Reported to the caller; the entries are removed regardless.
    fn uninstall(&self, _registry: &PluginRegistry) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Wraps an async closure as a [`CommandFn`].
pub fn command<F, Fut>(f: F) -> CommandFn
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    use futures::FutureExt;
    Arc::new(move |args| f(args).boxed())
}
