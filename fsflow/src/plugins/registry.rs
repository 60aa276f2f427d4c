//! Plugin registry.

use super::{CommandFn, FilterFn, Plugin, TransformFn};
use crate::errors::{FlowError, PluginError};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct Owned<T> {
    owner: String,
    value: T,
}

/// Registered plugins and their named entries.
///
/// When two plugins register the same name, the later registration wins and
/// a warning is logged. Uninstalling a plugin removes only the entries it
/// still owns.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn Plugin>>>,
    commands: DashMap<String, Owned<CommandFn>>,
    filters: DashMap<String, Owned<FilterFn>>,
    transformers: DashMap<String, Owned<TransformFn>>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugin_names())
            .field("commands", &self.commands.len())
            .field("filters", &self.filters.len())
            .field("transformers", &self.transformers.len())
            .finish()
    }
}

fn register<T>(table: &DashMap<String, Owned<T>>, kind: &str, owner: &str, name: String, value: T) {
    let previous = table.insert(
        name.clone(),
        Owned {
            owner: owner.to_string(),
            value,
        },
    );
    if let Some(previous) = previous {
        if previous.owner != owner {
            warn!(
                kind,
                name = %name,
                previous_owner = %previous.owner,
                owner,
                "Registration overrides an existing entry"
            );
        }
    }
}

fn lookup<T: Clone>(table: &DashMap<String, Owned<T>>, name: &str) -> Option<T> {
    table.get(name).map(|entry| entry.value.clone())
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every table of `plugin`, then runs its install hook.
    ///
    /// Installing a name that is already installed replaces the old plugin's
    /// entries.
    ///
    /// # Errors
    ///
    /// [`PluginError::InstallFailed`] if the hook fails; nothing the plugin
    /// registered is left behind.
    pub fn install(&self, plugin: Arc<dyn Plugin>) -> Result<(), FlowError> {
        let name = plugin.name().to_string();
        if self.plugins.write().remove(&name).is_some() {
            debug!(plugin = %name, "Replacing installed plugin");
            self.remove_owned(&name);
        }

        for (entry, value) in plugin.commands() {
            register(&self.commands, "command", &name, entry, value);
        }
        for (entry, value) in plugin.filters() {
            register(&self.filters, "filter", &name, entry, value);
        }
        for (entry, value) in plugin.transformers() {
            register(&self.transformers, "transformer", &name, entry, value);
        }

        if let Err(err) = plugin.install(self) {
            self.remove_owned(&name);
            warn!(plugin = %name, error = %err, "Plugin install hook failed");
            return Err(PluginError::install_failed(name, format!("{err:#}")).into());
        }

        self.plugins.write().insert(name.clone(), plugin);
        info!(plugin = %name, "Plugin installed");
        Ok(())
    }

    /// Runs the uninstall hook of `name` and removes the entries it owns.
    ///
    /// # Errors
    ///
    /// [`PluginError::NotInstalled`] for an unknown name;
    /// [`PluginError::UninstallFailed`] if the hook fails, after the entries
    /// were removed.
    pub fn uninstall(&self, name: &str) -> Result<(), FlowError> {
        let plugin = self
            .plugins
            .write()
            .remove(name)
            .ok_or_else(|| PluginError::NotInstalled { name: name.to_string() })?;

        let hook = plugin.uninstall(self);
        self.remove_owned(name);
        info!(plugin = %name, "Plugin uninstalled");

        hook.map_err(|err| {
            PluginError::UninstallFailed {
                name: name.to_string(),
                reason: format!("{err:#}"),
            }
            .into()
        })
    }

    fn remove_owned(&self, owner: &str) {
        self.commands.retain(|_, entry| entry.owner != owner);
        self.filters.retain(|_, entry| entry.owner != owner);
        self.transformers.retain(|_, entry| entry.owner != owner);
    }

    /// Whether a plugin named `name` is installed.
    #[must_use]
    pub fn is_installed(&self, name: &str) -> bool {
        self.plugins.read().contains_key(name)
    }

    /// Installed plugin names, sorted.
    #[must_use]
    pub fn plugin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// The command registered under `name`.
    #[must_use]
    pub fn command(&self, name: &str) -> Option<CommandFn> {
        lookup(&self.commands, name)
    }

    /// The filter registered under `name`.
    #[must_use]
    pub fn filter(&self, name: &str) -> Option<FilterFn> {
        lookup(&self.filters, name)
    }

    /// The transformer registered under `name`.
    #[must_use]
    pub fn transformer(&self, name: &str) -> Option<TransformFn> {
        lookup(&self.transformers, name)
    }

    /// Which plugin currently owns the command `name`.
    #[must_use]
    pub fn command_owner(&self, name: &str) -> Option<String> {
        self.commands.get(name).map(|entry| entry.owner.clone())
    }

    /// Invokes the command registered under `name`.
    ///
    /// # Errors
    ///
    /// [`PluginError::NotRegistered`] for an unknown command,
    /// [`PluginError::CommandFailed`] when the command returns an error.
    pub async fn run_command(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, FlowError> {
        let command = self
            .command(name)
            .ok_or_else(|| PluginError::not_registered("command", name))?;
        debug!(command = name, "Running plugin command");
        command(args).await.map_err(|err| {
            PluginError::CommandFailed {
                name: name.to_string(),
                reason: format!("{err:#}"),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::command;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Echo {
        name: &'static str,
        tag: &'static str,
        fail_install: bool,
    }

    impl Echo {
        fn new(name: &'static str, tag: &'static str) -> Self {
            Self {
                name,
                tag,
                fail_install: false,
            }
        }
    }

    impl Plugin for Echo {
        fn name(&self) -> &str {
            self.name
        }

        fn commands(&self) -> Vec<(String, CommandFn)> {
            let tag = self.tag;
            vec![(
                "echo".to_string(),
                command(move |args| async move { Ok(json!({ "tag": tag, "args": args })) }),
            )]
        }

        fn filters(&self) -> Vec<(String, FilterFn)> {
            let filter: FilterFn = Arc::new(|line: &str| line.contains('!'));
            vec![(format!("{}_only", self.name), filter)]
        }

        fn install(&self, _registry: &PluginRegistry) -> anyhow::Result<()> {
            if self.fail_install {
                anyhow::bail!("missing dependency");
            }
            Ok(())
        }
    }

    struct Failing;

    impl Plugin for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn commands(&self) -> Vec<(String, CommandFn)> {
            vec![(
                "explode".to_string(),
                command(|_| async { Err(anyhow::anyhow!("kaboom")) }),
            )]
        }

        fn uninstall(&self, _registry: &PluginRegistry) -> anyhow::Result<()> {
            anyhow::bail!("still in use")
        }
    }

    #[tokio::test]
    async fn test_install_and_run_command() {
        let registry = PluginRegistry::new();
        registry.install(Arc::new(Echo::new("a", "first"))).unwrap();

        assert!(registry.is_installed("a"));
        let out = registry.run_command("echo", json!([1])).await.unwrap();
        assert_eq!(out, json!({ "tag": "first", "args": [1] }));
        assert!(registry.filter("a_only").is_some_and(|f| f("hi!")));
    }

    #[tokio::test]
    async fn test_last_registration_wins_and_uninstall_keeps_others() {
        let registry = PluginRegistry::new();
        registry.install(Arc::new(Echo::new("a", "first"))).unwrap();
        registry.install(Arc::new(Echo::new("b", "second"))).unwrap();

        assert_eq!(registry.command_owner("echo").as_deref(), Some("b"));
        let out = registry.run_command("echo", json!(null)).await.unwrap();
        assert_eq!(out["tag"], "second");

        // "a" no longer owns "echo", so removing it leaves b's entry alone.
        registry.uninstall("a").unwrap();
        assert_eq!(registry.command_owner("echo").as_deref(), Some("b"));
        assert!(registry.filter("a_only").is_none());
        assert!(registry.filter("b_only").is_some());

        registry.uninstall("b").unwrap();
        assert!(registry.command("echo").is_none());
        assert_eq!(registry.plugin_names(), Vec::<String>::new());
    }

    #[test]
    fn test_failed_install_leaves_nothing() {
        let registry = PluginRegistry::new();
        let plugin = Echo {
            fail_install: true,
            ..Echo::new("broken", "x")
        };

        let err = registry.install(Arc::new(plugin)).unwrap_err();

        assert!(matches!(err, FlowError::Plugin(PluginError::InstallFailed { .. })));
        assert!(err.to_string().contains("missing dependency"));
        assert!(!registry.is_installed("broken"));
        assert!(registry.command("echo").is_none());
        assert!(registry.filter("broken_only").is_none());
    }

    #[tokio::test]
    async fn test_command_errors() {
        let registry = PluginRegistry::new();
        registry.install(Arc::new(Failing)).unwrap();

        let missing = registry.run_command("nope", json!({})).await.unwrap_err();
        assert!(matches!(missing, FlowError::Plugin(PluginError::NotRegistered { .. })));

        let failed = registry.run_command("explode", json!({})).await.unwrap_err();
        assert!(failed.to_string().contains("kaboom"));
    }

    #[test]
    fn test_uninstall_errors() {
        let registry = PluginRegistry::new();
        assert!(matches!(
            registry.uninstall("ghost"),
            Err(FlowError::Plugin(PluginError::NotInstalled { .. }))
        ));

        registry.install(Arc::new(Failing)).unwrap();
        let err = registry.uninstall("failing").unwrap_err();
        assert!(matches!(err, FlowError::Plugin(PluginError::UninstallFailed { .. })));
        assert!(registry.command("explode").is_none());
        assert!(!registry.is_installed("failing"));
    }

    #[test]
    fn test_reinstall_replaces_entries() {
        let registry = PluginRegistry::new();
        registry.install(Arc::new(Echo::new("a", "first"))).unwrap();
        registry.install(Arc::new(Echo::new("a", "again"))).unwrap();

        assert_eq!(registry.plugin_names(), vec!["a".to_string()]);
        assert_eq!(registry.command_owner("echo").as_deref(), Some("a"));
    }
}
