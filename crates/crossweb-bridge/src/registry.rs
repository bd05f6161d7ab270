//! Plugin registry
//!
//! Command names are `<plugin>.<command>`. Each plugin serves a fixed list of
//! commands and receives lifecycle callbacks from the host.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crossweb_core::{Command, CommandError, CommandResult, CrosswebConfig, Event};

use crate::dispatcher::CompletionSink;

/// Plugin ABI version, `100` = 1.0.0
pub const PLUGIN_VERSION: u32 = 100;

/// What a plugin sees at host start
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub platform: &'static str,
    pub data_dir: PathBuf,
    pub config: CrosswebConfig,
}

/// One routed invocation
#[derive(Debug, Clone)]
pub struct Request {
    /// Correlation id of the invocation
    pub id: String,
    /// Command name without the plugin prefix
    pub command: String,
    pub payload: String,
}

/// A namespace of native commands
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> u32 {
        PLUGIN_VERSION
    }

    /// Commands served, without the plugin prefix
    fn commands(&self) -> &[&'static str];

    async fn init(&self, _ctx: &PluginContext) -> CommandResult<()> {
        Ok(())
    }

    /// Handle one request. Exactly one completion should reach `sink`, either
    /// before returning or from work scheduled by the plugin.
    async fn invoke(&self, request: Request, sink: CompletionSink);

    async fn on_event(&self, _event: &Event) {}

    async fn cleanup(&self) {}
}

/// Public description of a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: u32,
    pub commands: Vec<String>,
}

/// Registered plugins by name
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, replacing any previous one with the same name
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();
        if self.plugins.insert(name.clone(), plugin).is_some() {
            warn!(plugin = %name, "plugin re-registered, previous instance replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.get(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Find the plugin serving `command` and the command's short name
    pub fn resolve<'a>(&self, command: &'a Command) -> CommandResult<(Arc<dyn Plugin>, &'a str)> {
        let (plugin_name, short) = command
            .split_name()
            .ok_or_else(|| CommandError::unknown_command(&command.name))?;
        let plugin = self
            .plugins
            .get(plugin_name)
            .ok_or_else(|| CommandError::unknown_command(&command.name))?;
        if !plugin.commands().iter().any(|c| *c == short) {
            return Err(CommandError::unknown_command(&command.name));
        }
        Ok((plugin.clone(), short))
    }

    /// Every registered plugin, ordered by name
    pub fn get_all(&self) -> Vec<&Arc<dyn Plugin>> {
        self.plugins.values().collect()
    }

    /// Fully qualified names of every command
    pub fn describe(&self) -> Vec<String> {
        self.plugins
            .iter()
            .flat_map(|(name, plugin)| {
                plugin
                    .commands()
                    .iter()
                    .map(move |cmd| format!("{}.{}", name, cmd))
            })
            .collect()
    }

    pub fn info(&self) -> Vec<PluginInfo> {
        self.plugins
            .values()
            .map(|p| PluginInfo {
                name: p.name().to_string(),
                version: p.version(),
                commands: p.commands().iter().map(|c| c.to_string()).collect(),
            })
            .collect()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}
