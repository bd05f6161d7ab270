//! Host state
//!
//! Builds the vault from its injected capabilities, registers the built-in
//! plugins and owns the dispatcher. One instance per process; handlers get
//! the vault by reference, never through a global.

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crossweb_core::{
    platform::{platform_authenticator, platform_key_store, platform_name},
    storage, AuthMethod, Authenticator, CommandResult, CrosswebConfig, Event, FileBlobStore,
    NoopAuthenticator, SecureVault, VaultResult,
};

use crate::dispatcher::Dispatcher;
use crate::plugins::{FsPlugin, KeystorePlugin};
use crate::registry::{PluginContext, PluginRegistry};
use crate::wire::Frame;

/// Event emitted once every plugin is initialised
pub const READY_EVENT: &str = "host.ready";

/// Everything one host process needs
#[derive(Debug)]
pub struct HostState {
    data_dir: PathBuf,
    config: CrosswebConfig,
    vault: Arc<SecureVault>,
    dispatcher: Arc<Dispatcher>,
}

impl HostState {
    /// Wire a host around an already-built vault
    ///
    /// Returns the receiving end of the outbound queue; the embedder owns
    /// its single consumer.
    pub fn new(
        data_dir: PathBuf,
        config: CrosswebConfig,
        vault: Arc<SecureVault>,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let registry = default_registry(&data_dir, &config, vault.clone());
        Self::with_registry(data_dir, config, vault, registry)
    }

    pub fn with_registry(
        data_dir: PathBuf,
        config: CrosswebConfig,
        vault: Arc<SecureVault>,
        registry: PluginRegistry,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (dispatcher, outbound) = Dispatcher::new(registry, config.bridge.clone());
        (
            Self {
                data_dir,
                config,
                vault,
                dispatcher: Arc::new(dispatcher),
            },
            outbound,
        )
    }

    /// Build a host from configuration using the platform capabilities
    pub fn from_config(
        data_dir: PathBuf,
        config: CrosswebConfig,
        insecure_no_auth: bool,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let vault = Arc::new(build_vault(&data_dir, &config, insecure_no_auth));
        Self::new(data_dir, config, vault)
    }

    /// Load `config.toml` from `data_dir` and build the host
    pub async fn open(
        data_dir: PathBuf,
        insecure_no_auth: bool,
    ) -> VaultResult<(Self, mpsc::Receiver<Frame>)> {
        let config = storage::load_config(&data_dir).await?;
        Ok(Self::from_config(data_dir, config, insecure_no_auth))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &CrosswebConfig {
        &self.config
    }

    pub fn vault(&self) -> &Arc<SecureVault> {
        &self.vault
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Initialise every plugin and announce readiness
    pub async fn start(&self) -> CommandResult<()> {
        let ctx = PluginContext {
            platform: platform_name(),
            data_dir: self.data_dir.clone(),
            config: self.config.clone(),
        };
        self.dispatcher.init_plugins(&ctx).await?;

        let commands = self.dispatcher.registry().describe();
        info!(commands = commands.len(), "host ready");
        self.emit(
            READY_EVENT,
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "platform": platform_name(),
                "commands": commands,
            }),
        )
        .await;
        Ok(())
    }

    pub async fn emit(&self, name: &str, data: serde_json::Value) {
        self.dispatcher.emit(Event::new(name, data)).await;
    }

    pub async fn shutdown(&self) {
        self.dispatcher.cleanup_plugins().await;
        info!("host shut down");
    }
}

/// The built-in plugins for this configuration
pub fn default_registry(
    data_dir: &Path,
    config: &CrosswebConfig,
    vault: Arc<SecureVault>,
) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(KeystorePlugin::new(vault)));
    if config.fs.enabled {
        registry.register(Arc::new(FsPlugin::new(fs_root(data_dir, config))));
    }
    registry
}

/// Sandbox root of the fs plugin
pub fn fs_root(data_dir: &Path, config: &CrosswebConfig) -> PathBuf {
    config
        .fs
        .root
        .clone()
        .unwrap_or_else(|| data_dir.join("files"))
}

/// Pick the authenticator the configuration asks for
pub fn select_authenticator(config: &CrosswebConfig, insecure_no_auth: bool) -> Arc<dyn Authenticator> {
    if insecure_no_auth || config.auth.method == AuthMethod::None {
        Arc::new(NoopAuthenticator)
    } else {
        platform_authenticator()
    }
}

/// Build the vault from configuration with the platform key store
pub fn build_vault(data_dir: &Path, config: &CrosswebConfig, insecure_no_auth: bool) -> SecureVault {
    SecureVault::from_config(
        &config.vault,
        platform_key_store(data_dir),
        select_authenticator(config, insecure_no_auth),
        Arc::new(FileBlobStore::new(data_dir)),
    )
}

/// Thread-safe host state
pub type SharedHostState = Arc<HostState>;

/// Load configuration and build a shared host
pub async fn create_shared_state(
    data_dir: PathBuf,
    insecure_no_auth: bool,
) -> VaultResult<(SharedHostState, mpsc::Receiver<Frame>)> {
    let (state, outbound) = HostState::open(data_dir, insecure_no_auth).await?;
    Ok((Arc::new(state), outbound))
}
