//! Crossweb CLI
//!
//! Drives the keystore and any bridge command from a terminal, through the
//! same dispatcher the webview host uses.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crossweb_bridge::{BridgeClient, HostState};
use crossweb_core::storage::{self, config_file_path, default_data_dir};
use crossweb_core::{BridgeError, CrosswebConfig};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "crossweb")]
#[command(version)]
#[command(about = "Crossweb - native keystore and bridge for webview apps")]
#[command(after_help = "EXAMPLES:
  crossweb config init                       Write a default config.toml
  crossweb keystore encrypt deadbeef         Encrypt hex bytes (prompts for presence)
  crossweb keystore status                   Show key and blob state
  crossweb invoke keystore.load              Call any bridge command

Set RUST_LOG=debug to see bridge traffic on stderr.")]
struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Skip user-presence prompts (development only)
    #[arg(long, global = true)]
    insecure_no_auth: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt, decrypt and persist key material
    Keystore {
        #[command(subcommand)]
        action: KeystoreCommands,
    },

    /// Invoke a bridge command and print the resolved JSON
    #[command(after_help = "EXAMPLES:
  crossweb invoke keystore.encrypt 00ff
  crossweb invoke fs.read '{\"path\":\"notes.txt\"}'")]
    Invoke {
        /// Command name, `<plugin>.<command>`
        command: String,
        /// Payload text passed to the handler
        #[arg(default_value = "")]
        payload: String,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum KeystoreCommands {
    /// Encrypt hex-encoded bytes
    Encrypt { hex: String },
    /// Decrypt a base64 blob back to hex
    Decrypt { blob: String },
    /// Persist a blob as the saved value
    Save { blob: String },
    /// Print the saved blob
    Load,
    /// Show key, blob and authenticator state
    Status,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write the default configuration if none exists
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging() {
    // stdout carries command output only
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    let Some(cmd) = cli.command else {
        println!("Crossweb - native keystore and bridge for webview apps");
        println!();
        println!("Run 'crossweb --help' for usage information.");
        return;
    };

    let data_dir = cli.dir.unwrap_or_else(default_data_dir);
    if let Err(e) = handle_command(cmd, &data_dir, cli.insecure_no_auth).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn handle_command(cmd: Commands, data_dir: &Path, insecure_no_auth: bool) -> CliResult<()> {
    match cmd {
        Commands::Keystore { action } => {
            let session = Session::open(data_dir, insecure_no_auth).await?;
            let result = match action {
                KeystoreCommands::Encrypt { hex } => session.call("keystore.encrypt", hex).await,
                KeystoreCommands::Decrypt { blob } => session.call("keystore.decrypt", blob).await,
                KeystoreCommands::Save { blob } => session.call("keystore.save", blob).await,
                KeystoreCommands::Load => session.call("keystore.load", String::new()).await,
                KeystoreCommands::Status => session.status().await,
            };
            session.close().await;
            print_json(&result?)?;
        }
        Commands::Invoke { command, payload } => {
            let session = Session::open(data_dir, insecure_no_auth).await?;
            let result = session.call(&command, payload).await;
            session.close().await;
            print_json(&result?)?;
        }
        Commands::Config { action } => match action {
            ConfigCommands::Show => handle_config_show(data_dir).await?,
            ConfigCommands::Init { force } => handle_config_init(data_dir, force).await?,
        },
    }

    Ok(())
}

/// A started host with a client wired to its dispatcher
struct Session {
    state: Arc<HostState>,
    client: Arc<BridgeClient>,
}

impl Session {
    async fn open(data_dir: &Path, insecure_no_auth: bool) -> CliResult<Self> {
        let (state, outbound) = HostState::open(data_dir.to_path_buf(), insecure_no_auth).await?;
        let state = Arc::new(state);
        let timeout = state.config().bridge.invoke_timeout();
        let client = BridgeClient::loopback(state.dispatcher().clone(), outbound, timeout);
        state.start().await?;
        debug!(dir = %data_dir.display(), "session open");
        Ok(Self { state, client })
    }

    async fn call(&self, command: &str, payload: String) -> CliResult<Value> {
        self.client
            .invoke(command, payload)
            .await
            .map_err(|e| describe_bridge_error(&e).into())
    }

    async fn status(&self) -> CliResult<Value> {
        let status = self.state.vault().status().await?;
        Ok(serde_json::to_value(status)?)
    }

    async fn close(self) {
        self.client.disconnect();
        self.state.shutdown().await;
    }
}

/// One line naming the error kind, for scripts that grep stderr
fn describe_bridge_error(error: &BridgeError) -> String {
    match error {
        BridgeError::Rejected(e) => format!("[{}] {}", e.kind, e.message),
        other => format!("[{}] {}", other.kind(), other),
    }
}

fn print_json(value: &Value) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn handle_config_show(data_dir: &Path) -> CliResult<()> {
    let config = storage::load_config(data_dir).await?;
    let path = config_file_path(data_dir);
    if path.exists() {
        println!("# {}", path.display());
    } else {
        println!("# {} (not created, showing defaults)", path.display());
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn handle_config_init(data_dir: &Path, force: bool) -> CliResult<()> {
    let path = config_file_path(data_dir);
    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        println!("Use --force to overwrite it with defaults.");
        return Ok(());
    }

    storage::save_config(data_dir, &CrosswebConfig::default()).await?;
    println!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use crossweb_core::{CommandError, ErrorKind};
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_keystore_encrypt_with_global_flags() {
        let cli = Cli::try_parse_from([
            "crossweb",
            "keystore",
            "encrypt",
            "deadbeef",
            "--dir",
            "/tmp/cw",
            "--insecure-no-auth",
        ])
        .unwrap();
        assert_eq!(cli.dir, Some(PathBuf::from("/tmp/cw")));
        assert!(cli.insecure_no_auth);
        match cli.command {
            Some(Commands::Keystore {
                action: KeystoreCommands::Encrypt { hex },
            }) => assert_eq!(hex, "deadbeef"),
            _ => panic!("expected keystore encrypt"),
        }
    }

    #[test]
    fn test_parse_invoke_defaults_payload() {
        let cli = Cli::try_parse_from(["crossweb", "invoke", "keystore.load"]).unwrap();
        match cli.command {
            Some(Commands::Invoke { command, payload }) => {
                assert_eq!(command, "keystore.load");
                assert_eq!(payload, "");
            }
            _ => panic!("expected invoke"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_keystore_action() {
        assert!(Cli::try_parse_from(["crossweb", "keystore", "wipe"]).is_err());
    }

    #[test]
    fn test_describe_bridge_error_names_kind() {
        let rejected = BridgeError::Rejected(CommandError::new(ErrorKind::Storage, "disk full"));
        assert_eq!(describe_bridge_error(&rejected), "[storage] disk full");

        let timeout = describe_bridge_error(&BridgeError::InvokeTimeout(30_000));
        assert!(timeout.starts_with("[invoke_timeout]"));
    }

    #[tokio::test]
    async fn test_session_roundtrip_without_auth() {
        let dir = TempDir::new().unwrap();
        let session = Session::open(dir.path(), true).await.unwrap();

        let encrypted = session.call("keystore.encrypt", "c0ffee".into()).await.unwrap();
        let blob = encrypted["encrypted"].as_str().unwrap().to_string();
        let decrypted = session.call("keystore.decrypt", blob).await.unwrap();
        assert_eq!(decrypted["privateKey"], "c0ffee");

        let status = session.status().await.unwrap();
        assert_eq!(status["auth_method"], "none");
        assert_eq!(status["blob_saved"], false);

        let err = session.call("nope.cmd", String::new()).await.unwrap_err();
        assert!(err.to_string().starts_with("[unknown_command]"));
        session.close().await;
    }

    #[tokio::test]
    async fn test_config_init_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        handle_config_init(dir.path(), false).await.unwrap();
        let path = config_file_path(dir.path());
        assert!(path.exists());

        std::fs::write(&path, "[bridge]\ninvoke_timeout_ms = 5000\n").unwrap();
        handle_config_init(dir.path(), false).await.unwrap();
        let config = storage::load_config(dir.path()).await.unwrap();
        assert_eq!(config.bridge.invoke_timeout_ms, 5000);

        handle_config_init(dir.path(), true).await.unwrap();
        let config = storage::load_config(dir.path()).await.unwrap();
        assert_eq!(config, CrosswebConfig::default());
    }
}
