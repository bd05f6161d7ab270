//! `fs.*` commands confined to a sandbox root
//!
//! Paths are relative to the root. Absolute paths and `..` components are
//! refused before touching the filesystem, and no component below the root
//! may be a symlink.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crossweb_core::{storage::ensure_private_dir, CommandError, CommandResult, ErrorKind};

use crate::dispatcher::CompletionSink;
use crate::registry::{Plugin, PluginContext, Request};

const COMMANDS: &[&str] = &["read", "write"];

#[derive(Debug, Deserialize)]
struct ReadArgs {
    path: String,
    #[serde(default)]
    binary: bool,
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
    #[serde(default)]
    binary: bool,
}

pub struct FsPlugin {
    root: PathBuf,
}

impl FsPlugin {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a request path into the sandbox
    fn resolve(&self, relative: &str) -> CommandResult<PathBuf> {
        let path = Path::new(relative);
        if relative.is_empty() {
            return Err(CommandError::invalid_payload("empty path"));
        }
        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(CommandError::invalid_payload(format!(
                        "path escapes sandbox: {}",
                        relative
                    )));
                }
            }
        }
        if resolved == self.root {
            return Err(CommandError::invalid_payload("path names the sandbox root"));
        }
        Ok(resolved)
    }

    /// Refuse any existing symlink between the root and `resolved`
    async fn reject_links(&self, resolved: &Path) -> CommandResult<()> {
        let relative = resolved
            .strip_prefix(&self.root)
            .map_err(|_| CommandError::invalid_payload("path escapes sandbox"))?;

        let mut current = self.root.clone();
        for part in relative.components() {
            current.push(part);
            match tokio::fs::symlink_metadata(&current).await {
                Ok(meta) if meta.file_type().is_symlink() => {
                    warn!(path = %current.display(), "symlink inside sandbox refused");
                    return Err(CommandError::invalid_payload(
                        "path escapes sandbox: symlinks are not followed",
                    ));
                }
                Ok(_) => {}
                // Nothing further down exists yet
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(CommandError::new(ErrorKind::Storage, e.to_string())),
            }
        }
        Ok(())
    }

    fn args<T: serde::de::DeserializeOwned>(payload: &str) -> CommandResult<T> {
        serde_json::from_str(payload)
            .map_err(|e| CommandError::invalid_payload(format!("invalid arguments: {}", e)))
    }

    pub async fn handle(&self, command: &str, payload: &str) -> CommandResult<Value> {
        match command {
            "read" => self.read(Self::args(payload)?).await,
            "write" => self.write(Self::args(payload)?).await,
            other => Err(CommandError::unknown_command(&format!("fs.{}", other))),
        }
    }

    async fn read(&self, args: ReadArgs) -> CommandResult<Value> {
        let path = self.resolve(&args.path)?;
        self.reject_links(&path).await?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CommandError::new(ErrorKind::Storage, "file not found"),
            _ => CommandError::new(ErrorKind::Storage, e.to_string()),
        })?;

        let data = if args.binary {
            BASE64.encode(&bytes)
        } else {
            String::from_utf8(bytes).map_err(|_| {
                CommandError::invalid_payload("file is not valid UTF-8, read it with binary: true")
            })?
        };
        Ok(json!({ "ok": true, "data": data }))
    }

    async fn write(&self, args: WriteArgs) -> CommandResult<Value> {
        let path = self.resolve(&args.path)?;
        self.reject_links(&path).await?;
        let bytes = if args.binary {
            BASE64
                .decode(args.content.as_bytes())
                .map_err(|e| CommandError::invalid_payload(format!("invalid base64: {}", e)))?
        } else {
            args.content.into_bytes()
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CommandError::new(ErrorKind::Storage, e.to_string()))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| CommandError::new(ErrorKind::Storage, e.to_string()))?;

        debug!(path = %args.path, bytes = bytes.len(), "file written");
        Ok(json!({ "ok": true }))
    }
}

#[async_trait]
impl Plugin for FsPlugin {
    fn name(&self) -> &str {
        "fs"
    }

    fn commands(&self) -> &[&'static str] {
        COMMANDS
    }

    async fn init(&self, _ctx: &PluginContext) -> CommandResult<()> {
        ensure_private_dir(&self.root).await?;
        info!(root = %self.root.display(), "fs plugin ready");
        Ok(())
    }

    async fn invoke(&self, request: Request, sink: CompletionSink) {
        let outcome = self.handle(&request.command, &request.payload).await;
        sink.complete(outcome).await;
    }
}
