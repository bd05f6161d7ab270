//! Command dispatcher
//!
//! Routes `(id, command, payload)` to the owning plugin on its own task and
//! delivers exactly one resolve frame per id into a bounded outbound queue.
//! The queue has a single consumer, so deliveries never interleave.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crossweb_core::{BridgeConfig, Command, CommandError, CommandResult, Event};

use crate::registry::{PluginContext, PluginRegistry, Request};
use crate::wire::{validate_invocation, Frame};

/// Single-use resolver handed to a plugin
///
/// Clones share one latch: the first `complete` wins and later ones are
/// discarded.
#[derive(Debug, Clone)]
pub struct CompletionSink {
    id: String,
    done: Arc<AtomicBool>,
    outbound: mpsc::Sender<Frame>,
}

impl CompletionSink {
    pub fn new(id: impl Into<String>, outbound: mpsc::Sender<Frame>) -> Self {
        Self {
            id: id.into(),
            done: Arc::new(AtomicBool::new(false)),
            outbound,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_completed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Deliver the outcome. Returns false if this id was already completed.
    pub async fn complete(&self, outcome: CommandResult<Value>) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            warn!(id = %self.id, "duplicate completion discarded");
            return false;
        }
        if let Err(err) = &outcome {
            debug!(id = %self.id, kind = %err.kind, "rejecting invocation");
        }
        // Waits for room rather than dropping
        if self.outbound.send(Frame::resolve(self.id.clone(), outcome)).await.is_err() {
            warn!(id = %self.id, "outbound queue closed, resolution lost");
        }
        true
    }

    pub async fn resolve(&self, value: Value) -> bool {
        self.complete(Ok(value)).await
    }

    pub async fn reject(&self, error: CommandError) -> bool {
        self.complete(Err(error)).await
    }
}

/// Native side of the bridge
pub struct Dispatcher {
    registry: PluginRegistry,
    limits: BridgeConfig,
    outbound: mpsc::Sender<Frame>,
}

impl Dispatcher {
    /// Create a dispatcher and the receiving end of its outbound queue
    pub fn new(registry: PluginRegistry, limits: BridgeConfig) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(limits.outbound_queue_capacity.max(1));
        (
            Self {
                registry,
                limits,
                outbound,
            },
            rx,
        )
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn limits(&self) -> &BridgeConfig {
        &self.limits
    }

    /// Route an invocation. Returns immediately; the handler runs on its own task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, id: impl Into<String>, command: Command) {
        let id = id.into();
        if id.is_empty() {
            warn!(cmd = %command.name, "invocation without id dropped");
            return;
        }

        if let Err(err) = validate_invocation(&id, &command, &self.limits) {
            warn!(cmd = %command.name, "invalid invocation: {}", err.message);
            self.reject_later(id, err);
            return;
        }

        let routed = self
            .registry
            .resolve(&command)
            .map(|(plugin, short)| (plugin, short.to_string()));
        let (plugin, short) = match routed {
            Ok(found) => found,
            Err(err) => {
                debug!(id = %id, cmd = %command.name, "unknown command");
                self.reject_later(id, err);
                return;
            }
        };

        debug!(id = %id, cmd = %command.name, "dispatching");
        let sink = CompletionSink::new(id.clone(), self.outbound.clone());
        let request = Request {
            id,
            command: short,
            payload: command.payload,
        };

        tokio::spawn(async move {
            let handler_sink = sink.clone();
            let handler = tokio::spawn(async move { plugin.invoke(request, handler_sink).await });
            match handler.await {
                Ok(()) if !sink.is_completed() => {
                    // Completion may still come from work the handler spawned
                    debug!(id = %sink.id(), "handler returned before completing");
                }
                Ok(()) => {}
                Err(join_err) if join_err.is_panic() => {
                    error!(id = %sink.id(), "command handler panicked");
                    sink.reject(CommandError::handler_fault("command handler panicked"))
                        .await;
                }
                Err(_) => warn!(id = %sink.id(), "command handler cancelled"),
            }
        });
    }

    fn reject_later(&self, id: String, err: CommandError) {
        let sink = CompletionSink::new(id, self.outbound.clone());
        tokio::spawn(async move {
            sink.reject(err).await;
        });
    }

    /// Handle an inbound frame
    pub fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Invoke { id, cmd, payload } => self.dispatch(id, Command::new(cmd, payload)),
            other => warn!("ignoring unexpected inbound frame: {:?}", other.id()),
        }
    }

    /// Handle one raw inbound message (NDJSON line or webview post)
    ///
    /// Messages that cannot be parsed are rejected through their id when one
    /// can be recovered, otherwise dropped with a warning.
    pub fn handle_message(&self, text: &str) {
        let err = match Frame::parse(text) {
            Ok(frame) => return self.handle_frame(frame),
            Err(err) => err,
        };

        let id = serde_json::from_str::<Value>(text.trim())
            .ok()
            .and_then(|v| v.get("id").and_then(Value::as_str).map(String::from))
            .filter(|id| !id.is_empty() && id.len() <= self.limits.max_id_len);

        match id {
            Some(id) => self.reject_later(id, CommandError::invalid_payload(err.to_string())),
            None => warn!("unparseable frame dropped: {}", err),
        }
    }

    /// Forward an event to every plugin, then to the script side
    pub async fn emit(&self, event: Event) {
        for plugin in self.registry.get_all() {
            plugin.on_event(&event).await;
        }
        debug!(event = %event.name, "emitting event");
        if self.outbound.send(Frame::event(event)).await.is_err() {
            warn!("outbound queue closed, event lost");
        }
    }

    /// Run every plugin's `init`, stopping at the first failure
    pub async fn init_plugins(&self, ctx: &PluginContext) -> CommandResult<()> {
        for plugin in self.registry.get_all() {
            if let Err(err) = plugin.init(ctx).await {
                error!(plugin = %plugin.name(), "plugin init failed: {}", err);
                return Err(err);
            }
            debug!(plugin = %plugin.name(), version = plugin.version(), "plugin initialised");
        }
        Ok(())
    }

    pub async fn cleanup_plugins(&self) {
        for plugin in self.registry.get_all() {
            plugin.cleanup().await;
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("limits", &self.limits)
            .finish()
    }
}
