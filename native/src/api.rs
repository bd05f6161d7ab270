//! API exposed to webview shells
//!
//! The shell calls [`NativeHost::invoke`] / [`NativeHost::handle_message`]
//! from its UI thread and receives script text through the evaluator it
//! passed to [`NativeHost::start`]. Neither entry point blocks.

use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crossweb_bridge::{Frame, HostState};
use crossweb_core::{BridgeConfig, Command, CrosswebConfig, Event};

/// Native side of the bridge with its own runtime
pub struct NativeHost {
    runtime: Runtime,
    state: Arc<HostState>,
    events: mpsc::UnboundedSender<Event>,
    delivery: thread::JoinHandle<()>,
}

impl NativeHost {
    /// Start a host for `data_dir` with the platform key store and authenticator
    ///
    /// `[auth] method = "none"` in `config` selects the no-op authenticator.
    pub fn start<F>(data_dir: impl Into<PathBuf>, config: CrosswebConfig, evaluator: F) -> Result<Self, String>
    where
        F: Fn(String) + Send + 'static,
    {
        let (state, outbound) = HostState::from_config(data_dir.into(), config, false);
        Self::with_state(state, outbound, evaluator)
    }

    /// Start a host around already-wired state
    pub fn with_state<F>(
        state: HostState,
        outbound: mpsc::Receiver<Frame>,
        evaluator: F,
    ) -> Result<Self, String>
    where
        F: Fn(String) + Send + 'static,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("crossweb-host")
            .build()
            .map_err(|e| e.to_string())?;

        let delivery = spawn_delivery(outbound, evaluator).map_err(|e| e.to_string())?;
        let state = Arc::new(state);

        // Events go through one task so emission order is kept
        let (events, mut event_rx) = mpsc::unbounded_channel::<Event>();
        let emitter = state.clone();
        runtime.spawn(async move {
            while let Some(event) = event_rx.recv().await {
                emitter.dispatcher().emit(event).await;
            }
        });

        runtime
            .block_on(state.start())
            .map_err(|e| e.to_string())?;
        info!("native host started");

        Ok(Self {
            runtime,
            state,
            events,
            delivery,
        })
    }

    /// Route an invocation posted by the page
    pub fn invoke(&self, id: &str, cmd: &str, payload: &str) {
        let _guard = self.runtime.enter();
        self.state.dispatcher().dispatch(id, Command::new(cmd, payload));
    }

    /// Route a raw JSON frame posted by the page
    pub fn handle_message(&self, message: &str) {
        let _guard = self.runtime.enter();
        self.state.dispatcher().handle_message(message);
    }

    /// Emit an event to plugins and the page
    pub fn emit(&self, name: &str, data: Value) {
        if self.events.send(Event::new(name, data)).is_err() {
            warn!(event = name, "event task stopped, event dropped");
        }
    }

    /// Shim for this host, using its configured invocation deadline
    pub fn bridge_script(&self) -> String {
        crate::script::render_bridge_script(self.state.config().bridge.invoke_timeout_ms)
    }

    pub fn state(&self) -> &Arc<HostState> {
        &self.state
    }

    /// Run plugin cleanup and stop the runtime
    ///
    /// Must not be called from inside an async context.
    pub fn shutdown(self) {
        let NativeHost {
            runtime,
            state,
            events,
            delivery,
        } = self;
        drop(events);
        runtime.block_on(state.shutdown());
        drop(state);
        runtime.shutdown_timeout(Duration::from_secs(1));
        if delivery.join().is_err() {
            warn!("delivery thread panicked");
        }
        info!("native host stopped");
    }
}

/// One thread hands every outbound frame to the evaluator, in queue order
fn spawn_delivery<F>(mut outbound: mpsc::Receiver<Frame>, evaluator: F) -> std::io::Result<thread::JoinHandle<()>>
where
    F: Fn(String) + Send + 'static,
{
    thread::Builder::new()
        .name("crossweb-delivery".into())
        .spawn(move || {
            while let Some(frame) = outbound.blocking_recv() {
                match frame.to_script() {
                    Some(script) => evaluator(script),
                    None => debug!("skipping frame without script form"),
                }
            }
            debug!("outbound queue closed, delivery stopped");
        })
}

/// Shim the shell injects before page scripts, with the default deadline
pub fn bridge_script() -> String {
    crate::script::render_bridge_script(BridgeConfig::default().invoke_timeout_ms)
}

/// Get the default data directory for the platform
pub fn default_data_dir() -> String {
    crossweb_core::storage::default_data_dir()
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossweb_core::AuthMethod;
    use std::sync::mpsc as std_mpsc;
    use tempfile::TempDir;

    fn host(dir: &TempDir) -> (NativeHost, std_mpsc::Receiver<String>) {
        let mut config = CrosswebConfig::default();
        config.auth.method = AuthMethod::None;
        let (tx, rx) = std_mpsc::channel();
        let host = NativeHost::start(dir.path(), config, move |script| {
            let _ = tx.send(script);
        })
        .unwrap();
        (host, rx)
    }

    fn next(rx: &std_mpsc::Receiver<String>) -> String {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_ready_event_delivered_first() {
        let dir = TempDir::new().unwrap();
        let (host, rx) = host(&dir);
        assert!(next(&rx).starts_with(r#"window.__native__.onEvent("host.ready", "#));
        host.shutdown();
    }

    #[test]
    fn test_invoke_delivers_on_message() {
        let dir = TempDir::new().unwrap();
        let (host, rx) = host(&dir);
        next(&rx);

        host.invoke("abc", "keystore.load", "");
        assert_eq!(
            next(&rx),
            r#"window.__native__.onMessage("abc", {"msg":"no saved value","ok":false}, null);"#
        );

        host.handle_message(r#"{"type":"invoke","id":"def","cmd":"nope.cmd","payload":""}"#);
        let script = next(&rx);
        assert!(script.starts_with(r#"window.__native__.onMessage("def", null, {"#));
        assert!(script.contains("unknown_command"));
        host.shutdown();
    }

    #[test]
    fn test_hostile_content_is_escaped() {
        let dir = TempDir::new().unwrap();
        let (host, rx) = host(&dir);
        next(&rx);

        let hostile = "</script><script>alert('x')</script>\u{2028}";
        let payload = serde_json::json!({"path": "x.html", "content": hostile}).to_string();
        host.invoke("w", "fs.write", &payload);
        next(&rx);

        host.invoke("r", "fs.read", r#"{"path":"x.html"}"#);
        let script = next(&rx);
        assert!(!script.contains("</script>"));
        assert!(!script.contains('\u{2028}'));
        assert!(script.contains("\\u003c/script\\u003e"));
        host.shutdown();
    }

    #[test]
    fn test_emit_keeps_order() {
        let dir = TempDir::new().unwrap();
        let (host, rx) = host(&dir);
        next(&rx);

        for i in 0..10 {
            host.emit("tick", serde_json::json!(i));
        }
        for i in 0..10 {
            assert_eq!(next(&rx), format!(r#"window.__native__.onEvent("tick", {});"#, i));
        }
        host.shutdown();
    }

    #[test]
    fn test_bridge_script_uses_configured_timeout() {
        let dir = TempDir::new().unwrap();
        let mut config = CrosswebConfig::default();
        config.auth.method = AuthMethod::None;
        config.bridge.invoke_timeout_ms = 12_000;
        let host = NativeHost::start(dir.path(), config, |_| {}).unwrap();

        assert!(host.bridge_script().contains("var TIMEOUT_MS = 12000;"));
        assert!(bridge_script().contains("var TIMEOUT_MS = 30000;"));
        host.shutdown();
    }

    #[test]
    fn test_default_data_dir() {
        assert!(!default_data_dir().is_empty());
    }
}
