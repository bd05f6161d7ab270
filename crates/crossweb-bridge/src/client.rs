//! Script-side bridge client
//!
//! `invoke` registers a slot in the correlation table, arms a per-call
//! deadline timer, hands the frame to the transport and returns at once.
//! The returned [`PendingCall`] resolves when a matching resolve frame
//! arrives or the deadline passes, whichever comes first.

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crossweb_core::{BridgeError, BridgeResult, Command, CommandResult, Event};

use crate::correlation::{CorrelationTable, PendingInvocation};
use crate::dispatcher::Dispatcher;
use crate::wire::{resolve_outcome, Frame};

/// Carries invoke frames to the native side. Must not block.
pub trait Transport: Send + Sync {
    fn send(&self, frame: Frame) -> BridgeResult<()>;
}

impl Transport for mpsc::UnboundedSender<Frame> {
    fn send(&self, frame: Frame) -> BridgeResult<()> {
        mpsc::UnboundedSender::send(self, frame)
            .map_err(|_| BridgeError::BridgeUnavailable("native side disconnected".into()))
    }
}

/// Listener for out-of-band events
pub type EventListener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Generate a correlation id with 122 random bits
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Handle to one outstanding invocation
#[derive(Debug)]
pub struct PendingCall {
    id: String,
    rx: oneshot::Receiver<BridgeResult<Value>>,
}

impl PendingCall {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for PendingCall {
    type Output = BridgeResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(BridgeError::BridgeUnavailable("bridge client dropped".into()))
            })
        })
    }
}

/// Script side of the bridge, bound to one transport
pub struct BridgeClient {
    table: Arc<CorrelationTable>,
    transport: Box<dyn Transport>,
    timeout: Duration,
    listener: RwLock<Option<EventListener>>,
}

impl BridgeClient {
    pub fn new(transport: impl Transport + 'static, timeout: Duration) -> Self {
        Self {
            table: Arc::new(CorrelationTable::new()),
            transport: Box::new(transport),
            timeout,
            listener: RwLock::new(None),
        }
    }

    /// Connect a client to a dispatcher in the same process
    ///
    /// Spawns one task feeding invoke frames to the dispatcher and one task
    /// delivering the dispatcher's outbound frames back to the client.
    pub fn loopback(
        dispatcher: Arc<Dispatcher>,
        mut outbound: mpsc::Receiver<Frame>,
        timeout: Duration,
    ) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
        let client = Arc::new(Self::new(tx, timeout));

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                dispatcher.handle_frame(frame);
            }
            debug!("loopback inbound pump stopped");
        });

        let weak = Arc::downgrade(&client);
        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                match weak.upgrade() {
                    Some(client) => client.handle_frame(frame),
                    None => break,
                }
            }
            if let Some(client) = weak.upgrade() {
                client.disconnect();
            }
            debug!("loopback delivery pump stopped");
        });

        client
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of invocations still waiting
    pub fn pending(&self) -> usize {
        self.table.len()
    }

    /// Issue a command. Never blocks; must be called within a Tokio runtime.
    pub fn invoke(&self, cmd: &str, payload: impl Into<String>) -> PendingCall {
        let command = Command::new(cmd, payload);
        let (tx, rx) = oneshot::channel();

        let mut pending = PendingInvocation::new(self.timeout, tx);
        let id = loop {
            let id = generate_request_id();
            match self.table.insert(&id, pending) {
                Ok(()) => break id,
                // UUID collision
                Err(returned) => pending = returned,
            }
        };

        let table = self.table.clone();
        let timer_id = id.clone();
        let timeout = self.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if table.expire(&timer_id, Err(BridgeError::InvokeTimeout(timeout.as_millis() as u64))) {
                warn!(id = %timer_id, "invocation timed out");
            }
        });
        self.table.attach_timer(&id, timer);

        debug!(id = %id, cmd, "invoke");
        if let Err(err) = self.transport.send(Frame::invoke(id.clone(), &command)) {
            warn!(id = %id, cmd, "transport unavailable");
            self.table.complete(&id, Err(err));
        }

        PendingCall { id, rx }
    }

    /// Deliver a resolution. Unknown, late and duplicate ids are ignored.
    pub fn on_resolve(&self, id: &str, outcome: CommandResult<Value>) -> bool {
        self.table.complete(id, outcome.map_err(BridgeError::Rejected))
    }

    /// Deliver an event to the listener, if one is set
    pub fn on_event(&self, event: &Event) {
        let listener = self
            .listener
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match listener {
            Some(listener) => listener(event),
            None => debug!(event = %event.name, "no event listener"),
        }
    }

    pub fn set_event_listener(&self, listener: impl Fn(&Event) + Send + Sync + 'static) {
        *self
            .listener
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(listener));
    }

    /// Handle a frame arriving from the native side
    pub fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Resolve { id, result, error } => {
                self.on_resolve(&id, resolve_outcome(result, error));
            }
            Frame::Event { name, data } => self.on_event(&Event::new(name, data)),
            Frame::Invoke { id, .. } => warn!(id = %id, "client ignoring invoke frame"),
        }
    }

    /// Handle one raw message (NDJSON line)
    pub fn handle_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match Frame::parse(line) {
            Ok(frame) => self.handle_frame(frame),
            Err(err) => warn!("dropping malformed frame: {}", err),
        }
    }

    /// Fail every outstanding invocation; the native side is gone
    pub fn disconnect(&self) {
        let failed = self
            .table
            .fail_all(|| Err(BridgeError::BridgeUnavailable("native side disconnected".into())));
        if failed > 0 {
            warn!(failed, "native side disconnected with invocations in flight");
        }
    }
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("pending", &self.table.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossweb_core::{CommandError, ErrorKind};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Records frames and never answers
    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Frame>>>);

    impl Transport for Recorder {
        fn send(&self, frame: Frame) -> BridgeResult<()> {
            self.0.lock().unwrap().push(frame);
            Ok(())
        }
    }

    impl Recorder {
        fn ids(&self) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter_map(|f| f.id().map(String::from))
                .collect()
        }
    }

    struct Closed;

    impl Transport for Closed {
        fn send(&self, _frame: Frame) -> BridgeResult<()> {
            Err(BridgeError::BridgeUnavailable("closed".into()))
        }
    }

    #[tokio::test]
    async fn test_invoke_returns_immediately_and_resolves() {
        let recorder = Recorder::default();
        let client = BridgeClient::new(recorder.clone(), Duration::from_secs(30));

        let call = client.invoke("keystore.load", "");
        let id = call.id().to_string();
        assert_eq!(recorder.ids(), vec![id.clone()]);
        assert_eq!(client.pending(), 1);

        assert!(client.on_resolve(&id, Ok(json!({"ok": false}))));
        assert_eq!(call.await, Ok(json!({"ok": false})));
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_rejection_carries_kind() {
        let client = BridgeClient::new(Recorder::default(), Duration::from_secs(30));
        let call = client.invoke("nope.cmd", "");
        let id = call.id().to_string();
        client.on_resolve(&id, Err(CommandError::unknown_command("nope.cmd")));
        assert_eq!(call.await.unwrap_err().kind(), ErrorKind::UnknownCommand);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_at_deadline() {
        let timeout = Duration::from_millis(30_000);
        let client = BridgeClient::new(Recorder::default(), timeout);

        let started = Instant::now();
        let call = client.invoke("keystore.encrypt", "00");
        let id = call.id().to_string();

        let outcome = call.await;
        assert_eq!(outcome, Err(BridgeError::InvokeTimeout(30_000)));
        assert_eq!(started.elapsed(), timeout);
        assert_eq!(client.pending(), 0);

        // Late resolution is a no-op
        assert!(!client.on_resolve(&id, Ok(json!("late"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_before_deadline_wins() {
        let client = BridgeClient::new(Recorder::default(), Duration::from_secs(5));
        let call = client.invoke("keystore.load", "");
        let id = call.id().to_string();

        tokio::time::advance(Duration::from_millis(4_999)).await;
        assert!(client.on_resolve(&id, Ok(json!(1))));
        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(call.await, Ok(json!(1)));
    }

    #[tokio::test]
    async fn test_unknown_and_duplicate_resolutions_ignored() {
        let client = BridgeClient::new(Recorder::default(), Duration::from_secs(30));
        assert!(!client.on_resolve("never-issued", Ok(Value::Null)));

        let call = client.invoke("a.b", "");
        let id = call.id().to_string();
        assert!(client.on_resolve(&id, Ok(json!(1))));
        assert!(!client.on_resolve(&id, Ok(json!(2))));
        assert_eq!(call.await, Ok(json!(1)));
    }

    #[tokio::test]
    async fn test_ids_are_distinct_and_resolve_out_of_order() {
        let recorder = Recorder::default();
        let client = BridgeClient::new(recorder.clone(), Duration::from_secs(30));

        let calls: Vec<PendingCall> = (0..64).map(|_| client.invoke("a.b", "")).collect();
        let ids: Vec<String> = calls.iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 64);

        for (i, id) in ids.iter().enumerate().rev() {
            assert!(client.on_resolve(id, Ok(json!(i))));
        }
        for (i, call) in calls.into_iter().enumerate() {
            assert_eq!(call.await, Ok(json!(i)));
        }
    }

    #[tokio::test]
    async fn test_transport_failure_rejects_immediately() {
        let client = BridgeClient::new(Closed, Duration::from_secs(30));
        let call = client.invoke("a.b", "");
        assert_eq!(call.await.unwrap_err().kind(), ErrorKind::BridgeUnavailable);
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_events_reach_listener() {
        let client = BridgeClient::new(Recorder::default(), Duration::from_secs(30));
        // No listener is not an error
        client.handle_line(r#"{"type":"event","name":"orphan","data":null}"#);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        client.set_event_listener(move |event| sink.lock().unwrap().push(event.name.clone()));

        client.handle_line(r#"{"type":"event","name":"one","data":{}}"#);
        client.handle_frame(Frame::event(Event::new("two", json!(2))));
        client.handle_line("not json");

        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending() {
        let client = BridgeClient::new(Recorder::default(), Duration::from_secs(30));
        let a = client.invoke("a.b", "");
        let b = client.invoke("a.b", "");
        client.disconnect();
        assert_eq!(a.await.unwrap_err().kind(), ErrorKind::BridgeUnavailable);
        assert_eq!(b.await.unwrap_err().kind(), ErrorKind::BridgeUnavailable);
    }
}
