//! Reconnecting WebSocket client for the node's JSON-RPC endpoint.
//!
//! One socket carries both request/response traffic and subscription
//! pushes. Every inbound frame goes through [`Shared::dispatch`], which routes
//! responses to the waiting caller and notifications to the subscription
//! channel registered under their id.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rpc_core::{NodeApi, RpcError, Subscription, SubscriptionControl, SubscriptionId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};
use tungstenite::{Error as WsError, Message};

use crate::protocol::{Incoming, JsonRpcRequest};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Wait between a close and the next connection attempt.
    pub reconnect_delay: Duration,
    /// How long a call waits for the socket to open. `None` waits forever.
    pub ready_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            ready_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Closed,
    ShutDown,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Connecting => "connecting",
            LinkState::Open => "open",
            LinkState::Closed => "closed",
            LinkState::ShutDown => "shut_down",
        }
    }
}

type ResponseSlot = oneshot::Sender<Result<Value, RpcError>>;

struct SubscriptionEntry {
    topic: String,
    sender: mpsc::UnboundedSender<Value>,
}

/// An in-flight request. A `subscribe` carries the listener the reader
/// installs when the ack arrives, before it reads the next frame.
struct PendingCall {
    slot: ResponseSlot,
    listener: Option<SubscriptionEntry>,
}

struct Shared {
    url: String,
    config: ConnectionConfig,
    state: watch::Sender<LinkState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<HashMap<u64, PendingCall>>,
    subscriptions: Mutex<HashMap<SubscriptionId, SubscriptionEntry>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
    connection_task: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

/// Handle to the node socket. Cheap to clone.
#[derive(Clone)]
pub struct NodeConnection {
    shared: Arc<Shared>,
}

impl NodeConnection {
    /// Starts connecting in the background. Must be called inside a tokio runtime.
    pub fn start(url: impl Into<String>, config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(LinkState::Connecting);
        let shared = Arc::new(Shared {
            url: url.into(),
            config,
            state,
            outbound: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            reconnect: Mutex::new(None),
            connection_task: Mutex::new(None),
            next_id: AtomicU64::new(1),
        });
        shared.connect();
        Self { shared }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.shared.reconnect.lock().is_some()
    }

    pub fn active_subscriptions(&self) -> Vec<(SubscriptionId, String)> {
        self.shared
            .subscriptions
            .lock()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.topic.clone()))
            .collect()
    }

    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        self.shared.request(method, params).await
    }

    pub async fn subscribe(&self, topic: &str) -> Result<Subscription, RpcError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let listener = SubscriptionEntry {
            topic: topic.to_string(),
            sender,
        };
        let result = self
            .shared
            .send_request("subscribe", vec![Value::String(topic.to_string())], Some(listener))
            .await?;
        let id = result
            .as_str()
            .map(|s| SubscriptionId(s.to_string()))
            .ok_or_else(|| RpcError::Protocol(format!("subscription id is not a string: {result}")))?;
        info!(topic, subscription = %id, "subscribed to node topic");

        let control: Arc<dyn SubscriptionControl> = self.shared.clone();
        Ok(Subscription::new(id, topic, receiver, control))
    }

    /// Closes the socket and stops reconnecting. Pending calls fail.
    pub fn shutdown(&self) {
        let previous = self.shared.state.send_replace(LinkState::ShutDown);
        if let Some(timer) = self.shared.reconnect.lock().take() {
            timer.abort();
        }
        if previous == LinkState::Open && self.shared.send_frame(Message::Close(None)) {
            info!("closing node connection");
        } else if let Some(task) = self.shared.connection_task.lock().take() {
            task.abort();
        }
        self.shared.fail_pending("connection shut down");
        self.shared.subscriptions.lock().clear();
    }
}

#[async_trait]
impl NodeApi for NodeConnection {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        NodeConnection::call(self, method, params).await
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, RpcError> {
        NodeConnection::subscribe(self, topic).await
    }
}

impl Shared {
    fn is_shut_down(&self) -> bool {
        *self.state.borrow() == LinkState::ShutDown
    }

    /// Moves to `next` unless the connection was shut down meanwhile.
    fn transition(&self, next: LinkState) -> bool {
        self.state.send_if_modified(|current| {
            if *current == LinkState::ShutDown {
                return false;
            }
            *current = next;
            true
        })
    }

    fn connect(self: &Arc<Self>) {
        if self.is_shut_down() {
            return;
        }
        let shared = Arc::clone(self);
        let task = tokio::spawn(async move { shared.run_connection().await });
        *self.connection_task.lock() = Some(task);
    }

    async fn run_connection(self: Arc<Self>) {
        if !self.transition(LinkState::Connecting) {
            return;
        }
        info!(url = %self.url, "connecting to node");

        let socket = match connect_async(self.url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                error!(url = %self.url, error = %e, "node connection failed");
                self.on_close();
                return;
            }
        };
        if self.is_shut_down() {
            return;
        }

        let (mut sink, mut stream) = socket.split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<Message>();
        *self.outbound.lock() = Some(outbound);
        self.on_open();

        let writer = tokio::spawn(async move {
            while let Some(frame) = queue.recv().await {
                let closing = matches!(frame, Message::Close(_));
                if let Err(e) = sink.send(frame).await {
                    warn!(error = %e, "failed to write to node socket");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => self.dispatch(&text),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "node sent close frame");
                    break;
                }
                Ok(_) => {}
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
                Err(WsError::Io(e)) => {
                    error!(error = %e, "node socket I/O error");
                    break;
                }
                Err(e) => error!(error = %e, "node socket error"),
            }
        }

        writer.abort();
        self.on_close();
    }

    fn on_open(&self) {
        if let Some(timer) = self.reconnect.lock().take() {
            timer.abort();
        }
        if !self.transition(LinkState::Open) {
            return;
        }
        info!(url = %self.url, "connected to node");
    }

    fn on_close(self: &Arc<Self>) {
        self.outbound.lock().take();
        self.fail_pending("connection closed");
        let dropped = {
            let mut subscriptions = self.subscriptions.lock();
            let count = subscriptions.len();
            subscriptions.clear();
            count
        };
        if !self.transition(LinkState::Closed) {
            info!("node connection shut down");
            return;
        }

        warn!(
            dropped_subscriptions = dropped,
            delay = ?self.config.reconnect_delay,
            "node socket closed, scheduling reconnect"
        );
        self.schedule_reconnect();
    }

    /// Arms the reconnect timer unless one is already pending.
    fn schedule_reconnect(self: &Arc<Self>) -> bool {
        let mut slot = self.reconnect.lock();
        if slot.is_some() {
            debug!("reconnect already scheduled");
            return false;
        }
        let shared = Arc::clone(self);
        let delay = self.config.reconnect_delay;
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.reconnect.lock().take();
            shared.connect();
        }));
        true
    }

    fn fail_pending(&self, reason: &str) {
        let waiting: Vec<PendingCall> = self.pending.lock().drain().map(|(_, call)| call).collect();
        for call in waiting {
            let _ = call.slot.send(Err(RpcError::Connection(reason.to_string())));
        }
    }

    fn send_frame(&self, frame: Message) -> bool {
        match self.outbound.lock().as_ref() {
            Some(outbound) => outbound.send(frame).is_ok(),
            None => false,
        }
    }

    async fn wait_open(&self) -> Result<(), RpcError> {
        let mut state = self.state.subscribe();
        let wait = async move {
            loop {
                let current = *state.borrow_and_update();
                match current {
                    LinkState::Open => return Ok(()),
                    LinkState::ShutDown => {
                        return Err(RpcError::Connection("connection shut down".to_string()))
                    }
                    LinkState::Connecting | LinkState::Closed => {}
                }
                if state.changed().await.is_err() {
                    return Err(RpcError::Connection("connection dropped".to_string()));
                }
            }
        };

        match self.config.ready_timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                RpcError::Connection(format!("node not ready after {}ms", limit.as_millis()))
            })?,
            None => wait.await,
        }
    }

    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        self.send_request(method, params, None).await
    }

    async fn send_request(
        &self,
        method: &str,
        params: Vec<Value>,
        listener: Option<SubscriptionEntry>,
    ) -> Result<Value, RpcError> {
        self.wait_open().await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| RpcError::Protocol(e.to_string()))?;

        let (slot, response) = oneshot::channel();
        self.pending.lock().insert(id, PendingCall { slot, listener });
        debug!(method, id, "sending node request");

        if !self.send_frame(Message::Text(body)) {
            self.pending.lock().remove(&id);
            return Err(RpcError::Connection("connection closed".to_string()));
        }

        response
            .await
            .map_err(|_| RpcError::Connection("response dropped".to_string()))?
    }

    fn dispatch(&self, text: &str) {
        let incoming = match Incoming::parse(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(error = %e, "unparseable frame from node");
                return;
            }
        };

        match incoming {
            Incoming::Notification(notification) => {
                if notification.method != "subscribe" {
                    debug!(method = %notification.method, "ignoring node notification");
                    return;
                }
                let id = SubscriptionId(notification.params.subscription);
                let subscriptions = self.subscriptions.lock();
                match subscriptions.get(&id) {
                    Some(entry) => {
                        if entry.sender.send(notification.params.result).is_err() {
                            debug!(subscription = %id, topic = %entry.topic, "subscriber gone");
                        }
                    }
                    None => debug!(subscription = %id, "notification for unknown subscription"),
                }
            }
            Incoming::Response(response) => {
                let Some(id) = response.id else {
                    debug!("response without id");
                    return;
                };
                let Some(call) = self.pending.lock().remove(&id) else {
                    debug!(id, "response for unknown request");
                    return;
                };
                let result = response.into_result();
                if let (Ok(Value::String(subscription)), Some(listener)) = (&result, call.listener) {
                    self.register(SubscriptionId(subscription.clone()), listener);
                }
                let _ = call.slot.send(result);
            }
        }
    }

    /// Installs a listener from the reader task, so notifications that follow
    /// the ack on the same socket always find it.
    fn register(&self, id: SubscriptionId, listener: SubscriptionEntry) {
        let mut subscriptions = self.subscriptions.lock();
        // shutdown flips the state before clearing the map
        if self.is_shut_down() {
            return;
        }
        subscriptions.insert(id, listener);
    }
}

#[async_trait]
impl SubscriptionControl for Shared {
    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), RpcError> {
        let open = *self.state.borrow() == LinkState::Open;
        if open {
            self.request("unsubscribe", vec![Value::String(id.0.clone())])
                .await?;
        }
        if let Some(entry) = self.subscriptions.lock().remove(id) {
            info!(subscription = %id, topic = %entry.topic, "unsubscribed from node topic");
        }
        Ok(())
    }
}
