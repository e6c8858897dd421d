use std::sync::{
    Arc, Mutex, RwLock, Weak,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, trace};

use crate::{
    DISCONNECT, error::TransportError, options::ConnectOptions, packet::SocketPacket,
};

pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;
pub type AckCallback = Box<dyn FnOnce(Vec<Value>) + Send + Sync>;

/// Commands sent from a handle to whatever drives its connection
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Emit(SocketPacket),
    Close,
}

/// Opens the underlying connection for a socket handle.
///
/// Implementations drive the handle: they report `connect`, `disconnect`
/// and `connect_error` through [`SocketHandle::dispatch`] and drain the
/// handle's command queue. Reconnect and backoff, if any, belong here too.
pub trait Connector: Send + Sync {
    fn open(&self, socket: &SocketHandle, options: &ConnectOptions) -> Result<(), TransportError>;
}

struct Inner {
    id: RwLock<Option<String>>,
    connected: AtomicBool,
    closed: AtomicBool,
    listeners: DashMap<String, Vec<Listener>>,
    acks: DashMap<u64, AckCallback>,
    next_ack: AtomicU64,
    commands_tx: UnboundedSender<Command>,
    commands_rx: Mutex<Option<UnboundedReceiver<Command>>>,
}

/// A cheaply clonable handle on one realtime connection.
///
/// Emits issued before the connection is established are queued and
/// flushed once the server accepts the socket.
#[derive(Clone)]
pub struct SocketHandle {
    inner: Arc<Inner>,
}

#[derive(Clone)]
pub struct WeakSocketHandle {
    inner: Weak<Inner>,
}

impl WeakSocketHandle {
    pub fn upgrade(&self) -> Option<SocketHandle> {
        self.inner.upgrade().map(|inner| SocketHandle { inner })
    }
}

impl Default for SocketHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketHandle {
    pub fn new() -> Self {
        let (commands_tx, commands_rx) = unbounded_channel();
        SocketHandle {
            inner: Arc::new(Inner {
                id: RwLock::new(None),
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                listeners: DashMap::new(),
                acks: DashMap::new(),
                next_ack: AtomicU64::new(0),
                commands_tx,
                commands_rx: Mutex::new(Some(commands_rx)),
            }),
        }
    }

    /// Server-assigned socket id; `None` until connected and after a drop.
    pub fn id(&self) -> Option<String> {
        self.inner.id.read().ok().and_then(|id| id.clone())
    }

    pub fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Still connecting or connected; false once the connection ended or
    /// was refused.
    pub fn is_active(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn same_socket(&self, other: &SocketHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakSocketHandle {
        WeakSocketHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe to an event. Listeners run in registration order on the
    /// task driving the connection.
    pub fn on<F>(&self, event: &str, listener: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(listener));
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.listeners.get(event).map(|l| l.len()).unwrap_or(0)
    }

    pub fn emit(&self, event: &str, data: Value) {
        self.send(Command::Emit(SocketPacket::event(event, data)));
    }

    pub fn emit_with_ack<F>(&self, event: &str, data: Value, ack: F)
    where
        F: FnOnce(Vec<Value>) + Send + Sync + 'static,
    {
        let id = self.inner.next_ack.fetch_add(1, Ordering::SeqCst);
        self.inner.acks.insert(id, Box::new(ack));
        self.send(Command::Emit(SocketPacket::Event {
            id: Some(id),
            event: event.to_string(),
            data: vec![data],
        }));
    }

    /// Close the connection. Does not wait for the server.
    pub fn disconnect(&self) {
        self.send(Command::Close);
        if self.mark_disconnected() {
            self.dispatch(DISCONNECT, &json!("io client disconnect"));
        }
    }

    fn send(&self, command: Command) {
        if self.inner.commands_tx.send(command).is_err() {
            debug!("socket driver is gone, dropping command");
        }
    }

    // ---- driver side ----

    /// Hands the command queue to the driver. Only the first call succeeds.
    pub fn take_commands(&self) -> Option<UnboundedReceiver<Command>> {
        self.inner.commands_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    pub fn mark_connected(&self, id: Option<String>) {
        if let Ok(mut slot) = self.inner.id.write() {
            *slot = id;
        }
        self.inner.connected.store(true, Ordering::SeqCst);
    }

    /// Returns true when this call performed the connected → disconnected
    /// transition.
    pub fn mark_disconnected(&self) -> bool {
        self.inner.closed.store(true, Ordering::SeqCst);
        let was_connected = self.inner.connected.swap(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.inner.id.write() {
            *slot = None;
        }
        was_connected
    }

    pub fn dispatch(&self, event: &str, payload: &Value) {
        // clone the list so listeners may subscribe or emit re-entrantly
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .get(event)
            .map(|l| l.value().clone())
            .unwrap_or_default();
        trace!(event, listeners = listeners.len(), "dispatching socket event");
        for listener in listeners {
            listener(payload);
        }
    }

    pub fn resolve_ack(&self, id: u64, data: Vec<Value>) {
        match self.inner.acks.remove(&id) {
            Some((_, ack)) => ack(data),
            None => debug!(id, "ack for unknown id"),
        }
    }
}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandle")
            .field("id", &self.id())
            .field("connected", &self.connected())
            .field("events", &self.inner.listeners.len())
            .finish()
    }
}
