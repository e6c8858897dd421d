use std::{
    collections::BTreeMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use collab_ws::{
    CONNECT, CONNECT_ERROR, ConnectOptions, Connector, DISCONNECT, SocketHandle, TransportError,
    WeakSocketHandle, WsConnector,
};
use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::token::TokenStore;
use crate::config::{ConfigManager, SOCKET_URL};

/// Handshake binding a fresh socket to its document.
pub const USER_CONNECT: &str = "user_connect";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    pub base_url: String,
    pub path: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            base_url: ConnectOptions::DEFAULT_URL.to_string(),
            path: ConnectOptions::DEFAULT_PATH.to_string(),
        }
    }
}

impl TransportSettings {
    pub async fn from_config(config: &ConfigManager) -> Self {
        Self {
            base_url: config.get_or(SOCKET_URL, ConnectOptions::DEFAULT_URL).await,
            ..Self::default()
        }
    }

    pub fn options(&self, token: Option<String>) -> ConnectOptions {
        ConnectOptions::new(self.base_url.clone())
            .with_path(self.path.clone())
            .with_auth_token(token)
    }
}

/// Lifecycle notifications, fanned out to every [`TransportManager::subscribe`]r.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransportEvent {
    Connected { doc_id: String, socket_id: Option<String> },
    /// The server acknowledged `user_connect`.
    Joined { doc_id: String, ack: Vec<Value> },
    Disconnected { doc_id: String, reason: String },
    ConnectError { doc_id: String, error: Value },
    /// `user_connect` stayed unauthorized after one rejoin; the socket was closed.
    JoinRejected { doc_id: String, ack: Vec<Value> },
}

impl TransportEvent {
    pub fn doc_id(&self) -> &str {
        match self {
            TransportEvent::Connected { doc_id, .. }
            | TransportEvent::Joined { doc_id, .. }
            | TransportEvent::Disconnected { doc_id, .. }
            | TransportEvent::ConnectError { doc_id, .. }
            | TransportEvent::JoinRejected { doc_id, .. } => doc_id,
        }
    }
}

/// True when a `user_connect` ack is the server's unauthorized reply:
/// `"unauthorized"`, or an object with status/code 401 or msg/error
/// `"unauthorized"`.
pub fn is_unauthorized(ack: &[Value]) -> bool {
    let says_unauthorized = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("unauthorized"))
    };
    match ack.first() {
        Some(reply @ Value::String(_)) => says_unauthorized(Some(reply)),
        Some(Value::Object(map)) => {
            ["status", "code"]
                .iter()
                .any(|k| map.get(*k).and_then(Value::as_u64) == Some(401))
                || ["msg", "error"].iter().any(|k| says_unauthorized(map.get(*k)))
        }
        _ => false,
    }
}

/// Sends `user_connect` for one socket and handles its ack.
///
/// An unauthorized ack triggers a single rejoin; `rejoining` keeps a
/// second one from starting while it is in flight. A rejoin that is
/// refused again closes the socket and drops it from the registry.
#[derive(Clone)]
struct Handshake {
    doc_id: String,
    events: broadcast::Sender<TransportEvent>,
    connections: Weak<DashMap<String, SocketHandle>>,
    rejoining: Arc<AtomicBool>,
}

impl Handshake {
    fn send(self, socket: &SocketHandle, rejoin: bool) {
        let weak = socket.downgrade();
        let data = json!({ "workflow_id": self.doc_id });
        socket.emit_with_ack(USER_CONNECT, data, move |ack| {
            self.acknowledged(&weak, ack, rejoin)
        });
    }

    fn acknowledged(self, socket: &WeakSocketHandle, ack: Vec<Value>, rejoin: bool) {
        if rejoin {
            self.rejoining.store(false, Ordering::SeqCst);
        }
        if !is_unauthorized(&ack) {
            debug!(doc_id = %self.doc_id, "user_connect acknowledged");
            let _ = self.events.send(TransportEvent::Joined {
                doc_id: self.doc_id,
                ack,
            });
            return;
        }
        let Some(socket) = socket.upgrade() else {
            return;
        };
        if !rejoin {
            if self.rejoining.swap(true, Ordering::SeqCst) {
                debug!(doc_id = %self.doc_id, "rejoin already in progress");
                return;
            }
            warn!(doc_id = %self.doc_id, "collaboration session expired, rejoining");
            self.send(&socket, true);
            return;
        }

        error!(doc_id = %self.doc_id, "rejoin refused, closing collaboration socket");
        let _ = self.events.send(TransportEvent::JoinRejected {
            doc_id: self.doc_id.clone(),
            ack,
        });
        if let Some(connections) = self.connections.upgrade() {
            connections.remove_if(&self.doc_id, |_, s| s.same_socket(&socket));
        }
        socket.disconnect();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub connected: bool,
    pub socket_id: Option<String>,
}

/// Owns one realtime connection per document.
///
/// Built once by the application root and shared as `Arc<TransportManager>`.
pub struct TransportManager {
    connector: Arc<dyn Connector>,
    settings: TransportSettings,
    tokens: Arc<dyn TokenStore>,
    connections: Arc<DashMap<String, SocketHandle>>,
    events: broadcast::Sender<TransportEvent>,
}

impl TransportManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        settings: TransportSettings,
        tokens: Arc<dyn TokenStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(TransportManager {
            connector,
            settings,
            tokens,
            connections: Arc::new(DashMap::new()),
            events,
        })
    }

    /// A manager speaking socket.io over websockets.
    pub fn websocket(settings: TransportSettings, tokens: Arc<dyn TokenStore>) -> Arc<Self> {
        Self::new(Arc::new(WsConnector), settings, tokens)
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Returns the live socket for `doc_id`, opening one if needed.
    ///
    /// A tracked socket that is connected, or still connecting, is returned
    /// as is. One that dropped is disconnected and replaced.
    pub fn connect(&self, doc_id: &str) -> Result<SocketHandle, TransportError> {
        let (socket, stale) = match self.connections.entry(doc_id.to_string()) {
            Entry::Occupied(entry) if entry.get().is_active() => {
                debug!(doc_id, "reusing collaboration socket");
                return Ok(entry.get().clone());
            }
            Entry::Occupied(mut entry) => {
                let socket = self.new_socket(doc_id);
                let stale = entry.insert(socket.clone());
                (socket, Some(stale))
            }
            Entry::Vacant(entry) => {
                let socket = self.new_socket(doc_id);
                entry.insert(socket.clone());
                (socket, None)
            }
        };

        if let Some(stale) = stale {
            debug!(doc_id, "dropping stale collaboration socket");
            stale.disconnect();
        }

        let options = self.settings.options(self.tokens.load());
        info!(
            doc_id,
            endpoint = %options.base_url,
            authenticated = options.auth_token.is_some(),
            "opening collaboration socket"
        );
        if let Err(err) = self.connector.open(&socket, &options) {
            error!(doc_id, "could not open collaboration socket: {}", err);
            self.connections.remove_if(doc_id, |_, s| s.same_socket(&socket));
            return Err(err);
        }
        Ok(socket)
    }

    fn new_socket(&self, doc_id: &str) -> SocketHandle {
        let socket = SocketHandle::new();
        let doc = doc_id.to_string();

        let weak = socket.downgrade();
        let handshake = Handshake {
            doc_id: doc.clone(),
            events: self.events.clone(),
            connections: Arc::downgrade(&self.connections),
            rejoining: Arc::new(AtomicBool::new(false)),
        };
        socket.on(CONNECT, move |_| {
            let Some(socket) = weak.upgrade() else {
                return;
            };
            info!(doc_id = %handshake.doc_id, socket_id = ?socket.id(), "collaboration socket connected");
            let _ = handshake.events.send(TransportEvent::Connected {
                doc_id: handshake.doc_id.clone(),
                socket_id: socket.id(),
            });
            handshake.clone().send(&socket, false);
        });

        let events = self.events.clone();
        let on_disconnect_doc = doc.clone();
        socket.on(DISCONNECT, move |reason| {
            let reason = reason.as_str().unwrap_or("unknown").to_string();
            info!(doc_id = %on_disconnect_doc, %reason, "collaboration socket disconnected");
            let _ = events.send(TransportEvent::Disconnected {
                doc_id: on_disconnect_doc.clone(),
                reason,
            });
        });

        let weak = socket.downgrade();
        let events = self.events.clone();
        let connections = Arc::downgrade(&self.connections);
        socket.on(CONNECT_ERROR, move |payload| {
            error!(doc_id = %doc, error = %payload, "collaboration socket refused");
            if let (Some(connections), Some(socket)) = (connections.upgrade(), weak.upgrade()) {
                connections.remove_if(&doc, |_, s| s.same_socket(&socket));
            }
            let _ = events.send(TransportEvent::ConnectError {
                doc_id: doc.clone(),
                error: payload.clone(),
            });
        });

        socket
    }

    /// Drops the socket of `doc_id`; does not wait for the server.
    pub fn disconnect(&self, doc_id: &str) {
        match self.connections.remove(doc_id) {
            Some((_, socket)) => {
                info!(doc_id, "closing collaboration socket");
                socket.disconnect();
            }
            None => debug!(doc_id, "no collaboration socket to close"),
        }
    }

    pub fn disconnect_all(&self) {
        let docs: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for doc_id in docs {
            self.disconnect(&doc_id);
        }
    }

    pub fn is_connected(&self, doc_id: &str) -> bool {
        self.connections
            .get(doc_id)
            .is_some_and(|socket| socket.connected())
    }

    pub fn get_socket(&self, doc_id: &str) -> Option<SocketHandle> {
        self.connections.get(doc_id).map(|socket| socket.clone())
    }

    /// Documents whose socket currently reports connected, sorted.
    pub fn connected_docs(&self) -> Vec<String> {
        let mut docs: Vec<String> = self
            .connections
            .iter()
            .filter(|e| e.value().connected())
            .map(|e| e.key().clone())
            .collect();
        docs.sort();
        docs
    }

    /// Every tracked socket, connected or not.
    pub fn debug_info(&self) -> BTreeMap<String, ConnectionInfo> {
        self.connections
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    ConnectionInfo {
                        connected: e.value().connected(),
                        socket_id: e.value().id(),
                    },
                )
            })
            .collect()
    }

    /// Emits on the tracked socket of `doc_id`. Returns false when there is
    /// none.
    pub fn emit(&self, doc_id: &str, event: &str, data: Value) -> bool {
        match self.get_socket(doc_id) {
            Some(socket) => {
                socket.emit(event, data);
                true
            }
            None => {
                warn!(doc_id, event, "no collaboration socket, dropping event");
                false
            }
        }
    }

    /// Listens on the tracked socket of `doc_id`. Returns false when there
    /// is none.
    pub fn on<F>(&self, doc_id: &str, event: &str, listener: F) -> bool
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        match self.get_socket(doc_id) {
            Some(socket) => {
                socket.on(event, listener);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportManager")
            .field("settings", &self.settings)
            .field("connections", &self.debug_info())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfigManager;

    #[tokio::test]
    async fn test_settings_from_config() {
        let config = ConfigManager(MapConfigManager::with(&[(SOCKET_URL, "wss://collab.example.com")]));
        let settings = TransportSettings::from_config(&config).await;
        assert_eq!(settings.base_url, "wss://collab.example.com");
        assert_eq!(settings.path, "/socket.io");

        let settings = TransportSettings::from_config(&ConfigManager(MapConfigManager::new())).await;
        assert_eq!(settings, TransportSettings::default());
        assert_eq!(settings.base_url, "ws://localhost:5001");
    }

    #[test]
    fn test_options_carry_token() {
        let options = TransportSettings::default().options(Some("t".into()));
        assert_eq!(options.auth_payload(), Some(json!({"token": "t"})));
        assert!(options.with_credentials);
        assert_eq!(TransportSettings::default().options(None).auth_payload(), None);
    }

    #[test]
    fn test_unauthorized_ack_shapes() {
        assert!(is_unauthorized(&[json!("unauthorized")]));
        assert!(is_unauthorized(&[json!({"status": 401})]));
        assert!(is_unauthorized(&[json!({"code": 401, "msg": "token expired"})]));
        assert!(is_unauthorized(&[json!({"msg": "Unauthorized"})]));
        assert!(!is_unauthorized(&[json!({"ok": true})]));
        assert!(!is_unauthorized(&[json!({"status": 200})]));
        assert!(!is_unauthorized(&[]));
    }

    #[test]
    fn test_event_doc_id() {
        let event = TransportEvent::Disconnected { doc_id: "d".into(), reason: "x".into() };
        assert_eq!(event.doc_id(), "d");
        assert_eq!(serde_json::to_value(&event).unwrap()["event"], json!("disconnected"));
    }
}
