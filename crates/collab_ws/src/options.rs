use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::error::TransportError;

/// The only transport spoken; there is no polling fallback or upgrade
/// negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Websocket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Websocket => "websocket",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub base_url: String,
    pub path: String,
    pub transport: TransportKind,
    /// Sends the auth token on the upgrade request as well as in the
    /// socket.io connect packet.
    pub with_credentials: bool,
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
}

impl ConnectOptions {
    pub const DEFAULT_URL: &'static str = "ws://localhost:5001";
    pub const DEFAULT_PATH: &'static str = "/socket.io";

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: Self::DEFAULT_PATH.to_string(),
            transport: TransportKind::Websocket,
            with_credentials: true,
            auth_token: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Empty tokens are treated as absent.
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    /// `{"token": ...}` for the socket.io connect packet, if authenticated.
    pub fn auth_payload(&self) -> Option<Value> {
        self.auth_token.as_ref().map(|token| json!({ "token": token }))
    }

    /// Resolves the websocket URL of the engine.io handshake,
    /// e.g. `ws://localhost:5001/socket.io/?EIO=4&transport=websocket`.
    pub fn handshake_url(&self) -> Result<Url, TransportError> {
        let invalid = |reason: String| TransportError::InvalidEndpoint {
            endpoint: self.base_url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => return Err(invalid(format!("unsupported scheme `{other}`"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| invalid(format!("cannot switch scheme to `{scheme}`")))?;
        url.set_path(&format!("{}/", self.path.trim_end_matches('/')));
        url.set_query(None);
        url.query_pairs_mut()
            .append_pair("EIO", "4")
            .append_pair("transport", self.transport.as_str());
        Ok(url)
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new(Self::DEFAULT_URL)
    }
}
