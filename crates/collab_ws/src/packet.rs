// Engine.IO v4 / Socket.IO v5 text framing.
//
// A websocket text frame carries one Engine.IO packet: a single type digit
// followed by its payload. Engine.IO `message` packets carry one Socket.IO
// packet, again a type digit, an optional ack id and a JSON payload:
//
//   0{"sid":"..."}            engine open
//   2 / 3                     engine ping / pong
//   40{"token":"..."}         socket connect (with auth)
//   421["event",{...}]        socket event with ack id 1
//   431[{...}]                socket ack for id 1
//   44{"message":"..."}       socket connect error

use serde_json::Value;

use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Value),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self, TransportError> {
        let kind = frame
            .chars()
            .next()
            .ok_or_else(|| TransportError::Packet("empty engine.io frame".into()))?;
        let body = &frame[kind.len_utf8()..];
        match kind {
            '0' => serde_json::from_str(body)
                .map(EnginePacket::Open)
                .map_err(|e| TransportError::Packet(format!("bad open payload: {e}"))),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(body.to_string())),
            '3' => Ok(EnginePacket::Pong(body.to_string())),
            '4' => Ok(EnginePacket::Message(body.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(TransportError::Packet(format!("unknown engine.io packet type `{other}`"))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(payload) => format!("0{payload}"),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(body) => format!("2{body}"),
            EnginePacket::Pong(body) => format!("3{body}"),
            EnginePacket::Message(body) => format!("4{body}"),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Socket.IO packets on the root namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event {
        id: Option<u64>,
        event: String,
        data: Vec<Value>,
    },
    Ack {
        id: u64,
        data: Vec<Value>,
    },
    ConnectError(Value),
}

impl SocketPacket {
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        SocketPacket::Event {
            id: None,
            event: event.into(),
            data: vec![data],
        }
    }

    pub fn decode(text: &str) -> Result<Self, TransportError> {
        let kind = text
            .chars()
            .next()
            .ok_or_else(|| TransportError::Packet("empty socket.io packet".into()))?;
        let mut rest = &text[kind.len_utf8()..];

        if rest.starts_with('/') {
            let (namespace, tail) = rest.split_once(',').unwrap_or((rest, ""));
            if namespace != "/" {
                return Err(TransportError::Packet(format!(
                    "unsupported namespace `{namespace}`"
                )));
            }
            rest = tail;
        }

        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let id = if digits > 0 {
            Some(
                rest[..digits]
                    .parse::<u64>()
                    .map_err(|e| TransportError::Packet(format!("bad ack id: {e}")))?,
            )
        } else {
            None
        };
        let payload = &rest[digits..];

        match kind {
            '0' => Ok(SocketPacket::Connect(if payload.is_empty() {
                None
            } else {
                Some(parse_json(payload)?)
            })),
            '1' => Ok(SocketPacket::Disconnect),
            '2' => {
                let mut items = match parse_json(payload)? {
                    Value::Array(items) => items.into_iter(),
                    other => {
                        return Err(TransportError::Packet(format!(
                            "event payload must be an array, got {other}"
                        )));
                    }
                };
                let event = match items.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err(TransportError::Packet("event name missing".into())),
                };
                Ok(SocketPacket::Event {
                    id,
                    event,
                    data: items.collect(),
                })
            }
            '3' => {
                let id = id.ok_or_else(|| TransportError::Packet("ack without id".into()))?;
                match parse_json(payload)? {
                    Value::Array(data) => Ok(SocketPacket::Ack { id, data }),
                    other => Err(TransportError::Packet(format!(
                        "ack payload must be an array, got {other}"
                    ))),
                }
            }
            '4' => Ok(SocketPacket::ConnectError(if payload.is_empty() {
                Value::Null
            } else {
                parse_json(payload)?
            })),
            '5' | '6' => Err(TransportError::Packet(
                "binary packets are not supported".into(),
            )),
            other => Err(TransportError::Packet(format!(
                "unknown socket.io packet type `{other}`"
            ))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(auth)) => format!("0{auth}"),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { id, event, data } => {
                let mut items = Vec::with_capacity(data.len() + 1);
                items.push(Value::String(event.clone()));
                items.extend(data.iter().cloned());
                let id = id.map(|id| id.to_string()).unwrap_or_default();
                format!("2{id}{}", Value::Array(items))
            }
            SocketPacket::Ack { id, data } => format!("3{id}{}", Value::Array(data.clone())),
            SocketPacket::ConnectError(payload) => format!("4{payload}"),
        }
    }

    /// Wraps this packet into the engine.io frame that goes on the wire.
    pub fn into_frame(self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

fn parse_json(text: &str) -> Result<Value, TransportError> {
    serde_json::from_str(text).map_err(|e| TransportError::Packet(format!("bad json payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_engine_open() {
        let packet = EnginePacket::decode(r#"0{"sid":"abc","pingInterval":25000}"#).unwrap();
        assert_eq!(packet, EnginePacket::Open(json!({"sid": "abc", "pingInterval": 25000})));
    }

    #[test]
    fn test_ping_is_answered_with_matching_pong() {
        let EnginePacket::Ping(body) = EnginePacket::decode("2heartbeat").unwrap() else {
            panic!("expected ping");
        };
        assert_eq!(EnginePacket::Pong(body).encode(), "3heartbeat");
    }

    #[test]
    fn test_connect_frame_carries_auth() {
        let frame = SocketPacket::Connect(Some(json!({"token": "t0k"}))).into_frame();
        assert_eq!(frame, r#"40{"token":"t0k"}"#);
        assert_eq!(SocketPacket::Connect(None).into_frame(), "40");
    }

    #[test]
    fn test_event_with_ack_id() {
        let packet = SocketPacket::Event {
            id: Some(12),
            event: "user_connect".into(),
            data: vec![json!({"workflow_id": "app-1"})],
        };
        let encoded = packet.encode();
        assert_eq!(encoded, r#"212["user_connect",{"workflow_id":"app-1"}]"#);
        assert_eq!(SocketPacket::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn test_decode_ack() {
        let packet = SocketPacket::decode(r#"37[{"ok":true}]"#).unwrap();
        assert_eq!(packet, SocketPacket::Ack { id: 7, data: vec![json!({"ok": true})] });
    }

    #[test]
    fn test_decode_connect_error() {
        let packet = SocketPacket::decode(r#"4{"message":"Not authorized"}"#).unwrap();
        assert_eq!(packet, SocketPacket::ConnectError(json!({"message": "Not authorized"})));
    }

    #[test]
    fn test_root_namespace_prefix_is_accepted() {
        let packet = SocketPacket::decode(r#"2/,["status",{"isLeader":true}]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event { id: None, event: "status".into(), data: vec![json!({"isLeader": true})] }
        );
    }

    #[test]
    fn test_rejects_foreign_namespace_and_binary() {
        assert!(SocketPacket::decode(r#"2/admin,["x"]"#).is_err());
        assert!(SocketPacket::decode(r#"51-["file",{"_placeholder":true,"num":0}]"#).is_err());
        assert!(SocketPacket::decode(r#"2{"not":"an array"}"#).is_err());
        assert!(EnginePacket::decode("").is_err());
    }
}
