use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{runtime::Handle, sync::mpsc::UnboundedReceiver};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Error as WsError, Message as WsMsg,
        client::IntoClientRequest,
        handshake::client::Request,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};
use tracing::{debug, info, trace, warn};

use crate::{
    CONNECT, CONNECT_ERROR, DISCONNECT,
    error::TransportError,
    options::ConnectOptions,
    packet::{EnginePacket, SocketPacket},
    socket::{Command, Connector, SocketHandle},
};

/// Drives sockets over a plain websocket speaking Engine.IO v4.
///
/// One tokio task per socket. The task ends when either side closes, the
/// server refuses the connect packet, or the handle is disconnected; it
/// never reconnects.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, socket: &SocketHandle, options: &ConnectOptions) -> Result<(), TransportError> {
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let request = build_request(options)?;
        let commands = socket.take_commands().ok_or(TransportError::AlreadyOpened)?;
        debug!(url = %request.uri(), "opening collaboration socket");
        runtime.spawn(drive(socket.clone(), request, options.auth_payload(), commands));
        Ok(())
    }
}

fn build_request(options: &ConnectOptions) -> Result<Request, TransportError> {
    let url = options.handshake_url()?;
    let invalid = |reason: String| TransportError::InvalidEndpoint {
        endpoint: options.base_url.clone(),
        reason,
    };
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| invalid(e.to_string()))?;
    if options.with_credentials {
        if let Some(token) = &options.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| invalid(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
    }
    Ok(request)
}

async fn send_frame<S>(sink: &mut S, frame: String) -> bool
where
    S: Sink<WsMsg, Error = WsError> + Unpin,
{
    trace!(%frame, "-> frame");
    match sink.send(WsMsg::Text(frame.into())).await {
        Ok(()) => true,
        Err(err) => {
            warn!("failed to write websocket frame: {}", err);
            false
        }
    }
}

async fn drive(
    socket: SocketHandle,
    request: Request,
    auth: Option<Value>,
    mut commands: UnboundedReceiver<Command>,
) {
    let stream = match connect_async(request).await {
        Ok((stream, _)) => stream,
        Err(err) => {
            warn!("websocket connect failed: {}", err);
            socket.mark_disconnected();
            socket.dispatch(CONNECT_ERROR, &json!({ "message": err.to_string() }));
            return;
        }
    };
    let (mut write, mut read) = stream.split();
    // emits issued before the socket.io connect ack
    let mut pending: Vec<SocketPacket> = Vec::new();
    let mut reason = "transport close";
    // set once connect_error can no longer be owed: accepted, refused, or closed by us
    let mut settled = false;

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(WsMsg::Text(text))) => {
                    trace!(frame = %text.as_str(), "<- frame");
                    let packet = match EnginePacket::decode(text.as_str()) {
                        Ok(packet) => packet,
                        Err(err) => {
                            warn!("dropping frame: {}", err);
                            continue;
                        }
                    };
                    match packet {
                        EnginePacket::Open(_) => {
                            let connect = SocketPacket::Connect(auth.clone()).into_frame();
                            if !send_frame(&mut write, connect).await {
                                reason = "transport error";
                                break;
                            }
                        }
                        EnginePacket::Ping(body) => {
                            if !send_frame(&mut write, EnginePacket::Pong(body).encode()).await {
                                reason = "transport error";
                                break;
                            }
                        }
                        EnginePacket::Close => break,
                        EnginePacket::Message(body) => match SocketPacket::decode(&body) {
                            Ok(SocketPacket::Connect(payload)) => {
                                let sid = payload
                                    .as_ref()
                                    .and_then(|p| p.get("sid"))
                                    .and_then(Value::as_str)
                                    .map(str::to_string);
                                info!(sid = ?sid, "collaboration socket accepted");
                                settled = true;
                                socket.mark_connected(sid);
                                let mut flushed = true;
                                for packet in pending.drain(..) {
                                    flushed &= send_frame(&mut write, packet.into_frame()).await;
                                }
                                if !flushed {
                                    reason = "transport error";
                                    break;
                                }
                                socket.dispatch(CONNECT, &Value::Null);
                            }
                            Ok(SocketPacket::Disconnect) => {
                                reason = "io server disconnect";
                                break;
                            }
                            Ok(SocketPacket::Event { event, data, .. }) => {
                                let payload = data.into_iter().next().unwrap_or(Value::Null);
                                socket.dispatch(&event, &payload);
                            }
                            Ok(SocketPacket::Ack { id, data }) => socket.resolve_ack(id, data),
                            Ok(SocketPacket::ConnectError(payload)) => {
                                warn!("server refused socket: {}", payload);
                                socket.dispatch(CONNECT_ERROR, &payload);
                                settled = true;
                                reason = "connect error";
                                break;
                            }
                            Err(err) => warn!("dropping packet: {}", err),
                        },
                        EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => {}
                    }
                }
                Some(Ok(WsMsg::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("websocket read failed: {}", err);
                    reason = "transport error";
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Emit(packet)) => {
                    if socket.connected() {
                        if !send_frame(&mut write, packet.into_frame()).await {
                            reason = "transport error";
                            break;
                        }
                    } else {
                        pending.push(packet);
                    }
                }
                Some(Command::Close) | None => {
                    let _ = send_frame(&mut write, SocketPacket::Disconnect.into_frame()).await;
                    let _ = write.close().await;
                    reason = "io client disconnect";
                    settled = true;
                    break;
                }
            }
        }
    }

    debug!(reason, "collaboration socket task finished");
    if socket.mark_disconnected() {
        socket.dispatch(DISCONNECT, &json!(reason));
    } else if !settled {
        warn!(reason, "connection ended before the server accepted the socket");
        socket.dispatch(CONNECT_ERROR, &json!({ "message": reason }));
    }
}
