//! Session Hub: the WebSocket-facing broker between remote clients and the
//! per-port Controllers running in `axiocnc-runtime`.
//!
//! Grounded on `dosa::websocket::WebSocketServer` (accept loop spawning one
//! task per connection, `tokio::select!` between inbound client messages and
//! an event feed, register/unregister lifecycle), generalized from one fixed
//! device to many ports keyed by [`ControllerId`]. Unlike the teacher, each
//! session subscribes directly to the shared [`EventDispatcher`] rather than
//! needing its own relay `broadcast::Sender` — the dispatcher is already a
//! multi-subscriber broadcast channel.

use crate::auth::AuthService;
use axiocnc_core::error::{Error, ValidationError};
use axiocnc_core::event::{ControllerEvent, EventDispatcher, EventKind};
use axiocnc_core::ids::{ControllerFamily, ControllerId};
use axiocnc_core::message::MessageDispatcher;
use axiocnc_runtime::status_manager::{AggregatedStatus, StatusManager};
use axiocnc_runtime::{Command, Controller, ControllerHandle};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

type SessionId = usize;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientMessage {
    Open {
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        #[serde(default)]
        controller_type: ControllerFamily,
    },
    Close {
        port: String,
    },
    Command {
        port: String,
        cmd: String,
        #[serde(default)]
        args: Value,
    },
    Write {
        port: String,
        bytes: Vec<u8>,
    },
    Writeln {
        port: String,
        text: String,
    },
}

fn default_baud_rate() -> u32 {
    115_200
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Opened {
        port: String,
        snapshot: Option<AggregatedStatus>,
    },
    Closed {
        port: String,
    },
    Ack {
        port: String,
        action: String,
    },
    Error {
        message: String,
    },
    Event {
        port: Option<String>,
        kind: EventKind,
    },
}

impl ServerMessage {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"failed to encode server message"}"#.to_string()
        })
    }
}

/// One open controller plus the sessions currently subscribed to it, used to
/// decide when `close(port)` should actually tear the Controller down.
struct ControllerEntry {
    handle: ControllerHandle,
    task: tokio::task::JoinHandle<()>,
    subscribers: HashSet<SessionId>,
}

pub struct SessionHub {
    auth: Arc<AuthService>,
    events: EventDispatcher,
    messages: MessageDispatcher,
    status: StatusManager,
    controllers: RwLock<HashMap<ControllerId, ControllerEntry>>,
    next_session_id: AtomicUsize,
    close_grace: Duration,
}

impl SessionHub {
    pub fn new(
        auth: Arc<AuthService>,
        events: EventDispatcher,
        messages: MessageDispatcher,
        status: StatusManager,
        close_grace: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            auth,
            events,
            messages,
            status,
            controllers: RwLock::new(HashMap::new()),
            next_session_id: AtomicUsize::new(0),
            close_grace,
        })
    }

    /// Run the WebSocket accept loop. Spawns one task per connection;
    /// returns only if the listener itself fails to bind.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "session hub listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let hub = self.clone();
            tokio::spawn(async move {
                if let Err(err) = hub.handle_connection(stream, peer).await {
                    tracing::warn!(%peer, "session error: {err}");
                }
            });
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), Error> {
        let captured_token: Arc<std::sync::Mutex<Option<String>>> =
            Arc::new(std::sync::Mutex::new(None));
        let for_callback = captured_token.clone();
        let callback = move |req: &Request, response: Response| {
            if let Some(value) = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
            {
                if let Some(token) = crate::auth::extract_bearer_token(value) {
                    *for_callback.lock().unwrap() = Some(token.to_string());
                }
            }
            Ok(response)
        };

        let ws_stream = accept_hdr_async(stream, callback)
            .await
            .map_err(|e| Error::other(e.to_string()))?;

        let token = captured_token.lock().unwrap().clone();
        let user = match self.auth.verify(token.as_deref()).await {
            Ok(user) => user,
            Err(err) => {
                tracing::info!(%peer, "rejecting unauthenticated session: {err}");
                return Err(err.into());
            }
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(%peer, session = session_id, user = %user.username, "session opened");

        let (mut write, mut read) = ws_stream.split();
        let mut events = self.events.subscribe();
        let mut subscribed_ports: HashSet<ControllerId> = HashSet::new();

        loop {
            tokio::select! {
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let response = Self::dispatch(&self, session_id, &mut subscribed_ports, &text).await;
                            if write.send(Message::Text(response.to_json())).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            tracing::debug!(session = session_id, "websocket error: {err}");
                            break;
                        }
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Some(message) = self.render_event(&subscribed_ports, event) {
                                if write.send(Message::Text(message.to_json())).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(session = session_id, skipped, "event subscriber lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        for port in subscribed_ports {
            Self::unsubscribe(&self, session_id, &port).await;
        }
        tracing::info!(session = session_id, "session closed");
        Ok(())
    }

    fn render_event(
        &self,
        subscribed_ports: &HashSet<ControllerId>,
        event: ControllerEvent,
    ) -> Option<ServerMessage> {
        let controller = event.controller.as_ref()?;
        if !subscribed_ports.contains(controller) {
            return None;
        }
        Some(ServerMessage::Event {
            port: Some(controller.port.clone()),
            kind: event.kind,
        })
    }

    async fn dispatch(
        hub: &Arc<Self>,
        session_id: SessionId,
        subscribed_ports: &mut HashSet<ControllerId>,
        text: &str,
    ) -> ServerMessage {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                return ServerMessage::Error {
                    message: format!("malformed message: {err}"),
                }
            }
        };

        match message {
            ClientMessage::Open { port, baud_rate, controller_type } => {
                let id = ControllerId::new(&port, baud_rate);
                Self::open(hub, session_id, id.clone(), controller_type).await;
                subscribed_ports.insert(id.clone());
                let snapshot = hub.status.get(&id).await;
                ServerMessage::Opened { port, snapshot }
            }
            ClientMessage::Close { port } => {
                let id = match hub.resolve(subscribed_ports, &port) {
                    Ok(id) => id,
                    Err(err) => return validation_to_message(err),
                };
                Self::unsubscribe(hub, session_id, &id).await;
                subscribed_ports.remove(&id);
                ServerMessage::Closed { port }
            }
            ClientMessage::Command { port, cmd, args } => {
                let id = match hub.resolve(subscribed_ports, &port) {
                    Ok(id) => id,
                    Err(err) => return validation_to_message(err),
                };
                let command = match parse_command(&cmd, &args) {
                    Ok(command) => command,
                    Err(err) => return validation_to_message(err),
                };
                hub.forward(&id, command, &port, &cmd).await
            }
            ClientMessage::Write { port, bytes } => {
                let id = match hub.resolve(subscribed_ports, &port) {
                    Ok(id) => id,
                    Err(err) => return validation_to_message(err),
                };
                hub.forward(&id, Command::Write(bytes), &port, "write").await
            }
            ClientMessage::Writeln { port, text } => {
                let id = match hub.resolve(subscribed_ports, &port) {
                    Ok(id) => id,
                    Err(err) => return validation_to_message(err),
                };
                hub.forward(&id, Command::Writeln(text), &port, "writeln").await
            }
        }
    }

    /// A command may only address a port this session has already `open`ed.
    /// Returned synchronously, no side effects — the §7 contract for
    /// `ValidationError`.
    fn resolve(
        &self,
        subscribed_ports: &HashSet<ControllerId>,
        port: &str,
    ) -> Result<ControllerId, ValidationError> {
        subscribed_ports
            .iter()
            .find(|id| id.port == port)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownPort {
                port: port.to_string(),
            })
    }

    async fn forward(&self, id: &ControllerId, command: Command, port: &str, action: &str) -> ServerMessage {
        let handle = {
            let controllers = self.controllers.read().await;
            controllers.get(id).map(|entry| entry.handle.clone())
        };
        let Some(handle) = handle else {
            return validation_to_message(ValidationError::UnknownPort {
                port: port.to_string(),
            });
        };
        match handle.send(command).await {
            Ok(()) => ServerMessage::Ack {
                port: port.to_string(),
                action: action.to_string(),
            },
            Err(err) => ServerMessage::Error {
                message: err.to_string(),
            },
        }
    }

    /// Find-or-create the Controller for `id`, open its transport, and
    /// register `session_id` as a subscriber. `family` only takes effect the
    /// first time a port is opened; an already-running Controller keeps
    /// whichever family it was created with.
    async fn open(hub: &Arc<Self>, session_id: SessionId, id: ControllerId, family: ControllerFamily) {
        let mut controllers = hub.controllers.write().await;
        let entry = controllers.entry(id.clone()).or_insert_with(|| {
            let (handle, task) =
                Controller::spawn(id.clone(), family, hub.events.clone(), hub.messages.clone());
            ControllerEntry {
                handle,
                task,
                subscribers: HashSet::new(),
            }
        });
        entry.subscribers.insert(session_id);
        let _ = entry.handle.send(Command::Open).await;
    }

    /// Drop `session_id`'s subscription; if it was the last one, close the
    /// Controller's transport after the configured grace period.
    async fn unsubscribe(hub: &Arc<Self>, session_id: SessionId, id: &ControllerId) {
        let now_empty = {
            let mut controllers = hub.controllers.write().await;
            match controllers.get_mut(id) {
                Some(entry) => {
                    entry.subscribers.remove(&session_id);
                    entry.subscribers.is_empty()
                }
                None => false,
            }
        };
        if !now_empty {
            return;
        }
        if hub.close_grace.is_zero() {
            hub.close_if_still_empty(id).await;
            return;
        }
        let hub = hub.clone();
        let id = id.clone();
        let grace = hub.close_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            hub.close_if_still_empty(&id).await;
        });
    }

    /// Synthetic subscriber id used when the REST layer (not a WebSocket
    /// session) opens or closes a Controller on a client's behalf.
    const REST_SUBSCRIBER: SessionId = SessionId::MAX;

    /// REST-side mirror of the socket `open` verb (§6): find-or-create the
    /// Controller and return its current aggregated snapshot.
    pub async fn rest_open(self: &Arc<Self>, id: ControllerId, family: ControllerFamily) -> Option<AggregatedStatus> {
        Self::open(self, Self::REST_SUBSCRIBER, id.clone(), family).await;
        self.status.get(&id).await
    }

    /// REST-side mirror of the socket `close` verb.
    pub async fn rest_close(self: &Arc<Self>, id: &ControllerId) {
        Self::unsubscribe(self, Self::REST_SUBSCRIBER, id).await;
    }

    pub async fn list_ports(&self) -> Vec<ControllerId> {
        self.controllers.read().await.keys().cloned().collect()
    }

    /// Current aggregated status for `id`, for REST handlers that don't
    /// hold a session's subscription.
    pub async fn status_snapshot(&self, id: &ControllerId) -> Option<AggregatedStatus> {
        self.status.get(id).await
    }

    /// Forward a command to an already-open Controller, for REST endpoints
    /// (`POST /gcode`) that don't hold a persistent session.
    pub async fn rest_command(&self, id: &ControllerId, command: Command) -> Result<(), Error> {
        let handle = {
            let controllers = self.controllers.read().await;
            controllers.get(id).map(|entry| entry.handle.clone())
        };
        match handle {
            Some(handle) => handle.send(command).await,
            None => Err(ValidationError::UnknownPort {
                port: id.port.clone(),
            }
            .into()),
        }
    }

    async fn close_if_still_empty(&self, id: &ControllerId) {
        let handle = {
            let controllers = self.controllers.read().await;
            match controllers.get(id) {
                Some(entry) if entry.subscribers.is_empty() => Some(entry.handle.clone()),
                _ => None,
            }
        };
        let Some(handle) = handle else { return };
        let _ = handle.send(Command::Close).await;
        let mut controllers = self.controllers.write().await;
        if let Some(entry) = controllers.get(id) {
            if entry.subscribers.is_empty() {
                if let Some(entry) = controllers.remove(id) {
                    entry.task.abort();
                }
            }
        }
    }
}

fn validation_to_message(err: ValidationError) -> ServerMessage {
    ServerMessage::Error {
        message: err.to_string(),
    }
}

fn parse_command(cmd: &str, args: &Value) -> Result<Command, ValidationError> {
    fn bad(argument: &str, reason: impl Into<String>) -> ValidationError {
        ValidationError::BadArgument {
            argument: argument.to_string(),
            reason: reason.into(),
        }
    }
    fn str_field<'a>(args: &'a Value, field: &str) -> Result<&'a str, ValidationError> {
        args.get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| bad(field, "must be a string"))
    }

    match cmd {
        "gcode" => Ok(Command::Gcode {
            text: str_field(args, "text")?.to_string(),
            context: args.get("context").cloned().unwrap_or(Value::Null),
        }),
        "gcode_load" => Ok(Command::GcodeLoad {
            name: str_field(args, "name")?.to_string(),
            text: str_field(args, "text")?.to_string(),
            context: args.get("context").cloned().unwrap_or(Value::Null),
        }),
        "gcode_unload" => Ok(Command::GcodeUnload),
        "gcode_start" => Ok(Command::GcodeStart),
        "gcode_pause" => Ok(Command::GcodePause),
        "gcode_resume" => Ok(Command::GcodeResume),
        "gcode_stop" => Ok(Command::GcodeStop {
            force: args.get("force").and_then(Value::as_bool).unwrap_or(false),
        }),
        "feed_hold" => Ok(Command::FeedHold),
        "cycle_start" => Ok(Command::CycleStart),
        "homing" => Ok(Command::Homing),
        "unlock" => Ok(Command::Unlock),
        "reset" => Ok(Command::Reset),
        "set_feed_override" => Ok(Command::SetFeedOverride(
            args.get("percent")
                .and_then(Value::as_u64)
                .ok_or_else(|| bad("percent", "must be an integer"))? as u16,
        )),
        "set_rapid_override" => Ok(Command::SetRapidOverride(
            args.get("percent")
                .and_then(Value::as_u64)
                .ok_or_else(|| bad("percent", "must be an integer"))? as u8,
        )),
        "set_spindle_override" => Ok(Command::SetSpindleOverride(
            args.get("percent")
                .and_then(Value::as_u64)
                .ok_or_else(|| bad("percent", "must be an integer"))? as u16,
        )),
        other => Err(bad("cmd", format!("unknown command '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_gcode_command() {
        let command = parse_command("gcode", &json!({ "text": "G0 X0" })).unwrap();
        assert!(matches!(command, Command::Gcode { .. }));
    }

    #[test]
    fn parses_override_percentage() {
        let command = parse_command("set_feed_override", &json!({ "percent": 120 })).unwrap();
        assert!(matches!(command, Command::SetFeedOverride(120)));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(parse_command("frobnicate", &json!({})).is_err());
    }

    #[test]
    fn rejects_missing_argument() {
        assert!(parse_command("gcode", &json!({})).is_err());
    }
}
