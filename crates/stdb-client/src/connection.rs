//! The connection task: owns the WebSocket and all protocol state.
//!
//! One tokio task per client owns the socket, the request/query-set id
//! counters, and the pending-request map. Callers talk to it through a
//! bounded command channel (a full channel blocks the caller, never drops a
//! request); it publishes decoded server events on an event channel drained
//! by the dispatch task.
//!
//! Frame-level trouble is never fatal: decompression failures, decode
//! failures, and unknown tags are logged and the frame dropped. Socket
//! failures trigger reconnection with capped backoff; counters restart at 1
//! on every fresh connection.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use stdb_wire::{
    strip_envelope, ClientMessage, ConnectionId, Identity, ServerMessage,
    UNSUBSCRIBE_FLAG_SEND_DROPPED_ROWS,
};

use crate::config::{ClientConfig, ReconnectPolicy};

/// The WebSocket subprotocol spoken on the subscription socket.
pub(crate) const SUBPROTOCOL: &str = "v2.bsatn.spacetimedb";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Ids and descriptors
// ============================================================================

/// Mints strictly increasing u32 ids, starting at 1.
#[derive(Debug)]
pub(crate) struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub(crate) fn new() -> Self {
        Self { next: 1 }
    }

    pub(crate) fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }
}

/// What an in-flight request was, kept until its response arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Subscribe {
        query_set_id: u32,
        queries: Vec<String>,
    },
    Unsubscribe {
        query_set_id: u32,
    },
    OneOffQuery {
        query: String,
    },
    CallReducer {
        name: String,
    },
    CallProcedure {
        name: String,
    },
}

// ============================================================================
// Channel protocol
// ============================================================================

/// Commands accepted by the connection task.
#[derive(Debug)]
pub(crate) enum Command {
    Subscribe {
        queries: Vec<String>,
        reply: oneshot::Sender<u32>,
    },
    Unsubscribe {
        query_set_id: u32,
        send_dropped_rows: bool,
    },
    OneOffQuery {
        query: String,
    },
    CallReducer {
        reducer: String,
        args: Bytes,
    },
    CallProcedure {
        procedure: String,
        args: Bytes,
    },
    Shutdown,
}

/// Events published by the connection task.
#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    /// The server accepted the connection and sent its identity.
    Connected {
        identity: Identity,
        connection_id: ConnectionId,
        token: String,
    },
    /// A decoded server message (everything but the initial handshake).
    Message(ServerMessage),
    /// A pending request was dropped without a response.
    RequestAborted { request_id: u32 },
    /// The socket dropped; `attempt` counts consecutive failures.
    Disconnected { reason: String, attempt: u32 },
    /// Reconnection attempts are exhausted.
    Failed,
}

/// Backoff before reconnect attempt `attempt` (1-based).
pub(crate) fn backoff_delay(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    policy
        .base_backoff
        .saturating_mul(attempt)
        .min(policy.max_backoff)
}

/// Spawns the connection task.
pub(crate) fn spawn(
    config: ClientConfig,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<ConnectionEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(config, commands, events))
}

// ============================================================================
// Task body
// ============================================================================

enum ServeEnd {
    Shutdown,
    Dropped(String),
}

async fn run(
    config: ClientConfig,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<ConnectionEvent>,
) {
    // The latest token wins: the server may mint one on first connect, and
    // reconnects present it instead of the configured token.
    let mut token = config.token.clone();
    let mut attempt: u32 = 0;

    loop {
        match connect(&config, token.as_deref()).await {
            Ok(socket) => {
                info!(host = %config.host, database = %config.database, "connected");
                attempt = 0;
                match serve(socket, &mut commands, &events, &mut token).await {
                    ServeEnd::Shutdown => {
                        debug!("connection task shutting down");
                        return;
                    }
                    ServeEnd::Dropped(reason) => {
                        attempt += 1;
                        if events
                            .send(ConnectionEvent::Disconnected {
                                reason,
                                attempt,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
            Err(err) => {
                attempt += 1;
                if events
                    .send(ConnectionEvent::Disconnected {
                        reason: err,
                        attempt,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }

        if attempt >= config.reconnect.max_attempts {
            warn!(attempt, "reconnection attempts exhausted");
            let _ = events.send(ConnectionEvent::Failed).await;
            return;
        }
        // Commands issued during backoff wait in the bounded channel; they
        // go out (in order) once a connection is reestablished.
        let delay = backoff_delay(&config.reconnect, attempt);
        debug!(?delay, attempt, "backing off before reconnect");
        tokio::time::sleep(delay).await;
    }
}

/// Serves one established connection until shutdown or drop.
async fn serve(
    socket: WsStream,
    commands: &mut mpsc::Receiver<Command>,
    events: &mpsc::Sender<ConnectionEvent>,
    token: &mut Option<String>,
) -> ServeEnd {
    let (mut sink, mut stream) = socket.split();
    let mut request_ids = IdAllocator::new();
    let mut query_set_ids = IdAllocator::new();
    let mut pending: HashMap<u32, RequestKind> = HashMap::new();

    let end = loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    break ServeEnd::Shutdown;
                };
                if matches!(cmd, Command::Shutdown) {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break ServeEnd::Shutdown;
                }
                let message = build_message(cmd, &mut request_ids, &mut query_set_ids, &mut pending);
                trace!(request_id = message.request_id(), "sending");
                if let Err(err) = sink.send(WsMessage::Binary(message.encode().to_vec())).await {
                    break ServeEnd::Dropped(err.to_string());
                }
            }
            frame = stream.next() => {
                match frame {
                    None => break ServeEnd::Dropped("server closed the connection".to_string()),
                    Some(Err(err)) => break ServeEnd::Dropped(err.to_string()),
                    Some(Ok(WsMessage::Binary(frame))) => {
                        if let Some(event) = decode_frame(&frame, &mut pending, token) {
                            if events.send(event).await.is_err() {
                                break ServeEnd::Shutdown;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "server closed the connection".to_string());
                        break ServeEnd::Dropped(reason);
                    }
                    Some(Ok(WsMessage::Text(_))) => trace!("ignoring text frame"),
                    Some(Ok(_)) => {} // ping/pong handled by the library
                }
            }
        }
    };

    // Whatever is still pending will never be answered.
    for (request_id, kind) in pending.drain() {
        debug!(request_id, ?kind, "aborting pending request");
        let _ = events
            .send(ConnectionEvent::RequestAborted { request_id })
            .await;
    }
    end
}

/// Builds the wire message for a command, minting ids and registering the
/// request descriptor.
fn build_message(
    cmd: Command,
    request_ids: &mut IdAllocator,
    query_set_ids: &mut IdAllocator,
    pending: &mut HashMap<u32, RequestKind>,
) -> ClientMessage {
    let request_id = request_ids.next_id();
    match cmd {
        Command::Subscribe { queries, reply } => {
            let query_set_id = query_set_ids.next_id();
            pending.insert(
                request_id,
                RequestKind::Subscribe {
                    query_set_id,
                    queries: queries.clone(),
                },
            );
            let _ = reply.send(query_set_id);
            ClientMessage::Subscribe {
                request_id,
                query_set_id,
                queries,
            }
        }
        Command::Unsubscribe {
            query_set_id,
            send_dropped_rows,
        } => {
            pending.insert(request_id, RequestKind::Unsubscribe { query_set_id });
            ClientMessage::Unsubscribe {
                request_id,
                query_set_id,
                flags: if send_dropped_rows {
                    UNSUBSCRIBE_FLAG_SEND_DROPPED_ROWS
                } else {
                    0
                },
            }
        }
        Command::OneOffQuery { query } => {
            pending.insert(
                request_id,
                RequestKind::OneOffQuery {
                    query: query.clone(),
                },
            );
            ClientMessage::OneOffQuery { request_id, query }
        }
        Command::CallReducer { reducer, args } => {
            pending.insert(
                request_id,
                RequestKind::CallReducer {
                    name: reducer.clone(),
                },
            );
            ClientMessage::CallReducer {
                request_id,
                flags: 0,
                reducer,
                args,
            }
        }
        Command::CallProcedure { procedure, args } => {
            pending.insert(
                request_id,
                RequestKind::CallProcedure {
                    name: procedure.clone(),
                },
            );
            ClientMessage::CallProcedure {
                request_id,
                flags: 0,
                procedure,
                args,
            }
        }
        Command::Shutdown => unreachable!("shutdown is handled before minting an id"),
    }
}

/// Strips the envelope and decodes one frame, clearing any matching
/// request descriptor. Returns `None` when the frame is dropped.
fn decode_frame(
    frame: &[u8],
    pending: &mut HashMap<u32, RequestKind>,
    token: &mut Option<String>,
) -> Option<ConnectionEvent> {
    let payload = match strip_envelope(frame) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%err, "dropping frame with bad envelope");
            return None;
        }
    };
    let message = match ServerMessage::decode(payload) {
        Ok(message) => message,
        Err(err) => {
            warn!(%err, "dropping undecodable frame");
            return None;
        }
    };

    if let Some(request_id) = message.request_id() {
        if pending.remove(&request_id).is_none() {
            debug!(request_id, "response matches no pending request");
        }
    }

    match message {
        ServerMessage::InitialConnection {
            identity,
            connection_id,
            token: minted,
        } => {
            *token = Some(minted.clone());
            Some(ConnectionEvent::Connected {
                identity,
                connection_id,
                token: minted,
            })
        }
        other => Some(ConnectionEvent::Message(other)),
    }
}

/// Opens the WebSocket with the subprotocol and bearer token headers.
async fn connect(config: &ClientConfig, token: Option<&str>) -> Result<WsStream, String> {
    let url = config.ws_url();
    debug!(%url, "connecting");

    let mut request = url
        .into_client_request()
        .map_err(|e| format!("bad endpoint: {e}"))?;
    let headers = request.headers_mut();
    headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
    if let Some(token) = token {
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| format!("bad token: {e}"))?;
        headers.insert(AUTHORIZATION, bearer);
    }

    let (socket, _response) = connect_async(request).await.map_err(|e| e.to_string())?;
    Ok(socket)
}

#[cfg(test)]
mod connection_tests {
    use super::*;

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(ids.next_id(), 3);
    }

    #[test]
    fn backoff_scales_linearly_and_caps() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(2),
        };
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_secs(1));
        assert_eq!(backoff_delay(&policy, 100), Duration::from_secs(2));
    }

    #[test]
    fn build_message_registers_descriptor_and_replies_with_query_set_id() {
        let mut request_ids = IdAllocator::new();
        let mut query_set_ids = IdAllocator::new();
        let mut pending = HashMap::new();
        let (reply, mut rx) = oneshot::channel();

        let message = build_message(
            Command::Subscribe {
                queries: vec!["SELECT * FROM person".to_string()],
                reply,
            },
            &mut request_ids,
            &mut query_set_ids,
            &mut pending,
        );

        assert_eq!(message.request_id(), 1);
        assert_eq!(rx.try_recv().expect("query set id"), 1);
        assert!(matches!(
            pending.get(&1),
            Some(RequestKind::Subscribe { query_set_id: 1, .. })
        ));
    }

    #[test]
    fn decode_frame_clears_matching_descriptor() {
        use bytes::{BufMut, BytesMut};

        let mut pending = HashMap::new();
        pending.insert(4, RequestKind::CallReducer { name: "f".into() });
        let mut token = None;

        // ReducerResult{request_id: 4, ts: 0, outcome: OkEmpty} under a
        // plain envelope.
        let mut frame = BytesMut::new();
        frame.put_u8(stdb_wire::COMPRESSION_NONE);
        frame.put_u8(0x06);
        frame.put_u32_le(4);
        frame.put_i64_le(0);
        frame.put_u8(1);

        let event = decode_frame(&frame, &mut pending, &mut token);
        assert!(matches!(event, Some(ConnectionEvent::Message(_))));
        assert!(pending.is_empty());
    }

    #[test]
    fn decode_frame_drops_garbage_without_touching_descriptors() {
        let mut pending = HashMap::new();
        pending.insert(1, RequestKind::OneOffQuery { query: "q".into() });
        let mut token = None;

        assert!(decode_frame(&[0x55, 1, 2], &mut pending, &mut token).is_none());
        assert!(decode_frame(&[], &mut pending, &mut token).is_none());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn initial_connection_updates_token() {
        use bytes::{BufMut, BytesMut};

        let mut pending = HashMap::new();
        let mut token = Some("old".to_string());

        let mut frame = BytesMut::new();
        frame.put_u8(stdb_wire::COMPRESSION_NONE);
        frame.put_u8(0x00);
        frame.put_slice(&[0u8; 32]);
        frame.put_slice(&[0u8; 16]);
        frame.put_u32_le(3);
        frame.put_slice(b"new");

        let event = decode_frame(&frame, &mut pending, &mut token);
        assert!(matches!(
            event,
            Some(ConnectionEvent::Connected { ref token, .. }) if token == "new"
        ));
        assert_eq!(token.as_deref(), Some("new"));
    }
}
