//! Per-connection session
//!
//! One session per accepted connection: it owns the read half, decodes
//! envelopes, and dispatches to the registry and router. The write half
//! belongs to a writer task fed by a bounded outbound queue, so fan-out
//! from other sessions never touches this socket directly.
//!
//! Lifecycle: read → dispatch → read, until clean end-of-stream, a
//! decode failure, or server shutdown. The terminal transition always
//! removes the session's user from every room it joined.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{CodecError, RelayError};
use crate::message::{
    Broadcast, ClientEvent, DeliveryFailed, DirectMessage, Join, JoinResponse, Leave,
    NewBroadcastMessage, NewUserJoined, ProtocolError, ServerEvent,
};
use crate::registry::{Member, Registry};
use crate::router;
use crate::types::UserId;

/// Capacity of a session's outbound queue
pub const OUTBOUND_QUEUE_SIZE: usize = 32;

/// Deadline for one socket write in the writer task
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Session state: registry handle, own outbound queue, and the rooms
/// this connection has joined (room name → id issued for that room)
struct Session {
    registry: Arc<Registry>,
    outbound: mpsc::Sender<ServerEvent>,
    memberships: HashMap<String, UserId>,
    peer: String,
}

/// Drive one connection until it closes or the server shuts down
pub async fn run_session(
    stream: TcpStream,
    registry: Arc<Registry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), RelayError> {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    debug!(%peer, "session started");

    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
    let writer = tokio::spawn(write_loop(write_half, outbound_rx));

    let mut session = Session {
        registry,
        outbound,
        memberships: HashMap::new(),
        peer,
    };

    let result = loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!(peer = %session.peer, "session terminating on server shutdown");
                break Ok(());
            }
            event = codec::read_event::<ClientEvent, _>(&mut reader) => match event {
                Ok(event) => session.dispatch(event).await,
                Err(CodecError::Eof) => {
                    debug!(peer = %session.peer, "peer closed the stream");
                    break Ok(());
                }
                Err(CodecError::UnknownTag(tag)) => {
                    warn!(peer = %session.peer, %tag, "unknown event tag");
                    session
                        .send(ServerEvent::ProtocolError(ProtocolError {
                            message: format!("unknown event tag '{tag}'"),
                        }))
                        .await;
                }
                Err(e) => {
                    warn!(peer = %session.peer, error = %e, "closing session on decode failure");
                    break Err(e.into());
                }
            }
        }
    };

    // Terminal transition: leave every joined room, then release the
    // connection by letting the writer drain and shut the socket down.
    session.close();
    drop(session);
    let _ = writer.await;
    result
}

/// Writer task: drains the outbound queue onto the socket
///
/// Each write gets its own deadline; a stalled peer ends the writer
/// (and with it, the connection) instead of blocking senders forever.
async fn write_loop(mut write_half: OwnedWriteHalf, mut events: mpsc::Receiver<ServerEvent>) {
    while let Some(event) = events.recv().await {
        match timeout(WRITE_TIMEOUT, codec::write_event(&mut write_half, &event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "outbound write failed");
                break;
            }
            Err(_) => {
                warn!("outbound write exceeded deadline");
                break;
            }
        }
    }
    let _ = write_half.shutdown().await;
}

impl Session {
    async fn dispatch(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Join(join) => self.handle_join(join).await,
            ClientEvent::Leave(leave) => self.handle_leave(&leave),
            ClientEvent::DirectMessage(dm) => self.handle_direct(dm).await,
            ClientEvent::Broadcast(broadcast) => self.handle_broadcast(broadcast).await,
        }
    }

    async fn handle_join(&mut self, join: Join) {
        // Re-joining a room replaces the previous membership.
        if let Some(old) = self.memberships.remove(&join.chatroom) {
            self.registry.leave(&join.chatroom, old);
        }

        let id = UserId::new();
        let member = Member {
            id,
            nickname: join.nickname.clone(),
            outbound: self.outbound.clone(),
        };
        let prior = self.registry.join(&join.chatroom, member);
        self.memberships.insert(join.chatroom.clone(), id);
        info!(
            peer = %self.peer,
            nickname = %join.nickname,
            chatroom = %join.chatroom,
            %id,
            "joined chatroom"
        );

        // Respond to the joiner with the pre-join snapshot and its id,
        // then notify the prior members. The snapshot was taken under
        // the registry lock; everything from here on is lock-free.
        self.send(ServerEvent::JoinResponse(JoinResponse {
            members: prior.iter().map(Member::info).collect(),
            your_id: id,
        }))
        .await;

        let event = ServerEvent::NewUserJoined(NewUserJoined {
            nickname: join.nickname,
        });
        router::fan_out(&prior, None, &event).await;
    }

    fn handle_leave(&mut self, leave: &Leave) {
        if let Some(id) = self.memberships.remove(&leave.chatroom) {
            self.registry.leave(&leave.chatroom, id);
            info!(peer = %self.peer, chatroom = %leave.chatroom, %id, "left chatroom");
        }
    }

    async fn handle_direct(&mut self, dm: DirectMessage) {
        let members = self.registry.members(&dm.chatroom);
        if let Err(e) = router::route_direct(&members, &dm).await {
            warn!(peer = %self.peer, error = %e, "direct message not delivered");
            self.send(ServerEvent::DeliveryFailed(DeliveryFailed {
                to_id: dm.to_id,
                reason: e.to_string(),
            }))
            .await;
        }
    }

    async fn handle_broadcast(&mut self, broadcast: Broadcast) {
        let members = self.registry.members(&broadcast.chatroom);
        let event = ServerEvent::NewBroadcastMessage(NewBroadcastMessage {
            from_id: broadcast.from_id,
            text: broadcast.text,
        });
        router::fan_out(&members, Some(broadcast.from_id), &event).await;
    }

    /// Queue an event for this session's own connection
    async fn send(&self, event: ServerEvent) {
        if let Err(e) = self
            .outbound
            .send_timeout(event, router::DELIVERY_TIMEOUT)
            .await
        {
            debug!(peer = %self.peer, error = %e, "could not queue event for own connection");
        }
    }

    /// Terminal transition: remove this session's user from every room
    fn close(&mut self) {
        for (room, id) in self.memberships.drain() {
            self.registry.leave(&room, id);
        }
        debug!(peer = %self.peer, "session closed");
    }
}
