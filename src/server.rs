//! Server bootstrap and accept loop
//!
//! Binds the listening socket, accepts connections, and spawns one
//! session task per connection. A watch channel carries the shutdown
//! signal to every live session; dropping the listener on the way out
//! closes the listening socket.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::RelayError;
use crate::registry::Registry;
use crate::session::run_session;

/// Default bind address
pub const DEFAULT_BINDING: &str = "127.0.0.1:7474";

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port` to listen on
    pub binding: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binding: DEFAULT_BINDING.to_string(),
        }
    }
}

/// The chat relay server: listener, shared registry, shutdown signal
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    shutdown: watch::Sender<bool>,
}

/// Handle for stopping a running server from another task
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    shutdown: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Signal the accept loop and every live session to terminate
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Server {
    /// Bind the listening socket
    pub async fn bind(config: &Config) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(&config.binding).await?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
            shutdown,
        })
    }

    /// Address the server is actually bound to (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared registry handle
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Handle for shutting the server down later
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Accept connections until shutdown
    ///
    /// A failed accept is logged and the loop continues; one bad accept
    /// does not bring the server down. Consumes the server so the
    /// listening socket closes when the loop returns.
    pub async fn run(self) -> Result<(), RelayError> {
        info!(addr = %self.local_addr()?, "server listening");
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("server shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "accepted connection");
                        let registry = Arc::clone(&self.registry);
                        let shutdown = self.shutdown.subscribe();
                        tokio::spawn(async move {
                            if let Err(e) = run_session(stream, registry, shutdown).await {
                                warn!(%addr, error = %e, "session ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::message::{
        Broadcast, ClientEvent, DirectMessage, Join, JoinResponse, Leave, ServerEvent,
    };
    use crate::types::UserId;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout};

    const READ_TIMEOUT: Duration = Duration::from_secs(2);
    const QUIET_TIMEOUT: Duration = Duration::from_millis(200);

    async fn start_server() -> (
        SocketAddr,
        Arc<Registry>,
        ShutdownHandle,
        JoinHandle<Result<(), RelayError>>,
    ) {
        let server = Server::bind(&Config {
            binding: "127.0.0.1:0".to_string(),
        })
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let handle = server.shutdown_handle();
        let task = tokio::spawn(server.run());
        (addr, registry, handle, task)
    }

    struct TestClient {
        stream: TcpStream,
    }

    impl TestClient {
        async fn connect(addr: SocketAddr) -> Self {
            Self {
                stream: TcpStream::connect(addr).await.unwrap(),
            }
        }

        async fn send(&mut self, event: &ClientEvent) {
            codec::write_event(&mut self.stream, event).await.unwrap();
        }

        async fn read(&mut self) -> ServerEvent {
            timeout(READ_TIMEOUT, codec::read_event(&mut self.stream))
                .await
                .expect("timed out waiting for server event")
                .unwrap()
        }

        /// Assert that no event arrives within a short quiet period
        async fn expect_silence(&mut self) {
            let result = timeout(QUIET_TIMEOUT, codec::read_event::<ServerEvent, _>(&mut self.stream)).await;
            assert!(result.is_err(), "unexpected event: {:?}", result);
        }

        async fn join(&mut self, nickname: &str, chatroom: &str) -> JoinResponse {
            self.send(&ClientEvent::Join(Join {
                nickname: nickname.to_string(),
                chatroom: chatroom.to_string(),
            }))
            .await;
            match self.read().await {
                ServerEvent::JoinResponse(response) => response,
                other => panic!("wrong event: {other:?}"),
            }
        }

        async fn expect_new_user(&mut self, nickname: &str) {
            match self.read().await {
                ServerEvent::NewUserJoined(event) => assert_eq!(event.nickname, nickname),
                other => panic!("wrong event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (addr, _registry, handle, task) = start_server().await;

        // Server accepts while running.
        let _client = TestClient::connect(addr).await;

        handle.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_joining_users_see_prior_members() {
        let (addr, _registry, handle, _task) = start_server().await;

        let mut john = TestClient::connect(addr).await;
        let mut sara = TestClient::connect(addr).await;
        let mut bill = TestClient::connect(addr).await;

        let john_response = john.join("John", "room1").await;
        assert!(john_response.members.is_empty());

        let sara_response = sara.join("Sara", "room1").await;
        let names: Vec<_> = sara_response
            .members
            .iter()
            .map(|m| m.nickname.as_str())
            .collect();
        assert_eq!(names, ["John"]);

        let bill_response = bill.join("Bill", "room1").await;
        let mut names: Vec<_> = bill_response
            .members
            .iter()
            .map(|m| m.nickname.as_str())
            .collect();
        names.sort_unstable();
        assert_eq!(names, ["John", "Sara"]);

        // Each prior member hears about each later join exactly once.
        john.expect_new_user("Sara").await;
        john.expect_new_user("Bill").await;
        john.expect_silence().await;
        sara.expect_new_user("Bill").await;
        sara.expect_silence().await;
        bill.expect_silence().await;

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_direct_message_reaches_only_recipient() {
        let (addr, _registry, handle, _task) = start_server().await;

        let mut alice = TestClient::connect(addr).await;
        let mut bob = TestClient::connect(addr).await;
        let mut carol = TestClient::connect(addr).await;

        let alice_id = alice.join("Alice", "room1").await.your_id;
        let bob_id = bob.join("Bob", "room1").await.your_id;
        carol.join("Carol", "room1").await;
        alice.expect_new_user("Bob").await;
        alice.expect_new_user("Carol").await;
        bob.expect_new_user("Carol").await;

        alice
            .send(&ClientEvent::DirectMessage(DirectMessage {
                from_id: alice_id,
                to_id: bob_id,
                chatroom: "room1".to_string(),
                text: "psst".to_string(),
            }))
            .await;

        match bob.read().await {
            ServerEvent::NewDirectMessage(msg) => {
                assert_eq!(msg.from_id, alice_id);
                assert_eq!(msg.text, "psst");
            }
            other => panic!("wrong event: {other:?}"),
        }
        alice.expect_silence().await;
        carol.expect_silence().await;

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_direct_message_to_unknown_recipient_fails_back() {
        let (addr, _registry, handle, _task) = start_server().await;

        let mut alice = TestClient::connect(addr).await;
        let alice_id = alice.join("Alice", "room1").await.your_id;

        let stranger = UserId::new();
        alice
            .send(&ClientEvent::DirectMessage(DirectMessage {
                from_id: alice_id,
                to_id: stranger,
                chatroom: "room1".to_string(),
                text: "hello?".to_string(),
            }))
            .await;

        match alice.read().await {
            ServerEvent::DeliveryFailed(failure) => assert_eq!(failure.to_id, stranger),
            other => panic!("wrong event: {other:?}"),
        }

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let (addr, _registry, handle, _task) = start_server().await;

        let mut alice = TestClient::connect(addr).await;
        let mut bob = TestClient::connect(addr).await;

        let alice_id = alice.join("Alice", "room1").await.your_id;
        bob.join("Bob", "room1").await;
        alice.expect_new_user("Bob").await;

        alice
            .send(&ClientEvent::Broadcast(Broadcast {
                chatroom: "room1".to_string(),
                from_id: alice_id,
                text: "hi".to_string(),
            }))
            .await;

        match bob.read().await {
            ServerEvent::NewBroadcastMessage(msg) => {
                assert_eq!(msg.from_id, alice_id);
                assert_eq!(msg.text, "hi");
            }
            other => panic!("wrong event: {other:?}"),
        }
        bob.expect_silence().await;
        alice.expect_silence().await;

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_leave_stops_further_deliveries() {
        let (addr, registry, handle, _task) = start_server().await;

        let mut alice = TestClient::connect(addr).await;
        let mut bob = TestClient::connect(addr).await;

        let alice_id = alice.join("Alice", "room1").await.your_id;
        bob.join("Bob", "room1").await;
        alice.expect_new_user("Bob").await;

        bob.send(&ClientEvent::Leave(Leave {
            chatroom: "room1".to_string(),
        }))
        .await;

        // Wait for the leave to land, then broadcast.
        for _ in 0..50 {
            if registry.members("room1").len() == 1 {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(registry.members("room1").len(), 1);

        alice
            .send(&ClientEvent::Broadcast(Broadcast {
                chatroom: "room1".to_string(),
                from_id: alice_id,
                text: "still here?".to_string(),
            }))
            .await;
        bob.expect_silence().await;

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up_membership() {
        let (addr, registry, handle, _task) = start_server().await;

        let mut alice = TestClient::connect(addr).await;
        let bob = {
            let mut bob = TestClient::connect(addr).await;
            alice.join("Alice", "room1").await;
            bob.join("Bob", "room1").await;
            bob
        };
        assert_eq!(registry.members("room1").len(), 2);

        drop(bob);

        let mut remaining = registry.members("room1");
        for _ in 0..50 {
            if remaining.len() == 1 {
                break;
            }
            sleep(Duration::from_millis(20)).await;
            remaining = registry.members("room1");
        }
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].nickname, "Alice");

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_tag_gets_protocol_error_and_session_survives() {
        let (addr, _registry, handle, _task) = start_server().await;

        let mut client = TestClient::connect(addr).await;

        // Hand-rolled exchange with a tag the server does not know.
        for record in [br#"{"event_type": "poke"}"#.as_slice(), b"{}"] {
            let len = record.len() as u32;
            client.stream.write_all(&len.to_be_bytes()).await.unwrap();
            client.stream.write_all(record).await.unwrap();
        }

        match client.read().await {
            ServerEvent::ProtocolError(_) => {}
            other => panic!("wrong event: {other:?}"),
        }

        // The session keeps serving after the protocol error.
        let response = client.join("Alice", "room1").await;
        assert!(response.members.is_empty());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_terminates_sessions() {
        let (addr, registry, handle, task) = start_server().await;

        let mut alice = TestClient::connect(addr).await;
        alice.join("Alice", "room1").await;
        assert_eq!(registry.room_count(), 1);

        handle.shutdown();
        task.await.unwrap().unwrap();

        // Session cleanup removed the membership on the way out.
        for _ in 0..50 {
            if registry.room_count() == 0 {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(registry.room_count(), 0);

        // The listening socket is gone; the peer sees EOF.
        let eof = timeout(
            READ_TIMEOUT,
            codec::read_event::<ServerEvent, _>(&mut alice.stream),
        )
        .await
        .unwrap();
        assert!(matches!(eof, Err(crate::error::CodecError::Eof)));
    }
}
