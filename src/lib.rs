//! Multi-room TCP chat relay
//!
//! Clients hold a persistent TCP connection, join named chatrooms, and
//! exchange direct or room-wide messages through a server that keeps no
//! history. Every wire exchange is a metadata record naming an event
//! tag followed by one payload record, both length-prefixed JSON.
//!
//! # Architecture
//! - One session task per connection reads envelopes and dispatches.
//! - The `Registry` is the only shared mutable state: a mutex-guarded
//!   room → member map handing out owned snapshots.
//! - The router fans events out over those snapshots through each
//!   recipient's bounded outbound queue, after the lock is released.
//!
//! # Example
//! ```ignore
//! use relay_chat::{Config, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::bind(&Config::default()).await.unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod codec;
pub mod error;
pub mod message;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use codec::WireEvent;
pub use error::{CodecError, DeliveryError, RelayError, RouteError};
pub use message::{ClientEvent, Metadata, ServerEvent, UserInfo};
pub use registry::{Member, Registry};
pub use server::{Config, Server, ShutdownHandle, DEFAULT_BINDING};
pub use session::run_session;
pub use types::UserId;
