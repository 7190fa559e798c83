//! Chat client core.
//!
//! ARCHITECTURE
//! ============
//! Three layers, loosest at the bottom:
//! - [`ws`] — tokio-tungstenite connection task with automatic reconnect
//!   and ack correlation. Owns the backoff; nothing above it retries.
//! - [`session`] — the per-room protocol state machine: join on connect,
//!   validate incoming pushes, re-join + one-shot sync on reconnect.
//! - [`history`] — the ordered, de-duplicated message list the session's
//!   consumer feeds from pushes and sync batches.

pub mod history;
pub mod session;
pub mod ws;

pub use history::MessageList;
pub use session::{RoomSession, SessionHandler, Transport, TransportError, TransportEvent};
pub use ws::WsTransport;
