//! One peer connection per `Session`: length-prefixed frame I/O on its own
//! task, request/response correlation by sequence number, and graceful
//! shutdown that fires every pending callback exactly once.

mod error;
mod message;
mod session;
mod types;

pub use error::SessionError;
pub use message::{DecodeOutcome, Message, MessageFactory};
pub use session::{Host, Session};
pub use types::{DisconnectReason, PeerId, SendOptions, SessionState};
