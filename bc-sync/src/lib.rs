mod engine;
mod error;
mod packet;
mod tx_pool;

pub use engine::{SyncConfig, SyncEngine, SyncHost, SyncPeerStatus, SyncState};
pub use error::SyncError;
pub use packet::{decode_envelope, EnvelopeError, PacketBody, PacketType, SyncMessage, SyncMessageFactory};
pub use tx_pool::{ImportError, TxPool};
