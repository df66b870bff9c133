use std::fmt;

/// A decoded protocol message. The concrete packet schema (status,
/// transactions, blocks, request-blocks) belongs to the sync layer; this
/// crate only needs enough of the shape to frame, correlate, and dispatch.
pub trait Message: fmt::Debug + Send + Sync + 'static {
    fn seq(&self) -> u32;

    /// Distinguishes a request (expects a reply) from a response (itself
    /// a reply, correlated by `seq`).
    fn is_request_packet(&self) -> bool;

    fn encode(&self) -> Vec<u8>;
}

/// Injected into a session to turn bytes off the wire into `M`. Mirrors
/// the read loop's three-way outcome: a full message consumed some
/// prefix of `buf`, more bytes are needed, or the prefix is malformed.
pub trait MessageFactory: Send + Sync + 'static {
    type Message: Message;

    fn decode(&self, buf: &[u8]) -> DecodeOutcome<Self::Message>;
}

#[derive(Debug)]
pub enum DecodeOutcome<M> {
    /// `n` bytes formed a complete message; drop them from the
    /// accumulation buffer and dispatch it.
    Consumed(usize, M),
    /// Not enough bytes buffered yet; keep reading.
    Incomplete,
    /// The buffered prefix cannot be a valid frame.
    ProtocolError,
}
