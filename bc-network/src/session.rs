use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SessionError;
use crate::message::{DecodeOutcome, Message, MessageFactory};
use crate::types::{DisconnectReason, SendOptions, SessionState};

/// Scratch-buffer size for one read syscall; accumulated bytes live in a
/// growable buffer until the factory can decode a full frame out of them.
const BUFFER_LENGTH: usize = 64 * 1024;

/// Owns the lifecycle of messages delivered by a session that are not
/// responses to an outstanding request.
pub trait Host<M: Message>: Send + Sync + 'static {
    fn on_message(&self, message: M);

    /// Invoked once, when the session finishes tearing down.
    fn on_disconnect(&self, reason: DisconnectReason) {
        let _ = reason;
    }
}

type ResponseCallback<M> = Box<dyn FnOnce(Result<M, SessionError>) + Send>;

struct Pending<M> {
    callback: ResponseCallback<M>,
    timer: Option<JoinHandle<()>>,
}

struct Inner<M: Message> {
    state: Mutex<SessionState>,
    pending: Mutex<HashMap<u32, Pending<M>>>,
    host: Mutex<Option<Arc<dyn Host<M>>>>,
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    started: AtomicBool,
}

/// One peer connection: length-prefixed frame codec, request/response
/// correlation by sequence number, and an installed handler for
/// everything else. Cheap to clone; clones share the same connection.
pub struct Session<M: Message> {
    inner: Arc<Inner<M>>,
}

impl<M: Message> Clone for Session<M> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<M: Message> Session<M> {
    /// Splits `stream` into read/write halves, spawns the writer task, and
    /// returns a handle in the `Idle` state. Call `start` to begin reading.
    pub fn spawn<S, F>(stream: S, factory: F) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
        F: MessageFactory<Message = M>,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (write_tx, write_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let inner = Arc::new(Inner {
            state: Mutex::new(SessionState::Idle),
            pending: Mutex::new(HashMap::new()),
            host: Mutex::new(None),
            write_tx,
            started: AtomicBool::new(false),
        });

        // A single writer task draining a FIFO channel gives us "at most
        // one in-flight write, queued by arrival order" without a manual
        // flag: the task's own sequential awaits are the serialization.
        tokio::spawn(Self::write_loop(write_half, write_rx));

        let session = Self { inner };
        let reader_session = session.clone();
        tokio::spawn(async move {
            reader_session.read_loop(read_half, factory).await;
        });

        session
    }

    async fn write_loop<W: tokio::io::AsyncWrite + Unpin>(
        mut write_half: W,
        mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(frame) = rx.recv().await {
            // `frame` is already `message.encode()`'s output, which is
            // expected to carry its own self-delimiting framing (the
            // paired `MessageFactory::decode` is what interprets it).
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    }

    async fn read_loop<R, F>(self, mut read_half: R, factory: F)
    where
        R: tokio::io::AsyncRead + Unpin,
        F: MessageFactory<Message = M>,
    {
        let mut buf = Vec::new();
        let mut scratch = vec![0u8; BUFFER_LENGTH];
        loop {
            match factory.decode(&buf) {
                DecodeOutcome::Consumed(n, message) => {
                    buf.drain(..n);
                    self.dispatch(message);
                    continue;
                }
                DecodeOutcome::ProtocolError => {
                    self.drop_session(DisconnectReason::BadProtocol);
                    return;
                }
                DecodeOutcome::Incomplete => {}
            }

            match read_half.read(&mut scratch).await {
                Ok(0) => {
                    self.drop_session(DisconnectReason::TCPError);
                    return;
                }
                Ok(n) => buf.extend_from_slice(&scratch[..n]),
                Err(_) => {
                    self.drop_session(DisconnectReason::TCPError);
                    return;
                }
            }
        }
    }

    fn dispatch(&self, message: M) {
        let seq = message.seq();
        let is_response = !message.is_request_packet();
        let callback = if is_response {
            self.inner.pending.lock().remove(&seq)
        } else {
            None
        };

        if let Some(pending) = callback {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
            tokio::task::spawn_blocking(move || (pending.callback)(Ok(message)));
            return;
        }

        let host = self.inner.host.lock().clone();
        if let Some(host) = host {
            tokio::task::spawn_blocking(move || host.on_message(message));
        }
    }

    /// Marks the session `Active` and installs `host`. Idempotent: a
    /// second call while already active is a no-op.
    pub fn start(&self, host: Arc<dyn Host<M>>) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.inner.host.lock() = Some(host);
        *self.inner.state.lock() = SessionState::Active;
        tracing::info!(target: "network", "session started");
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    /// Encodes and enqueues `message`. If a response carrying the same
    /// sequence number has not arrived within `options.timeout` (when
    /// nonzero), the callback fires with `NetworkTimeout` instead.
    pub fn async_send_message(
        &self,
        message: M,
        options: SendOptions,
        callback: impl FnOnce(Result<M, SessionError>) + Send + 'static,
    ) {
        if *self.inner.state.lock() != SessionState::Active {
            tokio::task::spawn_blocking(move || callback(Err(SessionError::Inactive)));
            return;
        }

        let seq = message.seq();
        let timer = if options.timeout > Duration::ZERO {
            let inner = self.inner.clone();
            Some(tokio::spawn(async move {
                tokio::time::sleep(options.timeout).await;
                if let Some(pending) = inner.pending.lock().remove(&seq) {
                    tokio::task::spawn_blocking(move || {
                        (pending.callback)(Err(SessionError::NetworkTimeout))
                    });
                }
            }))
        } else {
            None
        };

        self.inner
            .pending
            .lock()
            .insert(seq, Pending { callback: Box::new(callback), timer });

        let frame = message.encode();
        if self.inner.write_tx.send(frame).is_err() {
            self.drop_session(DisconnectReason::TCPError);
        }
    }

    /// Tears the session down: cancels every pending timer, fires every
    /// pending callback with an error derived from `reason`, notifies the
    /// host, and marks the session `Closed`.
    pub fn drop_session(&self, reason: DisconnectReason) {
        {
            let mut state = self.inner.state.lock();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closing;
        }

        let error = if reason == DisconnectReason::DuplicatePeer {
            SessionError::DuplicateSession
        } else {
            SessionError::Disconnect(reason)
        };

        let pending: Vec<Pending<M>> = {
            let mut guard = self.inner.pending.lock();
            guard.drain().map(|(_, p)| p).collect()
        };
        for pending in pending {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
            tokio::task::spawn_blocking(move || (pending.callback)(Err(error)));
        }

        let host = self.inner.host.lock().take();
        if let Some(host) = host {
            host.on_disconnect(reason);
        }

        *self.inner.state.lock() = SessionState::Closed;
        tracing::info!(target: "network", ?reason, "session dropped");
    }
}
