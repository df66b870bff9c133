use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bc_network::{DecodeOutcome, DisconnectReason, Host, Message, MessageFactory, SendOptions, Session, SessionError, SessionState};

/// `[seq: u32 BE][is_request: u8][len: u32 BE][payload]`.
#[derive(Debug, Clone)]
struct TestMessage {
    seq: u32,
    is_request: bool,
    payload: Vec<u8>,
}

impl Message for TestMessage {
    fn seq(&self) -> u32 {
        self.seq
    }

    fn is_request_packet(&self) -> bool {
        self.is_request
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.push(self.is_request as u8);
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

#[derive(Clone)]
struct TestFactory;

impl MessageFactory for TestFactory {
    type Message = TestMessage;

    fn decode(&self, buf: &[u8]) -> DecodeOutcome<TestMessage> {
        if buf.len() < 9 {
            return DecodeOutcome::Incomplete;
        }
        let seq = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let is_request = match buf[4] {
            0 => false,
            1 => true,
            _ => return DecodeOutcome::ProtocolError,
        };
        let len = u32::from_be_bytes(buf[5..9].try_into().unwrap()) as usize;
        if buf.len() < 9 + len {
            return DecodeOutcome::Incomplete;
        }
        let payload = buf[9..9 + len].to_vec();
        DecodeOutcome::Consumed(9 + len, TestMessage { seq, is_request, payload })
    }
}

#[derive(Default)]
struct RecordingHost {
    received: Mutex<Vec<TestMessage>>,
    disconnects: Mutex<Vec<DisconnectReason>>,
}

impl Host<TestMessage> for RecordingHost {
    fn on_message(&self, message: TestMessage) {
        self.received.lock().unwrap().push(message);
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        self.disconnects.lock().unwrap().push(reason);
    }
}

fn duplex_pair() -> (tokio::io::DuplexStream, tokio::io::DuplexStream) {
    tokio::io::duplex(4096)
}

#[tokio::test]
async fn request_is_delivered_to_installed_handler() {
    let (a, b) = duplex_pair();
    let session_a = Session::spawn(a, TestFactory);
    let session_b = Session::spawn(b, TestFactory);

    let host_a = Arc::new(RecordingHost::default());
    let host_b = Arc::new(RecordingHost::default());
    session_a.start(host_a.clone());
    session_b.start(host_b.clone());

    let (tx, rx) = tokio::sync::oneshot::channel();
    session_a.async_send_message(
        TestMessage { seq: 1, is_request: true, payload: b"hello".to_vec() },
        SendOptions::no_timeout(),
        move |result| {
            let _ = tx.send(result);
        },
    );

    // The peer's handler should see the request; since nothing replies,
    // the sender's callback never fires for a request (only responses
    // are correlated).
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(host_b.received.lock().unwrap().len(), 1);
    assert_eq!(host_b.received.lock().unwrap()[0].payload, b"hello");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn response_correlates_by_sequence_number() {
    let (a, b) = duplex_pair();
    let session_a = Session::spawn(a, TestFactory);
    let session_b = Session::spawn(b, TestFactory);

    let host_a = Arc::new(RecordingHost::default());
    struct EchoHost(Session<TestMessage>);
    impl Host<TestMessage> for EchoHost {
        fn on_message(&self, message: TestMessage) {
            self.0.async_send_message(
                TestMessage { seq: message.seq, is_request: false, payload: message.payload },
                SendOptions::no_timeout(),
                |_| {},
            );
        }
    }
    session_a.start(host_a);
    session_b.start(Arc::new(EchoHost(session_b.clone())));

    let (tx, rx) = tokio::sync::oneshot::channel();
    session_a.async_send_message(
        TestMessage { seq: 7, is_request: true, payload: b"ping".to_vec() },
        SendOptions::no_timeout(),
        move |result| {
            let _ = tx.send(result);
        },
    );

    let result = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
    let message = result.unwrap();
    assert_eq!(message.payload, b"ping");
}

#[tokio::test]
async fn timeout_fires_when_no_response_arrives() {
    let (a, _b) = duplex_pair();
    let session_a = Session::spawn(a, TestFactory);
    session_a.start(Arc::new(RecordingHost::default()));

    let (tx, rx) = tokio::sync::oneshot::channel();
    session_a.async_send_message(
        TestMessage { seq: 1, is_request: true, payload: vec![] },
        SendOptions::with_timeout(Duration::from_millis(20)),
        move |result| {
            let _ = tx.send(result);
        },
    );

    let result = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
    assert_eq!(result.unwrap_err(), SessionError::NetworkTimeout);
}

#[tokio::test]
async fn send_on_idle_session_fails_inactive() {
    let (a, _b) = duplex_pair();
    let session_a = Session::spawn(a, TestFactory);
    // Never started: still Idle.
    assert_eq!(session_a.state(), SessionState::Idle);

    let (tx, rx) = tokio::sync::oneshot::channel();
    session_a.async_send_message(
        TestMessage { seq: 1, is_request: true, payload: vec![] },
        SendOptions::no_timeout(),
        move |result| {
            let _ = tx.send(result);
        },
    );
    let result = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
    assert_eq!(result.unwrap_err(), SessionError::Inactive);
}

#[tokio::test]
async fn drop_fires_every_pending_callback_exactly_once() {
    let (a, _b) = duplex_pair();
    let session_a = Session::spawn(a, TestFactory);
    session_a.start(Arc::new(RecordingHost::default()));

    let fire_count = Arc::new(AtomicUsize::new(0));
    for seq in 0..5u32 {
        let fire_count = fire_count.clone();
        session_a.async_send_message(
            TestMessage { seq, is_request: true, payload: vec![] },
            SendOptions::no_timeout(),
            move |_| {
                fire_count.fetch_add(1, Ordering::SeqCst);
            },
        );
    }

    session_a.drop_session(DisconnectReason::ClientQuit);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fire_count.load(Ordering::SeqCst), 5);
    assert_eq!(session_a.state(), SessionState::Closed);
}
