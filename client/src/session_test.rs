use super::*;
use protocol::Status;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use time::macros::datetime;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep, timeout};

// =============================================================================
// MOCKS
// =============================================================================

/// Scripted transport: records every outbound frame, answers requests from
/// a queue of ack payloads, and surfaces events injected by the test.
struct MockTransport {
    outbound: Arc<Mutex<Vec<Frame>>>,
    acks: Arc<Mutex<VecDeque<Value>>>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    closed: Arc<AtomicBool>,
}

struct MockHarness {
    outbound: Arc<Mutex<Vec<Frame>>>,
    acks: Arc<Mutex<VecDeque<Value>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

fn mock_transport() -> (MockTransport, MockHarness) {
    let outbound = Arc::new(Mutex::new(Vec::new()));
    let acks = Arc::new(Mutex::new(VecDeque::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let transport = MockTransport {
        outbound: outbound.clone(),
        acks: acks.clone(),
        events: event_rx,
        closed: closed.clone(),
    };
    let harness = MockHarness { outbound, acks, events: event_tx, closed };
    (transport, harness)
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&mut self, frame: Frame) -> Result<Frame, TransportError> {
        let data = self
            .acks
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| json!({ KEY_OK: true }));
        let ack = frame.ack(data);
        self.outbound.lock().unwrap().push(frame);
        Ok(ack)
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.outbound.lock().unwrap().push(frame);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct Recorder {
    messages: Arc<Mutex<Vec<ChatMessage>>>,
    syncs: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    watermark: Arc<Mutex<Option<OffsetDateTime>>>,
}

impl Recorder {
    fn with_watermark(ts: OffsetDateTime) -> Self {
        let rec = Self::default();
        *rec.watermark.lock().unwrap() = Some(ts);
        rec
    }
}

impl SessionHandler for Recorder {
    fn on_message(&mut self, msg: ChatMessage) {
        self.messages.lock().unwrap().push(msg);
    }

    fn on_sync(&mut self, messages: Vec<ChatMessage>) {
        self.syncs.lock().unwrap().push(messages);
    }

    fn last_timestamp(&self) -> Option<OffsetDateTime> {
        *self.watermark.lock().unwrap()
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn wait_until(mut cond: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !cond() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn raw_message(id: &str, created_at: &str) -> Value {
    json!({
        "id": id,
        "roomId": "room-1",
        "senderId": "user-1",
        "content": "hello",
        "createdAt": created_at
    })
}

fn recorded(harness: &MockHarness) -> Vec<Frame> {
    harness.outbound.lock().unwrap().clone()
}

// =============================================================================
// CONNECT / JOIN
// =============================================================================

#[tokio::test]
async fn connect_emits_join_room_request() {
    let (transport, harness) = mock_transport();
    let session = RoomSession::connect(transport, "room-1", Recorder::default());

    let outbound = harness.outbound.clone();
    wait_until(move || !outbound.lock().unwrap().is_empty()).await;

    let frames = recorded(&harness);
    assert_eq!(frames[0].event, EVENT_JOIN_ROOM);
    assert_eq!(frames[0].status, Status::Request);
    assert_eq!(frames[0].data_str(KEY_ROOM_ID), Some("room-1"));

    session.disconnect().await;
}

#[tokio::test]
async fn denied_join_is_logged_not_retried() {
    let (transport, harness) = mock_transport();
    harness.acks.lock().unwrap().push_back(json!({ KEY_OK: false }));
    let session = RoomSession::connect(transport, "room-1", Recorder::default());

    let outbound = harness.outbound.clone();
    wait_until(move || !outbound.lock().unwrap().is_empty()).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(recorded(&harness).len(), 1, "no re-join outside the reconnect path");
    session.disconnect().await;
}

// =============================================================================
// LIVE PUSHES
// =============================================================================

#[tokio::test]
async fn valid_push_invokes_on_message() {
    let (transport, harness) = mock_transport();
    let rec = Recorder::default();
    let session = RoomSession::connect(transport, "room-1", rec.clone());

    let push = Frame::push(EVENT_MESSAGE_CREATED, raw_message("msg-1", "2024-01-01T10:00:00Z"));
    harness.events.send(TransportEvent::Push(push)).unwrap();

    let messages = rec.messages.clone();
    wait_until(move || !messages.lock().unwrap().is_empty()).await;
    assert_eq!(rec.messages.lock().unwrap()[0].id, "msg-1");

    session.disconnect().await;
}

#[tokio::test]
async fn invalid_push_payloads_never_invoke_on_message() {
    let (transport, harness) = mock_transport();
    let rec = Recorder::default();
    let session = RoomSession::connect(transport, "room-1", rec.clone());

    let events = &harness.events;
    events
        .send(TransportEvent::Push(Frame::push(EVENT_MESSAGE_CREATED, json!({ "invalid": true }))))
        .unwrap();
    events
        .send(TransportEvent::Push(Frame::push(EVENT_MESSAGE_CREATED, Value::Null)))
        .unwrap();
    // Valid body under an unknown event name is ignored too.
    events
        .send(TransportEvent::Push(Frame::push("typing", raw_message("msg-9", "2024-01-01T10:00:00Z"))))
        .unwrap();

    sleep(Duration::from_millis(50)).await;
    assert!(rec.messages.lock().unwrap().is_empty());

    session.disconnect().await;
}

// =============================================================================
// RECONNECT / SYNC
// =============================================================================

#[tokio::test]
async fn reconnect_rejoins_then_syncs_with_exact_watermark() {
    let (transport, harness) = mock_transport();
    {
        let mut acks = harness.acks.lock().unwrap();
        acks.push_back(json!({ KEY_OK: true }));
        acks.push_back(json!({
            KEY_MESSAGES: [
                raw_message("msg-2", "2024-01-01T11:00:00Z"),
                { "invalid": true },
            ]
        }));
    }
    let rec = Recorder::with_watermark(datetime!(2024-01-01 10:00 UTC));
    let session = RoomSession::connect(transport, "room-1", rec.clone());

    let outbound = harness.outbound.clone();
    wait_until(move || !outbound.lock().unwrap().is_empty()).await;
    harness.events.send(TransportEvent::Reconnected).unwrap();

    let syncs = rec.syncs.clone();
    wait_until(move || !syncs.lock().unwrap().is_empty()).await;

    let frames = recorded(&harness);
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[1].event, EVENT_JOIN_ROOM, "re-join precedes sync");
    assert_eq!(frames[2].event, EVENT_SYNC);
    assert_eq!(frames[2].data_str(KEY_ROOM_ID), Some("room-1"));
    assert_eq!(
        frames[2].data_str(KEY_LAST_MESSAGE_TIMESTAMP),
        Some("2024-01-01T10:00:00Z")
    );

    let syncs = rec.syncs.lock().unwrap();
    assert_eq!(syncs.len(), 1);
    assert_eq!(syncs[0].len(), 1, "invalid elements are filtered");
    assert_eq!(syncs[0][0].id, "msg-2");

    session.disconnect().await;
}

#[tokio::test]
async fn reconnect_without_history_skips_sync() {
    let (transport, harness) = mock_transport();
    let session = RoomSession::connect(transport, "room-1", Recorder::default());

    let outbound = harness.outbound.clone();
    wait_until(move || !outbound.lock().unwrap().is_empty()).await;
    harness.events.send(TransportEvent::Reconnected).unwrap();

    let outbound = harness.outbound.clone();
    wait_until(move || outbound.lock().unwrap().len() >= 2).await;
    sleep(Duration::from_millis(50)).await;

    let frames = recorded(&harness);
    assert!(frames.iter().all(|f| f.event != EVENT_SYNC));

    session.disconnect().await;
}

#[tokio::test]
async fn sync_with_no_valid_messages_never_invokes_on_sync() {
    let (transport, harness) = mock_transport();
    {
        let mut acks = harness.acks.lock().unwrap();
        acks.push_back(json!({ KEY_OK: true }));
        acks.push_back(json!({ KEY_MESSAGES: [{ "invalid": true }, null] }));
    }
    let rec = Recorder::with_watermark(datetime!(2024-01-01 10:00 UTC));
    let session = RoomSession::connect(transport, "room-1", rec.clone());

    let outbound = harness.outbound.clone();
    wait_until(move || !outbound.lock().unwrap().is_empty()).await;
    harness.events.send(TransportEvent::Reconnected).unwrap();

    let outbound = harness.outbound.clone();
    wait_until(move || outbound.lock().unwrap().len() >= 3).await;
    sleep(Duration::from_millis(50)).await;

    assert!(rec.syncs.lock().unwrap().is_empty());

    session.disconnect().await;
}

// =============================================================================
// DISCONNECT
// =============================================================================

#[tokio::test]
async fn disconnect_stops_listeners_before_closing_transport() {
    let (transport, harness) = mock_transport();
    let rec = Recorder::default();
    let session = RoomSession::connect(transport, "room-1", rec.clone());

    let outbound = harness.outbound.clone();
    wait_until(move || !outbound.lock().unwrap().is_empty()).await;
    session.disconnect().await;

    assert!(harness.closed.load(Ordering::SeqCst), "transport closed");
    // The event receiver is gone: simulated events cannot reach any callback.
    let push = Frame::push(EVENT_MESSAGE_CREATED, raw_message("late", "2024-01-01T10:00:00Z"));
    assert!(harness.events.send(TransportEvent::Push(push)).is_err());
    assert!(rec.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn transport_closed_event_ends_session() {
    let (transport, harness) = mock_transport();
    let session = RoomSession::connect(transport, "room-1", Recorder::default());

    let outbound = harness.outbound.clone();
    wait_until(move || !outbound.lock().unwrap().is_empty()).await;
    harness.events.send(TransportEvent::Closed).unwrap();

    let closed = harness.closed.clone();
    wait_until(move || closed.load(Ordering::SeqCst)).await;
    session.disconnect().await;
}
