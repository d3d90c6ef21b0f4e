//! Session tests against a local node that speaks the state-history protocol.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use shipstream_abi::{Abi, TypeTable};
use shipstream_core::{BlockRequest, ConnectionOptions, ShipBlockResponse, ShipConsumer, ShipError};
use shipstream_decode::ShipDeserializer;
use shipstream_stream::{SessionState, ShipEvent, StateHistoryConnection};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);
const ABI_JSON: &str = include_str!("fixtures/ship_abi.json");

fn types() -> TypeTable {
    TypeTable::new(&Abi::from_json(ABI_JSON).unwrap()).unwrap()
}

fn id(n: u32) -> String {
    format!("{n:08X}{}", "0".repeat(56))
}

fn position(n: u32) -> Value {
    json!({ "block_num": n, "block_id": id(n) })
}

// ─── Frames ───────────────────────────────────────────────────────────────────

struct Payloads {
    block: bool,
    traces: bool,
    deltas: bool,
}

const FULL: Payloads = Payloads { block: true, traces: true, deltas: true };

fn block_bytes(types: &TypeTable) -> String {
    let bytes = types
        .encode("signed_block", &json!({ "timestamp": "2020-01-01T00:00:00.000", "producer": "bp.one" }))
        .unwrap();
    hex::encode(bytes)
}

fn trace_bytes(types: &TypeTable, n: u32) -> String {
    let trace = json!(["transaction_trace_v0", {
        "id": id(n),
        "status": 0,
        "cpu_usage_us": 100,
        "net_usage_words": 0,
        "action_traces": [["action_trace_v0", {
            "action_ordinal": 1,
            "creator_action_ordinal": 0,
            "receipt": ["action_receipt_v0", { "receiver": "eosio.token", "global_sequence": n.to_string() }],
            "receiver": "eosio.token",
            "act": {
                "account": "eosio.token",
                "name": "transfer",
                "authorization": [{ "actor": "alice", "permission": "active" }],
                "data": "00"
            }
        }]]
    }]);
    hex::encode(types.encode("transaction_trace[]", &json!([trace])).unwrap())
}

fn delta_bytes(types: &TypeTable) -> String {
    let row = types
        .encode(
            "contract_row",
            &json!(["contract_row_v0", {
                "code": "eosio.token", "scope": "alice", "table": "accounts",
                "primary_key": "5459781", "payer": "alice", "value": "0A"
            }]),
        )
        .unwrap();
    let deltas = json!([["table_delta_v0", {
        "name": "contract_row",
        "rows": [{ "present": true, "data": hex::encode(row) }]
    }]]);
    hex::encode(types.encode("table_delta[]", &deltas).unwrap())
}

fn block_frame(types: &TypeTable, n: u32, lib: u32, payloads: Payloads) -> Vec<u8> {
    let result = json!(["get_blocks_result_v0", {
        "head": position(n + 10),
        "last_irreversible": position(lib),
        "this_block": position(n),
        "prev_block": position(n - 1),
        "block": payloads.block.then(|| block_bytes(types)),
        "traces": payloads.traces.then(|| trace_bytes(types, n)),
        "deltas": payloads.deltas.then(|| delta_bytes(types)),
    }]);
    types.encode("result", &result).unwrap()
}

fn empty_window_frame(types: &TypeTable, lib: u32) -> Vec<u8> {
    let result = json!(["get_blocks_result_v0", {
        "head": position(lib),
        "last_irreversible": position(lib),
        "this_block": null,
        "prev_block": null,
        "block": null,
        "traces": null,
        "deltas": null,
    }]);
    types.encode("result", &result).unwrap()
}

fn status_frame(types: &TypeTable) -> Vec<u8> {
    types
        .encode("result", &json!(["get_status_result_v0", { "head": position(1) }]))
        .unwrap()
}

fn truncated_traces_frame(types: &TypeTable, n: u32, lib: u32) -> Vec<u8> {
    let traces = trace_bytes(types, n);
    let result = json!(["get_blocks_result_v0", {
        "head": position(n + 10),
        "last_irreversible": position(lib),
        "this_block": position(n),
        "prev_block": position(n - 1),
        "block": block_bytes(types),
        "traces": &traces[..traces.len() - 4],
        "deltas": delta_bytes(types),
    }]);
    types.encode("result", &result).unwrap()
}

// ─── Mock node ────────────────────────────────────────────────────────────────

/// Accepts one connection, sends the ABI, and replays `frames` once the
/// block request arrives. Every client request is forwarded decoded.
async fn spawn_node(frames: Vec<Vec<u8>>) -> (String, mpsc::UnboundedReceiver<Value>) {
    spawn_node_sessions(vec![frames]).await
}

/// Like [`spawn_node`], but serves one connection per entry of `sessions`,
/// one after the other.
async fn spawn_node_sessions(sessions: Vec<Vec<Vec<u8>>>) -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let types = types();
        for frames in sessions {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();
            write.send(Message::Text(ABI_JSON.to_string())).await.unwrap();

            let mut frames = Some(frames);
            while let Some(Ok(msg)) = read.next().await {
                let Message::Binary(data) = msg else { continue };
                let request = types.decode("request", &data).unwrap();
                let is_block_request = request[0] == json!("get_blocks_request_v0");
                let _ = tx.send(request);
                if is_block_request {
                    for frame in frames.take().unwrap_or_default() {
                        let _ = write.send(Message::Binary(frame)).await;
                    }
                }
            }
        }
    });

    (url, rx)
}

// ─── Consumer ─────────────────────────────────────────────────────────────────

struct RecordingConsumer {
    request: BlockRequest,
    blocks: Mutex<Vec<ShipBlockResponse>>,
    notify: mpsc::UnboundedSender<u32>,
}

impl RecordingConsumer {
    fn new(start: u32, end: u32) -> (Arc<Self>, mpsc::UnboundedReceiver<u32>) {
        let (notify, rx) = mpsc::unbounded_channel();
        let consumer = Self {
            request: BlockRequest {
                start_block_num: start,
                end_block_num: end,
                fetch_block: true,
                fetch_traces: true,
                fetch_deltas: true,
                ..Default::default()
            },
            blocks: Mutex::new(vec![]),
            notify,
        };
        (Arc::new(consumer), rx)
    }

    fn block_nums(&self) -> Vec<u32> {
        self.blocks.lock().unwrap().iter().map(|b| b.this_block.block_num).collect()
    }
}

#[async_trait]
impl ShipConsumer for RecordingConsumer {
    async fn consume(&self, block: ShipBlockResponse) -> Result<(), ShipError> {
        let block_num = block.this_block.block_num;
        self.blocks.lock().unwrap().push(block);
        let _ = self.notify.send(block_num);
        Ok(())
    }

    async fn get_request_block_config(&self) -> Result<BlockRequest, ShipError> {
        Ok(self.request.clone())
    }

    fn get_required_deltas(&self) -> Vec<String> {
        vec!["contract_row".to_string()]
    }
}

/// Holds the newest block back and commits it when the next one arrives,
/// like an ordering buffer with a delay of one. The first commit fails.
struct DelayedConsumer {
    start: u32,
    held: Mutex<Option<u32>>,
    committed: Mutex<Vec<u32>>,
    fail_next_commit: AtomicBool,
    notify: mpsc::UnboundedSender<u32>,
}

impl DelayedConsumer {
    fn new(start: u32) -> (Arc<Self>, mpsc::UnboundedReceiver<u32>) {
        let (notify, rx) = mpsc::unbounded_channel();
        let consumer = Self {
            start,
            held: Mutex::new(None),
            committed: Mutex::new(vec![]),
            fail_next_commit: AtomicBool::new(true),
            notify,
        };
        (Arc::new(consumer), rx)
    }
}

#[async_trait]
impl ShipConsumer for DelayedConsumer {
    async fn consume(&self, block: ShipBlockResponse) -> Result<(), ShipError> {
        let incoming = block.this_block.block_num;
        // a re-sent block replaces the held one
        let ready = self.held.lock().unwrap().replace(incoming).filter(|held| *held < incoming);
        if let Some(block_num) = ready {
            if self.fail_next_commit.swap(false, Ordering::SeqCst) {
                return Err(ShipError::Storage(format!("commit of block {block_num} failed")));
            }
            self.committed.lock().unwrap().push(block_num);
            let _ = self.notify.send(block_num);
        }
        Ok(())
    }

    async fn get_request_block_config(&self) -> Result<BlockRequest, ShipError> {
        let last = self.committed.lock().unwrap().last().copied();
        Ok(BlockRequest {
            start_block_num: last.map_or(self.start, |n| n + 1),
            fetch_block: true,
            fetch_traces: true,
            fetch_deltas: true,
            ..Default::default()
        })
    }

    fn get_required_deltas(&self) -> Vec<String> {
        vec!["contract_row".to_string()]
    }
}

fn connection(url: &str, options: ConnectionOptions) -> StateHistoryConnection {
    StateHistoryConnection::new(url, options, Arc::new(ShipDeserializer::default()))
}

fn options() -> ConnectionOptions {
    ConnectionOptions {
        reconnect_delay_ms: 60_000,
        ..Default::default()
    }
}

async fn next_event(events: &mut broadcast::Receiver<ShipEvent>, wanted: impl Fn(&ShipEvent) -> bool) -> ShipEvent {
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn next_request(requests: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    timeout(WAIT, requests.recv()).await.unwrap().unwrap()
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn streams_blocks_in_order_and_acknowledges() {
    let types = types();
    let frames = (5..=7).map(|n| block_frame(&types, n, 3, FULL)).collect();
    let (url, mut requests) = spawn_node(frames).await;

    let conn = connection(&url, ConnectionOptions { min_block_confirmation: 2, ..options() });
    let (consumer, mut committed) = RecordingConsumer::new(5, u32::MAX);
    conn.start_processing(consumer.clone()).await.unwrap();

    let request = next_request(&mut requests).await;
    assert_eq!(request[0], json!("get_blocks_request_v0"));
    assert_eq!(request[1]["start_block_num"], json!(5));
    assert_eq!(request[1]["fetch_traces"], json!(true));

    for expected in 5..=7 {
        let n = timeout(WAIT, committed.recv()).await.unwrap().unwrap();
        assert_eq!(n, expected);
    }
    assert_eq!(consumer.block_nums(), vec![5, 6, 7]);
    assert_eq!(conn.state(), SessionState::Streaming);

    {
        let blocks = consumer.blocks.lock().unwrap();
        let first = &blocks[0];
        assert_eq!(first.block.producer(), Some("bp.one"));
        assert_eq!(first.block.block_id, id(5));
        assert_eq!(first.last_irreversible.block_num, 3);
        assert_eq!(first.traces.len(), 1);
        assert_eq!(first.traces[0][1]["action_traces"][0][1]["act"]["name"], json!("transfer"));
        let row = first.deltas[0].rows[0].data.decoded().unwrap();
        assert_eq!(row[1]["table"], json!("accounts"));
    }

    // two blocks make one acknowledgement; the third is still unconfirmed
    let ack = next_request(&mut requests).await;
    assert_eq!(ack, json!(["get_blocks_ack_request_v0", { "num_messages": 2 }]));
    assert!(timeout(Duration::from_millis(100), requests.recv()).await.is_err());

    conn.stop_processing().await;
    assert_eq!(conn.state(), SessionState::Disconnected);
    assert!(conn.is_stopped());
}

#[tokio::test]
async fn missing_traces_abort_the_block() {
    let types = types();
    let frames = vec![
        block_frame(&types, 5, 3, Payloads { traces: false, ..FULL }),
        block_frame(&types, 6, 3, FULL),
    ];
    let (url, _requests) = spawn_node(frames).await;

    let conn = connection(&url, options());
    let mut events = conn.subscribe();
    let (consumer, _) = RecordingConsumer::new(5, u32::MAX);
    conn.start_processing(consumer.clone()).await.unwrap();

    let event = next_event(&mut events, |e| {
        matches!(e, ShipEvent::Error(err) if matches!(err.as_ref(), ShipError::ProtocolViolation(_)))
    })
    .await;
    assert_eq!(event.to_string(), "error: protocol violation: Block #5 does not contain trace data");

    // the connection is dropped and nothing is committed
    next_event(&mut events, |e| e.to_string().contains("Ship Websocket disconnected")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(consumer.block_nums().is_empty());
    assert_eq!(conn.queue_size(), 0);

    // stopping interrupts the reconnect delay
    timeout(WAIT, conn.stop_processing()).await.unwrap();
    assert_eq!(conn.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn tolerated_gaps_unsupported_results_and_end_of_range() {
    let types = types();
    let frames = vec![
        status_frame(&types),
        block_frame(&types, 5, 3, Payloads { traces: false, ..FULL }),
        empty_window_frame(&types, 3),
    ];
    let (url, mut requests) = spawn_node(frames).await;

    let conn = connection(&url, ConnectionOptions { allow_empty_traces: true, ..options() });
    let mut events = conn.subscribe();
    let (consumer, mut committed) = RecordingConsumer::new(5, 7);
    conn.start_processing(consumer.clone()).await.unwrap();

    next_event(&mut events, |e| {
        matches!(e, ShipEvent::Warning(m) if m == "Not supported message received get_status_result_v0")
    })
    .await;
    next_event(&mut events, |e| {
        matches!(e, ShipEvent::Warning(m) if m == "Block #5 does not contain trace data")
    })
    .await;

    assert_eq!(timeout(WAIT, committed.recv()).await.unwrap(), Some(5));
    assert!(consumer.blocks.lock().unwrap()[0].traces.is_empty());

    next_event(&mut events, |e| {
        matches!(e, ShipEvent::Warning(m) if m == "Empty block #7 received. Reader finished reading.")
    })
    .await;

    // request, then one acknowledgement per completed block (heartbeat included)
    assert_eq!(next_request(&mut requests).await[0], json!("get_blocks_request_v0"));
    for _ in 0..2 {
        assert_eq!(
            next_request(&mut requests).await,
            json!(["get_blocks_ack_request_v0", { "num_messages": 1 }])
        );
    }

    conn.stop_processing().await;
}

#[tokio::test]
async fn undecodable_traces_stop_the_queue() {
    let types = types();
    let frames = vec![truncated_traces_frame(&types, 5, 3), block_frame(&types, 6, 3, FULL)];
    let (url, _requests) = spawn_node(frames).await;

    let conn = connection(&url, options());
    let mut events = conn.subscribe();
    let (consumer, _) = RecordingConsumer::new(5, u32::MAX);
    conn.start_processing(consumer.clone()).await.unwrap();

    let event = next_event(&mut events, |e| matches!(e, ShipEvent::Error(_))).await;
    let ShipEvent::Error(err) = event else { unreachable!() };
    match err.as_ref() {
        ShipError::Block { block_num, message, .. } => {
            assert_eq!(*block_num, 5);
            assert_eq!(message, "Failed to deserialize traces");
        }
        other => panic!("unexpected error: {other}"),
    }

    // block 6 arrived fine but never runs
    next_event(&mut events, |e| e.to_string().contains("Ship Websocket disconnected")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(consumer.block_nums().is_empty());
    assert_eq!(conn.queue_size(), 0);

    conn.stop_processing().await;
}

#[tokio::test]
async fn reconnect_resumes_after_the_last_committed_block() {
    let types = types();
    let first = vec![block_frame(&types, 5, 3, FULL), block_frame(&types, 6, 3, FULL)];
    let second = (5..=7).map(|n| block_frame(&types, n, 3, FULL)).collect();
    let (url, mut requests) = spawn_node_sessions(vec![first, second]).await;

    let conn = connection(&url, ConnectionOptions { reconnect_delay_ms: 50, ..options() });
    let mut events = conn.subscribe();
    let (consumer, mut committed) = DelayedConsumer::new(5);
    conn.start_processing(consumer.clone()).await.unwrap();

    // block 5 was handed over on the first connection but its commit failed
    next_event(&mut events, |e| e.to_string().contains("commit of block 5 failed")).await;

    let mut starts = vec![];
    while starts.len() < 2 {
        let request = next_request(&mut requests).await;
        if request[0] == json!("get_blocks_request_v0") {
            starts.push(request[1]["start_block_num"].clone());
        }
    }
    assert_eq!(starts, vec![json!(5), json!(5)]);

    for expected in 5..=6 {
        assert_eq!(timeout(WAIT, committed.recv()).await.unwrap(), Some(expected));
    }
    assert_eq!(*consumer.committed.lock().unwrap(), vec![5, 6]);

    conn.stop_processing().await;
}
