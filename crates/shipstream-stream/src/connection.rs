//! `StateHistoryConnection`: owns the WebSocket to a state-history node.
//!
//! # Lifecycle
//! ```text
//! Disconnected ─▶ Connecting ─▶ AwaitingSchema ─▶ Streaming
//!      ▲                                              │
//!      └──────────── close / error (reconnect) ◀──────┘
//! ```
//!
//! The first frame on every connection is the protocol ABI. Each later frame
//! starts up to three decodes (block, traces, deltas) right away; the block
//! itself is completed on a single-worker [`BlockQueue`], so the consumer sees
//! blocks strictly in arrival order.
//!
//! # Usage
//! ```no_run
//! use shipstream_core::ConnectionOptions;
//! use shipstream_decode::ShipDeserializer;
//! use shipstream_stream::StateHistoryConnection;
//! use std::sync::Arc;
//!
//! let connection = StateHistoryConnection::new(
//!     "ws://127.0.0.1:8080",
//!     ConnectionOptions::default(),
//!     Arc::new(ShipDeserializer::default()),
//! );
//! let mut events = connection.subscribe();
//! ```

use futures::{FutureExt, SinkExt, StreamExt};
use serde_json::Value;
use shipstream_abi::{Abi, TypeTable};
use shipstream_core::{
    BlockPosition, BlockRequest, ConnectionOptions, ShipBlockResponse, ShipConsumer, ShipError, ShipTableDelta,
};
use shipstream_decode::{Deserializer, ShipDeserializer};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::event::{EventBus, SessionState, ShipEvent};
use crate::protocol::{self, BlocksResult, ResultVersion, SIGNED_BLOCK_TYPE, TRACES_TYPE};
use crate::queue::BlockQueue;

const EVENT_CAPACITY: usize = 1024;

/// Streams blocks from a state-history endpoint into a [`ShipConsumer`].
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct StateHistoryConnection {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: String,
    options: ConnectionOptions,
    deserializer: Arc<ShipDeserializer>,
    events: EventBus,
    state: watch::Sender<SessionState>,
    /// Once set, no new connection is attempted until the next start.
    stopped: watch::Sender<bool>,
    session: tokio::sync::Mutex<Session>,
    /// Protocol types of the current connection; `None` until the ABI frame.
    types: RwLock<Option<Arc<TypeTable>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    queue: BlockQueue,
}

#[derive(Default)]
struct Session {
    consumer: Option<Arc<dyn ShipConsumer>>,
    request: BlockRequest,
    required_deltas: Vec<String>,
    /// Blocks completed since the last acknowledgement.
    unconfirmed: u32,
}

type Decoding<T> = Option<JoinHandle<Result<T, ShipError>>>;

/// One received block whose payloads are still decoding.
struct PendingBlock {
    this_block: Option<BlockPosition>,
    prev_block: Option<BlockPosition>,
    last_irreversible: BlockPosition,
    head: BlockPosition,
    block: Decoding<Value>,
    traces: Decoding<Vec<Value>>,
    deltas: Decoding<Vec<ShipTableDelta>>,
}

impl StateHistoryConnection {
    pub fn new(endpoint: impl Into<String>, options: ConnectionOptions, deserializer: Arc<ShipDeserializer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.into(),
                options,
                deserializer,
                events: EventBus::new(EVENT_CAPACITY),
                state: watch::Sender::new(SessionState::Disconnected),
                stopped: watch::Sender::new(true),
                session: tokio::sync::Mutex::new(Session::default()),
                types: RwLock::new(None),
                outbound: Mutex::new(None),
                supervisor: Mutex::new(None),
                queue: BlockQueue::new(),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Session notifications (info, debug, warnings, errors).
    pub fn subscribe(&self) -> broadcast::Receiver<ShipEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Blocks received but not yet handed to the consumer.
    pub fn queue_size(&self) -> usize {
        self.inner.queue.size()
    }

    /// Start streaming into `consumer`, connecting if needed. On an open
    /// session the blocks are re-requested with the consumer's config.
    pub async fn start_processing(&self, consumer: Arc<dyn ShipConsumer>) -> Result<(), ShipError> {
        let inner = &self.inner;
        inner.events.info("Starting ship connection...");

        let request = consumer.get_request_block_config().await?;
        {
            let mut session = inner.session.lock().await;
            session.request = request;
            session.required_deltas = consumer.get_required_deltas();
            session.consumer = Some(consumer);
        }
        inner.stopped.send_replace(false);

        if inner.state() == SessionState::Streaming {
            inner.request_blocks().await?;
        }
        inner.queue.start();

        let mut supervisor = inner.supervisor.lock().unwrap_or_else(|e| e.into_inner());
        if supervisor.as_ref().map_or(true, JoinHandle::is_finished) {
            *supervisor = Some(tokio::spawn(supervise(Arc::clone(inner))));
        }
        Ok(())
    }

    /// Close the connection and drop queued blocks. Returns once the
    /// connection task has exited; calling it again is a no-op.
    pub async fn stop_processing(&self) {
        let inner = &self.inner;
        inner.stopped.send_replace(true);
        {
            let mut session = inner.session.lock().await;
            session.consumer = None;
            session.required_deltas.clear();
        }
        inner.queue.clear();
        inner.queue.pause();

        let handle = inner.supervisor.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!(error = %e, "ship connection task ended abnormally");
            }
        }
    }
}

// ─── Connection supervisor ────────────────────────────────────────────────────

async fn supervise(inner: Arc<Inner>) {
    let mut stop = inner.stopped.subscribe();
    while !inner.is_stopped() {
        inner.events.info(format!("Connecting to ship endpoint {}", inner.endpoint));
        inner.set_state(SessionState::Connecting);

        let connected = tokio::select! {
            res = connect_async_with_config(inner.endpoint.as_str(), Some(inner.ws_config()), false) => res,
            _ = wait_stopped(&mut stop) => break,
        };
        match connected {
            Ok((ws, _)) => {
                inner.set_state(SessionState::AwaitingSchema);
                inner.run_session(ws, &mut stop).await;
            }
            Err(e) => inner.events.error(ShipError::Transport(format!("Websocket Error: {e}"))),
        }
        inner.on_close().await;

        if inner.is_stopped() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(inner.options.reconnect_delay_ms)) => {}
            _ = wait_stopped(&mut stop) => break,
        }
        inner.events.info("Reconnecting to Ship...");
    }
    inner.set_state(SessionState::Disconnected);
}

async fn wait_stopped(stop: &mut watch::Receiver<bool>) {
    // the sender lives as long as the connection, so this only fails on drop
    let _ = stop.wait_for(|stopped| *stopped).await;
}

impl Inner {
    fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: SessionState) {
        if self.state.send_replace(state) != state {
            debug!(%state, "ship session state changed");
        }
    }

    fn ws_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = self.options.max_message_size;
        config.max_frame_size = self.options.max_message_size;
        config
    }

    fn types(&self) -> Option<Arc<TypeTable>> {
        self.types.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn run_session(self: &Arc<Self>, ws: WebSocketStream<MaybeTlsStream<TcpStream>>, stop: &mut watch::Receiver<bool>) {
        let (mut write, mut read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);

        loop {
            tokio::select! {
                Some(out) = rx.recv() => {
                    let closing = matches!(out, Message::Close(_));
                    if let Err(e) = write.send(out).await {
                        self.events.error(ShipError::Transport(format!("Websocket Error: {e}")));
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                _ = wait_stopped(stop) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                frame = read.next() => match frame {
                    None => break,
                    Some(Err(e)) => {
                        self.events.error(ShipError::Transport(format!("Websocket Error: {e}")));
                        break;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if !self.on_frame(data).await {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if !self.on_frame(text.into_bytes()).await {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("ship websocket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Returns `false` if the connection must be dropped.
    async fn on_frame(self: &Arc<Self>, data: Vec<u8>) -> bool {
        let result = match self.types() {
            None => self.on_schema(&data).await,
            Some(types) => self.on_result(&types, &data).await,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                self.events.error(e);
                self.abort_blocks();
                false
            }
        }
    }

    async fn on_schema(&self, data: &[u8]) -> Result<(), ShipError> {
        self.events.info("Receiving ABI from ship...");
        let abi: Abi = serde_json::from_slice(data).map_err(|e| ShipError::decode("ship abi", e))?;
        let types = TypeTable::new(&abi)?;
        self.deserializer.init(&abi)?;
        *self.types.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(types));

        if !self.is_stopped() {
            self.reload_request().await?;
            self.request_blocks().await?;
            self.queue.start();
        }
        self.set_state(SessionState::Streaming);
        Ok(())
    }

    /// Take the subscription from the consumer again, so a new connection
    /// resumes after the last block the consumer committed rather than the
    /// last one this session handed over.
    async fn reload_request(&self) -> Result<(), ShipError> {
        let mut session = self.session.lock().await;
        let Some(consumer) = session.consumer.clone() else {
            return Ok(());
        };
        session.request = consumer.get_request_block_config().await?;
        session.required_deltas = consumer.get_required_deltas();
        Ok(())
    }

    async fn request_blocks(&self) -> Result<(), ShipError> {
        let types = self
            .types()
            .ok_or_else(|| ShipError::Transport("ship protocol ABI not received".into()))?;
        let mut session = self.session.lock().await;
        session.unconfirmed = 0;

        let json = serde_json::to_string(&session.request).map_err(|e| ShipError::decode("request", e))?;
        self.events.info(format!("Requesting ship blocks {json}"));
        self.send(protocol::encode_request(&types, &session.request)?)
    }

    fn send(&self, frame: Vec<u8>) -> Result<(), ShipError> {
        let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        match outbound.as_ref() {
            Some(tx) => tx
                .send(Message::Binary(frame))
                .map_err(|_| ShipError::Transport("ship websocket is closed".into())),
            None => Err(ShipError::Transport("ship websocket is not connected".into())),
        }
    }

    async fn on_result(self: &Arc<Self>, types: &TypeTable, data: &[u8]) -> Result<(), ShipError> {
        let (variant, body) = protocol::decode_result(types, data)?;
        let Some(version) = ResultVersion::from_variant(&variant) else {
            self.events.warning(format!("Not supported message received {variant}"));
            return Ok(());
        };
        let result = protocol::parse_blocks_result(body)?;
        let pending = self.start_decoding(version, result).await?;

        let inner = Arc::clone(self);
        self.queue.push(async move { inner.complete(pending).await }.boxed());
        Ok(())
    }

    /// Kick off the decodes of one result. Missing payloads that were
    /// requested fail the block unless the matching `allow_empty_*` is set.
    async fn start_decoding(&self, version: ResultVersion, result: BlocksResult) -> Result<PendingBlock, ShipError> {
        let BlocksResult {
            head,
            last_irreversible,
            this_block,
            prev_block,
            block,
            traces,
            deltas,
        } = result;

        let mut pending = PendingBlock {
            this_block,
            prev_block,
            last_irreversible,
            head,
            block: None,
            traces: None,
            deltas: None,
        };
        let Some(block_num) = pending.this_block.as_ref().map(|b| b.block_num) else {
            return Ok(pending);
        };

        let (request, required) = {
            let session = self.session.lock().await;
            (session.request.clone(), session.required_deltas.clone())
        };

        match block {
            Some(block) => pending.block = Some(self.decode_block(version, block)),
            None if request.fetch_block => self.missing(block_num, "block", self.options.allow_empty_blocks)?,
            None => {}
        }
        match traces {
            Some(traces) => pending.traces = Some(self.decode_traces(traces)),
            None if request.fetch_traces => self.missing(block_num, "trace", self.options.allow_empty_traces)?,
            None => {}
        }
        match deltas {
            Some(deltas) => pending.deltas = Some(self.decode_deltas(deltas, required)),
            None if request.fetch_deltas => self.missing(block_num, "delta", self.options.allow_empty_deltas)?,
            None => {}
        }
        Ok(pending)
    }

    fn missing(&self, block_num: u32, what: &str, allowed: bool) -> Result<(), ShipError> {
        let message = format!("Block #{block_num} does not contain {what} data");
        if allowed {
            self.events.warning(message);
            Ok(())
        } else {
            Err(ShipError::ProtocolViolation(message))
        }
    }

    fn decode_block(&self, version: ResultVersion, block: Value) -> JoinHandle<Result<Value, ShipError>> {
        let deserializer = Arc::clone(&self.deserializer);
        tokio::spawn(async move {
            match version {
                ResultVersion::V0 => {
                    let bytes = hex_payload(SIGNED_BLOCK_TYPE, &block)?;
                    protocol::decode_one(deserializer.as_ref(), SIGNED_BLOCK_TYPE, bytes).await
                }
                ResultVersion::V1 => protocol::unwrap_signed_block(block),
            }
        })
    }

    fn decode_traces(&self, traces: String) -> JoinHandle<Result<Vec<Value>, ShipError>> {
        let deserializer = Arc::clone(&self.deserializer);
        tokio::spawn(async move {
            let bytes = protocol::hex_payload(TRACES_TYPE, &traces)?;
            match protocol::decode_one(deserializer.as_ref(), TRACES_TYPE, bytes).await? {
                Value::Array(traces) => Ok(traces),
                other => Err(ShipError::decode(TRACES_TYPE, format!("expected an array, got {other}"))),
            }
        })
    }

    fn decode_deltas(&self, deltas: String, required: Vec<String>) -> JoinHandle<Result<Vec<ShipTableDelta>, ShipError>> {
        let deserializer = Arc::clone(&self.deserializer);
        tokio::spawn(async move {
            let bytes = protocol::hex_payload(protocol::DELTAS_TYPE, &deltas)?;
            let decoded = protocol::decode_one(deserializer.as_ref(), protocol::DELTAS_TYPE, bytes).await?;
            protocol::decode_deltas(deserializer.as_ref(), decoded, &required).await
        })
    }

    // ─── Block completion (queue worker) ─────────────────────────────────────

    async fn complete(self: Arc<Self>, pending: PendingBlock) {
        if let Err(e) = self.complete_block(pending).await {
            self.events.error(e);
            self.abort_blocks();
            self.close_transport();
        }
    }

    async fn complete_block(&self, pending: PendingBlock) -> Result<(), ShipError> {
        let PendingBlock {
            this_block,
            prev_block,
            last_irreversible,
            head,
            block,
            traces,
            deltas,
        } = pending;

        let Some(this_block) = this_block else {
            self.heartbeat(&last_irreversible).await;
            return self.confirm().await;
        };
        let block_num = this_block.block_num;

        let block = joined(block).await.map_err(|e| e.at_block(block_num, "Failed to deserialize Block"))?;
        let traces = joined(traces)
            .await
            .map_err(|e| e.at_block(block_num, "Failed to deserialize traces"))?
            .unwrap_or_default();
        let deltas = joined(deltas)
            .await
            .map_err(|e| e.at_block(block_num, "Failed to deserialize deltas"))?
            .unwrap_or_default();

        let Some(consumer) = self.session.lock().await.consumer.clone() else {
            debug!(block_num, "no consumer attached, block dropped");
            return Ok(());
        };
        let response = ShipBlockResponse {
            block: protocol::merge_block(&this_block, &last_irreversible, &head, block),
            this_block: this_block.clone(),
            prev_block,
            last_irreversible: last_irreversible.clone(),
            head,
            traces,
            deltas,
        };
        consumer
            .consume(response)
            .await
            .map_err(|e| e.at_block(block_num, "Ship blocks queue stopped due to an error"))?;
        self.events.debug(format!("Block {block_num} processed"));

        protocol::advance_positions(&mut self.session.lock().await.request, Some(&this_block), &last_irreversible);
        self.confirm().await
    }

    /// An empty window: the node has nothing for the requested block.
    async fn heartbeat(&self, last_irreversible: &BlockPosition) {
        let (start, end) = {
            let mut session = self.session.lock().await;
            protocol::advance_positions(&mut session.request, None, last_irreversible);
            (session.request.start_block_num, session.request.end_block_num)
        };
        if start >= end {
            self.events.warning(format!("Empty block #{start} received. Reader finished reading."));
        } else if start % 10_000 == 0 {
            self.events.warning(format!(
                "Empty block #{start} received. Node was likely started with a snapshot and you tried to \
                 process a block range before the snapshot. Catching up until init block."
            ));
        }
    }

    /// Count one completed block and acknowledge once enough accumulated.
    async fn confirm(&self) -> Result<(), ShipError> {
        let mut session = self.session.lock().await;
        session.unconfirmed += 1;
        if session.unconfirmed < self.options.min_block_confirmation {
            return Ok(());
        }
        let Some(types) = self.types() else {
            debug!("session closed, acknowledgement skipped");
            return Ok(());
        };
        let ack = protocol::encode_ack(&types, session.unconfirmed)?;
        if let Err(e) = self.send(ack) {
            // the supervisor handles the closed transport
            debug!(error = %e, "acknowledgement dropped");
        }
        session.unconfirmed = 0;
        Ok(())
    }

    fn abort_blocks(&self) {
        self.queue.clear();
        self.queue.pause();
    }

    fn close_transport(&self) {
        if let Some(tx) = self.outbound.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            let _ = tx.send(Message::Close(None));
        }
    }

    async fn on_close(&self) {
        self.events.error(ShipError::Transport("Ship Websocket disconnected".into()));
        self.types.write().unwrap_or_else(|e| e.into_inner()).take();
        self.outbound.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.queue.clear();
        self.deserializer.terminate().await;
        self.set_state(SessionState::Disconnected);
    }
}

async fn joined<T>(task: Decoding<T>) -> Result<Option<T>, ShipError> {
    match task {
        None => Ok(None),
        Some(handle) => handle
            .await
            .map_err(|e| ShipError::decode("block", e))?
            .map(Some),
    }
}

fn hex_payload(context: &str, value: &Value) -> Result<Vec<u8>, ShipError> {
    match value.as_str() {
        Some(hex_str) => protocol::hex_payload(context, hex_str),
        None => Err(ShipError::decode(context, "expected hex bytes")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::time::timeout;

    struct Recorder {
        seen: Mutex<Vec<ShipBlockResponse>>,
        done: mpsc::UnboundedSender<u32>,
    }

    #[async_trait]
    impl ShipConsumer for Recorder {
        async fn consume(&self, block: ShipBlockResponse) -> Result<(), ShipError> {
            let block_num = block.this_block.block_num;
            self.seen.lock().unwrap().push(block);
            let _ = self.done.send(block_num);
            Ok(())
        }

        async fn get_request_block_config(&self) -> Result<BlockRequest, ShipError> {
            Ok(BlockRequest::default())
        }

        fn get_required_deltas(&self) -> Vec<String> {
            vec![]
        }
    }

    fn pos(n: u32) -> BlockPosition {
        BlockPosition::new(n, format!("{n:08X}"))
    }

    /// A block whose trace decode finishes after `delay_ms`.
    fn pending(n: u32, delay_ms: u64) -> PendingBlock {
        PendingBlock {
            this_block: Some(pos(n)),
            prev_block: Some(pos(n - 1)),
            last_irreversible: pos(1),
            head: pos(n),
            block: None,
            traces: Some(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok::<_, ShipError>(vec![json!(n)])
            })),
            deltas: Some(tokio::spawn(async { Ok::<_, ShipError>(vec![]) })),
        }
    }

    #[tokio::test]
    async fn blocks_complete_in_arrival_order_when_decodes_finish_out_of_order() {
        let conn = StateHistoryConnection::new(
            "ws://127.0.0.1:1",
            ConnectionOptions::default(),
            Arc::new(ShipDeserializer::default()),
        );
        let inner = &conn.inner;
        let (done, mut completed) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder { seen: Mutex::new(vec![]), done });
        inner.session.lock().await.consumer = Some(recorder.clone());
        inner.queue.start();

        // the newest block decodes first
        for (n, delay_ms) in [(5, 80), (6, 40), (7, 0)] {
            let worker = Arc::clone(inner);
            let block = pending(n, delay_ms);
            inner.queue.push(async move { worker.complete(block).await }.boxed());
        }

        for expected in 5..=7 {
            let n = timeout(Duration::from_secs(5), completed.recv()).await.unwrap().unwrap();
            assert_eq!(n, expected);
        }
        assert_eq!(inner.session.lock().await.request.start_block_num, 8);
        let seen = recorder.seen.lock().unwrap();
        for (block, n) in seen.iter().zip(5u32..) {
            assert_eq!(block.this_block.block_num, n);
            assert_eq!(block.traces, vec![json!(n)]);
        }
    }
}
