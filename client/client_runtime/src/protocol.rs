use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::transport::{PushOutcome, Transport, TransportError};

pub const CLIENT_TO_SERVER_CAP: usize = 65_536;
pub const SERVER_TO_CLIENT_CAP: usize = 1_048_576;

const INBOUND_EVENT_QUEUE_CAP: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t")]
pub enum ClientEnvelope {
    #[serde(rename = "ready")]
    Ready { sid: String, capabilities: Value },
    #[serde(rename = "push")]
    Push {
        sid: String,
        #[serde(rename = "ref")]
        push_ref: u64,
        event: String,
        payload: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "t")]
pub enum ServerEnvelope {
    #[serde(rename = "reply")]
    Reply {
        sid: String,
        #[serde(rename = "ref")]
        push_ref: u64,
        status: ReplyStatus,
        response: String,
    },

    #[serde(rename = "mount")]
    Mount {
        sid: String,
        cid: String,
        module: String,
    },

    #[serde(rename = "unmount")]
    Unmount { sid: String, cid: String },

    #[serde(rename = "page")]
    Page { sid: String, state: Value },

    #[serde(rename = "dispatch")]
    Dispatch {
        sid: String,
        target: String,
        module: String,
        name: String,
        #[serde(default)]
        params: Option<Value>,
    },

    #[serde(rename = "error")]
    Error {
        sid: String,
        code: String,
        message: String,
    },
}

impl ServerEnvelope {
    pub fn sid(&self) -> &str {
        match self {
            ServerEnvelope::Reply { sid, .. }
            | ServerEnvelope::Mount { sid, .. }
            | ServerEnvelope::Unmount { sid, .. }
            | ServerEnvelope::Page { sid, .. }
            | ServerEnvelope::Dispatch { sid, .. }
            | ServerEnvelope::Error { sid, .. } => sid,
        }
    }
}

pub fn ready_envelope(sid: String) -> ClientEnvelope {
    ClientEnvelope::Ready {
        sid,
        capabilities: serde_json::json!({
            "commands": true,
            "transport": "stdio-packet-4"
        }),
    }
}

pub fn push_envelope(
    sid: String,
    push_ref: u64,
    event: impl Into<String>,
    payload: String,
) -> ClientEnvelope {
    ClientEnvelope::Push {
        sid,
        push_ref,
        event: event.into(),
        payload,
    }
}

pub async fn writer_loop<W>(mut rx: mpsc::Receiver<ClientEnvelope>, mut writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = rx.recv().await {
        let payload = encode_client_envelope(&envelope)?;
        write_frame(&mut writer, &payload, CLIENT_TO_SERVER_CAP).await?;
        writer.flush().await?;
    }

    Ok(())
}

fn encode_client_envelope(envelope: &ClientEnvelope) -> io::Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(json_error)
}

fn decode_server_envelope(payload: &[u8]) -> io::Result<ServerEnvelope> {
    serde_json::from_slice(payload).map_err(json_error)
}

pub(crate) async fn read_frame<R>(reader: &mut R, max_payload: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0_u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} > {max_payload}"),
        ));
    }

    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

pub(crate) async fn write_frame<W>(writer: &mut W, payload: &[u8], max_payload: usize) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} > {}", payload.len(), max_payload),
        ));
    }

    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "payload exceeds u32"))?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}

fn json_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

struct Reply {
    status: ReplyStatus,
    response: String,
}

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// [`Transport`] over a pair of byte streams carrying length-prefixed JSON
/// frames. Replies are matched to pushes by `ref`; every other server
/// envelope is forwarded on the event channel returned by [`FramedTransport::spawn`].
pub struct FramedTransport {
    sid: String,
    outbound: mpsc::Sender<ClientEnvelope>,
    pending: PendingReplies,
    next_ref: AtomicU64,
    connected: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    push_timeout: Duration,
}

impl FramedTransport {
    pub fn spawn<R, W>(
        reader: R,
        writer: W,
        sid: String,
        push_timeout: Duration,
        outbound_queue_cap: usize,
    ) -> (Arc<Self>, mpsc::Receiver<ServerEnvelope>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::channel(outbound_queue_cap.max(1));
        let (events_tx, events_rx) = mpsc::channel(INBOUND_EVENT_QUEUE_CAP);
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(false));
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(async move {
            if let Err(err) = writer_loop(outbound_rx, writer).await {
                error!(error = %err, "writer loop terminated with error");
            }
        });

        tokio::spawn(reader_task(
            reader,
            sid.clone(),
            pending.clone(),
            events_tx,
            connected.clone(),
            open.clone(),
        ));

        let transport = Arc::new(Self {
            sid,
            outbound,
            pending,
            next_ref: AtomicU64::new(1),
            connected,
            open,
            push_timeout,
        });

        (transport, events_rx)
    }

    fn forget(&self, push_ref: u64) {
        self.pending.lock().remove(&push_ref);
    }
}

async fn reader_task<R>(
    mut reader: R,
    sid: String,
    pending: PendingReplies,
    events: mpsc::Sender<ServerEnvelope>,
    connected: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let result: io::Result<()> = async {
        loop {
            let payload = match read_frame(&mut reader, SERVER_TO_CLIENT_CAP).await {
                Ok(payload) => payload,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(err) => return Err(err),
            };

            match decode_server_envelope(&payload)? {
                ServerEnvelope::Reply {
                    sid: reply_sid,
                    push_ref,
                    status,
                    response,
                } => {
                    if reply_sid != sid {
                        warn!(%reply_sid, push_ref, "dropping reply for foreign session");
                        continue;
                    }
                    let waiter = pending.lock().remove(&push_ref);
                    match waiter {
                        Some(waiter) => {
                            let _ = waiter.send(Reply { status, response });
                        }
                        None => debug!(push_ref, "reply arrived after its push gave up"),
                    }
                }
                envelope => {
                    if events.send(envelope).await.is_err() {
                        debug!("event receiver dropped; discarding server envelope");
                    }
                }
            }
        }
    }
    .await;

    if let Err(err) = &result {
        error!(error = %err, "reader loop terminated with error");
    }

    // `open` drops first: `connect` re-checks it after raising `connected`,
    // and `push` checks it under the pending lock before registering.
    open.store(false, Ordering::SeqCst);
    connected.store(false, Ordering::SeqCst);
    // Dropping the senders resolves every waiting push.
    pending.lock().clear();
}

#[async_trait]
impl Transport for FramedTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.outbound
            .send(ready_envelope(self.sid.clone()))
            .await
            .map_err(|_| TransportError::Closed)?;

        self.connected.store(true, Ordering::SeqCst);
        if !self.open.load(Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(TransportError::Closed);
        }
        debug!(sid = %self.sid, "transport connected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn push(&self, event: &str, payload: String) -> PushOutcome {
        let push_ref = self.next_ref.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if !self.open.load(Ordering::SeqCst) {
                warn!(push_ref, event, "transport closed; push not sent");
                return PushOutcome::TimedOut;
            }
            pending.insert(push_ref, tx);
        }

        let envelope = push_envelope(self.sid.clone(), push_ref, event, payload);
        if self.outbound.send(envelope).await.is_err() {
            self.forget(push_ref);
            warn!(push_ref, event, "outbound queue closed before push was sent");
            return PushOutcome::TimedOut;
        }

        match tokio::time::timeout(self.push_timeout, rx).await {
            Ok(Ok(Reply {
                status: ReplyStatus::Ok,
                response,
            })) => PushOutcome::Ok(response),
            Ok(Ok(Reply {
                status: ReplyStatus::Error,
                response,
            })) => PushOutcome::Rejected(response),
            Ok(Err(_)) => {
                warn!(push_ref, event, "transport closed before ack");
                PushOutcome::TimedOut
            }
            Err(_) => {
                self.forget(push_ref);
                warn!(push_ref, event, timeout_ms = self.push_timeout.as_millis() as u64, "push timed out");
                PushOutcome::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::{DuplexStream, duplex};

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let payload = br#"{"t":"ready","sid":"S1"}"#;
        let mut out = Vec::new();

        write_frame(&mut out, payload, CLIENT_TO_SERVER_CAP)
            .await
            .expect("frame write");

        let mut cursor = Cursor::new(out);
        let decoded = read_frame(&mut cursor, CLIENT_TO_SERVER_CAP)
            .await
            .expect("frame read");
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn truncated_frame_is_rejected() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 5, b'a', b'b']);
        let err = read_frame(&mut cursor, CLIENT_TO_SERVER_CAP)
            .await
            .expect_err("expected eof");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let len = (CLIENT_TO_SERVER_CAP as u32) + 1;
        let mut cursor = Cursor::new(len.to_be_bytes().to_vec());
        let err = read_frame(&mut cursor, CLIENT_TO_SERVER_CAP)
            .await
            .expect_err("expected too large");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn decodes_dispatch_envelope() {
        let payload = br#"{"t":"dispatch","sid":"S1","target":"page","module":"Elixir.App.Page","name":"save","params":{"type":"map","data":[]}}"#;
        match decode_server_envelope(payload).expect("decode dispatch") {
            ServerEnvelope::Dispatch {
                target, name, params, ..
            } => {
                assert_eq!(target, "page");
                assert_eq!(name, "save");
                assert!(params.is_some());
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn encodes_push_envelope() {
        let encoded = encode_client_envelope(&push_envelope(
            "S1".to_string(),
            7,
            "command",
            "{}".to_string(),
        ))
        .expect("encode push");

        let value: Value = serde_json::from_slice(&encoded).expect("parse encoded json");
        assert_eq!(value["t"], "push");
        assert_eq!(value["ref"], 7);
        assert_eq!(value["event"], "command");
        assert_eq!(value["payload"], "{}");
    }

    struct FakeServer {
        from_client: DuplexStream,
        to_client: DuplexStream,
    }

    impl FakeServer {
        async fn recv(&mut self) -> Value {
            let frame = read_frame(&mut self.from_client, CLIENT_TO_SERVER_CAP)
                .await
                .expect("client frame");
            serde_json::from_slice(&frame).expect("client json")
        }

        async fn send(&mut self, value: Value) {
            let bytes = serde_json::to_vec(&value).expect("server json");
            write_frame(&mut self.to_client, &bytes, SERVER_TO_CLIENT_CAP)
                .await
                .expect("server frame");
        }
    }

    fn connect_pair(timeout: Duration) -> (Arc<FramedTransport>, mpsc::Receiver<ServerEnvelope>, FakeServer) {
        let (client_reader, to_client) = duplex(64 * 1024);
        let (from_client, client_writer) = duplex(64 * 1024);
        let (transport, events) =
            FramedTransport::spawn(client_reader, client_writer, "S1".to_string(), timeout, 8);
        (
            transport,
            events,
            FakeServer {
                from_client,
                to_client,
            },
        )
    }

    #[tokio::test]
    async fn push_resolves_with_matching_reply() {
        let (transport, _events, mut server) = connect_pair(Duration::from_secs(5));
        transport.connect().await.expect("connect");
        assert!(transport.is_connected());
        assert_eq!(server.recv().await["t"], "ready");

        let pushing = tokio::spawn({
            let transport = transport.clone();
            async move { transport.push("command", "payload-1".to_string()).await }
        });

        let push = server.recv().await;
        assert_eq!(push["payload"], "payload-1");
        server
            .send(serde_json::json!({
                "t": "reply", "sid": "S1", "ref": push["ref"], "status": "ok", "response": "[1,null]"
            }))
            .await;

        assert_eq!(
            pushing.await.expect("join"),
            PushOutcome::Ok("[1,null]".to_string())
        );
    }

    #[tokio::test]
    async fn error_reply_is_a_rejection() {
        let (transport, _events, mut server) = connect_pair(Duration::from_secs(5));
        transport.connect().await.expect("connect");
        server.recv().await;

        let pushing = tokio::spawn({
            let transport = transport.clone();
            async move { transport.push("command", "p".to_string()).await }
        });
        let push = server.recv().await;
        server
            .send(serde_json::json!({
                "t": "reply", "sid": "S1", "ref": push["ref"], "status": "error", "response": "boom"
            }))
            .await;

        assert_eq!(
            pushing.await.expect("join"),
            PushOutcome::Rejected("boom".to_string())
        );
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (transport, _events, mut server) = connect_pair(Duration::from_millis(20));
        transport.connect().await.expect("connect");
        server.recv().await;

        assert_eq!(
            transport.push("command", "p".to_string()).await,
            PushOutcome::TimedOut
        );
        assert!(transport.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn closed_server_fails_pending_pushes_and_disconnects() {
        let (transport, _events, mut server) = connect_pair(Duration::from_secs(5));
        transport.connect().await.expect("connect");
        server.recv().await;

        let pushing = tokio::spawn({
            let transport = transport.clone();
            async move { transport.push("command", "p".to_string()).await }
        });
        server.recv().await;
        drop(server);

        assert_eq!(pushing.await.expect("join"), PushOutcome::TimedOut);
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::Closed)
        ));
    }

    async fn wait_closed(transport: &FramedTransport) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while transport.open.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("reader closes");
    }

    #[tokio::test]
    async fn push_after_close_fails_without_waiting_for_timeout() {
        let (transport, _events, mut server) = connect_pair(Duration::from_secs(60));
        transport.connect().await.expect("connect");
        server.recv().await;
        drop(server);
        wait_closed(&transport).await;

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            transport.push("command", "p".to_string()),
        )
        .await
        .expect("push returns promptly");
        assert_eq!(outcome, PushOutcome::TimedOut);
        assert!(transport.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn connect_racing_a_close_does_not_report_connected() {
        let (client_reader, to_client) = duplex(64 * 1024);
        // Tiny buffer so the writer stalls on its first frame.
        let (mut from_client, client_writer) = duplex(8);
        let (transport, _events) = FramedTransport::spawn(
            client_reader,
            client_writer,
            "S1".to_string(),
            Duration::from_secs(5),
            1,
        );

        loop {
            match transport.outbound.try_send(ready_envelope("S1".to_string())) {
                Ok(()) => tokio::task::yield_now().await,
                Err(mpsc::error::TrySendError::Full(_)) => break,
                Err(err) => panic!("outbound closed early: {err}"),
            }
        }

        let connecting = tokio::spawn({
            let transport = transport.clone();
            async move { transport.connect().await }
        });
        tokio::task::yield_now().await;

        drop(to_client);
        wait_closed(&transport).await;

        tokio::spawn(async move {
            let mut sink = Vec::new();
            let _ = from_client.read_to_end(&mut sink).await;
        });

        assert!(matches!(
            connecting.await.expect("join"),
            Err(TransportError::Closed)
        ));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn non_reply_envelopes_are_forwarded() {
        let (_transport, mut events, mut server) = connect_pair(Duration::from_secs(5));
        server
            .send(serde_json::json!({
                "t": "mount", "sid": "S1", "cid": "page", "module": "Elixir.App.Page"
            }))
            .await;

        match events.recv().await.expect("event") {
            ServerEnvelope::Mount { cid, module, .. } => {
                assert_eq!(cid, "page");
                assert_eq!(module, "Elixir.App.Page");
            }
            other => panic!("expected mount, got {other:?}"),
        }
    }
}
