//! Subscription-over-request transport.
//!
//! The upstream streams its events over a plain HTTP response body, because
//! the request has to carry a body (form data or JSON) that a native
//! subscription primitive cannot. This module re-exposes that response as a
//! line-framed message stream with subscription semantics: a ready state,
//! an ordered message channel, at most one terminal error, and an abortable
//! `close`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ScribeError;
use crate::framing::{LineFramer, Utf8Decoder};

const MAX_ERROR_BODY_BYTES: usize = 2048;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    /// Response headers received, body streaming.
    Open = 1,
    /// Body ended, transport failed, or `close()` was called.
    Closed = 2,
}

impl ReadyState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            _ => ReadyState::Closed,
        }
    }
}

/// One delivery from the transport: a `data: ` line payload, or the single
/// terminal error.
#[derive(Debug)]
pub enum StreamItem {
    Message(String),
    Error(ScribeError),
}

/// Handle to an open stream. Dropping it closes the transport.
#[derive(Debug)]
pub struct StreamTransport {
    rx: mpsc::UnboundedReceiver<StreamItem>,
    state: Arc<AtomicU8>,
    task: JoinHandle<()>,
    closed: bool,
}

/// Open the transport for a prepared request. Never fails synchronously:
/// connect and status failures surface as the stream's terminal error.
pub fn open(request: reqwest::RequestBuilder) -> StreamTransport {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));

    let task_state = state.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = run_stream(request, &tx, &task_state).await {
            // Exactly once, then the channel closes with the task.
            let _ = tx.send(StreamItem::Error(e));
        }
        task_state.store(ReadyState::Closed as u8, Ordering::SeqCst);
    });

    StreamTransport { rx, state, task, closed: false }
}

async fn run_stream(
    request: reqwest::RequestBuilder,
    tx: &mpsc::UnboundedSender<StreamItem>,
    state: &AtomicU8,
) -> Result<(), ScribeError> {
    let response = request
        .send()
        .await
        .map_err(|e| ScribeError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY_BYTES {
            let mut cut = MAX_ERROR_BODY_BYTES;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        return Err(ScribeError::Status { status: status.as_u16(), body });
    }

    state.store(ReadyState::Open as u8, Ordering::SeqCst);
    tracing::debug!(%status, "stream transport open");

    let mut decoder = Utf8Decoder::new();
    let mut framer = LineFramer::new();
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| ScribeError::Transport(e.to_string()))?;
        for message in framer.push(&decoder.decode(&chunk)) {
            if tx.send(StreamItem::Message(message)).is_err() {
                // Consumer closed; stop reading.
                return Ok(());
            }
        }
    }

    if let Some(message) = framer.finish() {
        let _ = tx.send(StreamItem::Message(message));
    }

    tracing::debug!("stream body ended");
    Ok(())
}

impl StreamTransport {
    /// Next delivery, in byte-arrival order. `None` once the transport is
    /// closed and drained; nothing is delivered after `close()`.
    pub async fn recv(&mut self) -> Option<StreamItem> {
        if self.closed {
            return None;
        }
        match self.rx.recv().await {
            Some(item) => Some(item),
            None => {
                self.state.store(ReadyState::Closed as u8, Ordering::SeqCst);
                None
            }
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Abort the underlying transport. Idempotent; any in-flight read
    /// becomes a no-op and no further items are delivered.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.task.abort();
        self.rx.close();
        self.state.store(ReadyState::Closed as u8, Ordering::SeqCst);
        tracing::debug!("stream transport closed");
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server: answers a single request with `status` and a
    /// chunk-at-a-time body, then closes the connection.
    async fn serve_once(status: &'static str, chunks: Vec<&'static [u8]>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();

            let mut buf = vec![0u8; 4096];
            let mut head = Vec::new();
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                head.extend_from_slice(&buf[..n]);
                if n == 0 || head.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }

            let header = format!(
                "HTTP/1.1 {status}\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n"
            );
            sock.write_all(header.as_bytes()).await.unwrap();
            for chunk in chunks {
                sock.write_all(chunk).await.unwrap();
                sock.flush().await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            sock.shutdown().await.ok();
        });

        format!("http://{addr}/stream")
    }

    #[tokio::test]
    async fn split_chunks_deliver_messages_in_order() {
        let url = serve_once(
            "200 OK",
            vec![b"data: {\"a\":1}\n\nda", b"ta: {\"b\":2}\n\n"],
        )
        .await;

        let client = reqwest::Client::new();
        let mut stream = open(client.post(url).body("{}"));

        match stream.recv().await {
            Some(StreamItem::Message(m)) => assert_eq!(m, "{\"a\":1}"),
            other => panic!("unexpected item: {other:?}"),
        }
        assert_eq!(stream.ready_state(), ReadyState::Open);

        match stream.recv().await {
            Some(StreamItem::Message(m)) => assert_eq!(m, "{\"b\":2}"),
            other => panic!("unexpected item: {other:?}"),
        }

        assert!(stream.recv().await.is_none());
        assert_eq!(stream.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn non_success_status_is_a_single_terminal_error() {
        let url = serve_once("503 Service Unavailable", vec![b"overloaded"]).await;

        let client = reqwest::Client::new();
        let mut stream = open(client.post(url).body("{}"));

        match stream.recv().await {
            Some(StreamItem::Error(ScribeError::Status { status, .. })) => {
                assert_eq!(status, 503)
            }
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(stream.recv().await.is_none());
        assert_eq!(stream.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn oversized_error_body_truncates_on_a_char_boundary() {
        // 3-byte chars, so the byte cap falls mid-character.
        let oversized: &'static [u8] =
            Box::leak("€".repeat(1024).into_bytes().into_boxed_slice());
        let url = serve_once("503 Service Unavailable", vec![oversized]).await;

        let client = reqwest::Client::new();
        let mut stream = open(client.post(url).body("{}"));

        match stream.recv().await {
            Some(StreamItem::Error(ScribeError::Status { status, body })) => {
                assert_eq!(status, 503);
                assert!(body.len() <= MAX_ERROR_BODY_BYTES);
                assert!(body.chars().all(|c| c == '€'));
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_failure_surfaces_as_error_not_panic() {
        // Reserved port with nothing listening.
        let client = reqwest::Client::new();
        let mut stream = open(client.post("http://127.0.0.1:1/stream").body("{}"));

        match stream.recv().await {
            Some(StreamItem::Error(e)) => assert!(e.is_transport()),
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_silences_delivery() {
        let url = serve_once("200 OK", vec![b"data: one\n\ndata: two\n\n"]).await;

        let client = reqwest::Client::new();
        let mut stream = open(client.post(url).body("{}"));

        stream.close();
        stream.close();

        assert_eq!(stream.ready_state(), ReadyState::Closed);
        assert!(stream.recv().await.is_none());
    }
}
