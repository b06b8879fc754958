use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures::{Future, Stream};
use tracing::warn;

use revu_core::errors::ConnectionError;
use revu_core::runtime::RuntimeEvent;

const PREVIEW_LEN: usize = 120;

/// Extract the `data` payload from one complete SSE event block.
///
/// Multiple `data:` lines are joined with `\n`. Comment lines (`:`) and
/// other fields (`event:`, `id:`, `retry:`) are ignored. Returns `None`
/// when the block carries no data.
pub fn parse_sse_block(block: &str) -> Option<String> {
    let mut data: Option<String> = None;

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let value = if let Some(rest) = line.strip_prefix("data:") {
            rest.strip_prefix(' ').unwrap_or(rest)
        } else if line == "data" {
            ""
        } else {
            continue;
        };
        match &mut data {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }

    data.filter(|d| !d.is_empty())
}

/// Wraps the raw byte stream of the event feed and yields decoded
/// [`RuntimeEvent`]s.
///
/// Frames that fail to decode are logged and skipped. A transport error
/// is yielded once as [`ConnectionError::Stream`], after which the stream
/// ends. With an idle timeout set, a feed that stays silent for that long
/// yields [`ConnectionError::IdleTimeout`].
pub struct FrameStream<E> {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>,
    buffer: BytesMut,
    /// Prefix of `buffer` already searched for a block terminator.
    scanned: usize,
    pending: VecDeque<RuntimeEvent>,
    idle: Option<(Pin<Box<tokio::time::Sleep>>, Duration)>,
    finished: bool,
}

impl<E: Display> FrameStream<E> {
    pub fn new(
        byte_stream: impl Stream<Item = Result<Bytes, E>> + Send + 'static,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: BytesMut::new(),
            scanned: 0,
            pending: VecDeque::new(),
            idle: idle_timeout.map(|d| (Box::pin(tokio::time::sleep(d)), d)),
            finished: false,
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        // Line endings are normalised to `\n` so blocks split on "\n\n".
        self.buffer.reserve(bytes.len());
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));

        loop {
            // Back up one byte: a terminator may straddle the previous chunk.
            let from = self.scanned.saturating_sub(1);
            let Some(offset) = find_block_end(&self.buffer[from..]) else {
                self.scanned = self.buffer.len();
                return;
            };
            let block = self.buffer.split_to(from + offset);
            self.buffer.advance(2);
            self.scanned = 0;
            self.decode_block(&block);
        }
    }

    fn flush_remaining(&mut self) {
        self.scanned = 0;
        if !self.buffer.is_empty() {
            let block = std::mem::take(&mut self.buffer);
            self.decode_block(&block);
        }
    }

    fn decode_block(&mut self, block: &[u8]) {
        let text = String::from_utf8_lossy(block);
        let Some(data) = parse_sse_block(&text) else {
            return;
        };
        match RuntimeEvent::decode(&data) {
            Ok(event) => self.pending.push_back(event),
            Err(e) => {
                let preview: String = data.chars().take(PREVIEW_LEN).collect();
                warn!(error = %e, frame = %preview, "skipping undecodable frame");
            }
        }
    }
}

fn find_block_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

impl<E: Display> Stream for FrameStream<E> {
    type Item = Result<RuntimeEvent, ConnectionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    if let Some((deadline, duration)) = &mut this.idle {
                        let next = tokio::time::Instant::now() + *duration;
                        deadline.as_mut().reset(next);
                    }
                    this.push_bytes(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    this.buffer.clear();
                    this.scanned = 0;
                    return Poll::Ready(Some(Err(ConnectionError::Stream(e.to_string()))));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    this.flush_remaining();
                }
                Poll::Pending => {
                    if let Some((deadline, duration)) = &mut this.idle {
                        if deadline.as_mut().poll(cx).is_ready() {
                            this.finished = true;
                            return Poll::Ready(Some(Err(ConnectionError::IdleTimeout(*duration))));
                        }
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    type Chunk = Result<Bytes, std::io::Error>;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Chunk> + Send + 'static {
        let owned: Vec<Chunk> = parts.iter().map(|p| Ok(Bytes::from(p.to_string()))).collect();
        futures::stream::iter(owned)
    }

    async fn collect_events(parts: &[&str]) -> Vec<Result<RuntimeEvent, ConnectionError>> {
        FrameStream::new(chunks(parts), None).collect().await
    }

    #[test]
    fn parse_block_single_data_line() {
        assert_eq!(parse_sse_block("data: {\"a\":1}"), Some("{\"a\":1}".into()));
    }

    #[test]
    fn parse_block_without_space() {
        assert_eq!(parse_sse_block("data:{\"a\":1}"), Some("{\"a\":1}".into()));
    }

    #[test]
    fn parse_block_joins_multiple_data_lines() {
        assert_eq!(parse_sse_block("data: {\"a\":\ndata: 1}"), Some("{\"a\":\n1}".into()));
    }

    #[test]
    fn parse_block_ignores_comments_and_fields() {
        assert_eq!(parse_sse_block(": keep-alive"), None);
        assert_eq!(
            parse_sse_block("event: message\nid: 7\ndata: x\nretry: 100"),
            Some("x".into())
        );
    }

    #[tokio::test]
    async fn decodes_frames_in_order() {
        let events = collect_events(&[
            "data: {\"type\":\"server.connected\",\"properties\":{}}\n\n",
            "data: {\"type\":\"session.idle\",\"properties\":{\"sessionID\":\"abc\"}}\n\n",
        ])
        .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Ok(RuntimeEvent::ServerConnected));
        assert_eq!(
            events[1],
            Ok(RuntimeEvent::SessionIdle { session_id: "abc".into() })
        );
    }

    #[tokio::test]
    async fn frames_split_across_chunks() {
        let events = collect_events(&[
            "data: {\"type\":\"ser",
            "ver.connected\"}\n",
            "\ndata: {\"type\":\"session.idle\",\"properties\":{\"sessionID\":\"abc\"}}\n\n",
        ])
        .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Ok(RuntimeEvent::ServerConnected));
    }

    #[tokio::test]
    async fn crlf_line_endings() {
        let events = collect_events(&["data: {\"type\":\"server.connected\"}\r\n\r\n"]).await;
        assert_eq!(events, vec![Ok(RuntimeEvent::ServerConnected)]);
    }

    #[tokio::test]
    async fn multibyte_text_split_across_chunks() {
        let frame = "data: {\"type\":\"session.status\",\"properties\":{\"sessionID\":\"abc\",\"status\":{\"type\":\"retry\",\"message\":\"überlastet\"}}}\n\n";
        let bytes = frame.as_bytes();
        let split = frame.find('ü').unwrap() + 1;
        let parts: Vec<Chunk> = vec![
            Ok(Bytes::copy_from_slice(&bytes[..split])),
            Ok(Bytes::copy_from_slice(&bytes[split..])),
        ];
        let events: Vec<_> = FrameStream::new(futures::stream::iter(parts), None).collect().await;
        let Some(Ok(RuntimeEvent::SessionStatus { status, .. })) = events.into_iter().next() else {
            panic!("expected SessionStatus");
        };
        assert_eq!(status.message.as_deref(), Some("überlastet"));
    }

    #[tokio::test]
    async fn large_frame_in_small_chunks() {
        let message = "x".repeat(4 * 1024 * 1024);
        let frame = format!(
            "data: {{\"type\":\"session.status\",\"properties\":{{\"sessionID\":\"abc\",\"status\":{{\"type\":\"retry\",\"message\":\"{message}\"}}}}}}\n\n"
        );
        let parts: Vec<Chunk> = frame
            .as_bytes()
            .chunks(8 * 1024)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        assert!(parts.len() > 500);

        let events: Vec<_> = FrameStream::new(futures::stream::iter(parts), None).collect().await;
        assert_eq!(events.len(), 1);
        let Some(Ok(RuntimeEvent::SessionStatus { status, .. })) = events.into_iter().next() else {
            panic!("expected SessionStatus");
        };
        assert_eq!(status.message.map(|m| m.len()), Some(message.len()));
    }

    #[test]
    fn scan_resumes_where_it_left_off() {
        let mut stream = FrameStream::new(futures::stream::empty::<Chunk>(), None);

        stream.push_bytes(b"data: {\"type\":\"server.connected\"}");
        assert_eq!(stream.scanned, stream.buffer.len());
        stream.push_bytes(b"\n");
        assert_eq!(stream.scanned, stream.buffer.len());
        assert!(stream.pending.is_empty());

        // Terminator split across two pushes.
        stream.push_bytes(b"\ndata: {\"type\":");
        assert_eq!(stream.pending.len(), 1);
        assert_eq!(&stream.buffer[..], b"data: {\"type\":");
        assert_eq!(stream.scanned, stream.buffer.len());
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let events = collect_events(&[
            "data: {\"type\":\"server.connected\"}\n\n",
            "data: {not json at all\n\n",
            "data: {\"properties\":{}}\n\n",
            "data: {\"type\":\"session.idle\",\"properties\":{\"sessionID\":\"abc\"}}\n\n",
        ])
        .await;
        assert_eq!(
            events,
            vec![
                Ok(RuntimeEvent::ServerConnected),
                Ok(RuntimeEvent::SessionIdle { session_id: "abc".into() }),
            ]
        );
    }

    #[tokio::test]
    async fn comment_frames_are_ignored() {
        let events = collect_events(&[": ping\n\n", "data: {\"type\":\"server.connected\"}\n\n"]).await;
        assert_eq!(events, vec![Ok(RuntimeEvent::ServerConnected)]);
    }

    #[tokio::test]
    async fn trailing_frame_without_blank_line_is_flushed() {
        let events = collect_events(&["data: {\"type\":\"server.connected\"}\n"]).await;
        assert_eq!(events, vec![Ok(RuntimeEvent::ServerConnected)]);
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let parts: Vec<Chunk> = vec![
            Ok(Bytes::from("data: {\"type\":\"server.connected\"}\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from("data: {\"type\":\"server.connected\"}\n\n")),
        ];
        let events: Vec<_> = FrameStream::new(futures::stream::iter(parts), None).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Ok(RuntimeEvent::ServerConnected));
        assert!(matches!(&events[1], Err(ConnectionError::Stream(msg)) if msg.contains("reset")));
    }

    #[tokio::test]
    async fn idle_timeout_fires_when_no_data() {
        tokio::time::pause();

        let byte_stream = futures::stream::pending::<Chunk>();
        let mut stream = FrameStream::new(byte_stream, Some(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(6)).await;

        let event = stream.next().await;
        assert!(
            matches!(&event, Some(Err(ConnectionError::IdleTimeout(d))) if *d == Duration::from_secs(5)),
            "expected idle timeout, got: {event:?}"
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn idle_timeout_resets_on_data() {
        tokio::time::pause();

        let (tx, rx) = tokio::sync::mpsc::channel::<Chunk>(16);
        let rx_stream = tokio_stream::wrappers::ReceiverStream::new(rx);
        let mut stream = FrameStream::new(rx_stream, Some(Duration::from_secs(5)));

        tx.send(Ok(Bytes::from("data: {\"type\":\"server.connected\"}\n\n")))
            .await
            .unwrap();
        assert!(matches!(stream.next().await, Some(Ok(RuntimeEvent::ServerConnected))));

        tokio::time::advance(Duration::from_secs(4)).await;

        tx.send(Ok(Bytes::from(": ping\n\n"))).await.unwrap();
        tx.send(Ok(Bytes::from("data: {\"type\":\"server.connected\"}\n\n")))
            .await
            .unwrap();
        assert!(matches!(stream.next().await, Some(Ok(RuntimeEvent::ServerConnected))));

        drop(tx);
        let event = stream.next().await;
        assert!(event.is_none(), "expected stream end, got: {event:?}");
    }
}
