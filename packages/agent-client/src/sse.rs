//! SSE frame decoder for the agent answer stream.
//!
//! Converts a raw byte stream into `Frame` values. The transport gives no
//! hint about message boundaries: chunks may split a line, a CRLF pair, or a
//! multi-byte character, so the decoder keeps a byte buffer and only cuts a
//! frame once its terminating blank line has fully arrived.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::Stream;

use crate::error::AgentError;

/// One decoded protocol unit: an event name and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Event name from the `event:` field, `"message"` if absent.
    pub event: String,
    /// Payload assembled from the `data:` fields, joined by newlines.
    pub data: String,
}

/// Stream adapter that turns raw SSE bytes into `Frame` values.
pub struct FrameStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, AgentError>> + Send>>,
    buffer: Vec<u8>,
    ended: bool,
}

impl FrameStream {
    pub fn new(
        byte_stream: impl Stream<Item = Result<Bytes, AgentError>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: Vec::new(),
            ended: false,
        }
    }
}

impl Stream for FrameStream {
    type Item = Result<Frame, AgentError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            // Cut complete blocks from the buffer first.
            while let Some(block) = split_block(&mut this.buffer) {
                if let Some(frame) = parse_block(&block) {
                    return Poll::Ready(Some(Ok(frame)));
                }
            }

            if this.ended {
                // Tolerate a final block the server did not terminate with a
                // blank line before closing.
                let rest = std::mem::take(&mut this.buffer);
                if let Some(frame) = parse_block(&rest) {
                    return Poll::Ready(Some(Ok(frame)));
                }
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    // Loop to try cutting again.
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => this.ended = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Line-terminator classification at a buffer offset.
enum Term {
    /// Not a terminator.
    No,
    /// A complete terminator of this byte length (`\n`, `\r`, or `\r\n`).
    Len(usize),
    /// A trailing `\r` that may still grow into `\r\n`.
    NeedMore,
}

fn terminator_at(buf: &[u8], i: usize) -> Term {
    match buf.get(i) {
        Some(b'\n') => Term::Len(1),
        Some(b'\r') => match buf.get(i + 1) {
            Some(b'\n') => Term::Len(2),
            Some(_) => Term::Len(1),
            None => Term::NeedMore,
        },
        _ => Term::No,
    }
}

/// Split one complete block (everything before a blank-line separator) off
/// the front of the buffer. Returns `None` until the separator has fully
/// arrived; partial input stays buffered.
fn split_block(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let mut i = 0;
    while i < buf.len() {
        match terminator_at(buf, i) {
            Term::Len(first) => match terminator_at(buf, i + first) {
                Term::Len(second) => {
                    let block = buf[..i].to_vec();
                    buf.drain(..i + first + second);
                    return Some(block);
                }
                Term::NeedMore => return None,
                Term::No => i += first,
            },
            Term::NeedMore => return None,
            Term::No => i += 1,
        }
    }
    None
}

/// Decode one block into a frame.
///
/// `event:` sets the event name, `data:` lines accumulate (joined by
/// newline), comment lines (leading `:`) and unknown fields are dropped.
/// A block with no data lines yields no frame.
fn parse_block(block: &[u8]) -> Option<Frame> {
    if block.is_empty() {
        return None;
    }

    // Blocks are cut on double terminators, so normalizing the remaining
    // single terminators is safe here.
    let text = String::from_utf8_lossy(block).replace("\r\n", "\n").replace('\r', "\n");

    let mut event: Option<String> = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.find(':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                // A single leading space after the colon is not payload.
                (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }

    Some(Frame {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn make_byte_stream(chunks: Vec<Vec<u8>>) -> FrameStream {
        let items: Vec<Result<Bytes, AgentError>> =
            chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
        FrameStream::new(futures::stream::iter(items))
    }

    async fn collect_frames(stream: FrameStream) -> Vec<Frame> {
        stream.map(|r| r.unwrap()).collect().await
    }

    #[tokio::test]
    async fn test_single_frame() {
        let stream = make_byte_stream(vec![b"event: token\ndata: {\"a\":1}\n\n".to_vec()]);
        let frames = collect_frames(stream).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "token");
        assert_eq!(frames[0].data, "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_default_event_name() {
        let stream = make_byte_stream(vec![b"data: hello\n\n".to_vec()]);
        let frames = collect_frames(stream).await;

        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "hello");
    }

    #[tokio::test]
    async fn test_multiple_data_lines_joined() {
        let stream = make_byte_stream(vec![b"data: line one\ndata: line two\n\n".to_vec()]);
        let frames = collect_frames(stream).await;

        assert_eq!(frames[0].data, "line one\nline two");
    }

    #[tokio::test]
    async fn test_comments_and_unknown_fields_dropped() {
        let stream = make_byte_stream(vec![
            b": keep-alive\nid: 7\nretry: 3000\ndata: x\n\n".to_vec(),
        ]);
        let frames = collect_frames(stream).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }

    #[tokio::test]
    async fn test_block_without_data_yields_no_frame() {
        let stream = make_byte_stream(vec![
            b": ping\n\nevent: token\n\ndata: real\n\n".to_vec(),
        ]);
        let frames = collect_frames(stream).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "real");
    }

    #[tokio::test]
    async fn test_crlf_separators() {
        let stream = make_byte_stream(vec![
            b"event: token\r\ndata: a\r\n\r\ndata: b\r\n\r\n".to_vec(),
        ]);
        let frames = collect_frames(stream).await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "token");
        assert_eq!(frames[0].data, "a");
        assert_eq!(frames[1].data, "b");
    }

    #[tokio::test]
    async fn test_chunk_split_inside_separator() {
        // The blank-line separator itself arrives in two chunks.
        let stream = make_byte_stream(vec![
            b"data: a\r\n".to_vec(),
            b"\r".to_vec(),
            b"\ndata: b\n\n".to_vec(),
        ]);
        let frames = collect_frames(stream).await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "a");
        assert_eq!(frames[1].data, "b");
    }

    #[tokio::test]
    async fn test_chunk_split_inside_multibyte_char() {
        let payload = "data: 数据流\n\n".as_bytes().to_vec();
        // Split in the middle of the first multi-byte character.
        let split_at = payload
            .iter()
            .position(|b| *b >= 0x80)
            .unwrap()
            + 1;
        let stream = make_byte_stream(vec![
            payload[..split_at].to_vec(),
            payload[split_at..].to_vec(),
        ]);
        let frames = collect_frames(stream).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "数据流");
    }

    #[tokio::test]
    async fn test_any_chunking_yields_identical_frames() {
        let script = "event: tool_call\ndata: {\"id\":\"t1\"}\n\n\
                      data: first\ndata: second\n\n\
                      event: done\r\ndata: 完成\r\n\r\n"
            .as_bytes()
            .to_vec();

        let whole = collect_frames(make_byte_stream(vec![script.clone()])).await;
        assert_eq!(whole.len(), 3);

        for chunk_size in [1, 2, 3, 5, 7, 11] {
            let chunks: Vec<Vec<u8>> = script.chunks(chunk_size).map(|c| c.to_vec()).collect();
            let frames = collect_frames(make_byte_stream(chunks)).await;
            assert_eq!(frames, whole, "chunk size {} altered frames", chunk_size);
        }
    }

    #[tokio::test]
    async fn test_unterminated_final_block_emitted_at_eof() {
        let stream = make_byte_stream(vec![b"data: tail".to_vec()]);
        let frames = collect_frames(stream).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "tail");
    }

    #[tokio::test]
    async fn test_read_error_surfaces() {
        let items: Vec<Result<Bytes, AgentError>> = vec![
            Ok(Bytes::from_static(b"data: a\n\n")),
            Err(AgentError::Network("connection reset".into())),
        ];
        let mut stream = FrameStream::new(futures::stream::iter(items));

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
    }
}
