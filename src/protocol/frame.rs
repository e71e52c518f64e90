//! NETCONF message framing as specified in RFC 6242.
//!
//! This module implements both framing layouts used on a NETCONF transport:
//!
//! - End-of-message framing (protocol version 1.0): each message is followed
//!   by the six-byte literal `]]>]]>`.
//! - Chunked framing (protocol version 1.1): each message is a run of
//!   `\n#<size>\n<data>` chunks terminated by `\n##\n`.
//!
//! The decoder is an incremental state machine fed from transport reads of a
//! configurable size, so a delimiter or chunk header split across reads is
//! reassembled transparently. A session starts in end-of-message framing and
//! may switch to chunked framing after capability exchange; the decoder keeps
//! the switch pending until the message currently on the wire completes, so a
//! `<hello>` that is still in flight is never torn.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::FrameError;
use crate::trace::Trace;

/// End-of-message delimiter used by NETCONF 1.0 framing.
pub const END_OF_MESSAGE: &[u8] = b"]]>]]>";

/// End-of-chunks marker used by NETCONF 1.1 framing.
pub const END_OF_CHUNKS: &[u8] = b"\n##\n";

/// Largest chunk size representable on the wire.
pub const MAX_CHUNK_SIZE: u64 = u32::MAX as u64;

/// Widest serialized chunk-size field accepted by the decoder.
const MAX_CHUNK_SIZE_DIGITS: usize = 10;

/// Smallest accepted transport read-buffer size.
pub const MIN_READ_BUFFER: usize = 64;

/// Default transport read-buffer size.
pub const DEFAULT_READ_BUFFER: usize = 8192;

/// Framing layout of a NETCONF byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Messages terminated by `]]>]]>` (NETCONF 1.0).
    EndOfMessage,
    /// Size-prefixed chunks terminated by `\n##\n` (NETCONF 1.1).
    Chunked,
}

/// Outcome of examining the buffered bytes for a chunk header.
enum ChunkHeader {
    /// The buffer does not yet hold a complete header.
    Incomplete,
    /// A data chunk of the given size follows.
    Data(u64),
    /// The `\n##\n` end-of-chunks marker was consumed.
    EndOfChunks,
}

/// Decoder half of the framing codec.
///
/// Turns a framed transport byte stream into a sequence of raw XML message
/// payloads. The framing mode can be switched between messages via
/// [`FrameReader::set_framing`].
pub struct FrameReader<R> {
    inner: R,
    framing: Framing,
    /// Mode to promote at the next end-of-message boundary.
    pending: Option<Framing>,
    /// Bytes read from the transport but not yet consumed.
    buf: Vec<u8>,
    /// Data bytes still owed by the chunk currently being decoded.
    chunk_remaining: u64,
    /// Whether any end-of-message has been consumed on this stream.
    seen_message: bool,
    eof: bool,
    /// Deliver a partial trailing message instead of failing at EOF.
    eof_ok: bool,
    read_size: usize,
    trace: Arc<Trace>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Creates a decoder in end-of-message framing with default buffering.
    pub fn new(inner: R) -> Self {
        FrameReader {
            inner,
            framing: Framing::EndOfMessage,
            pending: None,
            buf: Vec::new(),
            chunk_remaining: 0,
            seen_message: false,
            eof: false,
            eof_ok: false,
            read_size: DEFAULT_READ_BUFFER,
            trace: Arc::new(Trace::default()),
        }
    }

    /// Sets the transport read-buffer size, clamped to [`MIN_READ_BUFFER`].
    pub fn with_read_buffer(mut self, size: usize) -> Self {
        self.read_size = size.max(MIN_READ_BUFFER);
        self
    }

    /// Tolerate a stream that ends mid-message: the partial payload is
    /// delivered as a final message instead of an `unexpected EOF` error.
    pub fn with_partial_final_message(mut self, allow: bool) -> Self {
        self.eof_ok = allow;
        self
    }

    /// Installs the trace hooks fired around transport reads.
    pub fn with_trace(mut self, trace: Arc<Trace>) -> Self {
        self.trace = trace;
        self
    }

    /// Requests a framing switch.
    ///
    /// Before the first end-of-message has been consumed the switch is kept
    /// pending and promoted once the message currently being received
    /// completes; afterwards it takes effect immediately.
    pub fn set_framing(&mut self, framing: Framing) {
        if self.seen_message {
            self.framing = framing;
            self.pending = None;
        } else {
            self.pending = Some(framing);
        }
    }

    /// Currently active framing mode.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Decodes the next complete message payload.
    ///
    /// Returns `Ok(None)` when the transport reaches EOF cleanly at a message
    /// boundary. EOF inside a message yields [`FrameError::UnexpectedEof`]
    /// unless the reader was built with
    /// [`with_partial_final_message`](Self::with_partial_final_message).
    pub async fn next_message(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        match self.framing {
            Framing::EndOfMessage => self.next_end_of_message().await,
            Framing::Chunked => self.next_chunked().await,
        }
    }

    async fn next_end_of_message(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut payload = Vec::new();
        loop {
            if let Some(pos) = find(&self.buf, END_OF_MESSAGE) {
                payload.extend_from_slice(&self.buf[..pos]);
                self.buf.drain(..pos + END_OF_MESSAGE.len());
                self.finish_message();
                return Ok(Some(payload));
            }

            // Everything except a possible partial delimiter at the tail is
            // settled payload; the tail is re-examined after the next read.
            let keep = partial_suffix(&self.buf, END_OF_MESSAGE);
            let settled = self.buf.len() - keep;
            payload.extend_from_slice(&self.buf[..settled]);
            self.buf.drain(..settled);

            if self.eof {
                if payload.is_empty() && self.buf.is_empty() {
                    return Ok(None);
                }
                if self.eof_ok {
                    payload.append(&mut self.buf);
                    trace!("delivering {} partial bytes at EOF", payload.len());
                    return Ok(Some(payload));
                }
                return Err(FrameError::UnexpectedEof);
            }
            self.fill().await?;
        }
    }

    async fn next_chunked(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut payload = Vec::new();
        // True until any byte of this message has been consumed; EOF is only
        // clean on a message boundary.
        let mut at_boundary = true;
        loop {
            if self.chunk_remaining > 0 {
                if self.buf.is_empty() {
                    if self.eof {
                        return Err(FrameError::UnexpectedEof);
                    }
                    self.fill().await?;
                    continue;
                }
                let take = usize::try_from(self.chunk_remaining)
                    .unwrap_or(usize::MAX)
                    .min(self.buf.len());
                payload.extend_from_slice(&self.buf[..take]);
                self.buf.drain(..take);
                self.chunk_remaining -= take as u64;
                continue;
            }

            match self.parse_chunk_header()? {
                ChunkHeader::Incomplete => {
                    if self.eof {
                        if at_boundary && self.buf.is_empty() {
                            return Ok(None);
                        }
                        return Err(FrameError::UnexpectedEof);
                    }
                    self.fill().await?;
                }
                ChunkHeader::Data(size) => {
                    self.chunk_remaining = size;
                    at_boundary = false;
                }
                ChunkHeader::EndOfChunks => {
                    self.finish_message();
                    return Ok(Some(payload));
                }
            }
        }
    }

    /// Examines the buffer for a chunk header, consuming it when complete.
    fn parse_chunk_header(&mut self) -> Result<ChunkHeader, FrameError> {
        if self.buf.is_empty() {
            return Ok(ChunkHeader::Incomplete);
        }
        if self.buf[0] != b'\n' {
            return Err(FrameError::InvalidChunkHeader);
        }
        if self.buf.len() < 2 {
            return Ok(ChunkHeader::Incomplete);
        }
        if self.buf[1] != b'#' {
            return Err(FrameError::InvalidChunkHeader);
        }
        if self.buf.len() < 3 {
            return Ok(ChunkHeader::Incomplete);
        }
        if self.buf[2] == b'#' {
            if self.buf.len() < 4 {
                return Ok(ChunkHeader::Incomplete);
            }
            if self.buf[3] != b'\n' {
                return Err(FrameError::InvalidChunkHeader);
            }
            self.buf.drain(..END_OF_CHUNKS.len());
            return Ok(ChunkHeader::EndOfChunks);
        }
        if !self.buf[2].is_ascii_digit() {
            return Err(FrameError::InvalidChunkSize);
        }

        let mut size: u64 = 0;
        let mut idx = 2;
        loop {
            if idx - 2 > MAX_CHUNK_SIZE_DIGITS {
                return Err(FrameError::TokenTooLong);
            }
            if idx >= self.buf.len() {
                return Ok(ChunkHeader::Incomplete);
            }
            match self.buf[idx] {
                b'\n' => {
                    if size == 0 {
                        return Err(FrameError::InvalidChunkSize);
                    }
                    self.buf.drain(..=idx);
                    return Ok(ChunkHeader::Data(size));
                }
                b @ b'0'..=b'9' => {
                    size = size * 10 + u64::from(b - b'0');
                    if size > MAX_CHUNK_SIZE {
                        return Err(FrameError::ChunkSizeTooLarge);
                    }
                }
                _ => return Err(FrameError::InvalidChunkSize),
            }
            idx += 1;
        }
    }

    /// Marks an end-of-message boundary and promotes a pending mode switch.
    fn finish_message(&mut self) {
        self.seen_message = true;
        if let Some(next) = self.pending.take() {
            trace!("promoting framing mode to {:?}", next);
            self.framing = next;
        }
    }

    /// Reads more bytes from the transport into the buffer.
    async fn fill(&mut self) -> Result<(), FrameError> {
        let mut chunk = vec![0u8; self.read_size];
        self.trace.on_read_start(self.read_size);
        let n = self.inner.read(&mut chunk).await?;
        self.trace.on_read_done(n);
        if n == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }
}

/// Encoder half of the framing codec.
///
/// In end-of-message mode writes pass through unchanged and
/// [`end_of_message`](FrameWriter::end_of_message) appends `]]>]]>`. In
/// chunked mode each write is split into size-prefixed chunks of at most
/// `max_chunk_size` bytes and `end_of_message` appends `\n##\n`.
pub struct FrameWriter<W> {
    inner: W,
    framing: Framing,
    max_chunk_size: u64,
    trace: Arc<Trace>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Creates an encoder in end-of-message framing.
    pub fn new(inner: W) -> Self {
        FrameWriter {
            inner,
            framing: Framing::EndOfMessage,
            max_chunk_size: MAX_CHUNK_SIZE,
            trace: Arc::new(Trace::default()),
        }
    }

    /// Caps the data portion of emitted chunks, clamped to
    /// `1..=`[`MAX_CHUNK_SIZE`].
    pub fn with_max_chunk_size(mut self, size: u64) -> Self {
        self.max_chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    /// Installs the trace hooks fired around sink writes.
    pub fn with_trace(mut self, trace: Arc<Trace>) -> Self {
        self.trace = trace;
        self
    }

    /// Switches the framing mode. The encoder is only ever switched between
    /// messages, so the change takes effect immediately.
    pub fn set_framing(&mut self, framing: Framing) {
        self.framing = framing;
    }

    /// Currently active framing mode.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Writes message payload bytes. A zero-length write is a no-op.
    pub async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        match self.framing {
            Framing::EndOfMessage => self.sink_write(data).await,
            Framing::Chunked => {
                let max = usize::try_from(self.max_chunk_size).unwrap_or(usize::MAX);
                for chunk in data.chunks(max) {
                    let header = format!("\n#{}\n", chunk.len());
                    self.sink_write(header.as_bytes()).await?;
                    self.sink_write(chunk).await?;
                }
                Ok(())
            }
        }
    }

    /// Terminates the current message and flushes the sink.
    pub async fn end_of_message(&mut self) -> std::io::Result<()> {
        match self.framing {
            Framing::EndOfMessage => self.sink_write(END_OF_MESSAGE).await?,
            Framing::Chunked => self.sink_write(END_OF_CHUNKS).await?,
        }
        self.inner.flush().await
    }

    /// Shuts down the underlying transport write half.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.inner.shutdown().await
    }

    /// Consumes the encoder and returns the wrapped sink.
    pub fn into_inner(self) -> W {
        self.inner
    }

    async fn sink_write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.trace.on_write_start(data.len());
        let res = self.inner.write_all(data).await;
        self.trace.on_write_done(if res.is_ok() { data.len() } else { 0 });
        res
    }
}

/// Finds the first occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Length of the longest proper prefix of `delim` that `buf` ends with.
fn partial_suffix(buf: &[u8], delim: &[u8]) -> usize {
    let max = delim.len().saturating_sub(1).min(buf.len());
    for len in (1..=max).rev() {
        if buf[buf.len() - len..] == delim[..len] {
            return len;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    async fn decode_all(input: &[u8], read_size: usize) -> Vec<Vec<u8>> {
        let mut reader = FrameReader::new(input).with_read_buffer(read_size);
        let mut messages = Vec::new();
        while let Some(msg) = reader.next_message().await.expect("decode") {
            messages.push(msg);
        }
        messages
    }

    async fn encode(framing: Framing, max_chunk: u64, payloads: &[&[u8]]) -> Vec<u8> {
        let mut writer = FrameWriter::new(Vec::new()).with_max_chunk_size(max_chunk);
        writer.set_framing(framing);
        for payload in payloads {
            writer.write_all(payload).await.expect("write");
            writer.end_of_message().await.expect("end of message");
        }
        writer.inner
    }

    #[tokio::test]
    async fn end_of_message_round_trip() {
        let wire = encode(Framing::EndOfMessage, MAX_CHUNK_SIZE, &[b"<hello/>"]).await;
        assert_eq!(wire, b"<hello/>]]>]]>");
        assert_eq!(decode_all(&wire, MIN_READ_BUFFER).await, vec![b"<hello/>".to_vec()]);
    }

    #[tokio::test]
    async fn partial_delimiter_is_payload() {
        let payload: &[u8] = b"<a>]]>]] inside</a>";
        let wire = encode(Framing::EndOfMessage, MAX_CHUNK_SIZE, &[payload]).await;
        assert_eq!(decode_all(&wire, MIN_READ_BUFFER).await, vec![payload.to_vec()]);
    }

    #[tokio::test]
    async fn concatenated_messages_decode_in_order() {
        for framing in [Framing::EndOfMessage, Framing::Chunked] {
            let wire = encode(framing, MAX_CHUNK_SIZE, &[b"<one/>", b"<two/>"]).await;
            let mut reader = FrameReader::new(&wire[..]).with_read_buffer(MIN_READ_BUFFER);
            reader.framing = framing;
            assert_eq!(
                reader.next_message().await.expect("first").expect("some"),
                b"<one/>"
            );
            assert_eq!(
                reader.next_message().await.expect("second").expect("some"),
                b"<two/>"
            );
            assert_eq!(reader.next_message().await.expect("eof"), None);
        }
    }

    #[tokio::test]
    async fn chunk_boundaries_are_invisible() {
        let payload = b"<rpc><edit-config><config/></edit-config></rpc>".as_slice();
        let mut wires = Vec::new();
        for max_chunk in [1, 3, 7, 1024] {
            let wire = encode(Framing::Chunked, max_chunk, &[payload]).await;
            let mut reader = FrameReader::new(&wire[..]).with_read_buffer(MIN_READ_BUFFER);
            reader.framing = Framing::Chunked;
            assert_eq!(
                reader.next_message().await.expect("decode").expect("some"),
                payload
            );
            wires.push(wire);
        }
        // Different chunking produces different wire bytes for the same payload.
        assert_ne!(wires[0], wires[3]);
    }

    #[tokio::test]
    async fn chunked_wire_format() {
        let wire = encode(Framing::Chunked, 4, &[b"abcdefgh"]).await;
        assert_eq!(wire, b"\n#4\nabcd\n#4\nefgh\n##\n");
    }

    #[tokio::test]
    async fn chunk_header_errors() {
        let cases: &[(&[u8], fn(&FrameError) -> bool)] = &[
            (b"X", |e| matches!(e, FrameError::InvalidChunkHeader)),
            (b"12345678", |e| matches!(e, FrameError::InvalidChunkHeader)),
            (b"123456789", |e| matches!(e, FrameError::InvalidChunkHeader)),
            (b"\nX", |e| matches!(e, FrameError::InvalidChunkHeader)),
            (b"\n#A", |e| matches!(e, FrameError::InvalidChunkSize)),
            (b"\n#0\n", |e| matches!(e, FrameError::InvalidChunkSize)),
            (b"\n#42949672978\n", |e| matches!(e, FrameError::ChunkSizeTooLarge)),
            (b"\n#00000000000001\n", |e| matches!(e, FrameError::TokenTooLong)),
        ];
        for (input, check) in cases {
            let mut reader = FrameReader::new(*input).with_read_buffer(MIN_READ_BUFFER);
            reader.framing = Framing::Chunked;
            let err = reader.next_message().await.expect_err("must fail");
            assert!(check(&err), "input {:?} produced {:?}", input, err);
        }
    }

    #[tokio::test]
    async fn eof_mid_message_is_an_error() {
        let mut reader = FrameReader::new(&b"<unfinished"[..]);
        let err = reader.next_message().await.expect_err("must fail");
        assert!(matches!(err, FrameError::UnexpectedEof));
    }

    #[tokio::test]
    async fn eof_mid_message_tolerated_when_configured() {
        let mut reader = FrameReader::new(&b"<unfinished"[..]).with_partial_final_message(true);
        assert_eq!(
            reader.next_message().await.expect("partial").expect("some"),
            b"<unfinished"
        );
        assert_eq!(reader.next_message().await.expect("eof"), None);
    }

    #[tokio::test]
    async fn pending_switch_waits_for_end_of_message() {
        let mut wire = b"<hello/>]]>]]>".to_vec();
        wire.extend_from_slice(b"\n#6\n<rpc/>\n##\n");

        let mut reader = FrameReader::new(&wire[..]).with_read_buffer(MIN_READ_BUFFER);
        // Requested before any message completed: must stay pending so the
        // in-flight hello is still decoded with end-of-message framing.
        reader.set_framing(Framing::Chunked);
        assert_eq!(reader.framing(), Framing::EndOfMessage);
        assert_eq!(
            reader.next_message().await.expect("hello").expect("some"),
            b"<hello/>"
        );
        assert_eq!(reader.framing(), Framing::Chunked);
        assert_eq!(
            reader.next_message().await.expect("rpc").expect("some"),
            b"<rpc/>"
        );
    }

    #[tokio::test]
    async fn switch_after_first_message_is_immediate() {
        let mut reader = FrameReader::new(&b"<a/>]]>]]>"[..]);
        reader.next_message().await.expect("decode").expect("some");
        reader.set_framing(Framing::Chunked);
        assert_eq!(reader.framing(), Framing::Chunked);
    }

    #[tokio::test]
    async fn delimiter_split_across_reads() {
        // A read size of 64 with a payload crossing it forces the delimiter
        // to arrive in two pieces.
        let payload = vec![b'x'; 61];
        let mut wire = payload.clone();
        wire.extend_from_slice(END_OF_MESSAGE);
        let messages = decode_all(&wire, MIN_READ_BUFFER).await;
        assert_eq!(messages, vec![payload]);
    }

    #[tokio::test]
    async fn zero_length_write_is_a_no_op() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.set_framing(Framing::Chunked);
        writer.write_all(b"").await.expect("write");
        assert!(writer.inner.is_empty());
    }
}
