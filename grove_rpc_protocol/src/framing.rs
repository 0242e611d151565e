// Length-delimited frame encoding over TCP (plain or TLS).
//
// Wire format: a 4-byte big-endian length prefix followed by a JSON-serialized
// frame (`message.rs`). `write_message` and `read_message` operate on raw
// bytes; the caller handles JSON separately, keeping this module
// format-agnostic.
//
// `read_message` is for blocking readers (the server's per-connection
// threads). The client reads with socket timeouts so its worker can notice a
// shutdown between waits; a timed-out `read_exact` would lose the bytes it had
// already consumed, so the client feeds whatever arrives into a
// `FrameDecoder` and pulls complete frames out of it instead.
//
// `MAX_MESSAGE_SIZE` (16 MiB) bounds the allocation a length prefix can
// trigger.

use std::io::{self, Read, Write};

/// Largest frame body either side will send or accept (16 MiB).
pub const MAX_MESSAGE_SIZE: u32 = 16 << 20;

const LENGTH_PREFIX: usize = 4;

/// Frame `body` and write it in one `write_all`, then flush.
///
/// Bodies over `MAX_MESSAGE_SIZE` are refused with `InvalidInput` before
/// anything reaches the stream.
pub fn write_message<W: Write>(writer: &mut W, body: &[u8]) -> io::Result<()> {
    let prefix = u32::try_from(body.len())
        .ok()
        .filter(|n| *n <= MAX_MESSAGE_SIZE)
        .ok_or_else(|| oversized(io::ErrorKind::InvalidInput, body.len()))?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX + body.len());
    frame.extend_from_slice(&prefix.to_be_bytes());
    frame.extend_from_slice(body);
    writer.write_all(&frame)?;
    writer.flush()
}

/// Block until one whole frame has been read and return its body.
///
/// A stream that ends mid-frame yields `UnexpectedEof`; an oversized prefix
/// yields `InvalidData` without allocating the body.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; LENGTH_PREFIX];
    reader.read_exact(&mut prefix)?;
    let mut body = vec![0u8; body_len(prefix)?];
    reader.read_exact(&mut body)?;
    Ok(body)
}

fn body_len(prefix: [u8; LENGTH_PREFIX]) -> io::Result<usize> {
    let len = u32::from_be_bytes(prefix);
    if len > MAX_MESSAGE_SIZE {
        return Err(oversized(io::ErrorKind::InvalidData, len as usize));
    }
    Ok(len as usize)
}

fn oversized(kind: io::ErrorKind, len: usize) -> io::Error {
    io::Error::new(
        kind,
        format!("frame of {len} bytes exceeds the {MAX_MESSAGE_SIZE}-byte limit"),
    )
}

/// Accumulates raw bytes from a stream and yields complete frames.
///
/// Partial frames stay buffered across calls, so a reader can be interrupted
/// by a timeout at any byte boundary without desynchronizing the stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.buf.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&self.buf[..LENGTH_PREFIX]);
        let end = LENGTH_PREFIX + body_len(prefix)?;
        if self.buf.len() < end {
            return Ok(None);
        }
        let frame = self.buf[LENGTH_PREFIX..end].to_vec();
        self.buf.drain(..end);
        Ok(Some(frame))
    }

    /// Drop any buffered bytes (used after the connection is replaced).
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
