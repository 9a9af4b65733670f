//! Message framing for the game-client socket.
//!
//! Requests end with a whitespace-delimited `END` token. Whitespace between
//! requests (the newline after the previous `END`) belongs to neither and is
//! skipped. A request that grows past the configured buffer size is discarded
//! and reported as [`Inbound::Oversized`].

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const SENTINEL: &[u8] = b"END";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(String),
    Oversized(usize),
    /// Bytes left without a sentinel when the peer closed its side.
    Truncated(usize),
}

#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_len: usize,
    // Bytes already scanned without finding a sentinel.
    next_index: usize,
}

impl FrameCodec {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            next_index: 0,
        }
    }

    fn find_sentinel(&self, buf: &[u8]) -> Option<usize> {
        let n = SENTINEL.len();
        let mut i = self.next_index;
        while i + n <= buf.len() {
            if &buf[i..i + n] == SENTINEL {
                let starts_token = i == 0 || buf[i - 1].is_ascii_whitespace();
                let ends_token = i + n == buf.len() || buf[i + n].is_ascii_whitespace();
                if starts_token && ends_token {
                    return Some(i + n);
                }
            }
            i += 1;
        }
        None
    }
}

impl Decoder for FrameCodec {
    type Item = Inbound;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Inbound>> {
        let lead = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
        if lead > 0 {
            src.advance(lead);
            self.next_index = self.next_index.saturating_sub(lead);
        }

        if let Some(end) = self.find_sentinel(src) {
            self.next_index = 0;
            let frame = src.split_to(end);
            if frame.len() > self.max_len {
                return Ok(Some(Inbound::Oversized(frame.len())));
            }
            return Ok(Some(Inbound::Frame(
                String::from_utf8_lossy(&frame).into_owned(),
            )));
        }

        if src.len() > self.max_len {
            self.next_index = 0;
            let dropped = src.split_to(src.len());
            return Ok(Some(Inbound::Oversized(dropped.len())));
        }

        // Rescan the tail next time in case the sentinel straddles reads.
        self.next_index = src.len().saturating_sub(SENTINEL.len());
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<Inbound>> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        self.next_index = 0;
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split_to(src.len());
        Ok(Some(Inbound::Truncated(rest.len())))
    }
}

impl Encoder<String> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> io::Result<()> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}
