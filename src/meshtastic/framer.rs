//! Meshtastic serial stream framing.
//!
//! In protobuf mode the device writes `FromRadio` messages as
//!
//!   `0x94 0xC3 <len_hi> <len_lo> <protobuf bytes>`
//!
//! interleaved with plain-text debug output. [`StreamFramer`] is fed arbitrary chunks and
//! yields whole payloads, skipping anything that is not a valid header.
use bytes::{Buf, BytesMut};

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;

/// Largest payload the firmware will emit or accept
pub const MAX_FRAME_SIZE: usize = 512;

pub struct StreamFramer {
    buf: BytesMut,
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet framed
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete payload, if one is buffered. Garbage before a header and headers
    /// declaring an impossible length are discarded.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.buf.iter().position(|&b| b == START1) {
                Some(pos) => self.buf.advance(pos),
                None => {
                    self.buf.clear();
                    return None;
                }
            }
            if self.buf.len() < 4 {
                return None;
            }
            if self.buf[1] != START2 {
                self.buf.advance(1);
                continue;
            }
            let declared = ((self.buf[2] as usize) << 8) | self.buf[3] as usize;
            if declared == 0 || declared > MAX_FRAME_SIZE {
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < 4 + declared {
                return None;
            }
            self.buf.advance(4);
            return Some(self.buf.split_to(declared).to_vec());
        }
    }
}

/// Prefix `payload` with the stream header.
pub fn encode_frame(payload: &[u8]) -> anyhow::Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE {
        anyhow::bail!("payload too large ({} bytes)", payload.len());
    }
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&[
        START1,
        START2,
        (payload.len() >> 8) as u8,
        (payload.len() & 0xFF) as u8,
    ]);
    out.extend_from_slice(payload);
    Ok(out)
}
