// Splits the raw serial byte stream into `$`-started packets

use log::debug;

/// Every packet starts with this byte; there is no end delimiter.
pub const FRAME_SENTINEL: u8 = b'$';

/// Sentinel-less input is dropped once it grows past this size, and so is a
/// single packet longer than this.
pub const MAX_UNFRAMED_BYTES: usize = 2000;

/// Accumulates transport bytes and yields complete packets.
///
/// A packet is complete once the next sentinel has arrived, so the last
/// packet in the buffer is always held back until more bytes show up.
/// A partial packet is cleared by `reset`, or dropped once it outgrows
/// [`MAX_UNFRAMED_BYTES`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Append `bytes` and return an iterator over the packets they complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Frames<'_> {
        self.push(bytes);
        Frames { decoder: self }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pull the next complete packet out of the buffer, sentinel included.
    pub fn next_frame(&mut self) -> Option<String> {
        loop {
            let Some(first) = self.buffer.iter().position(|b| *b == FRAME_SENTINEL) else {
                if self.buffer.len() > MAX_UNFRAMED_BYTES {
                    debug!(
                        "Discarding {} buffered bytes with no packet sentinel",
                        self.buffer.len()
                    );
                    self.buffer.clear();
                }
                return None;
            };
            if first > 0 {
                self.buffer.drain(..first);
            }

            let Some(end) = self.buffer[1..]
                .iter()
                .position(|b| *b == FRAME_SENTINEL)
                .map(|i| i + 1)
            else {
                if self.buffer.len() > MAX_UNFRAMED_BYTES {
                    debug!(
                        "Discarding unterminated packet of {} bytes",
                        self.buffer.len()
                    );
                    self.buffer.clear();
                }
                return None;
            };
            if end > MAX_UNFRAMED_BYTES {
                debug!("Discarding oversized packet of {} bytes", end);
                self.buffer.drain(..end);
                continue;
            }
            let frame: Vec<u8> = self.buffer.drain(..end).collect();
            return Some(String::from_utf8_lossy(&frame).into_owned());
        }
    }

    /// Bytes held back waiting for the rest of their packet
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame()
    }
}
