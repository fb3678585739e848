use bytes::{Bytes, BytesMut};

use crate::error::Result;
use crate::frame::{Frame, FrameConfig};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Turns an unbounded byte stream into fixed-length frames.
///
/// Bytes that do not yet fill a frame stay buffered across calls, so the
/// emitted frames depend only on the concatenated input, never on how it was
/// chunked. At all times
/// `total_fed() == total_emitted() + buffered()`.
#[derive(Debug)]
pub struct FrameAssembler {
    buf: BytesMut,
    frame_len: usize,
    header_len: usize,
    fed: u64,
    emitted: u64,
}

impl FrameAssembler {
    /// Create an assembler for the given geometry.
    pub fn new(config: &FrameConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY.max(config.frame_len)),
            frame_len: config.frame_len,
            header_len: config.header_len,
            fed: 0,
            emitted: 0,
        })
    }

    /// Append bytes and iterate over the frames now complete.
    ///
    /// The iterator is lazy: frames it does not yield stay buffered and are
    /// returned by the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Frames<'_> {
        self.push(bytes);
        Frames { assembler: self }
    }

    /// Append bytes without draining frames.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.fed += bytes.len() as u64;
    }

    /// Slice off the next complete frame, if any.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.buf.len() < self.frame_len {
            return None;
        }
        self.emitted += self.frame_len as u64;
        let data = self.buf.split_to(self.frame_len).freeze();
        Some(Frame::new(data, self.header_len))
    }

    /// Remove and return the incomplete remainder.
    pub fn take_remainder(&mut self) -> Bytes {
        let rest = self.buf.split().freeze();
        self.emitted += rest.len() as u64;
        rest
    }

    /// Bytes waiting for a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes ever fed.
    pub fn total_fed(&self) -> u64 {
        self.fed
    }

    /// Total bytes that have left the buffer, as frames or as a taken remainder.
    pub fn total_emitted(&self) -> u64 {
        self.emitted
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

/// Frames produced by one [`FrameAssembler::feed`] call.
#[derive(Debug)]
pub struct Frames<'a> {
    assembler: &'a mut FrameAssembler,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.assembler.next_frame()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.assembler.buffered() / self.assembler.frame_len;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Frames<'_> {}
