use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Default frame length: marker (4) + payload (64).
pub const DEFAULT_FRAME_LEN: usize = 68;

/// Default header length.
pub const DEFAULT_HEADER_LEN: usize = 4;

/// Marker conventionally placed in the header by transmitters.
///
/// The assembler never inspects it; consumers may.
pub const FRAME_MARKER: [u8; 4] = *b"hola";

/// A complete fixed-length frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    header_len: usize,
}

impl Frame {
    pub(crate) fn new(data: Bytes, header_len: usize) -> Self {
        Self { data, header_len }
    }

    /// Build a frame from a header and a payload.
    pub fn from_parts(header: &[u8], payload: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(header.len() + payload.len());
        buf.put_slice(header);
        buf.put_slice(payload);
        Self::new(buf.freeze(), header.len())
    }

    /// Total frame length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The opaque header bytes.
    pub fn header(&self) -> &[u8] {
        &self.data[..self.header_len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[self.header_len..]
    }

    /// Whether the header equals [`FRAME_MARKER`].
    pub fn has_marker(&self) -> bool {
        self.header() == FRAME_MARKER
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Frame geometry.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Bytes per frame. Default: 68.
    pub frame_len: usize,
    /// Leading bytes reported as header. Default: 4.
    pub header_len: usize,
}

impl FrameConfig {
    pub fn new(frame_len: usize, header_len: usize) -> Self {
        Self {
            frame_len,
            header_len,
        }
    }

    /// Bytes per frame after the header.
    pub fn payload_len(&self) -> usize {
        self.frame_len.saturating_sub(self.header_len)
    }

    /// Reject a zero frame length or a header longer than the frame.
    pub fn validate(&self) -> Result<()> {
        if self.frame_len == 0 || self.header_len > self.frame_len {
            return Err(FrameError::InvalidConfig {
                frame_len: self.frame_len,
                header_len: self.header_len,
            });
        }
        Ok(())
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_LEN, DEFAULT_HEADER_LEN)
    }
}
