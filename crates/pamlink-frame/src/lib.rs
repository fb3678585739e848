//! Fixed-length frame reassembly.
//!
//! Frames carry no in-band length: every frame is exactly N bytes and both
//! ends know N out of band (68 by default, a 4-byte marker plus 64 payload
//! bytes). Boundaries are determined purely by byte count.
//!
//! Callers feed whatever their reads return; complete frames come out.

pub mod assembler;
pub mod error;
pub mod frame;

pub use assembler::{FrameAssembler, Frames};
pub use error::{FrameError, Result};
pub use frame::{Frame, FrameConfig, DEFAULT_FRAME_LEN, DEFAULT_HEADER_LEN, FRAME_MARKER};
