/// Errors that can occur during frame reassembly.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame geometry is unusable.
    #[error("invalid frame geometry (frame length {frame_len}, header length {header_len})")]
    InvalidConfig { frame_len: usize, header_len: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
