use std::path::PathBuf;

/// Errors that can occur while configuring or running a relay node.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] pamlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] pamlink_frame::FrameError),

    /// Signal configuration error.
    #[error("signal error: {0}")]
    Signal(#[from] pamlink_signal::SignalError),

    /// The node configuration is inconsistent.
    #[error("invalid relay configuration: {0}")]
    InvalidConfig(String),

    /// A configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No relay is attached to the admin control server.
    #[error("no relay connected to the control channel")]
    NoRelay,

    /// I/O error on a relay or control socket.
    #[error("relay I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
