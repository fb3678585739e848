use std::fmt;
use std::io;

use pamlink_frame::FrameError;
use pamlink_relay::RelayError;
use pamlink_signal::SignalError;
use pamlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrInUse => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidTarget(_) => CliError::new(USAGE, format!("{context}: {err}")),
        TransportError::Shutdown => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::InvalidConfig { .. } => CliError::new(USAGE, format!("{context}: {err}")),
    }
}

pub fn signal_error(context: &str, err: SignalError) -> CliError {
    CliError::new(USAGE, format!("{context}: {err}"))
}

pub fn relay_error(context: &str, err: RelayError) -> CliError {
    match err {
        RelayError::Transport(err) => transport_error(context, err),
        RelayError::Frame(err) => frame_error(context, err),
        RelayError::Signal(err) => signal_error(context, err),
        RelayError::Io(err) => io_error(context, err),
        RelayError::ConfigRead { source, path } => {
            io_error(&format!("{context}: {}", path.display()), source)
        }
        RelayError::InvalidConfig(_) => CliError::new(USAGE, format!("{context}: {err}")),
        RelayError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        RelayError::NoRelay => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_conflict_maps_to_transport_code() {
        let err = TransportError::Bind {
            addr: "127.0.0.1:1".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert_eq!(transport_error("bind failed", err).code, TRANSPORT_ERROR);
    }

    #[test]
    fn config_errors_are_usage_or_data() {
        let usage = relay_error("config", RelayError::InvalidConfig("slots".to_string()));
        assert_eq!(usage.code, USAGE);
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(relay_error("config", RelayError::Json(json)).code, DATA_INVALID);
    }

    #[test]
    fn missing_config_file_is_internal_io() {
        let err = RelayError::ConfigRead {
            path: "/nope.json".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let cli = relay_error("load failed", err);
        assert_eq!(cli.code, INTERNAL);
        assert!(cli.message.contains("/nope.json"));
    }
}
