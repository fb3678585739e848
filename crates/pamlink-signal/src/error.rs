/// Errors raised while parsing signal-layer configuration values.
///
/// The signal operations themselves are total; only textual configuration
/// (symbol widths, wire modes, level mappings) can be rejected.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The symbol width is neither 2-bit (PAM4) nor 3-bit (PAM8).
    #[error("unknown symbol width {0:?} (expected 2, 3, pam4 or pam8)")]
    UnknownSymbolWidth(String),

    /// The wire mode name is not recognized.
    #[error("unknown wire mode {0:?} (expected unpacked or packed)")]
    UnknownWireMode(String),

    /// The level mapping name is not recognized.
    #[error("unknown level mapping {0:?} (expected natural or gray)")]
    UnknownLevelMapping(String),
}

pub type Result<T> = std::result::Result<T, SignalError>;
