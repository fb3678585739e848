//! Multi-hop PAM4 link simulator.
//!
//! A transmitter encodes bytes into PAM4 symbols, a chain of relay nodes
//! optionally corrupts and forwards the symbol stream, and a receiver
//! recovers the bytes from noisy observations.
//!
//! # Crate Structure
//!
//! - [`signal`]: symbol codec, wire packing, impairment models, adaptive demodulator
//! - [`frame`]: fixed-length frame reassembly
//! - [`transport`]: stop-aware TCP accept and persistent auto-reconnecting forwarders
//! - [`relay`]: relay nodes and the admin control channel (behind `relay` feature)

/// Re-export signal types.
pub mod signal {
    pub use pamlink_signal::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pamlink_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use pamlink_transport::*;
}

/// Re-export relay types (requires `relay` feature).
#[cfg(feature = "relay")]
pub mod relay {
    pub use pamlink_relay::*;
}
