//! TCP transport for link hops.
//!
//! - [`TcpAcceptor`] listens with a bounded accept poll so a stop flag is
//!   observed promptly
//! - [`Dialer`] is the seam for opening outbound streams ([`TcpDialer`] in
//!   production)
//! - [`PersistentForwarder`] is a lazily connected, auto-reconnecting sink
//!
//! This is the lowest layer with side effects. Relay nodes build on it.

pub mod dialer;
pub mod error;
pub mod forwarder;
pub mod target;
pub mod tcp;

pub use dialer::{Dialer, TcpDialer};
pub use error::{Result, TransportError};
pub use forwarder::{ForwarderConfig, PersistentForwarder, DEFAULT_RETRY_DELAY};
pub use target::ForwardTarget;
pub use tcp::TcpAcceptor;
