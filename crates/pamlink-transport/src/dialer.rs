use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::target::ForwardTarget;

/// Opens outbound streams.
///
/// [`PersistentForwarder`](crate::PersistentForwarder) is generic over this
/// so connection behavior can be substituted without a network.
pub trait Dialer: Send + Sync {
    type Stream: Write + Send;

    /// Make one connection attempt.
    fn dial(&self, target: &ForwardTarget) -> io::Result<Self::Stream>;
}

/// Dials TCP, trying every resolved address in order.
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    /// Per-address connect timeout. `None` uses the OS default.
    pub connect_timeout: Option<Duration>,
    /// Write timeout applied to established streams.
    pub write_timeout: Option<Duration>,
}

impl TcpDialer {
    pub fn new(connect_timeout: Option<Duration>, write_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            write_timeout,
        }
    }
}

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    fn dial(&self, target: &ForwardTarget) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in (target.host.as_str(), target.port).to_socket_addrs()? {
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(self.write_timeout)?;
                    debug!(%target, %addr, "dialed");
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{target} resolved to no addresses"),
            )
        }))
    }
}
