use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// TCP listener whose accept observes a stop flag.
///
/// The socket is non-blocking and polled, so `accept_until` returns within
/// one poll interval of the flag being cleared. Accepted streams are switched
/// back to blocking mode.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    poll_interval: Duration,
}

impl TcpAcceptor {
    /// Default time between accept polls.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

    /// Bind and listen on `addr`.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let bind_err = |source| TransportError::Bind { addr, source };
        let listener = TcpListener::bind(addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!(%local_addr, "listening");

        Ok(Self {
            listener,
            local_addr,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override the accept poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Wait for the next connection while `running` stays true.
    ///
    /// Returns `Ok(None)` once `running` is cleared.
    pub fn accept_until(&self, running: &AtomicBool) -> Result<Option<(TcpStream, SocketAddr)>> {
        loop {
            if !running.load(Ordering::SeqCst) {
                return Ok(None);
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    debug!(%peer, "accepted connection");
                    return Ok(Some((stream, peer)));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(self.poll_interval);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Accept(err)),
            }
        }
    }

    /// The bound address (with the OS-assigned port when bound to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
