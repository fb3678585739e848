use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::dialer::{Dialer, TcpDialer};
use crate::error::{Result, TransportError};
use crate::target::ForwardTarget;

/// Delay between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Granularity at which a retry pause checks the running flag.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Tunables for a [`PersistentForwarder`] using [`TcpDialer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderConfig {
    pub retry_delay: Duration,
    pub connect_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            connect_timeout: Some(Duration::from_secs(3)),
            write_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// A logical outbound sink bound to one destination.
///
/// The connection is opened lazily by the first [`send`](Self::send) and
/// reopened whenever a write fails. Connecting retries forever with a fixed
/// delay; the only way out of that loop is success or the running flag being
/// cleared. A single lock covers connect, write and reconnect, so at most one
/// connection exists and writes from concurrent senders never interleave.
pub struct PersistentForwarder<D: Dialer = TcpDialer> {
    target: ForwardTarget,
    dialer: D,
    retry_delay: Duration,
    link: Mutex<Option<D::Stream>>,
    running: Option<Arc<AtomicBool>>,
    connects: AtomicU64,
}

impl PersistentForwarder<TcpDialer> {
    pub fn new(target: ForwardTarget, config: &ForwarderConfig) -> Self {
        let dialer = TcpDialer::new(config.connect_timeout, config.write_timeout);
        Self::with_dialer(target, dialer, config.retry_delay)
    }
}

impl<D: Dialer> PersistentForwarder<D> {
    pub fn with_dialer(target: ForwardTarget, dialer: D, retry_delay: Duration) -> Self {
        Self {
            target,
            dialer,
            retry_delay,
            link: Mutex::new(None),
            running: None,
            connects: AtomicU64::new(0),
        }
    }

    /// Abort connect retries once `running` is cleared.
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    /// Write `bytes` to the destination as one contiguous unit.
    ///
    /// Blocks until connected. If the write fails, the connection is dropped,
    /// re-established, and the write is attempted exactly once more before
    /// [`TransportError::Send`] is returned.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);

        let stream = match link.take() {
            Some(stream) => stream,
            None => self.connect()?,
        };
        let stream = link.insert(stream);
        match write_all(stream, bytes) {
            Ok(()) => {
                debug!(dest = %self.target, len = bytes.len(), "forwarded");
                return Ok(());
            }
            Err(err) => {
                warn!(dest = %self.target, error = %err, "write failed, reconnecting");
                *link = None;
            }
        }

        let stream = link.insert(self.connect()?);
        match write_all(stream, bytes) {
            Ok(()) => {
                debug!(dest = %self.target, len = bytes.len(), "forwarded after reconnect");
                Ok(())
            }
            Err(source) => {
                *link = None;
                Err(TransportError::Send {
                    target: self.target.clone(),
                    source,
                })
            }
        }
    }

    /// Whether a connection handle is currently held.
    pub fn is_connected(&self) -> bool {
        self.link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Drop the current connection, if any. The next send reconnects.
    pub fn disconnect(&self) {
        let dropped = self
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if dropped.is_some() {
            debug!(dest = %self.target, "forwarder disconnected");
        }
    }

    pub fn target(&self) -> &ForwardTarget {
        &self.target
    }

    /// Number of connections established over this forwarder's lifetime.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    fn connect(&self) -> Result<D::Stream> {
        let mut attempt: u64 = 0;
        loop {
            if !self.is_running() {
                return Err(TransportError::Shutdown);
            }
            attempt += 1;
            match self.dialer.dial(&self.target) {
                Ok(stream) => {
                    self.connects.fetch_add(1, Ordering::Relaxed);
                    info!(dest = %self.target, attempt, "forwarder connected");
                    return Ok(stream);
                }
                Err(err) => {
                    warn!(
                        dest = %self.target,
                        attempt,
                        error = %err,
                        retry_in_ms = self.retry_delay.as_millis() as u64,
                        "connect failed"
                    );
                    self.pause();
                }
            }
        }
    }

    fn pause(&self) {
        let deadline = Instant::now() + self.retry_delay;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(STOP_POLL));
        }
    }

    fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_none_or(|running| running.load(Ordering::SeqCst))
    }
}

impl<D: Dialer> std::fmt::Debug for PersistentForwarder<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentForwarder")
            .field("target", &self.target)
            .field("retry_delay", &self.retry_delay)
            .field("connects", &self.connect_count())
            .finish_non_exhaustive()
    }
}

fn write_all<W: Write>(stream: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_all(bytes)?;
    stream.flush()
}
