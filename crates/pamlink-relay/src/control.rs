//! Line-oriented control channel between relays and an administrator.
//!
//! The relay dials the administrator, announces itself with an `INFO:` line
//! and then accepts `MODO_ERROR_ON` / `MODO_ERROR_OFF` commands. In the other
//! direction it streams report lines describing what it forwarded.

use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use pamlink_transport::{Dialer, ForwardTarget, TcpAcceptor, TcpDialer};
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};

/// Command: enable impairment injection.
pub const CMD_ERROR_ON: &str = "MODO_ERROR_ON";
/// Command: disable impairment injection.
pub const CMD_ERROR_OFF: &str = "MODO_ERROR_OFF";
/// Prefix of announcement lines.
pub const INFO_PREFIX: &str = "INFO:";
/// Announcement key carrying the relay's own address.
pub const RELAY_ADDR_KEY: &str = "RELAY_ADDR";

/// Report prefix for a chunk as received.
pub const REPORT_ORIGINAL: &str = "CANAL (original): ";
/// Report prefix for a chunk as forwarded.
pub const REPORT_MODULATED: &str = "CANAL (modulado): ";
const REPORT_OK: &str = "[OK] forwarded to ";
const REPORT_ERROR: &str = "[ERROR] forward to ";
const REPORT_ERROR_SEP: &str = " failed: ";

/// Delay before a relay redials a lost administrator.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

const READ_POLL: Duration = Duration::from_millis(200);

/// Administrator → relay command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    ErrorModeOn,
    ErrorModeOff,
    /// `INFO:<body>` announcement.
    Info(String),
}

impl ControlCommand {
    /// Parse one line; surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        match line {
            CMD_ERROR_ON => Some(ControlCommand::ErrorModeOn),
            CMD_ERROR_OFF => Some(ControlCommand::ErrorModeOff),
            _ => line
                .strip_prefix(INFO_PREFIX)
                .map(|body| ControlCommand::Info(body.to_string())),
        }
    }

    /// Wire form, newline-terminated.
    pub fn to_line(&self) -> String {
        match self {
            ControlCommand::ErrorModeOn => format!("{CMD_ERROR_ON}\n"),
            ControlCommand::ErrorModeOff => format!("{CMD_ERROR_OFF}\n"),
            ControlCommand::Info(body) => format!("{INFO_PREFIX}{body}\n"),
        }
    }

    pub fn error_mode(enabled: bool) -> Self {
        if enabled {
            ControlCommand::ErrorModeOn
        } else {
            ControlCommand::ErrorModeOff
        }
    }
}

/// Relay → administrator report line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// `INFO:KEY=VALUE`.
    Announce { key: String, value: String },
    /// A chunk as received, hex encoded.
    Original(String),
    /// A chunk as forwarded, hex encoded.
    Modulated(String),
    Forwarded { target: String },
    ForwardFailed { target: String, error: String },
    /// Anything else, verbatim.
    Other(String),
}

impl ControlEvent {
    pub fn original(bytes: &[u8]) -> Self {
        ControlEvent::Original(hex::encode(bytes))
    }

    pub fn modulated(bytes: &[u8]) -> Self {
        ControlEvent::Modulated(hex::encode(bytes))
    }

    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(body) = line.strip_prefix(INFO_PREFIX) {
            let (key, value) = body.split_once('=').unwrap_or((body, ""));
            return ControlEvent::Announce {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
            };
        }
        if let Some(hex) = line.strip_prefix(REPORT_ORIGINAL) {
            return ControlEvent::Original(hex.trim().to_string());
        }
        if let Some(hex) = line.strip_prefix(REPORT_MODULATED) {
            return ControlEvent::Modulated(hex.trim().to_string());
        }
        if let Some(target) = line.strip_prefix(REPORT_OK) {
            return ControlEvent::Forwarded {
                target: target.to_string(),
            };
        }
        if let Some((target, error)) = line
            .strip_prefix(REPORT_ERROR)
            .and_then(|rest| rest.split_once(REPORT_ERROR_SEP))
        {
            return ControlEvent::ForwardFailed {
                target: target.to_string(),
                error: error.to_string(),
            };
        }
        ControlEvent::Other(line.to_string())
    }

    /// Wire form, newline-terminated.
    pub fn to_line(&self) -> String {
        match self {
            ControlEvent::Announce { key, value } => format!("{INFO_PREFIX}{key}={value}\n"),
            ControlEvent::Original(hex) => format!("{REPORT_ORIGINAL}{hex}\n"),
            ControlEvent::Modulated(hex) => format!("{REPORT_MODULATED}{hex}\n"),
            ControlEvent::Forwarded { target } => format!("{REPORT_OK}{target}\n"),
            ControlEvent::ForwardFailed { target, error } => {
                format!("{REPORT_ERROR}{target}{REPORT_ERROR_SEP}{error}\n")
            }
            ControlEvent::Other(line) => format!("{line}\n"),
        }
    }

    /// Decoded bytes of an `Original` or `Modulated` report.
    pub fn payload(&self) -> Option<Vec<u8>> {
        match self {
            ControlEvent::Original(encoded) | ControlEvent::Modulated(encoded) => {
                hex::decode(encoded).ok()
            }
            _ => None,
        }
    }
}

/// Relay end of the control channel.
///
/// [`spawn`](Self::spawn) keeps a connection to the administrator alive,
/// redialing after a delay whenever it drops, and applies received commands
/// to the shared error-mode flag. [`report`](Self::report) is best-effort:
/// with no live connection reports are dropped.
pub struct ControlClient {
    admin: ForwardTarget,
    dialer: TcpDialer,
    reconnect_delay: Duration,
    error_mode: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    writer: Mutex<Option<TcpStream>>,
}

impl ControlClient {
    pub fn new(admin: ForwardTarget, error_mode: Arc<AtomicBool>, running: Arc<AtomicBool>) -> Self {
        Self {
            admin,
            dialer: TcpDialer::new(Some(Duration::from_secs(3)), Some(Duration::from_secs(2))),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            error_mode,
            running,
            writer: Mutex::new(None),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Run the connection loop on its own thread until the running flag clears.
    pub fn spawn(self: Arc<Self>) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("pamlink-control".to_string())
            .spawn(move || self.run())
    }

    /// Send a report line if the administrator is connected.
    pub fn report(&self, event: &ControlEvent) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(stream) = writer.as_mut() else {
            return;
        };
        if let Err(err) = stream.write_all(event.to_line().as_bytes()) {
            debug!(admin = %self.admin, error = %err, "control report dropped");
            *writer = None;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn run(&self) {
        while self.running.load(Ordering::SeqCst) {
            match self.dialer.dial(&self.admin) {
                Ok(stream) => {
                    if let Err(err) = self.session(stream) {
                        warn!(admin = %self.admin, error = %err, "control session ended");
                    }
                    self.writer
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                }
                Err(err) => {
                    debug!(admin = %self.admin, error = %err, "control connect failed");
                }
            }
            self.pause();
        }
        debug!(admin = %self.admin, "control client stopped");
    }

    fn session(&self, stream: TcpStream) -> io::Result<()> {
        stream.set_read_timeout(Some(READ_POLL))?;
        let local_ip = stream.local_addr()?.ip();
        let mut writer = stream.try_clone()?;
        writer.write_all(
            ControlCommand::Info(format!("{RELAY_ADDR_KEY}={local_ip}"))
                .to_line()
                .as_bytes(),
        )?;
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(writer);
        info!(admin = %self.admin, %local_ip, "control channel connected");

        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        while self.running.load(Ordering::SeqCst) {
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => {
                    info!(admin = %self.admin, "administrator closed control channel");
                    return Ok(());
                }
                Ok(_) if line.ends_with(b"\n") => {
                    self.apply(&String::from_utf8_lossy(&line));
                    line.clear();
                }
                Ok(_) => {}
                Err(err) if is_timeout(&err) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn apply(&self, line: &str) {
        match ControlCommand::parse(line) {
            Some(ControlCommand::ErrorModeOn) => {
                self.error_mode.store(true, Ordering::SeqCst);
                info!("error mode enabled by administrator");
            }
            Some(ControlCommand::ErrorModeOff) => {
                self.error_mode.store(false, Ordering::SeqCst);
                info!("error mode disabled by administrator");
            }
            Some(ControlCommand::Info(body)) => debug!(%body, "control info ignored"),
            None => debug!(line = line.trim(), "unrecognized control line"),
        }
    }

    fn pause(&self) {
        let deadline = Instant::now() + self.reconnect_delay;
        while self.running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(READ_POLL));
        }
    }
}

pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted)
}

/// What an [`AdminServer`] observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminEvent {
    Connected(SocketAddr),
    Line { relay: SocketAddr, event: ControlEvent },
    Disconnected(SocketAddr),
}

/// Sends commands to whichever relay is currently attached.
#[derive(Debug, Clone, Default)]
pub struct AdminHandle {
    relay: Arc<Mutex<Option<(SocketAddr, TcpStream)>>>,
}

impl AdminHandle {
    /// Send a command to the current relay.
    pub fn send(&self, command: &ControlCommand) -> Result<SocketAddr> {
        let mut relay = self.relay.lock().unwrap_or_else(PoisonError::into_inner);
        let (addr, stream) = relay.as_mut().ok_or(RelayError::NoRelay)?;
        let addr = *addr;
        if let Err(err) = stream.write_all(command.to_line().as_bytes()) {
            *relay = None;
            return Err(err.into());
        }
        debug!(relay = %addr, ?command, "command sent");
        Ok(addr)
    }

    /// Address of the attached relay, if any.
    pub fn relay(&self) -> Option<SocketAddr> {
        self.relay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(addr, _)| *addr)
    }

    fn attach(&self, addr: SocketAddr, stream: TcpStream) {
        let previous = self
            .relay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((addr, stream));
        if let Some((old, stream)) = previous {
            if let Err(err) = stream.shutdown(Shutdown::Both) {
                debug!(relay = %old, error = %err, "replaced control connection already closed");
            }
            info!(%old, new = %addr, "control relay replaced");
        }
    }

    fn detach(&self, addr: SocketAddr) {
        let mut relay = self.relay.lock().unwrap_or_else(PoisonError::into_inner);
        if relay.as_ref().is_some_and(|(current, _)| *current == addr) {
            *relay = None;
        }
    }
}

/// Administrator end of the control channel.
///
/// Accepts relay connections (the latest replaces the previous one as the
/// command target, and the previous socket is shut down) and turns their report lines into [`AdminEvent`]s.
pub struct AdminServer {
    acceptor: TcpAcceptor,
    handle: AdminHandle,
}

impl AdminServer {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            acceptor: TcpAcceptor::bind(addr)?,
            handle: AdminHandle::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// Handle for sending commands from other threads.
    pub fn handle(&self) -> AdminHandle {
        self.handle.clone()
    }

    /// Deliver events to `on_event` until `running` clears.
    pub fn serve<F>(&self, running: &AtomicBool, mut on_event: F) -> Result<()>
    where
        F: FnMut(&AdminHandle, AdminEvent),
    {
        let (tx, rx) = mpsc::channel::<AdminEvent>();

        std::thread::scope(|scope| {
            let acceptor = &self.acceptor;
            let handle = &self.handle;
            let accept_tx = tx.clone();

            scope.spawn(move || loop {
                let (stream, relay) = match acceptor.accept_until(running) {
                    Ok(Some(accepted)) => accepted,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "control accept failed");
                        std::thread::sleep(acceptor.poll_interval());
                        continue;
                    }
                };
                let writer = match stream
                    .set_read_timeout(Some(READ_POLL))
                    .and_then(|()| stream.try_clone())
                {
                    Ok(writer) => writer,
                    Err(err) => {
                        warn!(%relay, error = %err, "control connection setup failed");
                        continue;
                    }
                };
                handle.attach(relay, writer);
                let _ = accept_tx.send(AdminEvent::Connected(relay));

                let line_tx = accept_tx.clone();
                scope.spawn(move || {
                    read_reports(stream, relay, running, &line_tx);
                    handle.detach(relay);
                    let _ = line_tx.send(AdminEvent::Disconnected(relay));
                });
            });
            drop(tx);

            while running.load(Ordering::SeqCst) {
                match rx.recv_timeout(READ_POLL) {
                    Ok(event) => on_event(handle, event),
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });
        Ok(())
    }
}

fn read_reports(
    stream: TcpStream,
    relay: SocketAddr,
    running: &AtomicBool,
    tx: &mpsc::Sender<AdminEvent>,
) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    while running.load(Ordering::SeqCst) {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) if line.ends_with(b"\n") => {
                let event = ControlEvent::parse(&String::from_utf8_lossy(&line));
                line.clear();
                if tx.send(AdminEvent::Line { relay, event }).is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(err) if is_timeout(&err) => {}
            Err(err) => {
                debug!(%relay, error = %err, "control read failed");
                break;
            }
        }
    }
}
