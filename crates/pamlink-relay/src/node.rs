use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use pamlink_signal::ImpairmentModel;
use pamlink_transport::{PersistentForwarder, TcpAcceptor};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::binding::SourceBinding;
use crate::config::RelayConfig;
use crate::control::{is_timeout, ControlClient, ControlEvent};
use crate::error::Result;
use crate::pipeline::{ConnectionPipeline, Hop};

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Counters exposed for monitoring and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub connections: u64,
    pub bytes_in: u64,
    pub hops: u64,
    pub forward_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connections: AtomicU64,
    bytes_in: AtomicU64,
    hops: AtomicU64,
    forward_failures: AtomicU64,
}

struct Inner {
    config: RelayConfig,
    impairment: ImpairmentModel,
    bindings: SourceBinding,
    error_mode: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    forwarders: Vec<PersistentForwarder>,
    control: Option<Arc<ControlClient>>,
    counters: Counters,
}

/// One relay hop.
///
/// Accepts inbound sources, binds each to a logical channel slot, runs every
/// connection through its own [`ConnectionPipeline`] and fans the output out
/// to all configured forwarders. Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct RelayNode {
    inner: Arc<Inner>,
}

impl RelayNode {
    /// Build a node. Nothing is bound or dialed yet.
    ///
    /// Clearing `running` stops the accept loop, connection handlers,
    /// forwarder retries and the control client.
    pub fn new(config: RelayConfig, running: Arc<AtomicBool>) -> Result<Self> {
        config.validate()?;
        let impairment = config.impairment.resolve();
        let bindings = SourceBinding::new(config.slots, config.fallback_slot)?;
        let error_mode = Arc::new(AtomicBool::new(config.error_mode));

        let forwarder_config = config.forwarder_config();
        let forwarders = config
            .forward
            .iter()
            .map(|target| {
                PersistentForwarder::new(target.clone(), &forwarder_config)
                    .with_running_flag(Arc::clone(&running))
            })
            .collect();

        let control = config.control.clone().map(|admin| {
            Arc::new(
                ControlClient::new(admin, Arc::clone(&error_mode), Arc::clone(&running))
                    .with_reconnect_delay(config.control_reconnect()),
            )
        });

        info!(
            listen = %config.listen,
            stage = %config.stage,
            impairment = %impairment,
            forwards = config.forward.len(),
            "relay node configured"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                impairment,
                bindings,
                error_mode,
                running,
                forwarders,
                control,
                counters: Counters::default(),
            }),
        })
    }

    /// Bind the configured listen address.
    pub fn bind(&self) -> Result<TcpAcceptor> {
        let acceptor = TcpAcceptor::bind(self.inner.config.listen)?
            .with_poll_interval(self.inner.config.accept_poll());
        Ok(acceptor)
    }

    /// Bind, start the control client and serve until stopped.
    pub fn run(&self) -> Result<()> {
        let acceptor = self.bind()?;
        let control = self.start_control()?;
        self.accept_loop(&acceptor);
        if let Some(handle) = control {
            join_logged(handle);
        }
        Ok(())
    }

    /// Start the control client thread, when an administrator is configured.
    pub fn start_control(&self) -> Result<Option<JoinHandle<()>>> {
        match &self.inner.control {
            Some(client) => Ok(Some(Arc::clone(client).spawn()?)),
            None => Ok(None),
        }
    }

    /// Accept sources until the running flag clears, one thread each.
    ///
    /// Accept failures are logged and retried. Returns after every connection
    /// handler has exited.
    pub fn accept_loop(&self, acceptor: &TcpAcceptor) {
        let mut handlers: Vec<JoinHandle<()>> = Vec::new();
        let mut next_conn: u64 = 0;

        loop {
            let (stream, peer) = match acceptor.accept_until(&self.inner.running) {
                Ok(Some(accepted)) => accepted,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    std::thread::sleep(acceptor.poll_interval());
                    continue;
                }
            };

            next_conn += 1;
            let conn_id = next_conn;
            let inner = Arc::clone(&self.inner);
            let spawned = std::thread::Builder::new()
                .name(format!("pamlink-conn-{conn_id}"))
                .spawn(move || inner.handle_connection(conn_id, stream, peer));
            match spawned {
                Ok(handle) => handlers.push(handle),
                Err(err) => warn!(%peer, error = %err, "failed to spawn connection handler"),
            }
            reap_finished(&mut handlers);
        }

        for handle in handlers {
            join_logged(handle);
        }
        info!("relay node stopped");
    }

    pub fn error_mode(&self) -> bool {
        self.inner.error_mode.load(Ordering::SeqCst)
    }

    pub fn set_error_mode(&self, enabled: bool) {
        self.inner.error_mode.store(enabled, Ordering::SeqCst);
        info!(enabled, "error mode changed");
    }

    pub fn bindings(&self) -> &SourceBinding {
        &self.inner.bindings
    }

    pub fn impairment(&self) -> &ImpairmentModel {
        &self.inner.impairment
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> NodeStats {
        let c = &self.inner.counters;
        NodeStats {
            connections: c.connections.load(Ordering::Relaxed),
            bytes_in: c.bytes_in.load(Ordering::Relaxed),
            hops: c.hops.load(Ordering::Relaxed),
            forward_failures: c.forward_failures.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    fn handle_connection(&self, conn_id: u64, mut stream: TcpStream, peer: SocketAddr) {
        self.counters.connections.fetch_add(1, Ordering::Relaxed);
        let binding = self.bindings.bind(peer.ip());
        let slot = binding.slot;
        if binding.aliased && binding.newly_assigned {
            warn!(
                %peer,
                slot,
                capacity = self.bindings.capacity(),
                "slot pool exhausted; source aliased to fallback slot"
            );
        }
        info!(%peer, slot, conn = conn_id, "source connected");

        let mut pipeline =
            match ConnectionPipeline::for_connection(&self.config, self.impairment.clone(), conn_id) {
                Ok(pipeline) => pipeline,
                Err(err) => {
                    warn!(%peer, error = %err, "connection pipeline setup failed");
                    return;
                }
            };
        if let Err(err) = stream.set_read_timeout(Some(self.config.read_timeout())) {
            warn!(%peer, error = %err, "failed to set read timeout");
            return;
        }

        let mut buf = [0u8; READ_CHUNK_SIZE];
        while self.running.load(Ordering::SeqCst) {
            let read = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if is_timeout(&err) => continue,
                Err(err) => {
                    debug!(%peer, error = %err, "source read failed");
                    break;
                }
            };
            self.counters.bytes_in.fetch_add(read as u64, Ordering::Relaxed);
            debug!(%peer, slot, len = read, "chunk received");

            let impair = self.error_mode.load(Ordering::SeqCst);
            for hop in pipeline.process(&buf[..read], impair) {
                self.deliver(slot, &hop);
            }
        }

        let pending = pipeline.pending();
        if pending > 0 {
            debug!(%peer, slot, pending, "discarding incomplete input");
        }
        info!(%peer, slot, conn = conn_id, "source disconnected");
    }

    fn deliver(&self, slot: usize, hop: &Hop) {
        self.counters.hops.fetch_add(1, Ordering::Relaxed);
        if let Some(stats) = &hop.stats {
            info!(
                slot,
                symbols = stats.compared,
                errors = stats.error_count(),
                error_pct = stats.error_percent(),
                model = self.impairment.name(),
                "impairment applied"
            );
        }
        if let Some(control) = &self.control {
            control.report(&ControlEvent::original(&hop.original));
            control.report(&ControlEvent::modulated(&hop.delivered));
        }

        for forwarder in &self.forwarders {
            let target = forwarder.target().to_string();
            match forwarder.send(&hop.delivered) {
                Ok(()) => {
                    if let Some(control) = &self.control {
                        control.report(&ControlEvent::Forwarded { target });
                    }
                }
                Err(err) => {
                    self.counters.forward_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(slot, dest = %target, error = %err, "forward failed");
                    if let Some(control) = &self.control {
                        control.report(&ControlEvent::ForwardFailed {
                            target,
                            error: err.to_string(),
                        });
                    }
                }
            }
        }
    }
}

/// Join a worker thread, logging instead of propagating a panic.
///
/// Returns `false` when the thread panicked.
pub fn join_logged(handle: JoinHandle<()>) -> bool {
    let thread = handle.thread().name().unwrap_or("unnamed").to_string();
    match handle.join() {
        Ok(()) => true,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            warn!(%thread, %reason, "worker thread panicked");
            false
        }
    }
}

/// Join and drop handles whose threads have already exited.
pub fn reap_finished(handles: &mut Vec<JoinHandle<()>>) {
    let (finished, live): (Vec<_>, Vec<_>) =
        handles.drain(..).partition(|handle| handle.is_finished());
    *handles = live;
    for handle in finished {
        join_logged(handle);
    }
}
