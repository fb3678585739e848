use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pamlink_frame::{FrameAssembler, FrameConfig};
use pamlink_relay::{join_logged, reap_finished, SourceBinding};
use pamlink_signal::{classify_chunk, WireMode};
use pamlink_transport::TcpAcceptor;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, ListenArgs};
use crate::exit::{frame_error, relay_error, transport_error, CliResult, SUCCESS};
use crate::output::{now_unix_seconds, print_record, ChunkText, OutputFormat, Record};

const READ_TIMEOUT: Duration = Duration::from_millis(200);
const READ_CHUNK_SIZE: usize = 4 * 1024;

/// One chunk (or reassembled frame) as received from a source.
#[derive(Debug, Serialize)]
struct Received {
    timestamp: String,
    peer: SocketAddr,
    slot: usize,
    len: usize,
    #[serde(flatten)]
    chunk: ChunkText,
    #[serde(skip)]
    wire: Vec<u8>,
}

impl Record for Received {
    fn columns(&self) -> Vec<(&'static str, String)> {
        vec![
            ("timestamp", self.timestamp.clone()),
            ("peer", self.peer.to_string()),
            ("slot", self.slot.to_string()),
            ("len", self.len.to_string()),
            ("content", self.chunk.summary()),
        ]
    }

    fn raw(&self) -> Vec<u8> {
        self.wire.clone()
    }
}

struct Source {
    peer: SocketAddr,
    slot: usize,
    wire_mode: WireMode,
    frames: Option<FrameConfig>,
}

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let frames = match args.frame_len {
        Some(frame_len) => {
            let config = FrameConfig::new(frame_len, args.header_len);
            config
                .validate()
                .map_err(|err| frame_error("invalid frame geometry", err))?;
            Some(config)
        }
        None => None,
    };
    let bindings = Arc::new(
        SourceBinding::new(args.slots, args.fallback_slot)
            .map_err(|err| relay_error("invalid slot configuration", err))?,
    );
    let acceptor =
        TcpAcceptor::bind(args.listen).map_err(|err| transport_error("bind failed", err))?;
    info!(listen = %acceptor.local_addr(), "listening");

    let running = install_ctrlc_handler()?;
    let (tx, rx) = mpsc::channel::<Received>();

    let accept_thread = {
        let running = Arc::clone(&running);
        let wire_mode = args.wire_mode;
        thread::Builder::new()
            .name("pamlink-accept".to_string())
            .spawn(move || accept_loop(&acceptor, &bindings, &running, wire_mode, frames, tx))
            .map_err(|err| crate::exit::io_error("failed to spawn accept thread", err))?
    };

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let received = match rx.recv_timeout(READ_TIMEOUT) {
            Ok(received) => received,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        print_record(&received, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    drop(rx);
    join_logged(accept_thread);
    Ok(SUCCESS)
}

fn accept_loop(
    acceptor: &TcpAcceptor,
    bindings: &SourceBinding,
    running: &Arc<AtomicBool>,
    wire_mode: WireMode,
    frames: Option<FrameConfig>,
    tx: Sender<Received>,
) {
    let mut handlers = Vec::new();
    loop {
        let (stream, peer) = match acceptor.accept_until(running) {
            Ok(Some(accepted)) => accepted,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "accept failed");
                thread::sleep(acceptor.poll_interval());
                continue;
            }
        };

        let binding = bindings.bind(peer.ip());
        info!(%peer, slot = binding.slot, aliased = binding.aliased, "source connected");
        let source = Source {
            peer,
            slot: binding.slot,
            wire_mode,
            frames: frames.clone(),
        };
        let running = Arc::clone(running);
        let tx = tx.clone();
        match thread::Builder::new()
            .name(format!("pamlink-listen-{}", binding.slot))
            .spawn(move || read_source(source, stream, &running, &tx))
        {
            Ok(handle) => handlers.push(handle),
            Err(err) => warn!(%peer, error = %err, "failed to spawn reader"),
        }
        reap_finished(&mut handlers);
    }

    for handle in handlers {
        join_logged(handle);
    }
}

fn read_source(source: Source, mut stream: TcpStream, running: &AtomicBool, tx: &Sender<Received>) {
    if let Err(err) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
        warn!(peer = %source.peer, error = %err, "failed to set read timeout");
        return;
    }
    let mut assembler = match source.frames.as_ref().map(FrameAssembler::new).transpose() {
        Ok(assembler) => assembler,
        Err(err) => {
            warn!(peer = %source.peer, error = %err, "frame assembler setup failed");
            return;
        }
    };

    let mut buf = [0u8; READ_CHUNK_SIZE];
    while running.load(Ordering::SeqCst) {
        let read = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue
            }
            Err(err) => {
                debug!(peer = %source.peer, error = %err, "read failed");
                break;
            }
        };

        let chunks: Vec<Vec<u8>> = match assembler.as_mut() {
            Some(assembler) => assembler
                .feed(&buf[..read])
                .map(|frame| frame.payload().to_vec())
                .collect(),
            None => vec![buf[..read].to_vec()],
        };
        for wire in chunks {
            if tx.send(source.describe(wire)).is_err() {
                return;
            }
        }
    }
    info!(peer = %source.peer, slot = source.slot, "source disconnected");
}

impl Source {
    fn describe(&self, wire: Vec<u8>) -> Received {
        let symbols = self.wire_mode.from_wire(&wire);
        Received {
            timestamp: now_unix_seconds(),
            peer: self.peer,
            slot: self.slot,
            len: wire.len(),
            chunk: classify_chunk(&symbols).into(),
            wire,
        }
    }
}

#[cfg(test)]
mod tests {
    use pamlink_signal::{encode_text, SymbolWidth};

    use super::*;

    fn source(wire_mode: WireMode) -> Source {
        Source {
            peer: "127.0.0.1:4000".parse().unwrap(),
            slot: 2,
            wire_mode,
            frames: None,
        }
    }

    #[test]
    fn describes_text_chunk() {
        let wire = encode_text("hola", SymbolWidth::Pam4);
        let received = source(WireMode::Unpacked).describe(wire);
        assert_eq!(received.len, 16);
        assert_eq!(received.chunk.summary(), "[pam4] hola");

        let json = serde_json::to_value(&received).unwrap();
        assert_eq!(json["slot"], 2);
        assert_eq!(json["kind"], "text");
        assert_eq!(json["text"], "hola");
        assert!(json.get("wire").is_none());
    }

    #[test]
    fn packed_chunks_are_unpacked_before_classifying() {
        let symbols = encode_text("OK", SymbolWidth::Pam4);
        let wire = WireMode::Packed.to_wire(&symbols);
        let received = source(WireMode::Packed).describe(wire.clone());
        assert_eq!(received.len, wire.len());
        assert_eq!(received.chunk.summary(), "[pam4] OK");
        assert_eq!(received.raw(), wire);
    }
}
