//! PAM4 relay node.
//!
//! This is the layer that turns the signal, frame and transport crates into a
//! running hop: accept sources, bind them to logical channel slots, process
//! each stream in isolation and fan the result out. An optional control
//! channel lets an administrator toggle impairment injection and watch what
//! each hop forwards.

pub mod binding;
pub mod config;
pub mod control;
pub mod error;
pub mod node;
pub mod pipeline;

pub use binding::{Binding, SourceBinding, DEFAULT_FALLBACK_SLOT, DEFAULT_SLOT_CAPACITY};
pub use config::{ImpairmentSpec, RelayConfig, Stage, DEFAULT_LISTEN_PORT};
pub use control::{
    AdminEvent, AdminHandle, AdminServer, ControlClient, ControlCommand, ControlEvent,
    CMD_ERROR_OFF, CMD_ERROR_ON, DEFAULT_RECONNECT_DELAY, INFO_PREFIX, RELAY_ADDR_KEY,
};
pub use error::{RelayError, Result};
pub use node::{join_logged, reap_finished, NodeStats, RelayNode};
pub use pipeline::{ConnectionPipeline, Hop};
