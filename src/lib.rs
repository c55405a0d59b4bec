//! serterm: an RS-232 serial terminal.
//!
//! The crate is split into the wire side ([`protocol`]: port settings, the
//! transport abstraction and the background [`SerialWorker`]) and the
//! UI-independent data model ([`core`]: console histories and rendering,
//! multi-radix input, configuration). The `tui` module drives both from a
//! ratatui front end.

#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod core;
pub mod protocol;
#[doc(hidden)]
pub mod tui;

pub use protocol::{
    settings::PortSettings,
    transport::{Transport, TransportError, TransportFactory},
    worker::{SerialWorker, WorkerEvent, WorkerOptions},
};
