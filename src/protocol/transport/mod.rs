//! Serial device abstraction used by the worker.
//!
//! The worker never talks to an OS handle directly: it owns a boxed
//! [`Transport`] produced by a [`TransportFactory`], and throws it away on
//! every close/reopen cycle when the platform requires it.

mod serial;
mod virtual_port;

pub use serial::{SerialPortFactory, SerialPortTransport};
pub use virtual_port::{LineOp, VirtualPeer, VirtualTransport, WriteRecord};

use derive_more::{Display, Error};
use std::{fmt, time::Duration};

use crate::protocol::settings::{DataBits, FlowControl, OpenMode, Parity, StopBits};

/// Classification of transport failures. The controller uses it to decide
/// whether an error should close the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TransportErrorKind {
    #[display("device not found")]
    NotFound,
    #[display("permission denied")]
    PermissionDenied,
    #[display("open error")]
    Open,
    #[display("read error")]
    Read,
    #[display("write error")]
    Write,
    #[display("resource error")]
    Resource,
    #[display("timeout")]
    Timeout,
    #[display("unsupported operation")]
    Unsupported,
    #[display("unknown error")]
    Unknown,
}

impl TransportErrorKind {
    /// Timeouts are expected during polling and never warrant closing the port.
    pub fn is_fatal(self) -> bool {
        !matches!(self, TransportErrorKind::Timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Map an I/O error, using `fallback` when the OS kind carries no
    /// serial-specific meaning.
    pub fn from_io(err: &std::io::Error, fallback: TransportErrorKind) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::NotFound => TransportErrorKind::NotFound,
            ErrorKind::PermissionDenied => TransportErrorKind::PermissionDenied,
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportErrorKind::Timeout,
            ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof | ErrorKind::NotConnected => {
                TransportErrorKind::Resource
            }
            ErrorKind::Unsupported => TransportErrorKind::Unsupported,
            _ => fallback,
        };
        Self::new(kind, err.to_string())
    }

    pub fn from_serialport(err: &serialport::Error, fallback: TransportErrorKind) -> Self {
        let kind = match err.kind() {
            serialport::ErrorKind::NoDevice => TransportErrorKind::NotFound,
            serialport::ErrorKind::InvalidInput => TransportErrorKind::Unsupported,
            serialport::ErrorKind::Io(io_kind) => {
                return Self::from_io(&std::io::Error::new(io_kind, err.description.clone()), fallback)
            }
            serialport::ErrorKind::Unknown => fallback,
        };
        Self::new(kind, err.description.clone())
    }

    pub fn not_open() -> Self {
        Self::new(TransportErrorKind::Resource, "port is not open")
    }
}

/// Snapshot of the modem/line status signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PinoutSignals(u16);

impl PinoutSignals {
    pub const NONE: PinoutSignals = PinoutSignals(0);
    pub const DTR: PinoutSignals = PinoutSignals(1 << 0);
    pub const RTS: PinoutSignals = PinoutSignals(1 << 1);
    pub const CTS: PinoutSignals = PinoutSignals(1 << 2);
    pub const DSR: PinoutSignals = PinoutSignals(1 << 3);
    pub const DCD: PinoutSignals = PinoutSignals(1 << 4);
    pub const RI: PinoutSignals = PinoutSignals(1 << 5);
    pub const BREAK: PinoutSignals = PinoutSignals(1 << 6);

    const NAMED: [(PinoutSignals, &'static str); 7] = [
        (PinoutSignals::DTR, "DTR"),
        (PinoutSignals::RTS, "RTS"),
        (PinoutSignals::CTS, "CTS"),
        (PinoutSignals::DSR, "DSR"),
        (PinoutSignals::DCD, "DCD"),
        (PinoutSignals::RI, "RI"),
        (PinoutSignals::BREAK, "BRK"),
    ];

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: PinoutSignals) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, flag: PinoutSignals, on: bool) {
        if on {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }

    pub fn with(mut self, flag: PinoutSignals, on: bool) -> Self {
        self.set(flag, on);
        self
    }

    /// All signal names paired with their current state, in display order.
    pub fn states(self) -> impl Iterator<Item = (&'static str, bool)> {
        Self::NAMED
            .into_iter()
            .map(move |(flag, name)| (name, self.contains(flag)))
    }
}

impl std::ops::BitOr for PinoutSignals {
    type Output = PinoutSignals;

    fn bitor(self, rhs: PinoutSignals) -> PinoutSignals {
        PinoutSignals(self.0 | rhs.0)
    }
}

impl fmt::Display for PinoutSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active: Vec<&str> = self
            .states()
            .filter_map(|(name, on)| on.then_some(name))
            .collect();
        if active.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", active.join(" "))
        }
    }
}

/// Handle to one serial device. Implementations are single-owner: exactly
/// one worker drives a given instance.
pub trait Transport: Send {
    fn port_name(&self) -> &str;
    fn set_port_name(&mut self, name: &str);

    fn open(&mut self, mode: OpenMode) -> Result<(), TransportError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn is_writable(&self) -> bool;

    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;
    fn flush(&mut self) -> Result<(), TransportError>;

    /// Block up to `timeout` until at least one byte can be read.
    fn wait_for_readable(&mut self, timeout: Duration) -> Result<bool, TransportError>;
    /// Drain whatever is currently buffered; never blocks.
    fn read_all(&mut self) -> Result<Vec<u8>, TransportError>;

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError>;
    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<(), TransportError>;
    fn set_parity(&mut self, parity: Parity) -> Result<(), TransportError>;
    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<(), TransportError>;
    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), TransportError>;

    fn set_data_terminal_ready(&mut self, on: bool) -> Result<(), TransportError>;
    fn set_request_to_send(&mut self, on: bool) -> Result<(), TransportError>;
    fn pinout_signals(&mut self) -> Result<PinoutSignals, TransportError>;
}

/// Builds fresh transports; the worker calls it at startup and whenever the
/// handle has to be recreated around a reopen.
pub trait TransportFactory: Send {
    fn create(&self) -> Box<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Box<dyn Transport> + Send,
{
    fn create(&self) -> Box<dyn Transport> {
        self()
    }
}
