//! In-memory serial line.
//!
//! A [`VirtualPeer`] is the far end of the cable: it injects inbound bytes,
//! records what the terminal wrote (with timestamps), can echo or answer
//! canned requests, and doubles as a [`TransportFactory`] handing out
//! [`VirtualTransport`]s that all share the same line.

use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use super::{PinoutSignals, Transport, TransportError, TransportErrorKind, TransportFactory};
use crate::protocol::settings::{DataBits, FlowControl, OpenMode, Parity, StopBits};

/// One `write()` call observed on the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub bytes: Vec<u8>,
    pub at: Instant,
}

/// Operations applied to the line, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOp {
    Open(String),
    Close,
    BaudRate(u32),
    DataBits(DataBits),
    Parity(Parity),
    StopBits(StopBits),
    FlowControl(FlowControl),
    Dtr(bool),
    Rts(bool),
}

#[derive(Default)]
struct LineState {
    inbound: VecDeque<u8>,
    writes: Vec<WriteRecord>,
    ops: Vec<LineOp>,
    created: usize,
    remote_signals: PinoutSignals,
    dtr: bool,
    rts: bool,
    echo: bool,
    responses: Vec<(Vec<u8>, Vec<u8>)>,
    open_failure: Option<TransportErrorKind>,
    read_failure: Option<TransportErrorKind>,
    stall_writes: Option<Duration>,
}

impl LineState {
    fn outbound_ends_with(&self, trigger: &[u8]) -> bool {
        let mut tail: Vec<u8> = Vec::with_capacity(trigger.len());
        for record in self.writes.iter().rev() {
            for &b in record.bytes.iter().rev() {
                tail.push(b);
                if tail.len() == trigger.len() {
                    tail.reverse();
                    return tail == trigger;
                }
            }
        }
        false
    }
}

type SharedLine = Arc<(Mutex<LineState>, Condvar)>;

/// The remote end of a virtual serial line.
#[derive(Clone, Default)]
pub struct VirtualPeer {
    line: SharedLine,
}

impl VirtualPeer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A peer that reflects every byte it receives.
    pub fn echo() -> Self {
        let peer = Self::new();
        peer.set_echo(true);
        peer
    }

    pub fn transport(&self) -> VirtualTransport {
        self.line.0.lock().created += 1;
        VirtualTransport {
            name: String::new(),
            line: Arc::clone(&self.line),
            mode: None,
        }
    }

    /// Make `bytes` available to the terminal side.
    pub fn inject(&self, bytes: &[u8]) {
        let (lock, cond) = &*self.line;
        lock.lock().inbound.extend(bytes.iter().copied());
        cond.notify_all();
    }

    pub fn set_echo(&self, on: bool) {
        self.line.0.lock().echo = on;
    }

    /// Queue `response` whenever the outbound stream ends with `trigger`.
    pub fn respond_to(&self, trigger: &[u8], response: &[u8]) {
        self.line
            .0
            .lock()
            .responses
            .push((trigger.to_vec(), response.to_vec()));
    }

    /// Inputs asserted by the remote side (CTS, DSR, DCD, RI).
    pub fn set_remote_signals(&self, signals: PinoutSignals) {
        self.line.0.lock().remote_signals = signals;
    }

    /// Make every subsequent open fail with `kind`; `None` restores success.
    pub fn set_open_failure(&self, kind: Option<TransportErrorKind>) {
        self.line.0.lock().open_failure = kind;
    }

    /// Make the next drain report a read failure (e.g. a pulled cable).
    pub fn fail_next_read(&self, kind: TransportErrorKind) {
        self.line.0.lock().read_failure = Some(kind);
    }

    /// Block every write for `delay`, simulating a wedged driver.
    pub fn stall_writes(&self, delay: Option<Duration>) {
        self.line.0.lock().stall_writes = delay;
    }

    /// Concatenation of everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.line
            .0
            .lock()
            .writes
            .iter()
            .flat_map(|record| record.bytes.iter().copied())
            .collect()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.line.0.lock().writes.clone()
    }

    pub fn ops(&self) -> Vec<LineOp> {
        self.line.0.lock().ops.clone()
    }

    /// Number of transports handed out so far.
    pub fn created(&self) -> usize {
        self.line.0.lock().created
    }

    pub fn pending_inbound(&self) -> usize {
        self.line.0.lock().inbound.len()
    }
}

impl TransportFactory for VirtualPeer {
    fn create(&self) -> Box<dyn Transport> {
        Box::new(self.transport())
    }
}

/// Terminal-side handle of a virtual line.
pub struct VirtualTransport {
    name: String,
    line: SharedLine,
    mode: Option<OpenMode>,
}

impl VirtualTransport {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.mode.is_some() {
            Ok(())
        } else {
            Err(TransportError::not_open())
        }
    }

    fn record(&self, op: LineOp) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.line.0.lock().ops.push(op);
        Ok(())
    }
}

impl Transport for VirtualTransport {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn set_port_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn open(&mut self, mode: OpenMode) -> Result<(), TransportError> {
        let mut line = self.line.0.lock();
        if let Some(kind) = line.open_failure {
            return Err(TransportError::new(
                kind,
                format!("cannot open virtual port '{}'", self.name),
            ));
        }
        line.ops.push(LineOp::Open(self.name.clone()));
        line.dtr = true;
        line.rts = true;
        self.mode = Some(mode);
        Ok(())
    }

    fn close(&mut self) {
        if self.mode.take().is_some() {
            self.line.0.lock().ops.push(LineOp::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.mode.is_some()
    }

    fn is_writable(&self) -> bool {
        self.mode.is_some_and(OpenMode::is_writable)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        self.ensure_open()?;
        let stall = self.line.0.lock().stall_writes;
        if let Some(delay) = stall {
            std::thread::sleep(delay);
        }
        let (lock, cond) = &*self.line;
        let mut line = lock.lock();
        line.writes.push(WriteRecord {
            bytes: bytes.to_vec(),
            at: Instant::now(),
        });
        if line.echo {
            line.inbound.extend(bytes.iter().copied());
        }
        let replies: Vec<Vec<u8>> = line
            .responses
            .iter()
            .filter(|(trigger, _)| !trigger.is_empty() && line.outbound_ends_with(trigger))
            .map(|(_, response)| response.clone())
            .collect();
        for reply in replies {
            line.inbound.extend(reply);
        }
        cond.notify_all();
        Ok(bytes.len())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.ensure_open()
    }

    fn wait_for_readable(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        let (lock, cond) = &*self.line;
        let mut line = lock.lock();
        while line.inbound.is_empty() && line.read_failure.is_none() {
            if cond.wait_until(&mut line, deadline).timed_out() {
                break;
            }
        }
        Ok(!line.inbound.is_empty() || line.read_failure.is_some())
    }

    fn read_all(&mut self) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        let mut line = self.line.0.lock();
        if let Some(kind) = line.read_failure.take() {
            return Err(TransportError::new(kind, "virtual line read failure"));
        }
        Ok(line.inbound.drain(..).collect())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        self.record(LineOp::BaudRate(baud_rate))
    }

    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<(), TransportError> {
        self.record(LineOp::DataBits(data_bits))
    }

    fn set_parity(&mut self, parity: Parity) -> Result<(), TransportError> {
        self.record(LineOp::Parity(parity))
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<(), TransportError> {
        self.record(LineOp::StopBits(stop_bits))
    }

    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), TransportError> {
        self.record(LineOp::FlowControl(flow_control))
    }

    fn set_data_terminal_ready(&mut self, on: bool) -> Result<(), TransportError> {
        self.record(LineOp::Dtr(on))?;
        self.line.0.lock().dtr = on;
        Ok(())
    }

    fn set_request_to_send(&mut self, on: bool) -> Result<(), TransportError> {
        self.record(LineOp::Rts(on))?;
        self.line.0.lock().rts = on;
        Ok(())
    }

    fn pinout_signals(&mut self) -> Result<PinoutSignals, TransportError> {
        self.ensure_open()?;
        let line = self.line.0.lock();
        Ok(line
            .remote_signals
            .with(PinoutSignals::DTR, line.dtr)
            .with(PinoutSignals::RTS, line.rts))
    }
}
