use flume::Sender;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use super::{
    byte_log::{ByteLog, Direction},
    command::{Command, LineRequest, Pacing},
    event::WorkerEvent,
    WorkerOptions,
};
use crate::protocol::{
    settings::{FlowControl, OpenMode, PortSettings},
    transport::{PinoutSignals, Transport, TransportError, TransportFactory},
};

const IDLE_SLEEP: Duration = Duration::from_millis(10);
const RECREATE_SETTLE: Duration = Duration::from_millis(50);

/// What the worker publishes about the port for status queries.
#[derive(Debug, Clone, Default)]
pub(crate) struct PortStatus {
    pub open: bool,
    pub description: String,
    pub pinout: PinoutSignals,
}

/// Everything guarded by the single worker lock.
pub(crate) struct WorkerState {
    pub command: Command,
    pub write_queue: VecDeque<u8>,
    pub write_total: usize,
    pub write_sent: usize,
    pub read_buffer: Vec<u8>,
    pub settings: PortSettings,
    pub pacing: Pacing,
    pub line_requests: Vec<LineRequest>,
    pub status: PortStatus,
}

pub(crate) struct Shared {
    pub state: Mutex<WorkerState>,
    pub command_signal: Condvar,
    pub running: AtomicBool,
    /// Locked after `state` whenever both are held.
    pub log: Mutex<ByteLog>,
}

impl Shared {
    pub fn new(settings: PortSettings, pacing: Pacing, log: ByteLog) -> Self {
        Self {
            state: Mutex::new(WorkerState {
                command: Command::Undefined,
                write_queue: VecDeque::new(),
                write_total: 0,
                write_sent: 0,
                read_buffer: Vec::new(),
                settings,
                pacing,
                line_requests: Vec::new(),
                status: PortStatus::default(),
            }),
            command_signal: Condvar::new(),
            running: AtomicBool::new(true),
            log: Mutex::new(log),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Overwrite the pending command and wake the worker.
    pub fn submit(&self, state: &mut WorkerState, command: Command) {
        state.command = command;
        self.command_signal.notify_all();
    }
}

pub(crate) struct Runtime {
    shared: Arc<Shared>,
    factory: Box<dyn TransportFactory>,
    transport: Box<dyn Transport>,
    events: Sender<WorkerEvent>,
    options: WorkerOptions,
    last_pinout: PinoutSignals,
    /// Settings the port was opened with.
    active: Option<PortSettings>,
}

impl Runtime {
    pub fn new(
        shared: Arc<Shared>,
        factory: Box<dyn TransportFactory>,
        events: Sender<WorkerEvent>,
        options: WorkerOptions,
    ) -> Self {
        let transport = factory.create();
        Self {
            shared,
            factory,
            transport,
            events,
            options,
            last_pinout: PinoutSignals::NONE,
            active: None,
        }
    }

    pub fn run(mut self) {
        log::debug!("serial worker started");
        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.lock();
        while shared.is_running() {
            if state.command == Command::Undefined {
                let timed_out = shared
                    .command_signal
                    .wait_for(&mut state, self.options.command_wait)
                    .timed_out();
                if !timed_out
                    && state.command == Command::Undefined
                    && state.line_requests.is_empty()
                {
                    log::debug!("worker woken without a command");
                }
            }
            if !shared.is_running() {
                break;
            }
            self.apply_line_requests(&mut state);
            if state.command != Command::Undefined {
                self.process_command(&mut state);
            }
            if !shared.is_running() {
                break;
            }
            if self.transport.is_open() {
                let poll_wait = self.options.poll_wait;
                MutexGuard::unlocked(&mut state, || {
                    self.drain(poll_wait);
                    self.check_pinout();
                });
            } else {
                MutexGuard::unlocked(&mut state, || thread::sleep(IDLE_SLEEP));
            }
        }
        MutexGuard::unlocked(&mut state, || self.close_port());
        self.publish_status(&mut state);
        if !state.write_queue.is_empty() {
            log::warn!(
                "worker stopped with {} unsent bytes",
                state.write_queue.len()
            );
            state.write_queue.clear();
        }
        log::debug!("serial worker exited");
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }

    fn report(&self, err: TransportError) {
        log::warn!("transport error on {}: {err}", self.transport.port_name());
        self.emit(WorkerEvent::Error(err));
    }

    fn process_command(&mut self, state: &mut MutexGuard<'_, WorkerState>) {
        let command = state.command;
        log::trace!("processing {command:?}");
        match command {
            Command::Write => self.process_write(state),
            Command::Open(mode) => {
                let settings = state.settings.clone();
                MutexGuard::unlocked(state, || self.open_port(&settings, mode));
            }
            Command::Close => MutexGuard::unlocked(state, || self.close_port()),
            Command::Stop => {
                MutexGuard::unlocked(state, || self.close_port());
                self.shared.running.store(false, Ordering::Release);
            }
            Command::Undefined => log::debug!("undefined command, nothing to do"),
        }
        self.publish_status(state);
        // A command submitted while this one ran stays pending.
        if state.command == command {
            state.command = Command::Undefined;
        }
    }

    fn process_write(&mut self, state: &mut MutexGuard<'_, WorkerState>) {
        if state.write_queue.is_empty() {
            state.write_total = 0;
            state.write_sent = 0;
            return;
        }
        if !self.transport.is_writable() {
            let dropped = state.write_queue.len();
            state.write_queue.clear();
            state.write_total = 0;
            state.write_sent = 0;
            log::warn!("port not writable, {dropped} queued bytes discarded");
            self.emit(WorkerEvent::error_message(format!(
                "Port is not open for writing, {dropped} bytes discarded"
            )));
            self.emit(WorkerEvent::Finish);
            return;
        }

        let threshold = self.options.progress_threshold;
        let mut progress_sent = false;
        if reports_progress(state, threshold) {
            progress_sent = true;
            self.emit(WorkerEvent::Progress {
                text: format!("Sending {} bytes", state.write_total),
                percent: 0.0,
            });
        }

        while self.shared.is_running()
            && state.command == Command::Write
            && self.transport.is_writable()
        {
            let Some(byte) = state.write_queue.pop_front() else {
                break;
            };
            let delay = Duration::from_millis(state.pacing.delay_for(byte));
            if MutexGuard::unlocked(state, || self.send_byte(byte)) {
                state.write_sent += 1;
            }
            if reports_progress(state, threshold) {
                progress_sent = true;
                let percent = 100.0 * state.write_sent as f32 / state.write_total.max(1) as f32;
                self.emit(WorkerEvent::Progress {
                    text: format!(
                        "{} bytes of {} bytes sent",
                        state.write_sent, state.write_total
                    ),
                    percent,
                });
            }
            MutexGuard::unlocked(state, || self.pace(delay));
        }

        if !state.write_queue.is_empty() {
            log::warn!(
                "write batch interrupted, {} queued bytes discarded",
                state.write_queue.len()
            );
            state.write_queue.clear();
        }
        if progress_sent {
            self.emit(WorkerEvent::Progress {
                text: format!("{} bytes sent", state.write_sent),
                percent: 100.0,
            });
        }
        self.emit(WorkerEvent::Finish);
        state.write_sent = 0;
        state.write_total = 0;
    }

    fn send_byte(&mut self, byte: u8) -> bool {
        self.shared.log.lock().record(&[byte], Direction::Outbound);
        let written = self.transport.write(&[byte]);
        match written.and_then(|n| self.transport.flush().map(|_| n)) {
            Ok(n) => n > 0,
            Err(err) => {
                self.report(err);
                false
            }
        }
    }

    /// Spend the pacing delay draining inbound data, then sleep out the rest.
    fn pace(&mut self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let started = Instant::now();
        self.drain(delay);
        let elapsed = started.elapsed();
        if elapsed < delay {
            thread::sleep(delay - elapsed);
        }
    }

    /// Wait up to `wait` for inbound bytes and move them into the read buffer.
    fn drain(&mut self, wait: Duration) {
        match self.transport.wait_for_readable(wait) {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                self.report(err);
                return;
            }
        }
        match self.transport.read_all() {
            Ok(bytes) if bytes.is_empty() => {}
            Ok(bytes) => {
                self.shared.log.lock().record(&bytes, Direction::Inbound);
                self.shared
                    .state
                    .lock()
                    .read_buffer
                    .extend_from_slice(&bytes);
                self.emit(WorkerEvent::ReadyRead);
            }
            Err(err) => self.report(err),
        }
    }

    fn check_pinout(&mut self) {
        match self.transport.pinout_signals() {
            Ok(signals) if signals != self.last_pinout => {
                self.last_pinout = signals;
                self.shared.state.lock().status.pinout = signals;
                self.emit(WorkerEvent::PinoutSignalsChanged(signals));
            }
            Ok(_) => {}
            Err(err) => log::debug!("cannot read pinout signals: {err}"),
        }
    }

    fn open_port(&mut self, settings: &PortSettings, mode: OpenMode) {
        self.shared.log.lock().stop();
        if self.transport.is_open() {
            log::debug!("port already open, closing before reopening");
            self.transport.close();
            self.active = None;
            self.last_pinout = PinoutSignals::NONE;
            self.emit(WorkerEvent::PortStatusChanged(false));
            thread::sleep(self.options.reopen_settle);
        }
        if self.options.recreate_transport_on_reopen {
            // Some drivers hand back a stale handle unless the port object is
            // opened once, closed and rebuilt.
            self.transport.set_port_name(&settings.name);
            if self.transport.open(mode).is_ok() {
                self.transport.close();
                thread::sleep(RECREATE_SETTLE);
                self.transport = self.factory.create();
                thread::sleep(RECREATE_SETTLE);
            }
        }

        log::info!("opening {}", settings.description());
        self.transport.set_port_name(&settings.name);
        if let Err(err) = self.transport.open(mode) {
            log::error!("cannot open port {}: {err}", settings.name);
            self.emit(WorkerEvent::error_message(format!(
                "Cannot open port {}: {err}",
                settings.name
            )));
            return;
        }

        let description = settings.description();
        if let Err(err) = self.shared.log.lock().start(&description) {
            log::warn!("auto log not started: {err:#}");
            self.emit(WorkerEvent::message(format!(
                "Logging not started: {err:#}"
            )));
        }
        // Line parameters only stick once the port is open.
        if let Err(err) = apply_line_parameters(&mut *self.transport, settings) {
            log::warn!("cannot apply line parameters to {}: {err}", settings.name);
            self.emit(WorkerEvent::error_message(format!(
                "Cannot configure port {}: {err}",
                settings.name
            )));
        }
        self.active = Some(settings.clone());
        self.emit(WorkerEvent::PortStatusChanged(true));
    }

    fn close_port(&mut self) {
        self.shared.log.lock().stop();
        if self.transport.is_open() {
            self.transport.close();
            log::info!("port {} closed", self.transport.port_name());
            self.emit(WorkerEvent::PortStatusChanged(false));
        }
        self.active = None;
        self.last_pinout = PinoutSignals::NONE;
    }

    fn apply_line_requests(&mut self, state: &mut MutexGuard<'_, WorkerState>) {
        if state.line_requests.is_empty() {
            return;
        }
        let requests = std::mem::take(&mut state.line_requests);
        let Some(active) = self.active.as_ref().filter(|_| self.transport.is_open()) else {
            log::debug!("line requests ignored, port is closed");
            return;
        };
        if active.flow_control == FlowControl::Hardware {
            self.emit(WorkerEvent::error_message(
                "DTR/RTS cannot be changed while hardware flow control is active",
            ));
            return;
        }
        MutexGuard::unlocked(state, || {
            for request in requests {
                if let Err(err) = self.apply_line_request(request) {
                    self.report(err);
                }
            }
            self.check_pinout();
        });
    }

    fn apply_line_request(&mut self, request: LineRequest) -> Result<(), TransportError> {
        match request {
            LineRequest::Dtr(on) => self.transport.set_data_terminal_ready(on),
            LineRequest::Rts(on) => self.transport.set_request_to_send(on),
            LineRequest::ToggleDtr => {
                let on = self.transport.pinout_signals()?.contains(PinoutSignals::DTR);
                self.transport.set_data_terminal_ready(!on)
            }
            LineRequest::ToggleRts => {
                let on = self.transport.pinout_signals()?.contains(PinoutSignals::RTS);
                self.transport.set_request_to_send(!on)
            }
        }
    }

    fn publish_status(&self, state: &mut WorkerState) {
        state.status.open = self.transport.is_open();
        state.status.description = self
            .active
            .as_ref()
            .map(PortSettings::description)
            .unwrap_or_default();
        state.status.pinout = self.last_pinout;
    }
}

/// Progress is only worth reporting for batches whose estimated duration
/// reaches `threshold`.
fn reports_progress(state: &WorkerState, threshold: Duration) -> bool {
    state.write_total as u128 * state.pacing.delay_after_byte_ms as u128 >= threshold.as_millis()
}

fn apply_line_parameters(
    transport: &mut dyn Transport,
    settings: &PortSettings,
) -> Result<(), TransportError> {
    transport.set_baud_rate(settings.baud_rate)?;
    transport.set_data_bits(settings.data_bits)?;
    transport.set_parity(settings.parity)?;
    transport.set_stop_bits(settings.stop_bits)?;
    transport.set_flow_control(settings.flow_control)
}
