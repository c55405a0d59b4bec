//! Background serial worker.
//!
//! [`SerialWorker`] owns a [`Transport`](crate::protocol::transport::Transport)
//! on a dedicated thread. Callers submit commands (open, close, write, stop)
//! through a single pending-command slot guarded by one lock; outgoing bytes
//! are paced one at a time and the pacing delay doubles as a window for
//! draining inbound data. Notifications come back on a flume channel as
//! [`WorkerEvent`]s.

mod byte_log;
mod command;
mod event;
mod runtime;

pub use byte_log::{AutoLogConfig, ByteLog, Direction};
pub use command::{Command, LineRequest, Pacing};
pub use event::WorkerEvent;

use anyhow::{Context, Result};
use flume::{Receiver, RecvTimeoutError};
use std::{
    path::PathBuf,
    sync::{atomic::Ordering, Arc},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    core::timestamp::TimestampFormat,
    protocol::{
        settings::{DataBits, FlowControl, OpenMode, Parity, PortSettings, StopBits},
        transport::{PinoutSignals, TransportFactory},
    },
};
use runtime::{Runtime, Shared};

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        /// Terminator that `write` replaces when a line ending is given.
        pub const NATIVE_LINE_ENDING: &[u8] = b"\r\n";
    } else {
        /// Terminator that `write` replaces when a line ending is given.
        pub const NATIVE_LINE_ENDING: &[u8] = b"\n";
    }
}

/// Grace period used when the handle is dropped without an explicit stop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Open, close and rebuild the transport before every real open. Needed
    /// on platforms whose drivers cannot reuse a port handle.
    pub recreate_transport_on_reopen: bool,
    /// Batches estimated to take at least this long emit progress events.
    pub progress_threshold: Duration,
    /// Pause between closing an open port and reopening it.
    pub reopen_settle: Duration,
    /// Upper bound of the idle wait for a new command.
    pub command_wait: Duration,
    /// Upper bound of the readable wait while the port is open and idle.
    pub poll_wait: Duration,
    pub pacing: Pacing,
    pub auto_log: AutoLogConfig,
    pub line_ending_rx: Vec<u8>,
    pub line_ending_tx: Vec<u8>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            recreate_transport_on_reopen: cfg!(windows),
            progress_threshold: Duration::from_secs(2),
            reopen_settle: Duration::from_millis(500),
            command_wait: Duration::from_millis(10),
            poll_wait: Duration::from_millis(10),
            pacing: Pacing::default(),
            auto_log: AutoLogConfig::default(),
            line_ending_rx: b"\n".to_vec(),
            line_ending_tx: b"\n".to_vec(),
        }
    }
}

pub struct SerialWorker {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
    exited: Receiver<()>,
}

impl std::fmt::Debug for SerialWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialWorker")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl SerialWorker {
    /// Start the worker thread. The transport is created on that thread.
    pub fn spawn<F>(
        factory: F,
        settings: PortSettings,
        options: WorkerOptions,
    ) -> Result<(Self, Receiver<WorkerEvent>)>
    where
        F: TransportFactory + 'static,
    {
        let mut log = ByteLog::new(options.auto_log.clone());
        log.set_line_ending_rx(&options.line_ending_rx);
        log.set_line_ending_tx(&options.line_ending_tx);
        let shared = Arc::new(Shared::new(settings, options.pacing.clone(), log));

        let (event_tx, event_rx) = flume::unbounded();
        let (exit_tx, exit_rx) = flume::bounded(1);
        let runtime_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("serial-worker".to_string())
            .spawn(move || {
                Runtime::new(runtime_shared, Box::new(factory), event_tx, options).run();
                let _ = exit_tx.send(());
            })
            .context("failed to spawn serial worker thread")?;

        Ok((
            Self {
                shared,
                thread: Some(thread),
                exited: exit_rx,
            },
            event_rx,
        ))
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Request an open with the current settings. Reopens if already open.
    /// Returns `false` once the worker has stopped.
    pub fn open(&self, mode: OpenMode) -> bool {
        self.submit(Command::Open(mode))
    }

    pub fn close(&self) -> bool {
        self.submit(Command::Close)
    }

    fn submit(&self, command: Command) -> bool {
        if !self.is_running() {
            return false;
        }
        let mut state = self.shared.state.lock();
        self.shared.submit(&mut state, command);
        true
    }

    /// Queue `data` for paced transmission and return the queued length.
    /// A non-empty `line_ending` replaces every [`NATIVE_LINE_ENDING`] in
    /// `data` first.
    pub fn write(&self, data: &[u8], line_ending: &[u8]) -> usize {
        let data = if line_ending.is_empty() {
            data.to_vec()
        } else {
            replace_sequence(data, NATIVE_LINE_ENDING, line_ending)
        };
        let mut state = self.shared.state.lock();
        state.write_queue.extend(data.iter().copied());
        state.write_total += data.len();
        self.shared.submit(&mut state, Command::Write);
        data.len()
    }

    /// Take everything received so far. With a non-zero `timeout` the lock
    /// is only waited for that long, and an empty buffer is returned if it
    /// could not be taken.
    pub fn read_all(&self, timeout: Duration) -> Vec<u8> {
        if timeout.is_zero() {
            return std::mem::take(&mut self.shared.state.lock().read_buffer);
        }
        match self.shared.state.try_lock_for(timeout) {
            Some(mut state) => std::mem::take(&mut state.read_buffer),
            None => {
                log::debug!("read_all timed out after {timeout:?}");
                Vec::new()
            }
        }
    }

    /// Drop every byte not yet handed to the transport.
    pub fn abort_send(&self) {
        let mut state = self.shared.state.lock();
        let dropped = state.write_queue.len();
        state.write_queue.clear();
        log::debug!("send aborted, {dropped} bytes dropped");
    }

    /// Bytes still waiting for transmission.
    pub fn pending_bytes(&self) -> usize {
        self.shared.state.lock().write_queue.len()
    }

    /// Stop the worker, waiting up to `timeout` for its thread to exit.
    ///
    /// A thread that misses the deadline (stuck inside a transport call) is
    /// detached: it keeps its port and log file until the call returns.
    /// Returns whether the thread exited in time.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.thread.take() else {
            return true;
        };
        {
            let mut state = self.shared.state.lock();
            self.shared.running.store(false, Ordering::Release);
            self.shared.submit(&mut state, Command::Stop);
        }
        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    log::error!("serial worker thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::error!(
                    "serial worker did not stop within {timeout:?}, detaching it; its port and log handles leak until it returns"
                );
                drop(handle);
                false
            }
        }
    }

    pub fn settings(&self) -> PortSettings {
        self.shared.state.lock().settings.clone()
    }

    /// Replace all line parameters. Applied on the next open.
    pub fn set_settings(&self, settings: PortSettings) {
        self.shared.state.lock().settings = settings;
    }

    pub fn set_port_name(&self, name: &str) {
        self.shared.state.lock().settings.name = name.to_string();
    }

    pub fn set_baud_rate(&self, baud_rate: u32) {
        self.shared.state.lock().settings.baud_rate = baud_rate;
    }

    pub fn set_data_bits(&self, data_bits: DataBits) {
        self.shared.state.lock().settings.data_bits = data_bits;
    }

    pub fn set_parity(&self, parity: Parity) {
        self.shared.state.lock().settings.parity = parity;
    }

    pub fn set_stop_bits(&self, stop_bits: StopBits) {
        self.shared.state.lock().settings.stop_bits = stop_bits;
    }

    pub fn set_flow_control(&self, flow_control: FlowControl) {
        self.shared.state.lock().settings.flow_control = flow_control;
    }

    pub fn pacing(&self) -> Pacing {
        self.shared.state.lock().pacing.clone()
    }

    pub fn set_delay_after_bytes_ms(&self, delay_ms: u64) {
        self.shared.state.lock().pacing.delay_after_byte_ms = delay_ms;
    }

    /// Use `delay_ms` instead of the per-byte delay after transmitting `chr`.
    pub fn set_delay_after_chr_ms(&self, delay_ms: u64, chr: &[u8]) {
        let mut state = self.shared.state.lock();
        state.pacing.delay_after_chr_ms = delay_ms;
        state.pacing.delay_chr = chr.to_vec();
    }

    /// Takes effect at the next open; disabling closes an active log.
    pub fn enable_auto_log(&self, enabled: bool) {
        self.shared.log.lock().set_enabled(enabled);
    }

    pub fn set_auto_log_overwrite(&self, overwrite: bool) {
        self.shared.log.lock().set_overwrite(overwrite);
    }

    /// `pattern` is a strftime template expanded when logging starts.
    pub fn set_auto_log_file_name(&self, pattern: &str) -> Result<()> {
        let pattern = TimestampFormat::parse(pattern)?;
        self.shared.log.lock().set_file_name_pattern(pattern);
        Ok(())
    }

    pub fn set_auto_log_file_path(&self, directory: impl Into<PathBuf>) {
        self.shared.log.lock().set_directory(directory.into());
    }

    pub fn set_timestamp_format(&self, format: &str) -> Result<()> {
        let format = TimestampFormat::parse(format)?;
        self.shared.log.lock().set_timestamp_format(format);
        Ok(())
    }

    pub fn auto_log_config(&self) -> AutoLogConfig {
        self.shared.log.lock().config().clone()
    }

    /// File currently receiving traffic, if logging is active.
    pub fn auto_log_path(&self) -> Option<PathBuf> {
        self.shared.log.lock().path().map(PathBuf::from)
    }

    pub fn set_line_ending_rx(&self, ending: &[u8]) {
        self.shared.log.lock().set_line_ending_rx(ending);
    }

    pub fn set_line_ending_tx(&self, ending: &[u8]) {
        self.shared.log.lock().set_line_ending_tx(ending);
    }

    pub fn set_data_terminal_ready(&self, on: bool) {
        self.request_line(LineRequest::Dtr(on));
    }

    pub fn set_request_to_send(&self, on: bool) {
        self.request_line(LineRequest::Rts(on));
    }

    pub fn toggle_dtr(&self) {
        self.request_line(LineRequest::ToggleDtr);
    }

    pub fn toggle_rts(&self) {
        self.request_line(LineRequest::ToggleRts);
    }

    fn request_line(&self, request: LineRequest) {
        let mut state = self.shared.state.lock();
        state.line_requests.push(request);
        self.shared.command_signal.notify_all();
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().status.open
    }

    /// Last observed line signals.
    pub fn pinout_signals(&self) -> PinoutSignals {
        self.shared.state.lock().status.pinout
    }

    /// Description of the open port, empty while closed.
    pub fn port_description(&self) -> String {
        self.shared.state.lock().status.description.clone()
    }
}

impl Drop for SerialWorker {
    fn drop(&mut self) {
        self.stop(DEFAULT_STOP_TIMEOUT);
    }
}

/// Replace every non-overlapping occurrence of `from` in `data` with `to`.
pub fn replace_sequence(data: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    if from.is_empty() {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i..].starts_with(from) {
            out.extend_from_slice(to);
            i += from.len();
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}
