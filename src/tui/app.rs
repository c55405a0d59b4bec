use anyhow::{Context, Result};
use flume::Receiver;
use std::{fs, path::Path, time::Duration};

use crate::{
    core::{
        config::{AppConfig, LineEnding},
        console::{ConsoleEvent, ConsoleModel},
        multistring::{Mode, MultiString},
    },
    protocol::{
        settings::OpenMode,
        transport::{PinoutSignals, TransportFactory},
        tty::{self, PortEntry},
        worker::{replace_sequence, SerialWorker, WorkerEvent, DEFAULT_STOP_TIMEOUT, NATIVE_LINE_ENDING},
    },
    tui::input::Action,
};

const SCROLL_STEP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    PortName,
    BaudRate,
    SendFile,
    SaveCapture,
}

impl PromptKind {
    pub fn label(self) -> &'static str {
        match self {
            PromptKind::PortName => "Port",
            PromptKind::BaudRate => "Baud rate",
            PromptKind::SendFile => "Send file",
            PromptKind::SaveCapture => "Save capture to",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub buffer: String,
}

/// Controller between the worker, the console model and the keyboard.
pub struct App {
    worker: SerialWorker,
    events: Receiver<WorkerEvent>,
    console_events: Receiver<ConsoleEvent>,
    pub console: ConsoleModel,
    pub config: AppConfig,
    pub input: MultiString,
    pub prompt: Option<Prompt>,
    /// Ports offered while the port-name prompt is open.
    pub ports: Vec<PortEntry>,
    history_cursor: Option<usize>,
    pub status: String,
    pub error: Option<String>,
    pub progress: Option<(String, f32)>,
    pub port_open: bool,
    pub pinout: PinoutSignals,
    /// Lines scrolled back from the bottom of the console.
    pub scroll: usize,
    /// Keystrokes go straight to the port instead of the input line.
    pub direct_typing: bool,
    pub should_quit: bool,
}

impl App {
    pub fn new<F: TransportFactory + 'static>(factory: F, config: AppConfig) -> Result<Self> {
        let (worker, events) =
            SerialWorker::spawn(factory, config.serial.clone(), config.worker_options())?;
        let mut console = ConsoleModel::new(config.console.console_options());
        let console_events = console.subscribe();
        let input = MultiString::new("", config.transmit.send_mode);
        Ok(Self {
            worker,
            events,
            console_events,
            console,
            config,
            input,
            prompt: None,
            ports: Vec::new(),
            history_cursor: None,
            status: "Closed. Ctrl+O opens the port".to_string(),
            error: None,
            progress: None,
            port_open: false,
            pinout: PinoutSignals::NONE,
            scroll: 0,
            direct_typing: false,
            should_quit: false,
        })
    }

    pub fn worker(&self) -> &SerialWorker {
        &self.worker
    }

    /// Process everything the worker and the console have reported.
    pub fn pump(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_worker_event(event);
        }
        while let Ok(ConsoleEvent::GetData(bytes)) = self.console_events.try_recv() {
            self.transmit(&bytes, false);
        }
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::PortStatusChanged(open) => {
                self.port_open = open;
                self.console.set_editable(open && self.direct_typing);
                self.status = if open {
                    format!("Connected: {}", self.config.serial.description())
                } else {
                    "Disconnected".to_string()
                };
                if !open {
                    self.progress = None;
                }
            }
            WorkerEvent::Message { text, is_error } => {
                if is_error {
                    log::warn!("worker: {text}");
                    self.error = Some(text);
                } else {
                    self.status = text;
                }
            }
            WorkerEvent::Error(err) => {
                if err.kind().is_fatal() {
                    log::error!("transport failure, closing port: {err}");
                    self.error = Some(format!("Port error: {err}"));
                    self.worker.close();
                } else {
                    log::debug!("ignoring transient transport error: {err}");
                }
            }
            WorkerEvent::ReadyRead => {
                let data = self.worker.read_all(Duration::ZERO);
                if !data.is_empty() {
                    self.console.put_data(&data);
                }
            }
            WorkerEvent::Progress { text, percent } => self.progress = Some((text, percent)),
            WorkerEvent::Finish => self.progress = None,
            WorkerEvent::PinoutSignalsChanged(signals) => self.pinout = signals,
        }
    }

    /// Queue bytes for the port. With `substitute` the native line ending is
    /// replaced by the transmit line ending. Sent bytes are echoed into the
    /// console when local echo is on.
    pub fn transmit(&mut self, data: &[u8], substitute: bool) -> usize {
        if !self.port_open {
            self.error = Some("Port is not open".to_string());
            return 0;
        }
        let tx: &[u8] = if substitute {
            self.config.console.line_ending_tx.as_bytes()
        } else {
            b""
        };
        let queued = self.worker.write(data, tx);
        if self.config.console.local_echo {
            let echoed = if tx.is_empty() {
                data.to_vec()
            } else {
                replace_sequence(data, NATIVE_LINE_ENDING, tx)
            };
            self.console.put_data(&echoed);
        }
        queued
    }

    fn submit_input(&mut self) {
        let conversion = self.input.get_byte_array();
        if !conversion.ok {
            self.error = Some(format!("Input is not valid {}", self.input.mode()));
            return;
        }
        let mode = self.input.mode();
        let mut bytes = conversion.bytes;
        let append = self.config.transmit.append_line_ending
            && self.config.console.line_ending_tx != LineEnding::None;
        // ASCII input goes through line-ending substitution, numeric input is
        // sent exactly as typed.
        if append {
            if mode == Mode::Ascii {
                bytes.extend_from_slice(NATIVE_LINE_ENDING);
            } else {
                bytes.extend_from_slice(self.config.console.line_ending_tx.as_bytes());
            }
        }
        if bytes.is_empty() {
            return;
        }
        if self.transmit(&bytes, mode == Mode::Ascii) > 0 {
            let text = self.input.text().to_string();
            self.config.history.push(mode, &text);
            self.input.set_text("");
            self.history_cursor = None;
        }
    }

    pub fn send_custom_text(&mut self, index: usize) {
        let Some(custom) = self.config.custom_texts.get(index).cloned() else {
            self.status = format!("F{} has no custom text", index + 1);
            return;
        };
        if !custom.enabled || custom.text.is_empty() {
            self.status = format!("F{} is disabled", index + 1);
            return;
        }
        let conversion = MultiString::new(&custom.text, custom.mode).get_byte_array();
        if !conversion.ok {
            self.error = Some(format!("Custom text F{} is not valid {}", index + 1, custom.mode));
            return;
        }
        self.transmit(&conversion.bytes, custom.mode == Mode::Ascii);
    }

    pub fn send_file(&mut self, path: &Path) -> Result<usize> {
        let data = fs::read(path).with_context(|| format!("Cannot read {path:?}"))?;
        Ok(self.transmit(&data, false))
    }

    /// Write every retained received byte to `path`.
    pub fn save_capture(&self, path: &Path) -> Result<usize> {
        let data = self.console.all_data();
        fs::write(path, data).with_context(|| format!("Cannot write {path:?}"))?;
        Ok(data.len())
    }

    pub fn toggle_port(&mut self) {
        if self.port_open {
            self.worker.close();
        } else {
            self.worker.set_settings(self.config.serial.clone());
            self.worker.open(OpenMode::ReadWrite);
            self.status = format!("Opening {}", self.config.serial.name);
        }
        self.error = None;
    }

    fn history_prev(&mut self) {
        let back = self.history_cursor.map_or(0, |cursor| cursor + 1);
        if let Some(text) = self.config.history.recall(self.input.mode(), back) {
            let text = text.to_string();
            self.input.set_text(&text);
            self.history_cursor = Some(back);
        }
    }

    fn history_next(&mut self) {
        match self.history_cursor {
            None => {}
            Some(0) => {
                self.history_cursor = None;
                self.input.set_text("");
            }
            Some(cursor) => {
                if let Some(text) = self.config.history.recall(self.input.mode(), cursor - 1) {
                    let text = text.to_string();
                    self.input.set_text(&text);
                }
                self.history_cursor = Some(cursor - 1);
            }
        }
    }

    fn insert_char(&mut self, ch: char) {
        if let Some(prompt) = &mut self.prompt {
            prompt.buffer.push(ch);
            return;
        }
        if self.direct_typing {
            let mut buf = [0u8; 4];
            self.console.type_input(ch.encode_utf8(&mut buf).as_bytes());
            return;
        }
        let mode = self.input.mode();
        if !mode.accepts(ch) {
            return;
        }
        let mut text = self.input.text().to_string();
        text.push(ch);
        self.input.set_text(&mode.fixup(&text));
    }

    fn delete_char(&mut self) {
        if let Some(prompt) = &mut self.prompt {
            prompt.buffer.pop();
            return;
        }
        if self.direct_typing {
            self.console.type_input(&[0x08]);
            return;
        }
        let mut text = self.input.text().to_string();
        text.pop();
        self.input.set_text(&self.input.mode().fixup(&text));
    }

    fn open_prompt(&mut self, kind: PromptKind) {
        let buffer = match kind {
            PromptKind::PortName => {
                self.ports = tty::available_ports();
                self.config.serial.name.clone()
            }
            PromptKind::BaudRate => self.config.serial.baud_rate.to_string(),
            PromptKind::SendFile | PromptKind::SaveCapture => String::new(),
        };
        self.prompt = Some(Prompt { kind, buffer });
    }

    fn finish_prompt(&mut self) {
        let Some(prompt) = self.prompt.take() else {
            return;
        };
        let value = prompt.buffer.trim().to_string();
        if value.is_empty() {
            return;
        }
        let result = match prompt.kind {
            PromptKind::PortName => {
                self.config.serial.name = value.clone();
                self.worker.set_port_name(&value);
                Ok(format!("Port set to {value}, reopen to apply"))
            }
            PromptKind::BaudRate => value
                .parse::<u32>()
                .with_context(|| format!("Invalid baud rate '{value}'"))
                .map(|baud| {
                    self.config.serial.baud_rate = baud;
                    self.worker.set_baud_rate(baud);
                    format!("Baud rate set to {baud}, reopen to apply")
                }),
            PromptKind::SendFile => self
                .send_file(Path::new(&value))
                .map(|queued| format!("Queued {queued} bytes from {value}")),
            PromptKind::SaveCapture => self
                .save_capture(Path::new(&value))
                .map(|saved| format!("Saved {saved} bytes to {value}")),
        };
        match result {
            Ok(status) => self.status = status,
            Err(err) => self.error = Some(format!("{err:#}")),
        }
    }

    fn cycle_rx_line_ending(&mut self) {
        let ending = self.config.console.line_ending_rx.next();
        self.config.console.line_ending_rx = ending;
        self.console.set_line_ending_rx(ending.as_bytes());
        self.worker.set_line_ending_rx(ending.as_bytes());
        self.status = format!("Receive line ending: {ending}");
    }

    fn cycle_tx_line_ending(&mut self) {
        let ending = self.config.console.line_ending_tx.next();
        self.config.console.line_ending_tx = ending;
        self.console.set_line_ending_tx(ending.as_bytes());
        self.worker.set_line_ending_tx(ending.as_bytes());
        let pacing = self.config.transmit.pacing(ending);
        self.worker
            .set_delay_after_chr_ms(pacing.delay_after_chr_ms, &pacing.delay_chr);
        self.status = format!("Transmit line ending: {ending}");
    }

    pub fn handle(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::Insert(ch) => self.insert_char(ch),
            Action::DeleteChar => self.delete_char(),
            Action::Submit => {
                if self.prompt.is_some() {
                    self.finish_prompt();
                } else if self.direct_typing {
                    let ending = self.config.console.line_ending_tx.as_bytes();
                    self.console.type_input(ending);
                } else {
                    self.submit_input();
                }
            }
            Action::Cancel => {
                if self.prompt.take().is_none() {
                    self.error = None;
                }
            }
            Action::HistoryPrev => self.history_prev(),
            Action::HistoryNext => self.history_next(),
            Action::ScrollUp => {
                let max = self.console.view().line_count().saturating_sub(1);
                self.scroll = (self.scroll + SCROLL_STEP).min(max);
            }
            Action::ScrollDown => self.scroll = self.scroll.saturating_sub(SCROLL_STEP),
            Action::CycleSendMode => {
                let mode = self.input.mode().next();
                self.input.set_mode(mode);
                self.config.transmit.send_mode = mode;
                self.history_cursor = None;
            }
            Action::TogglePort => self.toggle_port(),
            Action::ToggleHexView => {
                self.config.console.hex_view = !self.config.console.hex_view;
                self.console.set_hex_mode(self.config.console.hex_view);
            }
            Action::ToggleTimestampView => {
                self.config.console.timestamp_view = !self.config.console.timestamp_view;
                self.console
                    .set_timestamp_mode(self.config.console.timestamp_view);
            }
            Action::ToggleFreeze => {
                let frozen = self.console.is_update_enabled();
                self.console.set_update_enabled(!frozen);
                let text = if frozen { "Display frozen" } else { "Display live" };
                self.status = text.to_string();
            }
            Action::ClearConsole => {
                self.console.clear();
                self.scroll = 0;
            }
            Action::ToggleDtr => self.worker.toggle_dtr(),
            Action::ToggleRts => self.worker.toggle_rts(),
            Action::AbortSend => {
                self.worker.abort_send();
                self.progress = None;
                self.status = "Send aborted".to_string();
            }
            Action::ToggleAutoLog => {
                let enabled = !self.config.auto_log.enabled;
                self.config.auto_log.enabled = enabled;
                self.worker.enable_auto_log(enabled);
                self.status = if enabled {
                    "Auto log enabled, starts on next open".to_string()
                } else {
                    "Auto log disabled".to_string()
                };
            }
            Action::ToggleDirectTyping => {
                self.direct_typing = !self.direct_typing;
                self.console
                    .set_editable(self.direct_typing && self.port_open);
            }
            Action::ToggleLocalEcho => {
                self.config.console.local_echo = !self.config.console.local_echo;
            }
            Action::ToggleAppendLineEnding => {
                self.config.transmit.append_line_ending = !self.config.transmit.append_line_ending;
            }
            Action::CycleRxLineEnding => self.cycle_rx_line_ending(),
            Action::CycleTxLineEnding => self.cycle_tx_line_ending(),
            Action::PromptPortName => self.open_prompt(PromptKind::PortName),
            Action::PromptBaudRate => self.open_prompt(PromptKind::BaudRate),
            Action::PromptSendFile => self.open_prompt(PromptKind::SendFile),
            Action::PromptSaveCapture => self.open_prompt(PromptKind::SaveCapture),
            Action::CustomText(index) => self.send_custom_text(index),
            Action::None => {}
        }
    }

    /// Stop the worker and hand back the configuration to persist.
    pub fn shutdown(mut self) -> AppConfig {
        if !self.worker.stop(DEFAULT_STOP_TIMEOUT) {
            log::warn!("serial worker did not stop cleanly");
        }
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::config::CustomText,
        protocol::transport::{TransportErrorKind, VirtualPeer},
    };
    use std::time::Instant;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.serial.name = "virtual0".to_string();
        config.transmit.delay_after_byte_ms = 0;
        config.transmit.delay_after_newline_ms = 0;
        config.console.local_echo = false;
        config
    }

    fn wait_for(app: &mut App, what: &str, cond: impl Fn(&App) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            app.pump();
            if cond(app) {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn opened(peer: &VirtualPeer, config: AppConfig) -> App {
        let mut app = App::new(peer.clone(), config).unwrap();
        app.handle(Action::TogglePort);
        wait_for(&mut app, "port open", |app| app.port_open);
        app
    }

    fn type_text(app: &mut App, text: &str) {
        for ch in text.chars() {
            app.handle(Action::Insert(ch));
        }
    }

    #[test]
    fn test_command_and_response() {
        let peer = VirtualPeer::new();
        peer.respond_to(b"AT\r", b"OK\r\n");
        let mut app = opened(&peer, test_config());

        type_text(&mut app, "AT");
        app.handle(Action::Submit);
        wait_for(&mut app, "response", |app| app.console.text() == "OK\n");

        assert_eq!(peer.written(), b"AT\r");
        assert_eq!(app.config.history.entries(Mode::Ascii), ["AT"]);
        assert!(app.input.text().is_empty());
    }

    #[test]
    fn test_hex_input_is_sent_verbatim() {
        let peer = VirtualPeer::new();
        let mut app = opened(&peer, test_config());

        app.handle(Action::CycleSendMode);
        assert_eq!(app.input.mode(), Mode::Hexadecimal);
        type_text(&mut app, "0a4x1");
        assert_eq!(app.input.text(), "0A 41");
        app.handle(Action::Submit);
        wait_for(&mut app, "bytes on the wire", |_| peer.written().len() == 3);
        assert_eq!(peer.written(), b"\nA\r");
    }

    #[test]
    fn test_local_echo_shows_sent_bytes() {
        let peer = VirtualPeer::new();
        let mut config = test_config();
        config.console.local_echo = true;
        config.console.line_ending_tx = LineEnding::CrLf;
        let mut app = opened(&peer, config);

        type_text(&mut app, "hi");
        app.handle(Action::Submit);
        assert_eq!(app.console.text(), "hi\n");
    }

    #[test]
    fn test_send_while_closed_is_refused() {
        let peer = VirtualPeer::new();
        let mut app = App::new(peer.clone(), test_config()).unwrap();
        type_text(&mut app, "AT");
        app.handle(Action::Submit);
        assert_eq!(app.error.as_deref(), Some("Port is not open"));
        assert_eq!(app.input.text(), "AT");
        assert!(peer.written().is_empty());
    }

    #[test]
    fn test_fatal_error_closes_port() {
        let peer = VirtualPeer::new();
        let mut app = opened(&peer, test_config());
        peer.fail_next_read(TransportErrorKind::Read);
        wait_for(&mut app, "port closed", |app| !app.port_open);
        assert!(app.error.as_deref().is_some_and(|e| e.starts_with("Port error")));
    }

    #[test]
    fn test_history_recall() {
        let peer = VirtualPeer::new();
        let mut app = opened(&peer, test_config());
        for line in ["one", "two"] {
            type_text(&mut app, line);
            app.handle(Action::Submit);
        }
        app.handle(Action::HistoryPrev);
        assert_eq!(app.input.text(), "two");
        app.handle(Action::HistoryPrev);
        assert_eq!(app.input.text(), "one");
        app.handle(Action::HistoryPrev);
        assert_eq!(app.input.text(), "one");
        app.handle(Action::HistoryNext);
        assert_eq!(app.input.text(), "two");
        app.handle(Action::HistoryNext);
        assert_eq!(app.input.text(), "");
    }

    #[test]
    fn test_custom_text_and_direct_typing() {
        let peer = VirtualPeer::new();
        let mut config = test_config();
        config.custom_texts = vec![CustomText {
            text: "52 53".to_string(),
            mode: Mode::Hexadecimal,
            enabled: true,
        }];
        let mut app = opened(&peer, config);

        app.handle(Action::CustomText(0));
        app.handle(Action::CustomText(4));
        assert_eq!(app.status, "F5 has no custom text");

        app.handle(Action::ToggleDirectTyping);
        app.handle(Action::Insert('x'));
        app.pump();
        wait_for(&mut app, "typed byte", |_| peer.written().len() == 3);
        assert_eq!(peer.written(), b"RSx");
    }

    #[test]
    fn test_save_capture_writes_raw_history() {
        let peer = VirtualPeer::new();
        let mut app = opened(&peer, test_config());
        peer.inject(b"line\r\n\x01");
        wait_for(&mut app, "data", |app| app.console.all_data().len() == 7);

        let path = std::env::temp_dir().join(format!("serterm-capture-{}.bin", uuid::Uuid::new_v4()));
        assert_eq!(app.save_capture(&path).unwrap(), 7);
        assert_eq!(fs::read(&path).unwrap(), b"line\r\n\x01");
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_prompt_updates_settings() {
        let peer = VirtualPeer::new();
        let mut app = App::new(peer, test_config()).unwrap();
        app.handle(Action::PromptBaudRate);
        for _ in 0..6 {
            app.handle(Action::DeleteChar);
        }
        type_text(&mut app, "9600");
        app.handle(Action::Submit);
        assert!(app.prompt.is_none());
        assert_eq!(app.config.serial.baud_rate, 9600);
        assert_eq!(app.worker().settings().baud_rate, 9600);

        app.handle(Action::PromptBaudRate);
        app.handle(Action::Insert('x'));
        app.handle(Action::Submit);
        assert!(app.error.is_some());
    }
}
