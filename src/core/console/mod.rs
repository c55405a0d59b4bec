//! Received-data model behind the console pane.
//!
//! Every chunk handed to [`ConsoleModel::put_data`] lands in three
//! histories kept in lockstep: the raw bytes (hex view), the soft-wrapped
//! bytes (ASCII view) and the soft-wrapped bytes with arrival timestamps
//! baked in (timestamped view). The visible [`ConsoleView`] is rendered
//! incrementally while live update is on and rebuilt from the selected
//! history whenever a display setting changes.

mod hexdump;
mod history;
mod view;

pub use hexdump::dump_buf;
pub use history::{Chunk, Histories, TrimPolicy};
pub use view::ConsoleView;

use flume::{Receiver, Sender};

use crate::core::timestamp::TimestampFormat;

const BACKSPACE: u8 = 0x08;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// The user typed into the console while it was editable; transmit these.
    GetData(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleOptions {
    pub line_ending_rx: Vec<u8>,
    pub line_ending_tx: Vec<u8>,
    pub hex_wrap_width: usize,
    /// Insert `line_ending_rx` after this many bytes without one; 0 disables.
    pub auto_wrap_column: usize,
    pub trim: TrimPolicy,
    /// Maximum rendered lines; 0 is unlimited.
    pub display_size: usize,
    pub timestamp_format: TimestampFormat,
    pub hex_mode: bool,
    pub timestamp_mode: bool,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            line_ending_rx: b"\r\n".to_vec(),
            line_ending_tx: b"\r".to_vec(),
            hex_wrap_width: 16,
            auto_wrap_column: 0,
            trim: TrimPolicy::default(),
            display_size: 10_000,
            timestamp_format: TimestampFormat::default(),
            hex_mode: false,
            timestamp_mode: false,
        }
    }
}

pub struct ConsoleModel {
    options: ConsoleOptions,
    histories: Histories,
    view: ConsoleView,
    /// Bytes since the last line-ending byte, for auto-wrap.
    wrap_counter: usize,
    /// Bytes already rendered on the last hex dump line.
    hex_line_fill: usize,
    /// Start of a UTF-8 sequence whose remaining bytes have not arrived.
    utf8_partial: Vec<u8>,
    update_enabled: bool,
    editable: bool,
    subscriber: Option<Sender<ConsoleEvent>>,
}

impl Default for ConsoleModel {
    fn default() -> Self {
        Self::new(ConsoleOptions::default())
    }
}

impl ConsoleModel {
    pub fn new(options: ConsoleOptions) -> Self {
        Self {
            histories: Histories::new(options.trim),
            view: ConsoleView::new(options.display_size),
            options,
            wrap_counter: 0,
            hex_line_fill: 0,
            utf8_partial: Vec::new(),
            update_enabled: true,
            editable: false,
            subscriber: None,
        }
    }

    pub fn options(&self) -> &ConsoleOptions {
        &self.options
    }

    /// Ingest received bytes.
    pub fn put_data(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let chunk = self.expand(data);

        if self.update_enabled {
            if self.options.hex_mode {
                self.render_hex_incremental(data);
            } else if self.options.timestamp_mode {
                render_text(
                    &mut self.view,
                    &mut self.utf8_partial,
                    &chunk.stamped,
                    &self.options.line_ending_rx,
                );
            } else {
                render_text(
                    &mut self.view,
                    &mut self.utf8_partial,
                    &chunk.ascii,
                    &self.options.line_ending_rx,
                );
            }
        }

        self.histories.append(chunk);
    }

    /// Build the soft-wrapped and timestamped forms of `data`.
    ///
    /// Auto-wrap injects `line_ending_rx` once more than `auto_wrap_column`
    /// bytes arrive without any byte of it. The current time follows every
    /// terminator and leads the very first line.
    fn expand(&mut self, data: &[u8]) -> Chunk {
        let stamp = self.options.timestamp_format.now();
        let stamp = stamp.as_bytes();
        let terminator = self.options.line_ending_rx.last().copied();
        let column = self.options.auto_wrap_column;
        let wrap_ending: &[u8] = if self.options.line_ending_rx.is_empty() {
            b"\n"
        } else {
            &self.options.line_ending_rx
        };

        let mut chunk = Chunk::with_capacity(data.len());
        if self.histories.is_empty() {
            chunk.push_injected(b"", stamp);
        }
        for &byte in data {
            if column > 0 {
                if wrap_ending.contains(&byte) {
                    self.wrap_counter = 0;
                } else {
                    self.wrap_counter += 1;
                    if self.wrap_counter > column {
                        for &injected in wrap_ending {
                            chunk.push_injected(&[injected], &[injected]);
                            if Some(injected) == terminator {
                                chunk.push_injected(b"", stamp);
                            }
                        }
                        self.wrap_counter = 1;
                    }
                }
            }
            chunk.push_source(byte);
            if Some(byte) == terminator {
                chunk.push_injected(b"", stamp);
            }
        }
        chunk
    }

    fn render_hex_incremental(&mut self, chunk: &[u8]) {
        let wrap = self.options.hex_wrap_width.max(1);
        let tail = self.histories.raw_tail(self.hex_line_fill);
        let mut pending = Vec::with_capacity(tail.len() + chunk.len());
        if !tail.is_empty() {
            self.view.remove_last_line();
            pending.extend_from_slice(tail);
        }
        pending.extend_from_slice(chunk);
        self.view.push_str(&dump_buf(&pending, wrap));
        self.hex_line_fill = pending.len() % wrap;
    }

    /// Re-render the view from the history selected by the display toggles.
    pub fn rebuild(&mut self) {
        self.view.clear();
        self.utf8_partial.clear();
        if self.options.hex_mode {
            let wrap = self.options.hex_wrap_width.max(1);
            self.view.push_str(&dump_buf(self.histories.raw(), wrap));
            self.hex_line_fill = self.histories.raw().len() % wrap;
        } else {
            let source = if self.options.timestamp_mode {
                self.histories.stamped()
            } else {
                self.histories.ascii()
            };
            render_text(
                &mut self.view,
                &mut self.utf8_partial,
                source,
                &self.options.line_ending_rx,
            );
        }
    }

    /// Empty every history and the view.
    pub fn clear(&mut self) {
        self.histories.clear();
        self.view.clear();
        self.wrap_counter = 0;
        self.hex_line_fill = 0;
        self.utf8_partial.clear();
    }

    pub fn is_update_enabled(&self) -> bool {
        self.update_enabled
    }

    /// Freeze or thaw the view. Histories keep growing while frozen and the
    /// view is rebuilt on thaw.
    pub fn set_update_enabled(&mut self, enabled: bool) {
        let thawed = enabled && !self.update_enabled;
        self.update_enabled = enabled;
        if thawed {
            self.rebuild();
        }
    }

    fn rebuild_if_live(&mut self) {
        if self.update_enabled {
            self.rebuild();
        }
    }

    pub fn set_hex_mode(&mut self, on: bool) {
        if self.options.hex_mode != on {
            self.options.hex_mode = on;
            self.rebuild_if_live();
        }
    }

    pub fn set_timestamp_mode(&mut self, on: bool) {
        if self.options.timestamp_mode != on {
            self.options.timestamp_mode = on;
            self.rebuild_if_live();
        }
    }

    pub fn set_line_ending_rx(&mut self, ending: &[u8]) {
        self.options.line_ending_rx = ending.to_vec();
        self.rebuild_if_live();
    }

    pub fn set_line_ending_tx(&mut self, ending: &[u8]) {
        self.options.line_ending_tx = ending.to_vec();
    }

    pub fn line_ending_tx(&self) -> &[u8] {
        &self.options.line_ending_tx
    }

    pub fn set_hex_wrap_width(&mut self, width: usize) {
        self.options.hex_wrap_width = width.max(1);
        if self.options.hex_mode {
            self.rebuild_if_live();
        }
    }

    pub fn set_auto_wrap_column(&mut self, column: usize) {
        self.options.auto_wrap_column = column;
    }

    pub fn set_trim_policy(&mut self, policy: TrimPolicy) {
        self.options.trim = policy;
        self.histories.set_policy(policy);
        self.rebuild_if_live();
    }

    pub fn set_display_size(&mut self, lines: usize) {
        self.options.display_size = lines;
        self.view.set_max_lines(lines);
        self.rebuild_if_live();
    }

    pub fn set_timestamp_format(&mut self, format: TimestampFormat) {
        self.options.timestamp_format = format;
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    pub fn set_editable(&mut self, editable: bool) {
        self.editable = editable;
    }

    /// Register the receiver of [`ConsoleEvent`]s, replacing any earlier one.
    pub fn subscribe(&mut self) -> Receiver<ConsoleEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscriber = Some(tx);
        rx
    }

    /// Keystrokes typed into the console. Forwarded as
    /// [`ConsoleEvent::GetData`] only while editable.
    pub fn type_input(&mut self, bytes: &[u8]) -> bool {
        if !self.editable || bytes.is_empty() {
            return false;
        }
        match &self.subscriber {
            Some(tx) => tx.send(ConsoleEvent::GetData(bytes.to_vec())).is_ok(),
            None => false,
        }
    }

    /// Everything received and still retained, unmodified.
    pub fn all_data(&self) -> &[u8] {
        self.histories.raw()
    }

    pub fn ascii_data(&self) -> &[u8] {
        self.histories.ascii()
    }

    pub fn timestamped_data(&self) -> &[u8] {
        self.histories.stamped()
    }

    pub fn view(&self) -> &ConsoleView {
        &self.view
    }

    pub fn text(&self) -> String {
        self.view.text()
    }
}

/// Render received bytes as text: line endings become `\n`, backspace
/// deletes the previous character and the rest is decoded as UTF-8 (invalid
/// sequences become U+FFFD). An incomplete trailing sequence is held in
/// `partial` until the next chunk completes it.
fn render_text(
    view: &mut ConsoleView,
    partial: &mut Vec<u8>,
    chunk: &[u8],
    line_ending: &[u8],
) {
    partial.extend(normalize_line_endings(chunk, line_ending));
    let complete = partial.len() - incomplete_utf8_suffix(partial);
    let text = String::from_utf8_lossy(&partial[..complete]).into_owned();
    partial.drain(..complete);
    for ch in text.chars() {
        if ch == char::from(BACKSPACE) {
            view.delete_previous_char();
        } else {
            view.push_char(ch);
        }
    }
}

/// Length of a multi-byte sequence cut short at the end of `bytes`.
fn incomplete_utf8_suffix(bytes: &[u8]) -> usize {
    let floor = bytes.len().saturating_sub(3);
    for start in (floor..bytes.len()).rev() {
        let expected = match bytes[start] {
            0x80..=0xBF => continue,
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 1,
        };
        let present = bytes.len() - start;
        return if present < expected { present } else { 0 };
    }
    0
}

/// Map `ending` to `\n`. For two-byte endings a lone first byte is dropped
/// and a lone second byte becomes `\n`, so a terminator split across chunks
/// still yields exactly one newline.
pub fn normalize_line_endings(chunk: &[u8], ending: &[u8]) -> Vec<u8> {
    match ending {
        [] => chunk.to_vec(),
        [single] => chunk
            .iter()
            .map(|&b| if b == *single { b'\n' } else { b })
            .collect(),
        [first, .., last] => {
            let mut out = Vec::with_capacity(chunk.len());
            let mut i = 0;
            while i < chunk.len() {
                if chunk[i..].starts_with(ending) {
                    out.push(b'\n');
                    i += ending.len();
                    continue;
                }
                let byte = chunk[i];
                if byte == *first {
                    // remnant of a split terminator
                } else if byte == *last {
                    out.push(b'\n');
                } else {
                    out.push(byte);
                }
                i += 1;
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> ConsoleModel {
        ConsoleModel::new(ConsoleOptions {
            line_ending_rx: b"\r\n".to_vec(),
            ..ConsoleOptions::default()
        })
    }

    #[test]
    fn test_crlf_renders_single_newline() {
        let mut console = plain();
        console.put_data(b"X\r\nY");
        assert_eq!(console.text(), "X\nY");
    }

    #[test]
    fn test_split_crlf_renders_single_newline() {
        let mut console = plain();
        console.put_data(b"X\r");
        console.put_data(b"\nY");
        assert_eq!(console.text(), "X\nY");
        console.rebuild();
        assert_eq!(console.text(), "X\nY");
    }

    #[test]
    fn test_split_lfcr_renders_single_newline() {
        let mut console = ConsoleModel::new(ConsoleOptions {
            line_ending_rx: b"\n\r".to_vec(),
            ..ConsoleOptions::default()
        });
        console.put_data(b"X\n");
        console.put_data(b"\rY");
        assert_eq!(console.text(), "X\nY");
    }

    #[test]
    fn test_backspace_deletes_previous_char() {
        let mut console = plain();
        console.put_data(b"AB\x08C");
        assert_eq!(console.text(), "AC");
        assert_eq!(console.all_data(), b"AB\x08C");
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let mut console = plain();
        console.put_data(b"caf\xC3");
        assert_eq!(console.text(), "caf");
        console.put_data(b"\xA9 \xE2\x82");
        console.put_data(b"\xAC\r\n\xFF");
        assert_eq!(console.text(), "caf\u{e9} \u{20ac}\n\u{fffd}");
        console.rebuild();
        assert_eq!(console.text(), "caf\u{e9} \u{20ac}\n\u{fffd}");
    }

    #[test]
    fn test_incomplete_utf8_suffix() {
        assert_eq!(incomplete_utf8_suffix(b"abc"), 0);
        assert_eq!(incomplete_utf8_suffix(b"a\xC3"), 1);
        assert_eq!(incomplete_utf8_suffix(b"a\xC3\xA9"), 0);
        assert_eq!(incomplete_utf8_suffix(b"\xF0\x9F\x98"), 3);
        assert_eq!(incomplete_utf8_suffix(b"\xFF"), 0);
    }

    #[test]
    fn test_auto_wrap_injects_line_ending() {
        let mut console = ConsoleModel::new(ConsoleOptions {
            auto_wrap_column: 4,
            ..ConsoleOptions::default()
        });
        console.put_data(b"abcdef");
        console.put_data(b"ghij");
        assert_eq!(console.ascii_data(), b"abcd\r\nefgh\r\nij");
        assert_eq!(console.all_data(), b"abcdefghij");
        assert_eq!(console.text(), "abcd\nefgh\nij");
    }

    #[test]
    fn test_auto_wrap_resets_on_any_terminator_byte() {
        let mut console = ConsoleModel::new(ConsoleOptions {
            auto_wrap_column: 3,
            ..ConsoleOptions::default()
        });
        console.put_data(b"abc\rdef");
        assert_eq!(console.ascii_data(), b"abc\rdef");
    }

    #[test]
    fn test_hex_incremental_matches_full_dump() {
        let mut console = ConsoleModel::new(ConsoleOptions {
            hex_mode: true,
            hex_wrap_width: 8,
            ..ConsoleOptions::default()
        });
        let data: Vec<u8> = (0u8..45).collect();
        for chunk in [&data[..3], &data[3..8], &data[8..9], &data[9..30], &data[30..]] {
            console.put_data(chunk);
        }
        let expected = dump_buf(&data, 8);
        assert_eq!(console.text(), expected);
        console.rebuild();
        assert_eq!(console.text(), expected);
    }

    #[test]
    fn test_mode_switch_rebuilds_from_history() {
        let mut console = plain();
        console.put_data(b"OK\r\n");
        console.set_hex_mode(true);
        assert_eq!(console.text(), dump_buf(b"OK\r\n", 16));
        console.set_hex_mode(false);
        assert_eq!(console.text(), "OK\n");
    }

    #[test]
    fn test_timestamps_follow_line_ends() {
        let mut console = ConsoleModel::new(ConsoleOptions {
            timestamp_format: TimestampFormat::parse("[%H:%M] ").unwrap(),
            timestamp_mode: true,
            ..ConsoleOptions::default()
        });
        console.put_data(b"one\r\ntwo");
        console.put_data(b"\r\n");
        let pattern =
            regex::Regex::new(r"^\[\d\d:\d\d\] one\n\[\d\d:\d\d\] two\n\[\d\d:\d\d\] $").unwrap();
        assert!(pattern.is_match(&console.text()), "{:?}", console.text());

        console.set_timestamp_mode(false);
        assert_eq!(console.text(), "one\ntwo\n");
        console.set_timestamp_mode(true);
        assert!(pattern.is_match(&console.text()));
    }

    fn letters(bytes: &[u8]) -> Vec<u8> {
        bytes.iter().copied().filter(u8::is_ascii_lowercase).collect()
    }

    #[test]
    fn test_histories_trim_at_the_same_received_byte() {
        let policy = TrimPolicy {
            size_limit: 64,
            hysteresis_percent: 4,
        };
        let mut console = ConsoleModel::new(ConsoleOptions {
            line_ending_rx: b"\r\n".to_vec(),
            auto_wrap_column: 3,
            timestamp_format: TimestampFormat::parse("<%S> ").unwrap(),
            timestamp_mode: true,
            trim: policy,
            ..ConsoleOptions::default()
        });
        let stamp = regex::Regex::new(r"<\d\d> ").unwrap();
        let mut received = Vec::new();
        let mut next_letter = 0u8;
        for round in 0..60 {
            let mut chunk = Vec::new();
            for _ in 0..(round % 7) + 1 {
                chunk.push(b'a' + next_letter % 26);
                next_letter = next_letter.wrapping_add(1);
            }
            if round % 3 == 0 {
                chunk.extend_from_slice(b"\r\n");
            }
            received.extend_from_slice(&chunk);
            console.put_data(&chunk);

            let raw = console.all_data();
            let ascii = console.ascii_data();
            let stamped = console.timestamped_data();
            for history in [raw, ascii, stamped] {
                assert!(history.len() <= policy.size_limit);
            }
            assert!(received.ends_with(raw));
            assert_eq!(letters(ascii), letters(raw), "round {round}");
            assert_eq!(letters(stamped), letters(raw), "round {round}");
            let stamped = String::from_utf8_lossy(stamped);
            assert_eq!(
                stamp.replace_all(&stamped, "").as_bytes(),
                ascii,
                "round {round}"
            );
        }
        assert!(received.len() > 3 * policy.size_limit);
    }

    #[test]
    fn test_frozen_view_catches_up_on_thaw() {
        let mut console = plain();
        console.put_data(b"a");
        console.set_update_enabled(false);
        console.put_data(b"b\r\nc");
        assert_eq!(console.text(), "a");
        console.set_update_enabled(true);
        assert_eq!(console.text(), "ab\nc");
    }

    #[test]
    fn test_display_size_caps_lines() {
        let mut console = plain();
        console.set_display_size(2);
        console.put_data(b"1\r\n2\r\n3");
        assert_eq!(console.text(), "2\n3");
        assert_eq!(console.all_data(), b"1\r\n2\r\n3");
    }

    #[test]
    fn test_typing_requires_editable() {
        let mut console = plain();
        let events = console.subscribe();
        assert!(!console.type_input(b"x"));
        console.set_editable(true);
        assert!(console.type_input(b"y"));
        assert_eq!(events.try_recv().unwrap(), ConsoleEvent::GetData(b"y".to_vec()));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut console = plain();
        console.put_data(b"data\r\n");
        console.clear();
        assert!(console.all_data().is_empty());
        assert!(console.timestamped_data().is_empty());
        assert!(console.view().is_empty());
    }
}
