use serde::{Deserialize, Serialize};
use std::fmt;
use strum::EnumIter;

/// Text representation used for the outbound input line.
#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Ascii,
    Hexadecimal,
    Decimal,
    Binary,
}

impl Mode {
    /// Numeric base, `None` for plain text.
    pub fn base(self) -> Option<u32> {
        match self {
            Mode::Ascii => None,
            Mode::Binary => Some(2),
            Mode::Decimal => Some(10),
            Mode::Hexadecimal => Some(16),
        }
    }

    /// Digits per byte.
    pub fn width(self) -> usize {
        match self {
            Mode::Ascii => 0,
            Mode::Binary => 8,
            Mode::Decimal => 3,
            Mode::Hexadecimal => 2,
        }
    }

    /// Next mode in the Tab cycle.
    pub fn next(self) -> Mode {
        crate::core::next_variant(self)
    }

    /// Whether `ch` may be typed into an input line in this mode.
    pub fn accepts(self, ch: char) -> bool {
        match self.base() {
            None => true,
            Some(base) => ch == ' ' || ch.is_digit(base),
        }
    }

    /// Drop characters the mode cannot parse, upper-case the rest and
    /// regroup them into space-separated byte-sized groups.
    pub fn fixup(self, input: &str) -> String {
        let Some(base) = self.base() else {
            return input.to_string();
        };
        let width = self.width();
        let mut out = String::with_capacity(input.len());
        for (index, ch) in input.chars().filter(|c| c.is_digit(base)).enumerate() {
            if index != 0 && index % width == 0 {
                out.push(' ');
            }
            out.push(ch.to_ascii_uppercase());
        }
        out
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Ascii => write!(f, "ASCII"),
            Mode::Binary => write!(f, "BIN"),
            Mode::Decimal => write!(f, "DEC"),
            Mode::Hexadecimal => write!(f, "HEX"),
        }
    }
}

/// Result of parsing text into bytes. `ok` is false when at least one group
/// was malformed; the remaining groups are still converted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ByteConversion {
    pub bytes: Vec<u8>,
    pub ok: bool,
}

/// Text that can be read and written as bytes under any [`Mode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiString {
    text: String,
    mode: Mode,
    upcase: bool,
}

impl Default for MultiString {
    fn default() -> Self {
        Self::new("", Mode::Ascii)
    }
}

impl MultiString {
    pub fn new(text: &str, mode: Mode) -> Self {
        Self {
            text: text.to_string(),
            mode,
            upcase: true,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
    }

    /// Replace text and mode without converting.
    pub fn set_text_with_mode(&mut self, text: &str, mode: Mode) {
        self.text = text.to_string();
        self.mode = mode;
    }

    pub fn upcase(&self) -> bool {
        self.upcase
    }

    /// Render hexadecimal digits in upper case.
    pub fn set_upcase(&mut self, upcase: bool) {
        self.upcase = upcase;
    }

    pub fn get_byte_array(&self) -> ByteConversion {
        let Some(base) = self.mode.base() else {
            return ByteConversion {
                bytes: self.text.as_bytes().to_vec(),
                ok: true,
            };
        };
        let digits: Vec<char> = self.text.chars().filter(|&c| c != ' ').collect();
        let mut conversion = ByteConversion {
            bytes: Vec::with_capacity(digits.len() / self.mode.width() + 1),
            ok: true,
        };
        for group in digits.chunks(self.mode.width()) {
            match parse_group(group, base) {
                Some(byte) => conversion.bytes.push(byte),
                None => {
                    let group: String = group.iter().collect();
                    log::warn!("cannot convert '{group}' to a {} byte", self.mode);
                    conversion.ok = false;
                }
            }
        }
        conversion
    }

    pub fn set_byte_array(&mut self, bytes: &[u8]) {
        self.text = match self.mode {
            Mode::Ascii => String::from_utf8_lossy(bytes).into_owned(),
            mode => bytes
                .iter()
                .map(|&b| render_byte(b, mode, self.upcase))
                .collect::<Vec<_>>()
                .join(" "),
        };
    }

    /// Switch modes keeping the byte content: the text is parsed under the
    /// current mode and rendered again under `mode`.
    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode == mode {
            return;
        }
        let conversion = self.get_byte_array();
        self.mode = mode;
        self.set_byte_array(&conversion.bytes);
    }
}

fn parse_group(group: &[char], base: u32) -> Option<u8> {
    group.iter().try_fold(0u32, |acc, ch| {
        let digit = ch.to_digit(base)?;
        let value = acc * base + digit;
        (value <= u8::MAX as u32).then_some(value)
    })
    .map(|value| value as u8)
}

fn render_byte(byte: u8, mode: Mode, upcase: bool) -> String {
    match mode {
        Mode::Hexadecimal if upcase => format!("{byte:02X}"),
        Mode::Hexadecimal => format!("{byte:02x}"),
        Mode::Decimal => format!("{byte:03}"),
        Mode::Binary => format!("{byte:08b}"),
        Mode::Ascii => char::from(byte).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_switch_preserves_bytes() {
        let mut text = MultiString::new("AB", Mode::Ascii);
        assert_eq!(text.get_byte_array().bytes, [0x41, 0x42]);
        text.set_mode(Mode::Hexadecimal);
        assert_eq!(text.text(), "41 42");
        text.set_mode(Mode::Ascii);
        assert_eq!(text.text(), "AB");
        assert_eq!(text.get_byte_array().bytes, [0x41, 0x42]);
    }

    #[test]
    fn test_numeric_renderings() {
        let mut text = MultiString::new("", Mode::Decimal);
        text.set_byte_array(&[7, 200]);
        assert_eq!(text.text(), "007 200");
        text.set_mode(Mode::Binary);
        assert_eq!(text.text(), "00000111 11001000");
        text.set_mode(Mode::Hexadecimal);
        assert_eq!(text.text(), "07 C8");
        text.set_upcase(false);
        text.set_byte_array(&[0xab]);
        assert_eq!(text.text(), "ab");
    }

    #[test]
    fn test_spaces_are_ignored_when_parsing() {
        let text = MultiString::new("0 d0a 4", Mode::Hexadecimal);
        let conversion = text.get_byte_array();
        assert!(conversion.ok);
        assert_eq!(conversion.bytes, [0x0d, 0x0a, 0x04]);
    }

    #[test]
    fn test_malformed_groups_are_skipped() {
        let text = MultiString::new("41 G2 43", Mode::Hexadecimal);
        let conversion = text.get_byte_array();
        assert!(!conversion.ok);
        assert_eq!(conversion.bytes, [0x41, 0x43]);

        let text = MultiString::new("255 256 010", Mode::Decimal);
        let conversion = text.get_byte_array();
        assert!(!conversion.ok);
        assert_eq!(conversion.bytes, [255, 10]);
    }

    #[test]
    fn test_fixup_regroups_digits() {
        assert_eq!(Mode::Hexadecimal.fixup("a1b2-c"), "A1 B2 C");
        assert_eq!(Mode::Decimal.fixup("1234x5"), "123 45");
        assert_eq!(Mode::Binary.fixup("10102"), "1010");
        assert_eq!(Mode::Ascii.fixup("as is"), "as is");
        assert!(Mode::Hexadecimal.accepts('f'));
        assert!(!Mode::Decimal.accepts('a'));
        assert!(Mode::Ascii.accepts('~'));
    }
}
