use std::fmt::Write;

/// Render `bytes` as a hex dump with `wrap` bytes per line.
///
/// Each line is `"XX "` per byte, two spaces per byte missing from a short
/// last line, two spaces, then an ASCII gutter of exactly `wrap` characters
/// (0x20..=0x7F literal, anything else `.`, padded with spaces) and `\n`.
pub fn dump_buf(bytes: &[u8], wrap: usize) -> String {
    let wrap = wrap.max(1);
    let lines = bytes.len().div_ceil(wrap);
    let mut out = String::with_capacity(lines * (wrap * 4 + 3));
    for group in bytes.chunks(wrap) {
        for byte in group {
            // Writing into a String cannot fail.
            let _ = write!(out, "{byte:02X} ");
        }
        for _ in group.len()..wrap {
            out.push_str("  ");
        }
        out.push_str("  ");
        out.extend(group.iter().map(|&b| gutter_char(b)));
        for _ in group.len()..wrap {
            out.push(' ');
        }
        out.push('\n');
    }
    out
}

fn gutter_char(byte: u8) -> char {
    if (0x20..=0x7F).contains(&byte) {
        char::from(byte)
    } else {
        '.'
    }
}
