use crate::protocol::settings::OpenMode;

/// The single pending command slot. A new submission overwrites whatever
/// is pending; only `Write` coalesces, through the shared byte queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    #[default]
    Undefined,
    Open(OpenMode),
    Close,
    Write,
    Stop,
}

/// Modem line change requested by the controller, applied by the worker at
/// the top of its next loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRequest {
    Dtr(bool),
    Rts(bool),
    ToggleDtr,
    ToggleRts,
}

/// Delay policy applied after each transmitted byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    pub delay_after_byte_ms: u64,
    pub delay_after_chr_ms: u64,
    /// The chr delay applies only to a byte equal to this one-byte sequence.
    pub delay_chr: Vec<u8>,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            delay_after_byte_ms: 1,
            delay_after_chr_ms: 1,
            delay_chr: Vec::new(),
        }
    }
}

impl Pacing {
    pub fn delay_for(&self, byte: u8) -> u64 {
        if !self.delay_chr.is_empty() && self.delay_chr == [byte] {
            self.delay_after_chr_ms
        } else {
            self.delay_after_byte_ms
        }
    }
}
