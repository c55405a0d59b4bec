//! Persisted application configuration.
//!
//! The configuration is a single JSON document in the working directory
//! (`serterm_config.json` unless `--config` says otherwise). Every field has
//! a serde default so files written by older builds, or edited by hand,
//! still load.
//!
//! ## --no-config-cache flag
//!
//! With `--no-config-cache` both [`load`] and [`save`] are skipped and the
//! defaults are used. Tests rely on this to start from a clean state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use strum::EnumIter;

use crate::{
    core::{
        console::{ConsoleOptions, TrimPolicy},
        multistring::Mode,
        timestamp::TimestampFormat,
    },
    protocol::{
        settings::PortSettings,
        worker::{AutoLogConfig, Pacing, WorkerOptions},
    },
};

pub const DEFAULT_CONFIG_FILE: &str = "serterm_config.json";
pub const MAX_CUSTOM_TEXTS: usize = 6;

static NO_CONFIG_CACHE: AtomicBool = AtomicBool::new(false);

/// Disable loading and saving for the rest of the process.
pub fn set_no_cache(enabled: bool) {
    NO_CONFIG_CACHE.store(enabled, Ordering::SeqCst);
    if enabled {
        log::info!("Config cache disabled (--no-config-cache)");
    }
}

fn is_no_cache() -> bool {
    NO_CONFIG_CACHE.load(Ordering::SeqCst)
}

/// Line terminator choices offered for receive and transmit.
#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    None,
    Cr,
    Lf,
    #[default]
    CrLf,
    LfCr,
}

impl LineEnding {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            LineEnding::None => b"",
            LineEnding::Cr => b"\r",
            LineEnding::Lf => b"\n",
            LineEnding::CrLf => b"\r\n",
            LineEnding::LfCr => b"\n\r",
        }
    }

    pub fn next(self) -> LineEnding {
        crate::core::next_variant(self)
    }
}

impl fmt::Display for LineEnding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LineEnding::None => "None",
            LineEnding::Cr => "CR",
            LineEnding::Lf => "LF",
            LineEnding::CrLf => "CR+LF",
            LineEnding::LfCr => "LF+CR",
        })
    }
}

impl FromStr for LineEnding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('+', "").as_str() {
            "none" | "" => Ok(LineEnding::None),
            "cr" => Ok(LineEnding::Cr),
            "lf" => Ok(LineEnding::Lf),
            "crlf" => Ok(LineEnding::CrLf),
            "lfcr" => Ok(LineEnding::LfCr),
            other => anyhow::bail!("unknown line ending '{other}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub line_ending_rx: LineEnding,
    pub line_ending_tx: LineEnding,
    pub auto_wrap_column: usize,
    pub data_size_limit: usize,
    pub hysteresis_percent: usize,
    pub display_size: usize,
    pub hex_wrap_width: usize,
    pub timestamp_format: TimestampFormat,
    pub local_echo: bool,
    pub hex_view: bool,
    pub timestamp_view: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        let trim = TrimPolicy::default();
        Self {
            line_ending_rx: LineEnding::CrLf,
            line_ending_tx: LineEnding::Cr,
            auto_wrap_column: 0,
            data_size_limit: trim.size_limit,
            hysteresis_percent: trim.hysteresis_percent,
            display_size: 10_000,
            hex_wrap_width: 16,
            timestamp_format: TimestampFormat::default(),
            local_echo: true,
            hex_view: false,
            timestamp_view: false,
        }
    }
}

impl ConsoleConfig {
    pub fn console_options(&self) -> ConsoleOptions {
        ConsoleOptions {
            line_ending_rx: self.line_ending_rx.as_bytes().to_vec(),
            line_ending_tx: self.line_ending_tx.as_bytes().to_vec(),
            hex_wrap_width: self.hex_wrap_width.max(1),
            auto_wrap_column: self.auto_wrap_column,
            trim: TrimPolicy {
                size_limit: self.data_size_limit,
                hysteresis_percent: self.hysteresis_percent,
            },
            display_size: self.display_size,
            timestamp_format: self.timestamp_format.clone(),
            hex_mode: self.hex_view,
            timestamp_mode: self.timestamp_view,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmitConfig {
    pub delay_after_byte_ms: u64,
    /// Applied after the last byte of the transmit line ending.
    pub delay_after_newline_ms: u64,
    pub append_line_ending: bool,
    pub send_mode: Mode,
    pub progress_threshold_ms: u64,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            delay_after_byte_ms: 1,
            delay_after_newline_ms: 1,
            append_line_ending: true,
            send_mode: Mode::Ascii,
            progress_threshold_ms: 2000,
        }
    }
}

impl TransmitConfig {
    pub fn pacing(&self, tx_ending: LineEnding) -> Pacing {
        Pacing {
            delay_after_byte_ms: self.delay_after_byte_ms,
            delay_after_chr_ms: self.delay_after_newline_ms,
            delay_chr: tx_ending
                .as_bytes()
                .last()
                .map(|&b| vec![b])
                .unwrap_or_default(),
        }
    }
}

/// Recently sent input lines, one list per send mode, newest last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendHistory {
    pub max_entries: usize,
    pub ascii: Vec<String>,
    pub hexadecimal: Vec<String>,
    pub decimal: Vec<String>,
    pub binary: Vec<String>,
}

impl Default for SendHistory {
    fn default() -> Self {
        Self {
            max_entries: 50,
            ascii: Vec::new(),
            hexadecimal: Vec::new(),
            decimal: Vec::new(),
            binary: Vec::new(),
        }
    }
}

impl SendHistory {
    pub fn entries(&self, mode: Mode) -> &[String] {
        match mode {
            Mode::Ascii => &self.ascii,
            Mode::Hexadecimal => &self.hexadecimal,
            Mode::Decimal => &self.decimal,
            Mode::Binary => &self.binary,
        }
    }

    fn entries_mut(&mut self, mode: Mode) -> &mut Vec<String> {
        match mode {
            Mode::Ascii => &mut self.ascii,
            Mode::Hexadecimal => &mut self.hexadecimal,
            Mode::Decimal => &mut self.decimal,
            Mode::Binary => &mut self.binary,
        }
    }

    /// Record `text` as the newest entry, moving an existing duplicate.
    pub fn push(&mut self, mode: Mode, text: &str) {
        if text.is_empty() {
            return;
        }
        let max = self.max_entries;
        let entries = self.entries_mut(mode);
        entries.retain(|entry| entry != text);
        entries.push(text.to_string());
        if max > 0 && entries.len() > max {
            let excess = entries.len() - max;
            entries.drain(..excess);
        }
    }

    /// Entry `back` steps from the newest (0 is the newest).
    pub fn recall(&self, mode: Mode, back: usize) -> Option<&str> {
        let entries = self.entries(mode);
        entries
            .len()
            .checked_sub(back + 1)
            .map(|index| entries[index].as_str())
    }
}

/// Quick-send text bound to a function key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomText {
    pub text: String,
    pub mode: Mode,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: PortSettings,
    pub console: ConsoleConfig,
    pub transmit: TransmitConfig,
    pub auto_log: AutoLogConfig,
    pub history: SendHistory,
    pub custom_texts: Vec<CustomText>,
}

impl AppConfig {
    /// Clamp values a hand-edited file may have pushed out of range.
    pub fn normalize(&mut self) {
        self.custom_texts.truncate(MAX_CUSTOM_TEXTS);
        self.console.hex_wrap_width = self.console.hex_wrap_width.max(1);
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            progress_threshold: Duration::from_millis(self.transmit.progress_threshold_ms),
            pacing: self.transmit.pacing(self.console.line_ending_tx),
            auto_log: self.auto_log.clone(),
            line_ending_rx: self.console.line_ending_rx.as_bytes().to_vec(),
            line_ending_tx: self.console.line_ending_tx.as_bytes().to_vec(),
            ..WorkerOptions::default()
        }
    }
}

/// `serterm_config.json` in the working directory.
pub fn default_config_path() -> Result<PathBuf> {
    let dir = std::env::current_dir().context("Failed to get current working directory")?;
    Ok(dir.join(DEFAULT_CONFIG_FILE))
}

/// Read the configuration at `path`. A missing file yields the defaults.
pub fn load(path: &Path) -> Result<AppConfig> {
    if is_no_cache() {
        log::debug!("Skipping config load (--no-config-cache enabled)");
        return Ok(AppConfig::default());
    }
    if !path.exists() {
        log::debug!("No saved config found at {path:?}");
        return Ok(AppConfig::default());
    }

    let json =
        fs::read_to_string(path).with_context(|| format!("Failed to read config from {path:?}"))?;
    let mut config: AppConfig =
        serde_json::from_str(&json).with_context(|| format!("Failed to parse config {path:?}"))?;
    config.normalize();

    log::info!("Loaded config from {path:?}");
    Ok(config)
}

pub fn save(config: &AppConfig, path: &Path) -> Result<()> {
    if is_no_cache() {
        log::debug!("Skipping config save (--no-config-cache enabled)");
        return Ok(());
    }

    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(path, json).with_context(|| format!("Failed to write config to {path:?}"))?;

    log::debug!("Saved config to {path:?}");
    Ok(())
}
