use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::core::timestamp::{TimestampFormat, DEFAULT_LOG_FILE_PATTERN};

/// Persisted auto-log preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoLogConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Truncate the file on start instead of appending.
    #[serde(default)]
    pub overwrite: bool,
    /// strftime pattern expanded when logging starts.
    #[serde(default = "default_file_name_pattern")]
    pub file_name_pattern: TimestampFormat,
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub timestamp_format: TimestampFormat,
}

fn default_file_name_pattern() -> TimestampFormat {
    TimestampFormat::parse(DEFAULT_LOG_FILE_PATTERN).unwrap_or_default()
}

fn default_directory() -> PathBuf {
    PathBuf::from(".")
}

impl Default for AutoLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            overwrite: false,
            file_name_pattern: default_file_name_pattern(),
            directory: default_directory(),
            timestamp_format: TimestampFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Mirrors worker traffic into a text file, one timestamp per logical line.
pub struct ByteLog {
    config: AutoLogConfig,
    file: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    description: String,
    column: usize,
    line_ending_rx: Vec<u8>,
    line_ending_tx: Vec<u8>,
}

impl ByteLog {
    pub fn new(config: AutoLogConfig) -> Self {
        Self {
            config,
            file: None,
            path: None,
            description: String::new(),
            column: 0,
            line_ending_rx: b"\n".to_vec(),
            line_ending_tx: b"\n".to_vec(),
        }
    }

    pub fn config(&self) -> &AutoLogConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.file.is_some()
    }

    /// Path of the file currently being written.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Disabling an active log closes it with the stop banner.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
        if !enabled {
            self.stop();
        }
    }

    pub fn set_overwrite(&mut self, overwrite: bool) {
        self.config.overwrite = overwrite;
    }

    pub fn set_file_name_pattern(&mut self, pattern: TimestampFormat) {
        self.config.file_name_pattern = pattern;
    }

    pub fn set_directory(&mut self, directory: PathBuf) {
        self.config.directory = directory;
    }

    pub fn set_timestamp_format(&mut self, format: TimestampFormat) {
        self.config.timestamp_format = format;
    }

    /// Inbound bytes equal to the last byte of `ending` end a log line.
    pub fn set_line_ending_rx(&mut self, ending: &[u8]) {
        self.line_ending_rx = ending.to_vec();
    }

    pub fn set_line_ending_tx(&mut self, ending: &[u8]) {
        self.line_ending_tx = ending.to_vec();
    }

    /// Open the log file and write the start banner. A no-op while disabled.
    pub fn start(&mut self, description: &str) -> Result<()> {
        self.stop();
        if !self.config.enabled {
            log::debug!("auto log disabled");
            return Ok(());
        }
        let file_name = self.config.file_name_pattern.now();
        let path = self.config.directory.join(file_name);
        let mut options = OpenOptions::new();
        options.create(true);
        if self.config.overwrite {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options
            .open(&path)
            .with_context(|| format!("cannot open log file {}", path.display()))?;
        log::info!("logging traffic to {}", path.display());
        let mut file = BufWriter::new(file);
        let banner = self.banner("Start", description);
        file.write_all(&banner)
            .with_context(|| format!("cannot write log file {}", path.display()))?;
        self.file = Some(file);
        self.path = Some(path);
        self.description = description.to_string();
        self.column = 0;
        Ok(())
    }

    /// Append observed bytes. Each logical line starts with a flush and a
    /// timestamp prefix.
    pub fn record(&mut self, bytes: &[u8], direction: Direction) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let terminator = match direction {
            Direction::Inbound => self.line_ending_rx.last().copied(),
            Direction::Outbound => self.line_ending_tx.last().copied(),
        };
        let mut result = Ok(());
        for &byte in bytes {
            if self.column == 0 {
                let stamp = self.config.timestamp_format.now();
                result = file.flush().and_then(|_| file.write_all(stamp.as_bytes()));
                if result.is_err() {
                    break;
                }
            }
            if let Err(err) = file.write_all(&[byte]) {
                result = Err(err);
                break;
            }
            self.column += 1;
            if Some(byte) == terminator {
                self.column = 0;
            }
        }
        if let Err(err) = result {
            log::warn!("auto log write failed, logging stopped: {err}");
            self.file = None;
            self.path = None;
        }
    }

    /// Write the stop banner and close the file.
    pub fn stop(&mut self) {
        if let Some(mut file) = self.file.take() {
            let banner = self.banner("Stop", &self.description);
            if let Err(err) = file.write_all(&banner).and_then(|_| file.flush()) {
                log::warn!("failed to finish log file: {err}");
            }
            if let Some(path) = self.path.take() {
                log::info!("closed log file {}", path.display());
            }
        }
    }

    fn banner(&self, what: &str, description: &str) -> Vec<u8> {
        let stamp = self.config.timestamp_format.now();
        let mut line = format!(
            "{what} logging on {}, serial port {description}",
            stamp.trim()
        )
        .into_bytes();
        if self.line_ending_rx.is_empty() {
            line.push(b'\n');
        } else {
            line.extend_from_slice(&self.line_ending_rx);
        }
        line
    }
}

impl Drop for ByteLog {
    fn drop(&mut self) {
        self.stop();
    }
}
