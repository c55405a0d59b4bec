use anyhow::{anyhow, Result};
use chrono::{
    format::{Item, StrftimeItems},
    DateTime, Local,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Write};

/// Default prefix for timestamped console lines and log lines.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%H:%M:%S%.3f ";
/// Default auto-log file name pattern.
pub const DEFAULT_LOG_FILE_PATTERN: &str = "%y-%m-%d_%H%M%S.log";

/// A strftime pattern that is known to format without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampFormat {
    pattern: String,
}

impl TimestampFormat {
    pub fn parse(pattern: &str) -> Result<Self> {
        if let Some(pos) = StrftimeItems::new(pattern)
            .position(|item| matches!(item, Item::Error))
        {
            return Err(anyhow!(
                "invalid timestamp pattern '{pattern}' (item #{pos} is not a valid specifier)"
            ));
        }
        Ok(Self {
            pattern: pattern.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn format(&self, at: &DateTime<Local>) -> String {
        let mut out = String::with_capacity(self.pattern.len() + 8);
        if write!(out, "{}", at.format(&self.pattern)).is_err() {
            log::warn!("timestamp pattern '{}' failed to format", self.pattern);
            out.clear();
        }
        out
    }

    pub fn now(&self) -> String {
        self.format(&Local::now())
    }
}

impl Default for TimestampFormat {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl std::str::FromStr for TimestampFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for TimestampFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.pattern)
    }
}

impl<'de> Deserialize<'de> for TimestampFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
