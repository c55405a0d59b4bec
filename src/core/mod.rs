/// UI-independent data model for serterm
///
/// This module contains the pieces a front end drives but that never touch
/// the terminal:
/// - The received-data console model and its histories
/// - Multi-radix input text
/// - Validated timestamp patterns
/// - Persisted configuration
pub mod config;
pub mod console;
pub mod multistring;
pub mod timestamp;

pub use config::AppConfig;
pub use console::{ConsoleEvent, ConsoleModel, ConsoleOptions};
pub use multistring::{Mode, MultiString};
pub use timestamp::TimestampFormat;

use strum::IntoEnumIterator;

/// The variant declared after `current`, wrapping to the first.
pub fn next_variant<T>(current: T) -> T
where
    T: IntoEnumIterator + PartialEq + Copy,
{
    T::iter()
        .skip_while(|item| *item != current)
        .nth(1)
        .or_else(|| T::iter().next())
        .unwrap_or(current)
}
