use anyhow::Result;
use chrono::Local;
use clap::ArgMatches;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::{
    cli,
    core::config,
    protocol::transport::{SerialPortFactory, VirtualPeer},
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum LogTarget {
    File(PathBuf),
    Stderr,
}

/// `SERTERM_LOG_FILE` wins; debug builds always log to a timestamped file.
/// Release builds log to stderr only for one-shot commands: under the
/// terminal UI stderr shares the raw-mode screen, so records go to
/// `serterm.log` in the temp directory instead.
fn log_target(configured: Option<String>, interactive: bool) -> LogTarget {
    if let Some(path) = configured {
        return LogTarget::File(PathBuf::from(path));
    }
    if cfg!(debug_assertions) {
        LogTarget::File(PathBuf::from(format!(
            "./serterm_{}.log",
            Local::now().format("%Y%m%d%H%M%S")
        )))
    } else if interactive {
        LogTarget::File(std::env::temp_dir().join("serterm.log"))
    } else {
        LogTarget::Stderr
    }
}

/// Install the logger, filtered by `RUST_LOG`. `interactive` is true when
/// the terminal UI is about to take over the screen.
pub fn init_logging(interactive: bool) {
    match log_target(std::env::var("SERTERM_LOG_FILE").ok(), interactive) {
        LogTarget::File(path) => {
            if let Err(err) = init_file_logger(&path) {
                eprintln!(
                    "Failed to initialize file logger at '{}': {err}",
                    path.display()
                );
                if !interactive {
                    env_logger::init();
                }
            }
        }
        LogTarget::Stderr => env_logger::init(),
    }
}

fn init_file_logger(path: &Path) -> io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} {} [{}] - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(file)))
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .init();

    log::info!("File logger initialized at {}", path.display());

    Ok(())
}

/// Dispatch a parsed command line: one-shot actions or the terminal UI.
pub fn run(matches: &ArgMatches) -> Result<()> {
    if matches.get_flag("list-ports") {
        return cli::actions::list_ports(matches.get_flag("json"));
    }

    config::set_no_cache(matches.get_flag("no-config-cache"));
    let config_path = cli::config_path(matches)?;
    let mut app_config = config::load(&config_path)?;
    cli::apply_overrides(matches, &mut app_config)?;

    if matches.get_flag("virtual") {
        log::info!("Using the in-memory echo device");
        crate::tui::start(VirtualPeer::echo(), app_config, config_path)
    } else {
        crate::tui::start(SerialPortFactory, app_config, config_path)
    }
}
