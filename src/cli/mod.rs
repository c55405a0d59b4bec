pub mod actions;

use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

use crate::{
    core::config::{self, AppConfig},
    protocol::settings::{DataBits, FlowControl, Parity, StopBits},
};

pub fn build_command() -> Command {
    Command::new("serterm")
        .about("Serial terminal with paced transmission and traffic logging")
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Serial port to open, e.g. /dev/ttyUSB0 or COM3")
                .value_name("PORT"),
        )
        .arg(
            Arg::new("baud")
                .long("baud")
                .short('b')
                .help("Baud rate")
                .value_name("BAUD")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("data-bits")
                .long("data-bits")
                .help("Data bits: 5, 6, 7 or 8")
                .value_name("BITS")
                .value_parser(clap::value_parser!(u8).range(5..=8)),
        )
        .arg(
            Arg::new("parity")
                .long("parity")
                .help("Parity: none, even or odd")
                .value_name("PARITY"),
        )
        .arg(
            Arg::new("stop-bits")
                .long("stop-bits")
                .help("Stop bits: 1 or 2")
                .value_name("BITS")
                .value_parser(clap::value_parser!(u8).range(1..=2)),
        )
        .arg(
            Arg::new("flow-control")
                .long("flow-control")
                .help("Flow control: none, hardware (rtscts) or software (xonxoff)")
                .value_name("FLOW"),
        )
        .arg(
            Arg::new("auto-log")
                .long("auto-log")
                .help("Log all traffic to a timestamped file in this directory")
                .value_name("DIR"),
        )
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .short('l')
                .help("List all available serial ports and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Output one-shot results in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("virtual")
                .long("virtual")
                .help("Talk to an in-memory echo device instead of real hardware")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Configuration file (default: ./serterm_config.json)")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("no-config-cache")
                .long("no-config-cache")
                .help("Neither load nor save the configuration file")
                .action(clap::ArgAction::SetTrue),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    build_command().get_matches()
}

pub fn config_path(matches: &ArgMatches) -> Result<PathBuf> {
    match matches.get_one::<String>("config") {
        Some(path) => Ok(PathBuf::from(path)),
        None => config::default_config_path(),
    }
}

/// Apply line parameters given on the command line over the loaded config.
pub fn apply_overrides(matches: &ArgMatches, config: &mut AppConfig) -> Result<()> {
    if let Some(port) = matches.get_one::<String>("port") {
        config.serial.name = port.clone();
    }
    if let Some(&baud) = matches.get_one::<u32>("baud") {
        config.serial.baud_rate = baud;
    }
    if let Some(&bits) = matches.get_one::<u8>("data-bits") {
        config.serial.data_bits =
            DataBits::from_u8(bits).ok_or_else(|| anyhow!("invalid data bits {bits}"))?;
    }
    if let Some(parity) = matches.get_one::<String>("parity") {
        config.serial.parity = parity.parse::<Parity>()?;
    }
    if let Some(&bits) = matches.get_one::<u8>("stop-bits") {
        config.serial.stop_bits = if bits == 2 {
            StopBits::Two
        } else {
            StopBits::One
        };
    }
    if let Some(flow) = matches.get_one::<String>("flow-control") {
        config.serial.flow_control = flow.parse::<FlowControl>()?;
    }
    if let Some(dir) = matches.get_one::<String>("auto-log") {
        config.auto_log.enabled = true;
        config.auto_log.directory = PathBuf::from(dir);
    }
    Ok(())
}
