use anyhow::Result;
use std::io::Write;

use crate::protocol::tty::{available_ports, PortEntry};

/// Print the available ports, one per line or as a JSON array.
pub fn list_ports(json: bool) -> Result<()> {
    let ports = available_ports();
    let mut stdout = std::io::stdout().lock();
    write_ports(&mut stdout, &ports, json)
}

fn write_ports(out: &mut impl Write, ports: &[PortEntry], json: bool) -> Result<()> {
    if json {
        serde_json::to_writer(&mut *out, ports)?;
        writeln!(out)?;
        return Ok(());
    }
    if ports.is_empty() {
        writeln!(out, "No serial ports found")?;
    }
    for port in ports {
        writeln!(out, "{}", port.label())?;
    }
    Ok(())
}
