//! Serial port enumeration for the port picker and `--list-ports`.

use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};
use std::{cmp::Ordering, collections::HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

/// One enumerated port, flattened for display and JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortEntry {
    pub name: String,
    pub kind: PortKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

impl PortEntry {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PortKind::Unknown,
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }

    /// Short human label, e.g. `"/dev/ttyUSB0 [usb 0403:6001 FT232R]"`.
    pub fn label(&self) -> String {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => {
                let product = self
                    .product
                    .as_deref()
                    .map(|p| format!(" {p}"))
                    .unwrap_or_default();
                format!("{} [usb {vid:04x}:{pid:04x}{product}]", self.name)
            }
            _ => self.name.clone(),
        }
    }
}

impl From<SerialPortInfo> for PortEntry {
    fn from(info: SerialPortInfo) -> Self {
        let mut entry = PortEntry::named(&info.port_name);
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                entry.kind = PortKind::Usb;
                entry.vid = Some(usb.vid);
                entry.pid = Some(usb.pid);
                entry.serial_number = usb.serial_number;
                entry.manufacturer = usb.manufacturer;
                entry.product = usb.product;
            }
            SerialPortType::PciPort => entry.kind = PortKind::Pci,
            SerialPortType::BluetoothPort => entry.kind = PortKind::Bluetooth,
            SerialPortType::Unknown => {}
        }
        entry
    }
}

/// Ports present on the system, USB adapters first.
pub fn available_ports() -> Vec<PortEntry> {
    let raw = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(err) => {
            log::warn!("failed to enumerate serial ports: {err}");
            Vec::new()
        }
    };
    sort_and_dedup_ports(raw.into_iter().map(PortEntry::from).collect())
}

pub(crate) fn sort_and_dedup_ports(raw: Vec<PortEntry>) -> Vec<PortEntry> {
    let mut seen = HashSet::new();
    let mut ports: Vec<PortEntry> = raw
        .into_iter()
        .filter(|p| {
            let key = match (p.vid, p.pid) {
                (Some(vid), Some(pid)) => format!("{}:{vid:04x}:{pid:04x}", base_name(&p.name)),
                _ => base_name(&p.name),
            };
            seen.insert(key)
        })
        .collect();
    ports.sort_by(|a, b| {
        priority(a)
            .cmp(&priority(b))
            .then_with(|| natural_cmp(&a.name, &b.name))
    });
    ports
}

fn base_name(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .to_lowercase()
}

fn priority(port: &PortEntry) -> u8 {
    let name = base_name(&port.name);
    if port.kind == PortKind::Usb || name.contains("usb") {
        0
    } else if name.contains("acm") {
        1
    } else if name.starts_with("ttys") || name.starts_with("com") {
        2
    } else {
        10
    }
}

/// Compare names so that embedded numbers sort by value (`COM2` < `COM10`).
fn natural_cmp(a: &str, b: &str) -> Ordering {
    fn split(s: &str) -> (&str, Option<u64>) {
        let digits = s.len() - s.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        let (head, tail) = s.split_at(s.len() - digits);
        (head, tail.parse().ok())
    }
    let (ha, na) = split(a);
    let (hb, nb) = split(b);
    ha.cmp(hb).then(na.cmp(&nb)).then_with(|| a.cmp(b))
}
