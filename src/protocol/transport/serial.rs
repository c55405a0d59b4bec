use serialport::SerialPort;
use std::{
    io::{Read, Write},
    time::{Duration, Instant},
};

use super::{PinoutSignals, Transport, TransportError, TransportErrorKind, TransportFactory};
use crate::protocol::settings::{DataBits, FlowControl, OpenMode, Parity, StopBits};

const READ_TIMEOUT: Duration = Duration::from_millis(10);
const READABLE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// [`Transport`] backed by the OS serial API through the `serialport` crate.
pub struct SerialPortTransport {
    name: String,
    port: Option<Box<dyn SerialPort>>,
    mode: OpenMode,
    dtr: bool,
    rts: bool,
}

impl Default for SerialPortTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialPortTransport {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            port: None,
            mode: OpenMode::ReadWrite,
            dtr: false,
            rts: false,
        }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or_else(TransportError::not_open)
    }
}

impl Transport for SerialPortTransport {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn set_port_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn open(&mut self, mode: OpenMode) -> Result<(), TransportError> {
        if self.port.is_some() {
            return Ok(());
        }
        // Line parameters are applied by the caller after opening.
        let port = serialport::new(self.name.as_str(), 9600)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|err| TransportError::from_serialport(&err, TransportErrorKind::Open))?;
        log::debug!("serial port {} opened ({mode:?})", self.name);
        self.port = Some(port);
        self.mode = mode;
        // Most drivers assert both lines on open.
        self.dtr = true;
        self.rts = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::debug!("serial port {} closed", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn is_writable(&self) -> bool {
        self.port.is_some() && self.mode.is_writable()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let port = self.port_mut()?;
        port.write(bytes)
            .map_err(|err| TransportError::from_io(&err, TransportErrorKind::Write))
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let port = self.port_mut()?;
        port.flush()
            .map_err(|err| TransportError::from_io(&err, TransportErrorKind::Write))
    }

    fn wait_for_readable(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        let deadline = Instant::now() + timeout;
        let port = self.port_mut()?;
        loop {
            let pending = port
                .bytes_to_read()
                .map_err(|err| TransportError::from_serialport(&err, TransportErrorKind::Read))?;
            if pending > 0 {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            std::thread::sleep(READABLE_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn read_all(&mut self) -> Result<Vec<u8>, TransportError> {
        let port = self.port_mut()?;
        let pending = port
            .bytes_to_read()
            .map_err(|err| TransportError::from_serialport(&err, TransportErrorKind::Read))?
            as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; pending];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(err) => Err(TransportError::from_io(&err, TransportErrorKind::Read)),
        }
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        self.port_mut()?
            .set_baud_rate(baud_rate)
            .map_err(|err| TransportError::from_serialport(&err, TransportErrorKind::Unsupported))
    }

    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<(), TransportError> {
        self.port_mut()?
            .set_data_bits(data_bits.into())
            .map_err(|err| TransportError::from_serialport(&err, TransportErrorKind::Unsupported))
    }

    fn set_parity(&mut self, parity: Parity) -> Result<(), TransportError> {
        self.port_mut()?
            .set_parity(parity.into())
            .map_err(|err| TransportError::from_serialport(&err, TransportErrorKind::Unsupported))
    }

    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<(), TransportError> {
        self.port_mut()?
            .set_stop_bits(stop_bits.into())
            .map_err(|err| TransportError::from_serialport(&err, TransportErrorKind::Unsupported))
    }

    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), TransportError> {
        self.port_mut()?
            .set_flow_control(flow_control.into())
            .map_err(|err| TransportError::from_serialport(&err, TransportErrorKind::Unsupported))
    }

    fn set_data_terminal_ready(&mut self, on: bool) -> Result<(), TransportError> {
        self.port_mut()?
            .write_data_terminal_ready(on)
            .map_err(|err| TransportError::from_serialport(&err, TransportErrorKind::Write))?;
        self.dtr = on;
        Ok(())
    }

    fn set_request_to_send(&mut self, on: bool) -> Result<(), TransportError> {
        self.port_mut()?
            .write_request_to_send(on)
            .map_err(|err| TransportError::from_serialport(&err, TransportErrorKind::Write))?;
        self.rts = on;
        Ok(())
    }

    fn pinout_signals(&mut self) -> Result<PinoutSignals, TransportError> {
        let (dtr, rts) = (self.dtr, self.rts);
        let port = self.port_mut()?;
        let map = |err: serialport::Error| {
            TransportError::from_serialport(&err, TransportErrorKind::Read)
        };
        let signals = PinoutSignals::NONE
            .with(PinoutSignals::DTR, dtr)
            .with(PinoutSignals::RTS, rts)
            .with(PinoutSignals::CTS, port.read_clear_to_send().map_err(map)?)
            .with(PinoutSignals::DSR, port.read_data_set_ready().map_err(map)?)
            .with(PinoutSignals::DCD, port.read_carrier_detect().map_err(map)?)
            .with(PinoutSignals::RI, port.read_ring_indicator().map_err(map)?);
        Ok(signals)
    }
}

/// Factory handing out fresh, unopened [`SerialPortTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortFactory;

impl TransportFactory for SerialPortFactory {
    fn create(&self) -> Box<dyn super::Transport> {
        Box::new(SerialPortTransport::new())
    }
}
