//! Byte stream to the relay board and how it is opened.

use anyhow::Context;
use serialport::ClearBuffer;
use serialport::DataBits;
use serialport::FlowControl;
use serialport::Parity;
use serialport::SerialPort;
use serialport::StopBits;
use std::io;
use std::io::Read;
use std::io::Write;
use std::time::Duration;

pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2500);
/// USB serial adapters drop bytes written right after open.
pub const DEFAULT_CONNECT_SETTLE: Duration = Duration::from_millis(500);
/// Relay actuation and board processing time after each command.
pub const DEFAULT_COMMAND_SETTLE: Duration = Duration::from_millis(300);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub read_timeout: Duration,
    pub connect_settle: Duration,
    pub command_settle: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            device: String::from(DEFAULT_DEVICE),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout: DEFAULT_READ_TIMEOUT,
            connect_settle: DEFAULT_CONNECT_SETTLE,
            command_settle: DEFAULT_COMMAND_SETTLE,
        }
    }
}

impl ConnectionConfig {
    pub fn new<S: Into<String>>(device: S) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_settle_delays(mut self, connect_settle: Duration, command_settle: Duration) -> Self {
        self.connect_settle = connect_settle;
        self.command_settle = command_settle;
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Buffer {
    Input,
    Output,
    All,
}

/// An open connection to the board. Dropping it closes the connection.
pub trait RelayPort: Read + Write + Send {
    fn bytes_to_read(&self) -> io::Result<u32>;

    fn bytes_to_write(&self) -> io::Result<u32>;

    fn clear(&self, buffer: Buffer) -> io::Result<()>;

    /// Upper bound for the next blocking read.
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

pub trait PortOpener: Send {
    fn open(&self, config: &ConnectionConfig) -> io::Result<Box<dyn RelayPort>>;
}

pub struct SerialRelayPort {
    port: Box<dyn SerialPort>,
}

impl Read for SerialRelayPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialRelayPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl RelayPort for SerialRelayPort {
    fn bytes_to_read(&self) -> io::Result<u32> {
        Ok(self.port.bytes_to_read()?)
    }

    fn bytes_to_write(&self) -> io::Result<u32> {
        Ok(self.port.bytes_to_write()?)
    }

    fn clear(&self, buffer: Buffer) -> io::Result<()> {
        let buffer = match buffer {
            Buffer::Input => ClearBuffer::Input,
            Buffer::Output => ClearBuffer::Output,
            Buffer::All => ClearBuffer::All,
        };
        Ok(self.port.clear(buffer)?)
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        Ok(self.port.set_timeout(timeout)?)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SerialPortOpener;

impl PortOpener for SerialPortOpener {
    fn open(&self, config: &ConnectionConfig) -> io::Result<Box<dyn RelayPort>> {
        let port = serialport::new(&config.device, config.baud_rate)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .flow_control(FlowControl::None)
            .timeout(config.read_timeout)
            .open()?;
        Ok(Box::new(SerialRelayPort { port }))
    }
}

/// Device identifiers of the serial ports the host currently knows about.
pub fn list_available_ports() -> anyhow::Result<Vec<String>> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    Ok(ports.into_iter().map(|port| port.port_name).collect())
}
