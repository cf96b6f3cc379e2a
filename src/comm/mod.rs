//!
//! The transport contract and the endpoints it is opened for.
//!
//! A [`TransportProvider`] opens one [`Transport`] session per read/write call. The default
//! provider is [`crate::io::modbus::ModbusTransportProvider`], which frames requests with
//! [rmodbus](https://crates.io/crates/rmodbus) over the byte streams of this module.
use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub mod serial;
pub mod tcp;

/// The standard Modbus TCP port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Modbus framing
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Protocol {
    /// MBAP header
    Tcp,
    /// Binary frames with CRC
    Rtu,
    /// Hex-encoded lines with LRC
    Ascii,
}

/// Serial line framing
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    #[default]
    Rtu,
    Ascii,
}

impl From<Framing> for Protocol {
    fn from(value: Framing) -> Self {
        match value {
            Framing::Rtu => Protocol::Rtu,
            Framing::Ascii => Protocol::Ascii,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

/// Modbus TCP endpoint options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpOptions {
    pub host: String,
    pub port: u16,
    /// Connect, read and write timeout, zero disables
    pub timeout_seconds: f64,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_TCP_PORT,
            timeout_seconds: 3.0,
        }
    }
}

impl TcpOptions {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_owned(),
            ..Self::default()
        }
    }
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_seconds = timeout.as_secs_f64();
        self
    }
    pub fn timeout_duration(&self) -> Duration {
        seconds(self.timeout_seconds)
    }
}

/// Serial (RTU/ASCII) endpoint options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialOptions {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub timeout_seconds: f64,
    pub framing: Framing,
}

#[cfg(windows)]
const DEFAULT_SERIAL_PORT: &str = "COM1";
#[cfg(not(windows))]
const DEFAULT_SERIAL_PORT: &str = "/dev/ttyS0";

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERIAL_PORT.to_owned(),
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            timeout_seconds: 0.1,
            framing: Framing::Rtu,
        }
    }
}

impl SerialOptions {
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_owned(),
            ..Self::default()
        }
    }
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
    pub fn data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }
    pub fn stop_bits(mut self, stop_bits: u8) -> Self {
        self.stop_bits = stop_bits;
        self
    }
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_seconds = timeout.as_secs_f64();
        self
    }
    pub fn framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }
    pub fn timeout_duration(&self) -> Duration {
        seconds(self.timeout_seconds)
    }
}

/// A physical or network endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Endpoint {
    Tcp(TcpOptions),
    Serial(SerialOptions),
}

impl Endpoint {
    pub fn protocol(&self) -> Protocol {
        match self {
            Endpoint::Tcp(_) => Protocol::Tcp,
            Endpoint::Serial(options) => options.framing.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(o) => write!(f, "tcp://{}:{}", o.host, o.port),
            Endpoint::Serial(o) => write!(
                f,
                "{}://{}:{}",
                match o.framing {
                    Framing::Rtu => "rtu",
                    Framing::Ascii => "ascii",
                },
                o.port,
                o.baud_rate
            ),
        }
    }
}

/// A byte stream a Modbus session runs over
pub trait Stream: Read + Write {
    /// Discards unread input (stale bytes of a previous transaction)
    fn clear_input(&mut self) -> Result<()> {
        Ok(())
    }
    /// Releases the underlying connection
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One open transport session: the four read and four write Modbus primitives
pub trait Transport {
    fn read_coils(&mut self, slave: u8, address: u16, count: u16) -> Result<Vec<bool>>;
    fn read_discrete_inputs(&mut self, slave: u8, address: u16, count: u16) -> Result<Vec<bool>>;
    fn read_holding_registers(&mut self, slave: u8, address: u16, count: u16)
        -> Result<Vec<u16>>;
    fn read_input_registers(&mut self, slave: u8, address: u16, count: u16) -> Result<Vec<u16>>;
    fn write_single_coil(&mut self, slave: u8, address: u16, value: bool) -> Result<()>;
    fn write_multiple_coils(&mut self, slave: u8, address: u16, values: &[bool]) -> Result<()>;
    fn write_single_register(&mut self, slave: u8, address: u16, value: u16) -> Result<()>;
    fn write_multiple_registers(&mut self, slave: u8, address: u16, values: &[u16])
        -> Result<()>;
    /// Closes the session. Sessions are closed on drop as well, this reports close errors
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens transport sessions for endpoints
pub trait TransportProvider: Send + Sync {
    fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>>;
}

pub(crate) fn check_count(count: u16, max: u16) -> Result<()> {
    if count == 0 || count > max {
        return Err(Error::invalid_data(format!(
            "count must be in 1..={}, got {}",
            max, count
        )));
    }
    Ok(())
}
