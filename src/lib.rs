#![ doc = include_str!( concat!( env!( "CARGO_MANIFEST_DIR" ), "/", "README.md" ) ) ]
use core::{fmt, num};
use std::env;
use std::io::Write;

pub use log::LevelFilter;

/// TCP/Serial byte streams and the transport contract
pub mod comm;
/// Connections: MIB resolution and function code dispatch
pub mod conn;
/// Modbus framing
pub mod io;
/// Named register maps
pub mod mib;
/// Process-wide default MIBs
pub mod registry;
/// Typed decoders
pub mod types;

pub type Result<T> = std::result::Result<T, Error>;

/// The crate error type
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The decoder spec names a kind which is not registered
    #[error("unknown decoder kind: {0}")]
    UnknownDecoderKind(String),
    /// The decoder spec literal or its params have an unsupported shape
    #[error("invalid decoder spec: {0}")]
    InvalidDecoderSpec(String),
    /// The register spec carries a function code with no primitive mapping
    #[error("unsupported function code: {0}")]
    UnsupportedFunctionCode(u8),
    /// A transport failure with the context it happened in
    #[error("transport error (slave {slave}{}): {message}", context_suffix(.signal, .address))]
    Transport {
        slave: u8,
        signal: Option<String>,
        address: Option<u16>,
        message: String,
    },
    /// Timeouts
    #[error("timed out")]
    Timeout,
    /// I/O errors
    #[error("I/O error: {0}")]
    IO(String),
    /// Invalid data received / parameters provided
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// All other errors
    #[error("operation failed: {0}")]
    Failed(String),
}

fn context_suffix(signal: &Option<String>, address: &Option<u16>) -> String {
    let mut s = String::new();
    if let Some(signal) = signal {
        s.push_str(", signal ");
        s.push_str(signal);
    }
    if let Some(address) = address {
        s.push_str(", address ");
        s.push_str(&address.to_string());
    }
    s
}

macro_rules! impl_error {
    ($t: ty, $key: ident) => {
        impl From<$t> for Error {
            fn from(err: $t) -> Self {
                Error::$key(err.to_string())
            }
        }
    };
}

impl_error!(rmodbus::ErrorKind, IO);
impl_error!(serial::Error, IO);
impl_error!(num::ParseIntError, InvalidData);
impl_error!(num::ParseFloatError, InvalidData);
impl_error!(binrw::Error, InvalidData);
impl_error!(serde_json::Error, InvalidDecoderSpec);

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Error::Timeout,
            _ => Error::IO(err.to_string()),
        }
    }
}

impl Error {
    pub fn invalid_data<S: fmt::Display>(msg: S) -> Self {
        Error::InvalidData(msg.to_string())
    }
    pub fn invalid_spec<S: fmt::Display>(msg: S) -> Self {
        Error::InvalidDecoderSpec(msg.to_string())
    }
    pub fn io<S: fmt::Display>(msg: S) -> Self {
        Error::IO(msg.to_string())
    }
    pub fn failed<S: fmt::Display>(msg: S) -> Self {
        Error::Failed(msg.to_string())
    }
    /// Wraps the error into [`Error::Transport`] with the given context. Configuration errors
    /// and already wrapped transport errors are returned as-is.
    pub fn in_transport(self, slave: u8, signal: Option<String>, address: Option<u16>) -> Self {
        match self {
            Error::IO(message) => Error::Transport {
                slave,
                signal,
                address,
                message,
            },
            Error::Timeout => Error::Transport {
                slave,
                signal,
                address,
                message: "timed out".to_owned(),
            },
            v => v,
        }
    }
    /// A MIB configuration problem, retrying without fixing the MIB is pointless
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::UnknownDecoderKind(_)
                | Error::InvalidDecoderSpec(_)
                | Error::UnsupportedFunctionCode(_)
        )
    }
    /// An I/O problem, may be retried
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Timeout | Error::IO(_))
    }
}

/// Returns true if started in production mode (as a systemd unit)
pub fn is_production() -> bool {
    env::var("INVOCATION_ID").map_or(false, |v| !v.is_empty())
}

/// Configures stdout logger with the given filter. If started in production mode, does not logs
/// timestamps
pub fn configure_logger(filter: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.target(env_logger::Target::Stdout);
    builder.filter_level(filter);
    if is_production() {
        builder.format(|buf, record| writeln!(buf, "{} {}", record.level(), record.args()));
    }
    builder.init();
}

pub mod prelude {
    pub use crate::comm::{Framing, Parity, SerialOptions, TcpOptions};
    pub use crate::conn::{Connection, Endpoint, Readings, WriteReport};
    pub use crate::mib::{DecoderSpec, Mib, RegisterSpec, SignalKey};
    pub use crate::registry::SlaveRegistry;
    pub use crate::types::{DecoderRegistry, Param, Params, RawData, TypeDecoder, Value};
}
