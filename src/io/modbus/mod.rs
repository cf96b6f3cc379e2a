//!
//! Modbus client sessions. Requests are generated and responses parsed with
//! [rmodbus](https://crates.io/crates/rmodbus), one transaction per primitive call.
use std::io::{Read, Write};
use std::net::TcpStream;

use rmodbus::guess_response_frame_len;
use rmodbus::{client::ModbusRequest as RModbusRequest, ModbusProto};
use serial::SystemPort;
use tracing::trace;

use crate::comm::{self, check_count, Endpoint, Protocol, Stream, Transport, TransportProvider};
use crate::{Error, Result};

#[allow(clippy::module_name_repetitions)]
pub use regs::{Kind as ModbusRegisterKind, Register as ModbusRegister};

mod regs;

pub const MAX_BITS_PER_REQUEST: u16 = 2000;
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;
pub const MAX_BITS_PER_WRITE: u16 = 1968;
pub const MAX_REGISTERS_PER_WRITE: u16 = 123;

const MAX_ASCII_FRAME: usize = 513;
const MAX_STALE_FRAMES: usize = 16;

impl From<Protocol> for ModbusProto {
    fn from(value: Protocol) -> Self {
        match value {
            Protocol::Tcp => ModbusProto::TcpUdp,
            Protocol::Rtu => ModbusProto::Rtu,
            Protocol::Ascii => ModbusProto::Ascii,
        }
    }
}

/// Encodes a binary frame (with LRC) as a Modbus ASCII line
fn to_ascii_frame(frame: &[u8]) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = Vec::with_capacity(frame.len() * 2 + 3);
    out.push(b':');
    for b in frame {
        out.push(HEX[usize::from(b >> 4)]);
        out.push(HEX[usize::from(b & 0x0f)]);
    }
    out.extend(b"\r\n");
    out
}

/// Decodes a Modbus ASCII line into a binary frame
fn from_ascii_frame(line: &[u8]) -> Result<Vec<u8>> {
    let body = line
        .strip_prefix(b":")
        .ok_or_else(|| Error::invalid_data("ASCII frame does not start with ':'"))?;
    let body = body.strip_suffix(b"\r\n").unwrap_or(body);
    if body.len() % 2 != 0 {
        return Err(Error::invalid_data("ASCII frame has an odd length"));
    }
    body.chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).map_err(Error::invalid_data)?;
            u8::from_str_radix(s, 16).map_err(Into::into)
        })
        .collect()
}

/// Reads an ASCII line, skipping everything before the start character
fn read_ascii_line<R: Read>(reader: &mut R, line: &mut Vec<u8>) -> Result<()> {
    line.truncate(0);
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if line.is_empty() && byte[0] != b':' {
            continue;
        }
        line.push(byte[0]);
        if byte[0] == b'\n' {
            return Ok(());
        }
        if line.len() > MAX_ASCII_FRAME {
            return Err(Error::invalid_data("ASCII frame too long"));
        }
    }
}

/// A client session over a byte stream. The stream is shut down on [`Transport::close`] or drop
#[allow(clippy::module_name_repetitions)]
pub struct ModbusSession<S: Stream> {
    stream: Option<S>,
    protocol: Protocol,
    request_id: u16,
    clear_input: bool,
    dirty: bool,
    buf: Vec<u8>,
    rest_buf: Vec<u8>,
}

impl<S: Stream> ModbusSession<S> {
    pub fn new(stream: S, protocol: Protocol) -> Self {
        Self {
            stream: Some(stream),
            protocol,
            request_id: 1,
            clear_input: false,
            dirty: false,
            // pre-allocate buffers
            buf: Vec::with_capacity(256),
            rest_buf: Vec::with_capacity(256),
        }
    }
    /// Discard stale input before each transaction
    pub fn clear_input_before_transaction(mut self, value: bool) -> Self {
        self.clear_input = value;
        self
    }
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
    /// A failed transaction leaves the session dirty, its input is cleared before the next one
    fn communicate(&mut self) -> Result<()> {
        let result = self.transact();
        if result.is_err() {
            self.dirty = true;
        }
        result
    }
    fn transact(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::io("session closed"))?;
        if self.clear_input || self.dirty {
            stream.clear_input()?;
            self.dirty = false;
        }
        if self.protocol == Protocol::Ascii {
            stream.write_all(&to_ascii_frame(&self.buf))?;
            read_ascii_line(stream, &mut self.rest_buf)?;
            self.buf = from_ascii_frame(&self.rest_buf)?;
            return Ok(());
        }
        let tr_id: [u8; 2] = [
            self.buf.first().copied().unwrap_or_default(),
            self.buf.get(1).copied().unwrap_or_default(),
        ];
        stream.write_all(&self.buf)?;
        let header_len = if self.protocol == Protocol::Rtu { 3 } else { 6 };
        let mut stale = 0;
        loop {
            let mut buf = [0u8; 6];
            let header = &mut buf[..header_len];
            stream.read_exact(header)?;
            self.buf.truncate(0);
            self.buf.extend_from_slice(header);
            let len = usize::from(guess_response_frame_len(header, self.protocol.into())?);
            if len > header_len {
                self.rest_buf.resize(len - header_len, 0);
                stream.read_exact(&mut self.rest_buf)?;
                self.buf.extend(&self.rest_buf);
            }
            // late replies to timed out requests
            if self.protocol != Protocol::Tcp || self.buf[..2] == tr_id {
                return Ok(());
            }
            stale += 1;
            trace!(stale, "stale response discarded");
            if stale > MAX_STALE_FRAMES {
                return Err(Error::io("no response with the request transaction id"));
            }
        }
    }
}

macro_rules! prepare_transaction {
    ($self: expr, $slave: expr, $op: expr, $address: expr) => {{
        trace!(slave = $slave, op = $op, address = $address, "modbus request");
        let mut mreq = RModbusRequest::new($slave, $self.protocol.into());
        mreq.tr_id = $self.request_id;
        $self.request_id = $self.request_id.wrapping_add(1);
        $self.buf.truncate(0);
        mreq
    }};
}

impl<S: Stream> Transport for ModbusSession<S> {
    fn read_coils(&mut self, slave: u8, address: u16, count: u16) -> Result<Vec<bool>> {
        check_count(count, MAX_BITS_PER_REQUEST)?;
        let mut mreq = prepare_transaction!(self, slave, "read_coils", address);
        mreq.generate_get_coils(address, count, &mut self.buf)?;
        self.communicate()?;
        let mut result = Vec::with_capacity(usize::from(count));
        mreq.parse_bool(&self.buf, &mut result)?;
        result.truncate(usize::from(count));
        Ok(result)
    }
    fn read_discrete_inputs(&mut self, slave: u8, address: u16, count: u16) -> Result<Vec<bool>> {
        check_count(count, MAX_BITS_PER_REQUEST)?;
        let mut mreq = prepare_transaction!(self, slave, "read_discrete_inputs", address);
        mreq.generate_get_discretes(address, count, &mut self.buf)?;
        self.communicate()?;
        let mut result = Vec::with_capacity(usize::from(count));
        mreq.parse_bool(&self.buf, &mut result)?;
        result.truncate(usize::from(count));
        Ok(result)
    }
    fn read_holding_registers(
        &mut self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        check_count(count, MAX_REGISTERS_PER_REQUEST)?;
        let mut mreq = prepare_transaction!(self, slave, "read_holding_registers", address);
        mreq.generate_get_holdings(address, count, &mut self.buf)?;
        self.communicate()?;
        let mut result = Vec::with_capacity(usize::from(count));
        mreq.parse_u16(&self.buf, &mut result)?;
        Ok(result)
    }
    fn read_input_registers(&mut self, slave: u8, address: u16, count: u16) -> Result<Vec<u16>> {
        check_count(count, MAX_REGISTERS_PER_REQUEST)?;
        let mut mreq = prepare_transaction!(self, slave, "read_input_registers", address);
        mreq.generate_get_inputs(address, count, &mut self.buf)?;
        self.communicate()?;
        let mut result = Vec::with_capacity(usize::from(count));
        mreq.parse_u16(&self.buf, &mut result)?;
        Ok(result)
    }
    fn write_single_coil(&mut self, slave: u8, address: u16, value: bool) -> Result<()> {
        let mut mreq = prepare_transaction!(self, slave, "write_single_coil", address);
        mreq.generate_set_coil(address, value, &mut self.buf)?;
        self.communicate()?;
        mreq.parse_ok(&self.buf).map_err(Into::into)
    }
    fn write_multiple_coils(&mut self, slave: u8, address: u16, values: &[bool]) -> Result<()> {
        check_count(
            u16::try_from(values.len()).unwrap_or(u16::MAX),
            MAX_BITS_PER_WRITE,
        )?;
        let mut mreq = prepare_transaction!(self, slave, "write_multiple_coils", address);
        mreq.generate_set_coils_bulk(address, values, &mut self.buf)?;
        self.communicate()?;
        mreq.parse_ok(&self.buf).map_err(Into::into)
    }
    fn write_single_register(&mut self, slave: u8, address: u16, value: u16) -> Result<()> {
        let mut mreq = prepare_transaction!(self, slave, "write_single_register", address);
        mreq.generate_set_holding(address, value, &mut self.buf)?;
        self.communicate()?;
        mreq.parse_ok(&self.buf).map_err(Into::into)
    }
    fn write_multiple_registers(
        &mut self,
        slave: u8,
        address: u16,
        values: &[u16],
    ) -> Result<()> {
        check_count(
            u16::try_from(values.len()).unwrap_or(u16::MAX),
            MAX_REGISTERS_PER_WRITE,
        )?;
        let mut mreq = prepare_transaction!(self, slave, "write_multiple_registers", address);
        mreq.generate_set_holdings_bulk(address, values, &mut self.buf)?;
        self.communicate()?;
        mreq.parse_ok(&self.buf).map_err(Into::into)
    }
    fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            trace!("closing modbus session");
            stream.shutdown()?;
        }
        Ok(())
    }
}

impl<S: Stream> Drop for ModbusSession<S> {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown();
        }
    }
}

/// Opens rmodbus sessions: TCP streams for [`Endpoint::Tcp`], serial ports with RTU or ASCII
/// framing for [`Endpoint::Serial`]. Serial sessions clear the input buffer before each
/// transaction
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ModbusTransportProvider;

impl TransportProvider for ModbusTransportProvider {
    fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>> {
        match endpoint {
            Endpoint::Tcp(options) => {
                let stream: TcpStream = comm::tcp::connect(options)?;
                Ok(Box::new(ModbusSession::new(stream, Protocol::Tcp)))
            }
            Endpoint::Serial(options) => {
                let port: SystemPort = comm::serial::open(options)?;
                Ok(Box::new(
                    ModbusSession::new(port, options.framing.into())
                        .clear_input_before_transaction(true),
                ))
            }
        }
    }
}
