//!
//! Connections resolve the MIB of a slave, open one transport session per call and dispatch
//! every signal to the primitive its function code selects.
//!
//! Per-signal failures (decoder construction, unsupported function codes, failed primitive
//! calls, undecodable data) do not abort the call: the signal is left out of the result and
//! its error is recorded. Failing to open or to close the session fails the whole call, an
//! endpoint misconfiguration is returned as [`Error::InvalidData`], transport failures as
//! [`Error::Transport`].
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::comm::{Framing, SerialOptions, TcpOptions, Transport, TransportProvider};
use crate::io::modbus::{ModbusRegisterKind, ModbusTransportProvider};
use crate::mib::{Mib, RegisterSpec, SignalKey};
use crate::registry::SlaveRegistry;
use crate::types::{DecoderRegistry, RawData, TypeDecoder, Value};
use crate::{Error, Result};

pub use crate::comm::Endpoint;

/// Decoded signals of a read call, in MIB order
#[derive(Debug, Default)]
pub struct Readings {
    values: Vec<(SignalKey, Box<dyn TypeDecoder>)>,
    errors: Vec<(SignalKey, Error)>,
}

impl Readings {
    /// The decoder (carrying the decoded and the raw data) of a signal
    pub fn get<K: Into<SignalKey>>(&self, key: K) -> Option<&dyn TypeDecoder> {
        let key = key.into();
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, d)| d.as_ref())
    }
    pub fn value<K: Into<SignalKey>>(&self, key: K) -> Option<&Value> {
        self.get(key).and_then(|d| d.value())
    }
    pub fn keys(&self) -> impl Iterator<Item = &SignalKey> {
        self.values.iter().map(|(k, _)| k)
    }
    pub fn iter(&self) -> impl Iterator<Item = (&SignalKey, &dyn TypeDecoder)> {
        self.values.iter().map(|(k, d)| (k, d.as_ref()))
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    /// Signals which failed, in MIB order
    pub fn errors(&self) -> &[(SignalKey, Error)] {
        &self.errors
    }
    pub fn error<K: Into<SignalKey>>(&self, key: K) -> Option<&Error> {
        let key = key.into();
        self.errors.iter().find(|(k, _)| *k == key).map(|(_, e)| e)
    }
}

/// The outcome of a write call, in MIB order
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WriteReport {
    written: Vec<SignalKey>,
    errors: Vec<(SignalKey, Error)>,
}

impl WriteReport {
    pub fn written(&self) -> &[SignalKey] {
        &self.written
    }
    pub fn errors(&self) -> &[(SignalKey, Error)] {
        &self.errors
    }
    pub fn error<K: Into<SignalKey>>(&self, key: K) -> Option<&Error> {
        let key = key.into();
        self.errors.iter().find(|(k, _)| *k == key).map(|(_, e)| e)
    }
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A Modbus connection to one endpoint, which may serve many slaves.
///
/// MIBs set with [`Connection::set_slave`] override the defaults of the shared
/// [`SlaveRegistry`] (the global one unless [`Connection::with_registry`] is used).
#[derive(Clone)]
pub struct Connection {
    endpoint: Endpoint,
    slaves: BTreeMap<u8, Mib>,
    registry: SlaveRegistry,
    decoders: Arc<DecoderRegistry>,
    provider: Arc<dyn TransportProvider>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("slaves", &self.slaves)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            slaves: BTreeMap::new(),
            registry: SlaveRegistry::global(),
            decoders: Arc::new(DecoderRegistry::default()),
            provider: Arc::new(ModbusTransportProvider),
        }
    }
    /// Modbus TCP
    pub fn tcp(host: &str, port: u16) -> Self {
        Self::new(Endpoint::Tcp(TcpOptions::new(host).port(port)))
    }
    /// Modbus RTU
    pub fn rtu(options: SerialOptions) -> Self {
        Self::new(Endpoint::Serial(options.framing(Framing::Rtu)))
    }
    /// Modbus ASCII
    pub fn ascii(options: SerialOptions) -> Self {
        Self::new(Endpoint::Serial(options.framing(Framing::Ascii)))
    }
    pub fn with_registry(mut self, registry: SlaveRegistry) -> Self {
        self.registry = registry;
        self
    }
    pub fn with_decoders(mut self, decoders: Arc<DecoderRegistry>) -> Self {
        self.decoders = decoders;
        self
    }
    pub fn with_provider(mut self, provider: Arc<dyn TransportProvider>) -> Self {
        self.provider = provider;
        self
    }
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
    pub fn registry(&self) -> &SlaveRegistry {
        &self.registry
    }
    /// The effective MIB of a slave: the local override, the registry default otherwise
    pub fn slave(&self, slave: u8) -> Mib {
        self.registry.resolve(&self.slaves, slave)
    }
    /// Sets the local MIB override for a slave and returns the effective MIB. An empty MIB
    /// does not change anything
    pub fn set_slave(&mut self, slave: u8, mib: Mib) -> Mib {
        if !mib.is_empty() {
            debug!(slave, signals = mib.len(), "MIB override set");
            self.slaves.insert(slave, mib);
        }
        self.slave(slave)
    }
    pub fn remove_slave(&mut self, slave: u8) -> Option<Mib> {
        self.slaves.remove(&slave)
    }
    /// Slave ids with a local MIB override
    pub fn slaves(&self) -> Vec<u8> {
        self.slaves.keys().copied().collect()
    }
    /// Reads the given signals of a slave, all of them if no names are given. Names missing in
    /// the MIB are ignored
    pub fn read<I, K>(&self, slave: u8, names: I) -> Result<Readings>
    where
        I: IntoIterator<Item = K>,
        K: Into<SignalKey>,
    {
        let mib = self.slave(slave);
        let requested: Vec<SignalKey> = names.into_iter().map(Into::into).collect();
        let working: Vec<(&SignalKey, &RegisterSpec)> = mib
            .iter()
            .filter(|(key, _)| requested.is_empty() || requested.contains(*key))
            .collect();
        let mut readings = Readings::default();
        if working.is_empty() {
            debug!(slave, "nothing to read");
            return Ok(readings);
        }
        debug!(slave, signals = working.len(), endpoint = %self.endpoint, "read");
        let mut session = self.open(slave)?;
        for (key, spec) in working {
            match self.read_signal(session.as_mut(), slave, key, spec) {
                Ok(decoder) => readings.values.push((key.clone(), decoder)),
                Err(e) => {
                    warn!(slave, signal = %key, error = %e, "signal read failed");
                    readings.errors.push((key.clone(), e));
                }
            }
        }
        self.close(session.as_mut(), slave)?;
        Ok(readings)
    }
    /// Reads all signals of a slave
    pub fn read_all(&self, slave: u8) -> Result<Readings> {
        self.read(slave, Vec::<SignalKey>::new())
    }
    /// Encodes and writes values. Names missing in the MIB are ignored, signals are written in
    /// MIB order
    pub fn write<I, K>(&self, slave: u8, values: I) -> Result<WriteReport>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<SignalKey>,
    {
        let mib = self.slave(slave);
        let values: Vec<(SignalKey, Value)> =
            values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let working: Vec<(&SignalKey, &RegisterSpec, &Value)> = mib
            .iter()
            .filter_map(|(key, spec)| {
                values
                    .iter()
                    .rev()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| (key, spec, v))
            })
            .collect();
        let mut report = WriteReport::default();
        if working.is_empty() {
            debug!(slave, "nothing to write");
            return Ok(report);
        }
        debug!(slave, signals = working.len(), endpoint = %self.endpoint, "write");
        let mut session = self.open(slave)?;
        for (key, spec, value) in working {
            match self.write_signal(session.as_mut(), slave, key, spec, value) {
                Ok(()) => report.written.push(key.clone()),
                Err(e) => {
                    warn!(slave, signal = %key, error = %e, "signal write failed");
                    report.errors.push((key.clone(), e));
                }
            }
        }
        self.close(session.as_mut(), slave)?;
        Ok(report)
    }
    fn open(&self, slave: u8) -> Result<Box<dyn Transport>> {
        trace!(endpoint = %self.endpoint, slave, "opening transport session");
        self.provider
            .open(&self.endpoint)
            .map_err(|e| session_error(e, slave))
    }
    fn close(&self, session: &mut dyn Transport, slave: u8) -> Result<()> {
        trace!(endpoint = %self.endpoint, slave, "closing transport session");
        session.close().map_err(|e| session_error(e, slave))
    }
    fn read_signal(
        &self,
        session: &mut dyn Transport,
        slave: u8,
        key: &SignalKey,
        spec: &RegisterSpec,
    ) -> Result<Box<dyn TypeDecoder>> {
        let mut decoder = self.decoders.build(&spec.decoder)?;
        let kind = ModbusRegisterKind::try_from(spec.function)?;
        trace!(slave, signal = %key, address = spec.address, function = spec.function, "read signal");
        let raw = match kind {
            ModbusRegisterKind::Coil => session
                .read_coils(slave, spec.address, decoder.bit_count())
                .map(RawData::Bits),
            ModbusRegisterKind::Discrete => session
                .read_discrete_inputs(slave, spec.address, decoder.bit_count())
                .map(RawData::Bits),
            ModbusRegisterKind::Holding => session
                .read_holding_registers(slave, spec.address, decoder.word_count())
                .map(RawData::Words),
            ModbusRegisterKind::Input => session
                .read_input_registers(slave, spec.address, decoder.word_count())
                .map(RawData::Words),
        }
        .map_err(|e| e.in_transport(slave, Some(key.to_string()), Some(spec.address)))?;
        decoder.decode(raw)?;
        Ok(decoder)
    }
    fn write_signal(
        &self,
        session: &mut dyn Transport,
        slave: u8,
        key: &SignalKey,
        spec: &RegisterSpec,
        value: &Value,
    ) -> Result<()> {
        let decoder = self.decoders.build(&spec.decoder)?;
        let kind = ModbusRegisterKind::try_from(spec.function)?;
        trace!(slave, signal = %key, address = spec.address, function = spec.function, "write signal");
        let address = spec.address;
        let result = if kind.is_bit() {
            match decoder.encode_bits(value)?.as_slice() {
                [bit] => session.write_single_coil(slave, address, *bit),
                bits => session.write_multiple_coils(slave, address, bits),
            }
        } else {
            match decoder.encode_words(value)?.as_slice() {
                [word] => session.write_single_register(slave, address, *word),
                words => session.write_multiple_registers(slave, address, words),
            }
        };
        result.map_err(|e| e.in_transport(slave, Some(key.to_string()), Some(address)))
    }
}

fn session_error(err: Error, slave: u8) -> Error {
    match err {
        e @ (Error::Transport { .. } | Error::InvalidData(_)) => e,
        e if e.is_config() => e,
        e => Error::Transport {
            slave,
            signal: None,
            address: None,
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use insta::assert_debug_snapshot;
    use parking_lot::Mutex;

    use super::{Connection, Endpoint};
    use crate::comm::{Framing, SerialOptions, TcpOptions, Transport, TransportProvider};
    use crate::mib::{Mib, RegisterSpec, SignalKey};
    use crate::registry::SlaveRegistry;
    use crate::types::{DecoderRegistry, Param, Params, Value};
    use crate::{Error, Result};

    #[derive(Default)]
    struct Device {
        words: BTreeMap<(u8, u16), u16>,
        bits: BTreeMap<(u8, u16), bool>,
        calls: Vec<String>,
        opened: usize,
        closed: usize,
    }

    /// An in-memory slave device, values are keyed by (function, address)
    #[derive(Clone, Default)]
    struct MockProvider {
        device: Arc<Mutex<Device>>,
        fail_open: bool,
        fail_close: bool,
    }

    impl MockProvider {
        fn word(self, function: u8, address: u16, value: u16) -> Self {
            self.device.lock().words.insert((function, address), value);
            self
        }
        fn bit(self, function: u8, address: u16, value: bool) -> Self {
            self.device.lock().bits.insert((function, address), value);
            self
        }
        fn calls(&self) -> Vec<String> {
            self.device.lock().calls.clone()
        }
        fn sessions(&self) -> (usize, usize) {
            let device = self.device.lock();
            (device.opened, device.closed)
        }
    }

    struct MockSession {
        device: Arc<Mutex<Device>>,
        fail_close: bool,
    }

    impl MockSession {
        fn read_words(&self, function: u8, address: u16, count: u16) -> Result<Vec<u16>> {
            let mut device = self.device.lock();
            device.calls.push(format!("fc{} {}x{}", function, address, count));
            (address..address + count)
                .map(|a| {
                    device
                        .words
                        .get(&(function, a))
                        .copied()
                        .ok_or_else(|| Error::io("illegal data address"))
                })
                .collect()
        }
        fn read_bits(&self, function: u8, address: u16, count: u16) -> Result<Vec<bool>> {
            let mut device = self.device.lock();
            device.calls.push(format!("fc{} {}x{}", function, address, count));
            (address..address + count)
                .map(|a| {
                    device
                        .bits
                        .get(&(function, a))
                        .copied()
                        .ok_or_else(|| Error::io("illegal data address"))
                })
                .collect()
        }
    }

    impl Transport for MockSession {
        fn read_coils(&mut self, _slave: u8, address: u16, count: u16) -> Result<Vec<bool>> {
            self.read_bits(1, address, count)
        }
        fn read_discrete_inputs(
            &mut self,
            _slave: u8,
            address: u16,
            count: u16,
        ) -> Result<Vec<bool>> {
            self.read_bits(2, address, count)
        }
        fn read_holding_registers(
            &mut self,
            _slave: u8,
            address: u16,
            count: u16,
        ) -> Result<Vec<u16>> {
            self.read_words(3, address, count)
        }
        fn read_input_registers(
            &mut self,
            _slave: u8,
            address: u16,
            count: u16,
        ) -> Result<Vec<u16>> {
            self.read_words(4, address, count)
        }
        fn write_single_coil(&mut self, _slave: u8, address: u16, value: bool) -> Result<()> {
            let mut device = self.device.lock();
            device
                .calls
                .push(format!("write_single_coil {}={}", address, value));
            device.bits.insert((1, address), value);
            Ok(())
        }
        fn write_multiple_coils(&mut self, _slave: u8, address: u16, values: &[bool]) -> Result<()> {
            let mut device = self.device.lock();
            device
                .calls
                .push(format!("write_multiple_coils {}={:?}", address, values));
            for (a, v) in (address..).zip(values) {
                device.bits.insert((1, a), *v);
            }
            Ok(())
        }
        fn write_single_register(&mut self, _slave: u8, address: u16, value: u16) -> Result<()> {
            let mut device = self.device.lock();
            device
                .calls
                .push(format!("write_single_register {}={}", address, value));
            device.words.insert((3, address), value);
            Ok(())
        }
        fn write_multiple_registers(
            &mut self,
            _slave: u8,
            address: u16,
            values: &[u16],
        ) -> Result<()> {
            let mut device = self.device.lock();
            device
                .calls
                .push(format!("write_multiple_registers {}={:?}", address, values));
            for (a, v) in (address..).zip(values) {
                device.words.insert((3, a), *v);
            }
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            self.device.lock().closed += 1;
            if self.fail_close {
                return Err(Error::io("broken pipe"));
            }
            Ok(())
        }
    }

    impl TransportProvider for MockProvider {
        fn open(&self, _endpoint: &Endpoint) -> Result<Box<dyn Transport>> {
            if self.fail_open {
                return Err(Error::io("connection refused"));
            }
            self.device.lock().opened += 1;
            Ok(Box::new(MockSession {
                device: self.device.clone(),
                fail_close: self.fail_close,
            }))
        }
    }

    fn connection(provider: &MockProvider) -> Connection {
        Connection::tcp("plc1", 502)
            .with_registry(SlaveRegistry::new())
            .with_provider(Arc::new(provider.clone()))
    }

    fn abc() -> Mib {
        Mib::new()
            .with("A", RegisterSpec::new(10, 3, "Short"))
            .with("B", RegisterSpec::new(20, 4, "Float"))
            .with("C", RegisterSpec::new(5, 1, "Bit"))
    }

    fn abc_device() -> MockProvider {
        MockProvider::default()
            .word(3, 10, 0xffff)
            .word(4, 20, 0x3fc0)
            .word(4, 21, 0)
            .bit(1, 5, true)
    }

    #[test]
    fn test_temp_scenario() {
        let provider = MockProvider::default().word(4, 100, 250);
        let mut conn = connection(&provider);
        conn.set_slave(1, Mib::new().with("Temp", RegisterSpec::new(100, 4, "Short")));
        let readings = conn.read(1, ["Temp"]).unwrap();
        assert_eq!(readings.value("Temp"), Some(&Value::Int(250)));
        assert_eq!(provider.calls(), vec!["fc4 100x1"]);
        assert_eq!(provider.sessions(), (1, 1));
    }

    #[test]
    fn test_coil_scenario() {
        let provider = MockProvider::default().bit(1, 5, true);
        let mut conn = connection(&provider);
        conn.set_slave(1, Mib::new().with("Run", RegisterSpec::new(5, 1, "Bit")));
        let readings = conn.read_all(1).unwrap();
        assert_eq!(readings.value("Run"), Some(&Value::Bool(true)));
        assert_eq!(provider.calls(), vec!["fc1 5x1"]);
    }

    #[test]
    fn test_read_all_in_mib_order() {
        let provider = abc_device();
        let mut conn = connection(&provider);
        conn.set_slave(1, abc());
        let readings = conn.read(1, Vec::<SignalKey>::new()).unwrap();
        let keys: Vec<String> = readings.keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["A", "B", "C"]);
        for (key, decoder) in readings.iter() {
            let raw = decoder.raw().unwrap();
            match key.to_string().as_str() {
                "C" => assert_eq!(raw.len(), usize::from(decoder.bit_count())),
                _ => assert_eq!(raw.len(), usize::from(decoder.word_count())),
            }
        }
        assert_eq!(readings.value("A"), Some(&Value::Int(-1)));
        assert_eq!(readings.value("B"), Some(&Value::Float(1.5)));
        assert!(readings.errors().is_empty());
        assert_debug_snapshot!(provider.calls(), @r###"
        [
            "fc3 10x1",
            "fc4 20x2",
            "fc1 5x1",
        ]
        "###);
    }

    #[test]
    fn test_unknown_names_dropped() {
        let provider = abc_device();
        let mut conn = connection(&provider);
        conn.set_slave(1, abc());
        let readings = conn.read(1, ["A", "Z"]).unwrap();
        assert_eq!(readings.len(), 1);
        assert!(readings.get("A").is_some());
        assert!(readings.errors().is_empty());
        // requested order does not matter
        let readings = conn.read(1, ["C", "A"]).unwrap();
        let keys: Vec<String> = readings.keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["A", "C"]);
        // nothing known, no session
        let readings = conn.read(1, ["Z"]).unwrap();
        assert!(readings.is_empty());
        assert_eq!(provider.sessions(), (2, 2));
    }

    #[test]
    fn test_unsupported_function() {
        let provider = abc_device();
        let mut conn = connection(&provider);
        let mut mib = abc();
        mib.add("X", RegisterSpec::new(1, 99, "Short"));
        mib.add("Y", RegisterSpec::new(1, 3, "Nope"));
        conn.set_slave(1, mib);
        let readings = conn.read_all(1).unwrap();
        assert_eq!(readings.len(), 3);
        assert_eq!(
            readings.error("X"),
            Some(&Error::UnsupportedFunctionCode(99))
        );
        assert!(readings.error("X").unwrap().is_config());
        assert!(matches!(
            readings.error("Y"),
            Some(Error::UnknownDecoderKind(_))
        ));
        assert!(readings.get("X").is_none());
        assert_eq!(provider.sessions(), (1, 1));
    }

    #[test]
    fn test_failed_signal_closes_session() {
        let provider = abc_device();
        let mut conn = connection(&provider);
        let mut mib = abc();
        mib.add("D", RegisterSpec::new(7, 3, "Short"));
        conn.set_slave(1, mib);
        let readings = conn.read_all(1).unwrap();
        assert_eq!(readings.len(), 3);
        let err = readings.error("D").unwrap();
        assert!(err.is_io());
        assert_eq!(
            err,
            &Error::Transport {
                slave: 1,
                signal: Some("D".to_owned()),
                address: Some(7),
                message: "illegal data address".to_owned()
            }
        );
        assert_eq!(provider.sessions(), (1, 1));
    }

    #[test]
    fn test_open_failure_is_fatal() {
        let provider = MockProvider {
            fail_open: true,
            ..abc_device()
        };
        let mut conn = connection(&provider);
        conn.set_slave(1, abc());
        let err = conn.read_all(1).unwrap_err();
        assert!(err.is_io());
        assert!(matches!(err, Error::Transport { slave: 1, signal: None, .. }));
        assert!(conn
            .write(1, [("A", Value::Int(1))])
            .unwrap_err()
            .is_io());
    }

    #[test]
    fn test_endpoint_misconfiguration() {
        for mut conn in [
            Connection::tcp("", 502),
            Connection::rtu(SerialOptions::new("/dev/ttyUSB0").data_bits(9)),
            Connection::ascii(SerialOptions::new("")),
        ] {
            conn = conn.with_registry(SlaveRegistry::new());
            conn.set_slave(1, abc());
            let err = conn.read_all(1).unwrap_err();
            assert!(matches!(err, Error::InvalidData(_)), "{:?}", err);
            assert!(!err.is_io());
        }
    }

    #[test]
    fn test_close_failure_is_fatal() {
        let provider = MockProvider {
            fail_close: true,
            ..abc_device()
        };
        let mut conn = connection(&provider);
        conn.set_slave(1, abc());
        let err = conn.read_all(1).unwrap_err();
        assert!(matches!(err, Error::Transport { slave: 1, .. }));
        assert_eq!(provider.sessions(), (1, 1));
    }

    #[test]
    fn test_override_and_default() {
        let provider = MockProvider::default()
            .word(3, 1, 11)
            .word(3, 2, 22);
        let registry = SlaveRegistry::new();
        let mut conn = connection(&provider).with_registry(registry.clone());
        let other = connection(&provider).with_registry(registry.clone());
        registry.set_default(1, Mib::new().with("V", RegisterSpec::new(1, 3, "")));
        assert_eq!(conn.read_all(1).unwrap().value("V"), Some(&Value::Int(11)));
        conn.set_slave(1, Mib::new().with("V", RegisterSpec::new(2, 3, "")));
        assert_eq!(conn.read_all(1).unwrap().value("V"), Some(&Value::Int(22)));
        registry.set_default(1, Mib::new().with("V", RegisterSpec::new(1, 4, "")));
        assert_eq!(conn.read_all(1).unwrap().value("V"), Some(&Value::Int(22)));
        // other connections still see the default
        assert_eq!(other.slave(1), registry.get_default(1));
        assert_eq!(conn.slaves(), vec![1]);
        // empty overrides are ignored
        assert_eq!(conn.set_slave(1, Mib::new()).len(), 1);
        assert!(conn.remove_slave(1).is_some());
        assert_eq!(conn.slave(1), registry.get_default(1));
    }

    #[test]
    fn test_unknown_slave() {
        let provider = MockProvider::default();
        let conn = connection(&provider);
        assert!(conn.read_all(9).unwrap().is_empty());
        assert!(conn.write(9, [("A", Value::Int(1))]).unwrap().is_ok());
        assert_eq!(provider.sessions(), (0, 0));
    }

    #[test]
    fn test_write_dispatch() {
        let provider = MockProvider::default();
        let mut conn = connection(&provider);
        let flags: Params = [("count".to_owned(), Param::Int(3))].into_iter().collect();
        conn.set_slave(
            1,
            Mib::new()
                .with("Run", RegisterSpec::new(5, 1, "Bit"))
                .with("Setpoint", RegisterSpec::new(10, 3, "Short"))
                .with("Level", RegisterSpec::new(20, 3, "Float"))
                .with("Flags", RegisterSpec::new(30, 1, ("Bits", flags)))
                .with("Bad", RegisterSpec::new(40, 99, "Short")),
        );
        let report = conn
            .write(
                1,
                [
                    ("Flags", Value::Bits(vec![true, false, true])),
                    ("Level", Value::Float(1.5)),
                    ("Setpoint", Value::Int(-2)),
                    ("Run", Value::Bool(true)),
                    ("Bad", Value::Int(1)),
                    ("Missing", Value::Int(1)),
                ],
            )
            .unwrap();
        assert_eq!(
            report.written(),
            &[
                SignalKey::from("Run"),
                "Setpoint".into(),
                "Level".into(),
                "Flags".into()
            ]
        );
        assert_eq!(report.error("Bad"), Some(&Error::UnsupportedFunctionCode(99)));
        assert_debug_snapshot!(provider.calls(), @r###"
        [
            "write_single_coil 5=true",
            "write_single_register 10=65534",
            "write_multiple_registers 20=[16320, 0]",
            "write_multiple_coils 30=[true, false, true]",
        ]
        "###);
        assert_eq!(provider.sessions(), (1, 1));
    }

    #[test]
    fn test_write_read_back() {
        let provider = MockProvider::default();
        let mut conn = connection(&provider);
        let decimal: Params = [
            ("words".to_owned(), Param::Int(2)),
            ("scale".to_owned(), Param::Float(0.1)),
        ]
        .into_iter()
        .collect();
        let text: Params = [("length".to_owned(), Param::Int(2))].into_iter().collect();
        conn.set_slave(
            1,
            Mib::new()
                .with("Speed", RegisterSpec::new(0, 3, ("Decimal", decimal)))
                .with("Name", RegisterSpec::new(4, 3, ("Text", text))),
        );
        let report = conn
            .write(
                1,
                [
                    ("Speed", Value::Float(-123.4)),
                    ("Name", Value::from("PUMP")),
                ],
            )
            .unwrap();
        assert!(report.is_ok());
        let readings = conn.read_all(1).unwrap();
        let speed = readings.value("Speed").and_then(Value::as_f64).unwrap();
        assert!((speed + 123.4).abs() < 1e-9);
        assert_eq!(readings.value("Name"), Some(&Value::from("PUMP")));
    }

    #[test]
    fn test_custom_decoders() {
        let provider = MockProvider::default().word(3, 0, 7);
        let mut decoders = DecoderRegistry::new();
        decoders.register("short", |params: &Params| {
            DecoderRegistry::default().create("ushort", params)
        });
        let mut conn = connection(&provider).with_decoders(Arc::new(decoders));
        conn.set_slave(1, Mib::new().with("V", RegisterSpec::new(0, 3, "")));
        assert_eq!(conn.read_all(1).unwrap().value("V"), Some(&Value::UInt(7)));
    }

    #[test]
    fn test_endpoints() {
        let conn = Connection::tcp("plc1", 5020);
        assert_eq!(
            conn.endpoint(),
            &Endpoint::Tcp(TcpOptions::new("plc1").port(5020))
        );
        let conn = Connection::ascii(SerialOptions::new("/dev/ttyUSB0"));
        let Endpoint::Serial(options) = conn.endpoint() else {
            panic!("serial endpoint expected");
        };
        assert_eq!(options.framing, Framing::Ascii);
        let conn = Connection::rtu(SerialOptions::new("/dev/ttyUSB0").framing(Framing::Ascii));
        assert_eq!(conn.endpoint().to_string(), "rtu:///dev/ttyUSB0:9600");
    }
}
