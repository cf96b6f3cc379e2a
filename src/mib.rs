//!
//! A MIB maps signal names to register specs: address, function code and decoder.
//!
//! ```
//! use emodbus::mib::{Mib, RegisterSpec};
//!
//! let mut mib = Mib::new();
//! mib.add("Temp", RegisterSpec::new(100, 4, "Short"));
//! let anonymous = mib.add_anonymous(RegisterSpec::new(10, 4, ""));
//! assert_eq!(anonymous.to_string(), "0");
//! ```
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::io::modbus::ModbusRegister;
use crate::types::{Param, Params, TypeDecoder};
use crate::{Error, Result};

/// Default function code (read input registers)
pub const DEFAULT_FUNCTION: u8 = 4;

/// Signal key: a name or, for anonymous entries, the sequence position
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalKey {
    Index(usize),
    Name(String),
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKey::Index(i) => write!(f, "{}", i),
            SignalKey::Name(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for SignalKey {
    fn from(s: &str) -> Self {
        SignalKey::Name(s.to_owned())
    }
}

impl From<String> for SignalKey {
    fn from(s: String) -> Self {
        SignalKey::Name(s)
    }
}

impl From<&String> for SignalKey {
    fn from(s: &String) -> Self {
        SignalKey::Name(s.clone())
    }
}

impl From<usize> for SignalKey {
    fn from(i: usize) -> Self {
        SignalKey::Index(i)
    }
}

impl From<&SignalKey> for SignalKey {
    fn from(k: &SignalKey) -> Self {
        k.clone()
    }
}

/// Decoder selection of a register spec
#[derive(Debug, Clone, Default)]
pub enum DecoderSpec {
    /// The default kind (`Short`)
    #[default]
    Default,
    /// A kind name without params
    Kind(String),
    /// A kind name with params
    WithParams(String, Params),
    /// A pre-built decoder, copied for every call with [`TypeDecoder::fresh`]
    Instance(Arc<dyn TypeDecoder>),
}

impl DecoderSpec {
    /// Builds a decoder spec from its literal form: `null`, `"Kind"`, `["Kind"]` or
    /// `["Kind", {params}]`. Other shapes are rejected with [`Error::InvalidDecoderSpec`]
    pub fn from_value(value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::Null => Ok(DecoderSpec::Default),
            JsonValue::String(kind) => Ok(kind.as_str().into()),
            JsonValue::Array(items) => match items.as_slice() {
                [JsonValue::String(kind)] => Ok(kind.as_str().into()),
                [JsonValue::String(kind), JsonValue::Object(map)] => {
                    let mut params = Params::new();
                    for (name, v) in map {
                        params.insert(name.clone(), param_from_value(kind, name, v)?);
                    }
                    Ok(DecoderSpec::WithParams(kind.clone(), params))
                }
                [JsonValue::String(kind), other] => Err(Error::invalid_spec(format!(
                    "{}: params must be a mapping, got {}",
                    kind, other
                ))),
                _ => Err(Error::invalid_spec(format!(
                    "expected [kind] or [kind, params], got {}",
                    value
                ))),
            },
            other => Err(Error::invalid_spec(format!(
                "expected a kind name or [kind, params], got {}",
                other
            ))),
        }
    }
    /// The kind name, if known without building the decoder
    pub fn kind(&self) -> Option<&str> {
        match self {
            DecoderSpec::Default => None,
            DecoderSpec::Kind(kind) | DecoderSpec::WithParams(kind, _) => Some(kind.as_str()),
            DecoderSpec::Instance(decoder) => Some(decoder.kind()),
        }
    }
}

fn param_from_value(kind: &str, name: &str, value: &JsonValue) -> Result<Param> {
    match value {
        JsonValue::Bool(v) => Ok(Param::Bool(*v)),
        JsonValue::Number(n) => n
            .as_i64()
            .map(Param::Int)
            .or_else(|| n.as_f64().map(Param::Float))
            .ok_or_else(|| {
                Error::invalid_spec(format!("{}: param `{}` is not a valid number", kind, name))
            }),
        JsonValue::String(v) => Ok(Param::Str(v.clone())),
        other => Err(Error::invalid_spec(format!(
            "{}: param `{}` must be a scalar, got {}",
            kind, name, other
        ))),
    }
}

impl PartialEq for DecoderSpec {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DecoderSpec::Default, DecoderSpec::Default) => true,
            (DecoderSpec::Kind(a), DecoderSpec::Kind(b)) => a == b,
            (DecoderSpec::WithParams(a, pa), DecoderSpec::WithParams(b, pb)) => {
                a == b && pa == pb
            }
            (DecoderSpec::Instance(a), DecoderSpec::Instance(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for DecoderSpec {
    fn from(kind: &str) -> Self {
        if kind.is_empty() {
            DecoderSpec::Default
        } else {
            DecoderSpec::Kind(kind.to_owned())
        }
    }
}

impl From<(&str, Params)> for DecoderSpec {
    fn from((kind, params): (&str, Params)) -> Self {
        DecoderSpec::WithParams(kind.to_owned(), params)
    }
}

impl From<Arc<dyn TypeDecoder>> for DecoderSpec {
    fn from(decoder: Arc<dyn TypeDecoder>) -> Self {
        DecoderSpec::Instance(decoder)
    }
}

impl<'de> Deserialize<'de> for DecoderSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = JsonValue::deserialize(deserializer)?;
        DecoderSpec::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// One named signal. Immutable once added to a [`Mib`]
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterSpec {
    /// 0-based register/coil address
    pub address: u16,
    /// Function code, validated when dispatched
    pub function: u8,
    pub decoder: DecoderSpec,
}

impl Default for RegisterSpec {
    fn default() -> Self {
        Self {
            address: 0,
            function: DEFAULT_FUNCTION,
            decoder: DecoderSpec::Default,
        }
    }
}

impl RegisterSpec {
    pub fn new<D: Into<DecoderSpec>>(address: u16, function: u8, decoder: D) -> Self {
        Self {
            address,
            function,
            decoder: decoder.into(),
        }
    }
    /// Builds a register spec from its literal form: `[address, function, decoder]` with
    /// trailing elements optional, or `{"address": .., "function": .., "decoder": ..}`. The
    /// address may be given in register notation (`"h100"`), which sets the function code
    pub fn from_value(value: &JsonValue) -> Result<Self> {
        let (address, function, decoder) = match value {
            JsonValue::Array(items) => {
                if items.len() > 3 {
                    return Err(Error::invalid_data(format!(
                        "register spec has too many elements: {}",
                        value
                    )));
                }
                (items.first(), items.get(1), items.get(2))
            }
            JsonValue::Object(map) => {
                if let Some(unknown) = map
                    .keys()
                    .find(|k| !["address", "function", "decoder"].contains(&k.as_str()))
                {
                    return Err(Error::invalid_data(format!(
                        "unknown register spec field: {}",
                        unknown
                    )));
                }
                (map.get("address"), map.get("function"), map.get("decoder"))
            }
            other => {
                return Err(Error::invalid_data(format!(
                    "invalid register spec: {}",
                    other
                )))
            }
        };
        let function = function
            .map(|v| {
                v.as_u64()
                    .and_then(|f| u8::try_from(f).ok())
                    .ok_or_else(|| Error::invalid_data(format!("invalid function code: {}", v)))
            })
            .transpose()?;
        let (address, function) = match address {
            None => (0, function.unwrap_or(DEFAULT_FUNCTION)),
            Some(JsonValue::String(s)) => {
                let register: ModbusRegister = s.parse()?;
                let code = register.kind.code();
                if function.map_or(false, |f| f != code) {
                    return Err(Error::invalid_data(format!(
                        "register {} conflicts with function code {}",
                        s,
                        function.unwrap_or_default()
                    )));
                }
                (register.offset, code)
            }
            Some(v) => (
                v.as_u64()
                    .and_then(|a| u16::try_from(a).ok())
                    .ok_or_else(|| Error::invalid_data(format!("invalid address: {}", v)))?,
                function.unwrap_or(DEFAULT_FUNCTION),
            ),
        };
        let decoder = decoder
            .map(DecoderSpec::from_value)
            .transpose()?
            .unwrap_or_default();
        Ok(Self {
            address,
            function,
            decoder,
        })
    }
}

impl<'de> Deserialize<'de> for RegisterSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = JsonValue::deserialize(deserializer)?;
        RegisterSpec::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// An ordered signal name to register spec mapping
///
/// Keys are unique, re-adding a key overwrites its spec in place. Cloning copies the mapping,
/// decoders are built fresh for every call anyway.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mib {
    entries: Vec<(SignalKey, RegisterSpec)>,
    counter: usize,
}

impl Mib {
    pub fn new() -> Self {
        Self::default()
    }
    /// Inserts or overwrites a signal
    pub fn add<K: Into<SignalKey>>(&mut self, name: K, spec: RegisterSpec) -> &mut Self {
        let key = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = spec;
        } else {
            self.entries.push((key, spec));
        }
        self
    }
    /// Inserts a signal under the next auto-increment key and returns the key
    pub fn add_anonymous(&mut self, spec: RegisterSpec) -> SignalKey {
        let key = SignalKey::Index(self.counter);
        self.counter += 1;
        self.add(key.clone(), spec);
        key
    }
    /// Builder-style [`Mib::add`]
    pub fn with<K: Into<SignalKey>>(mut self, name: K, spec: RegisterSpec) -> Self {
        self.add(name, spec);
        self
    }
    pub fn get(&self, key: &SignalKey) -> Option<&RegisterSpec> {
        self.entries
            .iter()
            .find_map(|(k, spec)| (k == key).then_some(spec))
    }
    pub fn contains(&self, key: &SignalKey) -> bool {
        self.get(key).is_some()
    }
    pub fn keys(&self) -> impl Iterator<Item = &SignalKey> {
        self.entries.iter().map(|(k, _)| k)
    }
    pub fn iter(&self) -> impl Iterator<Item = (&SignalKey, &RegisterSpec)> {
        self.entries.iter().map(|(k, spec)| (k, spec))
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    /// Builds a MIB from a JSON literal: an object of `name: register spec` entries (the order
    /// is kept) or an array of anonymous register specs
    pub fn from_value(value: &JsonValue) -> Result<Self> {
        let mut mib = Mib::new();
        match value {
            JsonValue::Object(map) => {
                for (name, spec) in map {
                    mib.add(name.as_str(), RegisterSpec::from_value(spec)?);
                }
            }
            JsonValue::Array(specs) => {
                for spec in specs {
                    mib.add_anonymous(RegisterSpec::from_value(spec)?);
                }
            }
            JsonValue::Null => {}
            other => return Err(Error::invalid_data(format!("invalid MIB: {}", other))),
        }
        Ok(mib)
    }
    pub fn from_json(s: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(s).map_err(Error::invalid_data)?;
        Self::from_value(&value)
    }
}

impl<K: Into<SignalKey>> FromIterator<(K, RegisterSpec)> for Mib {
    fn from_iter<I: IntoIterator<Item = (K, RegisterSpec)>>(iter: I) -> Self {
        let mut mib = Mib::new();
        for (k, spec) in iter {
            mib.add(k, spec);
        }
        mib
    }
}

impl<'de> Deserialize<'de> for Mib {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = JsonValue::deserialize(deserializer)?;
        Mib::from_value(&value).map_err(serde::de::Error::custom)
    }
}
