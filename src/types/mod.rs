//!
//! Typed decoders turn raw register words or bits into domain values and back.
//!
//! A decoder is selected by a case-insensitive kind name plus an optional parameter mapping, see
//! [`DecoderRegistry`]. Decoder instances are transient: a fresh one is created for every signal
//! on every read or write call.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::mib::DecoderSpec;
use crate::{Error, Result};

pub use bits::{Bit, Bits};
pub use numeric::{Float, Integer, Width};
pub use scaled::Decimal;
pub use text::Text;

mod bits;
mod numeric;
mod scaled;
mod text;

/// The kind used when a decoder spec has no kind name
pub const DEFAULT_KIND: &str = "short";

/// Raw data, as returned by the read primitives or accepted by the write ones
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawData {
    /// 16-bit registers (function codes 3, 4)
    Words(Vec<u16>),
    /// Coils and discrete inputs (function codes 1, 2)
    Bits(Vec<bool>),
}

impl RawData {
    pub fn len(&self) -> usize {
        match self {
            RawData::Words(w) => w.len(),
            RawData::Bits(b) => b.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Returns the first `count` registers. Bit data is packed 16 bits per register, LSB first
    pub fn words(&self, count: usize) -> Result<Vec<u16>> {
        match self {
            RawData::Words(w) => {
                if w.len() < count {
                    return Err(Error::invalid_data(format!(
                        "{} register(s) required, {} received",
                        count,
                        w.len()
                    )));
                }
                Ok(w[..count].to_vec())
            }
            RawData::Bits(b) => {
                if b.len() < count * 16 {
                    return Err(Error::invalid_data(format!(
                        "{} bit(s) required, {} received",
                        count * 16,
                        b.len()
                    )));
                }
                Ok(pack_bits(&b[..count * 16]))
            }
        }
    }
    /// Returns the first `count` bits. Registers are unpacked LSB first
    pub fn bits(&self, count: usize) -> Result<Vec<bool>> {
        match self {
            RawData::Bits(b) => {
                if b.len() < count {
                    return Err(Error::invalid_data(format!(
                        "{} bit(s) required, {} received",
                        count,
                        b.len()
                    )));
                }
                Ok(b[..count].to_vec())
            }
            RawData::Words(w) => {
                let mut bits = unpack_bits(w);
                if bits.len() < count {
                    return Err(Error::invalid_data(format!(
                        "{} bit(s) required, {} received",
                        count,
                        bits.len()
                    )));
                }
                bits.truncate(count);
                Ok(bits)
            }
        }
    }
}

/// Packs bits into registers, 16 per register, LSB first. The last register is zero-padded
pub fn pack_bits(bits: &[bool]) -> Vec<u16> {
    bits.chunks(16)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u16, |acc, (i, b)| if *b { acc | 1 << i } else { acc })
        })
        .collect()
}

/// Unpacks registers into bits, LSB first
pub fn unpack_bits(words: &[u16]) -> Vec<bool> {
    words
        .iter()
        .flat_map(|w| (0..16).map(move |i| w & (1 << i) != 0))
        .collect()
}

// float bounds of the 64-bit integer ranges, both exact in f64
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// A decoded value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bits(Vec<bool>),
    Text(String),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            Value::UInt(v) => Some(*v != 0),
            _ => None,
        }
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Float(v) if v.fract() == 0.0 && *v >= -TWO_POW_63 && *v < TWO_POW_63 => {
                Some(*v as i64)
            }
            _ => None,
        }
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 && *v >= 0.0 && *v < TWO_POW_64 => Some(*v as u64),
            _ => self.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Bool(v) => Some(f64::from(u8::from(*v))),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bits(v) => {
                for b in v {
                    write!(f, "{}", u8::from(*b))?;
                }
                Ok(())
            }
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

/// A decoder parameter value. Only scalars are accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Float(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Str(v.to_owned())
    }
}

/// Decoder parameters
pub type Params = BTreeMap<String, Param>;

/// Typed access to decoder params. Every param must be consumed, leftovers are reported by
/// [`ParamReader::finish`]
pub(crate) struct ParamReader<'a> {
    kind: &'a str,
    params: &'a Params,
    used: Vec<&'a str>,
}

impl<'a> ParamReader<'a> {
    pub(crate) fn new(kind: &'a str, params: &'a Params) -> Self {
        Self {
            kind,
            params,
            used: Vec::with_capacity(params.len()),
        }
    }
    fn get(&mut self, name: &'a str) -> Option<&'a Param> {
        self.used.push(name);
        self.params.get(name)
    }
    fn wrong_type(&self, name: &str, expected: &str) -> Error {
        Error::invalid_spec(format!(
            "{}: param `{}` must be {}",
            self.kind, name, expected
        ))
    }
    pub(crate) fn bool(&mut self, name: &'a str, default: bool) -> Result<bool> {
        match self.get(name) {
            None => Ok(default),
            Some(Param::Bool(v)) => Ok(*v),
            Some(_) => Err(self.wrong_type(name, "a boolean")),
        }
    }
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn f64(&mut self, name: &'a str, default: f64) -> Result<f64> {
        match self.get(name) {
            None => Ok(default),
            Some(Param::Float(v)) if v.is_finite() => Ok(*v),
            Some(Param::Int(v)) => Ok(*v as f64),
            Some(_) => Err(self.wrong_type(name, "a finite number")),
        }
    }
    pub(crate) fn u16(&mut self, name: &'a str, default: u16) -> Result<u16> {
        match self.get(name) {
            None => Ok(default),
            Some(Param::Int(v)) => {
                u16::try_from(*v).map_err(|_| self.wrong_type(name, "an integer in 0..=65535"))
            }
            Some(_) => Err(self.wrong_type(name, "an integer")),
        }
    }
    pub(crate) fn str(&mut self, name: &'a str) -> Result<Option<&'a str>> {
        match self.get(name) {
            None => Ok(None),
            Some(Param::Str(v)) => Ok(Some(v.as_str())),
            Some(_) => Err(self.wrong_type(name, "a string")),
        }
    }
    pub(crate) fn layout(&mut self) -> Result<Layout> {
        let word_order = self.order("word_order")?;
        let byte_order = self.order("byte_order")?;
        Ok(Layout {
            word_order,
            byte_order,
        })
    }
    fn order(&mut self, name: &'a str) -> Result<Order> {
        match self.str(name)? {
            None => Ok(Order::Big),
            Some(v) => match v.to_lowercase().as_str() {
                "big" | "be" => Ok(Order::Big),
                "little" | "le" => Ok(Order::Little),
                _ => Err(self.wrong_type(name, "\"big\" or \"little\"")),
            },
        }
    }
    pub(crate) fn finish(self) -> Result<()> {
        if let Some(unknown) = self
            .params
            .keys()
            .find(|k| !self.used.contains(&k.as_str()))
        {
            return Err(Error::invalid_spec(format!(
                "{}: unknown param `{}`",
                self.kind, unknown
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Order {
    #[default]
    Big,
    Little,
}

/// Register and byte order of multi-register values. The default is big-endian with the high
/// word first
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct Layout {
    pub word_order: Order,
    pub byte_order: Order,
}

impl Layout {
    /// Converts registers into a big-endian byte sequence
    pub fn to_bytes(self, words: &[u16]) -> Vec<u8> {
        let mut ordered = words.to_vec();
        if self.word_order == Order::Little {
            ordered.reverse();
        }
        let mut out = Vec::with_capacity(words.len() * 2);
        for w in ordered {
            let b = w.to_be_bytes();
            match self.byte_order {
                Order::Big => out.extend(b),
                Order::Little => out.extend([b[1], b[0]]),
            }
        }
        out
    }
    /// Converts a big-endian byte sequence into registers
    pub fn to_words(self, bytes: &[u8]) -> Vec<u16> {
        let mut words: Vec<u16> = bytes
            .chunks(2)
            .map(|c| {
                let hi = c[0];
                let lo = c.get(1).copied().unwrap_or_default();
                match self.byte_order {
                    Order::Big => u16::from_be_bytes([hi, lo]),
                    Order::Little => u16::from_be_bytes([lo, hi]),
                }
            })
            .collect();
        if self.word_order == Order::Little {
            words.reverse();
        }
        words
    }
}

/// The decoder capability set
pub trait TypeDecoder: fmt::Debug + Send + Sync {
    /// Kind name, as registered
    fn kind(&self) -> &str;
    /// Registers required (function codes 3, 4)
    fn word_count(&self) -> u16;
    /// Bits required (function codes 1, 2)
    fn bit_count(&self) -> u16;
    /// Decodes the raw data and stores both the raw data and the value
    fn decode(&mut self, raw: RawData) -> Result<()>;
    /// The decoded value, `None` until [`TypeDecoder::decode`] succeeds
    fn value(&self) -> Option<&Value>;
    /// The raw data last decoded
    fn raw(&self) -> Option<&RawData>;
    /// Encodes a value into registers
    fn encode_words(&self, value: &Value) -> Result<Vec<u16>>;
    /// Encodes a value into bits
    fn encode_bits(&self, value: &Value) -> Result<Vec<bool>> {
        let mut bits = unpack_bits(&self.encode_words(value)?);
        bits.truncate(usize::from(self.bit_count()));
        Ok(bits)
    }
    /// A new instance with the same configuration and no decoded data
    fn fresh(&self) -> Box<dyn TypeDecoder>;
}

pub type DecoderFactory = Arc<dyn Fn(&Params) -> Result<Box<dyn TypeDecoder>> + Send + Sync>;

/// Decoder kind name to factory mapping. Names are case-insensitive
#[derive(Clone)]
pub struct DecoderRegistry {
    factories: BTreeMap<String, DecoderFactory>,
}

impl DecoderRegistry {
    /// Creates an empty registry, see [`DecoderRegistry::default`] for the one with the
    /// built-in kinds
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }
    /// Registers a kind, replacing the existing one with the same name
    pub fn register<F>(&mut self, kind: &str, factory: F) -> &mut Self
    where
        F: Fn(&Params) -> Result<Box<dyn TypeDecoder>> + Send + Sync + 'static,
    {
        self.factories
            .insert(kind.to_lowercase(), Arc::new(factory));
        self
    }
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(&kind.to_lowercase())
    }
    /// Registered kind names (lowercase)
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
    /// Creates a decoder. An empty kind name selects the default kind
    pub fn create(&self, kind: &str, params: &Params) -> Result<Box<dyn TypeDecoder>> {
        let name = if kind.is_empty() {
            DEFAULT_KIND.to_owned()
        } else {
            kind.to_lowercase()
        };
        let factory = self
            .factories
            .get(&name)
            .ok_or_else(|| Error::UnknownDecoderKind(kind.to_owned()))?;
        factory(params)
    }
    /// Creates a decoder for a decoder spec. Instances are copied with
    /// [`TypeDecoder::fresh`]
    pub fn build(&self, spec: &DecoderSpec) -> Result<Box<dyn TypeDecoder>> {
        match spec {
            DecoderSpec::Default => self.create("", &Params::new()),
            DecoderSpec::Kind(kind) => self.create(kind, &Params::new()),
            DecoderSpec::WithParams(kind, params) => self.create(kind, params),
            DecoderSpec::Instance(decoder) => Ok(decoder.fresh()),
        }
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry
            .register("short", |p| Integer::create("Short", Width::I16, p))
            .register("ushort", |p| {
                Integer::create("UShort", Width::U16, p)
            })
            .register("int", |p| Integer::create("Int", Width::I32, p))
            .register("uint", |p| Integer::create("UInt", Width::U32, p))
            .register("long", |p| Integer::create("Long", Width::I64, p))
            .register("ulong", |p| Integer::create("ULong", Width::U64, p))
            .register("float", |p| Float::create("Float", false, p))
            .register("double", |p| Float::create("Double", true, p))
            .register("decimal", Decimal::create)
            .register("bit", Bit::create)
            .register("bits", Bits::create)
            .register("text", Text::create);
        registry
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
