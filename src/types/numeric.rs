use std::io::Cursor;

use binrw::{BinRead, BinWrite};

use super::{Layout, ParamReader, Params, RawData, TypeDecoder, Value};
use crate::{Error, Result};

/// Integer widths
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Width {
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
}

impl Width {
    /// Registers occupied
    pub fn words(self) -> u16 {
        match self {
            Width::I16 | Width::U16 => 1,
            Width::I32 | Width::U32 => 2,
            Width::I64 | Width::U64 => 4,
        }
    }
    pub fn from_words(words: u16, signed: bool) -> Option<Self> {
        match (words, signed) {
            (1, true) => Some(Width::I16),
            (1, false) => Some(Width::U16),
            (2, true) => Some(Width::I32),
            (2, false) => Some(Width::U32),
            (4, true) => Some(Width::I64),
            (4, false) => Some(Width::U64),
            _ => None,
        }
    }
    /// Reads a big-endian integer
    pub(crate) fn read(self, bytes: &[u8]) -> Result<Value> {
        let mut reader = Cursor::new(bytes);
        Ok(match self {
            Width::I16 => Value::Int(i16::read_be(&mut reader)?.into()),
            Width::U16 => Value::UInt(u16::read_be(&mut reader)?.into()),
            Width::I32 => Value::Int(i32::read_be(&mut reader)?.into()),
            Width::U32 => Value::UInt(u32::read_be(&mut reader)?.into()),
            Width::I64 => Value::Int(i64::read_be(&mut reader)?),
            Width::U64 => Value::UInt(u64::read_be(&mut reader)?),
        })
    }
    /// Writes a big-endian integer, the value must fit
    pub(crate) fn write(self, kind: &str, value: &Value) -> Result<Vec<u8>> {
        let out_of_range = || {
            Error::invalid_data(format!("{}: value {} is out of range", kind, value))
        };
        let mut buf = Vec::with_capacity(usize::from(self.words()) * 2);
        let mut writer = Cursor::new(&mut buf);
        if self == Width::U64 {
            value.as_u64().ok_or_else(out_of_range)?.write_be(&mut writer)?;
        } else {
            let v = value.as_i64().ok_or_else(out_of_range)?;
            match self {
                Width::I16 => i16::try_from(v)
                    .map_err(|_| out_of_range())?
                    .write_be(&mut writer)?,
                Width::U16 => u16::try_from(v)
                    .map_err(|_| out_of_range())?
                    .write_be(&mut writer)?,
                Width::I32 => i32::try_from(v)
                    .map_err(|_| out_of_range())?
                    .write_be(&mut writer)?,
                Width::U32 => u32::try_from(v)
                    .map_err(|_| out_of_range())?
                    .write_be(&mut writer)?,
                Width::I64 | Width::U64 => v.write_be(&mut writer)?,
            }
        }
        Ok(buf)
    }
}

/// Integer decoders: `Short`, `UShort`, `Int`, `UInt`, `Long`, `ULong`
///
/// Signed kinds produce [`Value::Int`], unsigned ones [`Value::UInt`]. Accepted params:
/// `word_order`, `byte_order`.
#[derive(Debug, Clone)]
pub struct Integer {
    kind: &'static str,
    width: Width,
    layout: Layout,
    raw: Option<RawData>,
    value: Option<Value>,
}

impl Integer {
    pub fn new(kind: &'static str, width: Width, layout: Layout) -> Self {
        Self {
            kind,
            width,
            layout,
            raw: None,
            value: None,
        }
    }
    pub fn create(
        kind: &'static str,
        width: Width,
        params: &Params,
    ) -> Result<Box<dyn TypeDecoder>> {
        let mut reader = ParamReader::new(kind, params);
        let layout = reader.layout()?;
        reader.finish()?;
        Ok(Box::new(Self::new(kind, width, layout)))
    }
}

impl TypeDecoder for Integer {
    fn kind(&self) -> &str {
        self.kind
    }
    fn word_count(&self) -> u16 {
        self.width.words()
    }
    fn bit_count(&self) -> u16 {
        self.width.words() * 16
    }
    fn decode(&mut self, raw: RawData) -> Result<()> {
        let words = raw.words(self.width.words().into())?;
        let value = self.width.read(&self.layout.to_bytes(&words))?;
        self.raw = Some(raw);
        self.value = Some(value);
        Ok(())
    }
    fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
    fn raw(&self) -> Option<&RawData> {
        self.raw.as_ref()
    }
    fn encode_words(&self, value: &Value) -> Result<Vec<u16>> {
        Ok(self.layout.to_words(&self.width.write(self.kind, value)?))
    }
    fn fresh(&self) -> Box<dyn TypeDecoder> {
        Box::new(Self::new(self.kind, self.width, self.layout))
    }
}

/// IEEE 754 decoders: `Float` (2 registers) and `Double` (4 registers)
///
/// `Float` values are narrowed to `f32` when encoding.
#[derive(Debug, Clone)]
pub struct Float {
    kind: &'static str,
    double: bool,
    layout: Layout,
    raw: Option<RawData>,
    value: Option<Value>,
}

impl Float {
    pub fn new(kind: &'static str, double: bool, layout: Layout) -> Self {
        Self {
            kind,
            double,
            layout,
            raw: None,
            value: None,
        }
    }
    pub fn create(kind: &'static str, double: bool, params: &Params) -> Result<Box<dyn TypeDecoder>> {
        let mut reader = ParamReader::new(kind, params);
        let layout = reader.layout()?;
        reader.finish()?;
        Ok(Box::new(Self::new(kind, double, layout)))
    }
}

impl TypeDecoder for Float {
    fn kind(&self) -> &str {
        self.kind
    }
    fn word_count(&self) -> u16 {
        if self.double {
            4
        } else {
            2
        }
    }
    fn bit_count(&self) -> u16 {
        self.word_count() * 16
    }
    fn decode(&mut self, raw: RawData) -> Result<()> {
        let words = raw.words(self.word_count().into())?;
        let bytes = self.layout.to_bytes(&words);
        let mut reader = Cursor::new(&bytes);
        let value = if self.double {
            f64::read_be(&mut reader)?
        } else {
            f32::read_be(&mut reader)?.into()
        };
        self.raw = Some(raw);
        self.value = Some(Value::Float(value));
        Ok(())
    }
    fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
    fn raw(&self) -> Option<&RawData> {
        self.raw.as_ref()
    }
    #[allow(clippy::cast_possible_truncation)]
    fn encode_words(&self, value: &Value) -> Result<Vec<u16>> {
        let v = value.as_f64().ok_or_else(|| {
            Error::invalid_data(format!("{}: value {} is not a number", self.kind, value))
        })?;
        let mut buf = Vec::with_capacity(8);
        let mut writer = Cursor::new(&mut buf);
        if self.double {
            v.write_be(&mut writer)?;
        } else {
            (v as f32).write_be(&mut writer)?;
        }
        Ok(self.layout.to_words(&buf))
    }
    fn fresh(&self) -> Box<dyn TypeDecoder> {
        Box::new(Self::new(self.kind, self.double, self.layout))
    }
}
