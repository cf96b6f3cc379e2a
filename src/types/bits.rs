use super::{pack_bits, ParamReader, Params, RawData, TypeDecoder, Value};
use crate::{Error, Result};

/// A single coil or discrete input. When read from a register, any non-zero value is `true`
#[derive(Debug, Clone, Default)]
pub struct Bit {
    raw: Option<RawData>,
    value: Option<Value>,
}

impl Bit {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn create(params: &Params) -> Result<Box<dyn TypeDecoder>> {
        ParamReader::new("Bit", params).finish()?;
        Ok(Box::new(Self::new()))
    }
}

fn to_bool(kind: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::invalid_data(format!("{}: value {} is not a boolean", kind, value)))
}

impl TypeDecoder for Bit {
    fn kind(&self) -> &str {
        "Bit"
    }
    fn word_count(&self) -> u16 {
        1
    }
    fn bit_count(&self) -> u16 {
        1
    }
    fn decode(&mut self, raw: RawData) -> Result<()> {
        let value = match raw {
            RawData::Bits(ref b) => *b
                .first()
                .ok_or_else(|| Error::invalid_data("1 bit(s) required, 0 received"))?,
            RawData::Words(ref w) => {
                *w.first()
                    .ok_or_else(|| Error::invalid_data("1 register(s) required, 0 received"))?
                    != 0
            }
        };
        self.raw = Some(raw);
        self.value = Some(Value::Bool(value));
        Ok(())
    }
    fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
    fn raw(&self) -> Option<&RawData> {
        self.raw.as_ref()
    }
    fn encode_words(&self, value: &Value) -> Result<Vec<u16>> {
        Ok(vec![u16::from(to_bool("Bit", value)?)])
    }
    fn encode_bits(&self, value: &Value) -> Result<Vec<bool>> {
        Ok(vec![to_bool("Bit", value)?])
    }
    fn fresh(&self) -> Box<dyn TypeDecoder> {
        Box::new(Self::new())
    }
}

/// A block of coils or discrete inputs, param `count` (default 16). Registers are unpacked LSB
/// first
#[derive(Debug, Clone)]
pub struct Bits {
    count: u16,
    raw: Option<RawData>,
    value: Option<Value>,
}

impl Bits {
    pub fn new(count: u16) -> Self {
        Self {
            count,
            raw: None,
            value: None,
        }
    }
    pub fn create(params: &Params) -> Result<Box<dyn TypeDecoder>> {
        let mut reader = ParamReader::new("Bits", params);
        let count = reader.u16("count", 16)?;
        reader.finish()?;
        if count == 0 || count > 2000 {
            return Err(Error::invalid_spec("Bits: count must be in 1..=2000"));
        }
        Ok(Box::new(Self::new(count)))
    }
}

impl TypeDecoder for Bits {
    fn kind(&self) -> &str {
        "Bits"
    }
    fn word_count(&self) -> u16 {
        self.count.div_ceil(16)
    }
    fn bit_count(&self) -> u16 {
        self.count
    }
    fn decode(&mut self, raw: RawData) -> Result<()> {
        let bits = raw.bits(self.count.into())?;
        self.raw = Some(raw);
        self.value = Some(Value::Bits(bits));
        Ok(())
    }
    fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
    fn raw(&self) -> Option<&RawData> {
        self.raw.as_ref()
    }
    fn encode_words(&self, value: &Value) -> Result<Vec<u16>> {
        Ok(pack_bits(&self.encode_bits(value)?))
    }
    fn encode_bits(&self, value: &Value) -> Result<Vec<bool>> {
        match value {
            Value::Bits(bits) if bits.len() == usize::from(self.count) => Ok(bits.clone()),
            _ => Err(Error::invalid_data(format!(
                "Bits: {} bit(s) required, got {}",
                self.count, value
            ))),
        }
    }
    fn fresh(&self) -> Box<dyn TypeDecoder> {
        Box::new(Self::new(self.count))
    }
}
