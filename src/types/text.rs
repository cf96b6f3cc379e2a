use super::{Layout, ParamReader, Params, RawData, TypeDecoder, Value};
use crate::{Error, Result};

/// An ASCII string, two characters per register, param `length` in registers (default 1).
/// Trailing NUL and space characters are trimmed when decoding, NUL-padded when encoding
#[derive(Debug, Clone)]
pub struct Text {
    length: u16,
    layout: Layout,
    raw: Option<RawData>,
    value: Option<Value>,
}

impl Text {
    pub fn new(length: u16, layout: Layout) -> Self {
        Self {
            length,
            layout,
            raw: None,
            value: None,
        }
    }
    pub fn create(params: &Params) -> Result<Box<dyn TypeDecoder>> {
        let mut reader = ParamReader::new("Text", params);
        let length = reader.u16("length", 1)?;
        let layout = reader.layout()?;
        reader.finish()?;
        if length == 0 || length > 125 {
            return Err(Error::invalid_spec("Text: length must be in 1..=125"));
        }
        Ok(Box::new(Self::new(length, layout)))
    }
}

impl TypeDecoder for Text {
    fn kind(&self) -> &str {
        "Text"
    }
    fn word_count(&self) -> u16 {
        self.length
    }
    fn bit_count(&self) -> u16 {
        self.length * 16
    }
    fn decode(&mut self, raw: RawData) -> Result<()> {
        let words = raw.words(self.length.into())?;
        let bytes = self.layout.to_bytes(&words);
        if !bytes.is_ascii() {
            return Err(Error::invalid_data("Text: non-ASCII data"));
        }
        let s = String::from_utf8_lossy(&bytes)
            .trim_end_matches(['\0', ' '])
            .to_owned();
        self.raw = Some(raw);
        self.value = Some(Value::Text(s));
        Ok(())
    }
    fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
    fn raw(&self) -> Option<&RawData> {
        self.raw.as_ref()
    }
    fn encode_words(&self, value: &Value) -> Result<Vec<u16>> {
        let Value::Text(s) = value else {
            return Err(Error::invalid_data(format!(
                "Text: value {} is not a string",
                value
            )));
        };
        let capacity = usize::from(self.length) * 2;
        if !s.is_ascii() || s.len() > capacity {
            return Err(Error::invalid_data(format!(
                "Text: up to {} ASCII characters allowed",
                capacity
            )));
        }
        // trailing padding would not survive decoding
        if s.ends_with(['\0', ' ']) {
            return Err(Error::invalid_data(
                "Text: trailing NUL or space characters are not allowed",
            ));
        }
        let mut bytes = s.as_bytes().to_vec();
        bytes.resize(capacity, 0);
        Ok(self.layout.to_words(&bytes))
    }
    fn fresh(&self) -> Box<dyn TypeDecoder> {
        Box::new(Self::new(self.length, self.layout))
    }
}
