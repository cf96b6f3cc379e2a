use super::{Layout, ParamReader, Params, RawData, TypeDecoder, Value, Width};
use crate::{Error, Result};

/// Scaled decimal: `value = raw * scale + offset`
///
/// Params: `words` (1, 2 or 4, default 1), `signed` (default true), `scale` (default 1.0),
/// `offset` (default 0.0), `word_order`, `byte_order`. Encoding inverts the transform and rounds
/// to the nearest raw integer, values whose raw integer does not fit are rejected.
#[derive(Debug, Clone)]
pub struct Decimal {
    width: Width,
    scale: f64,
    offset: f64,
    layout: Layout,
    raw: Option<RawData>,
    value: Option<Value>,
}

impl Decimal {
    pub fn new(width: Width, scale: f64, offset: f64, layout: Layout) -> Self {
        Self {
            width,
            scale,
            offset,
            layout,
            raw: None,
            value: None,
        }
    }
    pub fn create(params: &Params) -> Result<Box<dyn TypeDecoder>> {
        let mut reader = ParamReader::new("Decimal", params);
        let words = reader.u16("words", 1)?;
        let signed = reader.bool("signed", true)?;
        let scale = reader.f64("scale", 1.0)?;
        let offset = reader.f64("offset", 0.0)?;
        let layout = reader.layout()?;
        reader.finish()?;
        let width = Width::from_words(words, signed).ok_or_else(|| {
            Error::invalid_spec(format!("Decimal: unsupported register count {}", words))
        })?;
        if scale == 0.0 {
            return Err(Error::invalid_spec("Decimal: scale must not be zero"));
        }
        Ok(Box::new(Self::new(width, scale, offset, layout)))
    }
}

impl TypeDecoder for Decimal {
    fn kind(&self) -> &str {
        "Decimal"
    }
    fn word_count(&self) -> u16 {
        self.width.words()
    }
    fn bit_count(&self) -> u16 {
        self.width.words() * 16
    }
    fn decode(&mut self, raw: RawData) -> Result<()> {
        let words = raw.words(self.width.words().into())?;
        let n = self
            .width
            .read(&self.layout.to_bytes(&words))?
            .as_f64()
            .ok_or_else(|| Error::invalid_data("Decimal: non-numeric raw value"))?;
        self.raw = Some(raw);
        self.value = Some(Value::Float(n * self.scale + self.offset));
        Ok(())
    }
    fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
    fn raw(&self) -> Option<&RawData> {
        self.raw.as_ref()
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn encode_words(&self, value: &Value) -> Result<Vec<u16>> {
        let v = value.as_f64().ok_or_else(|| {
            Error::invalid_data(format!("Decimal: value {} is not a number", value))
        })?;
        let n = ((v - self.offset) / self.scale).round();
        if !n.is_finite() || n < i64::MIN as f64 || n >= u64::MAX as f64 {
            return Err(Error::invalid_data(format!(
                "Decimal: value {} is out of range",
                value
            )));
        }
        let raw = if n < 0.0 {
            Value::Int(n as i64)
        } else {
            Value::UInt(n as u64)
        };
        Ok(self.layout.to_words(&self.width.write("Decimal", &raw)?))
    }
    fn fresh(&self) -> Box<dyn TypeDecoder> {
        Box::new(Self::new(self.width, self.scale, self.offset, self.layout))
    }
}

#[cfg(test)]
mod test {
    use super::Decimal;
    use crate::types::{Param, Params, RawData, Value};
    use crate::Error;

    fn params(items: &[(&str, Param)]) -> Params {
        items
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn test_identity() {
        let mut d = Decimal::create(&Params::new()).unwrap();
        d.decode(RawData::Words(vec![250])).unwrap();
        assert_eq!(d.value(), Some(&Value::Float(250.0)));
    }

    #[test]
    fn test_scale_offset() {
        let mut d = Decimal::create(&params(&[
            ("scale", Param::Float(0.5)),
            ("offset", Param::Int(-10)),
        ]))
        .unwrap();
        d.decode(RawData::Words(vec![0xfffc])).unwrap();
        assert_eq!(d.value(), Some(&Value::Float(-12.0)));
        assert_eq!(d.encode_words(&Value::Float(-12.0)).unwrap(), vec![0xfffc]);
        assert_eq!(d.encode_words(&Value::Int(40)).unwrap(), vec![100]);
    }

    #[test]
    fn test_unsigned_two_words() {
        let mut d = Decimal::create(&params(&[
            ("words", Param::Int(2)),
            ("signed", Param::Bool(false)),
            ("scale", Param::Float(0.25)),
        ]))
        .unwrap();
        assert_eq!(d.word_count(), 2);
        d.decode(RawData::Words(vec![1, 0])).unwrap();
        assert_eq!(d.value(), Some(&Value::Float(16384.0)));
        let words = d.encode_words(&Value::Float(16384.0)).unwrap();
        assert_eq!(words, vec![1, 0]);
        assert!(matches!(
            d.encode_words(&Value::Float(-1.0)),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_round_trip() {
        let d = Decimal::create(&params(&[("scale", Param::Float(0.1))])).unwrap();
        for raw in [-32768i64, -1, 0, 1, 215, 32767] {
            let v = Value::Float(raw as f64 * 0.1);
            let mut fresh = d.fresh();
            fresh
                .decode(RawData::Words(d.encode_words(&v).unwrap()))
                .unwrap();
            assert_eq!(fresh.value(), Some(&v));
        }
        assert!(d.encode_words(&Value::Float(3276.8)).is_err());
    }

    #[test]
    fn test_invalid_params() {
        assert!(matches!(
            Decimal::create(&params(&[("words", Param::Int(3))])),
            Err(Error::InvalidDecoderSpec(_))
        ));
        assert!(matches!(
            Decimal::create(&params(&[("scale", Param::Int(0))])),
            Err(Error::InvalidDecoderSpec(_))
        ));
        assert!(matches!(
            Decimal::create(&params(&[("signed", Param::Str("yes".to_owned()))])),
            Err(Error::InvalidDecoderSpec(_))
        ));
    }
}
