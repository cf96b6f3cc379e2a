use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Register kinds, one per read function code
#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum Kind {
    /// Function code 1
    Coil,
    /// Function code 2
    Discrete,
    /// Function code 3
    Holding,
    /// Function code 4
    Input,
}

impl Kind {
    /// The read function code
    pub fn code(self) -> u8 {
        match self {
            Kind::Coil => 1,
            Kind::Discrete => 2,
            Kind::Holding => 3,
            Kind::Input => 4,
        }
    }
    /// Coils and discrete inputs are bit-addressed
    pub fn is_bit(self) -> bool {
        matches!(self, Kind::Coil | Kind::Discrete)
    }
}

impl TryFrom<u8> for Kind {
    type Error = Error;
    fn try_from(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Kind::Coil),
            2 => Ok(Kind::Discrete),
            3 => Ok(Kind::Holding),
            4 => Ok(Kind::Input),
            v => Err(Error::UnsupportedFunctionCode(v)),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Kind::Coil => "c",
                Kind::Discrete => "d",
                Kind::Holding => "h",
                Kind::Input => "i",
            }
        )
    }
}

/// A register in `<kind><offset>` notation, e.g. `h100` is holding register 100
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Register {
    pub kind: Kind,
    pub offset: u16,
}

impl Register {
    pub fn new(kind: Kind, offset: u16) -> Self {
        Self { kind, offset }
    }
}

fn parse_kind_offset(r: &str) -> Result<(Kind, u16)> {
    if let Some(v) = r.strip_prefix('c') {
        Ok((Kind::Coil, v.parse()?))
    } else if let Some(v) = r.strip_prefix('d') {
        Ok((Kind::Discrete, v.parse()?))
    } else if let Some(v) = r.strip_prefix('i') {
        Ok((Kind::Input, v.parse()?))
    } else if let Some(v) = r.strip_prefix('h') {
        Ok((Kind::Holding, v.parse()?))
    } else {
        Err(Error::invalid_data(format!("invalid register kind: {}", r)))
    }
}

impl FromStr for Register {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let (kind, offset) = parse_kind_offset(s)?;
        Ok(Register { kind, offset })
    }
}

impl TryFrom<&str> for Register {
    type Error = Error;
    fn try_from(s: &str) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.offset)
    }
}

#[cfg(test)]
mod test {
    use super::{Kind, Register};
    use crate::Error;

    #[test]
    fn test_kind_codes() {
        for code in 1..=4u8 {
            assert_eq!(Kind::try_from(code).unwrap().code(), code);
        }
        assert_eq!(Kind::try_from(99), Err(Error::UnsupportedFunctionCode(99)));
        assert!(Kind::Coil.is_bit() && !Kind::Input.is_bit());
    }

    #[test]
    fn test_parse() {
        let reg: Register = "h100".parse().unwrap();
        assert_eq!(reg, Register::new(Kind::Holding, 100));
        assert_eq!(reg.to_string(), "h100");
        assert_eq!(Register::try_from("d0").unwrap().kind, Kind::Discrete);
        assert!("x1".parse::<Register>().is_err());
        assert!("c70000".parse::<Register>().is_err());
    }
}
