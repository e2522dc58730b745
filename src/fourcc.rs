//! Four-character codes used as box types and brands.

use std::fmt;

/// A 4-byte tag packed into a big-endian `u32`.
///
/// Tag values come from the ISOBMFF/HEIF vocabulary (`ftyp`, `meta`, `iloc`,
/// ...). Equality and ordering are plain integer equality and ordering.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FourCC(u32);

impl FourCC {
    pub const fn new(tag: &[u8; 4]) -> Self {
        Self(u32::from_be_bytes(*tag))
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl From<u32> for FourCC {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<FourCC> for u32 {
    fn from(tag: FourCC) -> Self {
        tag.0
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(tag: &[u8; 4]) -> Self {
        Self::new(tag)
    }
}

impl PartialEq<&[u8; 4]> for FourCC {
    fn eq(&self, other: &&[u8; 4]) -> bool {
        self.0.to_be_bytes() == **other
    }
}

impl TryFrom<&str> for FourCC {
    type Error = crate::Error;

    /// Tags must be exactly four ASCII bytes (e.g. `"hvc1"`).
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let bytes: &[u8; 4] = value
            .as_bytes()
            .try_into()
            .map_err(|_| crate::Error::ConfigInvalid(format!("'{value}' is not a 4cc")))?;
        Ok(Self::new(bytes))
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0.to_be_bytes()) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "{:x?}", self.0),
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::FourCC;

    #[test]
    fn byte_order_and_ordering() {
        let ftyp = FourCC::new(b"ftyp");
        assert_eq!(ftyp.value(), 0x6674_7970);
        assert_eq!(ftyp.to_bytes(), *b"ftyp");
        assert_eq!(ftyp, b"ftyp");
        assert!(FourCC::new(b"aaaa") < FourCC::new(b"aaab"));
    }

    #[test]
    fn from_str_rejects_wrong_length() {
        assert!(FourCC::try_from("hvc1").is_ok());
        assert!(FourCC::try_from("hvc").is_err());
        assert!(FourCC::try_from("hvc1x").is_err());
    }

    #[test]
    fn display_falls_back_to_hex_for_non_utf8() {
        assert_eq!(FourCC::new(b"mdat").to_string(), "mdat");
        let odd = FourCC::from(0xff00_00ff);
        assert!(!odd.to_string().is_empty());
    }
}
