use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Error;

/// A WAL position. Postgres prints these as `X/Y` with both halves hex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lsn {
    pub lsn: i64,
}

impl Lsn {
    pub fn from_i64(lsn: i64) -> Self {
        Self { lsn }
    }

    pub fn high(&self) -> i64 {
        ((self.lsn >> 32) as u32) as i64
    }

    pub fn low(&self) -> i64 {
        ((self.lsn & 0xFFFF_FFFF) as u32) as i64
    }
}

impl FromStr for Lsn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || Error::Replica(format!("bad lsn \"{}\"", s));
        let (high, low) = s.split_once('/').ok_or_else(bad)?;
        let high = i64::from_str_radix(high, 16).map_err(|_| bad())?;
        let low = i64::from_str_radix(low, 16).map_err(|_| bad())?;

        Ok(Self {
            lsn: (high << 32) + low,
        })
    }
}

impl Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:X}/{:X}", self.high(), self.low())
    }
}

/// Opaque lexicographically-ordered cursor into the change stream.
///
/// Fixed-width hex of the commit LSN, so string order equals WAL order and
/// the all-zero watermark sorts before every real position.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Watermark(String);

impl Watermark {
    pub const MIN: &'static str = "0000000000000000";

    pub fn from_lsn(lsn: Lsn) -> Self {
        Self(format!("{:016x}", lsn.lsn))
    }

    pub fn min() -> Self {
        Self(Self::MIN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_lsn(&self) -> Result<Lsn, Error> {
        let lsn = i64::from_str_radix(&self.0, 16)
            .map_err(|_| Error::Replica(format!("bad watermark \"{}\"", self.0)))?;
        Ok(Lsn::from_i64(lsn))
    }
}

impl FromStr for Watermark {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        i64::from_str_radix(s, 16)
            .map_err(|_| Error::Replica(format!("bad watermark \"{}\"", s)))?;
        Ok(Self(s.to_string()))
    }
}

impl Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lsn_roundtrip() {
        let lsn = Lsn::from_str("16/B374D848").unwrap();
        assert_eq!(lsn.to_string(), "16/B374D848");
        assert_eq!(lsn.lsn, (0x16 << 32) + 0xB374D848);
    }

    #[test]
    fn test_watermark_order_matches_wal_order() {
        let a = Watermark::from_lsn(Lsn::from_i64(0x10));
        let b = Watermark::from_lsn(Lsn::from_i64(0x100));
        let c = Watermark::from_lsn(Lsn::from_i64(0xFF00000000));

        assert!(a < b);
        assert!(b < c);
        assert!(Watermark::min() < a);
        // Lexicographic on the string, numeric on the LSN: same answer.
        assert!(a.as_str() < b.as_str());
    }

    #[test]
    fn test_watermark_lsn_roundtrip() {
        let watermark = Watermark::from_lsn(Lsn::from_i64(12345));
        assert_eq!(watermark.to_lsn().unwrap().lsn, 12345);
    }

    #[test]
    fn test_bad_watermark_rejected() {
        assert!(Watermark::from_str("not-hex").is_err());
    }
}
