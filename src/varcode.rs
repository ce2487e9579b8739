//! 16-bit descriptor identifiers (`F:2 | X:6 | Y:8`).
//!
//! Mirrors the teacher's small newtype-over-int identifiers
//! (`read::BlockId`, `read::AbbreviationId`): a `Varcode` is a thin wrapper
//! around a `u16` with accessors for its packed fields and a total order
//! equal to numeric order over the packed value.

use crate::error::{Error, Result};
use num_enum::TryFromPrimitive;
use serde::Serialize;
use std::fmt;

/// The four opcode classes a `Varcode` can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum F {
    /// Data element (`B`).
    Element = 0,
    /// Replication (`R`).
    Replication = 1,
    /// Modifier (`C`).
    Modifier = 2,
    /// Sequence (`D`).
    Sequence = 3,
}

impl F {
    fn from_bits(bits: u16) -> Self {
        F::try_from(bits as u8).expect("caller masks bits to the 2-bit F field")
    }

    fn letter(self) -> char {
        match self {
            F::Element => 'B',
            F::Replication => 'R',
            F::Modifier => 'C',
            F::Sequence => 'D',
        }
    }
}

/// A packed `F:2 | X:6 | Y:8` descriptor code, in natural numeric order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Varcode(u16);

impl Varcode {
    /// Build a Varcode from its three fields. `x` is masked to 6 bits, `y`
    /// to 8 bits; `f` is masked to 2 bits.
    #[must_use]
    pub const fn new(f: u8, x: u8, y: u8) -> Self {
        Varcode((((f as u16) & 0x3) << 14) | (((x as u16) & 0x3f) << 8) | (y as u16))
    }

    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Varcode(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[must_use]
    pub fn f(self) -> F {
        F::from_bits((self.0 >> 14) & 0x3)
    }

    #[must_use]
    pub const fn x(self) -> u8 {
        ((self.0 >> 8) & 0x3f) as u8
    }

    #[must_use]
    pub const fn y(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    #[must_use]
    pub fn is_element(self) -> bool {
        matches!(self.f(), F::Element)
    }

    #[must_use]
    pub fn is_replication(self) -> bool {
        matches!(self.f(), F::Replication)
    }

    #[must_use]
    pub fn is_modifier(self) -> bool {
        matches!(self.f(), F::Modifier)
    }

    #[must_use]
    pub fn is_sequence(self) -> bool {
        matches!(self.f(), F::Sequence)
    }

    /// True for the five `B31yyy` delayed-replication factor descriptors
    /// that must never be treated as "missing" even when all-ones.
    #[must_use]
    pub fn is_delayed_replication_factor(self) -> bool {
        self.is_element()
            && self.x() == 31
            && matches!(self.y(), 0 | 1 | 2 | 11 | 12)
    }

    /// Parse either the canonical letter form (`B12101`, `R10003`, ...) or
    /// the leading-digit form (`012101`, `110003`, ...).
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 6 {
            return Err(Error::Parse(format!(
                "varcode '{s}' must be exactly 6 characters"
            )));
        }
        let f = match bytes[0] {
            b'B' | b'0' => 0u8,
            b'R' | b'1' => 1u8,
            b'C' | b'2' => 2u8,
            b'D' | b'3' => 3u8,
            _ => return Err(Error::Parse(format!("varcode '{s}' has unknown F selector"))),
        };
        for &b in &bytes[1..] {
            if !b.is_ascii_digit() {
                return Err(Error::Parse(format!("varcode '{s}' is not numeric after F")));
            }
        }
        let x: u8 = s[1..3]
            .parse()
            .map_err(|_| Error::Parse(format!("varcode '{s}' has malformed X")))?;
        let y: u8 = s[3..6]
            .parse()
            .map_err(|_| Error::Parse(format!("varcode '{s}' has malformed Y")))?;
        Ok(Varcode::new(f, x, y))
    }

    #[must_use]
    pub fn format(self) -> String {
        format!("{}{:02}{:03}", self.f().letter(), self.x(), self.y())
    }
}

impl fmt::Debug for Varcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Varcode({})", self.format())
    }
}

impl fmt::Display for Varcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl std::str::FromStr for Varcode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Varcode::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_letter_forms() {
        for (text, f, x, y) in [
            ("B12101", 0u8, 12u8, 101u8),
            ("R10003", 1, 10, 3),
            ("C01005", 2, 1, 5),
            ("D02001", 3, 2, 1),
        ] {
            let v = Varcode::parse(text).unwrap();
            assert_eq!(v.f() as u8, f);
            assert_eq!(v.x(), x);
            assert_eq!(v.y(), y);
            assert_eq!(v.format(), text);
            assert_eq!(Varcode::parse(&v.format()).unwrap(), v);
        }
    }

    #[test]
    fn roundtrip_leading_digit_forms() {
        for text in ["012101", "110003", "201005", "302001"] {
            let v = Varcode::parse(text).unwrap();
            let canonical = v.format();
            assert_eq!(Varcode::parse(&canonical).unwrap(), v);
        }
    }

    #[test]
    fn total_order_is_numeric() {
        let a = Varcode::new(0, 1, 1);
        let b = Varcode::new(0, 1, 2);
        let c = Varcode::new(1, 0, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn delayed_replication_exceptions() {
        for y in [0u8, 1, 2, 11, 12] {
            assert!(Varcode::new(0, 31, y).is_delayed_replication_factor());
        }
        assert!(!Varcode::new(0, 31, 3).is_delayed_replication_factor());
        assert!(!Varcode::new(0, 20, 1).is_delayed_replication_factor());
    }

    #[test]
    fn rejects_malformed() {
        assert!(Varcode::parse("X12101").is_err());
        assert!(Varcode::parse("B1210").is_err());
        assert!(Varcode::parse("B1210A").is_err());
    }
}
