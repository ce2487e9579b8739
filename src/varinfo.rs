//! Per-variable metadata (`Varinfo`) and its pure encode/decode functions.
//!
//! Ground truth for the numeric ranges and rounding rules is
//! `examples/original_source/wreport/varinfo.cc`; the struct shape matches
//! §3 of the specification.

use crate::error::{Error, Result};
use crate::varcode::Varcode;
use serde::Serialize;

/// The four value domains a `Varinfo` can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Vartype {
    Integer,
    Decimal,
    String,
    Binary,
}

/// Immutable descriptor metadata for an `F=0` Varcode.
///
/// Base entries are created once per table load. Alterations (§4.1) are
/// themselves immutable `Varinfo` values, distinguished only by their
/// `(scale, bit_len, bit_ref)` triple and cached by the owning `Vartable`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Varinfo {
    pub code: Varcode,
    pub vartype: Vartype,
    pub desc: String,
    pub unit: String,
    pub scale: i32,
    /// Width in decimal digits (CREX encoding).
    pub len: u32,
    /// Binary reference value (BUFR encoding).
    pub bit_ref: i32,
    /// Width in bits (BUFR encoding); 0 when unknown (CREX-only entries).
    pub bit_len: u32,
    pub imin: i32,
    pub imax: i32,
    pub dmin: f64,
    pub dmax: f64,
}

fn intexp10(x: u32) -> Result<i64> {
    // 10^x must fit a signed 32-bit integer per the Varinfo invariants.
    if x > 9 {
        return Err(Error::Domain(format!("10^{x} would not fit in 32 bits")));
    }
    Ok(10i64.pow(x))
}

fn count_digits(val: u32) -> u32 {
    if val == 0 {
        1
    } else {
        val.ilog10() + 1
    }
}

/// Round half-away-from-zero, matching the BUFR/CREX encoding convention.
#[must_use]
pub fn round_half_away_from_zero(value: f64) -> f64 {
    if value >= 0.0 {
        (value + 0.5).floor()
    } else {
        (value - 0.5).ceil()
    }
}

impl Varinfo {
    fn classify(unit: &str, scale: i32) -> Vartype {
        if unit == "CCITTIA5" || unit == "CHARACTER" {
            Vartype::String
        } else if scale == 0 {
            Vartype::Integer
        } else {
            Vartype::Decimal
        }
    }

    /// Build a BUFR-style entry: `desc` ≤ 63 chars, `unit` ≤ 23 chars
    /// (truncated, matching the fixed-width table source). `len` (decimal
    /// digit width) is derived from `bit_len`, mirroring
    /// `wreport::varinfo::set_bufr`.
    pub fn set_bufr(
        code: Varcode,
        desc: &str,
        unit: &str,
        scale: i32,
        bit_ref: i32,
        bit_len: u32,
    ) -> Result<Self> {
        if bit_len > 31 {
            return Err(Error::Domain(format!(
                "{code}: bit_len {bit_len} exceeds 31 bits"
            )));
        }
        let mut info = Varinfo {
            code,
            vartype: Self::classify(unit, scale),
            desc: truncate(desc, 63),
            unit: truncate(unit, 23),
            scale,
            len: 0,
            bit_ref,
            bit_len,
            imin: 0,
            imax: 0,
            dmin: 0.0,
            dmax: 0.0,
        };

        if matches!(info.vartype, Vartype::String | Vartype::Binary) {
            info.len = bit_len.div_ceil(8);
            return Ok(info);
        }

        info.imin = bit_ref;
        let mut maxval: u32 = if bit_len == 31 { 0x7fff_ffff } else { (1u32 << bit_len) - 1 };
        if code.x() != 31 {
            maxval -= 1;
        }

        if bit_len == 31 && bit_ref > 0 {
            return Err(Error::Consistency(format!(
                "{code}: scaled value does not fit in a signed 32-bit integer \
                 ({bit_len} bits with a base value of {bit_ref})"
            )));
        }

        if bit_ref == 0 {
            info.imax = maxval as i32;
            info.len = if bit_len == 1 { 1 } else { count_digits(maxval) };
        } else if bit_ref < 0 {
            info.imax = maxval as i32 + bit_ref;
            info.len = count_digits((-bit_ref) as u32).max(count_digits(info.imax.unsigned_abs()));
        } else {
            if (0x7fff_fffe_u32 - maxval) < bit_ref as u32 {
                return Err(Error::Consistency(format!(
                    "{code}: scaled value does not fit in a signed 32-bit integer \
                     ({bit_len} bits with a base value of {bit_ref})"
                )));
            }
            info.imax = maxval as i32 + bit_ref;
            info.len = count_digits(bit_ref as u32).max(count_digits(info.imax as u32));
        }

        info.dmin = info.decode_decimal(info.imin);
        info.dmax = info.decode_decimal(info.imax);
        Ok(info)
    }

    /// Build a CREX-style entry (no binary encoding parameters).
    pub fn set_crex(code: Varcode, desc: &str, unit: &str, scale: i32, len: u32) -> Result<Self> {
        let mut info = Varinfo {
            code,
            vartype: Self::classify(unit, scale),
            desc: truncate(desc, 63),
            unit: truncate(unit, 23),
            scale,
            len,
            bit_ref: 0,
            bit_len: 0,
            imin: 0,
            imax: 0,
            dmin: 0.0,
            dmax: 0.0,
        };
        match info.vartype {
            Vartype::String | Vartype::Binary => {}
            Vartype::Integer | Vartype::Decimal => {
                if len >= 10 {
                    info.imin = i32::MIN;
                    info.imax = i32::MAX;
                } else {
                    let span = intexp10(len)?;
                    info.imin = -(span - 1) as i32;
                    info.imax = (span - 2) as i32;
                }
                info.dmin = info.decode_decimal(info.imin);
                info.dmax = info.decode_decimal(info.imax);
            }
        }
        Ok(info)
    }

    pub fn set_string(code: Varcode, desc: &str, len: u32) -> Result<Self> {
        Ok(Varinfo {
            code,
            vartype: Vartype::String,
            desc: truncate(desc, 63),
            unit: "CCITTIA5".to_string(),
            scale: 0,
            len,
            bit_ref: 0,
            bit_len: len * 8,
            imin: 0,
            imax: 0,
            dmin: 0.0,
            dmax: 0.0,
        })
    }

    pub fn set_binary(code: Varcode, desc: &str, bit_len: u32) -> Result<Self> {
        Ok(Varinfo {
            code,
            vartype: Vartype::Binary,
            desc: truncate(desc, 63),
            unit: "UNKNOWN".to_string(),
            scale: 0,
            len: bit_len.div_ceil(8),
            bit_ref: 0,
            bit_len,
            imin: 0,
            imax: 0,
            dmin: 0.0,
            dmax: 0.0,
        })
    }

    /// Used by the alteration chain (§4.1): rebuild this entry's range with
    /// a new `(scale, bit_len, bit_ref)` triple, keeping desc/unit/code.
    pub fn with_altered_encoding(&self, scale: i32, bit_len: u32, bit_ref: i32) -> Result<Self> {
        Varinfo::set_bufr(self.code, &self.desc, &self.unit, scale, bit_ref, bit_len)
    }

    fn scale_factor(&self) -> f64 {
        10f64.powi(self.scale)
    }

    /// Multiply by `10^scale` and round half-away-from-zero.
    #[must_use]
    pub fn encode_decimal(&self, value: f64) -> i32 {
        round_half_away_from_zero(value * self.scale_factor()) as i32
    }

    /// Divide by `10^scale`.
    #[must_use]
    pub fn decode_decimal(&self, value: i32) -> f64 {
        value as f64 / self.scale_factor()
    }

    /// Snap `value` to the precision representable at this Varinfo's scale.
    #[must_use]
    pub fn round_decimal(&self, value: f64) -> f64 {
        self.decode_decimal(self.encode_decimal(value))
    }

    /// `encode_decimal` plus the binary reference shift; fails `Domain` if
    /// the encoded value would be negative or would not fit `bit_len` bits.
    pub fn encode_binary(&self, value: f64) -> Result<u32> {
        let encoded = self.encode_decimal(value) as i64 - self.bit_ref as i64;
        if encoded < 0 {
            return Err(Error::Domain(format!(
                "{}: value {value} encodes below the binary reference",
                self.code
            )));
        }
        if self.bit_len < 32 && encoded >= (1i64 << self.bit_len) {
            return Err(Error::Domain(format!(
                "{}: value {value} does not fit in {} bits",
                self.code, self.bit_len
            )));
        }
        Ok(encoded as u32)
    }

    #[must_use]
    pub fn decode_binary(&self, value: u32) -> f64 {
        self.decode_decimal(value as i32 + self.bit_ref)
    }

    /// The integer pattern that denotes "missing" for this Varinfo's
    /// `bit_len`, unless this code is a delayed-replication factor.
    #[must_use]
    pub fn missing_pattern(&self) -> u32 {
        if self.bit_len == 0 || self.bit_len >= 32 {
            u32::MAX
        } else {
            (1u32 << self.bit_len) - 1
        }
    }

    #[must_use]
    pub fn is_missing(&self, raw: u32) -> bool {
        !self.code.is_delayed_replication_factor() && raw == self.missing_pattern()
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    let trimmed = s.trim_end();
    trimmed.chars().take(max_chars).collect()
}
