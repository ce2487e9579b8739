//! `Var`: a `Varinfo` paired with an optional value and an attribute chain.
//!
//! Grounded on `examples/original_source/wreport/var.h`/`var.cc` for the
//! value/attribute shape, with the Rust encoding following the teacher's
//! `bitcode::Record`/`Payload` split between scalar and payload data.

use crate::error::{Error, Result};
use crate::varcode::Varcode;
use crate::varinfo::Varinfo;
use serde::Serialize;
use std::sync::Arc;

/// The value a `Var` can hold. Numeric values (both `Integer` and
/// `Decimal` Varinfos) are stored pre-encoded as the scaled integer, per
/// §3 ("a pairing of Varinfo with ... signed decimal encoded as int").
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Int(i32),
    Binary(Vec<u8>),
}

/// A decoded or to-be-encoded variable, with an ordered attribute chain.
///
/// Attributes are themselves `Var`s, addressed by Varcode; a parent carries
/// at most one attribute per Varcode (`seta` replaces by code).
#[derive(Debug, Clone, Serialize)]
pub struct Var {
    pub info: Arc<Varinfo>,
    value: Option<Value>,
    attrs: Vec<Var>,
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.info.code == other.info.code && self.value == other.value && self.attrs == other.attrs
    }
}

impl Var {
    #[must_use]
    pub fn new_unset(info: Arc<Varinfo>) -> Self {
        Var { info, value: None, attrs: Vec::new() }
    }

    #[must_use]
    pub fn new_binary(info: Arc<Varinfo>, bytes: Vec<u8>) -> Self {
        Var { info, value: Some(Value::Binary(bytes)), attrs: Vec::new() }
    }

    #[must_use]
    pub fn new_int(info: Arc<Varinfo>, raw: i32) -> Self {
        Var { info, value: Some(Value::Int(raw)), attrs: Vec::new() }
    }

    /// Set from a real value, encoding through the Varinfo's decimal scale.
    pub fn new_decimal(info: Arc<Varinfo>, value: f64) -> Self {
        let raw = info.encode_decimal(value);
        Var { info, value: Some(Value::Int(raw)), attrs: Vec::new() }
    }

    #[must_use]
    pub fn code(&self) -> Varcode {
        self.info.code
    }

    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.value.is_none()
    }

    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn enqi(&self) -> Option<i32> {
        match &self.value {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn enqd(&self) -> Option<f64> {
        self.enqi().map(|raw| self.info.decode_decimal(raw))
    }

    pub fn enqc(&self) -> Option<&[u8]> {
        match &self.value {
            Some(Value::Binary(b)) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn set_int(&mut self, raw: i32) -> Result<()> {
        if raw < self.info.imin || raw > self.info.imax {
            return Err(Error::Domain(format!(
                "{}: {raw} is outside [{}, {}]",
                self.info.code, self.info.imin, self.info.imax
            )));
        }
        self.value = Some(Value::Int(raw));
        Ok(())
    }

    pub fn set_decimal(&mut self, value: f64) -> Result<()> {
        self.set_int(self.info.encode_decimal(value))
    }

    pub fn set_binary(&mut self, bytes: Vec<u8>) {
        self.value = Some(Value::Binary(bytes));
    }

    pub fn unset(&mut self) {
        self.value = None;
    }

    /// Insert or replace an attribute by its Varcode.
    pub fn seta(&mut self, attr: Var) {
        if let Some(existing) = self.attrs.iter_mut().find(|a| a.code() == attr.code()) {
            *existing = attr;
        } else {
            self.attrs.push(attr);
        }
    }

    #[must_use]
    pub fn enqa(&self, code: Varcode) -> Option<&Var> {
        self.attrs.iter().find(|a| a.code() == code)
    }

    #[must_use]
    pub fn attrs(&self) -> &[Var] {
        &self.attrs
    }
}
