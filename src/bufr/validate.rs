//! Validator targets: walk the same DDS as encode, but only check that
//! the `Var`s already sitting in a `Subset` fit their `Varinfo` domain —
//! no bits are read or written (§4.5's third target).

use crate::bitmap::{self, BitmapHistory};
use crate::error::{Error, Result};
use crate::interpreter::target::{AssociatedFieldSignificance, InterpreterTarget};
use crate::subset::Subset;
use crate::var::Var;
use crate::varcode::Varcode;
use crate::varinfo::{Varinfo, Vartype};
use std::collections::VecDeque;
use std::sync::Arc;

const SIGNIFICANCE_CODE: Varcode = Varcode::new(0, 31, 21);

fn validate_one(info: &Arc<Varinfo>, var: &Var) -> Result<()> {
    match info.vartype {
        Vartype::String | Vartype::Binary => {
            if let Some(bytes) = var.enqc() {
                let max_bytes = info.bit_len.div_ceil(8) as usize;
                if bytes.len() > max_bytes {
                    return Err(Error::Domain(format!(
                        "{}: value is {} bytes wide, but the descriptor only declares {max_bytes}",
                        info.code,
                        bytes.len()
                    )));
                }
            }
        }
        Vartype::Integer | Vartype::Decimal => {
            if let Some(v) = var.enqi() {
                if v < info.imin || v > info.imax {
                    return Err(Error::Domain(format!(
                        "{}: value {v} is outside [{}, {}]",
                        info.code, info.imin, info.imax
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Validator for one subset: same cursor-driven walk as
/// [`crate::bufr::encode::UncompressedEncodeTarget`], minus the bit
/// writes.
pub struct UncompressedValidateTarget<'a> {
    subset: &'a Subset,
    cursor: usize,
    history: BitmapHistory,
    pending_bitmap_targets: VecDeque<usize>,
    last_significance: Option<u8>,
}

impl<'a> UncompressedValidateTarget<'a> {
    pub fn new(subset: &'a Subset) -> Self {
        UncompressedValidateTarget {
            subset,
            cursor: 0,
            history: BitmapHistory::new(),
            pending_bitmap_targets: VecDeque::new(),
            last_significance: None,
        }
    }

    fn next_var(&mut self) -> Result<&'a Var> {
        let var = self
            .subset
            .get(self.cursor)
            .ok_or_else(|| Error::Consistency(format!("subset exhausted at position {}", self.cursor)))?;
        self.cursor += 1;
        Ok(var)
    }
}

impl InterpreterTarget for UncompressedValidateTarget<'_> {
    fn define_variable(&mut self, info: Arc<Varinfo>) -> Result<()> {
        if let Some(idx) = self.pending_bitmap_targets.pop_front() {
            if let Some(attr) = self.subset.get(idx).and_then(|v| v.enqa(info.code)) {
                validate_one(&info, attr)?;
            }
            return Ok(());
        }

        let var = self.next_var()?;
        if info.code == SIGNIFICANCE_CODE {
            if let Some(v) = var.enqi() {
                self.last_significance = Some(v as u8);
            }
        }
        validate_one(&info, var)
    }

    fn define_associated_field(&mut self, width: u32, _significance: Option<AssociatedFieldSignificance>) -> Result<()> {
        if self.last_significance.is_none() {
            return Err(Error::Consistency("C04 associated field validated with no B31021 significance in scope".to_string()));
        }
        if width == 0 {
            return Err(Error::Consistency("C04 associated field declared with zero width".to_string()));
        }
        Ok(())
    }

    fn define_bitmap(&mut self, info: Arc<Varinfo>, size: usize) -> Result<()> {
        let indices = bitmap::resolve_indices(self.subset, self.cursor, size)?;
        let var = self.next_var()?;
        let bits = var.enqc().ok_or_else(|| Error::Type(format!("{}: bitmap variable carries no value", info.code)))?;
        if bits.len() != size {
            return Err(Error::Consistency(format!("{}: bitmap declares {size} entries but carries {}", info.code, bits.len())));
        }
        let marked: Vec<usize> = indices.iter().zip(bits.iter()).filter(|(_, &b)| b == b'+').map(|(&i, _)| i).collect();
        self.history.define(marked.clone());
        self.pending_bitmap_targets = marked.into();
        Ok(())
    }

    fn reuse_last_bitmap(&mut self) -> Result<()> {
        let indices = self.history.reuse()?.to_vec();
        self.pending_bitmap_targets = indices.into();
        Ok(())
    }

    fn define_raw_characters(&mut self, n_chars: u32) -> Result<()> {
        let raw_info = Arc::new(Varinfo::set_string(Varcode::new(0, 0, 0), "RAW CHARACTER DATA", n_chars)?);
        let var = self.next_var()?;
        validate_one(&raw_info, var)
    }

    fn delayed_replication_count(&mut self, info: Arc<Varinfo>) -> Result<u32> {
        let var = self.next_var()?;
        let count = var
            .enqi()
            .ok_or_else(|| Error::Consistency(format!("{}: delayed replication factor is unset", info.code)))?;
        validate_one(&info, var)?;
        Ok(count as u32)
    }
}

/// Validator for a compressed bulletin: every subset's column is checked
/// against the same `Varinfo`, independent of the diff-width bookkeeping
/// that only matters for the wire encoding.
pub struct CompressedValidateTarget<'a> {
    subsets: &'a [Subset],
    cursor: usize,
    last_significance: Option<u8>,
}

impl<'a> CompressedValidateTarget<'a> {
    pub fn new(subsets: &'a [Subset]) -> Self {
        CompressedValidateTarget { subsets, cursor: 0, last_significance: None }
    }
}

impl InterpreterTarget for CompressedValidateTarget<'_> {
    fn define_variable(&mut self, info: Arc<Varinfo>) -> Result<()> {
        for (i, subset) in self.subsets.iter().enumerate() {
            let var = subset
                .get(self.cursor)
                .ok_or_else(|| Error::Consistency(format!("{}: subset {i} exhausted at position {}", info.code, self.cursor)))?;
            if info.code == SIGNIFICANCE_CODE && i == 0 {
                if let Some(v) = var.enqi() {
                    self.last_significance = Some(v as u8);
                }
            }
            validate_one(&info, var)?;
        }
        self.cursor += 1;
        Ok(())
    }

    fn define_associated_field(&mut self, width: u32, _significance: Option<AssociatedFieldSignificance>) -> Result<()> {
        if self.last_significance.is_none() {
            return Err(Error::Consistency("C04 associated field validated with no B31021 significance in scope".to_string()));
        }
        if width == 0 {
            return Err(Error::Consistency("C04 associated field declared with zero width".to_string()));
        }
        Ok(())
    }

    fn define_bitmap(&mut self, info: Arc<Varinfo>, size: usize) -> Result<()> {
        for (i, subset) in self.subsets.iter().enumerate() {
            let var = subset
                .get(self.cursor)
                .ok_or_else(|| Error::Consistency(format!("{}: subset {i} exhausted at position {}", info.code, self.cursor)))?;
            let bits = var.enqc().ok_or_else(|| Error::Type(format!("{}: bitmap variable carries no value", info.code)))?;
            if bits.len() != size {
                return Err(Error::Consistency(format!("{}: bitmap declares {size} entries but carries {}", info.code, bits.len())));
            }
        }
        self.cursor += 1;
        Ok(())
    }

    fn reuse_last_bitmap(&mut self) -> Result<()> {
        Err(Error::Unimplemented("bitmap reuse under compression is not supported".to_string()))
    }

    fn define_raw_characters(&mut self, n_chars: u32) -> Result<()> {
        let raw_info = Arc::new(Varinfo::set_string(Varcode::new(0, 0, 0), "RAW CHARACTER DATA", n_chars)?);
        self.define_variable(raw_info)
    }

    fn delayed_replication_count(&mut self, info: Arc<Varinfo>) -> Result<u32> {
        let first = self.subsets[0]
            .get(self.cursor)
            .and_then(Var::enqi)
            .ok_or_else(|| Error::Consistency(format!("{}: delayed replication factor is unset", info.code)))?;
        for subset in self.subsets {
            let value = subset.get(self.cursor).and_then(Var::enqi);
            if value != Some(first) {
                return Err(Error::Consistency(format!(
                    "{}: delayed replication factor differs across compressed subsets",
                    info.code
                )));
            }
        }
        self.define_variable(info)?;
        Ok(first as u32)
    }
}
