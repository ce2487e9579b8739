//! Concrete encode targets, symmetric with [`crate::bufr::decode`]: the
//! same interpreter walk, but each target pulls already-populated `Var`s
//! out of a `Subset` (or subsets, under compression) and writes their
//! bits instead of reading them.

use crate::bitmap::{self, Attachment, BitmapHistory};
use crate::bits::BitWriter;
use crate::error::{Error, Result};
use crate::interpreter::target::{AssociatedFieldSignificance, InterpreterTarget};
use crate::subset::Subset;
use crate::var::Var;
use crate::varcode::Varcode;
use crate::varinfo::{Varinfo, Vartype};
use std::collections::VecDeque;
use std::sync::Arc;

const SIGNIFICANCE_CODE: Varcode = Varcode::new(0, 31, 21);

fn encode_one(writer: &mut BitWriter, info: &Arc<Varinfo>, var: &Var) -> Result<()> {
    match info.vartype {
        Vartype::String | Vartype::Binary => {
            writer.encode_string(var.enqc(), info.bit_len)?;
        }
        Vartype::Integer | Vartype::Decimal => {
            let raw = match var.enqi() {
                Some(v) => Some((v - info.bit_ref) as u32),
                None => None,
            };
            writer.encode_number(raw, info.bit_len)?;
        }
    }
    Ok(())
}

/// Encode target for one uncompressed subset: walks `subset` in lock
/// step with the DDS, consuming one `Var` per `define_variable` call
/// except where a bitmap redirects consumption to an attribute lookup.
pub struct UncompressedEncodeTarget<'a> {
    writer: &'a mut BitWriter,
    subset: &'a Subset,
    cursor: usize,
    history: BitmapHistory,
    pending_bitmap_targets: VecDeque<usize>,
    last_significance: Option<u8>,
}

impl<'a> UncompressedEncodeTarget<'a> {
    pub fn new(writer: &'a mut BitWriter, subset: &'a Subset) -> Self {
        UncompressedEncodeTarget {
            writer,
            subset,
            cursor: 0,
            history: BitmapHistory::new(),
            pending_bitmap_targets: VecDeque::new(),
            last_significance: None,
        }
    }

    fn next_var(&mut self) -> Result<&Var> {
        let var = self
            .subset
            .get(self.cursor)
            .ok_or_else(|| Error::Consistency(format!("subset exhausted at position {}", self.cursor)))?;
        self.cursor += 1;
        Ok(var)
    }
}

impl InterpreterTarget for UncompressedEncodeTarget<'_> {
    fn define_variable(&mut self, info: Arc<Varinfo>) -> Result<()> {
        if let Some(idx) = self.pending_bitmap_targets.pop_front() {
            let missing_attr = Var::new_unset(info.clone());
            let attr_var = self
                .subset
                .get(idx)
                .and_then(|v| v.enqa(info.code))
                .unwrap_or(&missing_attr);
            encode_one(self.writer, &info, attr_var)?;
            return Ok(());
        }

        let var = self.next_var()?.clone();
        if info.code == SIGNIFICANCE_CODE {
            if let Some(v) = var.enqi() {
                self.last_significance = Some(v as u8);
            }
        }
        encode_one(self.writer, &info, &var)
    }

    fn define_associated_field(&mut self, width: u32, _significance: Option<AssociatedFieldSignificance>) -> Result<()> {
        let significance = self
            .last_significance
            .ok_or_else(|| Error::Consistency("C04 associated field encoded with no B31021 significance in scope".to_string()))?;
        let missing = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
        let raw = match bitmap::dispatch_significance(significance)? {
            Attachment::None => missing,
            Attachment::Attribute(code) => {
                let upcoming = self
                    .subset
                    .get(self.cursor)
                    .ok_or_else(|| Error::Consistency("associated field has no following element".to_string()))?;
                match upcoming.enqa(code).and_then(|a| a.enqi()) {
                    Some(v) => v as u32,
                    None => missing,
                }
            }
        };
        self.writer.put_bits(raw, width)?;
        Ok(())
    }

    fn define_bitmap(&mut self, info: Arc<Varinfo>, size: usize) -> Result<()> {
        let indices = bitmap::resolve_indices(self.subset, self.cursor, size)?;
        let var = self.next_var()?.clone();
        let bits = var
            .enqc()
            .ok_or_else(|| Error::Type(format!("{}: bitmap variable carries no value", info.code)))?
            .to_vec();
        self.writer.encode_bitmap(&bits)?;
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
        let var = self.next_var()?.clone();
        encode_one(self.writer, &raw_info, &var)
    }

    fn delayed_replication_count(&mut self, info: Arc<Varinfo>) -> Result<u32> {
        let var = self.next_var()?.clone();
        let count = var
            .enqi()
            .ok_or_else(|| Error::Consistency(format!("{}: delayed replication factor is unset", info.code)))?;
        encode_one(self.writer, &info, &var)?;
        Ok(count as u32)
    }
}

/// Encode target for a compressed bulletin: mirrors
/// [`crate::bufr::decode::CompressedDecodeTarget`], writing a shared
/// base plus per-subset diffs for every element.
pub struct CompressedEncodeTarget<'a> {
    writer: &'a mut BitWriter,
    subsets: &'a [Subset],
    cursor: usize,
    last_significance: Option<u8>,
}

impl<'a> CompressedEncodeTarget<'a> {
    pub fn new(writer: &'a mut BitWriter, subsets: &'a [Subset]) -> Self {
        CompressedEncodeTarget { writer, subsets, cursor: 0, last_significance: None }
    }

    fn column(&self, info: &Arc<Varinfo>) -> Result<Vec<Option<i32>>> {
        self.subsets
            .iter()
            .map(|s| {
                s.get(self.cursor)
                    .map(Var::enqi)
                    .ok_or_else(|| Error::Consistency(format!("{}: subset exhausted at position {}", info.code, self.cursor)))
            })
            .collect()
    }

    fn write_compressed_number(&mut self, info: &Arc<Varinfo>, values: &[Option<i32>]) -> Result<()> {
        if values.is_empty() {
            return Err(Error::Consistency("no subsets to encode".to_string()));
        }
        let min_raw = values
            .iter()
            .flatten()
            .map(|v| (*v - info.bit_ref) as u32)
            .min();
        let any_missing = values.iter().any(Option::is_none);
        let all_equal = values.iter().all(|v| *v == values[0]);

        if all_equal && !any_missing {
            let raw = min_raw.unwrap_or_else(|| if info.bit_len >= 32 { u32::MAX } else { (1u32 << info.bit_len) - 1 });
            self.writer.put_bits(raw, info.bit_len)?;
            self.writer.put_bits(0, 6)?;
            return Ok(());
        }
        if all_equal && any_missing {
            let missing = if info.bit_len >= 32 { u32::MAX } else { (1u32 << info.bit_len) - 1 };
            self.writer.put_bits(missing, info.bit_len)?;
            self.writer.put_bits(0, 6)?;
            return Ok(());
        }

        let base = min_raw.ok_or_else(|| Error::Consistency(format!("{}: compressed column is entirely missing", info.code)))?;
        self.writer.put_bits(base, info.bit_len)?;
        let max_diff = values
            .iter()
            .flatten()
            .map(|v| (*v - info.bit_ref) as u32 - base)
            .max()
            .unwrap_or(0);
        // Bits needed for max_diff, plus one extra when a missing-value
        // sentinel (all-ones at this width) must stay distinct from it.
        let mut diff_width = 32 - (max_diff + 1).leading_zeros().min(32);
        if any_missing {
            diff_width += 1;
        }
        self.writer.put_bits(diff_width, 6)?;
        let diff_missing = if diff_width >= 32 { u32::MAX } else { (1u32 << diff_width) - 1 };
        for value in values {
            match value {
                Some(v) => self.writer.put_bits((*v - info.bit_ref) as u32 - base, diff_width)?,
                None => self.writer.put_bits(diff_missing, diff_width)?,
            }
        }
        Ok(())
    }
}

impl InterpreterTarget for CompressedEncodeTarget<'_> {
    fn define_variable(&mut self, info: Arc<Varinfo>) -> Result<()> {
        match info.vartype {
            Vartype::String | Vartype::Binary => {
                let values: Vec<Option<&[u8]>> = self
                    .subsets
                    .iter()
                    .map(|s| s.get(self.cursor).and_then(Var::enqc))
                    .collect();
                let all_equal = values.windows(2).all(|w| w[0] == w[1]);
                if all_equal {
                    self.writer.encode_string(values.first().copied().flatten(), info.bit_len)?;
                    self.writer.put_bits(0, 6)?;
                } else {
                    self.writer.encode_string(Some(&[]), info.bit_len)?;
                    let diff_bytes = values.iter().flatten().map(|b| b.len()).max().unwrap_or(0) as u32;
                    self.writer.put_bits(diff_bytes, 6)?;
                    for value in &values {
                        self.writer.encode_string(*value, diff_bytes * 8)?;
                    }
                }
            }
            Vartype::Integer | Vartype::Decimal => {
                let values = self.column(&info)?;
                if info.code == SIGNIFICANCE_CODE {
                    if let Some(Some(v)) = values.first() {
                        self.last_significance = Some(*v as u8);
                    }
                }
                self.write_compressed_number(&info, &values)?;
            }
        }
        self.cursor += 1;
        Ok(())
    }

    fn define_associated_field(&mut self, width: u32, _significance: Option<AssociatedFieldSignificance>) -> Result<()> {
        let significance = self
            .last_significance
            .ok_or_else(|| Error::Consistency("C04 associated field encoded with no B31021 significance in scope".to_string()))?;
        let missing = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
        let values: Vec<u32> = match bitmap::dispatch_significance(significance)? {
            Attachment::None => vec![missing; self.subsets.len()],
            Attachment::Attribute(code) => self
                .subsets
                .iter()
                .map(|s| {
                    s.get(self.cursor)
                        .and_then(|v| v.enqa(code))
                        .and_then(Var::enqi)
                        .map_or(missing, |v| v as u32)
                })
                .collect(),
        };
        let all_equal = values.windows(2).all(|w| w[0] == w[1]);
        if all_equal {
            self.writer.put_bits(values.first().copied().unwrap_or(missing), width)?;
            self.writer.put_bits(0, 6)?;
        } else {
            let base = *values.iter().min().unwrap();
            self.writer.put_bits(base, width)?;
            let max_diff = values.iter().map(|v| v - base).max().unwrap_or(0);
            let diff_width = 32 - (max_diff + 1).leading_zeros().min(32);
            self.writer.put_bits(diff_width, 6)?;
            for v in values {
                self.writer.put_bits(v - base, diff_width)?;
            }
        }
        Ok(())
    }

    fn define_bitmap(&mut self, info: Arc<Varinfo>, size: usize) -> Result<()> {
        let first_subset = self.subsets.first().ok_or_else(|| Error::Consistency("no subsets to encode".to_string()))?;
        let var = first_subset
            .get(self.cursor)
            .ok_or_else(|| Error::Consistency(format!("{}: subset exhausted at position {}", info.code, self.cursor)))?;
        let bits = var
            .enqc()
            .ok_or_else(|| Error::Type(format!("{}: bitmap variable carries no value", info.code)))?
            .to_vec();
        if bits.len() != size {
            return Err(Error::Consistency(format!(
                "{}: bitmap variable carries {} bits, expected {size}",
                info.code,
                bits.len()
            )));
        }
        for &b in &bits {
            self.writer.put_bits(if b == b'+' { 0 } else { 1 }, 1)?;
            self.writer.put_bits(0, 6)?;
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
        let values = self.column(&info)?;
        let first = values[0].ok_or_else(|| Error::Consistency(format!("{}: delayed replication factor is unset", info.code)))?;
        if values.iter().any(|v| *v != Some(first)) {
            return Err(Error::Consistency(format!(
                "{}: delayed replication factor differs across compressed subsets",
                info.code
            )));
        }
        self.write_compressed_number(&info, &values)?;
        self.cursor += 1;
        Ok(first as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitReader;
    use crate::table::Vartable;

    fn table_with(entries: &[(Varcode, &str, &str, i32, i32, u32)]) -> Vartable {
        let mut content = String::new();
        for (code, desc, unit, scale, bit_ref, bit_len) in entries {
            let mut bytes = vec![b' '; 119];
            let fxy = format!("{:01}{:02}{:03}", code.f() as u8, code.x(), code.y());
            bytes[2..8].copy_from_slice(fxy.as_bytes());
            bytes[8..72].copy_from_slice(format!("{desc:<64}").as_bytes());
            bytes[73..97].copy_from_slice(format!("{unit:<24}").as_bytes());
            bytes[98..102].copy_from_slice(format!("{scale:>4}").as_bytes());
            bytes[102..115].copy_from_slice(format!("{bit_ref:>13}").as_bytes());
            bytes[115..119].copy_from_slice(format!("{bit_len:>4}").as_bytes());
            content.push_str(&String::from_utf8(bytes).unwrap());
            content.push('\n');
        }
        Vartable::parse_bufr("test.txt", &content).unwrap()
    }

    #[test]
    fn encodes_and_decodes_a_simple_integer_round_trip() {
        let vartable = table_with(&[(Varcode::new(0, 1, 1), "A", "M", 0, 0, 8)]);
        let info = vartable.query(Varcode::new(0, 1, 1)).unwrap();
        let mut subset = Subset::new();
        subset.store_int(info.clone(), 42).unwrap();

        let mut writer = BitWriter::new();
        let mut target = UncompressedEncodeTarget::new(&mut writer, &subset);
        target.define_variable(info.clone()).unwrap();
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.decode_number(8, false).unwrap(), Some(42));
    }

    #[test]
    fn compressed_shared_value_writes_zero_diff_width() {
        let vartable = table_with(&[(Varcode::new(0, 1, 1), "A", "M", 0, 0, 8)]);
        let info = vartable.query(Varcode::new(0, 1, 1)).unwrap();
        let mut s1 = Subset::new();
        s1.store_int(info.clone(), 7).unwrap();
        let mut s2 = Subset::new();
        s2.store_int(info.clone(), 7).unwrap();
        let subsets = vec![s1, s2];

        let mut writer = BitWriter::new();
        let mut target = CompressedEncodeTarget::new(&mut writer, &subsets);
        target.define_variable(info).unwrap();
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.get_bits(8).unwrap(), 7);
        assert_eq!(reader.get_bits(6).unwrap(), 0);
    }
}
