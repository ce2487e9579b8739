//! The descriptor interpreter (§4.5): walks a DDS opcode stream, keeping
//! modifier state and expanding replications and sequences in place, and
//! emits a stream of `InterpreterTarget` callbacks.
//!
//! Grounded on the teacher's `read::BlockIter`/`BitStreamReader` pairing
//! (`examples/messense-llvm-bitcode-rs/src/read.rs`): a cursor over a flat
//! opcode stream that recurses into sub-blocks (there, LLVM blocks; here,
//! `D`-sequence expansions and `R`-replication bodies), carrying a stack of
//! save/restore state across the recursion.

pub mod target;

use crate::error::{Error, Result};
use crate::table::{Dtable, Vartable};
use crate::varcode::Varcode;
use crate::varinfo::Varinfo;
use std::sync::Arc;
use target::{AssociatedFieldSignificance, InterpreterTarget};

/// The element carrying the data-present bitmap entries themselves, by
/// long-standing BUFR convention (§4.7 names the mechanism but not this
/// descriptor; pinned here as an Open Question decision, see DESIGN.md).
const BITMAP_ENTRY: Varcode = Varcode::new(0, 31, 31);

/// Sentinel `yyy` meaning "reuse the last-defined bitmap" for the
/// `C23`/`C24`/`C32`/`C37` family.
const REUSE_LAST_BITMAP: u8 = 255;

/// §4.5's named interpreter states. `Running` and `Done` are the only
/// states visible across `run()` calls; the rest are local to one
/// replication/bitmap step and never escape it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    InsideReplication,
    AwaitingDelayedFactor,
    BitmapPending,
    BitmapActive,
    RawCharData,
    Done,
}

/// Compression-incompatible constructs a DDS may contain, discovered by a
/// single forward scan that expands every `D`-sequence and replication
/// body but invokes no target (§11 "DDSScanFeatures").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DdsFeatures {
    /// Contains a `C05yyy` raw-character-data modifier.
    pub has_raw_character_data: bool,
    /// Contains a `C06yyy` opaque-binary-width modifier.
    pub has_opaque_binary: bool,
}

impl DdsFeatures {
    #[must_use]
    pub fn compression_compatible(&self) -> bool {
        !self.has_raw_character_data && !self.has_opaque_binary
    }
}

/// Modifier overrides in effect for subsequent `F=0` elements (§4.5). A
/// `None` means "no override active"; each is reset to `None` by its
/// `Cxx000` cancelling form.
#[derive(Debug, Clone, Default)]
struct Modifiers {
    width_delta: i32,
    scale_override: Option<i32>,
    reference_override: Option<i32>,
    associated_field_width: Option<u32>,
    associated_field_significance: Option<AssociatedFieldSignificance>,
    opaque_width: Option<u32>,
    scale_widen: Option<(i32, u32, i32)>, // (scale_add, bit_widen, reference_shift)
    string_length_override: Option<u32>,
}

impl Modifiers {
    fn is_identity(&self) -> bool {
        self.width_delta == 0
            && self.scale_override.is_none()
            && self.reference_override.is_none()
            && self.opaque_width.is_none()
            && self.scale_widen.is_none()
            && self.string_length_override.is_none()
    }
}

/// Walks one DDS against one `InterpreterTarget`. Not `Sync`/`Send`-shared:
/// each decode/encode of one bulletin subset owns its own interpreter
/// (§5 "no intra-bulletin parallelism").
pub struct Interpreter<'a> {
    vartable: &'a Vartable,
    dtable: &'a Dtable,
    modifiers: Modifiers,
    /// Saved modifier snapshots, pushed on entry to a nested replication
    /// and popped on exit, per §4.5 "popped at the end of the enclosing
    /// replication".
    saves: Vec<Modifiers>,
    state: State,
}

impl<'a> Interpreter<'a> {
    #[must_use]
    pub fn new(vartable: &'a Vartable, dtable: &'a Dtable) -> Self {
        Interpreter {
            vartable,
            dtable,
            modifiers: Modifiers::default(),
            saves: Vec::new(),
            state: State::Running,
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Resolve `code` to its effective `Varinfo`, applying any active
    /// width/scale/reference overrides through the alteration chain
    /// (§4.1, §4.5).
    fn resolve(&self, code: Varcode) -> Result<Arc<Varinfo>> {
        let base = self.vartable.query(code)?;
        if self.modifiers.is_identity() {
            return Ok(base);
        }
        let mut scale = self.modifiers.scale_override.unwrap_or(base.scale);
        let mut bit_len = (base.bit_len as i32 + self.modifiers.width_delta).max(0) as u32;
        let mut bit_ref = self.modifiers.reference_override.unwrap_or(base.bit_ref);
        if let Some((scale_add, bit_widen, ref_shift)) = self.modifiers.scale_widen {
            scale += scale_add;
            bit_len += bit_widen;
            bit_ref *= 10i32.pow(ref_shift.unsigned_abs());
        }
        if bit_len == base.bit_len && scale == base.scale && bit_ref == base.bit_ref {
            return Ok(base);
        }
        self.vartable.query_altered(code, scale, bit_len, bit_ref)
    }

    /// Run the full DDS (or a D-sequence / replication body) against
    /// `target`, in order.
    pub fn run(&mut self, opcodes: &[Varcode], target: &mut dyn InterpreterTarget) -> Result<()> {
        let mut cursor = 0usize;
        while cursor < opcodes.len() {
            let code = opcodes[cursor];
            cursor += 1;
            match code.f() {
                crate::varcode::F::Element => self.run_element(code, target)?,
                crate::varcode::F::Modifier => self.apply_modifier(code, target)?,
                crate::varcode::F::Sequence => {
                    let expansion = self.dtable.query(code)?.to_vec();
                    self.run(&expansion, target)?;
                }
                crate::varcode::F::Replication => {
                    let x = code.x() as usize;
                    if x == 0 || cursor + x > opcodes.len() {
                        return Err(Error::Consistency(format!(
                            "{code}: replication body of {x} opcodes does not fit in the remaining DDS"
                        )));
                    }
                    let body = &opcodes[cursor..cursor + x];
                    cursor += x;
                    self.run_replication(code, body, target)?;
                }
            }
        }
        if self.saves.is_empty() {
            self.state = State::Done;
        }
        Ok(())
    }

    fn run_element(&mut self, code: Varcode, target: &mut dyn InterpreterTarget) -> Result<()> {
        if self.state == State::BitmapPending && code == BITMAP_ENTRY {
            // A lone B031031 outside a replication body (count 1) is
            // itself a degenerate bitmap of size one.
            let info = self.vartable.query(code)?;
            target.define_bitmap(info, 1)?;
            self.state = State::Running;
            return Ok(());
        }
        let info = self.resolve(code)?;
        if let Some(width) = self.modifiers.associated_field_width {
            target.define_associated_field(width, self.modifiers.associated_field_significance)?;
        }
        target.define_variable(info)
    }

    fn run_replication(&mut self, code: Varcode, body: &[Varcode], target: &mut dyn InterpreterTarget) -> Result<()> {
        if self.state == State::BitmapPending && body == [BITMAP_ENTRY] {
            let info = self.vartable.query(BITMAP_ENTRY)?;
            let count = if code.y() == 0 {
                self.state = State::AwaitingDelayedFactor;
                let factor_code = Varcode::new(0, 31, 1);
                let factor_info = self.vartable.query(factor_code)?;
                target.delayed_replication_count(factor_info)? as usize
            } else {
                code.y() as usize
            };
            target.define_bitmap(info, count)?;
            self.state = State::Running;
            return Ok(());
        }

        self.state = State::InsideReplication;
        let count = if code.y() == 0 {
            self.state = State::AwaitingDelayedFactor;
            let factor_code = Varcode::new(0, 31, 1);
            let factor_info = self.vartable.query(factor_code)?;
            let n = target.delayed_replication_count(factor_info)?;
            self.state = State::InsideReplication;
            n
        } else {
            u32::from(code.y())
        };

        self.saves.push(self.modifiers.clone());
        for _ in 0..count {
            self.run(body, target)?;
        }
        self.modifiers = self.saves.pop().expect("pushed immediately above");
        self.state = if self.saves.is_empty() { State::Running } else { State::InsideReplication };
        Ok(())
    }

    /// Walk `opcodes` (and every `D`-sequence/replication body it reaches)
    /// purely to report compression-incompatible constructs, touching
    /// neither a target nor a bitstream.
    pub fn scan_features(&self, opcodes: &[Varcode]) -> Result<DdsFeatures> {
        let mut features = DdsFeatures::default();
        self.scan_features_into(opcodes, &mut features)?;
        Ok(features)
    }

    fn scan_features_into(&self, opcodes: &[Varcode], features: &mut DdsFeatures) -> Result<()> {
        let mut cursor = 0usize;
        while cursor < opcodes.len() {
            let code = opcodes[cursor];
            cursor += 1;
            match code.f() {
                crate::varcode::F::Element => {}
                crate::varcode::F::Modifier => match code.x() {
                    5 => features.has_raw_character_data = true,
                    6 => features.has_opaque_binary = true,
                    _ => {}
                },
                crate::varcode::F::Sequence => {
                    let expansion = self.dtable.query(code)?.to_vec();
                    self.scan_features_into(&expansion, features)?;
                }
                crate::varcode::F::Replication => {
                    let x = code.x() as usize;
                    if x == 0 || cursor + x > opcodes.len() {
                        return Err(Error::Consistency(format!(
                            "{code}: replication body of {x} opcodes does not fit in the remaining DDS"
                        )));
                    }
                    let body = &opcodes[cursor..cursor + x];
                    cursor += x;
                    self.scan_features_into(body, features)?;
                }
            }
        }
        Ok(())
    }

    fn apply_modifier(&mut self, code: Varcode, target: &mut dyn InterpreterTarget) -> Result<()> {
        let y = code.y();
        match code.x() {
            0 if y == 0 => self.modifiers = Modifiers::default(),
            1 => self.modifiers.width_delta += i32::from(y) - 128,
            2 => self.modifiers.scale_override = if y == 0 { None } else { Some(i32::from(y) - 128) },
            3 => self.modifiers.reference_override = if y == 0 { None } else { Some(i32::from(y)) },
            4 => {
                if y == 0 {
                    self.modifiers.associated_field_width = None;
                    self.modifiers.associated_field_significance = None;
                } else {
                    self.modifiers.associated_field_width = Some(u32::from(y));
                }
            }
            5 => {
                self.state = State::RawCharData;
                target.define_raw_characters(u32::from(y))?;
                self.state = State::Running;
            }
            6 => self.modifiers.opaque_width = if y == 0 { None } else { Some(u32::from(y)) },
            7 => {
                if y == 0 {
                    self.modifiers.scale_widen = None;
                } else {
                    let yi = i32::from(y);
                    let bit_widen = ((10 * yi + 2) / 3).max(0) as u32;
                    self.modifiers.scale_widen = Some((yi, bit_widen, yi));
                }
            }
            8 => self.modifiers.string_length_override = if y == 0 { None } else { Some(u32::from(y)) },
            22 | 23 | 24 | 32 | 37 => {
                if y == REUSE_LAST_BITMAP {
                    target.reuse_last_bitmap()?;
                    self.state = State::Running;
                } else {
                    self.state = State::BitmapPending;
                }
            }
            x => {
                return Err(Error::Unimplemented(format!("modifier {code} (C{x:02}{y:03}) is not supported")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varinfo::Varinfo;
    use std::cell::RefCell;

    /// Build one BUFR table line with each field at its exact byte offset
    /// (§4.2: FXY@2, desc@8, unit@73, scale@98, bit_ref@102, bit_len@115).
    fn bufr_line(code: Varcode, desc: &str, unit: &str, scale: i32, bit_ref: i32, bit_len: u32) -> String {
        let mut bytes = vec![b' '; 119];
        let fxy = format!("{:01}{:02}{:03}", code.f() as u8, code.x(), code.y());
        bytes[2..8].copy_from_slice(fxy.as_bytes());
        bytes[8..72].copy_from_slice(format!("{desc:<64}").as_bytes());
        bytes[73..97].copy_from_slice(format!("{unit:<24}").as_bytes());
        bytes[98..102].copy_from_slice(format!("{scale:>4}").as_bytes());
        bytes[102..115].copy_from_slice(format!("{bit_ref:>13}").as_bytes());
        bytes[115..119].copy_from_slice(format!("{bit_len:>4}").as_bytes());
        String::from_utf8(bytes).unwrap()
    }

    fn table_with(entries: &[(Varcode, &str, &str, i32, i32, u32)]) -> Vartable {
        let mut content = String::new();
        for (code, desc, unit, scale, bit_ref, bit_len) in entries {
            content.push_str(&bufr_line(*code, desc, unit, *scale, *bit_ref, *bit_len));
            content.push('\n');
        }
        Vartable::parse_bufr("test.txt", &content).unwrap()
    }

    struct RecordingTarget {
        defined: RefCell<Vec<Varcode>>,
        bitmaps: RefCell<Vec<usize>>,
        delayed_count: u32,
    }

    impl InterpreterTarget for RecordingTarget {
        fn define_variable(&mut self, info: Arc<Varinfo>) -> Result<()> {
            self.defined.borrow_mut().push(info.code);
            Ok(())
        }
        fn define_associated_field(&mut self, _width: u32, _sig: Option<AssociatedFieldSignificance>) -> Result<()> {
            Ok(())
        }
        fn define_bitmap(&mut self, _info: Arc<Varinfo>, size: usize) -> Result<()> {
            self.bitmaps.borrow_mut().push(size);
            Ok(())
        }
        fn reuse_last_bitmap(&mut self) -> Result<()> {
            Ok(())
        }
        fn define_raw_characters(&mut self, _n_chars: u32) -> Result<()> {
            Ok(())
        }
        fn delayed_replication_count(&mut self, _info: Arc<Varinfo>) -> Result<u32> {
            Ok(self.delayed_count)
        }
    }

    #[test]
    fn replication_repeats_body_in_order() {
        let vartable = table_with(&[
            (Varcode::new(0, 1, 1), "A", "M", 0, 0, 8),
            (Varcode::new(0, 1, 2), "B", "M", 0, 0, 8),
        ]);
        let dtable = Dtable::parse("d.txt", "").unwrap();
        let mut interp = Interpreter::new(&vartable, &dtable);
        let dds = [
            Varcode::new(1, 2, 3), // R: repeat next 2 opcodes, 3 times
            Varcode::new(0, 1, 1),
            Varcode::new(0, 1, 2),
        ];
        let mut target = RecordingTarget { defined: RefCell::new(Vec::new()), bitmaps: RefCell::new(Vec::new()), delayed_count: 0 };
        interp.run(&dds, &mut target).unwrap();
        assert_eq!(target.defined.borrow().len(), 6);
        assert_eq!(interp.state(), State::Done);
    }

    #[test]
    fn delayed_replication_asks_target_for_count() {
        let vartable = table_with(&[
            (Varcode::new(0, 31, 1), "DELAYED REPL FACTOR", "NUMERIC", 0, 0, 8),
            (Varcode::new(0, 1, 1), "A", "M", 0, 0, 8),
        ]);
        let dtable = Dtable::parse("d.txt", "").unwrap();
        let mut interp = Interpreter::new(&vartable, &dtable);
        let dds = [Varcode::new(1, 1, 0), Varcode::new(0, 1, 1)];
        let mut target = RecordingTarget { defined: RefCell::new(Vec::new()), bitmaps: RefCell::new(Vec::new()), delayed_count: 4 };
        interp.run(&dds, &mut target).unwrap();
        assert_eq!(target.defined.borrow().len(), 4);
    }

    #[test]
    fn sequence_expands_d_table_entry_in_place() {
        let vartable = table_with(&[(Varcode::new(0, 1, 1), "A", "M", 0, 0, 8)]);
        let dtable = {
            let mut bytes = vec![b' '; 15];
            bytes[2..8].copy_from_slice(b"302001");
            bytes[9..15].copy_from_slice(b"001001");
            let content = String::from_utf8(bytes).unwrap() + "\n";
            Dtable::parse("d.txt", &content).unwrap()
        };
        let mut interp = Interpreter::new(&vartable, &dtable);
        let dds = [Varcode::new(3, 2, 1)];
        let mut target = RecordingTarget { defined: RefCell::new(Vec::new()), bitmaps: RefCell::new(Vec::new()), delayed_count: 0 };
        interp.run(&dds, &mut target).unwrap();
        assert_eq!(*target.defined.borrow(), vec![Varcode::new(0, 1, 1)]);
    }

    #[test]
    fn width_modifier_alters_resolved_varinfo() {
        let vartable = table_with(&[(Varcode::new(0, 1, 1), "A", "M", 0, 0, 8)]);
        let dtable = Dtable::parse("d.txt", "").unwrap();
        let mut interp = Interpreter::new(&vartable, &dtable);
        let dds = [Varcode::new(2, 1, 132), Varcode::new(0, 1, 1), Varcode::new(2, 1, 0)];
        struct Capturing(RefCell<Option<Arc<Varinfo>>>);
        impl InterpreterTarget for Capturing {
            fn define_variable(&mut self, info: Arc<Varinfo>) -> Result<()> {
                *self.0.borrow_mut() = Some(info);
                Ok(())
            }
            fn define_associated_field(&mut self, _: u32, _: Option<AssociatedFieldSignificance>) -> Result<()> {
                Ok(())
            }
            fn define_bitmap(&mut self, _: Arc<Varinfo>, _: usize) -> Result<()> {
                Ok(())
            }
            fn reuse_last_bitmap(&mut self) -> Result<()> {
                Ok(())
            }
            fn define_raw_characters(&mut self, _: u32) -> Result<()> {
                Ok(())
            }
            fn delayed_replication_count(&mut self, _: Arc<Varinfo>) -> Result<u32> {
                Ok(0)
            }
        }
        let mut target = Capturing(RefCell::new(None));
        interp.run(&dds, &mut target).unwrap();
        let info = target.0.into_inner().unwrap();
        assert_eq!(info.bit_len, 12);
    }

    #[test]
    fn scan_features_finds_raw_character_data_inside_a_sequence() {
        let vartable = table_with(&[(Varcode::new(0, 1, 1), "A", "M", 0, 0, 8)]);
        let dtable = {
            let mut bytes = vec![b' '; 15];
            bytes[2..8].copy_from_slice(b"302001");
            bytes[9..15].copy_from_slice(b"205008"); // C05008: 8 raw characters
            let content = String::from_utf8(bytes).unwrap() + "\n";
            Dtable::parse("d.txt", &content).unwrap()
        };
        let interp = Interpreter::new(&vartable, &dtable);
        let dds = [Varcode::new(3, 2, 1)];
        let features = interp.scan_features(&dds).unwrap();
        assert!(features.has_raw_character_data);
        assert!(!features.has_opaque_binary);
        assert!(!features.compression_compatible());
    }

    #[test]
    fn scan_features_is_clean_for_a_plain_dds() {
        let vartable = table_with(&[(Varcode::new(0, 1, 1), "A", "M", 0, 0, 8)]);
        let dtable = Dtable::parse("d.txt", "").unwrap();
        let interp = Interpreter::new(&vartable, &dtable);
        let dds = [Varcode::new(0, 1, 1)];
        let features = interp.scan_features(&dds).unwrap();
        assert!(features.compression_compatible());
    }
}
