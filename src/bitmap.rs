//! Data-present bitmap resolution and the `C04yyy` associated-field
//! significance dispatch (§4.7).

use crate::error::{Error, Result};
use crate::subset::Subset;
use crate::varcode::{Varcode, F};
use tracing::debug;

/// Walk `subset` backwards from `anchor` (exclusive), skipping non-`F=0`
/// meta-elements (replication counts, other bitmaps), collecting `size`
/// data-bearing indices. Returned in forward (subset) order.
pub fn resolve_indices(subset: &Subset, anchor: usize, size: usize) -> Result<Vec<usize>> {
    let mut indices = Vec::with_capacity(size);
    let mut cursor = anchor;
    while indices.len() < size {
        if cursor == 0 {
            return Err(Error::Consistency(format!(
                "bitmap of size {size} anchored at {anchor} refers before the start of the subset"
            )));
        }
        cursor -= 1;
        let var = subset
            .get(cursor)
            .ok_or_else(|| Error::Consistency(format!("bitmap anchor {anchor} is out of range")))?;
        if var.code().f() != F::Element {
            continue;
        }
        indices.push(cursor);
    }
    indices.reverse();
    Ok(indices)
}

/// Tracks the "last" data-present bitmap so a following modifier can
/// reuse it without re-reading bits (§4.7).
#[derive(Debug, Clone, Default)]
pub struct BitmapHistory {
    last: Option<Vec<usize>>,
}

impl BitmapHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly-defined bitmap, discarding whatever was pending.
    pub fn define(&mut self, indices: Vec<usize>) {
        self.last = Some(indices);
    }

    /// Reuse the last-defined bitmap for a new consumer.
    pub fn reuse(&self) -> Result<&[usize]> {
        self.last
            .as_deref()
            .ok_or_else(|| Error::Consistency("no bitmap has been defined yet to reuse".to_string()))
    }
}

/// The attribute a `C04yyy` associated field attaches to its element,
/// given the significance carried by the companion `B31021` variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// Attach as an attribute with this code.
    Attribute(Varcode),
    /// Significance is defined but carries no attribute (e.g. `63`).
    None,
}

/// Dispatch a `B31021` significance code to the attribute it attaches, per
/// §4.7's explicit table. Significances in the "log and skip" range return
/// `Attachment::None` after logging; anything outside every named range is
/// `UNIMPLEMENTED`.
pub fn dispatch_significance(significance: u8) -> Result<Attachment> {
    match significance {
        1 | 8 => Ok(Attachment::Attribute(Varcode::new(0, 33, 2))),
        2 => Ok(Attachment::Attribute(Varcode::new(0, 33, 3))),
        6 => Ok(Attachment::Attribute(Varcode::new(0, 33, 50))),
        7 => Ok(Attachment::Attribute(Varcode::new(0, 33, 40))),
        21 => Ok(Attachment::Attribute(Varcode::new(0, 33, 41))),
        63 => Ok(Attachment::None),
        3..=5 | 9..=20 | 22..=62 => {
            debug!(significance, "associated field significance has no handled attribute, skipping");
            Ok(Attachment::None)
        }
        other => Err(Error::Unimplemented(format!(
            "associated field significance {other} is outside the known B31021 ranges"
        ))),
    }
}

/// Whether `value` means "missing" for this significance's attribute
/// (§4.7: significance 6 treats 15 as missing, significance 21 treats 1).
#[must_use]
pub fn is_significance_missing_value(significance: u8, value: u32) -> bool {
    match significance {
        6 => value == 15,
        21 => value == 1,
        _ => false,
    }
}
