//! The visitor the interpreter drives (§4.5): "The interpreter is abstract
//! over a target... All targets receive the same event stream — that is
//! the core invariant that guarantees encode/decode symmetry."
//!
//! Shaped after the teacher's `BitStreamVisitor` trait
//! (`examples/messense-llvm-bitcode-rs/src/visitor.rs`): a small set of
//! callback methods invoked in DDS reading order, implemented once per
//! concrete backend (uncompressed decode, compressed decode, encode,
//! validate).

use crate::error::Result;
use crate::varinfo::Varinfo;
use std::sync::Arc;

/// Significance code carried by a companion `B31021` variable, governing
/// how a `C04yyy` associated field is attached (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociatedFieldSignificance(pub u8);

/// Events the interpreter emits while walking a DDS. Each concrete target
/// implements the side effect appropriate to its direction: a decode
/// target pulls bits and stores a `Var`; an encode target reads a `Var`
/// and writes bits; a validator only checks domains.
pub trait InterpreterTarget {
    /// `F=0` element: emit one variable of `info`'s (possibly altered)
    /// type at the current cursor position.
    fn define_variable(&mut self, info: Arc<Varinfo>) -> Result<()>;

    /// A `C04yyy`-governed associated field of `width` bits, immediately
    /// preceding the next `define_variable` call for the same element.
    fn define_associated_field(&mut self, width: u32, significance: Option<AssociatedFieldSignificance>) -> Result<()>;

    /// A data-present bitmap of `size` entries becomes active, to be
    /// consumed by the attribute-defining elements that follow (§4.7).
    fn define_bitmap(&mut self, info: Arc<Varinfo>, size: usize) -> Result<()>;

    /// Re-arm the last-defined bitmap for a new consumer without
    /// re-reading bits (§4.7 "may be reused by the next consumer").
    fn reuse_last_bitmap(&mut self) -> Result<()>;

    /// `yyy`-character raw ASCII payload introduced by `C05yyy`.
    fn define_raw_characters(&mut self, n_chars: u32) -> Result<()>;

    /// Resolve the count for a delayed replication (`R` with `Y=0`): the
    /// decoder reads a `B31yyy` value from the bitstream; the encoder
    /// reads the already-populated subset to discover how many times the
    /// group actually repeats.
    fn delayed_replication_count(&mut self, info: Arc<Varinfo>) -> Result<u32>;
}
