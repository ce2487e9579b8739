//! `Dtable`: a registry of `D`-descriptor sequence expansions.
//!
//! spec.md names the D-table as a registry responsibility (§4, §9) without
//! specifying its on-disk layout; the layout below extends the `Vartable`
//! fixed-column convention (grounded on
//! `examples/original_source/wreport/internals/vartable.cc`'s `Bufr`
//! loader) to a one-to-many shape: each physical line carries either a new
//! `D`-code followed by its first component, or a blank `D`-code column
//! continuing the previous entry's component list.

use crate::error::{Error, Result};
use crate::varcode::Varcode;
use std::collections::HashMap;

const DTABLE_MIN_LINE: usize = 14;

/// An ordered-by-code registry mapping each `D`-descriptor to the flat
/// sequence of Varcodes it expands to (§4.3 "sequence expansion").
#[derive(Debug, Clone)]
pub struct Dtable {
    name: String,
    entries: HashMap<Varcode, Vec<Varcode>>,
    order: Vec<Varcode>,
}

impl Dtable {
    /// Parse a D-table: `D`-code at offset 2 (width 6, blank to continue
    /// the previous entry), component code at offset 9 (width 6).
    pub fn parse(name: &str, content: &str) -> Result<Self> {
        let mut entries: HashMap<Varcode, Vec<Varcode>> = HashMap::new();
        let mut order = Vec::new();
        let mut current: Option<Varcode> = None;

        for (line_no, line) in content.lines().enumerate() {
            let line_no = line_no + 1;
            if line.trim().is_empty() {
                continue;
            }
            if line.len() < DTABLE_MIN_LINE {
                return Err(Error::Parse(format!("{name}:{line_no}: dtable line too short")));
            }
            let d_field = line.get(2..8).ok_or_else(|| Error::Parse(format!("{name}:{line_no}: truncated")))?;
            let component_field = line.get(9..15).ok_or_else(|| Error::Parse(format!("{name}:{line_no}: truncated")))?;

            let d_code = if d_field.trim().is_empty() {
                current.ok_or_else(|| Error::Parse(format!("{name}:{line_no}: continuation line with no open D-entry")))?
            } else {
                let code = Varcode::parse(d_field)
                    .map_err(|_| Error::Parse(format!("{name}:{line_no}: malformed D-code '{d_field}'")))?;
                if !code.is_sequence() {
                    return Err(Error::Parse(format!("{name}:{line_no}: '{d_field}' is not an F=3 sequence code")));
                }
                if entries.contains_key(&code) {
                    return Err(Error::Parse(format!("{name}:{line_no}: duplicate D-entry {code}")));
                }
                entries.insert(code, Vec::new());
                order.push(code);
                current = Some(code);
                code
            };

            let component = Varcode::parse(component_field)
                .map_err(|_| Error::Parse(format!("{name}:{line_no}: malformed component '{component_field}'")))?;
            entries.get_mut(&d_code).expect("entry inserted above").push(component);
        }

        Ok(Dtable { name: name.to_string(), entries, order })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn contains(&self, code: Varcode) -> bool {
        self.entries.contains_key(&code)
    }

    /// The flat component list for `code`, in table order.
    pub fn query(&self, code: Varcode) -> Result<&[Varcode]> {
        self.entries
            .get(&code)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::NotFound(format!("{code}: no such D-descriptor in table '{}'", self.name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Varcode, &[Varcode])> {
        self.order.iter().map(move |code| (*code, self.entries[code].as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dtable_line(d: &str, component: &str) -> String {
        let mut bytes = vec![b' '; DTABLE_MIN_LINE + 1];
        if !d.is_empty() {
            bytes[2..8].copy_from_slice(d.as_bytes());
        }
        bytes[9..15].copy_from_slice(component.as_bytes());
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn parses_multi_component_sequence() {
        let content = format!(
            "{}\n{}\n{}\n",
            dtable_line("302001", "001001"),
            dtable_line("", "001002"),
            dtable_line("", "020013"),
        );
        let table = Dtable::parse("test.txt", &content).unwrap();
        let code = Varcode::parse("D02001").unwrap();
        let expansion = table.query(code).unwrap();
        assert_eq!(
            expansion,
            &[
                Varcode::parse("B01001").unwrap(),
                Varcode::parse("B01002").unwrap(),
                Varcode::parse("B20013").unwrap(),
            ]
        );
    }

    #[test]
    fn rejects_continuation_without_open_entry() {
        let content = dtable_line("", "001001") + "\n";
        assert!(Dtable::parse("test.txt", &content).is_err());
    }

    #[test]
    fn rejects_duplicate_entries() {
        let content = format!(
            "{}\n{}\n",
            dtable_line("302001", "001001"),
            dtable_line("302001", "001002"),
        );
        assert!(Dtable::parse("test.txt", &content).is_err());
    }

    #[test]
    fn rejects_non_sequence_d_code() {
        let content = dtable_line("012101", "001001") + "\n";
        assert!(Dtable::parse("test.txt", &content).is_err());
    }
}
