//! Section-length scanning and DDS-header parsing (§4.6, §6).
//!
//! Grounded on `examples/original_source/wreport/bufr/decoder.cc`: each
//! section after section 0 opens with a 24-bit big-endian length; section
//! 2 is present iff the identification flags byte says so; section 3's
//! subset count, compression flag, and descriptor list sit at the fixed
//! offsets confirmed there (`expected_subsets`, `compression`, the
//! descriptor-count arithmetic).

use crate::bufr::identification;
use crate::error::{Error, Result};
use crate::varcode::Varcode;
use bitflags::bitflags;
use std::ops::Range;

bitflags! {
    /// Section-3 flag byte (§6): only the compression bit is named.
    struct Section3Flags: u8 {
        const COMPRESSED = 0b0100_0000;
    }
}

fn read_u24(data: &[u8], offset: usize) -> Result<usize> {
    let b = data
        .get(offset..offset + 3)
        .ok_or_else(|| Error::Parse(format!("section length truncated at offset {offset}")))?;
    Ok((usize::from(b[0]) << 16) | (usize::from(b[1]) << 8) | usize::from(b[2]))
}

/// Byte ranges of every section in one BUFR message, relative to the
/// start of the message.
#[derive(Debug, Clone)]
pub struct Sections {
    pub edition: u8,
    pub section1: Range<usize>,
    pub section2: Option<Range<usize>>,
    pub section3: Range<usize>,
    pub section4: Range<usize>,
    pub section5: Range<usize>,
}

/// Scan `data` (one full `BUFR`...`7777` message) into section ranges.
pub fn scan(data: &[u8]) -> Result<Sections> {
    if data.len() < 8 || &data[0..4] != b"BUFR" {
        return Err(Error::Parse("data does not start with a BUFR header".to_string()));
    }
    let edition = data[7];

    let mut offset = 8usize;
    let sec1_len = read_u24(data, offset)?;
    let section1 = offset..offset + sec1_len;
    let sec1_bytes = data
        .get(section1.clone())
        .ok_or_else(|| Error::Parse("section 1 length exceeds message length".to_string()))?;
    offset += sec1_len;

    let section2 = if identification::has_optional_section(edition, sec1_bytes) {
        let sec2_len = read_u24(data, offset)?;
        let r = offset..offset + sec2_len;
        offset += sec2_len;
        Some(r)
    } else {
        None
    };

    let sec3_len = read_u24(data, offset)?;
    let section3 = offset..offset + sec3_len;
    offset += sec3_len;

    let sec4_len = read_u24(data, offset)?;
    let section4 = offset..offset + sec4_len;
    offset += sec4_len;

    let section5 = offset..offset + 4;
    let marker = data
        .get(section5.clone())
        .ok_or_else(|| Error::Parse("section 5 (end marker) is truncated".to_string()))?;
    if marker != b"7777" {
        return Err(Error::Parse("section 5 does not contain '7777'".to_string()));
    }

    Ok(Sections { edition, section1, section2, section3, section4, section5 })
}

/// Parsed section-3 header: subset count, compression flag, and the flat
/// Varcode opcode list that is the DDS.
#[derive(Debug, Clone)]
pub struct DdsHeader {
    pub subset_count: u16,
    pub compressed: bool,
    pub opcodes: Vec<Varcode>,
}

/// Parse section 3: subset count at offset 4 (2 bytes), flags byte at
/// offset 6 (bit 6 = compression), Varcode list from offset 7 onward.
pub fn parse_dds_header(section3: &[u8]) -> Result<DdsHeader> {
    if section3.len() < 8 {
        return Err(Error::Parse("section 3 shorter than its fixed header".to_string()));
    }
    let subset_count = u16::from(section3[4]) << 8 | u16::from(section3[5]);
    let compressed = Section3Flags::from_bits_truncate(section3[6]).contains(Section3Flags::COMPRESSED);
    let tail = &section3[8..];
    if tail.len() % 2 != 0 {
        return Err(Error::Parse("section 3 descriptor list has an odd trailing byte".to_string()));
    }
    let opcodes = tail
        .chunks_exact(2)
        .map(|pair| Varcode::from_raw(u16::from(pair[0]) << 8 | u16::from(pair[1])))
        .collect();
    Ok(DdsHeader { subset_count, compressed, opcodes })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"BUFR");
        data.extend_from_slice(&[0, 0, 0]); // total length placeholder, unused by scan()
        data.push(4); // edition

        // Section 1: 22 bytes for edition 4, no optional section flag.
        let mut sec1 = vec![0u8; 22];
        sec1[0] = 0;
        sec1[1] = 0;
        sec1[2] = 22;
        data.extend_from_slice(&sec1);

        // Section 3: 8-byte header + one Varcode.
        let mut sec3 = vec![0u8; 10];
        let len = sec3.len();
        sec3[0] = 0;
        sec3[1] = 0;
        sec3[2] = len as u8;
        sec3[4] = 0;
        sec3[5] = 1; // subset count = 1
        sec3[6] = 0x40; // compressed
        sec3[8] = 0x00;
        sec3[9] = 0x01; // Varcode raw 0x0001 -> B00001
        data.extend_from_slice(&sec3);

        // Section 4: 4-byte header, empty payload.
        data.extend_from_slice(&[0, 0, 4]);
        data.push(0);

        data.extend_from_slice(b"7777");
        data
    }

    #[test]
    fn scans_all_sections() {
        let data = sample_message();
        let sections = scan(&data).unwrap();
        assert_eq!(sections.edition, 4);
        assert!(sections.section2.is_none());
        assert_eq!(sections.section1.len(), 22);
        assert_eq!(sections.section3.len(), 10);
    }

    #[test]
    fn rejects_missing_terminator() {
        let mut data = sample_message();
        let last = data.len() - 1;
        data[last] = b'X';
        assert!(scan(&data).is_err());
    }

    #[test]
    fn parses_dds_header_fields() {
        let data = sample_message();
        let sections = scan(&data).unwrap();
        let header = parse_dds_header(&data[sections.section3.clone()]).unwrap();
        assert_eq!(header.subset_count, 1);
        assert!(header.compressed);
        assert_eq!(header.opcodes, vec![Varcode::from_raw(1)]);
    }
}
