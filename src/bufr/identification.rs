//! Section-1 (identification) decoding for BUFR editions 2, 3, and 4
//! (§4.6, §6). The edition-3/4 layouts and the year pivot-50 widening are
//! taken directly from
//! `examples/original_source/wreport/bufr/decoder.cc`'s
//! `decode_sec1ed3`/`decode_sec1ed4`, since §6's offset table alone leaves
//! the century-widening tie-break (`> 50` vs `<= 50`) to interpretation.

use crate::bulletin::Identification;
use crate::error::{Error, Result};
use bitflags::bitflags;

bitflags! {
    /// Section-1 flag byte (§6): only the optional-section-2 bit is named.
    struct Section1Flags: u8 {
        const OPTIONAL_SECTION = 0b1000_0000;
    }
}

fn byte(section: &[u8], offset: usize) -> Result<u8> {
    section
        .get(offset)
        .copied()
        .ok_or_else(|| Error::Parse(format!("section 1 truncated before offset {offset}")))
}

fn number16(section: &[u8], offset: usize) -> Result<u16> {
    let hi = byte(section, offset)?;
    let lo = byte(section, offset + 1)?;
    Ok(u16::from(hi) << 8 | u16::from(lo))
}

/// Parse section 1 for editions 2/3: identical layouts except edition 2
/// omits the local-table/local-subcategory distinction in some profiles,
/// which does not affect this offset table.
fn parse_sec1_ed23(edition: u8, section: &[u8]) -> Result<Identification> {
    let mut year = u16::from(byte(section, 12)?);
    let century = byte(section, 17)?;
    if century != 0 {
        year = u16::from(century) * 100 + (year % 100);
    } else if year > 50 {
        year += 1900;
    } else {
        year += 2000;
    }

    Ok(Identification {
        edition,
        master_table_number: byte(section, 3)?,
        originating_subcentre: u16::from(byte(section, 4)?),
        originating_centre: u16::from(byte(section, 5)?),
        update_sequence: byte(section, 6)?,
        data_category: byte(section, 8)?,
        data_subcategory: 0xFF,
        local_subcategory: byte(section, 9)?,
        master_table_version: byte(section, 10)?,
        local_table_version: byte(section, 11)?,
        year,
        month: byte(section, 13)?,
        day: byte(section, 14)?,
        hour: byte(section, 15)?,
        minute: byte(section, 16)?,
        second: 0,
    })
}

fn parse_sec1_ed4(section: &[u8]) -> Result<Identification> {
    Ok(Identification {
        edition: 4,
        master_table_number: byte(section, 3)?,
        originating_centre: number16(section, 4)?,
        originating_subcentre: number16(section, 6)?,
        update_sequence: byte(section, 8)?,
        data_category: byte(section, 10)?,
        data_subcategory: byte(section, 11)?,
        local_subcategory: byte(section, 12)?,
        master_table_version: byte(section, 13)?,
        local_table_version: byte(section, 14)?,
        year: number16(section, 15)?,
        month: byte(section, 17)?,
        day: byte(section, 18)?,
        hour: byte(section, 19)?,
        minute: byte(section, 20)?,
        second: byte(section, 21)?,
    })
}

/// Dispatch on `edition`; only 2, 3, and 4 are accepted (§4.6).
pub fn parse(edition: u8, section: &[u8]) -> Result<Identification> {
    match edition {
        2 | 3 => parse_sec1_ed23(edition, section),
        4 => parse_sec1_ed4(section),
        other => Err(Error::Parse(format!("BUFR edition {other} is not supported (only 2, 3, 4)"))),
    }
}

/// True iff bit 7 (MSB) of the section-1 flags byte is set, indicating an
/// optional section 2 is present (§6).
#[must_use]
pub fn has_optional_section(edition: u8, section: &[u8]) -> bool {
    let flags_offset = if edition == 4 { 9 } else { 7 };
    section
        .get(flags_offset)
        .is_some_and(|&b| Section1Flags::from_bits_truncate(b).contains(Section1Flags::OPTIONAL_SECTION))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ed4_section() -> Vec<u8> {
        let mut s = vec![0u8; 22];
        s[3] = 0; // master table number
        s[4] = 0;
        s[5] = 98; // centre = 98
        s[6] = 0;
        s[7] = 0; // subcentre = 0
        s[8] = 0; // update sequence
        s[9] = 0x00; // no optional section
        s[10] = 0; // category
        s[11] = 255; // international subcategory
        s[12] = 1; // local subcategory
        s[13] = 24; // master table version
        s[14] = 0; // local table version
        s[15] = 0x07;
        s[16] = 0xE8; // year = 2024
        s[17] = 6; // month
        s[18] = 15; // day
        s[19] = 12; // hour
        s[20] = 0; // minute
        s[21] = 30; // second
        s
    }

    #[test]
    fn parses_ed4_section1() {
        let ident = parse(4, &ed4_section()).unwrap();
        assert_eq!(ident.originating_centre, 98);
        assert_eq!(ident.year, 2024);
        assert_eq!(ident.master_table_version, 24);
        assert_eq!(ident.second, 30);
    }

    #[test]
    fn ed3_year_pivot_fifty_without_century_byte() {
        let mut s = vec![0u8; 18];
        s[3] = 0;
        s[4] = 0;
        s[5] = 98;
        s[6] = 0;
        s[7] = 0;
        s[8] = 0;
        s[9] = 1;
        s[10] = 13;
        s[11] = 0;
        s[12] = 24; // year byte <= 50 -> 2024
        s[13] = 6;
        s[14] = 15;
        s[15] = 12;
        s[16] = 0;
        s[17] = 0; // no century override
        let ident = parse(3, &s).unwrap();
        assert_eq!(ident.year, 2024);

        s[12] = 95; // year byte > 50 -> 1995
        let ident = parse(3, &s).unwrap();
        assert_eq!(ident.year, 1995);
    }

    #[test]
    fn ed3_century_byte_overrides_pivot() {
        let mut s = vec![0u8; 18];
        s[12] = 5;
        s[17] = 20; // explicit century 20xx
        let ident = parse(3, &s).unwrap();
        assert_eq!(ident.year, 2005);
    }

    #[test]
    fn rejects_unsupported_edition() {
        assert!(parse(5, &[0u8; 22]).is_err());
    }

    #[test]
    fn optional_section_flag_reads_correct_byte_per_edition() {
        let mut ed4 = ed4_section();
        assert!(!has_optional_section(4, &ed4));
        ed4[9] = 0x80;
        assert!(has_optional_section(4, &ed4));
    }
}
