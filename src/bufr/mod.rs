//! Top-level BUFR decode/encode entry points (§3, §4.6): wire a bulletin's
//! sections together with the shared `Interpreter` and the concrete
//! decode/encode targets.

pub mod decode;
pub mod encode;
pub mod identification;
pub mod scanner;
pub mod validate;

use crate::bits::{BitReader, BitWriter};
use crate::bulletin::Bulletin;
use crate::error::{Error, Result};
use crate::interpreter::Interpreter;
use crate::subset::Subset;
use crate::table::{Dtable, Vartable};
use decode::{CompressedDecodeTarget, UncompressedDecodeTarget};
use encode::{CompressedEncodeTarget, UncompressedEncodeTarget};

/// Decode one full `BUFR`...`7777` message against an already-resolved
/// B-table/D-table pair.
pub fn decode(data: &[u8], vartable: &Vartable, dtable: &Dtable) -> Result<Bulletin> {
    let sections = scanner::scan(data)?;
    let identification = identification::parse(sections.edition, &data[sections.section1.clone()])?;
    let header = scanner::parse_dds_header(&data[sections.section3.clone()])?;

    let mut bulletin = Bulletin::new(identification, header.opcodes);
    bulletin.compressed = header.compressed;
    bulletin.optional_section = sections.section2.clone().map(|r| data[r].to_vec());

    let payload = data
        .get(sections.section4.start + 4..sections.section4.end)
        .ok_or_else(|| Error::Parse("section 4 shorter than its fixed header".to_string()))?;
    let mut reader = BitReader::new(payload);

    if bulletin.compressed {
        let mut subsets = vec![Subset::new(); header.subset_count as usize];
        let mut interp = Interpreter::new(vartable, dtable);
        let mut target = CompressedDecodeTarget::new(&mut reader, vartable, &mut subsets);
        interp.run(&bulletin.dds, &mut target)?;
        bulletin.subsets = subsets;
    } else {
        let mut subsets = Vec::with_capacity(header.subset_count as usize);
        for _ in 0..header.subset_count {
            let mut subset = Subset::new();
            let mut interp = Interpreter::new(vartable, dtable);
            let mut target = UncompressedDecodeTarget::new(&mut reader, vartable, &mut subset);
            interp.run(&bulletin.dds, &mut target)?;
            subsets.push(subset);
        }
        bulletin.subsets = subsets;
    }

    bulletin.check_compression_congruence()?;
    Ok(bulletin)
}

/// Encode a `Bulletin` back into wire bytes. Fails fast with
/// `Error::Consistency` before touching the bitstream if a compressed
/// bulletin's DDS carries a construct `scan_features` marks incompatible
/// with compression (§11).
pub fn encode(bulletin: &Bulletin, vartable: &Vartable, dtable: &Dtable) -> Result<Vec<u8>> {
    bulletin.check_compression_congruence()?;

    if bulletin.compressed {
        let interp = Interpreter::new(vartable, dtable);
        let features = interp.scan_features(&bulletin.dds)?;
        if !features.compression_compatible() {
            return Err(Error::Consistency(
                "DDS contains C05/C06 constructs that cannot be compressed".to_string(),
            ));
        }
    }

    let mut writer = BitWriter::new();
    if bulletin.compressed {
        let mut interp = Interpreter::new(vartable, dtable);
        let mut target = CompressedEncodeTarget::new(&mut writer, &bulletin.subsets);
        interp.run(&bulletin.dds, &mut target)?;
    } else {
        for subset in &bulletin.subsets {
            let mut interp = Interpreter::new(vartable, dtable);
            let mut target = UncompressedEncodeTarget::new(&mut writer, subset);
            interp.run(&bulletin.dds, &mut target)?;
        }
    }
    let payload = writer.finish();

    let sec1 = write_section1(bulletin);
    let sec2 = bulletin.optional_section.clone();
    let sec3 = write_section3(bulletin);
    let sec4 = write_section4(&payload);

    let mut total = 8 + sec1.len() + sec2.as_ref().map_or(0, Vec::len) + sec3.len() + sec4.len() + 4;
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(b"BUFR");
    out.extend_from_slice(&len24(0)); // patched below once `total` is final
    out.push(bulletin.identification.edition);
    out.extend_from_slice(&sec1);
    if let Some(sec2) = &sec2 {
        out.extend_from_slice(sec2);
    }
    out.extend_from_slice(&sec3);
    out.extend_from_slice(&sec4);
    out.extend_from_slice(b"7777");

    total = out.len();
    out[4..7].copy_from_slice(&len24(total));
    Ok(out)
}

fn len24(n: usize) -> [u8; 3] {
    [((n >> 16) & 0xff) as u8, ((n >> 8) & 0xff) as u8, (n & 0xff) as u8]
}

fn write_section1(bulletin: &Bulletin) -> Vec<u8> {
    let id = &bulletin.identification;
    let has_optional = bulletin.optional_section.is_some();
    let mut sec1 = if id.edition == 4 { vec![0u8; 22] } else { vec![0u8; 18] };
    let len = sec1.len();
    sec1[0..3].copy_from_slice(&len24(len));
    sec1[3] = id.master_table_number;

    if id.edition == 4 {
        sec1[4..6].copy_from_slice(&id.originating_centre.to_be_bytes());
        sec1[6..8].copy_from_slice(&id.originating_subcentre.to_be_bytes());
        sec1[8] = id.update_sequence;
        sec1[9] = if has_optional { 0x80 } else { 0x00 };
        sec1[10] = id.data_category;
        sec1[11] = id.data_subcategory;
        sec1[12] = id.local_subcategory;
        sec1[13] = id.master_table_version;
        sec1[14] = id.local_table_version;
        sec1[15..17].copy_from_slice(&id.year.to_be_bytes());
        sec1[17] = id.month;
        sec1[18] = id.day;
        sec1[19] = id.hour;
        sec1[20] = id.minute;
        sec1[21] = id.second;
    } else {
        sec1[4] = id.originating_subcentre as u8;
        sec1[5] = id.originating_centre as u8;
        sec1[6] = id.update_sequence;
        sec1[7] = if has_optional { 0x80 } else { 0x00 };
        sec1[8] = id.data_category;
        sec1[9] = id.local_subcategory;
        sec1[10] = id.master_table_version;
        sec1[11] = id.local_table_version;
        sec1[12] = (id.year % 100) as u8;
        sec1[13] = id.month;
        sec1[14] = id.day;
        sec1[15] = id.hour;
        sec1[16] = id.minute;
        sec1[17] = (id.year / 100) as u8;
    }
    sec1
}

fn write_section3(bulletin: &Bulletin) -> Vec<u8> {
    let mut sec3 = vec![0u8; 8 + bulletin.dds.len() * 2];
    let len = sec3.len();
    sec3[0..3].copy_from_slice(&len24(len));
    let subset_count = bulletin.subsets.len() as u16;
    sec3[4..6].copy_from_slice(&subset_count.to_be_bytes());
    sec3[6] = if bulletin.compressed { 0x40 } else { 0x00 };
    for (i, code) in bulletin.dds.iter().enumerate() {
        sec3[8 + i * 2..10 + i * 2].copy_from_slice(&code.raw().to_be_bytes());
    }
    sec3
}

fn write_section4(payload: &[u8]) -> Vec<u8> {
    let mut sec4 = vec![0u8; 4 + payload.len()];
    let len = sec4.len();
    sec4[0..3].copy_from_slice(&len24(len));
    sec4[4..].copy_from_slice(payload);
    sec4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulletin::Identification;
    use crate::table::{Dtable, Vartable};
    use crate::varcode::Varcode;

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

    fn ident() -> Identification {
        Identification {
            edition: 4,
            master_table_number: 0,
            originating_centre: 98,
            originating_subcentre: 0,
            update_sequence: 0,
            data_category: 0,
            data_subcategory: 0,
            local_subcategory: 1,
            master_table_version: 24,
            local_table_version: 0,
            year: 2024,
            month: 6,
            day: 15,
            hour: 12,
            minute: 0,
            second: 0,
        }
    }

    #[test]
    fn encodes_then_decodes_a_single_uncompressed_subset() {
        let vartable = table_with(&[(Varcode::new(0, 1, 1), "A", "M", 0, 0, 8)]);
        let dtable = Dtable::parse("d.txt", "").unwrap();
        let code = Varcode::new(0, 1, 1);
        let info = vartable.query(code).unwrap();

        let mut subset = Subset::new();
        subset.store_int(info, 42).unwrap();

        let mut bulletin = Bulletin::new(ident(), vec![code]);
        bulletin.subsets = vec![subset];

        let bytes = encode(&bulletin, &vartable, &dtable).unwrap();
        assert_eq!(&bytes[0..4], b"BUFR");
        assert_eq!(&bytes[bytes.len() - 4..], b"7777");

        let decoded = decode(&bytes, &vartable, &dtable).unwrap();
        assert_eq!(decoded.subsets.len(), 1);
        assert_eq!(decoded.subsets[0].get(0).unwrap().enqi(), Some(42));
        assert_eq!(decoded.identification.originating_centre, 98);
        assert_eq!(decoded.identification.year, 2024);
    }

    #[test]
    fn encodes_then_decodes_two_compressed_subsets() {
        let vartable = table_with(&[(Varcode::new(0, 1, 1), "A", "M", 0, 0, 8)]);
        let dtable = Dtable::parse("d.txt", "").unwrap();
        let code = Varcode::new(0, 1, 1);
        let info = vartable.query(code).unwrap();

        let mut s0 = Subset::new();
        s0.store_int(info.clone(), 3).unwrap();
        let mut s1 = Subset::new();
        s1.store_int(info, 9).unwrap();

        let mut bulletin = Bulletin::new(ident(), vec![code]);
        bulletin.compressed = true;
        bulletin.subsets = vec![s0, s1];

        let bytes = encode(&bulletin, &vartable, &dtable).unwrap();
        let decoded = decode(&bytes, &vartable, &dtable).unwrap();
        assert!(decoded.compressed);
        assert_eq!(decoded.subsets[0].get(0).unwrap().enqi(), Some(3));
        assert_eq!(decoded.subsets[1].get(0).unwrap().enqi(), Some(9));
    }

    #[test]
    fn rejects_compressed_encode_with_raw_character_data() {
        let vartable = table_with(&[(Varcode::new(0, 1, 1), "A", "M", 0, 0, 8)]);
        let dtable = {
            let mut bytes = vec![b' '; 15];
            bytes[2..8].copy_from_slice(b"302001");
            bytes[9..15].copy_from_slice(b"205008");
            let content = String::from_utf8(bytes).unwrap() + "\n";
            Dtable::parse("d.txt", &content).unwrap()
        };
        let mut bulletin = Bulletin::new(ident(), vec![Varcode::new(3, 2, 1)]);
        bulletin.compressed = true;
        bulletin.subsets = vec![Subset::new(), Subset::new()];

        assert!(encode(&bulletin, &vartable, &dtable).is_err());
    }
}
