//! `Bulletin`: identification fields, the DDS, and one or more `Subset`s.

use crate::error::{Error, Result};
use crate::subset::Subset;
use crate::varcode::Varcode;
use serde::Serialize;

/// Identification fields carried in BUFR section 1 (§6).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identification {
    pub edition: u8,
    pub master_table_number: u8,
    pub originating_centre: u16,
    pub originating_subcentre: u16,
    pub update_sequence: u8,
    pub data_category: u8,
    pub data_subcategory: u8,
    pub local_subcategory: u8,
    pub master_table_version: u8,
    pub local_table_version: u8,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Identification {
    /// `(centre, subcentre, master_table_number, master_table_version,
    /// local_version)` as used by the tabledir resolver (§4.2).
    #[must_use]
    pub fn table_request(&self) -> (u16, u16, u8, u8, u8) {
        (
            self.originating_centre,
            self.originating_subcentre,
            self.master_table_number,
            self.master_table_version,
            self.local_table_version,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bulletin {
    pub identification: Identification,
    pub compressed: bool,
    pub optional_section: Option<Vec<u8>>,
    pub dds: Vec<Varcode>,
    pub subsets: Vec<Subset>,
}

impl Bulletin {
    #[must_use]
    pub fn new(identification: Identification, dds: Vec<Varcode>) -> Self {
        Bulletin {
            identification,
            compressed: false,
            optional_section: None,
            dds,
            subsets: Vec::new(),
        }
    }

    /// When compression is enabled, every subset must share the same
    /// sequence of Varcodes (§3 "structurally congruent").
    pub fn check_compression_congruence(&self) -> Result<()> {
        if !self.compressed || self.subsets.len() < 2 {
            return Ok(());
        }
        let shape: Vec<Varcode> = self.subsets[0].iter().map(|v| v.code()).collect();
        for (idx, subset) in self.subsets.iter().enumerate().skip(1) {
            let other: Vec<Varcode> = subset.iter().map(|v| v.code()).collect();
            if other != shape {
                return Err(Error::Consistency(format!(
                    "subset {idx} is not structurally congruent with subset 0 under compression"
                )));
            }
        }
        Ok(())
    }
}
