//! Tabledir resolver: turns a bulletin's identification fields into the
//! single "closest acceptable" table file on disk (§4.2, §6).
//!
//! The search-path precedence (`WREPORT_EXTRA_TABLES` > `WREPORT_TABLES` >
//! compiled-in default) and the basename pattern are both named directly in
//! §6; grounded on `examples/original_source/wreport/tableinfo.cc`'s
//! acceptability/ranking split, adapted to the rule list spec.md §4.2
//! states explicitly rather than re-deriving it from the C++.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

/// Sentinel requested-version meaning "accept any version, prefer newest".
pub const NEWEST: u8 = 0xFF;

/// What kind of table a file basename encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Bufr,
    Crex,
    Dtable,
}

/// The identification tuple a lookup is keyed by. CREX requests additionally
/// constrain the BUFR master-table version a CREX-vs-CREX candidate must
/// satisfy (§4.2 rule 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRequest {
    pub kind: TableKind,
    pub centre: u16,
    pub subcentre: u16,
    pub master_table_number: u8,
    pub master_table_version: u8,
    pub local_table_version: u8,
    /// Only meaningful when `kind == Crex`: the BUFR master-table version
    /// this CREX table was generated against.
    pub master_table_version_bufr: Option<u8>,
}

/// One table file discovered on the search path, with its identification
/// parsed out of the basename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub kind: TableKind,
    pub centre: u16,
    pub subcentre: u16,
    pub master_table_number: u8,
    pub master_table_version: u8,
    pub local_table_version: u8,
    pub master_table_version_bufr: Option<u8>,
}

/// Parse the `B<centre:3><subcentre:4><master-version:3><local-version:3>.txt`
/// basename pattern (and its `D`/`C` analogues) into a `Candidate`. Returns
/// `None` for any basename that doesn't match — callers skip those silently,
/// the directory may hold unrelated files.
#[must_use]
pub fn parse_basename(path: &Path) -> Option<Candidate> {
    let stem = path.file_stem()?.to_str()?;
    if path.extension().and_then(|e| e.to_str()) != Some("txt") {
        return None;
    }
    let (kind, rest) = match stem.as_bytes().first()? {
        b'B' => (TableKind::Bufr, &stem[1..]),
        b'C' => (TableKind::Crex, &stem[1..]),
        b'D' => (TableKind::Dtable, &stem[1..]),
        _ => return None,
    };
    // centre:3 subcentre:4 master-version:3 local-version:3 == 13 digits,
    // plus 3 more (BUFR master-table version) for CREX tables.
    let expect_len = if kind == TableKind::Crex { 16 } else { 13 };
    if rest.len() != expect_len || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let centre: u16 = rest[0..3].parse().ok()?;
    let subcentre: u16 = rest[3..7].parse().ok()?;
    let master_table_version: u8 = rest[7..10].parse().ok()?;
    let local_table_version: u8 = rest[10..13].parse().ok()?;
    let master_table_version_bufr =
        if kind == TableKind::Crex { Some(rest[13..16].parse().ok()?) } else { None };

    Some(Candidate {
        path: path.to_path_buf(),
        kind,
        centre,
        subcentre,
        // The basename has no master-table-number field; it is supplied by
        // the directory's single compiled-in table family and validated by
        // the caller against the request.
        master_table_number: 0,
        master_table_version,
        local_table_version,
        master_table_version_bufr,
    })
}

fn is_acceptable(req: &TableRequest, cand: &Candidate) -> bool {
    if cand.kind != req.kind {
        return false;
    }
    if cand.master_table_number != req.master_table_number {
        return false;
    }
    let version_ok = req.master_table_version == NEWEST || cand.master_table_version >= req.master_table_version;
    if !version_ok {
        return false;
    }
    if req.kind == TableKind::Crex {
        let (Some(req_bufr), Some(cand_bufr)) = (req.master_table_version_bufr, cand.master_table_version_bufr) else {
            return false;
        };
        if req_bufr != NEWEST && cand_bufr < req_bufr {
            return false;
        }
    }
    true
}

fn version_rank(requested: u8, candidate: u8) -> (bool, u8) {
    if requested == NEWEST {
        (true, u8::MAX - candidate)
    } else {
        (false, candidate)
    }
}

fn centre_score(centre: u16) -> u8 {
    match centre {
        0xFFFF => 1,
        0 => 2,
        _ => 0,
    }
}

/// Compare two acceptable candidates per §4.2's five-rule ranking. Returns
/// `Less` when `a` is strictly preferred over `b`.
fn rank_compare(req: &TableRequest, a: &Candidate, b: &Candidate) -> Ordering {
    // Rule 1.
    let (_, ka) = version_rank(req.master_table_version, a.master_table_version);
    let (_, kb) = version_rank(req.master_table_version, b.master_table_version);
    let by_version = ka.cmp(&kb);
    if by_version != Ordering::Equal {
        return by_version;
    }

    // Rule 2 (CREX-vs-CREX only).
    if req.kind == TableKind::Crex {
        if let (Some(req_bufr), Some(a_bufr), Some(b_bufr)) =
            (req.master_table_version_bufr, a.master_table_version_bufr, b.master_table_version_bufr)
        {
            let (_, ka) = version_rank(req_bufr, a_bufr);
            let (_, kb) = version_rank(req_bufr, b_bufr);
            let by_bufr_version = ka.cmp(&kb);
            if by_bufr_version != Ordering::Equal {
                return by_bufr_version;
            }
        }
    }

    // Rule 3: centre match score. If neither candidate is an exact match,
    // the rule forces a tie regardless of rules 4/5.
    let exact_a = a.centre == req.centre;
    let exact_b = b.centre == req.centre;
    if !exact_a && !exact_b {
        return Ordering::Equal;
    }
    let score_a = if exact_a { 3 } else { centre_score(a.centre) };
    let score_b = if exact_b { 3 } else { centre_score(b.centre) };
    let by_centre = score_b.cmp(&score_a); // higher score wins -> smaller ordering
    if by_centre != Ordering::Equal {
        return by_centre;
    }

    // Rule 4: local-table version closest to, but not below, requested;
    // if both are below, the larger (closer to request) wins.
    let local_key = |v: u8| -> (bool, i32) {
        if v >= req.local_table_version {
            (false, i32::from(v) - i32::from(req.local_table_version))
        } else {
            (true, i32::from(req.local_table_version) - i32::from(v))
        }
    };
    let (a_below, a_dist) = local_key(a.local_table_version);
    let (b_below, b_dist) = local_key(b.local_table_version);
    let by_local = match (a_below, b_below) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        _ => a_dist.cmp(&b_dist),
    };
    if by_local != Ordering::Equal {
        return by_local;
    }

    // Rule 5: subcentre exact match wins; otherwise tie.
    let a_subcentre = a.subcentre == req.subcentre;
    let b_subcentre = b.subcentre == req.subcentre;
    match (a_subcentre, b_subcentre) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Scan `dirs` in priority order, collect every basename-matching file, and
/// return the single closest acceptable candidate, if any. Ties (including
/// ties forced by rule 3) are broken by earliest scan order, matching the
/// "first wins" sense of a stable sort over priority-ordered directories.
#[must_use]
pub fn resolve(req: &TableRequest, dirs: &[PathBuf]) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;
    for dir in dirs {
        let Ok(read_dir) = fs::read_dir(dir) else { continue };
        for entry in read_dir.flatten() {
            let path = entry.path();
            let Some(cand) = parse_basename(&path) else { continue };
            let mut cand = cand;
            cand.master_table_number = req.master_table_number;
            if !is_acceptable(req, &cand) {
                continue;
            }
            best = match best {
                None => Some(cand),
                Some(current) => {
                    if rank_compare(req, &cand, &current) == Ordering::Less {
                        Some(cand)
                    } else {
                        Some(current)
                    }
                }
            };
        }
    }
    best
}

/// Build the search path from environment variables, in priority order,
/// followed by the compiled-in default (§6).
#[must_use]
pub fn search_path(default_dir: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(extra) = std::env::var("WREPORT_EXTRA_TABLES") {
        dirs.extend(std::env::split_paths(&extra));
    }
    if let Ok(standard) = std::env::var("WREPORT_TABLES") {
        dirs.extend(std::env::split_paths(&standard));
    }
    dirs.push(default_dir.to_path_buf());
    dirs
}
