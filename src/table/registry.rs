//! Process-wide table registry (§4.2, §9 "Global table registry"): the
//! tabledir search path is built once from the environment, then every
//! `(master table, centre, subcentre, version, local version)` tuple is
//! resolved and parsed at most once and cached behind a reader-writer
//! lock — concurrent readers, a loader acquires the lock only to insert
//! (§5 "Shared-resource policy").

use crate::error::{Error, Result};
use crate::table::resolver::{self, TableKind, TableRequest};
use crate::table::{Dtable, Vartable};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static SEARCH_PATH: OnceCell<Vec<PathBuf>> = OnceCell::new();

fn search_path(default_dir: &Path) -> &'static [PathBuf] {
    SEARCH_PATH.get_or_init(|| resolver::search_path(default_dir))
}

type CacheKey = (u8, u16, u16, u8, u8);

#[derive(Debug, Default)]
struct Cache {
    vartables: HashMap<CacheKey, Arc<Vartable>>,
    dtables: HashMap<CacheKey, Arc<Dtable>>,
}

static CACHE: OnceCell<RwLock<Cache>> = OnceCell::new();

fn cache() -> &'static RwLock<Cache> {
    CACHE.get_or_init(|| RwLock::new(Cache::default()))
}

/// Resolve and parse (or return the already-cached) B-table/D-table pair
/// for one identification tuple. `default_dir` is the compiled-in
/// fallback search directory (§6); environment overrides take priority.
pub fn load(
    default_dir: &Path,
    master_table_number: u8,
    centre: u16,
    subcentre: u16,
    master_table_version: u8,
    local_table_version: u8,
) -> Result<(Arc<Vartable>, Arc<Dtable>)> {
    let key = (master_table_number, centre, subcentre, master_table_version, local_table_version);
    {
        let guard = cache().read();
        if let (Some(v), Some(d)) = (guard.vartables.get(&key), guard.dtables.get(&key)) {
            return Ok((v.clone(), d.clone()));
        }
    }

    let dirs = search_path(default_dir);
    let base = TableRequest {
        kind: TableKind::Bufr,
        centre,
        subcentre,
        master_table_number,
        master_table_version,
        local_table_version,
        master_table_version_bufr: None,
    };
    let b = resolver::resolve(&base, dirs).ok_or_else(|| {
        Error::NotFound(format!(
            "no BUFR B-table matches centre {centre} master table {master_table_number} version {master_table_version}"
        ))
    })?;
    let vartable = Arc::new(Vartable::parse_bufr(&b.path.display().to_string(), &std::fs::read_to_string(&b.path)?)?);

    let d_req = TableRequest { kind: TableKind::Dtable, ..base };
    let d = resolver::resolve(&d_req, dirs).ok_or_else(|| {
        Error::NotFound(format!(
            "no D-table matches centre {centre} master table {master_table_number} version {master_table_version}"
        ))
    })?;
    let dtable = Arc::new(Dtable::parse(&d.path.display().to_string(), &std::fs::read_to_string(&d.path)?)?);

    let mut guard = cache().write();
    let vartable = guard.vartables.entry(key).or_insert(vartable).clone();
    let dtable = guard.dtables.entry(key).or_insert(dtable).clone();
    Ok((vartable, dtable))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_caches_the_same_arc_across_calls() {
        let dir = std::env::temp_dir().join(format!("bufr_registry_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("B0970000099000.txt"), "").unwrap();
        std::fs::write(dir.join("D0970000099000.txt"), "").unwrap();

        let (v1, d1) = load(&dir, 0, 97, 0, 99, 0).unwrap();
        let (v2, d2) = load(&dir, 0, 97, 0, 99, 0).unwrap();
        assert!(Arc::ptr_eq(&v1, &v2));
        assert!(Arc::ptr_eq(&d1, &d2));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
