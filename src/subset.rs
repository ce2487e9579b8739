//! `Subset`: an ordered, index-stable sequence of `Var`.

use crate::error::Result;
use crate::var::Var;
use crate::varinfo::Varinfo;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Subset {
    vars: Vec<Var>,
}

impl Subset {
    #[must_use]
    pub fn new() -> Self {
        Subset { vars: Vec::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Var> {
        self.vars.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Var> {
        self.vars.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Var> {
        self.vars.iter()
    }

    /// Append an already-built `Var`.
    pub fn store(&mut self, var: Var) {
        self.vars.push(var);
    }

    pub fn store_undef(&mut self, info: Arc<Varinfo>) {
        self.vars.push(Var::new_unset(info));
    }

    pub fn store_int(&mut self, info: Arc<Varinfo>, raw: i32) -> Result<()> {
        let mut var = Var::new_unset(info);
        var.set_int(raw)?;
        self.vars.push(var);
        Ok(())
    }

    pub fn store_decimal(&mut self, info: Arc<Varinfo>, value: f64) -> Result<()> {
        let mut var = Var::new_unset(info);
        var.set_decimal(value)?;
        self.vars.push(var);
        Ok(())
    }

    pub fn store_binary(&mut self, info: Arc<Varinfo>, bytes: Vec<u8>) {
        self.vars.push(Var::new_binary(info, bytes));
    }
}

impl<'a> IntoIterator for &'a Subset {
    type Item = &'a Var;
    type IntoIter = std::slice::Iter<'a, Var>;
    fn into_iter(self) -> Self::IntoIter {
        self.vars.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varcode::Varcode;
    use crate::varinfo::Varinfo;

    fn info(code: Varcode) -> Arc<Varinfo> {
        Arc::new(Varinfo::set_bufr(code, "TEST", "M", 0, 0, 8).unwrap())
    }

    #[test]
    fn store_int_rejects_out_of_domain_values() {
        let mut subset = Subset::new();
        let narrow = info(Varcode::new(0, 1, 1));
        assert!(subset.store_int(narrow, 1 << 20).is_err());
        assert!(subset.is_empty());
    }

    #[test]
    fn store_preserves_insertion_order() {
        let mut subset = Subset::new();
        subset.store_undef(info(Varcode::new(0, 1, 1)));
        subset.store_int(info(Varcode::new(0, 1, 2)), 5).unwrap();
        subset.store_binary(info(Varcode::new(0, 1, 3)), vec![1, 2]);
        assert_eq!(subset.len(), 3);
        assert_eq!(subset.get(1).unwrap().enqi(), Some(5));
    }
}
