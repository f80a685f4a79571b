use shared::{
    index_transform,
    range_parse,
    Result,
};

use crate::core::error::AnalysisError;


/// Ordered set of atoms taking part in one stage of the analysis, tied to the total number of
/// atoms it was built for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtomSubset {
    natoms:  usize,
    indices: Vec<usize>,
}


impl AtomSubset {
    pub fn all(natoms: usize) -> Self {
        Self { natoms, indices: (0 .. natoms).collect() }
    }


    pub fn from_mask(mask: &[bool]) -> Self {
        let indices = mask.iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect();
        Self { natoms: mask.len(), indices }
    }


    /// 0-based indices, kept in the given order.
    pub fn from_indices(indices: Vec<usize>, natoms: usize) -> Result<Self> {
        if let Some(&i) = indices.iter().find(|&&i| i >= natoms) {
            return Err(AnalysisError::shape("atom subset", format!("indices < {}", natoms), i).into());
        }
        Ok(Self { natoms, indices })
    }


    /// Parse a selection like `"1..20 25 -1"`: 1-based, negative counts from the end and `0`
    /// selects everything.
    pub fn from_ranges(input: &str, natoms: usize) -> Result<Self> {
        let indices = index_transform(range_parse(input)?, natoms)?;
        Self::from_indices(indices, natoms)
    }


    pub fn indices(&self) -> &[usize] { &self.indices }
    pub fn len(&self) -> usize { self.indices.len() }
    pub fn is_empty(&self) -> bool { self.indices.is_empty() }
    pub fn natoms(&self) -> usize { self.natoms }


    pub fn mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.natoms];
        self.indices.iter().for_each(|&i| mask[i] = true);
        mask
    }


    pub fn check_natoms(&self, natoms: usize, what: &str) -> Result<()> {
        if self.natoms != natoms {
            return Err(AnalysisError::shape(what, self.natoms, natoms).into());
        }
        Ok(())
    }
}


/// Atoms used to compute the superposition (`fit`) and atoms whose data is reported
/// (`report`). Both refer to the same atom list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub fit:    AtomSubset,
    pub report: AtomSubset,
}


impl Selection {
    pub fn new(fit: AtomSubset, report: AtomSubset) -> Result<Self> {
        let ret = Self { fit, report };
        ret.check_natoms(ret.fit.natoms())?;
        Ok(ret)
    }

    pub fn uniform(subset: AtomSubset) -> Self {
        Self { fit: subset.clone(), report: subset }
    }

    pub fn natoms(&self) -> usize { self.fit.natoms() }


    /// Both subsets refer to `natoms` atoms and select at least one of them.
    pub fn check_natoms(&self, natoms: usize) -> Result<()> {
        self.fit.check_natoms(natoms, "fit subset")?;
        self.report.check_natoms(natoms, "report subset")?;
        for (what, subset) in [("fit subset", &self.fit), ("report subset", &self.report)] {
            if subset.is_empty() {
                return Err(AnalysisError::shape(what, ">= 1 selected atom", 0).into());
            }
        }
        Ok(())
    }
}
