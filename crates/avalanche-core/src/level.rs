//! Flat arena of energy levels across all species.
//!
//! Every level of every dopant gets a stable, contiguous [`LevelHandle`]
//! assigned once at arena construction; all rate matrices and population
//! vectors are indexed by this handle.

use std::fmt;

use crate::material::Material;

/// Stable identifier for one energy level in the flattened system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelHandle(u32);

impl LevelHandle {
    /// Create a handle from a raw index.
    pub fn new(index: u32) -> Self {
        LevelHandle(index)
    }

    /// Raw index into the flat population vector.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LevelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One record in the flat level arena.
#[derive(Debug, Clone)]
pub struct LevelRecord {
    /// Index of the owning species within the material.
    pub species: usize,
    /// Level index within the owning species (0 = ground).
    pub local: usize,
    /// Display name, `"{species_symbol}:{level_name}"`.
    pub display_name: String,
}

/// Immutable bijection between (species, local level) pairs and handles.
///
/// Built once from a [`Material`] snapshot; handles are assigned in
/// species order, then level order, so each species occupies a contiguous
/// block starting at its ground level.
#[derive(Debug, Clone)]
pub struct LevelArena {
    records: Vec<LevelRecord>,
    /// Per-species offset of the ground level in the flat vector.
    offsets: Vec<usize>,
}

impl LevelArena {
    /// Flatten all levels of all species in the material.
    pub fn from_material(material: &Material) -> Self {
        let mut records = Vec::with_capacity(material.total_levels());
        let mut offsets = Vec::with_capacity(material.dopants.len());

        for (species_idx, species) in material.dopants.iter().enumerate() {
            offsets.push(records.len());
            for level in &species.levels {
                records.push(LevelRecord {
                    species: species_idx,
                    local: level.index,
                    display_name: format!("{}:{}", species.symbol, level.name),
                });
            }
        }

        Self { records, offsets }
    }

    /// Total number of levels.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the arena holds no levels.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of species.
    pub fn num_species(&self) -> usize {
        self.offsets.len()
    }

    /// Handle for a (species, local level) pair, if the level exists.
    pub fn handle(&self, species: usize, local: usize) -> Option<LevelHandle> {
        let offset = *self.offsets.get(species)?;
        let global = offset + local;
        let record = self.records.get(global)?;
        // Local index past the species' block lands in the next species.
        if record.species != species {
            return None;
        }
        Some(LevelHandle::new(global as u32))
    }

    /// Handle of a species' ground level.
    pub fn ground(&self, species: usize) -> Option<LevelHandle> {
        self.handle(species, 0)
    }

    /// Record backing a handle.
    pub fn record(&self, handle: LevelHandle) -> &LevelRecord {
        &self.records[handle.index()]
    }

    /// Iterate over all records in handle order.
    pub fn records(&self) -> impl Iterator<Item = &LevelRecord> {
        self.records.iter()
    }

    /// Display names of all levels in handle order.
    pub fn display_names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.display_name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Species;

    fn two_species_material() -> Material {
        let mut material = Material::new("arena-test", "NaYF4");

        let mut tm = Species::new("Tm3+", 1e21);
        tm.add_level("3H6", 0.0, 13);
        tm.add_level("3F4", 5600.0, 9);
        tm.add_level("3H4", 12600.0, 9);
        material.add_species(tm);

        let mut yb = Species::new("Yb3+", 2e21);
        yb.add_level("2F7/2", 0.0, 8);
        yb.add_level("2F5/2", 10200.0, 6);
        material.add_species(yb);

        material
    }

    #[test]
    fn test_handles_are_contiguous_per_species() {
        let arena = LevelArena::from_material(&two_species_material());

        assert_eq!(arena.len(), 5);
        assert_eq!(arena.num_species(), 2);
        assert_eq!(arena.handle(0, 0).unwrap().index(), 0);
        assert_eq!(arena.handle(0, 2).unwrap().index(), 2);
        assert_eq!(arena.handle(1, 0).unwrap().index(), 3);
        assert_eq!(arena.handle(1, 1).unwrap().index(), 4);
    }

    #[test]
    fn test_bijection_round_trip() {
        let arena = LevelArena::from_material(&two_species_material());

        for (expected, record) in arena.records().enumerate() {
            let handle = arena.handle(record.species, record.local).unwrap();
            assert_eq!(handle.index(), expected);
        }
    }

    #[test]
    fn test_out_of_range_references() {
        let arena = LevelArena::from_material(&two_species_material());

        // Level 3 of species 0 would alias species 1's ground level.
        assert!(arena.handle(0, 3).is_none());
        assert!(arena.handle(2, 0).is_none());
        assert!(arena.handle(1, 2).is_none());
    }

    #[test]
    fn test_display_names() {
        let arena = LevelArena::from_material(&two_species_material());
        let names = arena.display_names();

        assert_eq!(names[0], "Tm3+:3H6");
        assert_eq!(names[3], "Yb3+:2F7/2");
    }

    #[test]
    fn test_ground_handles() {
        let arena = LevelArena::from_material(&two_species_material());

        assert_eq!(arena.ground(0).unwrap().index(), 0);
        assert_eq!(arena.ground(1).unwrap().index(), 3);
    }
}
