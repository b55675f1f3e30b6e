use std::collections::HashMap;

/// Function id → instruction entry index.
///
/// Lookups are constant-time; iteration and serialization follow insertion
/// order, which is what the `.obc` container stores.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FnTable {
    entries: Vec<(u32, u64)>,
    index: HashMap<u32, usize>,
}

impl FnTable {
    pub fn new() -> FnTable {
        FnTable::default()
    }

    /// Registers `id` at `inst_index`. Re-registering an id replaces its
    /// entry in place.
    pub fn insert(&mut self, id: u32, inst_index: u64) {
        match self.index.get(&id) {
            Some(&slot) => self.entries[slot].1 = inst_index,
            None => {
                self.index.insert(id, self.entries.len());
                self.entries.push((id, inst_index));
            }
        }
    }

    pub fn get(&self, id: u32) -> Option<u64> {
        self.index.get(&id).map(|&slot| self.entries[slot].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(id, instruction index)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.entries.iter().cloned()
    }

    /// Ids of functions whose entry is at `inst_index`, in insertion order.
    /// The disassembler uses this to print `FN` directives.
    pub fn ids_at(&self, inst_index: u64) -> impl Iterator<Item = u32> + '_ {
        self.entries
            .iter()
            .filter(move |&&(_, entry)| entry == inst_index)
            .map(|&(id, _)| id)
    }
}
