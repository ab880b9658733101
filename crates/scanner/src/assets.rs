use std::collections::BTreeMap;
use std::sync::Arc;

use hue_marshal::{Hashable, ObjectHash};
use hue_types::ColorDefinition;

/// Signed amounts of several colors, keyed by definition hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetMap {
    amounts: BTreeMap<ObjectHash, (Arc<ColorDefinition>, i128)>,
}

impl AssetMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, definition: &Arc<ColorDefinition>, amount: i128) {
        let entry = self
            .amounts
            .entry(definition.hash())
            .or_insert_with(|| (definition.clone(), 0));

        entry.1 += amount;
    }

    /// Amount of the color, zero if absent.
    pub fn get(&self, definition: &ColorDefinition) -> i128 {
        self.amounts
            .get(&definition.hash())
            .map_or(0, |(_, amount)| *amount)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<ColorDefinition>, i128)> {
        self.amounts
            .values()
            .map(|(definition, amount)| (definition, *amount))
    }

    pub fn len(&self) -> usize {
        self.amounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    /// Drop colors whose amount is zero.
    pub fn without_zeros(mut self) -> Self {
        self.amounts.retain(|_, (_, amount)| *amount != 0);
        self
    }
}
