use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Secondary index declarations for one document.
///
/// Maps an index name to the set of values the document is indexed under.
/// A name may carry several values and each value may be composite.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    indexes: BTreeMap<String, BTreeSet<Value>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` under index `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.indexes
            .entry(name.into())
            .or_default()
            .insert(value.into());
    }

    /// Builder form of [`Metadata::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&BTreeSet<Value>> {
        self.indexes.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(String::as_str)
    }

    /// Every `(name, value)` pair, ordered by name then value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.indexes
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v)))
    }

    /// Number of `(name, value)` pairs.
    pub fn len(&self) -> usize {
        self.indexes.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut metadata = Self::new();
        for (name, value) in iter {
            metadata.insert(name, value);
        }
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_valued_index() {
        let metadata = Metadata::new()
            .with("Symbols", "alpha")
            .with("Symbols", "beta")
            .with("Numbers", Value::of(["gamma", "delta"]));

        assert_eq!(metadata.len(), 3);
        assert_eq!(metadata.get("Symbols").map(BTreeSet::len), Some(2));
        assert_eq!(metadata.names().collect::<Vec<_>>(), ["Numbers", "Symbols"]);
    }

    #[test]
    fn duplicate_values_collapse() {
        let metadata: Metadata = [("Name", "x"), ("Name", "x")].into_iter().collect();
        assert_eq!(metadata.len(), 1);
    }

    #[test]
    fn empty_name_set_counts_as_empty() {
        let metadata = Metadata::new();
        assert!(metadata.is_empty());
        assert_eq!(metadata.iter().count(), 0);
    }
}
