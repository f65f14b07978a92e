//! Column metadata merging.
//!
//! Callers may supply metadata overrides for the parsed schema (corrected
//! units, descriptions, ignore flags) before it is handed to downstream
//! normalization. The merge policy is explicit rather than a recursive
//! merge over untyped dictionaries.

use std::collections::{btree_map::Entry, BTreeMap};

use serde::{Deserialize, Serialize};

/// One metadata value: a scalar or a list of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Text(String),
    Number(f64),
    Flag(bool),
    List(Vec<MetaValue>),
}

/// Metadata for a single column, keyed by field name.
pub type Metadata = BTreeMap<String, MetaValue>;

/// How colliding keys are resolved by [`merge_metadata`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePolicy {
    /// Keep the value already present in the base map.
    KeepExisting,
    /// Replace the base value with the incoming one.
    #[default]
    Overwrite,
    /// Collect both values into a list, preserving order of arrival.
    AppendAsList,
}

/// Merge `incoming` into `base`. Keys absent from `base` are always
/// inserted; colliding keys follow `policy`.
pub fn merge_metadata(base: &mut Metadata, incoming: Metadata, policy: MergePolicy) {
    for (key, value) in incoming {
        match base.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(mut slot) => match policy {
                MergePolicy::KeepExisting => {}
                MergePolicy::Overwrite => {
                    slot.insert(value);
                }
                MergePolicy::AppendAsList => match slot.get_mut() {
                    MetaValue::List(items) => items.push(value),
                    other => {
                        let existing = std::mem::replace(other, MetaValue::List(Vec::new()));
                        *other = MetaValue::List(vec![existing, value]);
                    }
                },
            },
        }
    }
}
