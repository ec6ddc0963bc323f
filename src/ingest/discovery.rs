use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::catalog::{VariableCatalog, VariableRef};
use crate::decode::DecodedMessage;

/// Output of the first pass: everything the writer needs before allocating.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovery {
    /// Distinct timestamps, ascending. One row each.
    pub timestamps: Vec<i64>,
    /// Observed variables in catalog order. One column each.
    pub variables: Vec<VariableRef>,
    /// Observed signal names the variable catalog does not know.
    pub unmapped: BTreeSet<String>,
    /// Frames skipped because their id is missing from the schema catalog.
    pub unknown_ids: BTreeMap<u32, u64>,
    /// Decoded messages seen.
    pub messages: u64,
}

impl Discovery {
    pub fn new(timestamps: Vec<i64>, variables: Vec<VariableRef>) -> Self {
        let timestamps: BTreeSet<i64> = timestamps.into_iter().collect();
        Self {
            timestamps: timestamps.into_iter().collect(),
            variables,
            ..Self::default()
        }
    }

    pub fn rows(&self) -> usize {
        self.timestamps.len()
    }

    pub fn columns(&self) -> usize {
        self.variables.len()
    }

    pub(crate) fn log_summary(&self) {
        for (id, count) in &self.unknown_ids {
            log::warn!("frame id {id:#x} missing from schema catalog ({count} frames skipped)");
        }
        if !self.unmapped.is_empty() {
            log::warn!(
                "{} decoded signals have no variable id and will not be stored: {:?}",
                self.unmapped.len(),
                self.unmapped
            );
        }
        log::info!(
            "Found {} unique variables and {} time points",
            self.columns(),
            self.rows()
        );
    }
}

/// Collect the distinct signal names and timestamps of a decoded stream.
pub fn discover(
    messages: impl IntoIterator<Item = DecodedMessage>,
    catalog: &VariableCatalog,
) -> Discovery {
    let mut names: HashSet<String> = HashSet::new();
    let mut timestamps: BTreeSet<i64> = BTreeSet::new();
    let mut count = 0u64;

    for message in messages {
        count += 1;
        timestamps.insert(message.timestamp);
        for signal in message.signals {
            if !names.contains(&signal.name) {
                names.insert(signal.name);
            }
        }
    }

    let variables = catalog.filter_observed(|name| names.contains(name));
    let unmapped = names
        .into_iter()
        .filter(|name| catalog.by_name(name).is_none())
        .collect();

    Discovery {
        timestamps: timestamps.into_iter().collect(),
        variables,
        unmapped,
        unknown_ids: BTreeMap::new(),
        messages: count,
    }
}
