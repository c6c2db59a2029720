//! The replicated key-value state machine.

use std::collections::{BTreeMap, HashMap};

use crate::types::Entry;

/// A deterministic state machine fed committed log entries in index order.
pub trait StateMachine: Send {
    /// Apply one committed entry.
    fn apply(&mut self, entry: &Entry);

    /// Read the current value of `key`.
    fn get(&self, key: &str) -> Option<&str>;

    /// Full contents in key order, for introspection and comparison.
    fn dump(&self) -> BTreeMap<String, String>;
}

/// Key → value map mutated only by applying committed `put`s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvStateMachine {
    data: HashMap<String, String>,
}

impl KvStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl StateMachine for KvStateMachine {
    fn apply(&mut self, entry: &Entry) {
        self.data.insert(entry.key.clone(), entry.value.clone());
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    fn dump(&self) -> BTreeMap<String, String> {
        self.data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
