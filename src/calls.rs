// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! The call table: per function, an append-only list of
//! `(bound_arguments, result)` records.
//!
//! Calls are stored type-erased as `bincode`-encoded byte strings so that
//! one table can hold records for every [`crate::functions::Action`]
//! implementation in the program; the frontend (`crate::memo`) is
//! responsible for encoding/decoding on the way in and out. Bound-argument
//! equality is therefore byte equality, which is exactly what data model §3
//! calls for given a deterministic encoder.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CallRecord {
    pub bound: Vec<u8>,
    pub result: Vec<u8>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CallTable {
    calls: HashMap<String, Vec<CallRecord>>,
}

impl CallTable {
    pub fn new() -> CallTable {
        CallTable::default()
    }

    /// Linear scan for a record whose bound arguments equal `bound`.
    /// Acceptable because the number of *distinct argument combinations*
    /// seen by one function is expected to stay small.
    pub fn lookup(&self, function: &str, bound: &[u8]) -> Option<(usize, &[u8])> {
        let list = self.calls.get(function)?;
        list.iter()
            .enumerate()
            .find(|(_, rec)| rec.bound == bound)
            .map(|(i, rec)| (i, rec.result.as_slice()))
    }

    /// Append a new record, or overwrite the one at `call_id` if given.
    /// Returns the record's (possibly newly assigned) call id.
    pub fn append_or_replace(
        &mut self,
        function: &str,
        call_id: Option<usize>,
        bound: Vec<u8>,
        result: Vec<u8>,
    ) -> usize {
        let list = self.calls.entry(function.to_string()).or_default();
        match call_id {
            Some(id) if id < list.len() => {
                list[id] = CallRecord { bound, result };
                id
            }
            _ => {
                list.push(CallRecord { bound, result });
                list.len() - 1
            }
        }
    }

    pub fn clear_function(&mut self, function: &str) {
        self.calls.remove(function);
    }

    pub fn len(&self, function: &str) -> usize {
        self.calls.get(function).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_misses_on_unknown_function() {
        let t = CallTable::new();
        assert!(t.lookup("f", b"anything").is_none());
    }

    #[test]
    fn append_then_lookup_round_trips() {
        let mut t = CallTable::new();
        let id = t.append_or_replace("f", None, b"args1".to_vec(), b"result1".to_vec());
        assert_eq!(id, 0);
        let (found_id, result) = t.lookup("f", b"args1").unwrap();
        assert_eq!(found_id, 0);
        assert_eq!(result, b"result1");
    }

    #[test]
    fn call_ids_are_contiguous_across_distinct_args() {
        let mut t = CallTable::new();
        let id0 = t.append_or_replace("f", None, b"a".to_vec(), b"1".to_vec());
        let id1 = t.append_or_replace("f", None, b"b".to_vec(), b"2".to_vec());
        assert_eq!((id0, id1), (0, 1));
        assert_eq!(t.len("f"), 2);
    }

    #[test]
    fn replace_overwrites_in_place() {
        let mut t = CallTable::new();
        let id = t.append_or_replace("f", None, b"a".to_vec(), b"1".to_vec());
        let id2 = t.append_or_replace("f", Some(id), b"a".to_vec(), b"2".to_vec());
        assert_eq!(id, id2);
        assert_eq!(t.len("f"), 1);
        let (_, result) = t.lookup("f", b"a").unwrap();
        assert_eq!(result, b"2");
    }

    #[test]
    fn clear_function_drops_all_its_calls() {
        let mut t = CallTable::new();
        t.append_or_replace("f", None, b"a".to_vec(), b"1".to_vec());
        t.clear_function("f");
        assert_eq!(t.len("f"), 0);
        assert!(t.lookup("f", b"a").is_none());
    }
}
