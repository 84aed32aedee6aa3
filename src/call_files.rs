// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! The call-file index: for each file a call declared as a source or
//! destination, remembers the file's digest at the time of that call, so a
//! later call can tell whether the file has since changed.
//!
//! Keyed outer-to-inner as `filename -> function -> call_id -> digest`,
//! matching data model §3, so that [`crate::backend::Backend::clear_file`]
//! (coupled-clear invariant 4) is a single outer-key removal.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::digest::DigestData;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CallFileIndex {
    by_file: HashMap<String, HashMap<String, HashMap<usize, DigestData>>>,
}

/// Outcome of checking one file against one call's recorded digest.
pub struct CheckResult {
    /// True if this call must be considered dirty on account of this file.
    pub dirty: bool,
    /// The file's current digest, suitable for recording via `update`.
    pub digest: DigestData,
}

impl CallFileIndex {
    pub fn new() -> CallFileIndex {
        CallFileIndex::default()
    }

    /// `call_id` is `None` when the function/arguments have never been
    /// cached before, in which case every declared file is trivially dirty.
    /// `probe_changed` is whatever [`crate::files::FileRegistry::probe`]
    /// reported for this file independent of any call — if the call's
    /// recorded digest happens to still match, we fall back to that signal
    /// rather than assume clean, since a digest collision racing a global
    /// first-sight is possible right after a database reload.
    pub fn check(
        &self,
        filename: &str,
        function: &str,
        call_id: Option<usize>,
        current_digest: DigestData,
        probe_changed: bool,
    ) -> CheckResult {
        let Some(call_id) = call_id else {
            return CheckResult {
                dirty: true,
                digest: current_digest,
            };
        };

        let stored = self
            .by_file
            .get(filename)
            .and_then(|by_fn| by_fn.get(function))
            .and_then(|by_call| by_call.get(&call_id));

        match stored {
            None => CheckResult {
                dirty: true,
                digest: current_digest,
            },
            Some(prev) if *prev == current_digest => CheckResult {
                dirty: probe_changed,
                digest: current_digest,
            },
            Some(_) => CheckResult {
                dirty: true,
                digest: current_digest,
            },
        }
    }

    pub fn update(&mut self, filename: &str, function: &str, call_id: usize, digest: DigestData) {
        self.by_file
            .entry(filename.to_string())
            .or_default()
            .entry(function.to_string())
            .or_default()
            .insert(call_id, digest);
    }

    pub fn clear_file(&mut self, filename: &str) {
        self.by_file.remove(filename);
    }

    pub fn clear_function(&mut self, function: &str) {
        self.by_file.retain(|_, by_fn| {
            by_fn.remove(function);
            !by_fn.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(n: u8) -> DigestData {
        crate::digest::digest_of_value(&n).unwrap()
    }

    #[test]
    fn no_call_id_is_always_dirty() {
        let idx = CallFileIndex::new();
        let r = idx.check("f.txt", "wc", None, d(1), false);
        assert!(r.dirty);
    }

    #[test]
    fn unseen_file_for_a_known_call_is_dirty() {
        let idx = CallFileIndex::new();
        let r = idx.check("f.txt", "wc", Some(0), d(1), false);
        assert!(r.dirty);
    }

    #[test]
    fn matching_digest_is_clean() {
        let mut idx = CallFileIndex::new();
        idx.update("f.txt", "wc", 0, d(1));
        let r = idx.check("f.txt", "wc", Some(0), d(1), false);
        assert!(!r.dirty);
    }

    #[test]
    fn matching_digest_but_fresh_global_probe_is_still_dirty() {
        let mut idx = CallFileIndex::new();
        idx.update("f.txt", "wc", 0, d(1));
        let r = idx.check("f.txt", "wc", Some(0), d(1), true);
        assert!(r.dirty);
    }

    #[test]
    fn changed_digest_is_dirty() {
        let mut idx = CallFileIndex::new();
        idx.update("f.txt", "wc", 0, d(1));
        let r = idx.check("f.txt", "wc", Some(0), d(2), false);
        assert!(r.dirty);
    }

    #[test]
    fn clear_file_removes_all_functions_referencing_it() {
        let mut idx = CallFileIndex::new();
        idx.update("f.txt", "wc", 0, d(1));
        idx.update("f.txt", "other", 0, d(1));
        idx.clear_file("f.txt");
        let r = idx.check("f.txt", "wc", Some(0), d(1), false);
        assert!(r.dirty);
    }

    #[test]
    fn clear_function_only_removes_that_functions_entries() {
        let mut idx = CallFileIndex::new();
        idx.update("f.txt", "wc", 0, d(1));
        idx.update("f.txt", "other", 0, d(1));
        idx.clear_function("wc");
        assert!(idx.check("f.txt", "wc", Some(0), d(1), false).dirty);
        assert!(!idx.check("f.txt", "other", Some(0), d(1), false).dirty);
    }
}
