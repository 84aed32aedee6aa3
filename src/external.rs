// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! The external-dependency index and the mechanism an action body uses to
//! populate it.
//!
//! A build-time dependency only discoverable while an action's body runs
//! (e.g. a preprocessor reading an `#include`) can't be declared up front
//! via [`crate::functions::Action::roles`]. Instead, the frontend passes
//! each action body an explicit [`CallHandle`], backed by thread-local
//! storage scoped to the body's execution. A free function,
//! [`add_external_dependencies`], is also provided for code that finds
//! threading a handle through several layers of plain helper functions
//! awkward; both forms write into the same accumulator.

use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    path::PathBuf,
};
use tectonic_errors::prelude::*;

use crate::error::MemoError;

/// Per function, per call, the sets of source and destination paths that
/// were declared dynamically from inside the call body rather than via its
/// static argument roles.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExternalDepsIndex {
    srcs: HashMap<String, HashMap<usize, HashSet<String>>>,
    dsts: HashMap<String, HashMap<usize, HashSet<String>>>,
}

impl ExternalDepsIndex {
    pub fn new() -> ExternalDepsIndex {
        ExternalDepsIndex::default()
    }

    pub fn get(&self, function: &str, call_id: usize) -> (Vec<String>, Vec<String>) {
        let srcs = self
            .srcs
            .get(function)
            .and_then(|m| m.get(&call_id))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        let dsts = self
            .dsts
            .get(function)
            .and_then(|m| m.get(&call_id))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        (srcs, dsts)
    }

    pub fn set(&mut self, function: &str, call_id: usize, srcs: HashSet<String>, dsts: HashSet<String>) {
        self.srcs
            .entry(function.to_string())
            .or_default()
            .insert(call_id, srcs);
        self.dsts
            .entry(function.to_string())
            .or_default()
            .insert(call_id, dsts);
    }

    pub fn clear_function(&mut self, function: &str) {
        self.srcs.remove(function);
        self.dsts.remove(function);
    }
}

#[derive(Default)]
struct Accumulator {
    srcs: HashSet<String>,
    dsts: HashSet<String>,
}

thread_local! {
    static ACTIVE: RefCell<Vec<Accumulator>> = RefCell::new(Vec::new());
}

/// Installed by the frontend for the duration of one dirty call's body
/// execution. A call body that itself calls another memoized action nests
/// a fresh guard on top of the thread's accumulator stack, so an inner
/// call's dependencies are attributed to the inner call and the outer
/// call's own accumulator is left untouched and restored once the inner
/// guard finishes — a push/pop stack standing in for the original's
/// stack-walk, which attributed deps to the nearest enclosing call. Only a
/// call body that spawns its *own* threads falls outside this tracking,
/// since the stack is thread-local.
pub struct ActiveCallGuard {
    finished: std::cell::Cell<bool>,
}

impl ActiveCallGuard {
    pub fn install() -> ActiveCallGuard {
        ACTIVE.with(|a| a.borrow_mut().push(Accumulator::default()));
        ActiveCallGuard {
            finished: std::cell::Cell::new(false),
        }
    }

    /// Consume the guard, returning everything accumulated during its
    /// lifetime (not including any nested call's accumulator, which was
    /// already popped and returned to that call's own guard).
    pub fn finish(self) -> (HashSet<String>, HashSet<String>) {
        self.finished.set(true);
        ACTIVE.with(|a| {
            let acc = a.borrow_mut().pop().unwrap_or_default();
            (acc.srcs, acc.dsts)
        })
    }
}

impl Drop for ActiveCallGuard {
    fn drop(&mut self) {
        if !self.finished.get() {
            ACTIVE.with(|a| {
                a.borrow_mut().pop();
            });
        }
    }
}

/// A handle passed to an [`crate::functions::Action::run`] body, used to
/// register dependencies discovered only at runtime.
pub struct CallHandle {
    _private: (),
}

impl CallHandle {
    pub(crate) fn new() -> CallHandle {
        CallHandle { _private: () }
    }

    pub fn add_external_dependencies(
        &self,
        srcs: impl IntoIterator<Item = PathBuf>,
        dsts: impl IntoIterator<Item = PathBuf>,
    ) -> Result<()> {
        add_external_dependencies(srcs, dsts)
    }
}

/// Free-function form of [`CallHandle::add_external_dependencies`], for
/// code that doesn't have a handle threaded through to it. Fails with
/// [`MemoError::NoActiveCall`] if called from a thread that isn't currently
/// running inside a dirty call's body.
pub fn add_external_dependencies(
    srcs: impl IntoIterator<Item = PathBuf>,
    dsts: impl IntoIterator<Item = PathBuf>,
) -> Result<()> {
    ACTIVE.with(|a| {
        let mut guard = a.borrow_mut();
        match guard.last_mut() {
            None => Err(MemoError::NoActiveCall.into()),
            Some(acc) => {
                acc.srcs
                    .extend(srcs.into_iter().map(|p| p.to_string_lossy().into_owned()));
                acc.dsts
                    .extend(dsts.into_iter().map(|p| p.to_string_lossy().into_owned()));
                Ok(())
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outside_a_call_is_an_error() {
        let err = add_external_dependencies(vec![PathBuf::from("h.txt")], vec![]);
        assert!(err.is_err());
    }

    #[test]
    fn inside_a_call_accumulates_and_is_returned_on_finish() {
        let guard = ActiveCallGuard::install();
        add_external_dependencies(vec![PathBuf::from("h.txt")], vec![PathBuf::from("o.txt")]).unwrap();
        let (srcs, dsts) = guard.finish();
        assert!(srcs.contains("h.txt"));
        assert!(dsts.contains("o.txt"));
    }

    #[test]
    fn nested_calls_each_keep_their_own_accumulator() {
        let outer = ActiveCallGuard::install();
        add_external_dependencies(vec![PathBuf::from("outer.txt")], vec![]).unwrap();

        let inner = ActiveCallGuard::install();
        add_external_dependencies(vec![PathBuf::from("inner.txt")], vec![]).unwrap();
        let (inner_srcs, _) = inner.finish();
        assert!(inner_srcs.contains("inner.txt"));
        assert!(!inner_srcs.contains("outer.txt"));

        add_external_dependencies(vec![PathBuf::from("outer2.txt")], vec![]).unwrap();
        let (outer_srcs, _) = outer.finish();
        assert!(outer_srcs.contains("outer.txt"));
        assert!(outer_srcs.contains("outer2.txt"));
        assert!(!outer_srcs.contains("inner.txt"));
    }

    #[test]
    fn index_round_trips_through_get_and_set() {
        let mut idx = ExternalDepsIndex::new();
        let mut srcs = HashSet::new();
        srcs.insert("h.txt".to_string());
        idx.set("pp", 0, srcs, HashSet::new());
        let (s, d) = idx.get("pp", 0);
        assert_eq!(s, vec!["h.txt".to_string()]);
        assert!(d.is_empty());
    }

    #[test]
    fn clear_function_drops_its_entries() {
        let mut idx = ExternalDepsIndex::new();
        idx.set("pp", 0, HashSet::new(), HashSet::new());
        idx.clear_function("pp");
        let (s, d) = idx.get("pp", 0);
        assert!(s.is_empty() && d.is_empty());
    }
}
