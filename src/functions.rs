// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! Function identity and the function registry.
//!
//! In the original design a function's identity and digest come from
//! runtime reflection over its source text. A statically-typed target has
//! no such thing at the layer this code runs at, so identity is pinned down
//! at compile time instead: each cached action is a type implementing
//! [`Action`] at a single, fixed `impl` site, and its digest is derived from
//! its name plus a developer-maintained version string. [`Functor`] covers
//! the companion case of a configuration-carrying callable that knows its
//! own digest.

use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::HashMap,
    sync::{Mutex, OnceLock},
};
use tectonic_errors::prelude::*;

use crate::{digest::DigestData, roles::RoleSet};

/// A cached build action, implemented once per distinct operation.
///
/// `Args` is the bound-argument record (data model §3): it must be plain,
/// owned, serializable data, which rules out lazy/streaming values by
/// construction (invariant 5). The same holds for `Result`.
pub trait Action {
    /// Stable identity of this action. Must not collide with any other
    /// `Action` registered in the same database.
    const NAME: &'static str;

    /// Bumped by the action's author whenever its behavior changes in a way
    /// that should invalidate previously cached calls. This is the static
    /// substitute for "hash of the function's source text".
    const VERSION: &'static str;

    type Args: Serialize + DeserializeOwned + PartialEq + Clone;
    type Result: Serialize + DeserializeOwned + Clone;

    /// Partition `args` into source and destination paths for dirtiness
    /// tracking. Most actions list one or two fields here; actions with no
    /// file inputs/outputs (like a pure computation) can return
    /// `RoleSet::new()`.
    fn roles(args: &Self::Args) -> RoleSet;

    /// If the result itself names a destination path (or paths), return
    /// them here so they're checked for existence like any other dst. Most
    /// actions that already declare their output path via `roles` don't
    /// need this; it exists for actions whose output location is only known
    /// after running (e.g. a content-addressed output path).
    fn result_role(_result: &Self::Result) -> Vec<std::path::PathBuf> {
        Vec::new()
    }

    /// Run the action body. `handle` lets the body register dependencies
    /// discovered only at runtime (see [`crate::external::CallHandle`]).
    fn run(
        ctx: &crate::memo::Context,
        args: &Self::Args,
        handle: &crate::external::CallHandle,
    ) -> Result<Self::Result>;

    /// An action whose identity is carried by a configuration value in
    /// `args` rather than a fixed `VERSION` returns it here; its
    /// [`Functor::functor_digest`] is used in place of hashing `NAME` +
    /// `VERSION`. Most actions don't need this.
    fn functor(_args: &Self::Args) -> Option<&dyn Functor> {
        None
    }
}

/// A configuration-carrying callable that supplies its own digest rather
/// than relying on a fixed `VERSION` string — for actions whose identity
/// depends on runtime configuration (e.g. "format with this compiler at
/// this optimization level").
pub trait Functor {
    /// A digest stable across processes for equal configurations, and
    /// different for differing ones. Typically `digest_of_value` over the
    /// functor's own fields.
    fn functor_digest(&self) -> Result<DigestData>;
}

/// Compute the digest for a compile-time-known `Action`, independent of any
/// registry state. Pure and cheap enough to call on every invocation.
pub fn digest_for_action<A: Action>() -> Result<DigestData> {
    crate::digest::digest_of_value(&(A::NAME, A::VERSION))
}

/// In-process cache of ordinary actions' digests, keyed by `NAME` rather
/// than by value, so a hot call loop doesn't re-hash the same two static
/// strings on every invocation. Guarded by its own mutex, separate from the
/// persisted [`FunctionRegistry`], since it's read from every calling
/// thread rather than only the serializer thread.
static DIGEST_CACHE: OnceLock<Mutex<HashMap<&'static str, DigestData>>> = OnceLock::new();

fn digest_cache() -> &'static Mutex<HashMap<&'static str, DigestData>> {
    DIGEST_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn cached_digest_for_action<A: Action>() -> Result<DigestData> {
    if let Some(d) = digest_cache().lock().unwrap().get(A::NAME) {
        return Ok(*d);
    }
    let d = digest_for_action::<A>()?;
    digest_cache().lock().unwrap().insert(A::NAME, d);
    Ok(d)
}

/// The digest to use for one invocation of `A` with the given arguments:
/// the functor's own digest if `A::functor` supplies one (never cached,
/// since a functor value is only as stable as the arguments it was read
/// from), otherwise the cached `NAME`+`VERSION` digest.
pub fn digest_for_call<A: Action>(args: &A::Args) -> Result<DigestData> {
    match A::functor(args) {
        Some(f) => f.functor_digest(),
        None => cached_digest_for_action::<A>(),
    }
}

/// The function registry: function name -> last-known digest.
///
/// Detecting a digest mismatch is `check`'s job; actually clearing the
/// dependent tables on a dirty transition is the backend's job (§3
/// invariant 3 spans multiple tables the registry doesn't own).
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct FunctionRegistry {
    digests: HashMap<String, DigestData>,
}

impl FunctionRegistry {
    pub fn new() -> FunctionRegistry {
        FunctionRegistry::default()
    }

    /// Is `name` dirty relative to `digest`? Does not mutate the table;
    /// callers update via [`FunctionRegistry::update`] once they've decided
    /// how to handle the dirty transition.
    pub fn check(&self, name: &str, digest: &DigestData) -> bool {
        match self.digests.get(name) {
            None => true,
            Some(prev) => prev != digest,
        }
    }

    pub fn update(&mut self, name: &str, digest: DigestData) {
        self.digests.insert(name.to_string(), digest);
    }

    pub fn clear(&mut self, name: &str) {
        self.digests.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_function_is_dirty() {
        let reg = FunctionRegistry::new();
        let d = crate::digest::digest_of_value(&"x").unwrap();
        assert!(reg.check("f", &d));
    }

    #[test]
    fn matching_digest_is_clean() {
        let mut reg = FunctionRegistry::new();
        let d = crate::digest::digest_of_value(&"x").unwrap();
        reg.update("f", d);
        assert!(!reg.check("f", &d));
    }

    #[test]
    fn mismatched_digest_is_dirty() {
        let mut reg = FunctionRegistry::new();
        let d1 = crate::digest::digest_of_value(&"x").unwrap();
        let d2 = crate::digest::digest_of_value(&"y").unwrap();
        reg.update("f", d1);
        assert!(reg.check("f", &d2));
    }
}
