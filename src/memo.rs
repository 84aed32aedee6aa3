// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! The frontend: the public `call()` entry point, the `MemoDb` handle that
//! owns the serializer and persistence path, and the `Persistent<P>`
//! wrapper for "construct once per distinct configuration" objects.

use std::{
    any::Any,
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, OnceLock},
};
use tectonic_errors::prelude::*;
use tectonic_status_base::StatusBackend;

use crate::{
    backend::Backend,
    external::{ActiveCallGuard, CallHandle},
    functions::{digest_for_call, Action},
    rpc::{Serializer, SerializerHandle},
};

/// Carried by every call as its first formal parameter. Holds whatever a
/// client needs to run an action's body — here, just a handle back into the
/// same database, so actions can themselves call other memoized actions.
/// Never serialized, never compared for equality: it has no bearing on a
/// call's identity.
#[derive(Clone)]
pub struct Context {
    serializer: Serializer,
}

impl Context {
    pub fn call<A: Action>(&self, args: A::Args) -> Result<(A::Result, Vec<PathBuf>, Vec<PathBuf>)> {
        let (result, srcs, dsts, _ran) = call::<A>(self, &self.serializer, args)?;
        Ok((result, srcs, dsts))
    }
}

fn to_strings(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.to_string_lossy().into_owned()).collect()
}

fn to_paths(strings: &[String]) -> Vec<PathBuf> {
    strings.iter().map(PathBuf::from).collect()
}

fn missing_any(existing_check: impl Fn(&str) -> bool, paths: &[String]) -> bool {
    paths.iter().any(|p| !existing_check(p))
}

/// The central algorithm: memoize one invocation of `A`. The trailing `bool`
/// reports whether the body actually ran (as opposed to a cache hit) — not
/// part of the public contract, but needed internally by [`persistent`] to
/// know whether its identity cache is still current.
fn call<A: Action>(
    ctx: &Context,
    serializer: &Serializer,
    args: A::Args,
) -> Result<(A::Result, Vec<PathBuf>, Vec<PathBuf>, bool)> {
    crate::digest::assert_round_trips(&args, "args")?;

    let function_digest = digest_for_call::<A>(&args)?;
    let bound = bincode::serialize(&args)?;
    let roles = A::roles(&args);
    let src_strs = to_strings(&roles.srcs);
    let dst_strs = to_strings(&roles.dsts);

    let function_name = A::NAME.to_string();
    let prep = {
        let function_name = function_name.clone();
        let function_digest = function_digest;
        let bound = bound.clone();
        let src_strs = src_strs.clone();
        serializer.submit(move |backend: &mut Backend| {
            backend.prepare(&function_name, &function_digest, &bound, &src_strs)
        })?
    };

    let mut dirty = prep.function_dirty
        || prep.call_id.is_none()
        || !prep.call_file_digests.is_empty()
        || prep.external_dirty;

    let old_decoded: Option<A::Result> = match &prep.old_result {
        Some(bytes) => Some(bincode::deserialize(bytes)?),
        None => None,
    };

    if !dirty {
        let ext_dst_paths = prep.external_dsts.clone();
        let return_dsts = old_decoded
            .as_ref()
            .map(|r| to_strings(&A::result_role(r)))
            .unwrap_or_default();

        let exists = |p: &str| Path::new(p).exists();
        if missing_any(exists, &dst_strs)
            || missing_any(exists, &ext_dst_paths)
            || missing_any(exists, &return_dsts)
        {
            dirty = true;
        }
    }

    if !dirty {
        let result = old_decoded.expect("clean call must have a cached result");
        let mut all_srcs = roles.srcs.clone();
        all_srcs.extend(to_paths(&prep.external_srcs));
        let mut all_dsts = roles.dsts.clone();
        all_dsts.extend(to_paths(&prep.external_dsts));
        all_dsts.extend(A::result_role(&result));
        return Ok((result, all_srcs, all_dsts, false));
    }

    let guard = ActiveCallGuard::install();
    let handle = CallHandle::new();
    let run_result = A::run(ctx, &args, &handle);
    let (ext_srcs, ext_dsts) = guard.finish();

    let result = run_result?; // propagates without touching any table on error
    crate::digest::assert_round_trips(&result, "result")?;

    let result_bytes = bincode::serialize(&result)?;
    let return_dsts = A::result_role(&result);

    let external_files: Vec<String> = ext_srcs.iter().chain(ext_dsts.iter()).cloned().collect();

    let external_file_digests =
        serializer.submit(move |backend: &mut Backend| backend.probe_files(&external_files))?;
    let call_file_digests = prep.call_file_digests.clone();

    let prior_call_id = prep.call_id;
    let _call_id = serializer.submit({
        let ext_srcs: HashSet<String> = ext_srcs.clone();
        let ext_dsts: HashSet<String> = ext_dsts.clone();
        move |backend: &mut Backend| {
            backend.cache(
                &function_name,
                function_digest,
                prior_call_id,
                bound,
                result_bytes,
                call_file_digests,
                ext_srcs,
                ext_dsts,
                external_file_digests,
            )
        }
    })?;

    let mut all_srcs = roles.srcs;
    all_srcs.extend(to_paths(&ext_srcs.into_iter().collect::<Vec<_>>()));
    let mut all_dsts = roles.dsts;
    all_dsts.extend(to_paths(&ext_dsts.into_iter().collect::<Vec<_>>()));
    all_dsts.extend(return_dsts);

    Ok((result, all_srcs, all_dsts, true))
}

/// Owns the serializer thread and the persistence path. This is the handle
/// an embedding application constructs once at startup.
pub struct MemoDb {
    handle: SerializerHandle,
    path: PathBuf,
}

impl MemoDb {
    /// Load `path` if it exists (starting empty, with a warning, if it's
    /// missing or corrupt) and spawn the serializer thread.
    pub fn open(path: impl Into<PathBuf>, status: &mut dyn StatusBackend) -> Result<MemoDb> {
        let path = path.into();
        let backend = if path.exists() {
            Backend::load(&path, status)?
        } else {
            Backend::new()
        };
        Ok(MemoDb {
            handle: SerializerHandle::spawn(backend),
            path,
        })
    }

    /// A [`Context`] suitable for passing to [`call`]. Cheap to clone;
    /// construct as many as convenient, one per worker thread is typical.
    pub fn context(&self) -> Context {
        Context {
            serializer: self.handle.serializer(),
        }
    }

    pub fn call<A: Action>(&self, ctx: &Context, args: A::Args) -> Result<(A::Result, Vec<PathBuf>, Vec<PathBuf>)> {
        ctx.call::<A>(args)
    }

    pub fn clear_function(&self, function_name: &str) {
        let name = function_name.to_string();
        self.handle.serializer().submit(move |b| b.clear_function(&name));
    }

    pub fn clear_file(&self, filename: &str) {
        let name = filename.to_string();
        self.handle.serializer().submit(move |b| b.clear_file(&name));
    }

    pub fn save(&self) -> Result<()> {
        let path = self.path.clone();
        self.handle.serializer().submit(move |b| b.save(&path))
    }

    /// Save once more and join the serializer thread.
    pub fn shutdown(self) -> Result<()> {
        let path = self.path.clone();
        let backend = self.handle.shutdown()?;
        backend.save(&path)
    }
}

/// A type whose instances should be constructed at most once per distinct
/// set of constructor arguments, with the instance itself persisted and
/// reused across processes — the static-language equivalent of the
/// original's `PersistentObject` base class.
pub trait Persistent {
    const NAME: &'static str;
    const VERSION: &'static str;

    type Args: serde::Serialize + serde::de::DeserializeOwned + PartialEq + Clone;
    type Instance: serde::Serialize + serde::de::DeserializeOwned + Clone;

    fn construct(ctx: &Context, args: &Self::Args, handle: &CallHandle) -> Result<Self::Instance>;
}

/// Bridges a [`Persistent`] type to the generic [`Action`] machinery so it
/// can go through the same `call()` path.
pub struct PersistentAction<P>(std::marker::PhantomData<P>);

impl<P: Persistent> Action for PersistentAction<P> {
    const NAME: &'static str = P::NAME;
    const VERSION: &'static str = P::VERSION;
    type Args = P::Args;
    type Result = P::Instance;

    fn roles(_args: &Self::Args) -> crate::roles::RoleSet {
        crate::roles::RoleSet::new()
    }

    fn run(ctx: &Context, args: &Self::Args, handle: &CallHandle) -> Result<Self::Instance> {
        P::construct(ctx, args, handle)
    }
}

/// Process-local cache of constructed [`Persistent`] instances, keyed by
/// `(P::NAME, bound_args)` — the same thing that determines a distinct
/// call within the persisted call table. Lets repeated construction with
/// equal arguments within one process return the very same `Instance`
/// value (not just an equal one) whenever the underlying call turns out
/// clean, which matters when `Instance` itself wraps a handle whose
/// identity, not just its value, is meaningful to hold onto (e.g. an
/// `Arc`-based resource). This sits entirely on top of the persisted
/// layer below it: the persisted `call` path is still the one source of
/// truth for whether a (re)construction is needed.
type InstanceKey = (&'static str, Vec<u8>);
type InstanceCache = Mutex<HashMap<InstanceKey, Arc<dyn Any + Send + Sync>>>;

fn instance_cache() -> &'static InstanceCache {
    static CACHE: OnceLock<InstanceCache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Construct (or fetch the cached instance of) `P` for `args`.
pub fn persistent<P>(ctx: &Context, args: P::Args) -> Result<P::Instance>
where
    P: Persistent,
    P::Instance: Send + Sync + 'static,
{
    let bound = bincode::serialize(&args)?;
    let key: InstanceKey = (P::NAME, bound);

    let (instance, _srcs, _dsts, ran) = call::<PersistentAction<P>>(ctx, &ctx.serializer, args)?;

    if !ran {
        if let Some(cached) = instance_cache().lock().unwrap().get(&key) {
            if let Some(instance) = cached.downcast_ref::<P::Instance>() {
                return Ok(instance.clone());
            }
        }
    }

    instance_cache()
        .lock()
        .unwrap()
        .insert(key, Arc::new(instance.clone()) as Arc<dyn Any + Send + Sync>);
    Ok(instance)
}
