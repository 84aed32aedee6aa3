// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! The backend: owns all six persisted tables and is the only thing allowed
//! to mutate them. Every method here assumes it is being called from the
//! single serializer thread (see [`crate::rpc`]) — the backend itself holds
//! no lock, because the point of the serializer is that none is needed.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tectonic_errors::prelude::*;
use tectonic_status_base::{tt_warning, StatusBackend};

use crate::{
    call_files::CallFileIndex,
    calls::CallTable,
    digest::DigestData,
    external::ExternalDepsIndex,
    files::FileRegistry,
    functions::FunctionRegistry,
    persist,
};

/// Snapshot of everything the backend persists, as one unit, so that
/// `save`/`load` can treat it atomically.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Snapshot {
    pub functions: FunctionRegistry,
    pub function_calls: CallTable,
    pub files: FileRegistry,
    pub call_files: CallFileIndex,
    pub external: ExternalDepsIndex,
}

/// Everything [`Backend::prepare`] hands back to the frontend so it can
/// decide whether a call needs to run.
///
/// Destination paths are never digest-tracked here (only existence-checked,
/// by the frontend, since the backend has no notion of a return-value
/// role) — only declared and external *sources* go through the call-file
/// index. This mirrors the database this design is grounded on, which only
/// ever passes `srcs` into its call-file check.
pub struct PrepareResult {
    pub function_dirty: bool,
    pub call_id: Option<usize>,
    pub old_result: Option<Vec<u8>>,
    /// Declared srcs whose digest differs from what this call last
    /// observed (empty means none changed). Fed straight back into `cache`.
    pub call_file_digests: Vec<(String, DigestData)>,
    /// Externally-declared srcs/dsts recorded by a previous run of this
    /// call, carried forward so the frontend can also report them in its
    /// return value even when the call turns out to be clean.
    pub external_srcs: Vec<String>,
    pub external_dsts: Vec<String>,
    /// Changed-digest subset of `external_srcs`, fed back into `cache`.
    pub external_digests: Vec<(String, DigestData)>,
    /// True if any previously recorded external src changed digest or
    /// went missing.
    pub external_dirty: bool,
}

pub struct Backend {
    snapshot: Snapshot,
}

impl Backend {
    pub fn new() -> Backend {
        Backend {
            snapshot: Snapshot::default(),
        }
    }

    /// Read-only: compute dirtiness, without mutating any table. `srcs`
    /// must all exist — a missing declared source is a hard error, not a
    /// dirtiness signal, since it indicates a misconfigured call rather
    /// than a dependency that simply hasn't been produced yet. Existence
    /// of destination files is checked by the frontend itself (the backend
    /// has no notion of a return-value role).
    pub fn prepare(
        &mut self,
        function_name: &str,
        function_digest: &DigestData,
        bound: &[u8],
        srcs: &[String],
    ) -> Result<PrepareResult> {
        let function_dirty = self.snapshot.functions.check(function_name, function_digest);

        let (call_id, old_result) = match self.snapshot.function_calls.lookup(function_name, bound) {
            Some((id, result)) => (Some(id), Some(result.to_vec())),
            None => (None, None),
        };

        let mut call_file_digests = Vec::new();
        for filename in srcs {
            let probe = atry!(
                self.snapshot.files.probe(filename);
                ["required source `{}` could not be read", filename]
            );
            let check = self.snapshot.call_files.check(
                filename,
                function_name,
                call_id,
                probe.entry.digest,
                probe.changed,
            );
            if check.dirty {
                call_file_digests.push((filename.clone(), check.digest));
            }
        }

        let (external_srcs, external_dsts) = match call_id {
            Some(id) => self.snapshot.external.get(function_name, id),
            None => (Vec::new(), Vec::new()),
        };

        let mut external_dirty = false;
        let mut external_digests = Vec::new();
        for filename in &external_srcs {
            match self.snapshot.files.probe(filename) {
                Ok(probe) => {
                    let check = self.snapshot.call_files.check(
                        filename,
                        function_name,
                        call_id,
                        probe.entry.digest,
                        probe.changed,
                    );
                    if check.dirty {
                        external_dirty = true;
                        external_digests.push((filename.clone(), check.digest));
                    }
                }
                Err(_) => external_dirty = true,
            }
        }

        Ok(PrepareResult {
            function_dirty,
            call_id,
            old_result,
            call_file_digests,
            external_srcs,
            external_dsts,
            external_digests,
            external_dirty,
        })
    }

    /// Apply the outcome of a completed (re)run. `call_file_digests` and
    /// `external_digests` are the changed-subset digests [`Backend::prepare`]
    /// already computed; nothing is re-probed here.
    #[allow(clippy::too_many_arguments)]
    pub fn cache(
        &mut self,
        function_name: &str,
        function_digest: DigestData,
        call_id: Option<usize>,
        bound: Vec<u8>,
        result: Vec<u8>,
        call_file_digests: Vec<(String, DigestData)>,
        external_srcs: std::collections::HashSet<String>,
        external_dsts: std::collections::HashSet<String>,
        external_digests: Vec<(String, DigestData)>,
    ) -> Result<usize> {
        if self.snapshot.functions.check(function_name, &function_digest) {
            self.clear_function(function_name);
        }
        self.snapshot.functions.update(function_name, function_digest);

        let call_id = self
            .snapshot
            .function_calls
            .append_or_replace(function_name, call_id, bound, result);

        for (filename, digest) in call_file_digests.into_iter().chain(external_digests) {
            self.snapshot
                .call_files
                .update(&filename, function_name, call_id, digest);
        }

        self.snapshot
            .external
            .set(function_name, call_id, external_srcs, external_dsts);

        Ok(call_id)
    }

    /// Probe a batch of files (typically ones just discovered as external
    /// dependencies) and return their current digests, without consulting
    /// or updating the call-file index. Unlike `prepare`'s source handling,
    /// a missing file here is simply skipped rather than an error, since a
    /// dynamically-declared dependency legitimately might not exist yet
    /// (it could itself be a destination the call just created).
    pub fn probe_files(&mut self, filenames: &[String]) -> Result<Vec<(String, DigestData)>> {
        let mut out = Vec::new();
        for f in filenames {
            if let Ok(probe) = self.snapshot.files.probe(f) {
                out.push((f.clone(), probe.entry.digest));
            }
        }
        Ok(out)
    }

    pub fn clear_function(&mut self, function_name: &str) {
        self.snapshot.function_calls.clear_function(function_name);
        self.snapshot.functions.clear(function_name);
        self.snapshot.call_files.clear_function(function_name);
        self.snapshot.external.clear_function(function_name);
    }

    pub fn clear_file(&mut self, filename: &str) {
        self.snapshot.files.clear(filename);
        self.snapshot.call_files.clear_file(filename);
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        persist::save_snapshot(path, &self.snapshot)
    }

    pub fn load(path: &Path, status: &mut dyn StatusBackend) -> Result<Backend> {
        match persist::load_snapshot(path) {
            Ok(snapshot) => Ok(Backend { snapshot }),
            Err(e) => {
                tt_warning!(status, "starting with an empty memoization database"; e);
                Ok(Backend::new())
            }
        }
    }
}

impl Default for Backend {
    fn default() -> Backend {
        Backend::new()
    }
}
