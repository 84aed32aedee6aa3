// Copyright 2022 the Tectonic Project
// Licensed under the MIT License

//! Resolving the on-disk root that this crate's own state (persistence file,
//! any content-addressed blob store a client builds on top) lives under.
//!
//! Parsing a project's *build* configuration is out of scope here; this is
//! only about where the memoization core's own files go.

use std::{env::current_dir, path::PathBuf};
use tectonic_errors::prelude::*;

/// The root directory under which persistence state lives, absent any more
/// specific configuration supplied by the embedding application.
pub fn get_root() -> Result<PathBuf> {
    Ok(current_dir()?)
}

/// The default path of the persistence file within a root directory.
pub fn default_db_path(root: &std::path::Path) -> PathBuf {
    root.join(".memodb")
}
