// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! An incremental, persistent memoization core for build-system-like tools.
//!
//! An embedding application opens a [`MemoDb`], derives one or more cheap
//! [`Context`] handles from it, and calls memoized operations through
//! [`Context::call`] by implementing [`Action`] for each distinct kind of
//! work. Declared file dependencies are tracked automatically; dependencies
//! only discoverable while a call's body runs are reported through
//! [`CallHandle::add_external_dependencies`] (or the free function of the
//! same name, when a [`CallHandle`] isn't in scope).

mod backend;
mod call_files;
mod calls;
mod config;
mod digest;
mod error;
mod external;
mod files;
mod functions;
mod persist;
mod roles;
mod rpc;
mod status;

pub mod memo;

pub use config::{default_db_path, get_root};
pub use digest::{digest_of_file, digest_of_value, DigestData};
pub use error::MemoError;
pub use external::{add_external_dependencies, CallHandle};
pub use functions::{Action, Functor};
pub use memo::{persistent, Context, MemoDb, Persistent};
pub use roles::{dst, dsts, optional_dst, optional_src, src, srcs, RoleSet};
pub use status::PlainStatusBackend;
