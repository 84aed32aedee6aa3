// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! Error types for the memoization core.
//!
//! Most fallible operations here return [`tectonic_errors::Result`], the same
//! context-chaining `anyhow`-flavored `Result` used throughout this project,
//! so that failures picked up from the filesystem or from a user action can
//! have human-readable context attached with [`tectonic_errors::anyhow::Context`].
//! The handful of failures that are *usage* errors rather than environmental
//! ones (calling an API outside of its required context, feeding it a
//! corrupt persistence file) are a distinct enum, [`MemoError`], so call
//! sites can match on them instead of pattern-matching a message string.

use thiserror::Error;

/// A usage or data error specific to the memoization core.
///
/// These are wrapped into a [`tectonic_errors::Error`] via `From` so they can
/// flow through the same `Result` type as every other failure in this crate,
/// while still being recoverable with `.downcast_ref::<MemoError>()` at call
/// sites that care about the distinction (see [`crate::external`]).
#[derive(Debug, Error)]
pub enum MemoError {
    /// `add_external_dependencies` was called from a thread that is not
    /// currently executing the body of a cached call.
    #[error("add_external_dependencies called outside of an active cached call")]
    NoActiveCall,

    /// The persistence file's magic tag or format version was not recognized.
    #[error("unrecognized persistence file format (expected magic {expected:?}, found {found:?})")]
    UnsupportedFormat { expected: &'static [u8], found: Vec<u8> },

    /// The persistence file was truncated or otherwise malformed.
    #[error("corrupt persistence file: {0}")]
    Corrupt(String),

    /// A bound-argument or result value failed to round-trip through
    /// serialization with the same value, which would silently break the
    /// memoization table's equality checks.
    #[error("value for `{field}` did not round-trip through serialization")]
    NotRoundTrippable { field: &'static str },
}
