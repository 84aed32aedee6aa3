// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! Content digesting.
//!
//! The memoization core only needs digest *equality*, not cryptographic
//! strength, but there's no reason not to reuse a well-vetted hash. We use
//! SHA-256 throughout: for file contents, for function/functor identity, and
//! for bound-argument byte strings.

use digest::OutputSizeUser;
use generic_array::GenericArray;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fs,
    io::{self},
    path::Path,
};
use tectonic_errors::prelude::*;

/// The hash algorithm used for all content digests in this crate.
pub type DigestComputer = Sha256;

/// The digest type emitted by [`DigestComputer`] — 32 bytes for SHA-256.
pub type DigestData = GenericArray<u8, <DigestComputer as OutputSizeUser>::OutputSize>;

/// Hash the full contents of a file, streaming it through the digester
/// rather than reading it into memory up front.
pub fn digest_of_file(p: impl AsRef<Path>) -> Result<DigestData> {
    let mut f = fs::File::open(p)?;
    let mut dc = DigestComputer::new();
    io::copy(&mut f, &mut dc)?;
    Ok(dc.finalize())
}

/// Hash an arbitrary `bincode`-serializable value.
///
/// Used for function digests (hash of `NAME` + `VERSION`) and for bound
/// arguments where byte-for-byte equality is all that's required.
pub fn digest_of_value<T: Serialize>(value: &T) -> Result<DigestData> {
    let bytes = bincode::serialize(value)?;
    let mut dc = DigestComputer::new();
    dc.update(&bytes);
    Ok(dc.finalize())
}

/// Serialize a value and verify that decoding it back produces an equal
/// value. Used to enforce data-model invariant 5/6 (no lazy/streaming value
/// may enter the call and file tables) for the one case the type system
/// can't rule out by construction: a value whose `PartialEq` doesn't agree
/// with its serialized form.
pub fn assert_round_trips<T>(value: &T, field: &'static str) -> Result<()>
where
    T: Serialize + for<'de> Deserialize<'de> + PartialEq,
{
    let bytes = bincode::serialize(value)?;
    let back: T = bincode::deserialize(&bytes)?;
    if back != *value {
        return Err(crate::error::MemoError::NotRoundTrippable { field }.into());
    }
    Ok(())
}
