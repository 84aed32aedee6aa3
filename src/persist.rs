// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! On-disk persistence format and the atomic write dance.
//!
//! The format is a fixed magic tag and format version ahead of a single
//! `bincode`-encoded payload, so a reader can reject an unrecognized format
//! before attempting to decode it, independent of whatever serde backend a
//! future revision might switch to.
//!
//! Saving goes through three steps so that a crash at any point leaves
//! either the old or the new snapshot loadable, never a half-written one:
//! write the new snapshot to `<path>.tmp`, move any existing `<path>` to
//! `<path>.old`, then rename `<path>.tmp` to `<path>` and drop `<path>.old`.

use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
};
use tectonic_errors::prelude::*;

use crate::{backend::Snapshot, error::MemoError};

const MAGIC: &[u8; 8] = b"MEMODB01";
const FORMAT_VERSION: u32 = 1;

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

fn old_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".old");
    PathBuf::from(s)
}

pub fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let tmp = tmp_path(path);

    {
        let mut f = atry!(
            fs::File::create(&tmp);
            ["failed to create temporary file `{}`", tmp.display()]
        );
        f.write_all(MAGIC)?;
        f.write_all(&FORMAT_VERSION.to_le_bytes())?;
        let payload = bincode::serialize(snapshot)?;
        f.write_all(&payload)?;
        f.flush()?;
    }

    let old = old_path(path);
    if path.exists() {
        atry!(
            fs::rename(path, &old);
            ["failed to move `{}` aside to `{}`", path.display(), old.display()]
        );
    }

    atry!(
        fs::rename(&tmp, path);
        ["failed to rename `{}` into place at `{}`", tmp.display(), path.display()]
    );

    if old.exists() {
        // Best-effort: if this fails, a stale `.old` file just lingers for
        // next time; it doesn't threaten correctness since `path` is
        // already the authoritative snapshot.
        let _ = fs::remove_file(&old);
    }

    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let mut f = atry!(
        fs::File::open(path);
        ["failed to open persistence file `{}`", path.display()]
    );

    let mut magic = [0u8; 8];
    f.read_exact(&mut magic)
        .map_err(|_| MemoError::Corrupt("file shorter than the format header".into()))?;
    if &magic != MAGIC {
        return Err(MemoError::UnsupportedFormat {
            expected: MAGIC,
            found: magic.to_vec(),
        }
        .into());
    }

    let mut version_bytes = [0u8; 4];
    f.read_exact(&mut version_bytes)
        .map_err(|_| MemoError::Corrupt("file truncated after magic".into()))?;
    let version = u32::from_le_bytes(version_bytes);
    if version != FORMAT_VERSION {
        return Err(MemoError::UnsupportedFormat {
            expected: MAGIC,
            found: version_bytes.to_vec(),
        }
        .into());
    }

    let mut rest = Vec::new();
    f.read_to_end(&mut rest)?;
    bincode::deserialize(&rest).map_err(|e| MemoError::Corrupt(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        let mut snap = Snapshot::default();
        let d = crate::digest::digest_of_value(&"x").unwrap();
        snap.functions.update("f", d);

        save_snapshot(&path, &snap).unwrap();
        let loaded = load_snapshot(&path).unwrap();
        assert!(!loaded.functions.check("f", &d));
    }

    #[test]
    fn save_leaves_no_old_or_tmp_behind_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        save_snapshot(&path, &Snapshot::default()).unwrap();
        save_snapshot(&path, &Snapshot::default()).unwrap();
        assert!(!tmp_path(&path).exists());
        assert!(!old_path(&path).exists());
        assert!(path.exists());
    }

    #[test]
    fn truncated_file_is_a_corrupt_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        fs::write(&path, b"MEM").unwrap();
        assert!(load_snapshot(&path).is_err());
    }

    #[test]
    fn wrong_magic_is_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        fs::write(&path, b"NOTADB!!extra bytes here").unwrap();
        let err = load_snapshot(&path).unwrap_err();
        assert!(err.downcast_ref::<MemoError>().is_some());
    }
}
