// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! The file registry: tracks `(mtime, content digest)` per file and decides
//! whether a file has changed since it was last probed.
//!
//! This table is owned by [`crate::backend::Backend`] and is only ever
//! touched from the serializer thread; it has no locking of its own.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tectonic_errors::prelude::*;

use crate::digest::{digest_of_file, DigestData};

/// How long after a file's mtime we still refuse to trust a plain mtime
/// comparison, and fall back to rehashing. Many filesystems only record
/// mtimes to 1-second resolution, so a file edited within a second of a
/// previous probe could keep the same observed mtime despite having
/// different content.
const MTIME_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct FileEntry {
    pub mtime: f64,
    pub digest: DigestData,
}

fn mtime_secs(p: &Path) -> Result<f64> {
    let md = fs::metadata(p)?;
    let mtime = md.modified()?;
    Ok(mtime
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64())
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FileRegistry {
    files: HashMap<String, FileEntry>,
}

/// Outcome of probing a file: whether it changed since the last probe (or
/// this is the first time we've seen it), plus its current entry. A
/// not-found file is surfaced as an error; the caller (the backend's
/// `prepare` path) is responsible for interpreting that as external
/// dirtiness rather than propagating it to the user.
pub struct ProbeResult {
    pub changed: bool,
    pub entry: FileEntry,
}

impl FileRegistry {
    pub fn new() -> FileRegistry {
        FileRegistry::default()
    }

    /// Check whether `filename` has changed since it was last probed,
    /// updating the stored entry as needed.
    pub fn probe(&mut self, filename: &str) -> Result<ProbeResult> {
        let path = Path::new(filename);
        let now_mtime = mtime_secs(path)
            .with_context(|| format!("failed to stat `{filename}`"))?;

        let Some(prev) = self.files.get(filename).copied() else {
            let digest = digest_of_file(path)
                .with_context(|| format!("failed to digest `{filename}`"))?;
            let entry = FileEntry { mtime: now_mtime, digest };
            self.files.insert(filename.to_string(), entry);
            return Ok(ProbeResult { changed: true, entry });
        };

        let now_wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        if prev.mtime == now_mtime && now_wall - now_mtime >= MTIME_GRACE.as_secs_f64() {
            return Ok(ProbeResult {
                changed: false,
                entry: prev,
            });
        }

        let digest = digest_of_file(path)
            .with_context(|| format!("failed to digest `{filename}`"))?;

        if digest == prev.digest {
            let entry = FileEntry { mtime: now_mtime, digest };
            self.files.insert(filename.to_string(), entry);
            return Ok(ProbeResult {
                changed: false,
                entry,
            });
        }

        self.clear(filename);
        let entry = FileEntry { mtime: now_mtime, digest };
        self.files.insert(filename.to_string(), entry);
        Ok(ProbeResult { changed: true, entry })
    }

    /// Forget everything we know about `filename`. The caller
    /// ([`crate::backend::Backend::clear_file`]) is responsible for also
    /// clearing the call-file index entries that reference it, per the
    /// coupled-clear invariant.
    pub fn clear(&mut self, filename: &str) {
        self.files.remove(filename);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::{io::Write, thread, time::Duration as StdDuration};

    #[test]
    fn first_probe_reports_changed() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"one").unwrap();
        f.flush().unwrap();

        let mut reg = FileRegistry::new();
        let r = reg.probe(f.path().to_str().unwrap()).unwrap();
        assert!(r.changed);
    }

    #[test]
    fn unchanged_content_is_reported_clean_after_grace_window() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"one").unwrap();
        f.flush().unwrap();
        let path = f.path().to_str().unwrap().to_string();

        let mut reg = FileRegistry::new();
        reg.probe(&path).unwrap();

        // Backdate the mtime so we're safely outside the 1s grace window
        // without needing to sleep in a test.
        let old = FileTime::from_unix_time(1_600_000_000, 0);
        set_file_mtime(&path, old).unwrap();
        // Re-probe once to record that backdated mtime as "previous".
        reg.probe(&path).unwrap();

        let r = reg.probe(&path).unwrap();
        assert!(!r.changed);
    }

    #[test]
    fn changed_content_is_reported_dirty() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"one").unwrap();
        f.flush().unwrap();
        let path = f.path().to_str().unwrap().to_string();

        let mut reg = FileRegistry::new();
        reg.probe(&path).unwrap();

        let old = FileTime::from_unix_time(1_600_000_000, 0);
        set_file_mtime(&path, old).unwrap();
        reg.probe(&path).unwrap();

        f.as_file_mut().write_all(b"two").unwrap();
        f.flush().unwrap();
        // Bump mtime forward so this isn't mistaken for the same backdated
        // stamp; real edits always produce a new mtime.
        thread::sleep(StdDuration::from_millis(1));
        let newer = FileTime::from_unix_time(1_600_000_500, 0);
        set_file_mtime(&path, newer).unwrap();

        let r = reg.probe(&path).unwrap();
        assert!(r.changed);
    }

    #[test]
    fn missing_file_is_an_error() {
        let mut reg = FileRegistry::new();
        assert!(reg.probe("/nonexistent/path/that/should/not/exist").is_err());
    }
}
