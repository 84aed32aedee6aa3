// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! A minimal [`StatusBackend`] for embedding this crate in a larger build
//! tool's console output. Diagnostics from the cache layer (a corrupted
//! persistence file, a stale lock, a dirty-reason trace) go through here
//! rather than `eprintln!`, so a host application can route them anywhere it
//! likes by supplying its own backend instead.

use std::io::Write;
use tectonic_errors::Error;
use tectonic_status_base::{MessageKind, StatusBackend};

/// Prints notes, warnings, and errors to stderr with a `[memodb]` prefix.
///
/// This is deliberately unfancy (no color, no TTY detection) — it exists so
/// the crate has a working default, not as a polished CLI experience, since
/// console presentation is a client concern.
pub struct PlainStatusBackend {
    context: String,
}

impl PlainStatusBackend {
    pub fn new<C: ToString>(context: C) -> PlainStatusBackend {
        PlainStatusBackend {
            context: context.to_string(),
        }
    }
}

impl StatusBackend for PlainStatusBackend {
    fn report(&mut self, kind: MessageKind, args: std::fmt::Arguments<'_>, err: Option<&Error>) {
        let prefix = match kind {
            MessageKind::Note => "note",
            MessageKind::Warning => "warning",
            MessageKind::Error => "error",
        };

        let _ = writeln!(
            std::io::stderr(),
            "[memodb:{}] {}: {}",
            self.context,
            prefix,
            args
        );

        if let Some(e) = err {
            for item in e.chain() {
                let _ = writeln!(std::io::stderr(), "[memodb:{}]   caused by: {}", self.context, item);
            }
        }
    }

    fn dump_error_logs(&mut self, output: &[u8]) {
        let _ = std::io::stderr().write_all(output);
    }
}
