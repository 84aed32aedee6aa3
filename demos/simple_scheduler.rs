// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! A tiny end-to-end demonstration of the memoization core: a two-stage
//! "compile" pipeline (count words in a text file, then format the count)
//! run over several independent inputs, dispatched across a worker pool,
//! then run a second time against the same database to show every input
//! become a cache hit.

use memodb::{dst, src, Action, CallHandle, Context, MemoDb, PlainStatusBackend, RoleSet};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::mpsc::channel,
};
use tectonic_errors::prelude::*;
use threadpool::ThreadPool;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct CountWordsArgs {
    input: PathBuf,
}

struct CountWords;

impl Action for CountWords {
    const NAME: &'static str = "count_words";
    const VERSION: &'static str = "1";

    type Args = CountWordsArgs;
    type Result = usize;

    fn roles(args: &Self::Args) -> RoleSet {
        src(&args.input)
    }

    fn run(_ctx: &Context, args: &Self::Args, _handle: &CallHandle) -> Result<Self::Result> {
        let text = fs::read_to_string(&args.input)?;
        Ok(text.split_whitespace().count())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct FormatCountArgs {
    count: usize,
    output: PathBuf,
}

struct FormatCount;

impl Action for FormatCount {
    const NAME: &'static str = "format_count";
    const VERSION: &'static str = "1";

    type Args = FormatCountArgs;
    type Result = ();

    fn roles(args: &Self::Args) -> RoleSet {
        dst(&args.output)
    }

    fn run(_ctx: &Context, args: &Self::Args, _handle: &CallHandle) -> Result<Self::Result> {
        fs::write(&args.output, format!("{} words\n", args.count))?;
        Ok(())
    }
}

fn compile(ctx: &Context, input: &Path, output: &Path) -> Result<usize> {
    let (count, _srcs, _dsts) = ctx.call::<CountWords>(CountWordsArgs {
        input: input.to_path_buf(),
    })?;
    ctx.call::<FormatCount>(FormatCountArgs {
        count,
        output: output.to_path_buf(),
    })?;
    Ok(count)
}

/// Run `compile` over every `(input, output)` pair on a worker pool: each
/// worker gets its own cloned [`Context`] handle into the shared serializer
/// thread, and results are collected back over an `mpsc` channel rather than
/// joined thread handles.
fn compile_all(ctx: &Context, jobs: &[(PathBuf, PathBuf)]) -> Result<Vec<usize>> {
    let n_workers = 4;
    let pool = ThreadPool::new(n_workers);
    let (tx, rx) = channel();

    for (i, (input, output)) in jobs.iter().cloned().enumerate() {
        let ctx = ctx.clone();
        let tx = tx.clone();
        pool.execute(move || {
            let result = compile(&ctx, &input, &output);
            tx.send((i, result)).expect("channel outlives its workers");
        });
    }
    drop(tx);

    let mut counts = vec![None; jobs.len()];
    let mut n_failures = 0;
    for (i, result) in rx.iter() {
        match result {
            Ok(count) => counts[i] = Some(count),
            Err(e) => {
                eprintln!("job {i} failed: {e}");
                n_failures += 1;
            }
        }
    }

    ensure!(n_failures == 0, "{n_failures} out of {} jobs failed", jobs.len());

    Ok(counts.into_iter().map(|c| c.expect("every job either succeeded or was counted as a failure")).collect())
}

fn main() -> Result<()> {
    let mut status = PlainStatusBackend::new("simple_scheduler");

    let workdir = atry!(
        tempfile::tempdir();
        ["failed to create a scratch directory"]
    );
    let db_path = workdir.path().join(".memodb");

    let texts = [
        "the quick brown fox jumps over the lazy dog",
        "pack my box with five dozen liquor jugs",
        "how vexingly quick daft zebras jump",
        "sphinx of black quartz judge my vow",
    ];

    let jobs: Vec<(PathBuf, PathBuf)> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let input = workdir.path().join(format!("input{i}.txt"));
            let output = workdir.path().join(format!("output{i}.txt"));
            fs::write(&input, text)?;
            Ok((input, output))
        })
        .collect::<Result<_>>()?;

    let db = MemoDb::open(&db_path, &mut status)?;
    let ctx = db.context();

    let first = compile_all(&ctx, &jobs)?;
    println!("first pass word counts: {first:?}");

    let second = compile_all(&ctx, &jobs)?;
    println!("second pass word counts: {second:?} (every job should be a cache hit)");

    db.shutdown()?;
    Ok(())
}
