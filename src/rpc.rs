// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! The RPC serializer: a dedicated thread that owns the [`Backend`] and
//! drains a request queue. Every mutation (and, for simplicity, every read)
//! of the backend's tables goes through here, so the backend itself never
//! needs any locking of its own — callers submit a job and block on its
//! reply, the same channel-based worker-communication idiom this project
//! already uses for its build-action thread pool.

use std::{
    sync::mpsc::{self, Sender},
    thread::{self, JoinHandle},
};
use tectonic_errors::prelude::*;

use crate::backend::Backend;

type Job = Box<dyn FnOnce(&mut Backend) + Send>;

/// Handle to the backend-owning worker thread. Cloning a `Serializer`
/// shares the same underlying worker; every clone's requests are
/// interleaved in submission order by the one thread that actually runs
/// them.
#[derive(Clone)]
pub struct Serializer {
    tx: Sender<Job>,
}

/// Owns the worker thread and the sending half of its queue. Dropping this
/// (or calling [`SerializerHandle::shutdown`]) closes the queue, which lets
/// the worker thread exit its loop and return the final [`Backend`] state,
/// useful for a last `save` at shutdown.
pub struct SerializerHandle {
    serializer: Serializer,
    handle: Option<JoinHandle<Backend>>,
}

impl SerializerHandle {
    pub fn spawn(backend: Backend) -> SerializerHandle {
        let (tx, rx) = mpsc::channel::<Job>();

        let handle = thread::spawn(move || {
            let mut backend = backend;
            for job in rx {
                job(&mut backend);
            }
            backend
        });

        SerializerHandle {
            serializer: Serializer { tx },
            handle: Some(handle),
        }
    }

    pub fn serializer(&self) -> Serializer {
        self.serializer.clone()
    }

    /// Close the queue and wait for the worker to exit, returning its final
    /// backend state so the caller can perform one last `save`. Any
    /// [`Serializer`] clones obtained via [`SerializerHandle::serializer`]
    /// must be dropped first, or the queue never closes and this blocks.
    pub fn shutdown(mut self) -> Result<Backend> {
        let handle = self.handle.take().expect("shutdown called more than once");
        drop(self.serializer.tx);
        handle
            .join()
            .map_err(|_| anyhow!("serializer worker thread panicked"))
    }
}

impl Serializer {
    /// Run `f` on the worker thread with exclusive access to the backend,
    /// blocking until it completes.
    pub fn submit<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Backend) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();
        let job: Job = Box::new(move |backend| {
            let result = f(backend);
            let _ = reply_tx.send(result);
        });
        self.tx
            .send(job)
            .expect("serializer worker thread is gone");
        reply_rx
            .recv()
            .expect("serializer worker thread dropped the reply channel")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_runs_against_shared_backend_state() {
        let handle = SerializerHandle::spawn(Backend::new());
        let s = handle.serializer();

        s.submit(|b| {
            b.clear_function("f"); // no-op, just exercises the round trip
        });

        let dirty = s.submit(|b| {
            let d = crate::digest::digest_of_value(&"x").unwrap();
            b.prepare("f", &d, b"args", &[]).unwrap().function_dirty
        });
        assert!(dirty);

        handle.shutdown().unwrap();
    }

    #[test]
    fn clones_share_the_same_worker() {
        let handle = SerializerHandle::spawn(Backend::new());
        let s1 = handle.serializer();
        let s2 = s1.clone();

        s1.submit(|b| {
            let d = crate::digest::digest_of_value(&"x").unwrap();
            b.cache(
                "f",
                d,
                None,
                b"a".to_vec(),
                b"1".to_vec(),
                vec![],
                Default::default(),
                Default::default(),
                vec![],
            )
            .unwrap();
        });

        let seen = s2.submit(|b| {
            let d = crate::digest::digest_of_value(&"x").unwrap();
            b.prepare("f", &d, b"a", &[]).unwrap().call_id
        });
        assert_eq!(seen, Some(0));

        handle.shutdown().unwrap();
    }
}
