//! Worker pool for read-only DuckDB access.
//!
//! A DuckDB connection must not be used from several threads at once, so the
//! serving layer never shares one. Instead each worker is an OS thread that
//! owns exactly one connection (cloned from a common database handle) for its
//! whole lifetime. Async callers hand closures to the pool and await the
//! result; a long scan blocks only the worker running it.

use crate::error::{Error, Result};
use duckdb::Connection;
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

type Job = Box<dyn FnOnce(&Connection) + Send + 'static>;

/// Pool of worker threads, one connection each
pub struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers, each with its own clone of `conn`.
    pub fn new(conn: Connection, size: usize) -> Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let worker_conn = conn.try_clone()?;
            let receiver = Arc::clone(&receiver);
            let handle = std::thread::Builder::new()
                .name(format!("duckdb-worker-{id}"))
                .spawn(move || worker_loop(id, worker_conn, receiver))?;
            workers.push(handle);
        }
        info!(workers = size, "duckdb.worker_pool.started");

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Run `job` on the next free worker and await its result.
    pub async fn run<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            // the caller may have gone away; nothing to do then
            let _ = tx.send(job(conn));
        });

        self.sender
            .as_ref()
            .ok_or_else(|| Error::Runtime("worker pool is shut down".to_string()))?
            .send(job)
            .map_err(|_| Error::Runtime("worker pool is shut down".to_string()))?;

        rx.await
            .map_err(|_| Error::Runtime("worker dropped the request".to_string()))?
    }
}

fn worker_loop(id: usize, conn: Connection, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) {
    debug!(worker = id, "duckdb.worker.start");
    loop {
        let job = {
            let receiver = receiver.lock();
            receiver.recv()
        };
        match job {
            Ok(job) => {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job(&conn))).is_err() {
                    error!(worker = id, "duckdb.worker.job_panicked");
                }
            }
            Err(_) => break,
        }
    }
    debug!(worker = id, "duckdb.worker.stop");
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // closing the channel makes every worker leave its loop
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
