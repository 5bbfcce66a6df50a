//! Background workers.
//!
//! Two threads run for the lifetime of an open database:
//!
//! - `sepkv-compaction` flushes immutable memtables when a writer rotates
//!   one, and on every `compaction_interval` tick flushes whatever is still
//!   pending and runs one compaction.
//! - `sepkv-gc` runs one value log GC pass every `gc_interval`.
//!
//! Both start ticking after a random delay of up to `startup_jitter`, and
//! exit when the shutdown sender is dropped.

use crate::error::Result;
use crate::DbInner;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use rand::Rng;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Handles of the running workers.
pub(crate) struct Workers {
    shutdown: Option<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Spawns both workers. `flush_rx` receives rotation signals from writers.
    pub(crate) fn start(inner: &Arc<DbInner>, flush_rx: Receiver<()>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let mut handles = Vec::with_capacity(2);

        let db = Arc::clone(inner);
        let shutdown = shutdown_rx.clone();
        handles.push(
            thread::Builder::new()
                .name("sepkv-compaction".to_string())
                .spawn(move || compaction_loop(&db, &shutdown, &flush_rx))?,
        );

        let db = Arc::clone(inner);
        handles.push(
            thread::Builder::new()
                .name("sepkv-gc".to_string())
                .spawn(move || gc_loop(&db, &shutdown_rx))?,
        );

        log::info!("Started background workers");
        Ok(Self { shutdown: Some(shutdown_tx), handles })
    }

    /// Signals both workers and waits for them.
    pub(crate) fn stop(mut self) {
        self.shutdown.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("Background worker panicked");
            }
        }
        log::info!("Stopped background workers");
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

fn compaction_loop(db: &DbInner, shutdown: &Receiver<()>, flush_rx: &Receiver<()>) {
    let opts = db.options();
    let ticker = channel::tick(opts.compaction_interval);
    let start_at = Instant::now() + jitter(opts.startup_jitter);

    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(flush_rx) -> msg => {
                if msg.is_err() {
                    break;
                }
                if let Err(e) = db.flush_immutables() {
                    log::error!("Background flush failed: {}", e);
                }
            }
            recv(ticker) -> _ => {
                if Instant::now() < start_at {
                    continue;
                }
                if let Err(e) = db.flush_immutables() {
                    log::error!("Background flush failed: {}", e);
                }
                // Failures are logged by the job itself and retried next tick.
                let _ = db.compact_once();
            }
        }
    }
}

fn gc_loop(db: &DbInner, shutdown: &Receiver<()>) {
    let opts = db.options();
    let ticker = channel::tick(opts.gc_interval);
    let start_at = Instant::now() + jitter(opts.startup_jitter);

    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(ticker) -> _ => {
                if Instant::now() < start_at {
                    continue;
                }
                let _ = db.run_gc_once();
            }
        }
    }
}
