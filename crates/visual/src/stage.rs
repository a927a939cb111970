// Copyright 2025-2026 CEMAXECUTER LLC

//! Stage scheduling.
//!
//! A stage owns one input queue and a fan-out of output queues. Each stage
//! runs on its own named thread and only pulls new input when none of its
//! outputs still holds an unconsumed result, so a slow consumer stalls the
//! stage instead of letting buffers pile up. Output queues are bounded; with
//! capacity 1 that is exactly "one pending result per consumer".

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::pool::Shared;

/// How long a stalled stage sleeps before re-checking its outputs
const BACKPRESSURE_POLL: Duration = Duration::from_millis(1);
/// Input wait before re-checking the running flag
const INPUT_POLL: Duration = Duration::from_millis(100);

/// One processing step in the pipeline.
///
/// `process` receives a shared, read-only input and pushes zero or more
/// published results into `out`. The scheduler distributes them.
pub trait Stage: Send + 'static {
    type Input: Send + Sync + 'static;
    type Output: Send + Sync + 'static;

    fn process(&mut self, input: &Self::Input, out: &mut Vec<Shared<Self::Output>>);
}

/// Bounded queue carrying shared buffers between stages.
pub fn queue<T>(capacity: usize) -> (Sender<Shared<T>>, Receiver<Shared<T>>) {
    channel::bounded(capacity.max(1))
}

/// A stage's set of output queues.
pub struct Fanout<T> {
    outputs: Vec<Sender<Shared<T>>>,
}

impl<T> Default for Fanout<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Fanout<T> {
    pub fn new() -> Self {
        Self {
            outputs: Vec::new(),
        }
    }

    pub fn attach(&mut self, tx: Sender<Shared<T>>) {
        self.outputs.push(tx);
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// True while any consumer still has a full queue.
    pub fn any_full(&self) -> bool {
        self.outputs.iter().any(|tx| tx.is_full())
    }

    /// Hand `buf` to every attached output, one holder each.
    ///
    /// Outputs whose receiver is gone are detached. Returns how many
    /// outputs received the buffer.
    pub fn distribute(&mut self, buf: Shared<T>) -> usize {
        let mut delivered = 0;
        self.outputs.retain(|tx| match tx.send(buf.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                log::warn!("output queue disconnected, detaching consumer");
                false
            }
        });
        delivered
    }
}

/// Counters updated by a running stage.
#[derive(Debug, Default)]
pub struct StageStats {
    processed: AtomicU64,
    emitted: AtomicU64,
    stalls: AtomicU64,
}

impl StageStats {
    /// Inputs consumed.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Results published.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Backpressure waits.
    pub fn stalls(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }
}

/// Handle to a stage thread.
pub struct StageHandle {
    name: String,
    stats: Arc<StageStats>,
    thread: JoinHandle<()>,
}

impl StageHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> Arc<StageStats> {
        self.stats.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) {
        if self.thread.join().is_err() {
            log::error!("{}: stage thread panicked", self.name);
        }
    }
}

/// Run `stage` on its own thread until the input disconnects or `running` clears.
pub fn spawn_stage<S: Stage>(
    name: &str,
    mut stage: S,
    input: Receiver<Shared<S::Input>>,
    mut outputs: Fanout<S::Output>,
    running: Arc<AtomicBool>,
) -> io::Result<StageHandle> {
    let stats = Arc::new(StageStats::default());
    let thread_stats = stats.clone();
    let thread_name = name.to_string();

    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            log::debug!("{}: started with {} outputs", thread_name, outputs.len());
            run_stage(&mut stage, &input, &mut outputs, &running, &thread_stats);
            log::info!(
                "{}: stopped ({} in, {} out, {} stalls)",
                thread_name,
                thread_stats.processed(),
                thread_stats.emitted(),
                thread_stats.stalls()
            );
        })?;

    Ok(StageHandle {
        name: name.to_string(),
        stats,
        thread,
    })
}

fn run_stage<S: Stage>(
    stage: &mut S,
    input: &Receiver<Shared<S::Input>>,
    outputs: &mut Fanout<S::Output>,
    running: &AtomicBool,
    stats: &StageStats,
) {
    let mut pending = Vec::new();

    while running.load(Ordering::Relaxed) {
        if outputs.any_full() {
            stats.stalls.fetch_add(1, Ordering::Relaxed);
            thread::sleep(BACKPRESSURE_POLL);
            continue;
        }

        let item = match input.recv_timeout(INPUT_POLL) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        stage.process(&item, &mut pending);
        drop(item);
        stats.processed.fetch_add(1, Ordering::Relaxed);

        for buf in pending.drain(..) {
            stats.emitted.fetch_add(1, Ordering::Relaxed);
            outputs.distribute(buf);
        }
    }
}
