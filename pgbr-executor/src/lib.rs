//! Parallel executor (component H): a cooperative, single-threaded
//! dispatcher driving a fixed pool of workers. Generalizes the teacher's
//! `ParallelHandler` (`src/tools/parallel_handler.rs`, a
//! `crossbeam_channel`-based thread pool with a shared abort `Mutex`) from
//! "fire independent closures and collect the first error" into a
//! step-driven client/job-source model: `step()` feeds idle workers from a
//! caller-supplied `job_source` and returns finished results without
//! blocking past one poll window, so the caller's own loop stays in
//! control of cancellation and hang detection.

mod queue_sweep;

pub use queue_sweep::QueueSweep;

use std::collections::HashSet;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};

use pgbr_types::{Error, ErrorKind};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

struct WorkerMsg<R> {
    client_idx: usize,
    result: Result<R, Error>,
}

/// One unit of work handed to a worker.
pub struct Job<J> {
    pub payload: J,
}

/// A fixed pool of worker threads driven by `step()`. `J` is the job
/// payload type, `R` the per-job success value; failures travel as
/// `Error` inside the job's `Result`.
pub struct Executor<J: Send + 'static, R: Send + 'static> {
    inputs: Vec<Sender<Job<J>>>,
    output_rx: Receiver<WorkerMsg<R>>,
    handles: Vec<JoinHandle<()>>,
    busy: Vec<bool>,
    dispatched_at: Vec<Option<Instant>>,
    protocol_timeout: Duration,
}

impl<J: Send + 'static, R: Send + 'static> Executor<J, R> {
    /// Spawns `workers` threads, each running `handler_fn` for every job
    /// it receives. `protocol_timeout` bounds how long a single job may
    /// run before its worker is declared hung (spec's "worker silence past
    /// protocol_timeout/2").
    pub fn new<F>(workers: usize, protocol_timeout: Duration, handler_fn: F) -> Self
    where
        F: Fn(J) -> Result<R, Error> + Send + Clone + 'static,
    {
        let mut inputs = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        let (output_tx, output_rx) = bounded::<WorkerMsg<R>>(workers.max(1) * 4);

        for client_idx in 0..workers {
            let (input_tx, input_rx) = bounded::<Job<J>>(1);
            let output_tx = output_tx.clone();
            let handler_fn = handler_fn.clone();

            let handle = std::thread::Builder::new()
                .name(format!("pgbr-worker-{client_idx}"))
                .spawn(move || loop {
                    let job = match input_rx.recv() {
                        Ok(job) => job,
                        Err(_) => return,
                    };
                    let result = handler_fn(job.payload);
                    if output_tx.send(WorkerMsg { client_idx, result }).is_err() {
                        return;
                    }
                })
                .expect("failed to spawn executor worker thread");

            inputs.push(input_tx);
            handles.push(handle);
        }

        Self {
            inputs,
            output_rx,
            handles,
            busy: vec![false; workers],
            dispatched_at: vec![None; workers],
            protocol_timeout,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn has_pending(&self) -> bool {
        self.busy.iter().any(|b| *b)
    }

    /// One dispatch/poll pass: offers `job_source(client_idx)` to every
    /// idle worker, then drains whatever finished within one poll window.
    /// Returns `(client_idx, result)` for each job that completed this
    /// pass; an empty vec is a normal "nothing finished yet" outcome, not
    /// an error.
    pub fn step(
        &mut self,
        job_source: &mut dyn FnMut(usize) -> Option<J>,
    ) -> Result<Vec<(usize, Result<R, Error>)>, Error> {
        for client_idx in 0..self.inputs.len() {
            if self.busy[client_idx] {
                continue;
            }
            if let Some(payload) = job_source(client_idx) {
                self.inputs[client_idx]
                    .send(Job { payload })
                    .map_err(|_| Error::new(ErrorKind::Protocol, format!("worker {client_idx} channel closed")))?;
                self.busy[client_idx] = true;
                self.dispatched_at[client_idx] = Some(Instant::now());
            }
        }

        let mut finished = Vec::new();
        if self.has_pending() {
            match self.output_rx.recv_timeout(POLL_INTERVAL) {
                Ok(msg) => finished.push(self.complete(msg)),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    return Err(Error::new(ErrorKind::Protocol, "executor output channel disconnected"));
                }
            }
            while let Ok(msg) = self.output_rx.try_recv() {
                finished.push(self.complete(msg));
            }
        }

        let already_done: HashSet<usize> = finished.iter().map(|(i, _)| *i).collect();
        let half_timeout = self.protocol_timeout / 2;
        for (client_idx, started) in self.dispatched_at.iter().enumerate() {
            if already_done.contains(&client_idx) {
                continue;
            }
            if let Some(started) = started {
                if started.elapsed() > half_timeout {
                    return Err(Error::new(
                        ErrorKind::Protocol,
                        format!("worker {client_idx} hung: no response after {:?}", half_timeout),
                    )
                    .with_hint("the worker process or thread may have stalled; aborting the backup/restore"));
                }
            }
        }

        Ok(finished)
    }

    fn complete(&mut self, msg: WorkerMsg<R>) -> (usize, Result<R, Error>) {
        self.busy[msg.client_idx] = false;
        self.dispatched_at[msg.client_idx] = None;
        (msg.client_idx, msg.result)
    }

    /// Closes every worker's input channel; in-flight results are drained
    /// and discarded on drop. Used on abort (spec's `cancel()`).
    pub fn cancel(mut self) {
        self.inputs.clear();
        self.join();
    }

    fn join(&mut self) {
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl<J: Send + 'static, R: Send + 'static> Drop for Executor<J, R> {
    fn drop(&mut self) {
        self.inputs.clear();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_and_collects_results() {
        let mut remaining = vec![1, 2, 3, 4, 5];
        let mut executor: Executor<i32, i32> =
            Executor::new(2, Duration::from_secs(5), |n| Ok(n * 10));

        let mut collected = Vec::new();
        while !remaining.is_empty() || executor.has_pending() {
            let results = executor
                .step(&mut |_client_idx| remaining.pop())
                .unwrap();
            collected.extend(results.into_iter().map(|(_, r)| r.unwrap()));
        }
        collected.sort();
        assert_eq!(collected, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn surfaces_worker_errors() {
        let mut sent = false;
        let mut executor: Executor<i32, i32> = Executor::new(1, Duration::from_secs(5), |_n| {
            Err(Error::new(ErrorKind::Assert, "boom"))
        });

        let results = loop {
            let results = executor
                .step(&mut |_| {
                    if sent {
                        None
                    } else {
                        sent = true;
                        Some(1)
                    }
                })
                .unwrap();
            if !results.is_empty() {
                break results;
            }
        };
        assert!(results[0].1.is_err());
    }
}
