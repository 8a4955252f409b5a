//! Background merge worker.
//!
//! One thread waits on two inputs: a periodic ticker and a request channel.
//! Because it handles one input at a time, a merge never starts before the
//! previous one has returned.

use super::MergeStats;
use crate::error::{Error, Result};
use crossbeam::channel::{bounded, never, select, tick, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Name of the worker thread
pub const WORKER_THREAD_NAME: &str = "caskdb-merge";

enum Request {
    /// Run a cycle now and send the outcome back
    Merge(Sender<Result<MergeStats>>),
    Shutdown,
}

/// Handle to the merge thread.
///
/// Dropping the handle stops the thread and waits for it.
pub struct MergeWorker {
    requests: Sender<Request>,
    handle: Option<JoinHandle<()>>,
}

impl MergeWorker {
    /// Start the worker thread.
    ///
    /// `merge` runs every `interval`, and whenever [`MergeWorker::merge`] is
    /// called. A zero interval disables the timer.
    pub fn spawn<F>(interval: Duration, merge: F) -> Result<Self>
    where
        F: Fn() -> Result<MergeStats> + Send + 'static,
    {
        let (requests, receiver) = bounded(0);
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run(interval, receiver, merge))?;

        log::debug!("Merge worker started (interval: {:?})", interval);
        Ok(Self {
            requests,
            handle: Some(handle),
        })
    }

    /// Run a cycle on the worker thread and wait for its outcome
    pub fn merge(&self) -> Result<MergeStats> {
        let (reply, outcome) = bounded(1);
        self.requests
            .send(Request::Merge(reply))
            .map_err(|_| Error::invalid_state("merge worker is not running"))?;
        outcome.recv().map_err(|_| Error::invalid_state("merge worker stopped"))?
    }

    /// Stop the thread after any cycle in flight, and wait for it
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        // Fails only if the thread is already gone
        let _ = self.requests.send(Request::Shutdown);
        handle.join().map_err(|_| Error::invalid_state("merge worker panicked"))?;

        log::debug!("Merge worker stopped");
        Ok(())
    }
}

impl Drop for MergeWorker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Failed to stop merge worker: {}", e);
        }
    }
}

fn ticker(interval: Duration) -> Receiver<Instant> {
    if interval.is_zero() {
        never()
    } else {
        tick(interval)
    }
}

fn run<F>(interval: Duration, requests: Receiver<Request>, merge: F)
where
    F: Fn() -> Result<MergeStats>,
{
    let mut timer = ticker(interval);

    loop {
        select! {
            recv(timer) -> _ => {
                if let Err(e) = merge() {
                    log::warn!("Periodic merge failed: {}", e);
                }
            }
            recv(requests) -> request => {
                match request {
                    Ok(Request::Merge(reply)) => {
                        // The caller may have given up waiting
                        let _ = reply.send(merge());
                        timer = ticker(interval);
                    }
                    Ok(Request::Shutdown) | Err(_) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(calls: &Arc<AtomicUsize>) -> impl Fn() -> Result<MergeStats> + Send + 'static {
        let calls = Arc::clone(calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(MergeStats {
                segments_merged: n,
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_on_demand_merge() {
        let calls = Arc::new(AtomicUsize::new(0));
        let worker = MergeWorker::spawn(Duration::ZERO, counting(&calls)).unwrap();

        assert_eq!(worker.merge().unwrap().segments_merged, 1);
        assert_eq!(worker.merge().unwrap().segments_merged, 2);

        worker.shutdown().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_interval_never_fires() {
        let calls = Arc::new(AtomicUsize::new(0));
        let worker = MergeWorker::spawn(Duration::ZERO, counting(&calls)).unwrap();

        thread::sleep(Duration::from_millis(100));
        worker.shutdown().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_timer_triggers_merges() {
        let calls = Arc::new(AtomicUsize::new(0));
        let interval = Duration::from_millis(10);
        let worker = MergeWorker::spawn(interval, counting(&calls)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        drop(worker);
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_merge_error_is_returned() {
        let worker = MergeWorker::spawn(Duration::ZERO, || {
            Err(Error::corruption("bad segment"))
        })
        .unwrap();

        assert!(matches!(worker.merge(), Err(Error::Corruption(_))));
        // The worker survives a failed cycle
        assert!(matches!(worker.merge(), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_merges_never_overlap() {
        let running = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicUsize::new(0));
        let worker = {
            let running = Arc::clone(&running);
            let overlapped = Arc::clone(&overlapped);
            Arc::new(
                MergeWorker::spawn(Duration::from_millis(1), move || {
                    if running.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlapped.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(2));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(MergeStats::default())
                })
                .unwrap(),
            )
        };

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let worker = Arc::clone(&worker);
                thread::spawn(move || {
                    for _ in 0..5 {
                        worker.merge().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_worker_thread_name() {
        let worker = MergeWorker::spawn(Duration::ZERO, || {
            assert_eq!(thread::current().name(), Some(WORKER_THREAD_NAME));
            Ok(MergeStats::default())
        })
        .unwrap();
        worker.merge().unwrap();
    }
}
