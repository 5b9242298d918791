//! Blocking queues and a fixed pool of worker threads with per thread state.
//!
//! Stopping is cooperative.
//! A running job always completes and the stop request is checked between jobs.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, error};

/// A shared flag for requesting threads to stop.
#[derive(Debug, Default, Clone)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A FIFO queue with blocking pops.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push_back(item);
        self.available.notify_one();
    }

    /// Wait for the next item or return `None` once `stop` is requested.
    pub fn pop_wait(&self, stop: &StopToken) -> Option<T> {
        let mut items = self.items.lock().unwrap();
        loop {
            if stop.stop_requested() {
                return None;
            }
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            items = self.available.wait(items).unwrap();
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake all waiting threads so they can observe a stop request.
    pub fn notify_all(&self) {
        // Taking the lock avoids missing a waiter between its stop check and wait.
        let _items = self.items.lock().unwrap();
        self.available.notify_all();
    }
}

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

struct Shared<S> {
    queue: BlockingQueue<Job<S>>,
    /// The number of queued or running jobs.
    pending: Mutex<usize>,
    idle: Condvar,
    stop: StopToken,
}

impl<S> Shared<S> {
    fn finish_job(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending -= 1;
        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

/// A fixed number of threads that each own a state value created on that thread.
///
/// Jobs run on whichever worker is idle first and may complete in any order.
pub struct StatefulWorkerPool<S> {
    shared: Arc<Shared<S>>,
    threads: Vec<JoinHandle<()>>,
}

impl<S: 'static> StatefulWorkerPool<S> {
    /// Spawn `num_workers` threads that each initialize their state with `make_state`.
    pub fn new<F>(num_workers: usize, name: &str, make_state: F) -> std::io::Result<Self>
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            queue: BlockingQueue::new(),
            pending: Mutex::new(0),
            idle: Condvar::new(),
            stop: StopToken::new(),
        });
        let make_state = Arc::new(make_state);

        let threads = (0..num_workers.max(1))
            .map(|i| {
                let shared = shared.clone();
                let make_state = make_state.clone();
                std::thread::Builder::new()
                    .name(format!("{name}:{i}"))
                    .spawn(move || {
                        let mut state = make_state();
                        while let Some(job) = shared.queue.pop_wait(&shared.stop) {
                            job(&mut state);
                            shared.finish_job();
                        }
                        debug!("Stopped worker {i}");
                    })
            })
            .collect::<std::io::Result<Vec<_>>>();

        let threads = match threads {
            Ok(threads) => threads,
            Err(e) => {
                // Stop any threads that already started.
                shared.stop.request_stop();
                shared.queue.notify_all();
                return Err(e);
            }
        };

        Ok(Self { shared, threads })
    }

    pub fn queue_work<F>(&self, job: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        *self.shared.pending.lock().unwrap() += 1;
        self.shared.queue.push(Box::new(job));
    }

    /// Block until every queued job has finished.
    pub fn wait_for_requests(&self) {
        let mut pending = self.shared.pending.lock().unwrap();
        while *pending > 0 {
            pending = self.shared.idle.wait(pending).unwrap();
        }
    }

    pub fn num_workers(&self) -> usize {
        self.threads.len()
    }
}

impl<S> Drop for StatefulWorkerPool<S> {
    fn drop(&mut self) {
        self.shared.stop.request_stop();
        self.shared.queue.notify_all();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                error!("Worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn queue_is_fifo() {
        let queue = BlockingQueue::new();
        queue.push(1);
        queue.push(2);
        let stop = StopToken::new();
        assert_eq!(Some(1), queue.pop_wait(&stop));
        assert_eq!(Some(2), queue.try_pop());
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_after_stop() {
        let queue = BlockingQueue::new();
        queue.push(1);
        let stop = StopToken::new();
        stop.request_stop();
        assert_eq!(None, queue.pop_wait(&stop));
    }

    #[test]
    fn each_worker_has_its_own_state() {
        let created = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));

        let pool = {
            let created = created.clone();
            StatefulWorkerPool::new(3, "test", move || {
                created.fetch_add(1, Ordering::SeqCst);
                0usize
            })
            .unwrap()
        };
        for _ in 0..100 {
            let total = total.clone();
            pool.queue_work(move |count: &mut usize| {
                *count += 1;
                total.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_for_requests();
        assert_eq!(100, total.load(Ordering::SeqCst));
        assert_eq!(3, pool.num_workers());

        drop(pool);
        assert_eq!(3, created.load(Ordering::SeqCst));
    }

    #[test]
    fn wait_without_work() {
        let pool = StatefulWorkerPool::new(1, "test", || ()).unwrap();
        pool.wait_for_requests();
    }
}
