//! Fixed-size worker pool.
//!
//! Tasks are closures submitted to a shared queue; each returns a
//! [`TaskHandle`] the caller can join, with or without a deadline. Workers
//! run tasks to completion; shutdown drains the queue and joins the
//! threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::debug;

use nexus_types::NexusError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Completion side of a submitted task.
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes.
    pub fn join(self) -> Result<T, NexusError> {
        self.rx
            .recv()
            .map_err(|_| NexusError::Internal("worker dropped task result".to_string()))
    }

    /// Block up to `timeout`; the task keeps running past a timeout but its
    /// result is discarded.
    pub fn join_timeout(self, timeout: Duration) -> Result<T, NexusError> {
        match self.rx.recv_timeout(timeout) {
            Ok(v) => Ok(v),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(NexusError::Timeout("task still running".to_string()))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(NexusError::Internal("worker dropped task result".to_string()))
            }
        }
    }

    /// Non-blocking poll.
    pub fn try_join(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Fixed pool of worker threads pulling from one queue.
pub struct WorkerPool {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    active: Arc<AtomicUsize>,
    shutdown: AtomicBool,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn new(size: usize) -> Arc<Self> {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let active = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let rx = Arc::clone(&rx);
            let active = Arc::clone(&active);
            let handle = thread::Builder::new()
                .name(format!("nexus-worker-{index}"))
                .spawn(move || loop {
                    let job = {
                        let guard = rx.lock().expect("pool queue lock poisoned");
                        guard.recv()
                    };
                    match job {
                        Ok(job) => {
                            active.fetch_add(1, Ordering::Relaxed);
                            job();
                            active.fetch_sub(1, Ordering::Relaxed);
                        }
                        Err(_) => break,
                    }
                })
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }
        debug!(size, "worker pool started");

        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            active,
            shutdown: AtomicBool::new(false),
            size,
        })
    }

    /// Submit a task; fails after shutdown.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, NexusError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::channel();
        let job: Job = Box::new(move || {
            let _ = result_tx.send(task());
        });
        let guard = self.tx.lock().expect("pool sender lock poisoned");
        match guard.as_ref() {
            Some(tx) => {
                tx.send(job)
                    .map_err(|_| NexusError::Internal("worker pool queue closed".to_string()))?;
                Ok(TaskHandle { rx: result_rx })
            }
            None => Err(NexusError::Cancelled(
                "worker pool is shut down".to_string(),
            )),
        }
    }

    pub fn thread_count(&self) -> usize {
        self.size
    }

    pub fn active_tasks(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Close the queue and join the workers; queued tasks still run.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tx.lock().expect("pool sender lock poisoned").take();
        let mut workers = self.workers.lock().expect("pool workers lock poisoned");
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_run_and_return_values() {
        let pool = WorkerPool::new(2);
        let h = pool.submit(|| 21 * 2).unwrap();
        assert_eq!(h.join().unwrap(), 42);
    }

    #[test]
    fn tasks_run_concurrently() {
        let pool = WorkerPool::new(4);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                pool.submit(move || {
                    thread::sleep(Duration::from_millis(50));
                    i
                })
                .unwrap()
            })
            .collect();
        let start = std::time::Instant::now();
        let mut results: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort_unstable();
        assert_eq!(results, vec![0, 1, 2, 3]);
        // Four 50ms tasks across four workers finish well under 200ms.
        assert!(start.elapsed() < Duration::from_millis(190));
    }

    #[test]
    fn join_timeout_leaves_task_running() {
        let pool = WorkerPool::new(1);
        let h = pool
            .submit(|| {
                thread::sleep(Duration::from_millis(100));
                7
            })
            .unwrap();
        let err = h.join_timeout(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), nexus_types::ErrorKind::Timeout);
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let pool = WorkerPool::new(1);
        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(pool.submit(|| ()).is_err());
    }

    #[test]
    fn queued_tasks_complete_before_shutdown_returns() {
        let pool = WorkerPool::new(1);
        let handles: Vec<_> = (0..5).map(|i| pool.submit(move || i).unwrap()).collect();
        pool.shutdown();
        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(h.join().unwrap(), i);
        }
    }
}
