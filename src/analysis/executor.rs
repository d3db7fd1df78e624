use crate::utils::MrzError;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Single worker thread with a depth-1 queue where the newest task replaces
/// any queued task that has not started yet.
pub struct PipelineExecutor {
    sender: Option<Sender<Task>>,
    // second handle on the queue, used to evict the stale task
    pending: Receiver<Task>,
    worker: Option<JoinHandle<()>>,
    replaced: Arc<AtomicU64>,
}

impl PipelineExecutor {
    pub fn start<F>(name: &str, on_panic: F) -> Result<Self, MrzError>
    where
        F: Fn(String) + Send + 'static,
    {
        let (sender, receiver) = bounded::<Task>(1);
        let pending = receiver.clone();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for task in receiver.iter() {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                        let message = panic_message(payload.as_ref());
                        error!("pipeline task panicked: {}", message);
                        on_panic(message);
                    }
                }
                debug!("pipeline worker exiting");
            })?;
        Ok(PipelineExecutor {
            sender: Some(sender),
            pending,
            worker: Some(worker),
            replaced: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Queues `task`, discarding a queued task that has not started. Never blocks.
    /// Returns false once the executor is shut down.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            return false;
        };
        let mut task: Task = Box::new(task);
        loop {
            match sender.try_send(task) {
                Ok(()) => return true,
                Err(TrySendError::Full(back)) => {
                    if self.pending.try_recv().is_ok() {
                        self.replaced.fetch_add(1, Ordering::Relaxed);
                    }
                    task = back;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }

    /// Number of queued tasks evicted by newer submissions.
    pub fn replaced_count(&self) -> u64 {
        self.replaced.load(Ordering::Relaxed)
    }

    /// Stops accepting work and waits for the in-flight task to finish.
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("pipeline worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for PipelineExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, mpsc};
    use std::time::Duration;

    #[test]
    fn test_runs_tasks_in_order() {
        let mut exec = PipelineExecutor::start("test-worker", |_| {}).unwrap();
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        assert!(exec.submit(move || tx.send(1).unwrap()));
        // wait so the first task is taken before the second is queued
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert!(exec.submit(move || tx2.send(2).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        exec.shutdown();
        assert!(!exec.submit(|| {}));
    }

    #[test]
    fn test_latest_task_replaces_queued_one() {
        let mut exec = PipelineExecutor::start("test-worker", |_| {}).unwrap();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let seen = Arc::new(Mutex::new(Vec::new()));

        // occupy the worker until released
        exec.submit(move || {
            started_tx.send(()).unwrap();
            gate_rx.recv().unwrap();
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for i in 0..5 {
            let seen = Arc::clone(&seen);
            exec.submit(move || seen.lock().unwrap().push(i));
        }
        assert_eq!(exec.replaced_count(), 4);
        gate_tx.send(()).unwrap();
        exec.shutdown();
        assert_eq!(*seen.lock().unwrap(), vec![4]);
    }

    #[test]
    fn test_panic_is_reported_and_worker_survives() {
        let (err_tx, err_rx) = mpsc::channel();
        let err_tx = Mutex::new(err_tx);
        let mut exec = PipelineExecutor::start("test-worker", move |msg| {
            let _ = err_tx.lock().unwrap().send(msg);
        })
        .unwrap();
        exec.submit(|| panic!("boom"));
        assert_eq!(err_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "boom");

        let (tx, rx) = mpsc::channel();
        exec.submit(move || tx.send("alive").unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "alive");
        exec.shutdown();
    }
}
