//! In-process delayed task queue and the worker pool that drains it.
//!
//! `enqueue` parks each task on a timer and hands it to the channel when the
//! delay elapses. The pool runs handlers on blocking threads, at most
//! `workers` at a time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::domain::error::TradebotError;
use crate::ports::task_queue_port::{Task, TaskHandler, TaskQueue};

pub struct TokioTaskQueue {
    sender: mpsc::UnboundedSender<Task>,
    runtime: Handle,
}

impl TokioTaskQueue {
    /// Queue whose timers run on `runtime`, plus the receiving end for a pool.
    pub fn new(runtime: Handle) -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender, runtime }, receiver)
    }
}

impl TaskQueue for TokioTaskQueue {
    fn enqueue(&self, task: Task, delay: Duration) -> Result<(), TradebotError> {
        if self.sender.is_closed() {
            return Err(TradebotError::Queue {
                reason: format!("queue closed, dropping {}", task.task_type),
            });
        }

        debug!(task_type = %task.task_type, delay_secs = delay.as_secs(), "task enqueued");
        let sender = self.sender.clone();
        self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = sender.send(task) {
                warn!(task_type = %e.0.task_type, "queue closed before delivery");
            }
        });
        Ok(())
    }
}

pub struct WorkerPool {
    workers: usize,
    handlers: Vec<Arc<dyn TaskHandler + Send + Sync>>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        WorkerPool {
            workers: workers.max(1),
            handlers: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler + Send + Sync>) -> Self {
        self.handlers.push(handler);
        self
    }

    fn route(&self, task: &Task) -> Option<Arc<dyn TaskHandler + Send + Sync>> {
        self.handlers
            .iter()
            .find(|h| task.task_type.starts_with(h.task_prefix()))
            .cloned()
    }

    /// Drains `receiver` until `shutdown` resolves or every sender is gone,
    /// then waits for running handlers to finish.
    pub async fn run<F>(self, mut receiver: mpsc::UnboundedReceiver<Task>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let permits = Arc::new(Semaphore::new(self.workers));
        info!(workers = self.workers, "worker pool started");
        tokio::pin!(shutdown);

        loop {
            let task = tokio::select! {
                _ = &mut shutdown => break,
                task = receiver.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let Some(handler) = self.route(&task) else {
                warn!(task_type = %task.task_type, "no handler for task type, dropping");
                continue;
            };

            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                if let Err(e) = handler.handle(&task) {
                    error!(task_type = %task.task_type, error = %e, "task failed");
                }
            });
        }

        info!("worker pool stopping, waiting for running tasks");
        let _ = permits.acquire_many(self.workers as u32).await;
        info!("worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        handled: Mutex<Vec<String>>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TaskHandler for CountingHandler {
        fn task_prefix(&self) -> &str {
            "test:"
        }

        fn handle(&self, task: &Task) -> Result<(), TradebotError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.handled.lock().push(task.task_type.clone());
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn wait_for(handler: &CountingHandler, count: usize) {
        for _ in 0..200 {
            if handler.handled.lock().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {count} tasks");
    }

    #[tokio::test]
    async fn zero_delay_is_delivered_first() {
        let (queue, mut receiver) = TokioTaskQueue::new(Handle::current());
        queue
            .enqueue(Task::new("test:late", Vec::new()), Duration::from_millis(50))
            .unwrap();
        queue
            .enqueue(Task::new("test:now", Vec::new()), Duration::ZERO)
            .unwrap();

        assert_eq!(receiver.recv().await.unwrap().task_type, "test:now");
        assert_eq!(receiver.recv().await.unwrap().task_type, "test:late");
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_task_waits_for_its_delay() {
        let (queue, mut receiver) = TokioTaskQueue::new(Handle::current());
        queue
            .enqueue(Task::new("test:later", Vec::new()), Duration::from_secs(900))
            .unwrap();
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(899)).await;
        assert!(receiver.try_recv().is_err());

        let start = tokio::time::Instant::now();
        assert_eq!(receiver.recv().await.unwrap().task_type, "test:later");
        assert!(start.elapsed() <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn closed_queue_rejects() {
        let (queue, receiver) = TokioTaskQueue::new(Handle::current());
        drop(receiver);
        assert!(matches!(
            queue.enqueue(Task::new("test:x", Vec::new()), Duration::ZERO),
            Err(TradebotError::Queue { .. })
        ));
    }

    #[tokio::test]
    async fn pool_bounds_concurrency() {
        let handler = Arc::new(CountingHandler::default());
        let (queue, receiver) = TokioTaskQueue::new(Handle::current());
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let pool = WorkerPool::new(2).with_handler(handler.clone());
        let running = tokio::spawn(pool.run(receiver, async {
            let _ = stop_rx.await;
        }));

        for i in 0..6 {
            queue
                .enqueue(Task::new(format!("test:{i}"), Vec::new()), Duration::ZERO)
                .unwrap();
        }
        queue
            .enqueue(Task::new("other:ignored", Vec::new()), Duration::ZERO)
            .unwrap();

        wait_for(&handler, 6).await;
        let _ = stop_tx.send(());
        running.await.unwrap();

        assert_eq!(handler.handled.lock().len(), 6);
        assert!(handler.peak.load(Ordering::SeqCst) <= 2);
    }
}
