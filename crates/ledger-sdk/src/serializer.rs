//! Per-key FIFO task execution.
//!
//! Each key owns a bounded queue drained by a dedicated worker task, so two
//! tasks scheduled under the same key never overlap and run strictly in
//! submission order, regardless of call-site concurrency. A full queue fails
//! the submission immediately. The per-call timer abandons the *wait*, not
//! the task: a timed-out task may still complete its side effects later, so
//! scheduled work must be idempotent or safely ignorable.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Result, SdkError};

/// Pending-task ceiling per key.
pub const MAX_PENDING_PER_KEY: usize = 100;

type Job = BoxFuture<'static, ()>;

pub struct TaskSerializer {
    queues: Mutex<HashMap<String, mpsc::Sender<Job>>>,
}

impl TaskSerializer {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn queue_for(&self, key: &str) -> mpsc::Sender<Job> {
        let mut queues = self.queues.lock().expect("serializer lock poisoned");
        if let Some(sender) = queues.get(key) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }

        let (sender, mut receiver) = mpsc::channel::<Job>(MAX_PENDING_PER_KEY);
        let worker_key = key.to_string();
        tokio::spawn(async move {
            debug!(key = %worker_key, "Serializer worker started");
            while let Some(job) = receiver.recv().await {
                job.await;
            }
            debug!(key = %worker_key, "Serializer worker stopped");
        });
        queues.insert(key.to_string(), sender.clone());
        sender
    }

    /// Appends `task` to the key's queue and waits for its outcome, up to
    /// `timeout`. Fails fast with `QueueOverflow` when the queue is full.
    pub async fn schedule<T, F>(
        &self,
        key: &str,
        task: F,
        correlation_id: &str,
        timeout: Duration,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.queue_for(key);
        let (result_tx, result_rx) = oneshot::channel();

        let job: Job = Box::pin(async move {
            let outcome = task.await;
            // Receiver gone means the caller timed out; the work is done
            // either way.
            let _ = result_tx.send(outcome);
        });

        sender
            .try_send(job)
            .map_err(|_| SdkError::QueueOverflow(key.to_string()))?;

        match tokio::time::timeout(timeout, result_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                warn!(key, correlation_id, "Serializer worker dropped a task");
                Err(SdkError::Timeout(correlation_id.to_string()))
            }
            Err(_) => {
                warn!(key, correlation_id, "Task timed out while queued or running");
                Err(SdkError::Timeout(correlation_id.to_string()))
            }
        }
    }
}

impl Default for TaskSerializer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_same_key_is_strict_fifo() {
        let serializer = Arc::new(TaskSerializer::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let f1_settled = Arc::new(AtomicBool::new(false));

        let o1 = order.clone();
        let s1 = f1_settled.clone();
        let first = serializer.schedule(
            "k",
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                o1.lock().unwrap().push(1);
                s1.store(true, Ordering::SeqCst);
                Ok(())
            },
            "f1",
            TIMEOUT,
        );

        let o2 = order.clone();
        let s2 = f1_settled.clone();
        let second = serializer.schedule(
            "k",
            async move {
                // f2 must not start before f1 has settled.
                assert!(s2.load(Ordering::SeqCst));
                o2.lock().unwrap().push(2);
                Ok(())
            },
            "f2",
            TIMEOUT,
        );

        let (r1, r2) = tokio::join!(first, second);
        r1.unwrap();
        r2.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_serialize() {
        let serializer = TaskSerializer::new();
        let started = Arc::new(AtomicBool::new(false));

        let flag = started.clone();
        let slow = serializer.schedule(
            "a",
            async move {
                flag.store(true, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            },
            "slow",
            TIMEOUT,
        );
        let fast = serializer.schedule("b", async { Ok(1) }, "fast", TIMEOUT);

        let (slow, fast) = tokio::join!(slow, fast);
        slow.unwrap();
        assert_eq!(fast.unwrap(), 1);
        assert!(started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_overflow_fails_immediately() {
        let serializer = Arc::new(TaskSerializer::new());
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        // One running job blocks the worker...
        let blocked = tokio::spawn({
            let serializer = serializer.clone();
            async move {
                serializer
                    .schedule(
                        "k",
                        async move {
                            let _ = gate_rx.await;
                            Ok(())
                        },
                        "gate",
                        TIMEOUT,
                    )
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // ...then the queue fills to capacity...
        let mut waiters = Vec::new();
        for i in 0..MAX_PENDING_PER_KEY {
            let serializer = serializer.clone();
            waiters.push(tokio::spawn(async move {
                serializer
                    .schedule("k", async { Ok(()) }, &format!("fill-{}", i), TIMEOUT)
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        // ...and the next submission is rejected without enqueueing.
        let overflow = serializer
            .schedule("k", async { Ok(()) }, "overflow", TIMEOUT)
            .await;
        assert!(matches!(overflow, Err(SdkError::QueueOverflow(_))));

        gate_tx.send(()).unwrap();
        blocked.await.unwrap().unwrap();
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_timeout_abandons_wait_not_side_effect() {
        let serializer = TaskSerializer::new();
        let effect = Arc::new(AtomicBool::new(false));

        let flag = effect.clone();
        let result: Result<()> = serializer
            .schedule(
                "k",
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                },
                "slowpoke",
                Duration::from_millis(10),
            )
            .await;

        assert!(matches!(result, Err(SdkError::Timeout(id)) if id == "slowpoke"));
        assert!(!effect.load(Ordering::SeqCst));

        // The task was not cancelled; its side effect still lands.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(effect.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_task_errors_pass_through() {
        let serializer = TaskSerializer::new();
        let result: Result<()> = serializer
            .schedule(
                "k",
                async { Err(SdkError::InvalidInput("boom".into())) },
                "failing",
                TIMEOUT,
            )
            .await;
        assert!(matches!(result, Err(SdkError::InvalidInput(_))));
    }
}
