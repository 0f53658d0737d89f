//! Execution bridge
//!
//! Both external engines (browser automation, real-time transport) are
//! single-threaded-affine: their handles must not be driven from arbitrary
//! request threads. The bridge owns exactly one OS thread running a
//! current-thread tokio runtime with a `LocalSet`, and every engine-touching
//! operation in the process executes there as a cooperative task.
//!
//! Callers hand the bridge a *task factory* (`FnOnce() -> Future`). The
//! factory is `Send` and crosses threads; the future it builds never does,
//! so tasks may hold `!Send` state. Results come back over a per-call
//! channel, bounded by the configured call deadline.
//!
//! A call that times out returns [`Error::BridgeTimeout`] but does **not**
//! cancel the in-flight task; it may still complete and mutate state later.
//! Callers must treat a timeout as "outcome unknown".

use crate::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

type Task = Box<dyn FnOnce() + Send>;

/// Bridges synchronous and foreign-runtime callers onto the single engine
/// worker. See the module docs for the threading model.
pub struct ExecutionBridge {
    task_tx: mpsc::UnboundedSender<Task>,
    call_timeout: Duration,
    alive: Arc<AtomicBool>,
}

impl ExecutionBridge {
    /// Start the worker thread and its cooperative scheduler.
    ///
    /// Failure here is a fatal startup precondition; there is no per-call
    /// recovery from a missing worker.
    pub fn start(call_timeout: Duration) -> Result<Arc<Self>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::BridgeUnavailable(format!("worker runtime: {e}")))?;

        let (task_tx, mut task_rx) = mpsc::unbounded_channel::<Task>();
        let alive = Arc::new(AtomicBool::new(true));
        let alive_worker = Arc::clone(&alive);

        std::thread::Builder::new()
            .name("engine-worker".to_string())
            .spawn(move || {
                let local = tokio::task::LocalSet::new();
                runtime.block_on(local.run_until(async move {
                    info!("execution bridge worker started");
                    while let Some(task) = task_rx.recv().await {
                        task();
                    }
                    debug!("execution bridge worker draining");
                }));
                alive_worker.store(false, Ordering::SeqCst);
                info!("execution bridge worker stopped");
            })
            .map_err(|e| Error::BridgeUnavailable(format!("worker thread: {e}")))?;

        Ok(Arc::new(Self {
            task_tx,
            call_timeout,
            alive,
        }))
    }

    /// Whether the worker thread is still running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.task_tx.is_closed()
    }

    /// The configured per-call deadline
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Run a task on the worker and await its result, bounded by the call
    /// deadline.
    ///
    /// The factory runs on the worker, so the future it builds may be
    /// `!Send`. A panic inside the task aborts only that task.
    pub async fn submit<F, Fut, T>(&self, factory: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        self.enqueue(factory, move |value| {
            let _ = result_tx.send(value);
        })?;

        match tokio::time::timeout(self.call_timeout, result_rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::Other("bridge task aborted before completing".into())),
            Err(_) => Err(Error::BridgeTimeout {
                timeout_ms: self.call_timeout.as_millis() as u64,
            }),
        }
    }

    /// Run a task on the worker and block the calling thread for the result,
    /// bounded by the call deadline.
    ///
    /// For genuinely synchronous callers only; never call this from an async
    /// context.
    pub fn submit_blocking<F, Fut, T>(&self, factory: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = std::sync::mpsc::sync_channel(1);
        self.enqueue(factory, move |value| {
            let _ = result_tx.send(value);
        })?;

        match result_rx.recv_timeout(self.call_timeout) {
            Ok(value) => Ok(value),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Err(Error::BridgeTimeout {
                timeout_ms: self.call_timeout.as_millis() as u64,
            }),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                Err(Error::Other("bridge task aborted before completing".into()))
            }
        }
    }

    /// Spawn a long-running task on the worker without waiting for it.
    ///
    /// Used for the streaming pipeline and the janitor loop.
    pub fn spawn<F, Fut>(&self, factory: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.enqueue(factory, |()| {})
    }

    fn enqueue<F, Fut, T>(&self, factory: F, deliver: impl FnOnce(T) + Send + 'static) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let task: Task = Box::new(move || {
            let handle = tokio::task::spawn_local(async move {
                deliver(factory().await);
            });
            // Surface panics in the log; the JoinHandle swallows them so the
            // worker loop itself never unwinds.
            tokio::task::spawn_local(async move {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        error!("bridge task panicked: {e}");
                    }
                }
            });
        });

        self.task_tx
            .send(task)
            .map_err(|_| Error::BridgeUnavailable("worker is not running".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn bridge() -> Arc<ExecutionBridge> {
        ExecutionBridge::start(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_submit_returns_result() {
        let bridge = bridge();
        let out = bridge.submit(|| async { 2 + 2 }).await.unwrap();
        assert_eq!(out, 4);
        assert!(bridge.is_alive());
    }

    #[tokio::test]
    async fn test_tasks_may_hold_non_send_state() {
        let bridge = bridge();
        let out = bridge
            .submit(|| async {
                let local = Rc::new(41);
                tokio::time::sleep(Duration::from_millis(1)).await;
                *local + 1
            })
            .await
            .unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_tasks_interleave_cooperatively() {
        let bridge = bridge();
        let slow = bridge.submit(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            "slow"
        });
        let fast = bridge.submit(|| async { "fast" });

        // The fast task finishes while the slow one is suspended, so the
        // worker is not serializing on task boundaries.
        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow.unwrap(), "slow");
        assert_eq!(fast.unwrap(), "fast");
    }

    #[tokio::test]
    async fn test_timeout_leaves_task_running() {
        let bridge = ExecutionBridge::start(Duration::from_millis(50)).unwrap();
        let completed = Arc::new(AtomicBool::new(false));
        let completed_task = Arc::clone(&completed);

        let result = bridge
            .submit(move || async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                completed_task.store(true, Ordering::SeqCst);
            })
            .await;

        assert!(matches!(result, Err(Error::BridgeTimeout { .. })));
        // The timed-out task was not cancelled; it completes later.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_worker() {
        let bridge = bridge();
        let result: Result<()> = bridge
            .submit(|| async {
                panic!("scripted task panic");
            })
            .await;
        assert!(result.is_err());

        // The worker survives and keeps serving calls.
        let out = bridge.submit(|| async { "still here" }).await.unwrap();
        assert_eq!(out, "still here");
        assert!(bridge.is_alive());
    }

    #[test]
    fn test_submit_blocking_from_plain_thread() {
        let bridge = bridge();
        let handle = std::thread::spawn(move || bridge.submit_blocking(|| async { 7 * 6 }));
        assert_eq!(handle.join().unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_spawn_detached_runs() {
        let bridge = bridge();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_task = Arc::clone(&ran);
        bridge
            .spawn(move || async move {
                ran_task.store(true, Ordering::SeqCst);
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ran.load(Ordering::SeqCst));
    }
}
