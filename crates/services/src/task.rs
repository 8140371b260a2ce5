//! Owned background tasks with clean teardown.
//!
//! Every periodic loop in this crate (location refresh, report mirroring,
//! proximity evaluation) runs inside a [`BackgroundTask`]. Dropping the
//! handle aborts the task, so no timer outlives its owner.

use std::future::Future;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct BackgroundTask {
    name: &'static str,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawns `body` on the current runtime. The receiver resolves when
    /// [`shutdown`](Self::shutdown) is called or the handle is dropped.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let join = tokio::spawn(body(rx));
        tracing::debug!(task = name, "background task started");
        Self {
            name,
            shutdown: Some(tx),
            join: Some(join),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signals the task and waits for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                if e.is_panic() {
                    tracing::error!(task = self.name, "background task panicked");
                }
            }
        }
        tracing::debug!(task = self.name, "background task stopped");
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_waits_for_exit() {
        let exited = Arc::new(AtomicBool::new(false));
        let flag = exited.clone();
        let task = BackgroundTask::spawn("test", move |stop| async move {
            let _ = stop.await;
            flag.store(true, Ordering::SeqCst);
        });
        task.shutdown().await;
        assert!(exited.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_timer_loop() {
        let ticks = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = ticks.clone();
        let task = BackgroundTask::spawn("ticker", move |_stop| async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(2500)).await;
        drop(task);
        let seen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }
}
