use std::{
    future::Future,
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread,
    time::Duration,
};

use anyhow::Context;
use tokio::{
    runtime::{Builder, Handle},
    sync::oneshot,
    task::JoinHandle,
};
use tracing::debug;

#[derive(Clone)]
pub struct Scheduler {
    handle: Handle,
    _worker: Option<Arc<Worker>>,
}

struct Worker {
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let shutdown = self
            .shutdown
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
    }
}

#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    // A running callback is dropped at its next suspension point.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Scheduler {
    pub fn spawn_dedicated(name: &str) -> anyhow::Result<Self> {
        let (handle_tx, handle_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let thread_name = name.to_string();

        thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = handle_tx.send(Err(err));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                let _ = runtime.block_on(shutdown_rx);
                debug!("scheduler thread `{thread_name}` stopped");
            })
            .context("failed to spawn scheduler thread")?;

        let handle = handle_rx
            .recv()
            .context("scheduler thread exited during startup")?
            .context("failed to build scheduler runtime")?;

        Ok(Self {
            handle,
            _worker: Some(Arc::new(Worker {
                shutdown: Mutex::new(Some(shutdown_tx)),
            })),
        })
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            _worker: None,
        }
    }

    pub fn schedule<F, Fut>(&self, delay: Duration, task: F) -> ScheduledTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task().await;
        });
        ScheduledTask { handle }
    }

    pub fn schedule_with_fixed_delay<F, Fut>(
        &self,
        initial: Duration,
        delay: Duration,
        mut task: F,
    ) -> ScheduledTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = self.handle.spawn(async move {
            tokio::time::sleep(initial).await;
            loop {
                task().await;
                tokio::time::sleep(delay).await;
            }
        });
        ScheduledTask { handle }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_runs() {
        let scheduler = Scheduler::from_handle(Handle::current());
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        let task = scheduler.schedule(Duration::from_secs(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        task.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_task_repeats_until_cancelled() {
        let scheduler = Scheduler::from_handle(Handle::current());
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        let task = scheduler.schedule_with_fixed_delay(
            Duration::from_secs(10),
            Duration::from_secs(10),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        task.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn dedicated_scheduler_runs_tasks_on_its_own_thread() {
        let scheduler = Scheduler::spawn_dedicated("test-scheduler").unwrap();
        let (tx, rx) = mpsc::channel();

        let _task = scheduler.schedule(Duration::from_millis(5), move || async move {
            let _ = tx.send(thread::current().name().map(str::to_string));
        });

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-scheduler"));
    }
}
