use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const LOG_TARGET: &str = "poker_event_core::tokio_tools";

/// Spawn a Tokio task with a stable name when supported, and trace span otherwise.
pub fn spawn_named_task<F, S>(name: S, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
    S: Into<String>,
{
    let name_owned = name.into();
    #[cfg(tokio_unstable)]
    {
        tokio::task::Builder::new()
            .name(&name_owned)
            .spawn(future)
            .expect("failed to spawn named task")
    }
    #[cfg(not(tokio_unstable))]
    {
        use tracing::Instrument;
        let span = tracing::info_span!("task", task_name = %name_owned);
        tokio::spawn(future.instrument(span))
    }
}

/// A long-running loop paired with the token that stops it.
pub struct BackgroundTask {
    name: String,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawn `make(stop)`; the loop is expected to exit once `stop` fires.
    pub fn spawn<F, Fut>(name: impl Into<String>, make: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let stop = CancellationToken::new();
        let handle = spawn_named_task(name.clone(), make(stop.clone()));
        Self {
            name,
            stop,
            handle: Some(handle),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the loop and wait for its in-flight iteration to finish.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(target: LOG_TARGET, task = %self.name, error = %err, "background task panicked");
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
