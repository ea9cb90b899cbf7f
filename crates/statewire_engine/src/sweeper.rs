//! Background TTL sweep.

use crate::error::{EngineError, EngineResult};
use crate::registry::ContextRegistry;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Handle to a running sweep task.
///
/// The task stops when [`shutdown`](Self::shutdown) is called, when the
/// handle is dropped, or when the registry itself is dropped.
#[derive(Debug)]
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stops the sweep task and waits for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Returns true once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl ContextRegistry {
    /// Spawns the periodic sweep on the current tokio runtime.
    ///
    /// The first sweep runs one `sweep_interval` after spawning.
    pub fn spawn_sweeper(self: &Arc<Self>) -> EngineResult<SweeperHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Runtime(e.to_string()))?;
        let period = self.config().sweep_interval.max(Duration::from_millis(1));
        let registry = Arc::downgrade(self);
        let (stop, stopped) = watch::channel(false);

        let task = runtime.spawn(run(registry, period, stopped));
        Ok(SweeperHandle {
            stop,
            task: Some(task),
        })
    }
}

async fn run(
    registry: Weak<ContextRegistry>,
    period: Duration,
    mut stopped: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stopped.changed() => break,
        }
        let Some(live) = registry.upgrade() else {
            break;
        };
        live.sweep();
    }
    debug!("context sweeper stopped");
}
