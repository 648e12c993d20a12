// Background Scheduler
// Periodic tasks sharing one shutdown signal

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Set of periodic tasks stopped together
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Run `tick` every `period`, the first run one period after spawning.
    /// A slow tick delays the next one rather than piling up.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval_timer = tokio::time::interval_at(start, period);
            interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => tick().await,
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Background task {} stopped", name);
        });
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every task and wait for each to finish its current tick
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                warn!("Background task {} ended abnormally: {}", name, e);
            }
        }
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}
