pub mod alerts;

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Run `task` every `period` on a background tokio task.
///
/// The first run happens one full period after spawning. A run that overruns
/// pushes the following ones back instead of bursting to catch up. Runs never
/// overlap. Driven by the tokio clock, so a paused test runtime controls it.
pub fn spawn_periodic<F, Fut>(name: &str, period: Duration, mut task: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let job_name = name.to_string();
    info!("Scheduled task '{}' every {:?}", job_name, period);

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            debug!("Running scheduled task: {}", job_name);
            task().await;
        }
    })
}
