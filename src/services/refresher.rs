// Background schema refresh
//
// Periodically drops expired descriptions, rediscovers the ones nearing
// expiry through the regular get_context path, and writes the cache to disk.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::services::schema_context::SchemaContextService;
use crate::storage::SqliteStorage;

/// Outcome of one refresh pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub swept: usize,
    pub refreshed: usize,
    pub failed: usize,
    pub persisted: Option<usize>,
}

pub struct SchemaRefresher {
    service: SchemaContextService,
    storage: Option<Arc<SqliteStorage>>,
    interval: Duration,
    refresh_after: Duration,
}

impl SchemaRefresher {
    /// # Arguments
    ///
    /// * `interval` - Time between passes
    /// * `refresh_after` - Age at which a cached description is rediscovered
    pub fn new(
        service: SchemaContextService,
        storage: Option<Arc<SqliteStorage>>,
        interval: Duration,
        refresh_after: Duration,
    ) -> Self {
        Self {
            service,
            storage,
            interval,
            refresh_after,
        }
    }

    pub async fn run_once(&self) -> RefreshReport {
        let mut report = RefreshReport {
            swept: self.service.sweep(),
            ..RefreshReport::default()
        };

        for identity in self.service.identities_older_than(self.refresh_after) {
            match self.service.get_context(&identity, usize::MAX, true).await {
                Ok(_) => report.refreshed += 1,
                Err(e) => {
                    // The old description stays cached until it expires
                    tracing::warn!("Background refresh of {} failed: {}", identity, e);
                    report.failed += 1;
                }
            }
        }

        if let Some(storage) = &self.storage {
            match self.service.persist(storage).await {
                Ok(saved) => report.persisted = Some(saved),
                Err(e) => tracing::error!("Failed to persist schema cache: {}", e),
            }
        }

        tracing::debug!("Refresh pass finished: {:?}", report);
        report
    }

    /// Run passes every `interval` until the handle is stopped
    pub fn spawn(self) -> RefresherHandle {
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);
        // tokio::time::interval panics on a zero period
        let period = self.interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!("Schema refresher started (every {:?})", period);

            loop {
                tokio::select! {
                    biased;

                    _ = signal.notified() => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }

            tracing::info!("Schema refresher stopped");
        });

        RefresherHandle { shutdown, handle }
    }
}

pub struct RefresherHandle {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl RefresherHandle {
    /// Stop the loop, letting a pass in progress finish
    pub async fn stop(self) {
        self.shutdown.notify_one();
        match tokio::time::timeout(Duration::from_secs(30), self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Schema refresher task failed: {}", e),
            Err(_) => tracing::error!("Schema refresher did not stop within 30s"),
        }
    }
}
