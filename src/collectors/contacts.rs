//! Contact-list membership collection
//!
//! Enumerates the full set of contact lookup keys each cycle using keyed
//! pagination, diffs it against the previous snapshot and emits only the
//! aggregate added/removed counts. Lookup keys never reach the sink; they
//! are persisted only to serve as the next cycle's baseline.

use crate::collectors::CollectorState;
use crate::config::ContactSettings;
use crate::diff::{diff, MembershipSnapshot};
use crate::error::{ArgusError, Result};
use crate::poller::scan_keys;
use crate::source::{KeyedSource, Sink};
use crate::store::KeyValueStore;
use crate::types::{current_time, ContactDiffRecord, Record};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONTACT_LOOKUPS_KEY: &str = "contact_lookups";

/// Superseded representation from older installations, removed on start
const LEGACY_CONTACT_IDS_KEY: &str = "contact_ids";

/// Collector emitting aggregate contact-list changes
pub struct ContactCollector {
    worker: Arc<Mutex<ContactWorker>>,
    poll_interval: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: CollectorState,
}

impl ContactCollector {
    pub fn new(
        source: Arc<dyn KeyedSource>,
        sink: Arc<dyn Sink>,
        store: Arc<dyn KeyValueStore>,
        settings: &ContactSettings,
    ) -> Result<Self> {
        // Contact row ids were replaced by stable lookup keys; drop the
        // old representation instead of migrating it
        store.remove(LEGACY_CONTACT_IDS_KEY)?;

        let saved = store.get_string_set(CONTACT_LOOKUPS_KEY)?.unwrap_or_default();
        let worker = ContactWorker {
            source,
            sink,
            store,
            page_limit: settings.page_limit,
            saved,
        };
        Ok(Self {
            worker: Arc::new(Mutex::new(worker)),
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            cancel: CancellationToken::new(),
            task: None,
            state: CollectorState::Created,
        })
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    /// Start scheduled snapshots; the first cycle runs immediately
    pub fn start(&mut self) -> Result<()> {
        if self.state != CollectorState::Created {
            return Err(ArgusError::Lifecycle(format!(
                "Cannot start contact collector in state {}",
                self.state
            )));
        }

        let worker = self.worker.clone();
        let cancel = self.cancel.clone();
        let poll_interval = self.poll_interval;

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        worker.lock().await.run_cycle(&cancel).await;
                    }
                }
            }
            debug!("Contact collector loop stopped");
        }));
        self.state = CollectorState::Running;
        info!(
            "Contact collector started with interval {:?}",
            self.poll_interval
        );
        Ok(())
    }

    /// Take one membership snapshot immediately
    pub async fn poll_once(&self) -> Result<()> {
        if self.state == CollectorState::Closed || self.state == CollectorState::Stopping {
            return Err(ArgusError::Lifecycle(format!(
                "Cannot poll contact collector in state {}",
                self.state
            )));
        }
        self.worker.lock().await.run_cycle(&self.cancel).await;
        Ok(())
    }

    pub async fn close(&mut self) {
        if self.state == CollectorState::Closed {
            return;
        }
        self.state = CollectorState::Stopping;
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Contact collector task panicked: {}", e);
            }
        }
        self.state = CollectorState::Closed;
        info!("Contact collector closed");
    }
}

struct ContactWorker {
    source: Arc<dyn KeyedSource>,
    sink: Arc<dyn Sink>,
    store: Arc<dyn KeyValueStore>,
    page_limit: usize,
    saved: MembershipSnapshot,
}

impl ContactWorker {
    async fn run_cycle(&mut self, cancel: &CancellationToken) {
        let current = match scan_keys(self.source.as_ref(), self.page_limit, cancel).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Contact enumeration failed, skipping cycle: {}", e);
                return;
            }
        };
        // A snapshot truncated by cancellation would report phantom
        // removals next cycle; drop it instead of replacing the baseline
        if cancel.is_cancelled() {
            debug!("Contact cycle cancelled, discarding partial snapshot");
            return;
        }

        let counts = diff(&self.saved, &current);
        let (added, removed) = match counts {
            Some((added, removed)) => (Some(added), Some(removed)),
            None => (None, None),
        };

        self.saved = current;
        if let Err(e) = self.store.set_string_set(CONTACT_LOOKUPS_KEY, &self.saved) {
            warn!("Failed to persist contact snapshot: {}", e);
        }

        let time = current_time();
        let record = Record::ContactDiff(ContactDiffRecord {
            event_time: time,
            received_time: time,
            added,
            removed,
            total: self.saved.len(),
        });
        match self.sink.publish(record).await {
            Ok(()) => info!(
                "Contacts: total {} added {:?} removed {:?}",
                self.saved.len(),
                added,
                removed
            ),
            Err(e) => warn!("Failed to publish contact diff: {}", e),
        }
    }
}
