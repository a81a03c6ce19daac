//! Location collection with battery-adaptive sampling
//!
//! Wires the sampling controller to the power signal and feeds every
//! delivered fix through the relative-coordinate transform before it reaches
//! the sink. Reference establishment on the first fix happens inside the one
//! task that consumes fixes, so two concurrent first-fixes can never create
//! two different reference points.

use crate::collectors::CollectorState;
use crate::config::LocationSettings;
use crate::error::{ArgusError, Result};
use crate::location::ReferencePoints;
use crate::sampling::{SamplingController, SamplingHandle};
use crate::source::{LocationStream, PowerMonitor, PowerStatus, Sink};
use crate::store::KeyValueStore;
use crate::types::{LocationFix, Record};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Collector for privacy-preserving relative location records
pub struct LocationCollector {
    // Consumed by start()
    stream: Option<Box<dyn LocationStream>>,
    fixes: Option<mpsc::Receiver<LocationFix>>,
    power: Arc<dyn PowerMonitor>,
    sink: Arc<dyn Sink>,
    references: Option<ReferencePoints>,
    settings: LocationSettings,

    controller: Option<SamplingController>,
    handle: Option<SamplingHandle>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: CollectorState,
}

impl LocationCollector {
    /// Create the collector; `fixes` is the receiving half of the channel
    /// the host's location stream delivers into
    pub fn new(
        stream: Box<dyn LocationStream>,
        fixes: mpsc::Receiver<LocationFix>,
        power: Arc<dyn PowerMonitor>,
        sink: Arc<dyn Sink>,
        store: Arc<dyn KeyValueStore>,
        settings: LocationSettings,
    ) -> Result<Self> {
        let references = ReferencePoints::load(store)?;
        Ok(Self {
            stream: Some(stream),
            fixes: Some(fixes),
            power,
            sink,
            references: Some(references),
            settings,
            controller: None,
            handle: None,
            cancel: CancellationToken::new(),
            task: None,
            state: CollectorState::Created,
        })
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    /// Spawn the sampling controller and the fix-processing loop
    pub async fn start(&mut self) -> Result<()> {
        if self.state != CollectorState::Created {
            return Err(ArgusError::Lifecycle(format!(
                "Cannot start location collector in state {}",
                self.state
            )));
        }
        let stream = self
            .stream
            .take()
            .ok_or_else(|| ArgusError::Lifecycle("Location stream already taken".into()))?;
        let mut fixes = self
            .fixes
            .take()
            .ok_or_else(|| ArgusError::Lifecycle("Fix channel already taken".into()))?;
        let mut references = self
            .references
            .take()
            .ok_or_else(|| ArgusError::Lifecycle("References already taken".into()))?;

        // Initialize the controller from the current power status; if the
        // signal is absent, assume full battery and let change events correct
        let initial_power = match self.power.current().await {
            Ok(power) => power,
            Err(e) => {
                warn!("Power signal unavailable at startup: {}", e);
                PowerStatus {
                    level: 1.0,
                    is_charging: false,
                }
            }
        };

        let controller = SamplingController::spawn(
            stream,
            self.settings.sampling_params(),
            initial_power,
        );
        let handle = controller.handle();
        self.handle = Some(handle.clone());
        self.controller = Some(controller);

        let mut power_watch = self.power.watch();
        let sink = self.sink.clone();
        let cancel = self.cancel.clone();

        self.task = Some(tokio::spawn(async move {
            let mut power_open = true;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = power_watch.changed(), if power_open => {
                        if changed.is_err() {
                            debug!("Power signal closed");
                            power_open = false;
                            continue;
                        }
                        let power = *power_watch.borrow_and_update();
                        if let Err(e) = handle.battery_changed(power).await {
                            warn!("Sampling controller unreachable: {}", e);
                        }
                    }
                    fix = fixes.recv() => {
                        let Some(fix) = fix else {
                            debug!("Fix channel closed");
                            break;
                        };
                        match references.transform(&fix) {
                            Ok(record) => {
                                info!(
                                    "Location: {:?} lat {:?} lon {:?}",
                                    record.provider,
                                    record.relative_latitude,
                                    record.relative_longitude
                                );
                                if let Err(e) = sink.publish(Record::Location(record)).await {
                                    warn!("Failed to publish location: {}", e);
                                }
                            }
                            Err(e) => warn!("Dropping fix: {}", e),
                        }
                    }
                }
            }
            debug!("Location fix loop stopped");
        }));
        self.state = CollectorState::Running;
        info!("Location collector started");
        Ok(())
    }

    /// Update sampling intervals; forces a resubscription even if the
    /// frequency label is unchanged
    pub async fn set_intervals(&self, settings: &LocationSettings) -> Result<()> {
        let handle = self.running_handle()?;
        handle
            .set_intervals(
                Duration::from_secs(settings.gps_interval_secs),
                Duration::from_secs(settings.gps_interval_reduced_secs),
                Duration::from_secs(settings.network_interval_secs),
                Duration::from_secs(settings.network_interval_reduced_secs),
            )
            .await
    }

    /// Update battery thresholds
    pub async fn set_battery_levels(&self, minimum: f32, reduced: f32) -> Result<()> {
        let handle = self.running_handle()?;
        handle.set_battery_levels(minimum, reduced).await
    }

    fn running_handle(&self) -> Result<&SamplingHandle> {
        self.handle.as_ref().ok_or_else(|| {
            ArgusError::Lifecycle(format!("Location collector not running ({})", self.state))
        })
    }

    /// Stop the fix loop, then shut the controller down, releasing all
    /// location subscriptions
    pub async fn close(&mut self) {
        if self.state == CollectorState::Closed {
            return;
        }
        self.state = CollectorState::Stopping;
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Location fix loop panicked: {}", e);
            }
        }
        // All handle clones are gone once the fix loop has exited
        self.handle = None;
        if let Some(controller) = self.controller.take() {
            controller.shutdown().await;
        }
        self.state = CollectorState::Closed;
        info!("Location collector closed");
    }
}
