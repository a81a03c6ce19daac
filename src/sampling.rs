//! Battery-adaptive location sampling
//!
//! A small state machine throttles how often location providers report,
//! driven by battery level and charging state with inclusive thresholds:
//! touching a threshold does not change state, only crossing it does. All
//! mutations funnel through one command loop owned by a single task, so a
//! recomputation triggered by a battery event can never interleave with one
//! triggered by a configuration change.

use crate::error::Result;
use crate::source::{LocationStream, PowerStatus};
use crate::types::ProviderKind;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sampling frequency state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingFrequency {
    /// No location subscriptions at all
    Off,
    /// Subscribed with the reduced interval pair
    Reduced,
    /// Subscribed with the unreduced interval pair
    Normal,
}

/// Interval and threshold parameters for the sampling state machine
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub gps_interval: Duration,
    pub gps_interval_reduced: Duration,
    pub network_interval: Duration,
    pub network_interval_reduced: Duration,
    /// Below this battery level (not charging), sampling turns off
    pub battery_minimum: f32,
    /// Below this battery level (not charging), intervals are reduced
    pub battery_reduced: f32,
}

/// Target state as a total function of the power signal
///
/// Comparators are inclusive towards the higher state, giving hysteresis at
/// the boundary: a level sitting exactly on `battery_reduced` stays Normal.
pub fn target_frequency(power: PowerStatus, params: &SamplingParams) -> SamplingFrequency {
    if power.is_charging || power.level >= params.battery_reduced {
        SamplingFrequency::Normal
    } else if power.level >= params.battery_minimum {
        SamplingFrequency::Reduced
    } else {
        SamplingFrequency::Off
    }
}

/// Commands processed by the controller's single-writer loop
#[derive(Debug)]
enum Command {
    BatteryChanged(PowerStatus),
    SetIntervals {
        gps: Duration,
        gps_reduced: Duration,
        network: Duration,
        network_reduced: Duration,
    },
    SetBatteryLevels {
        minimum: f32,
        reduced: f32,
    },
}

/// Clonable command sender to a running controller loop
///
/// All state transitions are messages processed in arrival order by the
/// controller task, so callers on any task see serialized effects.
#[derive(Clone)]
pub struct SamplingHandle {
    commands: mpsc::Sender<Command>,
}

impl SamplingHandle {
    pub async fn battery_changed(&self, power: PowerStatus) -> Result<()> {
        self.send(Command::BatteryChanged(power)).await
    }

    pub async fn set_intervals(
        &self,
        gps: Duration,
        gps_reduced: Duration,
        network: Duration,
        network_reduced: Duration,
    ) -> Result<()> {
        self.send(Command::SetIntervals {
            gps,
            gps_reduced,
            network,
            network_reduced,
        })
        .await
    }

    pub async fn set_battery_levels(&self, minimum: f32, reduced: f32) -> Result<()> {
        self.send(Command::SetBatteryLevels { minimum, reduced }).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|e| crate::error::ArgusError::Lifecycle(format!("Controller stopped: {}", e)))
    }
}

/// Owner of the adaptive sampling controller task
///
/// Shutting down stops the loop and releases all location subscriptions.
/// The loop exits once the owner and every cloned [`SamplingHandle`] are
/// dropped.
pub struct SamplingController {
    handle: SamplingHandle,
    task: JoinHandle<()>,
}

impl SamplingController {
    /// Spawn the controller loop and apply the initial power status
    pub fn spawn(
        stream: Box<dyn LocationStream>,
        params: SamplingParams,
        initial_power: PowerStatus,
    ) -> Self {
        let (commands, mut rx) = mpsc::channel(16);
        let mut worker = ControllerWorker::new(stream, params, initial_power);

        let task = tokio::spawn(async move {
            worker.apply().await;
            while let Some(command) = rx.recv().await {
                worker.handle_command(command).await;
            }
            // Channel closed: release subscriptions before exiting
            if let Err(e) = worker.stream.unsubscribe_all().await {
                warn!("Failed to release location subscriptions: {}", e);
            }
            debug!("Sampling controller stopped");
        });

        Self {
            handle: SamplingHandle { commands },
            task,
        }
    }

    pub fn handle(&self) -> SamplingHandle {
        self.handle.clone()
    }

    /// Stop the loop and wait for subscriptions to be released
    ///
    /// Cloned handles must be dropped first or the loop keeps serving them.
    pub async fn shutdown(self) {
        let Self { handle, task } = self;
        drop(handle);
        if let Err(e) = task.await {
            warn!("Sampling controller task panicked: {}", e);
        }
    }
}

/// State owned exclusively by the controller task
struct ControllerWorker {
    stream: Box<dyn LocationStream>,
    params: SamplingParams,
    /// None forces the next event to reapply subscriptions
    frequency: Option<SamplingFrequency>,
    last_power: PowerStatus,
    /// Flipped off permanently when a provider is unavailable
    gps_available: bool,
    network_available: bool,
}

impl ControllerWorker {
    fn new(stream: Box<dyn LocationStream>, params: SamplingParams, power: PowerStatus) -> Self {
        Self {
            stream,
            params,
            frequency: None,
            last_power: power,
            gps_available: true,
            network_available: true,
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::BatteryChanged(power) => {
                self.last_power = power;
                self.apply().await;
            }
            Command::SetIntervals {
                gps,
                gps_reduced,
                network,
                network_reduced,
            } => {
                if self.params.gps_interval == gps
                    && self.params.gps_interval_reduced == gps_reduced
                    && self.params.network_interval == network
                    && self.params.network_interval_reduced == network_reduced
                {
                    return;
                }
                self.params.gps_interval = gps;
                self.params.gps_interval_reduced = gps_reduced;
                self.params.network_interval = network;
                self.params.network_interval_reduced = network_reduced;

                // The state label may be unchanged while the underlying
                // intervals differ, so force a full reapply
                self.frequency = None;
                self.apply().await;
            }
            Command::SetBatteryLevels { minimum, reduced } => {
                if self.params.battery_minimum == minimum
                    && self.params.battery_reduced == reduced
                {
                    return;
                }
                self.params.battery_minimum = minimum;
                self.params.battery_reduced = reduced;
                self.frequency = None;
                self.apply().await;
            }
        }
    }

    /// Recompute the target state and resubscribe if it changed
    async fn apply(&mut self) {
        let target = target_frequency(self.last_power, &self.params);
        if self.frequency == Some(target) {
            return;
        }
        self.frequency = Some(target);

        if target == SamplingFrequency::Off {
            info!("Battery below minimum, turning location sampling off");
            if let Err(e) = self.stream.unsubscribe_all().await {
                warn!("Failed to unsubscribe location providers: {}", e);
            }
            return;
        }

        let (gps_interval, network_interval) = if target == SamplingFrequency::Normal {
            (self.params.gps_interval, self.params.network_interval)
        } else {
            (
                self.params.gps_interval_reduced,
                self.params.network_interval_reduced,
            )
        };

        if let Err(e) = self.stream.unsubscribe_all().await {
            warn!("Failed to clear location subscriptions: {}", e);
        }

        if gps_interval.is_zero() {
            info!("GPS gathering disabled in settings");
        } else if self.gps_available {
            match self.stream.subscribe(ProviderKind::Gps, gps_interval).await {
                Ok(()) => info!("GPS sampling at {:?} ({:?})", gps_interval, target),
                Err(e) => {
                    warn!("GPS provider unavailable, disabling: {}", e);
                    self.gps_available = false;
                }
            }
        }

        if network_interval.is_zero() {
            info!("Network location gathering disabled in settings");
        } else if self.network_available {
            match self
                .stream
                .subscribe(ProviderKind::Network, network_interval)
                .await
            {
                Ok(()) => info!("Network sampling at {:?} ({:?})", network_interval, target),
                Err(e) => {
                    warn!("Network provider unavailable, disabling: {}", e);
                    self.network_available = false;
                }
            }
        }
    }
}
