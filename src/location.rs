//! Relative-coordinate transform for location fixes
//!
//! Absolute coordinates never leave the device. Each axis is reported as an
//! offset from a persisted per-installation reference point:
//!
//! - latitude: the reference is a uniformly random offset in `[-4, 4)`,
//!   chosen independently of the first fix (corresponds mildly with the UTM
//!   zones used for flat coordinate estimation);
//! - longitude: the first observed absolute longitude becomes the reference,
//!   so the first fix reports relative longitude zero; results wrap into
//!   `[-180, 180]`;
//! - altitude: the first observed absolute altitude becomes the reference.
//!
//! References are immutable once established. Special float values are
//! sanitized before emission: NaN becomes absent, infinities become large
//! finite sentinels.

use crate::error::Result;
use crate::store::KeyValueStore;
use crate::types::{current_time, LocationFix, LocationRecord, ProviderKind};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

const LATITUDE_REFERENCE: &str = "latitude.reference";
const LONGITUDE_REFERENCE: &str = "longitude.reference";
const ALTITUDE_REFERENCE: &str = "altitude.reference";

/// Half-width of the random latitude reference interval, in degrees
const LATITUDE_REFERENCE_RANGE: f64 = 4.0;

/// Per-axis coordinate reference, established lazily on first valid fix
pub struct ReferencePoints {
    store: Arc<dyn KeyValueStore>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<f64>,
}

impl ReferencePoints {
    /// Load persisted references, migrating or discarding malformed values
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let latitude = load_decimal(&store, LATITUDE_REFERENCE);
        let longitude = load_decimal(&store, LONGITUDE_REFERENCE);
        let altitude = load_altitude(&store)?;
        Ok(Self {
            store,
            latitude,
            longitude,
            altitude,
        })
    }

    /// Transform a raw fix into a relative, sanitized location record
    pub fn transform(&mut self, fix: &LocationFix) -> Result<LocationRecord> {
        let relative_latitude = sanitize_f64(self.relative_latitude(fix.latitude)?);
        let relative_longitude = sanitize_f64(self.relative_longitude(fix.longitude)?);
        let relative_altitude = match fix.altitude {
            Some(altitude) => sanitize_f64(self.relative_altitude(altitude)?),
            None => None,
        };

        Ok(LocationRecord {
            event_time: fix.time_ms as f64 / 1000.0,
            received_time: current_time(),
            provider: ProviderKind::from_name(&fix.provider),
            relative_latitude,
            relative_longitude,
            relative_altitude,
            accuracy: fix.accuracy.and_then(sanitize_f32),
            speed: fix.speed.and_then(sanitize_f32),
            bearing: fix.bearing.and_then(sanitize_f32),
        })
    }

    fn relative_latitude(&mut self, absolute: f64) -> Result<f64> {
        if absolute.is_nan() {
            return Ok(f64::NAN);
        }
        let reference = match self.latitude {
            Some(reference) => reference,
            None => {
                // Random reference, deliberately not derived from the fix
                let reference = rand::thread_rng()
                    .gen_range(-LATITUDE_REFERENCE_RANGE..LATITUDE_REFERENCE_RANGE);
                self.store.set_f64(LATITUDE_REFERENCE, reference)?;
                self.latitude = Some(reference);
                info!("Established latitude reference");
                reference
            }
        };
        Ok(absolute - reference)
    }

    fn relative_longitude(&mut self, absolute: f64) -> Result<f64> {
        if absolute.is_nan() {
            return Ok(f64::NAN);
        }
        let reference = match self.longitude {
            Some(reference) => reference,
            None => {
                self.store.set_f64(LONGITUDE_REFERENCE, absolute)?;
                self.longitude = Some(absolute);
                info!("Established longitude reference");
                absolute
            }
        };
        let relative = absolute - reference;

        // Wraparound if outside [-180, 180]; assumes pre-wrap value
        // in [-540, 540]
        if relative > 180.0 {
            Ok(relative - 360.0)
        } else if relative < -180.0 {
            Ok(relative + 360.0)
        } else {
            Ok(relative)
        }
    }

    fn relative_altitude(&mut self, absolute: f64) -> Result<f64> {
        if absolute.is_nan() {
            return Ok(f64::NAN);
        }
        let reference = match self.altitude {
            Some(reference) => reference,
            None => {
                self.store
                    .set(ALTITUDE_REFERENCE, &absolute.to_bits().to_string())?;
                self.altitude = Some(absolute);
                info!("Established altitude reference");
                absolute
            }
        };
        Ok(absolute - reference)
    }
}

fn load_decimal(store: &Arc<dyn KeyValueStore>, key: &str) -> Option<f64> {
    match store.get_f64(key) {
        Ok(value) => value,
        Err(e) => {
            warn!("Discarding malformed reference {}: {}", key, e);
            None
        }
    }
}

/// Altitude is stored as raw f64 bits rendered as an integer string.
/// Older installations stored a decimal string instead; migrate on read.
fn load_altitude(store: &Arc<dyn KeyValueStore>) -> Result<Option<f64>> {
    let Some(raw) = store.get(ALTITUDE_REFERENCE)? else {
        return Ok(None);
    };
    if let Ok(bits) = raw.parse::<u64>() {
        return Ok(Some(f64::from_bits(bits)));
    }
    match raw.parse::<f64>() {
        Ok(legacy) => {
            debug!("Migrating legacy altitude reference format");
            store.set(ALTITUDE_REFERENCE, &legacy.to_bits().to_string())?;
            Ok(Some(legacy))
        }
        Err(e) => {
            warn!("Discarding malformed altitude reference: {}", e);
            Ok(None)
        }
    }
}

/// Replace special float values with regular numbers
pub fn sanitize_f64(value: f64) -> Option<f64> {
    if value.is_nan() {
        None
    } else if value.is_infinite() {
        Some(if value < 0.0 { -1e308 } else { 1e308 })
    } else {
        Some(value)
    }
}

/// Replace special float values with regular numbers
pub fn sanitize_f32(value: f32) -> Option<f32> {
    if value.is_nan() {
        None
    } else if value.is_infinite() {
        Some(if value < 0.0 { -3e38 } else { 3e38 })
    } else {
        Some(value)
    }
}
