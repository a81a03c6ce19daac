//! Argus - Passive Telemetry Collection Core
//!
//! The collection core of a passive telemetry agent: it repeatedly harvests
//! *new* records from append-only local logs (call history, message history,
//! unread-message counts, contact-list membership, location fixes), converts
//! identifying fields into privacy-preserving anonymized keys, and adapts
//! its location-sampling rate to available power.
//!
//! # Architecture
//!
//! - **Poller**: generic, resumable cursor-based incremental polling that
//!   observes each new row exactly once across repeated invocations
//! - **Hash**: deterministic salted one-way anonymization of phone numbers
//!   and contact identifiers, preserving groupability within an installation
//! - **Sampling**: battery-driven frequency state machine with hysteresis,
//!   serialized through a single-writer command loop
//! - **Collectors**: serialized per-source workers wiring sources, the
//!   hasher and the coordinate transform to the record sink
//!
//! Concrete data sources, the publishing transport, scheduling and
//! permission handling live in the host; Argus consumes them through the
//! traits in [`source`] and [`store`].
//!
//! # Example
//!
//! ```ignore
//! use argus_core::{ArgusConfig, LogCollector};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ArgusConfig::load(None)?;
//!     let store = Arc::new(argus_core::store::JsonFileStore::open("argus.json")?);
//!
//!     let mut collector = LogCollector::new(
//!         call_source, message_source, unread_source, sink, store, &config.logs,
//!     )?;
//!     collector.start()?;
//!     // ... until shutdown:
//!     collector.close().await;
//!     Ok(())
//! }
//! ```

pub mod collectors;
pub mod config;
pub mod diff;
pub mod error;
pub mod hash;
pub mod location;
pub mod poller;
pub mod sampling;
pub mod source;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use collectors::{CollectorState, ContactCollector, LocationCollector, LogCollector};
pub use config::ArgusConfig;
pub use error::{ArgusError, Result};
pub use hash::IdentityHasher;
pub use poller::{poll_new, scan_keys, RowHandler, Watermark};
pub use sampling::{target_frequency, SamplingController, SamplingFrequency, SamplingParams};
pub use source::{
    CountSource, KeyedSource, LocationStream, PowerMonitor, PowerStatus, RecordSource, Sequenced,
    Sink,
};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
pub use types::{
    AnonymizedKey, CallRecord, CallType, ContactDiffRecord, LocationFix, LocationRecord,
    MessageRecord, MessageType, ProviderKind, Record, UnreadRecord,
};
