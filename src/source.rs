//! Collaborator interfaces at the system boundary
//!
//! The concrete platform data sources, the publishing transport and the
//! power signal live outside this crate; these traits describe the contract
//! Argus polls against. Implementations are provided by the host.

use crate::error::Result;
use crate::types::{ProviderKind, Record};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;

/// A row type carrying the monotonic ordering field used for watermarks
pub trait Sequenced {
    /// Ordering value of this row (epoch milliseconds for log rows)
    fn sequence(&self) -> i64;
}

impl Sequenced for crate::types::CallRow {
    fn sequence(&self) -> i64 {
        self.date_ms
    }
}

impl Sequenced for crate::types::MessageRow {
    fn sequence(&self) -> i64 {
        self.date_ms
    }
}

/// Append-only log queried in bounded pages by a strict ordering field
///
/// `query` must return rows with ordering value strictly greater than
/// `newer_than`, sorted ascending, at most `limit` rows. A short page
/// signals exhaustion.
#[async_trait]
pub trait RecordSource: Send + Sync {
    type Row: Sequenced + Send + 'static;

    async fn query(&self, newer_than: i64, limit: usize) -> Result<Vec<Self::Row>>;
}

/// Source answering a single bounded count query per cycle
#[async_trait]
pub trait CountSource: Send + Sync {
    async fn count_matching(&self) -> Result<usize>;
}

/// Full-set enumeration paged by a stable sort key
///
/// Row-count offsets are unstable under concurrent mutation, so paging uses
/// "sort key strictly greater than the last key of the previous page".
/// `after` of `None` requests the first page.
#[async_trait]
pub trait KeyedSource: Send + Sync {
    async fn page_after(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>>;
}

/// Fire-and-forget record publisher
///
/// Buffering and retry live in the transport above this layer.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn publish(&self, record: Record) -> Result<()>;
}

/// Battery level and charging state at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerStatus {
    /// Battery level in `[0, 1]`
    pub level: f32,
    pub is_charging: bool,
}

/// Power signal source: current value on demand plus a change stream
#[async_trait]
pub trait PowerMonitor: Send + Sync {
    async fn current(&self) -> Result<PowerStatus>;

    /// Receiver observing every battery/charging change
    fn watch(&self) -> watch::Receiver<PowerStatus>;
}

/// Platform location subscription handle
///
/// Fixes are delivered through an mpsc channel the host holds the sender
/// of; this trait only controls which providers are active and how often
/// they report. `subscribe` replaces any previous subscription for that
/// provider. A permission or availability failure is returned as an error
/// and the caller treats that provider as permanently off.
#[async_trait]
pub trait LocationStream: Send {
    async fn subscribe(&mut self, provider: ProviderKind, interval: Duration) -> Result<()>;

    async fn unsubscribe_all(&mut self) -> Result<()>;
}
