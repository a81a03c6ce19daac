//! Collectors wiring sources, hasher, references and sink together
//!
//! Each collector owns one serialized worker: polling cycles for a source
//! never overlap, and shutdown stops scheduling, signals cancellation to the
//! in-flight cycle, awaits its completion and only then releases the source.
//! Failures are local to one collector; no collector's errors affect
//! another's scheduling or state.

pub mod contacts;
pub mod location;
pub mod logs;

pub use contacts::ContactCollector;
pub use location::LocationCollector;
pub use logs::LogCollector;

/// Explicit collector lifecycle
///
/// `start` is valid only in `Created`; `close` is terminal and idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Created,
    Running,
    Stopping,
    Closed,
}

impl std::fmt::Display for CollectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CollectorState::Created => "created",
            CollectorState::Running => "running",
            CollectorState::Stopping => "stopping",
            CollectorState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}
