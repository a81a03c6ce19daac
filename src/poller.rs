//! Watermark-based incremental polling
//!
//! The same loop drives every log-backed collector: read everything with an
//! ordering value strictly greater than the persisted watermark, in bounded
//! ascending pages, advancing the watermark only past rows that were actually
//! handled. Re-running a completed cycle therefore observes zero rows, and an
//! interrupted cycle resumes exactly where it stopped.
//!
//! Two variants exist for sources without a usable watermark: a single
//! bounded count per cycle (unread messages) and keyed full-set pagination
//! (contact enumeration), where the last sort key of each page bounds the
//! next page within one cycle only.

use crate::error::Result;
use crate::source::{KeyedSource, RecordSource, Sequenced};
use crate::store::KeyValueStore;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Persisted high-water mark on a source's ordering field
///
/// Never decreases. Advanced in memory per handled row, committed to the
/// store after each page and at cycle end.
pub struct Watermark {
    key: String,
    value: i64,
    store: Arc<dyn KeyValueStore>,
}

impl Watermark {
    /// Load the watermark, seeding it with `default` on first run
    ///
    /// The default is typically "now": only events after installation are
    /// ever collected.
    pub fn load(store: Arc<dyn KeyValueStore>, key: &str, default: i64) -> Result<Self> {
        let value = store.get_i64(key)?.unwrap_or(default);
        Ok(Self {
            key: key.to_string(),
            value,
            store,
        })
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    /// Advance past a handled row; lower values are ignored
    fn advance(&mut self, value: i64) {
        if value > self.value {
            self.value = value;
        }
    }

    /// Persist the current value
    pub fn commit(&self) -> Result<()> {
        self.store.set_i64(&self.key, self.value)
    }
}

/// Per-row callback invoked by the poller
///
/// A handler error aborts the cycle without advancing the watermark past
/// the failed row.
#[async_trait]
pub trait RowHandler<Row>: Send {
    async fn handle(&mut self, row: Row) -> Result<()>;
}

/// Drain all rows newer than the watermark, in order, in bounded pages
///
/// Returns the number of rows handled this cycle. Failures are logged and
/// abort the cycle; watermark progress up to the last handled row is kept,
/// so the next cycle retries from there. Cancellation is checked between
/// rows, not just between pages, to bound shutdown latency.
pub async fn poll_new<S>(
    source: &S,
    watermark: &mut Watermark,
    page_limit: usize,
    cancel: &CancellationToken,
    handler: &mut dyn RowHandler<S::Row>,
) -> usize
where
    S: RecordSource + ?Sized,
{
    // A zero limit could never satisfy the drain check below
    let page_limit = page_limit.max(1);
    let mut handled = 0usize;

    'cycle: while !cancel.is_cancelled() {
        let page = match source.query(watermark.value(), page_limit).await {
            Ok(page) => page,
            Err(e) => {
                error!("Source query failed, aborting cycle: {}", e);
                break;
            }
        };
        let page_len = page.len();

        for row in page {
            if cancel.is_cancelled() {
                debug!("Cancellation observed mid-page after {} rows", handled);
                break 'cycle;
            }
            let sequence = row.sequence();
            if let Err(e) = handler.handle(row).await {
                error!("Row handler failed, aborting cycle: {}", e);
                break 'cycle;
            }
            watermark.advance(sequence);
            handled += 1;
        }

        if let Err(e) = watermark.commit() {
            error!("Watermark commit failed, aborting cycle: {}", e);
            return handled;
        }

        // A short page means the source is drained
        if page_len < page_limit {
            break;
        }
    }

    if let Err(e) = watermark.commit() {
        error!("Final watermark commit failed: {}", e);
    }
    handled
}

/// Enumerate a full key set using keyed pagination
///
/// The resumable offset is the last sort key of the previous page, held only
/// for the duration of one cycle. A query failure skips the whole cycle
/// (partial membership snapshots would corrupt the diff baseline).
pub async fn scan_keys<S>(
    source: &S,
    page_limit: usize,
    cancel: &CancellationToken,
) -> Result<HashSet<String>>
where
    S: KeyedSource + ?Sized,
{
    let page_limit = page_limit.max(1);
    let mut keys = HashSet::new();
    let mut last_key: Option<String> = None;

    loop {
        let page = source.page_after(last_key.as_deref(), page_limit).await?;
        let page_len = page.len();

        if let Some(last) = page.last() {
            last_key = Some(last.clone());
        }
        keys.extend(page);

        if page_len < page_limit {
            break;
        }
        if cancel.is_cancelled() {
            warn!("Key enumeration cancelled after {} keys", keys.len());
            break;
        }
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArgusError;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SeqRow(i64);

    impl Sequenced for SeqRow {
        fn sequence(&self) -> i64 {
            self.0
        }
    }

    /// Source backed by a fixed set of sequence values
    struct FixedSource {
        values: Vec<i64>,
        queries: AtomicUsize,
        fail_on_query: Option<usize>,
    }

    impl FixedSource {
        fn new(values: Vec<i64>) -> Self {
            Self {
                values,
                queries: AtomicUsize::new(0),
                fail_on_query: None,
            }
        }
    }

    #[async_trait]
    impl RecordSource for FixedSource {
        type Row = SeqRow;

        async fn query(&self, newer_than: i64, limit: usize) -> Result<Vec<SeqRow>> {
            let n = self.queries.fetch_add(1, Ordering::SeqCst);
            if Some(n) == self.fail_on_query {
                return Err(ArgusError::Source("injected failure".into()));
            }
            Ok(self
                .values
                .iter()
                .filter(|v| **v > newer_than)
                .take(limit)
                .map(|v| SeqRow(*v))
                .collect())
        }
    }

    #[derive(Default)]
    struct Collecting {
        seen: Vec<i64>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    #[async_trait]
    impl RowHandler<SeqRow> for Collecting {
        async fn handle(&mut self, row: SeqRow) -> Result<()> {
            self.seen.push(row.0);
            if let Some((count, token)) = &self.cancel_after {
                if self.seen.len() >= *count {
                    token.cancel();
                }
            }
            Ok(())
        }
    }

    fn watermark(start: i64) -> Watermark {
        Watermark::load(Arc::new(MemoryStore::new()), "last.test.time", start).unwrap()
    }

    #[tokio::test]
    async fn test_drains_in_pages_and_is_idempotent() {
        let source = FixedSource::new((1..=25).collect());
        let mut wm = watermark(0);
        let cancel = CancellationToken::new();

        let mut handler = Collecting::default();
        let handled = poll_new(&source, &mut wm, 10, &cancel, &mut handler).await;
        assert_eq!(handled, 25);
        assert_eq!(wm.value(), 25);
        assert_eq!(handler.seen, (1..=25).collect::<Vec<_>>());
        // pages of 10, 10, 5
        assert_eq!(source.queries.load(Ordering::SeqCst), 3);

        // Re-running a completed cycle observes nothing
        let mut handler = Collecting::default();
        let handled = poll_new(&source, &mut wm, 10, &cancel, &mut handler).await;
        assert_eq!(handled, 0);
        assert!(handler.seen.is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_keeps_partial_progress() {
        let mut source = FixedSource::new((1..=20).collect());
        source.fail_on_query = Some(1);
        let mut wm = watermark(0);
        let cancel = CancellationToken::new();

        let mut handler = Collecting::default();
        let handled = poll_new(&source, &mut wm, 10, &cancel, &mut handler).await;
        assert_eq!(handled, 10);
        assert_eq!(wm.value(), 10);

        // Next cycle resumes exactly after the last handled row
        let mut handler = Collecting::default();
        let handled = poll_new(&source, &mut wm, 10, &cancel, &mut handler).await;
        assert_eq!(handled, 10);
        assert_eq!(handler.seen, (11..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_cancellation_between_rows() {
        let source = FixedSource::new((1..=10).collect());
        let mut wm = watermark(0);
        let cancel = CancellationToken::new();

        let mut handler = Collecting {
            cancel_after: Some((3, cancel.clone())),
            ..Default::default()
        };
        let handled = poll_new(&source, &mut wm, 10, &cancel, &mut handler).await;
        assert_eq!(handled, 3);
        // Watermark tracks exactly the handled rows
        assert_eq!(wm.value(), 3);
    }

    #[tokio::test]
    async fn test_watermark_persists_across_loads() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let source = FixedSource::new((1..=5).collect());
        let cancel = CancellationToken::new();

        let mut wm = Watermark::load(store.clone(), "last.call.time", 0).unwrap();
        let mut handler = Collecting::default();
        poll_new(&source, &mut wm, 10, &cancel, &mut handler).await;

        let reloaded = Watermark::load(store, "last.call.time", 0).unwrap();
        assert_eq!(reloaded.value(), 5);
    }

    #[tokio::test]
    async fn test_zero_page_limit_still_drains() {
        let source = FixedSource::new((1..=5).collect());
        let mut wm = watermark(0);
        let cancel = CancellationToken::new();

        let mut handler = Collecting::default();
        let handled = poll_new(&source, &mut wm, 0, &cancel, &mut handler).await;
        assert_eq!(handled, 5);
        assert_eq!(wm.value(), 5);
    }

    struct PagedKeys {
        keys: Vec<String>,
    }

    #[async_trait]
    impl KeyedSource for PagedKeys {
        async fn page_after(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>> {
            let mut sorted = self.keys.clone();
            sorted.sort();
            Ok(sorted
                .into_iter()
                .filter(|k| after.map_or(true, |a| k.as_str() > a))
                .take(limit)
                .collect())
        }
    }

    #[tokio::test]
    async fn test_keyed_scan_collects_all_pages() {
        let source = PagedKeys {
            keys: (0..7).map(|i| format!("k{}", i)).collect(),
        };
        let cancel = CancellationToken::new();
        let keys = scan_keys(&source, 3, &cancel).await.unwrap();
        assert_eq!(keys.len(), 7);
    }

    #[tokio::test]
    async fn test_keyed_scan_with_zero_limit_terminates() {
        let source = PagedKeys {
            keys: vec!["a".to_string(), "b".to_string()],
        };
        let cancel = CancellationToken::new();
        let keys = scan_keys(&source, 0, &cancel).await.unwrap();
        assert_eq!(keys.len(), 2);
    }
}
