//! Collector pipelines against in-memory fakes
//!
//! Exercises the full path from raw source rows to anonymized records in the
//! sink, including watermark persistence, contact diffing and the location
//! fix loop.

use argus_core::config::{ContactSettings, LocationSettings, LogSettings};
use argus_core::error::Result;
use argus_core::{
    CollectorState, ContactCollector, CountSource, KeyValueStore, KeyedSource, LocationCollector,
    LocationStream, LogCollector, MemoryStore, PowerMonitor, PowerStatus, ProviderKind, Record,
    RecordSource, Sink,
};
use argus_core::types::{CallRow, LocationFix, MessageRow, MessageType};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const T0: i64 = 1_700_000_000_000;

/// Route collector logs through the test harness when RUST_LOG is set
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct VecSink {
    records: Mutex<Vec<Record>>,
}

impl VecSink {
    fn take(&self) -> Vec<Record> {
        std::mem::take(&mut *self.records.lock().unwrap())
    }

    fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl Sink for VecSink {
    async fn publish(&self, record: Record) -> Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

struct CallSource(Vec<CallRow>);

#[async_trait]
impl RecordSource for CallSource {
    type Row = CallRow;

    async fn query(&self, newer_than: i64, limit: usize) -> Result<Vec<CallRow>> {
        Ok(self
            .0
            .iter()
            .filter(|r| r.date_ms > newer_than)
            .take(limit)
            .cloned()
            .collect())
    }
}

struct MessageSource(Vec<MessageRow>);

#[async_trait]
impl RecordSource for MessageSource {
    type Row = MessageRow;

    async fn query(&self, newer_than: i64, limit: usize) -> Result<Vec<MessageRow>> {
        Ok(self
            .0
            .iter()
            .filter(|r| r.date_ms > newer_than)
            .take(limit)
            .cloned()
            .collect())
    }
}

struct FixedCount(usize);

#[async_trait]
impl CountSource for FixedCount {
    async fn count_matching(&self) -> Result<usize> {
        Ok(self.0)
    }
}

fn call_row(offset: i64, target: &str, contact: bool) -> CallRow {
    CallRow {
        date_ms: T0 + offset,
        target: target.to_string(),
        duration_seconds: 42.0,
        type_code: 1,
        contact_lookup: contact.then(|| "lookup".to_string()),
    }
}

fn message_row(offset: i64, target: &str, type_code: i32) -> MessageRow {
    MessageRow {
        date_ms: T0 + offset,
        target: target.to_string(),
        type_code,
        body: "hello there".to_string(),
        person_id: 7,
    }
}

fn log_settings() -> LogSettings {
    LogSettings {
        poll_interval_secs: 3600,
        page_limit: 2,
    }
}

#[tokio::test]
async fn log_collector_anonymizes_and_persists_watermarks() {
    init_tracing();
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    store.set_i64("last.call.time", T0).unwrap();
    store.set_i64("last.sms.time", T0).unwrap();

    let sink = Arc::new(VecSink::default());
    let calls = Arc::new(CallSource(vec![
        call_row(1, "+31612345678", true),
        call_row(2, "Dropbox", false),
        call_row(3, "-1", false),
    ]));
    let messages = Arc::new(MessageSource(vec![
        message_row(1, "0612345678", 1),
        message_row(2, "0612345678", 2),
    ]));

    let collector = LogCollector::new(
        calls,
        messages,
        Arc::new(FixedCount(4)),
        sink.clone(),
        store.clone(),
        &log_settings(),
    )
    .unwrap();

    collector.poll_once().await.unwrap();
    let records = sink.take();

    let call_records: Vec<_> = records
        .iter()
        .filter_map(|r| match r {
            Record::Call(c) => Some(c),
            _ => None,
        })
        .collect();
    assert_eq!(call_records.len(), 3);

    // Numeric target: hashed, numeric
    assert!(call_records[0].target_key.is_some());
    assert!(!call_records[0].target_is_non_numeric);
    assert!(call_records[0].target_is_known_contact);
    // Raw identifier never appears in serialized output
    let json = serde_json::to_string(&records).unwrap();
    assert!(!json.contains("31612345678"));

    // Text target: hashed opaquely
    assert!(call_records[1].target_key.is_some());
    assert!(call_records[1].target_is_non_numeric);
    // Negative sentinel: no key at all
    assert!(call_records[2].target_key.is_none());

    let message_records: Vec<_> = records
        .iter()
        .filter_map(|r| match r {
            Record::Message(m) => Some(m),
            _ => None,
        })
        .collect();
    assert_eq!(message_records.len(), 2);
    assert_eq!(message_records[0].message_type, MessageType::Incoming);
    assert_eq!(message_records[0].sender_is_known_contact, Some(true));
    assert_eq!(message_records[0].body_length, 11);
    // Outgoing: sender contact information unknown
    assert_eq!(message_records[1].message_type, MessageType::Outgoing);
    assert_eq!(message_records[1].sender_is_known_contact, None);

    // A prefixed and an unprefixed rendering of the same number group
    assert_eq!(call_records[0].target_key, message_records[0].target_key);

    assert!(records
        .iter()
        .any(|r| matches!(r, Record::UnreadMessages(u) if u.count == 4)));

    // Watermarks advanced and persisted
    assert_eq!(store.get_i64("last.call.time").unwrap(), Some(T0 + 3));
    assert_eq!(store.get_i64("last.sms.time").unwrap(), Some(T0 + 2));

    // A second cycle only re-reports the unread count
    collector.poll_once().await.unwrap();
    let records = sink.take();
    assert_eq!(records.len(), 1);
    assert!(matches!(records[0], Record::UnreadMessages(_)));
}

/// Store whose writes always fail, as on a full or read-only filesystem
struct RejectingStore;

impl KeyValueStore for RejectingStore {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set(&self, key: &str, _value: &str) -> Result<()> {
        Err(argus_core::ArgusError::Store(format!(
            "Write rejected at {}",
            key
        )))
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn log_collector_refuses_to_run_without_persisted_salt() {
    init_tracing();
    let store: Arc<dyn KeyValueStore> = Arc::new(RejectingStore);
    let sink = Arc::new(VecSink::default());

    // Salt persistence fails, so construction fails and no identifier is
    // ever hashed against a salt that would vanish on restart
    let result = LogCollector::new(
        Arc::new(CallSource(vec![call_row(1, "+31612345678", true)])),
        Arc::new(MessageSource(vec![])),
        Arc::new(FixedCount(0)),
        sink.clone(),
        store,
        &log_settings(),
    );
    assert!(result.is_err());
    assert_eq!(sink.len(), 0);
}

#[tokio::test]
async fn log_collector_lifecycle() {
    init_tracing();
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let mut collector = LogCollector::new(
        Arc::new(CallSource(vec![])),
        Arc::new(MessageSource(vec![])),
        Arc::new(FixedCount(0)),
        Arc::new(VecSink::default()),
        store,
        &log_settings(),
    )
    .unwrap();

    assert_eq!(collector.state(), CollectorState::Created);
    collector.start().unwrap();
    assert_eq!(collector.state(), CollectorState::Running);
    assert!(collector.start().is_err());

    collector.close().await;
    assert_eq!(collector.state(), CollectorState::Closed);
    assert!(collector.poll_once().await.is_err());
    // Closing again is a no-op
    collector.close().await;
}

struct ContactSource {
    keys: Mutex<HashSet<String>>,
}

impl ContactSource {
    fn new(keys: &[&str]) -> Self {
        Self {
            keys: Mutex::new(keys.iter().map(|k| k.to_string()).collect()),
        }
    }

    fn replace(&self, keys: &[&str]) {
        *self.keys.lock().unwrap() = keys.iter().map(|k| k.to_string()).collect();
    }
}

#[async_trait]
impl KeyedSource for ContactSource {
    async fn page_after(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>> {
        let mut sorted: Vec<String> = self.keys.lock().unwrap().iter().cloned().collect();
        sorted.sort();
        Ok(sorted
            .into_iter()
            .filter(|k| after.map_or(true, |a| k.as_str() > a))
            .take(limit)
            .collect())
    }
}

#[tokio::test]
async fn contact_collector_reports_aggregate_diffs() {
    init_tracing();
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    store.set("contact_ids", "[1,2,3]").unwrap();

    let source = Arc::new(ContactSource::new(&["a", "b", "c"]));
    let sink = Arc::new(VecSink::default());
    let collector = ContactCollector::new(
        source.clone(),
        sink.clone(),
        store.clone(),
        &ContactSettings {
            poll_interval_secs: 3600,
            page_limit: 2,
        },
    )
    .unwrap();

    // The superseded id-based key is dropped on construction
    assert_eq!(store.get("contact_ids").unwrap(), None);

    // First cycle: no baseline, only the total
    collector.poll_once().await.unwrap();
    let records = sink.take();
    let Record::ContactDiff(first) = &records[0] else {
        panic!("expected contact diff");
    };
    assert_eq!(first.added, None);
    assert_eq!(first.removed, None);
    assert_eq!(first.total, 3);

    // {a,b,c} -> {b,c,d}: one added, one removed
    source.replace(&["b", "c", "d"]);
    collector.poll_once().await.unwrap();
    let records = sink.take();
    let Record::ContactDiff(second) = &records[0] else {
        panic!("expected contact diff");
    };
    assert_eq!(second.added, Some(1));
    assert_eq!(second.removed, Some(1));
    assert_eq!(second.total, 3);

    // Snapshot persisted for the next process run
    let saved = store.get_string_set("contact_lookups").unwrap().unwrap();
    assert!(saved.contains("d") && !saved.contains("a"));
}

#[derive(Clone, Default)]
struct RecordingStream {
    subscriptions: Arc<Mutex<Vec<(ProviderKind, Duration)>>>,
}

#[async_trait]
impl LocationStream for RecordingStream {
    async fn subscribe(&mut self, provider: ProviderKind, interval: Duration) -> Result<()> {
        self.subscriptions.lock().unwrap().push((provider, interval));
        Ok(())
    }

    async fn unsubscribe_all(&mut self) -> Result<()> {
        Ok(())
    }
}

struct FakePower {
    current: PowerStatus,
    tx: watch::Sender<PowerStatus>,
}

impl FakePower {
    fn new(current: PowerStatus) -> Self {
        let (tx, _) = watch::channel(current);
        Self { current, tx }
    }
}

#[async_trait]
impl PowerMonitor for FakePower {
    async fn current(&self) -> Result<PowerStatus> {
        Ok(self.current)
    }

    fn watch(&self) -> watch::Receiver<PowerStatus> {
        self.tx.subscribe()
    }
}

fn gps_fix(longitude: f64) -> LocationFix {
    LocationFix {
        time_ms: T0,
        provider: "gps".to_string(),
        latitude: 52.0,
        longitude,
        altitude: Some(10.0),
        accuracy: Some(5.0),
        speed: None,
        bearing: None,
    }
}

#[tokio::test]
async fn location_collector_emits_relative_records() {
    init_tracing();
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let sink = Arc::new(VecSink::default());
    let stream = RecordingStream::default();
    let power = Arc::new(FakePower::new(PowerStatus {
        level: 0.8,
        is_charging: false,
    }));
    let (fix_tx, fix_rx) = mpsc::channel(8);

    let mut collector = LocationCollector::new(
        Box::new(stream.clone()),
        fix_rx,
        power.clone(),
        sink.clone(),
        store,
        LocationSettings::default(),
    )
    .unwrap();
    collector.start().await.unwrap();

    fix_tx.send(gps_fix(4.0)).await.unwrap();
    fix_tx.send(gps_fix(5.0)).await.unwrap();

    // Wait for the fix loop to process both
    for _ in 0..100 {
        if sink.len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    collector.close().await;
    assert_eq!(collector.state(), CollectorState::Closed);

    let records = sink.take();
    let locations: Vec<_> = records
        .iter()
        .filter_map(|r| match r {
            Record::Location(l) => Some(l),
            _ => None,
        })
        .collect();
    assert_eq!(locations.len(), 2);
    assert_eq!(locations[0].provider, ProviderKind::Gps);
    // First fix establishes the longitude reference
    assert_eq!(locations[0].relative_longitude, Some(0.0));
    assert_eq!(locations[1].relative_longitude, Some(1.0));
    assert_eq!(locations[0].relative_altitude, Some(0.0));
    assert_eq!(locations[0].accuracy, Some(5.0));
    assert_eq!(locations[0].speed, None);

    // Normal battery: unreduced intervals were requested
    let subs = stream.subscriptions.lock().unwrap();
    assert!(subs.contains(&(ProviderKind::Gps, Duration::from_secs(900))));
    assert!(subs.contains(&(ProviderKind::Network, Duration::from_secs(300))));
}
