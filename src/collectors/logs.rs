//! Call, message and unread-count collection
//!
//! Calls and messages are incremental watermark polls over their log's date
//! field; the unread count is a single bounded scan per cycle. All three run
//! inside one serialized worker so their cycles never overlap. Identifying
//! fields pass through the identity hasher before anything reaches the sink.

use crate::collectors::CollectorState;
use crate::config::LogSettings;
use crate::error::{ArgusError, Result};
use crate::hash::IdentityHasher;
use crate::poller::{poll_new, RowHandler, Watermark};
use crate::source::{CountSource, RecordSource, Sink};
use crate::store::KeyValueStore;
use crate::types::{
    current_time, CallRecord, CallRow, CallType, MessageRecord, MessageRow, MessageType, Record,
    UnreadRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LAST_CALL_KEY: &str = "last.call.time";
const LAST_SMS_KEY: &str = "last.sms.time";

// Call log type codes as reported by the platform
const CALL_TYPE_INCOMING: i32 = 1;
const CALL_TYPE_OUTGOING: i32 = 2;
const CALL_TYPE_MISSED: i32 = 3;
const CALL_TYPE_VOICEMAIL: i32 = 4;

// Message log type codes as reported by the platform
const MESSAGE_TYPE_ALL: i32 = 0;
const MESSAGE_TYPE_INBOX: i32 = 1;
const MESSAGE_TYPE_SENT: i32 = 2;
const MESSAGE_TYPE_DRAFT: i32 = 3;
const MESSAGE_TYPE_OUTBOX: i32 = 4;
const MESSAGE_TYPE_FAILED: i32 = 5;
const MESSAGE_TYPE_QUEUED: i32 = 6;

fn call_type_from_code(code: i32) -> CallType {
    match code {
        CALL_TYPE_INCOMING => CallType::Incoming,
        CALL_TYPE_OUTGOING => CallType::Outgoing,
        CALL_TYPE_MISSED => CallType::Missed,
        CALL_TYPE_VOICEMAIL => CallType::Voicemail,
        _ => CallType::Unknown,
    }
}

fn message_type_from_code(code: i32) -> MessageType {
    match code {
        MESSAGE_TYPE_INBOX => MessageType::Incoming,
        MESSAGE_TYPE_SENT | MESSAGE_TYPE_OUTBOX => MessageType::Outgoing,
        MESSAGE_TYPE_ALL | MESSAGE_TYPE_DRAFT | MESSAGE_TYPE_FAILED | MESSAGE_TYPE_QUEUED => {
            MessageType::Other
        }
        _ => MessageType::Unknown,
    }
}

/// Collector for the call log, message log and unread-message count
pub struct LogCollector {
    worker: Arc<Mutex<LogWorker>>,
    poll_interval: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: CollectorState,
}

impl LogCollector {
    /// Create the collector, loading watermarks from the store
    ///
    /// On first run watermarks seed from "now": only events after
    /// installation are collected.
    pub fn new(
        calls: Arc<dyn RecordSource<Row = CallRow>>,
        messages: Arc<dyn RecordSource<Row = MessageRow>>,
        unread: Arc<dyn CountSource>,
        sink: Arc<dyn Sink>,
        store: Arc<dyn KeyValueStore>,
        settings: &LogSettings,
    ) -> Result<Self> {
        let now_ms = Utc::now().timestamp_millis();
        let hasher = Arc::new(IdentityHasher::from_store(&store)?);
        let worker = LogWorker {
            calls,
            messages,
            unread,
            sink,
            hasher,
            page_limit: settings.page_limit,
            call_watermark: Watermark::load(store.clone(), LAST_CALL_KEY, now_ms)?,
            message_watermark: Watermark::load(store, LAST_SMS_KEY, now_ms)?,
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

    /// Start scheduled polling; the first cycle runs immediately
    pub fn start(&mut self) -> Result<()> {
        if self.state != CollectorState::Created {
            return Err(ArgusError::Lifecycle(format!(
                "Cannot start log collector in state {}",
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
            debug!("Log collector loop stopped");
        }));
        self.state = CollectorState::Running;
        info!("Log collector started with interval {:?}", self.poll_interval);
        Ok(())
    }

    /// Run one polling cycle immediately, serialized with scheduled cycles
    pub async fn poll_once(&self) -> Result<()> {
        if self.state == CollectorState::Closed || self.state == CollectorState::Stopping {
            return Err(ArgusError::Lifecycle(format!(
                "Cannot poll log collector in state {}",
                self.state
            )));
        }
        self.worker.lock().await.run_cycle(&self.cancel).await;
        Ok(())
    }

    /// Stop scheduling, cancel the in-flight cycle and await its completion
    pub async fn close(&mut self) {
        if self.state == CollectorState::Closed {
            return;
        }
        self.state = CollectorState::Stopping;
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Log collector task panicked: {}", e);
            }
        }
        self.state = CollectorState::Closed;
        info!("Log collector closed");
    }
}

struct LogWorker {
    calls: Arc<dyn RecordSource<Row = CallRow>>,
    messages: Arc<dyn RecordSource<Row = MessageRow>>,
    unread: Arc<dyn CountSource>,
    sink: Arc<dyn Sink>,
    hasher: Arc<IdentityHasher>,
    page_limit: usize,
    call_watermark: Watermark,
    message_watermark: Watermark,
}

impl LogWorker {
    async fn run_cycle(&mut self, cancel: &CancellationToken) {
        let mut handler = CallHandler {
            hasher: self.hasher.clone(),
            sink: self.sink.clone(),
        };
        let handled = poll_new(
            self.calls.as_ref(),
            &mut self.call_watermark,
            self.page_limit,
            cancel,
            &mut handler,
        )
        .await;
        debug!("Call cycle handled {} rows", handled);

        if cancel.is_cancelled() {
            return;
        }

        let mut handler = MessageHandler {
            hasher: self.hasher.clone(),
            sink: self.sink.clone(),
        };
        let handled = poll_new(
            self.messages.as_ref(),
            &mut self.message_watermark,
            self.page_limit,
            cancel,
            &mut handler,
        )
        .await;
        debug!("Message cycle handled {} rows", handled);

        if cancel.is_cancelled() {
            return;
        }

        match self.unread.count_matching().await {
            Ok(count) => {
                let time = current_time();
                let record = Record::UnreadMessages(UnreadRecord {
                    event_time: time,
                    received_time: time,
                    count,
                });
                if let Err(e) = self.sink.publish(record).await {
                    warn!("Failed to publish unread count: {}", e);
                } else {
                    info!("Unread messages: {}", count);
                }
            }
            Err(e) => warn!("Unread count query failed: {}", e),
        }
    }
}

struct CallHandler {
    hasher: Arc<IdentityHasher>,
    sink: Arc<dyn Sink>,
}

#[async_trait]
impl RowHandler<CallRow> for CallHandler {
    async fn handle(&mut self, row: CallRow) -> Result<()> {
        let hashed = self.hasher.hash_target(&row.target)?;
        let call_type = call_type_from_code(row.type_code);
        let record = CallRecord {
            event_time: row.date_ms as f64 / 1000.0,
            received_time: current_time(),
            duration_seconds: row.duration_seconds,
            target_key: hashed.key,
            call_type,
            target_is_known_contact: row.contact_lookup.is_some(),
            target_is_non_numeric: hashed.is_non_numeric,
            raw_target_length: row.target.chars().count(),
        };
        debug!(
            "Call: {:?} duration {}s contact? {}",
            call_type, record.duration_seconds, record.target_is_known_contact
        );
        self.sink.publish(Record::Call(record)).await
    }
}

struct MessageHandler {
    hasher: Arc<IdentityHasher>,
    sink: Arc<dyn Sink>,
}

#[async_trait]
impl RowHandler<MessageRow> for MessageHandler {
    async fn handle(&mut self, row: MessageRow) -> Result<()> {
        let hashed = self.hasher.hash_target(&row.target)?;
        let message_type = message_type_from_code(row.type_code);

        // Only incoming messages carry sender contact information;
        // for outgoing we cannot know
        let sender_is_known_contact = if message_type == MessageType::Incoming {
            Some(row.person_id > 0)
        } else {
            None
        };

        let record = MessageRecord {
            event_time: row.date_ms as f64 / 1000.0,
            received_time: current_time(),
            target_key: hashed.key,
            message_type,
            body_length: row.body.chars().count(),
            sender_is_known_contact,
            target_is_non_numeric: hashed.is_non_numeric,
            raw_target_length: row.target.chars().count(),
        };
        debug!(
            "Message: {:?} {} chars contact? {:?}",
            message_type, record.body_length, record.sender_is_known_contact
        );
        self.sink.publish(Record::Message(record)).await
    }
}
