//! Core data types for the Argus collection core
//!
//! Defines the produced record shapes (calls, messages, unread counts,
//! contact diffs, location fixes), the raw row shapes consumed from record
//! sources, and the anonymized key type emitted by the identity hasher.
//!
//! Timestamps are epoch seconds as `f64`: `event_time` is when the underlying
//! event happened, `received_time` is when this agent observed it.

use chrono::Utc;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Current time as fractional epoch seconds
pub fn current_time() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Fixed-width anonymized identifier key
///
/// The full HMAC-SHA256 output over a normalized identifier, keyed with the
/// per-installation salt. Stable for a given (identifier, salt) pair and not
/// reversible without the salt. Rendered as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnonymizedKey([u8; 32]);

impl AnonymizedKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering of the key
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl std::fmt::Display for AnonymizedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for AnonymizedKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AnonymizedKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        if hex.len() != 64 {
            return Err(D::Error::custom("anonymized key must be 64 hex characters"));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).map_err(D::Error::custom)?;
            bytes[i] = u8::from_str_radix(s, 16).map_err(D::Error::custom)?;
        }
        Ok(Self(bytes))
    }
}

/// Direction/outcome of a call log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Incoming,
    Outgoing,
    Missed,
    Voicemail,
    Unknown,
}

/// Direction of a message log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Incoming,
    Outgoing,
    Other,
    Unknown,
}

/// Positioning technology that produced a location fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Gps,
    Network,
    Other,
}

impl ProviderKind {
    /// Total mapping from a raw provider name; anything unrecognized is Other
    pub fn from_name(name: &str) -> Self {
        match name {
            "gps" => ProviderKind::Gps,
            "network" => ProviderKind::Network,
            _ => ProviderKind::Other,
        }
    }
}

/// Anonymized call record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub event_time: f64,
    pub received_time: f64,
    pub duration_seconds: f32,
    /// Absent when the target was a negative-number sentinel
    pub target_key: Option<AnonymizedKey>,
    pub call_type: CallType,
    pub target_is_known_contact: bool,
    /// True when the raw target was not a phone number (e.g. a service name)
    pub target_is_non_numeric: bool,
    pub raw_target_length: usize,
}

/// Anonymized message record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub event_time: f64,
    pub received_time: f64,
    pub target_key: Option<AnonymizedKey>,
    pub message_type: MessageType,
    /// Character count of the body; the body itself is never emitted
    pub body_length: usize,
    /// Only known for incoming messages; absent for outgoing
    pub sender_is_known_contact: Option<bool>,
    pub target_is_non_numeric: bool,
    pub raw_target_length: usize,
}

/// Number of currently unread messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreadRecord {
    pub event_time: f64,
    pub received_time: f64,
    pub count: usize,
}

/// Aggregate contact-list membership change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactDiffRecord {
    pub event_time: f64,
    pub received_time: f64,
    /// Absent on the first cycle, when no baseline snapshot exists
    pub added: Option<usize>,
    pub removed: Option<usize>,
    pub total: usize,
}

/// Privacy-preserving relative location record
///
/// Coordinates are offsets from a per-installation reference point, so the
/// absolute position never leaves the device. Absent raw fields stay absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub event_time: f64,
    pub received_time: f64,
    pub provider: ProviderKind,
    pub relative_latitude: Option<f64>,
    pub relative_longitude: Option<f64>,
    pub relative_altitude: Option<f64>,
    pub accuracy: Option<f32>,
    pub speed: Option<f32>,
    pub bearing: Option<f32>,
}

/// Union of all record shapes handed to the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Record {
    Call(CallRecord),
    Message(MessageRecord),
    UnreadMessages(UnreadRecord),
    ContactDiff(ContactDiffRecord),
    Location(LocationRecord),
}

/// Raw call log row as delivered by a record source
#[derive(Debug, Clone)]
pub struct CallRow {
    /// Epoch milliseconds; the ordering field for call polling
    pub date_ms: i64,
    pub target: String,
    pub duration_seconds: f32,
    pub type_code: i32,
    /// Present when the target resolved to a saved contact
    pub contact_lookup: Option<String>,
}

/// Raw message log row as delivered by a record source
#[derive(Debug, Clone)]
pub struct MessageRow {
    /// Epoch milliseconds; the ordering field for message polling
    pub date_ms: i64,
    pub target: String,
    pub type_code: i32,
    pub body: String,
    /// Contact id of the sender; zero or negative means not a saved contact
    pub person_id: i64,
}

/// Raw location fix as delivered by a location stream
#[derive(Debug, Clone)]
pub struct LocationFix {
    pub time_ms: i64,
    pub provider: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub accuracy: Option<f32>,
    pub speed: Option<f32>,
    pub bearing: Option<f32>,
}
