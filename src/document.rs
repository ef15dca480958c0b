//! Document model for acquisition-run data streams.
//!
//! An acquisition run emits a stream of typed documents:
//!
//! - **RunStart**: run intent and metadata, opens the run
//! - **EventDescriptor**: schema for subsequent events
//! - **Event**: one measurement referencing its descriptor
//! - **RunStop**: closes the run opened by a RunStart
//!
//! plus several side-channel kinds (datum, resource, pages and their stream
//! variants) that the relay carries as opaque payloads.
//!
//! # Document flow
//!
//! ```text
//! RunStart (1)
//!    │
//!    ├── EventDescriptor (1+, one per data stream)
//!    │       │
//!    │       └── Event (N, measurements)
//!    │
//! RunStop (1)
//! ```
//!
//! The relay only reads the correlation fields (`uid`, `run_start`,
//! `descriptor`) and the `time` stamp; everything else in a payload is
//! preserved verbatim in a flattened map and forwarded untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new unique document ID.
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Current timestamp in seconds since the Unix epoch, as the acquisition
/// engine stamps its documents.
pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// The closed set of document kinds an acquisition stream can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    RunStart,
    RunStop,
    EventDescriptor,
    Event,
    Datum,
    DatumPage,
    EventPage,
    Resource,
    StreamDatum,
    StreamResource,
}

impl DocumentKind {
    /// Canonical snake_case name, used in payload tags and log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::RunStart => "run_start",
            DocumentKind::RunStop => "run_stop",
            DocumentKind::EventDescriptor => "event_descriptor",
            DocumentKind::Event => "event",
            DocumentKind::Datum => "datum",
            DocumentKind::DatumPage => "datum_page",
            DocumentKind::EventPage => "event_page",
            DocumentKind::Resource => "resource",
            DocumentKind::StreamDatum => "stream_datum",
            DocumentKind::StreamResource => "stream_resource",
        }
    }

    /// Parse a wire name into a kind.
    ///
    /// Acquisition engines have published both long (`run_start`,
    /// `event_descriptor`) and short (`start`, `descriptor`) names for the
    /// same kinds; both are accepted.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "run_start" | "start" => Some(DocumentKind::RunStart),
            "run_stop" | "stop" => Some(DocumentKind::RunStop),
            "event_descriptor" | "descriptor" => Some(DocumentKind::EventDescriptor),
            "event" => Some(DocumentKind::Event),
            "datum" => Some(DocumentKind::Datum),
            "datum_page" => Some(DocumentKind::DatumPage),
            "event_page" => Some(DocumentKind::EventPage),
            "resource" => Some(DocumentKind::Resource),
            "stream_datum" => Some(DocumentKind::StreamDatum),
            "stream_resource" => Some(DocumentKind::StreamResource),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed document, decoded once at ingestion.
///
/// The four correlated kinds carry typed correlation fields; the side-channel
/// kinds are opaque JSON payloads. Documents are immutable after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// Opens a run; its `uid` is the run identifier.
    RunStart(RunStart),
    /// Closes the run named by its `run_start` field.
    RunStop(RunStop),
    /// Declares the schema of subsequent events within a run.
    EventDescriptor(EventDescriptor),
    /// One measurement, referencing the descriptor that describes it.
    Event(Event),
    /// Opaque side-channel payload.
    Datum(Value),
    /// Opaque side-channel payload.
    DatumPage(Value),
    /// Opaque side-channel payload.
    EventPage(Value),
    /// Opaque side-channel payload.
    Resource(Value),
    /// Opaque side-channel payload.
    StreamDatum(Value),
    /// Opaque side-channel payload.
    StreamResource(Value),
}

impl Document {
    /// Decode a `(kind, payload)` wire pair into a typed document.
    pub fn from_parts(kind: DocumentKind, payload: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            DocumentKind::RunStart => Document::RunStart(serde_json::from_value(payload)?),
            DocumentKind::RunStop => Document::RunStop(serde_json::from_value(payload)?),
            DocumentKind::EventDescriptor => {
                Document::EventDescriptor(serde_json::from_value(payload)?)
            }
            DocumentKind::Event => Document::Event(serde_json::from_value(payload)?),
            DocumentKind::Datum => Document::Datum(payload),
            DocumentKind::DatumPage => Document::DatumPage(payload),
            DocumentKind::EventPage => Document::EventPage(payload),
            DocumentKind::Resource => Document::Resource(payload),
            DocumentKind::StreamDatum => Document::StreamDatum(payload),
            DocumentKind::StreamResource => Document::StreamResource(payload),
        })
    }

    /// The kind tag of this document.
    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::RunStart(_) => DocumentKind::RunStart,
            Document::RunStop(_) => DocumentKind::RunStop,
            Document::EventDescriptor(_) => DocumentKind::EventDescriptor,
            Document::Event(_) => DocumentKind::Event,
            Document::Datum(_) => DocumentKind::Datum,
            Document::DatumPage(_) => DocumentKind::DatumPage,
            Document::EventPage(_) => DocumentKind::EventPage,
            Document::Resource(_) => DocumentKind::Resource,
            Document::StreamDatum(_) => DocumentKind::StreamDatum,
            Document::StreamResource(_) => DocumentKind::StreamResource,
        }
    }

    /// The document uid, where the payload carries one.
    pub fn uid(&self) -> Option<&str> {
        match self {
            Document::RunStart(d) => Some(&d.uid),
            Document::RunStop(d) => Some(&d.uid),
            Document::EventDescriptor(d) => Some(&d.uid),
            Document::Event(d) => Some(&d.uid),
            Document::Datum(v)
            | Document::DatumPage(v)
            | Document::EventPage(v)
            | Document::Resource(v)
            | Document::StreamDatum(v)
            | Document::StreamResource(v) => v.get("uid").and_then(Value::as_str),
        }
    }
}

/// Start document, emitted at the beginning of a run.
///
/// The `uid` of the start document IS the run identifier that descriptors and
/// the stop document refer back to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStart {
    /// Unique run identifier.
    pub uid: String,
    /// Timestamp when the run started, seconds since the Unix epoch.
    pub time: f64,
    /// Remainder of the payload, forwarded untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunStart {
    /// Create a start document stamped with a fresh uid and the current time.
    pub fn new() -> Self {
        Self {
            uid: new_uid(),
            time: now_epoch(),
            extra: Map::new(),
        }
    }

    /// Attach an arbitrary payload field.
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

impl Default for RunStart {
    fn default() -> Self {
        Self::new()
    }
}

/// Stop document, emitted at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStop {
    /// Unique stop document ID.
    pub uid: String,
    /// Timestamp when the run ended, seconds since the Unix epoch.
    pub time: f64,
    /// The uid of the RunStart this document closes.
    pub run_start: String,
    /// Remainder of the payload, forwarded untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunStop {
    /// Create a stop document closing the given run.
    pub fn new(run_start: &str) -> Self {
        Self {
            uid: new_uid(),
            time: now_epoch(),
            run_start: run_start.to_string(),
            extra: Map::new(),
        }
    }
}

/// Descriptor document, defining the schema of subsequent events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDescriptor {
    /// Unique descriptor ID.
    pub uid: String,
    /// Timestamp, seconds since the Unix epoch.
    pub time: f64,
    /// The uid of the RunStart this descriptor belongs to.
    pub run_start: String,
    /// Remainder of the payload, forwarded untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventDescriptor {
    /// Create a descriptor for the given run.
    pub fn new(run_start: &str) -> Self {
        Self {
            uid: new_uid(),
            time: now_epoch(),
            run_start: run_start.to_string(),
            extra: Map::new(),
        }
    }
}

/// Event document, a single data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID.
    pub uid: String,
    /// Timestamp, seconds since the Unix epoch.
    pub time: f64,
    /// The uid of the EventDescriptor that describes this event.
    pub descriptor: String,
    /// Remainder of the payload, forwarded untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    /// Create an event belonging to the given descriptor.
    pub fn new(descriptor: &str) -> Self {
        Self {
            uid: new_uid(),
            time: now_epoch(),
            descriptor: descriptor.to_string(),
            extra: Map::new(),
        }
    }

    /// Attach an arbitrary payload field.
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}
