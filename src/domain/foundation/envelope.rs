//! Envelope - the message unit exchanged between clients, sessions and the broker.
//!
//! # Wire Format
//!
//! ```text
//! {
//!   "specversion": "1.0",
//!   "id": "7d0c...",
//!   "source": "prelude",
//!   "type": "pong",
//!   "time": "2024-01-15T10:30:00Z",
//!   "datacontenttype": "application/json",
//!   "data": "ok",
//!   "sessionid": "S1"          <- extension attributes sit at the top level
//! }
//! ```
//!
//! JSON payloads are embedded verbatim, text payloads as strings and
//! anything else as `data_base64`. Embedded JSON keeps its exact bytes (key
//! order, number precision); only whitespace around the value is dropped.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{DomainError, Timestamp, ValidationError};

/// Envelope format version written on the wire.
pub const SPEC_VERSION: &str = "1.0";

/// Reserved extension carrying the originating session id.
pub const SESSION_ID_EXTENSION: &str = "sessionid";

/// Content type for JSON payloads.
pub const APPLICATION_JSON: &str = "application/json";

/// Content type for raw text payloads.
pub const TEXT_PLAIN: &str = "text/plain";

/// Envelope type that mutates the metadata of the receiving session.
pub const METADATA_ADD: &str = "metadata.add";

const RESERVED_ATTRIBUTES: &[&str] = &[
    "specversion",
    "id",
    "source",
    "type",
    "time",
    "datacontenttype",
    "data",
    "data_base64",
];

/// Structured message flowing through router, broker and sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope", into = "WireEnvelope")]
pub struct Envelope {
    /// Unique id of this envelope.
    pub id: String,

    /// Producer of the envelope (router name, `client`, ...).
    pub source: String,

    /// Routing type; doubles as the broker topic for forward publication.
    pub event_type: String,

    /// When the envelope was produced.
    pub time: Timestamp,

    /// Raw payload bytes.
    pub data: Vec<u8>,

    /// MIME type of `data`.
    pub content_type: Option<String>,

    /// Extension attributes, keys are lowercase.
    pub extensions: BTreeMap<String, JsonValue>,
}

impl Envelope {
    /// Creates an envelope with a fresh id, the current time and no payload.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: String::new(),
            event_type: event_type.into(),
            time: Timestamp::now(),
            data: Vec::new(),
            content_type: None,
            extensions: BTreeMap::new(),
        }
    }

    /// Sets the producer of the envelope.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the payload and its content type.
    pub fn with_data(mut self, content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.content_type = Some(content_type.into());
        self.data = data.into();
        self
    }

    /// Serializes `value` as the JSON payload.
    pub fn with_json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, DomainError> {
        let data = serde_json::to_vec(value)?;
        Ok(self.with_data(APPLICATION_JSON, data))
    }

    /// Sets an extension attribute.
    pub fn with_extension(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.set_extension(key, value);
        self
    }

    /// Sets an extension attribute. Keys are stored lowercase; reserved
    /// attribute names are ignored.
    pub fn set_extension(&mut self, key: &str, value: impl Into<JsonValue>) {
        let key = key.to_ascii_lowercase();
        if RESERVED_ATTRIBUTES.contains(&key.as_str()) {
            return;
        }
        self.extensions.insert(key, value.into());
    }

    /// Reads an extension attribute.
    pub fn extension(&self, key: &str) -> Option<&JsonValue> {
        self.extensions.get(&key.to_ascii_lowercase())
    }

    /// Originating session id, if stamped.
    pub fn session_id(&self) -> Option<&str> {
        self.extensions
            .get(SESSION_ID_EXTENSION)
            .and_then(JsonValue::as_str)
    }

    /// Stamps the originating session id.
    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.extensions.insert(
            SESSION_ID_EXTENSION.to_string(),
            JsonValue::String(session_id.into()),
        );
    }

    /// Checks the invariants required before publication.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_type.is_empty() {
            return Err(ValidationError::empty_field("type"));
        }
        if self.id.is_empty() {
            return Err(ValidationError::empty_field("id"));
        }
        Ok(())
    }

    /// Decodes the payload as JSON into `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, DomainError> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Encodes the envelope in its wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DomainError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes an envelope from its wire form.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DomainError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn is_json_payload(&self) -> bool {
        is_json_content_type(self.content_type.as_deref())
    }
}

fn is_json_content_type(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with(APPLICATION_JSON) || ct.contains("+json") || ct.starts_with("text/json")
        }
    }
}

fn is_text_content_type(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.to_ascii_lowercase().starts_with("text/"))
        .unwrap_or(false)
}

fn default_spec_version() -> String {
    SPEC_VERSION.to_string()
}

#[derive(Serialize)]
struct WireEnvelope {
    specversion: String,
    id: String,
    source: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    datacontenttype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_base64: Option<String>,
    #[serde(flatten)]
    extensions: BTreeMap<String, JsonValue>,
}

// `data` must reach us as raw bytes, which `#[serde(flatten)]` would buffer
// away, so the attributes are read as a map of raw values and picked apart.
impl<'de> Deserialize<'de> for WireEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut attributes = BTreeMap::<String, Box<RawValue>>::deserialize(deserializer)?;

        fn take<T: DeserializeOwned, E: de::Error>(
            attributes: &mut BTreeMap<String, Box<RawValue>>,
            key: &str,
        ) -> Result<Option<T>, E> {
            attributes
                .remove(key)
                .map(|raw| serde_json::from_str::<Option<T>>(raw.get()).map_err(E::custom))
                .transpose()
                .map(Option::flatten)
        }

        let specversion = take::<_, D::Error>(&mut attributes, "specversion")?
            .unwrap_or_else(default_spec_version);
        let id = take::<_, D::Error>(&mut attributes, "id")?.unwrap_or_default();
        let source = take::<_, D::Error>(&mut attributes, "source")?.unwrap_or_default();
        let event_type = take::<_, D::Error>(&mut attributes, "type")?.unwrap_or_default();
        let time = take::<_, D::Error>(&mut attributes, "time")?;
        let datacontenttype = take::<_, D::Error>(&mut attributes, "datacontenttype")?;
        let data_base64 = take::<_, D::Error>(&mut attributes, "data_base64")?;
        let data = attributes.remove("data").filter(|raw| raw.get() != "null");

        let extensions = attributes
            .into_iter()
            .map(|(key, raw)| {
                serde_json::from_str::<JsonValue>(raw.get())
                    .map(|value| (key, value))
                    .map_err(<D::Error as de::Error>::custom)
            })
            .collect::<Result<_, _>>()?;

        Ok(WireEnvelope {
            specversion,
            id,
            source,
            event_type,
            time,
            datacontenttype,
            data,
            data_base64,
            extensions,
        })
    }
}

fn raw_json(bytes: &[u8]) -> Option<Box<RawValue>> {
    let text = std::str::from_utf8(bytes).ok()?;
    RawValue::from_string(text.to_string()).ok()
}

impl From<Envelope> for WireEnvelope {
    fn from(envelope: Envelope) -> Self {
        let (data, data_base64) = if envelope.data.is_empty() {
            (None, None)
        } else if envelope.is_json_payload() {
            match raw_json(&envelope.data) {
                Some(raw) => (Some(raw), None),
                None => (None, Some(BASE64.encode(&envelope.data))),
            }
        } else if is_text_content_type(envelope.content_type.as_deref()) {
            let quoted = std::str::from_utf8(&envelope.data)
                .ok()
                .and_then(|text| serde_json::to_string(text).ok())
                .and_then(|quoted| RawValue::from_string(quoted).ok());
            match quoted {
                Some(raw) => (Some(raw), None),
                None => (None, Some(BASE64.encode(&envelope.data))),
            }
        } else {
            (None, Some(BASE64.encode(&envelope.data)))
        };

        let extensions = envelope
            .extensions
            .into_iter()
            .filter(|(key, _)| !RESERVED_ATTRIBUTES.contains(&key.as_str()))
            .collect();

        WireEnvelope {
            specversion: default_spec_version(),
            id: envelope.id,
            source: envelope.source,
            event_type: envelope.event_type,
            time: Some(envelope.time),
            datacontenttype: envelope.content_type,
            data,
            data_base64,
            extensions,
        }
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = ValidationError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let data = match (wire.data_base64, wire.data) {
            (Some(encoded), _) => BASE64
                .decode(encoded.as_bytes())
                .map_err(|e| ValidationError::invalid_format("data_base64", e.to_string()))?,
            (None, Some(raw))
                if raw.get().starts_with('"')
                    && !is_json_content_type(wire.datacontenttype.as_deref()) =>
            {
                serde_json::from_str::<String>(raw.get())
                    .map_err(|e| ValidationError::invalid_format("data", e.to_string()))?
                    .into_bytes()
            }
            (None, Some(raw)) => raw.get().as_bytes().to_vec(),
            (None, None) => Vec::new(),
        };

        let extensions = wire
            .extensions
            .into_iter()
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .collect();

        Ok(Envelope {
            id: wire.id,
            source: wire.source,
            event_type: wire.event_type,
            time: wire.time.unwrap_or_default(),
            data,
            content_type: wire.datacontenttype,
            extensions,
        })
    }
}
