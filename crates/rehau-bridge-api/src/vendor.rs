// Vendor cloud wire types
//
// The vendor broker multiplexes several message shapes on the same
// per-account topic, discriminated by a `type` field. Inbound payloads
// are validated into the `VendorMessage` tagged union before any handler
// sees them; unknown shapes are rejected here instead of leaking into
// unrelated code paths. Outbound requests are serialized from
// `VendorRequest`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// ── Topics ───────────────────────────────────────────────────────────

/// Per-account topic carrying referential responses and account events.
pub fn account_topic(email: &str) -> String {
    format!("client/{email}")
}

/// Per-installation realtime topic carrying channel state updates.
pub fn realtime_topic(installation_unique: &str) -> String {
    format!("client/{installation_unique}/realtime")
}

/// Topic that accepts write and live-data requests for an installation.
pub fn command_topic(installation_unique: &str) -> String {
    format!("client/{installation_unique}")
}

/// Topic that accepts referential (enumeration table) requests.
pub fn referential_request_topic(email: &str) -> String {
    format!("client/{email}/referential")
}

// ── Temperature encoding ─────────────────────────────────────────────

/// Vendor temperatures are integer tenths of a degree Fahrenheit.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
pub fn celsius_to_vendor(celsius: f64) -> i32 {
    ((celsius * 9.0 / 5.0 + 32.0) * 10.0).round() as i32
}

/// Convert a vendor temperature to Celsius, rounded to one decimal.
pub fn vendor_to_celsius(raw: i32) -> f64 {
    let celsius = (f64::from(raw) / 10.0 - 32.0) * 5.0 / 9.0;
    (celsius * 10.0).round() / 10.0
}

// ── Inbound ──────────────────────────────────────────────────────────

/// Every message shape the vendor broker is known to send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VendorMessage {
    /// Response to a referential request; `data` is LZ-string/base64.
    Referential { data: String },

    /// Realtime state of one channel.
    ChannelUpdate(ChannelUpdate),

    /// The vendor accepted a write request.
    CommandAck { request_id: Uuid },

    /// The vendor refused a write request.
    CommandError {
        #[serde(default)]
        request_id: Option<Uuid>,
        #[serde(default)]
        message: String,
    },

    /// The installation tree changed server-side; a poll is due.
    InstallationUpdate { installation: String },
}

const KNOWN_TYPES: &[&str] = &[
    "referential",
    "channel_update",
    "command_ack",
    "command_error",
    "installation_update",
];

/// Realtime channel state. Absent fields were not part of this update.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChannelUpdate {
    pub installation: String,
    pub channel: String,
    /// Current temperature (vendor encoding).
    #[serde(default)]
    pub temperature: Option<i32>,
    /// Active setpoint (vendor encoding).
    #[serde(default)]
    pub setpoint: Option<i32>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub demand: Option<bool>,
    #[serde(default)]
    pub demand_percent: Option<f64>,
    #[serde(default)]
    pub mode: Option<u32>,
    #[serde(default)]
    pub preset: Option<u32>,
    #[serde(default)]
    pub ring_light: Option<bool>,
    #[serde(default)]
    pub lock: Option<bool>,
}

impl VendorMessage {
    /// Parse and validate a raw payload from the vendor broker.
    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        let value: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| Error::deserialization(&e, payload))?;

        let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) else {
            return Err(Error::Deserialization {
                message: "missing 'type' discriminator".into(),
                body: String::from_utf8_lossy(payload).into_owned(),
            });
        };

        if !KNOWN_TYPES.contains(&kind) {
            return Err(Error::Deserialization {
                message: format!("unrecognized message type '{kind}'"),
                body: String::from_utf8_lossy(payload).into_owned(),
            });
        }

        let message: Self =
            serde_json::from_value(value).map_err(|e| Error::deserialization(&e, payload))?;
        message.validate(payload)?;
        Ok(message)
    }

    fn validate(&self, payload: &[u8]) -> Result<(), Error> {
        let problem = match self {
            Self::ChannelUpdate(update) if update.channel.is_empty() => Some("empty channel id"),
            Self::ChannelUpdate(update) if update.installation.is_empty() => {
                Some("empty installation id")
            }
            Self::Referential { data } if data.is_empty() => Some("empty referential data"),
            _ => None,
        };

        match problem {
            Some(message) => Err(Error::Deserialization {
                message: message.into(),
                body: String::from_utf8_lossy(payload).into_owned(),
            }),
            None => Ok(()),
        }
    }
}

// ── Outbound ─────────────────────────────────────────────────────────

/// Requests the bridge publishes to the vendor broker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VendorRequest {
    Write(WriteRequest),
    ReferentialRequest(ReferentialRequest),
    LiveDataRequest { installation: String },
}

impl VendorRequest {
    pub fn to_payload(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: String::new(),
        })
    }
}

/// A single field write on one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteRequest {
    pub request_id: Uuid,
    pub installation: String,
    pub channel: String,
    #[serde(flatten)]
    pub field: WriteField,
}

/// Writable channel fields and their vendor-encoded values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum WriteField {
    SetpointHeatNormal(i32),
    SetpointHeatReduced(i32),
    SetpointCoolNormal(i32),
    SetpointCoolReduced(i32),
    Mode(u32),
    Preset(u32),
    RingLight(bool),
    Lock(bool),
}

/// Signed request for the enumeration table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferentialRequest {
    pub request_id: Uuid,
    pub email: String,
    pub client_id: String,
    pub token: String,
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_channel_update() {
        let raw = serde_json::json!({
            "type": "channel_update",
            "installation": "inst-1",
            "channel": "ch-1",
            "temperature": 700,
            "humidity": 41.5,
            "demand": true
        });

        let msg = VendorMessage::parse(raw.to_string().as_bytes()).unwrap();
        let VendorMessage::ChannelUpdate(update) = msg else {
            panic!("expected channel update");
        };
        assert_eq!(update.channel, "ch-1");
        assert_eq!(update.temperature, Some(700));
        assert_eq!(update.humidity, Some(41.5));
        assert_eq!(update.setpoint, None);
    }

    #[test]
    fn parse_rejects_unknown_type() {
        let raw = br#"{"type":"party_mode","on":true}"#;
        let err = VendorMessage::parse(raw).unwrap_err();
        assert!(err.to_string().contains("unrecognized message type"));
    }

    #[test]
    fn parse_rejects_missing_type() {
        let err = VendorMessage::parse(br#"{"data":"x"}"#).unwrap_err();
        assert!(err.to_string().contains("missing 'type'"));
    }

    #[test]
    fn parse_rejects_empty_channel() {
        let raw = br#"{"type":"channel_update","installation":"i","channel":""}"#;
        assert!(VendorMessage::parse(raw).is_err());
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(VendorMessage::parse(b"\x00\x01garbage").is_err());
    }

    #[test]
    fn command_error_without_request_id() {
        let msg = VendorMessage::parse(br#"{"type":"command_error","message":"busy"}"#).unwrap();
        assert_eq!(
            msg,
            VendorMessage::CommandError {
                request_id: None,
                message: "busy".into()
            }
        );
    }

    #[test]
    fn write_request_serializes_flat() {
        let id = Uuid::nil();
        let req = VendorRequest::Write(WriteRequest {
            request_id: id,
            installation: "inst".into(),
            channel: "ch".into(),
            field: WriteField::SetpointHeatNormal(716),
        });
        let json: serde_json::Value = serde_json::from_slice(&req.to_payload().unwrap()).unwrap();
        assert_eq!(json["type"], "write");
        assert_eq!(json["field"], "setpoint_heat_normal");
        assert_eq!(json["value"], 716);
        assert_eq!(json["channel"], "ch");
    }

    #[test]
    fn temperature_conversion() {
        assert_eq!(celsius_to_vendor(20.0), 680);
        assert_eq!(celsius_to_vendor(22.0), 716);
        assert!((vendor_to_celsius(680) - 20.0).abs() < f64::EPSILON);
        assert!((vendor_to_celsius(716) - 22.0).abs() < f64::EPSILON);
        assert!((vendor_to_celsius(celsius_to_vendor(21.5)) - 21.5).abs() < 0.05);
    }

    #[test]
    fn topic_helpers() {
        assert_eq!(account_topic("a@b.c"), "client/a@b.c");
        assert_eq!(realtime_topic("u1"), "client/u1/realtime");
        assert_eq!(command_topic("u1"), "client/u1");
        assert_eq!(referential_request_topic("a@b.c"), "client/a@b.c/referential");
    }
}
