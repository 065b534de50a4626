// ── Stable zone identifier ──
//
// The vendor-issued persistent zone id is the only key used for topics
// and internal maps. Zone numbers are scoped to a controller and repeat
// across controllers, so they never identify a zone on their own.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a raw identifier cannot be used as a [`ZoneId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidZoneId {
    #[error("zone id is empty")]
    Empty,
    #[error("zone id '{0}' contains characters outside [A-Za-z0-9-]")]
    UnsafeCharacters(String),
    #[error("zone id '{0}' is purely numeric and could be a zone number")]
    Numeric(String),
}

/// Vendor-issued persistent zone identifier.
///
/// Restricted to ASCII alphanumerics and `-` so it can be embedded in an
/// MQTT topic level and an object id (`rehau_<id>_<suffix>`) without
/// ambiguity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ZoneId(String);

impl ZoneId {
    pub fn parse(raw: &str) -> Result<Self, InvalidZoneId> {
        if raw.is_empty() {
            return Err(InvalidZoneId::Empty);
        }
        if !raw.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(InvalidZoneId::UnsafeCharacters(raw.to_owned()));
        }
        if raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidZoneId::Numeric(raw.to_owned()));
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ZoneId {
    type Err = InvalidZoneId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ZoneId {
    type Error = InvalidZoneId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ZoneId> for String {
    fn from(id: ZoneId) -> Self {
        id.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn accepts_vendor_object_ids() {
        let id = ZoneId::parse("65f0a1b2c3d4e5f6a7b8c9d0").unwrap();
        assert_eq!(id.as_str(), "65f0a1b2c3d4e5f6a7b8c9d0");
        assert!(ZoneId::parse("zone-a1").is_ok());
    }

    #[test]
    fn rejects_unsafe_and_numeric_ids() {
        assert_eq!(ZoneId::parse(""), Err(InvalidZoneId::Empty));
        assert!(matches!(ZoneId::parse("a/b"), Err(InvalidZoneId::UnsafeCharacters(_))));
        assert!(matches!(ZoneId::parse("a_b"), Err(InvalidZoneId::UnsafeCharacters(_))));
        assert!(matches!(ZoneId::parse("a+#"), Err(InvalidZoneId::UnsafeCharacters(_))));
        assert!(matches!(ZoneId::parse("3"), Err(InvalidZoneId::Numeric(_))));
    }

    #[test]
    fn serde_validates() {
        let ok: ZoneId = serde_json::from_str(r#""abc123""#).unwrap();
        assert_eq!(ok.to_string(), "abc123");
        assert!(serde_json::from_str::<ZoneId>(r#""a b""#).is_err());
    }
}
