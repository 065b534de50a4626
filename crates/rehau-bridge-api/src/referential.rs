// Referential codec
//
// The vendor ships its enumeration table (mode/preset codes and their
// labels) as an LZ-string compressed, base64 encoded JSON array of
// `{index, value}` pairs. Order is significant and preserved.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;

/// One code/label pair of the enumeration table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferentialEntry {
    #[serde(deserialize_with = "code_from_number_or_string")]
    pub index: String,
    pub value: String,
}

/// Decode a compressed referential payload into its ordered entries.
pub fn decode(data: &str) -> Result<Vec<ReferentialEntry>, Error> {
    let wide = lz_str::decompress_from_base64(data)
        .ok_or_else(|| Error::Decompression("invalid LZ-string base64 payload".into()))?;
    let json = String::from_utf16(&wide)
        .map_err(|e| Error::Decompression(format!("invalid UTF-16 after decompression: {e}")))?;

    serde_json::from_str(&json).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: json.clone(),
    })
}

/// Encode entries the way the vendor does. Inverse of [`decode`].
pub fn encode(entries: &[ReferentialEntry]) -> Result<String, Error> {
    let json = serde_json::to_string(entries).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: String::new(),
    })?;
    Ok(lz_str::compress_to_base64(json.as_str()))
}

/// Codes arrive as numbers from some firmware and as strings from others.
fn code_from_number_or_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(u64),
        Text(String),
    }

    Ok(match Code::deserialize(deserializer)? {
        Code::Number(n) => n.to_string(),
        Code::Text(s) => s,
    })
}
