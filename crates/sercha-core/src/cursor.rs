//! Shared cursor transport: base64(JSON), with an inline `v` field on every
//! payload so a plain `#[derive(Serialize, Deserialize)]` struct produces
//! the exact JSON shapes documented for each connector family, with no
//! wrapping envelope.
//!
//! Each connector defines its own payload struct (e.g. Google Drive's
//! `{v, page_token}`, Gmail's `{v, history_id}`) and calls
//! [`encode_json_cursor`]/[`decode_json_cursor`] rather than hand-rolling
//! base64/JSON handling.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::domain::errors::ConnectorError;

/// The cursor version every connector in this build writes. Connectors
/// bump their own payload's `v` field independently if their wire shape
/// ever changes; this constant is the default new cursors are stamped
/// with.
pub const CURRENT_CURSOR_VERSION: u32 = 1;

#[derive(Deserialize)]
struct VersionProbe {
    v: u32,
}

/// Serializes a cursor payload to JSON and base64-encodes it for storage.
pub fn encode_json_cursor<T: Serialize>(payload: &T) -> Result<String, ConnectorError> {
    let json = serde_json::to_vec(payload).map_err(|e| ConnectorError::Other(e.into()))?;
    Ok(STANDARD.encode(json))
}

/// Decodes a previously-encoded cursor, rejecting anything that fails to
/// base64-decode, fails to parse, or whose `v` exceeds what this build
/// understands — all three map to [`ConnectorError::InvalidCursor`], which
/// the sync orchestrator treats as "discard and resync".
pub fn decode_json_cursor<T: DeserializeOwned>(
    cursor: &str,
    max_supported_version: u32,
) -> Result<T, ConnectorError> {
    let bytes = STANDARD.decode(cursor).map_err(|_| ConnectorError::InvalidCursor)?;

    let probe: VersionProbe =
        serde_json::from_slice(&bytes).map_err(|_| ConnectorError::InvalidCursor)?;
    if probe.v > max_supported_version {
        return Err(ConnectorError::InvalidCursor);
    }

    serde_json::from_slice(&bytes).map_err(|_| ConnectorError::InvalidCursor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct GoogleDriveCursor {
        v: u32,
        page_token: String,
    }

    #[test]
    fn roundtrip_produces_expected_json_shape() {
        let payload = GoogleDriveCursor {
            v: CURRENT_CURSOR_VERSION,
            page_token: "abc123".into(),
        };
        let encoded = encode_json_cursor(&payload).unwrap();
        let decoded: GoogleDriveCursor = decode_json_cursor(&encoded, CURRENT_CURSOR_VERSION).unwrap();
        assert_eq!(payload, decoded);

        let bytes = STANDARD.decode(&encoded).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["v"], 1);
        assert_eq!(json["page_token"], "abc123");
        assert_eq!(json.as_object().unwrap().len(), 2, "no outer envelope");
    }

    #[test]
    fn rejects_malformed_base64() {
        let result: Result<GoogleDriveCursor, _> = decode_json_cursor("not-base64!!!", 1);
        assert!(matches!(result, Err(ConnectorError::InvalidCursor)));
    }

    #[test]
    fn rejects_unparseable_json() {
        let encoded = STANDARD.encode(b"not json");
        let result: Result<GoogleDriveCursor, _> = decode_json_cursor(&encoded, 1);
        assert!(matches!(result, Err(ConnectorError::InvalidCursor)));
    }

    #[test]
    fn rejects_future_version() {
        let payload = GoogleDriveCursor {
            v: 2,
            page_token: "abc123".into(),
        };
        let encoded = encode_json_cursor(&payload).unwrap();
        let result: Result<GoogleDriveCursor, _> = decode_json_cursor(&encoded, 1);
        assert!(matches!(result, Err(ConnectorError::InvalidCursor)));
    }
}
