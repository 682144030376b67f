//! Thin wrapper around `sercha_core::cursor` pinning every connector in
//! this crate to the current cursor version, so call sites don't repeat
//! the version argument.

use serde::{de::DeserializeOwned, Serialize};
use sercha_core::cursor::{decode_json_cursor, encode_json_cursor, CURRENT_CURSOR_VERSION};
use sercha_core::domain::ConnectorError;

pub fn encode<T: Serialize>(payload: &T) -> Result<String, ConnectorError> {
    encode_json_cursor(payload)
}

pub fn decode<T: DeserializeOwned>(cursor: &str) -> Result<T, ConnectorError> {
    decode_json_cursor(cursor, CURRENT_CURSOR_VERSION)
}
