//! Decoding of Xiaomi response bodies.
//!
//! The account service prefixes its JSON with `&&&START&&&`, and a few endpoints
//! wrap it in unrelated text. This module is the only place that deals with it.

use serde_json::{Deserializer, Value};
use thiserror::Error;

const START_MARKER: &str = "&&&START&&&";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("response body is empty")]
    Empty,
    #[error("response body is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no json object found in response body")]
    NoJsonFound,
}

fn strip_marker(text: &str) -> &str {
    let text = text.trim_start();
    text.strip_prefix(START_MARKER).unwrap_or(text).trim()
}

/// Strips the `&&&START&&&` marker and parses the remainder strictly.
pub fn decode(text: &str) -> Result<Value, DecodeError> {
    let body = strip_marker(text);
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(serde_json::from_str(body)?)
}

/// Like [`decode`], but falls back to the first JSON object embedded in the text.
pub fn decode_embedded(text: &str) -> Result<Value, DecodeError> {
    match decode(text) {
        Ok(value) => Ok(value),
        Err(DecodeError::Empty) => Err(DecodeError::Empty),
        Err(_) => scan_for_object(strip_marker(text)).ok_or(DecodeError::NoJsonFound),
    }
}

fn scan_for_object(text: &str) -> Option<Value> {
    text.match_indices('{').find_map(|(start, _)| {
        let mut stream = Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) if value.is_object() => Some(value),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_strips_start_marker() {
        let res = decode("&&&START&&&{\"_nonce\":\"BejIOTLgvecBs9sT\",\"data\":{\"getVirtualModel\":false,\"getHuamiDevices\":0}}").unwrap();
        assert_eq!(res["_nonce"], "BejIOTLgvecBs9sT");
        assert_eq!(res["data"]["getVirtualModel"], false);
        assert_eq!(res["data"]["getHuamiDevices"], 0);
    }

    #[test]
    fn decode_accepts_plain_json_and_whitespace() {
        let res = decode("  {\"code\":0}\n").unwrap();
        assert_eq!(res["code"], 0);
    }

    #[test]
    fn decode_rejects_noise() {
        assert!(matches!(
            decode("<html>{\"code\":0}</html>"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(decode("&&&START&&&   "), Err(DecodeError::Empty)));
    }

    #[test]
    fn decode_embedded_finds_object_in_text() {
        let res = decode_embedded("ok <script>var x = {\"serviceToken\":\"tok\"};</script>").unwrap();
        assert_eq!(res["serviceToken"], "tok");
    }

    #[test]
    fn decode_embedded_skips_broken_candidates() {
        let res = decode_embedded("{broken {\"a\":1} trailing").unwrap();
        assert_eq!(res["a"], 1);
    }

    #[test]
    fn decode_embedded_reports_missing_object() {
        assert!(matches!(
            decode_embedded("nothing to see here"),
            Err(DecodeError::NoJsonFound)
        ));
    }
}
