//! The `Upload-Metadata` header grammar.
//!
//! The header is a comma-separated list of `key SP base64value` pairs, where
//! a key may also appear on its own with no value. Parsing is deliberately
//! lenient: a value that does not decode as base64 is kept verbatim with a
//! warning, and a duplicated key takes its last occurrence.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Parses an `Upload-Metadata` header value.
pub fn parse(header: &str) -> HashMap<String, String> {
    let mut pairs = HashMap::new();

    for entry in header.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let mut parts = entry.splitn(2, char::is_whitespace);
        let key = match parts.next() {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => continue,
        };
        let value = parts.next().map(str::trim).unwrap_or("");

        let decoded = if value.is_empty() {
            String::new()
        } else {
            match BASE64.decode(value) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => {
                    tracing::warn!(key = %key, "Upload-Metadata value is not valid base64, keeping raw");
                    value.to_string()
                }
            }
        };

        pairs.insert(key, decoded);
    }

    pairs
}

/// Encodes key/value pairs into an `Upload-Metadata` header value.
pub fn encode<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| {
            if value.is_empty() {
                key.to_string()
            } else {
                format!("{} {}", key, BASE64.encode(value))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let meta = parse("filename dGVzdC50eHQ=,checksum YWJjMTIz");
        assert_eq!(meta.get("filename").map(String::as_str), Some("test.txt"));
        assert_eq!(meta.get("checksum").map(String::as_str), Some("abc123"));
    }

    #[test]
    fn test_parse_value_less_key() {
        let meta = parse("is-partial,filename dGVzdC50eHQ=");
        assert_eq!(meta.get("is-partial").map(String::as_str), Some(""));
        assert_eq!(meta.get("filename").map(String::as_str), Some("test.txt"));
    }

    #[test]
    fn test_parse_malformed_base64_keeps_raw() {
        let meta = parse("filename not!base64!");
        assert_eq!(meta.get("filename").map(String::as_str), Some("not!base64!"));
    }

    #[test]
    fn test_parse_duplicate_key_last_wins() {
        let meta = parse("filename YQ==,filename Yg==");
        assert_eq!(meta.get("filename").map(String::as_str), Some("b"));
    }

    #[test]
    fn test_parse_tolerates_spacing() {
        let meta = parse(" filename  dGVzdC50eHQ= , checksum YWJjMTIz ");
        assert_eq!(meta.get("filename").map(String::as_str), Some("test.txt"));
        assert_eq!(meta.get("checksum").map(String::as_str), Some("abc123"));
    }

    #[test]
    fn test_encode_round_trip() {
        let header = encode([("filename", "test.txt"), ("checksum", "abc123")]);
        let meta = parse(&header);
        assert_eq!(meta.get("filename").map(String::as_str), Some("test.txt"));
        assert_eq!(meta.get("checksum").map(String::as_str), Some("abc123"));
    }
}
