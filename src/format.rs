//! Formats encoded keys and record payloads for error messages, debug
//! output, and test assertions.

use itertools::Itertools as _;

use crate::path;

/// Formats encoded keys and values.
pub trait Formatter {
    /// Formats a key.
    fn key(key: &[u8]) -> String;

    /// Formats a value. Also takes the key to determine the kind of value.
    fn value(key: &[u8], value: &[u8]) -> String;

    /// Formats a key/value pair.
    fn key_value(key: &[u8], value: &[u8]) -> String {
        format!("{} → {}", Self::key(key), Self::value(key, value))
    }
}

/// Formats raw byte slices without any decoding.
pub struct Raw;

impl Raw {
    /// Formats raw bytes as escaped ASCII strings.
    pub fn bytes(bytes: &[u8]) -> String {
        let escaped = bytes
            .iter()
            .copied()
            .flat_map(std::ascii::escape_default)
            .collect_vec();
        format!("\"{}\"", String::from_utf8_lossy(&escaped))
    }
}

impl Formatter for Raw {
    fn key(key: &[u8]) -> String {
        Self::bytes(key)
    }

    fn value(_key: &[u8], value: &[u8]) -> String {
        Self::bytes(value)
    }
}

/// Formats path-encoded record keys, falling back to raw bytes for keys
/// that don't decode.
pub struct Records;

impl Formatter for Records {
    fn key(key: &[u8]) -> String {
        match path::decode_key(key) {
            Ok((path, kind)) => format!("{path} {}", kind.label()),
            Err(_) => Raw::bytes(key),
        }
    }

    fn value(key: &[u8], value: &[u8]) -> String {
        match path::decode_key(key) {
            Ok((_, path::RecordKind::Object)) => "{}".to_string(),
            Ok((_, path::RecordKind::Array)) => {
                format!("len {}", String::from_utf8_lossy(value))
            }
            _ => String::from_utf8_lossy(value).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Path;

    #[test]
    fn test_raw_escapes_bytes() {
        assert_eq!(Raw::bytes(b"a\x00b"), "\"a\\x00b\"");
    }

    #[test]
    fn test_records_formats_decoded_paths() {
        let key = Path::root().child_key("a").child_index(0).scalar_key();
        assert_eq!(Records::key(&key), ".\"a\"[0] scalar");
        assert_eq!(Records::key_value(&key, b"17"), ".\"a\"[0] scalar → 17");

        let marker = Path::root().child_key("xs").array_key();
        assert_eq!(Records::key_value(&marker, b"2"), ".\"xs\" array → len 2");
    }

    #[test]
    fn test_records_falls_back_to_raw() {
        assert_eq!(Records::key(b"garbage"), Raw::bytes(b"garbage"));
    }
}
