//! Stream entry wire form.
//!
//! A group read answers with nested arrays:
//!
//! ```text
//! [ [ stream-name, [ [entry-id, [field1, value1, field2, value2, ...]], ... ] ], ... ]
//! ```
//!
//! Decoding is lenient: any node with the wrong shape is skipped, never
//! fatal. Empty field names and dangling names without a value are
//! dropped.

use chrono::{DateTime, SecondsFormat, Utc};

/// Field carrying the canonical type identifier.
pub const FIELD_TYPE: &str = "type";
/// Field carrying the notification identifier.
pub const FIELD_ID: &str = "id";
/// Field carrying the creation timestamp (RFC 3339, UTC).
pub const FIELD_TIMESTAMP: &str = "timestamp";
/// Field selecting the write strategy; absent means standard.
pub const FIELD_STORAGE: &str = "storage";
/// Field carrying the inline body (stream-only entries).
pub const FIELD_PAYLOAD: &str = "payload";
/// Field pointing at the key-store record (standard/updateable entries).
pub const FIELD_KEY: &str = "key";
/// Field carrying the user-derived overwrite key (updateable entries).
pub const FIELD_UPDATE_KEY: &str = "updateKey";
/// Field carrying the optional monotonic sequence (updateable entries).
pub const FIELD_SEQUENCE: &str = "sequence";

pub const STORAGE_STREAM_ONLY: &str = "stream-only";
pub const STORAGE_UPDATEABLE: &str = "updateable";
pub const STORAGE_STANDARD: &str = "standard";

/// One parsed stream entry: id plus flat field/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Canonical wire form of a timestamp.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Decode the reply of a blocking group read into entries, across every
/// stream the reply covers.
pub fn decode_read_reply(reply: &redis::Value) -> Vec<StreamEntry> {
    let mut entries = Vec::new();
    let redis::Value::Bulk(streams) = reply else {
        return entries;
    };
    for stream in streams {
        let redis::Value::Bulk(parts) = stream else {
            continue;
        };
        let Some(redis::Value::Bulk(stream_entries)) = parts.get(1) else {
            continue;
        };
        for entry in stream_entries {
            if let Some(parsed) = decode_entry(entry) {
                entries.push(parsed);
            }
        }
    }
    entries
}

fn decode_entry(entry: &redis::Value) -> Option<StreamEntry> {
    let redis::Value::Bulk(parts) = entry else {
        return None;
    };
    let id = as_string(parts.first()?)?;
    let redis::Value::Bulk(raw_fields) = parts.get(1)? else {
        return None;
    };
    let mut fields = Vec::with_capacity(raw_fields.len() / 2);
    for pair in raw_fields.chunks_exact(2) {
        let Some(name) = as_string(&pair[0]) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let Some(value) = as_string(&pair[1]) else {
            continue;
        };
        fields.push((name, value));
    }
    Some(StreamEntry { id, fields })
}

fn as_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::Status(status) => Some(status.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use redis::Value;

    fn data(value: &str) -> Value {
        Value::Data(value.as_bytes().to_vec())
    }

    fn reply(entries: Vec<Value>) -> Value {
        Value::Bulk(vec![Value::Bulk(vec![data("stream-a"), Value::Bulk(entries)])])
    }

    fn entry(id: &str, fields: &[&str]) -> Value {
        Value::Bulk(vec![
            data(id),
            Value::Bulk(fields.iter().map(|f| data(f)).collect()),
        ])
    }

    #[test]
    fn decodes_well_formed_entries() {
        let decoded = decode_read_reply(&reply(vec![entry(
            "1-0",
            &["type", "test.Ping", "id", "n-1"],
        )]));
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, "1-0");
        assert_eq!(decoded[0].field(FIELD_TYPE), Some("test.Ping"));
        assert_eq!(decoded[0].field(FIELD_ID), Some("n-1"));
        assert_eq!(decoded[0].field(FIELD_STORAGE), None);
    }

    #[test]
    fn nil_reply_is_empty() {
        assert!(decode_read_reply(&Value::Nil).is_empty());
    }

    #[test]
    fn empty_stream_list_is_empty() {
        assert!(decode_read_reply(&Value::Bulk(Vec::new())).is_empty());
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let decoded = decode_read_reply(&reply(vec![
            Value::Int(7),
            Value::Bulk(vec![data("lonely-id")]),
            entry("2-0", &["type", "ok"]),
        ]));
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, "2-0");
    }

    #[test]
    fn dangling_field_name_is_dropped() {
        let decoded = decode_read_reply(&reply(vec![entry("1-0", &["type", "ok", "dangling"])]));
        assert_eq!(decoded[0].fields, vec![("type".to_string(), "ok".to_string())]);
    }

    #[test]
    fn empty_field_names_are_dropped() {
        let decoded = decode_read_reply(&reply(vec![entry("1-0", &["", "junk", "key", "k-1"])]));
        assert_eq!(decoded[0].fields, vec![("key".to_string(), "k-1".to_string())]);
    }

    #[test]
    fn timestamps_round_trip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&format_timestamp(now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn garbage_timestamps_are_none() {
        assert!(parse_timestamp("not a time").is_none());
        assert!(parse_timestamp("").is_none());
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Nil),
            Just(Value::Okay),
            any::<i64>().prop_map(Value::Int),
            "[a-z0-9 -]{0,12}".prop_map(|s| Value::Data(s.into_bytes())),
            "[a-z0-9]{0,8}".prop_map(Value::Status),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop::collection::vec(inner, 0..8).prop_map(Value::Bulk)
        })
    }

    proptest! {
        #[test]
        fn decoding_never_panics(value in arb_value()) {
            let _ = decode_read_reply(&value);
        }

        #[test]
        fn decoded_field_names_are_never_empty(value in arb_value()) {
            for entry in decode_read_reply(&value) {
                for (name, _) in &entry.fields {
                    prop_assert!(!name.is_empty());
                }
            }
        }
    }
}
