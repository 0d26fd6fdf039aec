// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! JSON record decoder: a flat JSON object whose `type` field names a
//! known message kind.

use serde_json::Value;

use telfab_message::{MessageKind, Record};

pub fn decode(buf: &[u8]) -> Option<Record> {
    let value: Value = serde_json::from_slice(buf).ok()?;
    let Value::Object(record) = value else {
        return None;
    };
    let kind = record.get("type")?.as_str()?;
    MessageKind::from_name(kind)?;
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_typed_object() {
        let record = decode(br#"{"type": "gauge", "name": "temp", "value": 21.5}"#).unwrap();
        assert_eq!(record["type"], "gauge");
        assert_eq!(record["value"], 21.5);
    }

    #[test]
    fn test_rejects_untyped_or_unknown() {
        assert!(decode(br#"{"name": "temp"}"#).is_none());
        assert!(decode(br#"{"type": "bogus"}"#).is_none());
        assert!(decode(br#"{"type": 9}"#).is_none());
    }

    #[test]
    fn test_rejects_non_objects() {
        assert!(decode(b"[1, 2, 3]").is_none());
        assert!(decode(b"\"gauge\"").is_none());
        assert!(decode(b"not json at all").is_none());
    }
}
