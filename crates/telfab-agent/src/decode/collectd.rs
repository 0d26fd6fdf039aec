// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Collectd binary protocol decoder.
//!
//! A packet is a sequence of TLV parts: u16 BE part type, u16 BE part
//! length (header included), then the body. String parts are
//! NUL-terminated; numeric parts are u64 BE. A values part carries a u16 BE
//! count, one data-source type byte per value, then one 8-byte value each;
//! gauges are little-endian doubles, everything else big-endian integers.
//! High-resolution times are in 2^-30 second units.
//!
//! Signed and encrypted packets are not supported and the whole packet is
//! declined, as is any packet with an unknown part type.

use serde_json::Value;

use telfab_message::Record;

const PART_HOST: u16 = 0x0000;
const PART_TIME: u16 = 0x0001;
const PART_PLUGIN: u16 = 0x0002;
const PART_PLUGIN_INSTANCE: u16 = 0x0003;
const PART_TYPE: u16 = 0x0004;
const PART_TYPE_INSTANCE: u16 = 0x0005;
const PART_VALUES: u16 = 0x0006;
const PART_INTERVAL: u16 = 0x0007;
const PART_TIME_HR: u16 = 0x0008;
const PART_INTERVAL_HR: u16 = 0x0009;
const PART_MESSAGE: u16 = 0x0100;
const PART_SEVERITY: u16 = 0x0101;
const PART_SIGNATURE: u16 = 0x0200;
const PART_ENCRYPTION: u16 = 0x0210;

const DS_COUNTER: u8 = 0;
const DS_GAUGE: u8 = 1;
const DS_DERIVE: u8 = 2;
const DS_ABSOLUTE: u8 = 3;

const PART_HEADER_LEN: usize = 4;

#[derive(Default)]
struct PacketState {
    host: String,
    plugin: String,
    plugin_instance: String,
    type_name: String,
    type_instance: String,
    timestamp_us: u64,
    interval_s: u64,
    message: String,
    severity: u64,
}

impl PacketState {
    /// Metric name in the dotted collectd convention, empty segments
    /// skipped: `collectd.plugin.plugin_instance.type.type_instance`.
    fn metric_name(&self) -> String {
        let mut name = String::from("collectd");
        for segment in [
            &self.plugin,
            &self.plugin_instance,
            &self.type_name,
            &self.type_instance,
        ] {
            if !segment.is_empty() {
                name.push('.');
                name.push_str(segment);
            }
        }
        name
    }

    fn record(&self, metric_type: &str, value: Value) -> Record {
        let mut labels = Record::new();
        if !self.host.is_empty() {
            labels.insert("host".to_string(), Value::from(self.host.clone()));
        }
        if self.interval_s > 0 {
            labels.insert("interval".to_string(), Value::from(self.interval_s));
        }
        if !self.message.is_empty() {
            labels.insert("message".to_string(), Value::from(self.message.clone()));
            labels.insert("severity".to_string(), Value::from(self.severity));
        }

        let mut record = Record::new();
        record.insert("type".to_string(), Value::from(metric_type));
        record.insert("name".to_string(), Value::from(self.metric_name()));
        record.insert("value".to_string(), value);
        if self.timestamp_us > 0 {
            record.insert("timestamp".to_string(), Value::from(self.timestamp_us));
        }
        record.insert("labels".to_string(), Value::Object(labels));
        record
    }
}

/// Decode one packet into one record per carried value. `None` when the
/// bytes are not a well-formed collectd packet.
pub fn decode(buf: &[u8]) -> Option<Vec<Record>> {
    let mut state = PacketState::default();
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < buf.len() {
        let header = buf.get(offset..offset + PART_HEADER_LEN)?;
        let part_type = u16::from_be_bytes([header[0], header[1]]);
        let part_len = u16::from_be_bytes([header[2], header[3]]) as usize;
        if part_len < PART_HEADER_LEN || offset + part_len > buf.len() {
            return None;
        }
        let body = &buf[offset + PART_HEADER_LEN..offset + part_len];

        match part_type {
            PART_HOST => state.host = part_string(body)?,
            PART_PLUGIN => state.plugin = part_string(body)?,
            PART_PLUGIN_INSTANCE => state.plugin_instance = part_string(body)?,
            PART_TYPE => state.type_name = part_string(body)?,
            PART_TYPE_INSTANCE => state.type_instance = part_string(body)?,
            PART_MESSAGE => state.message = part_string(body)?,
            PART_TIME => state.timestamp_us = part_u64(body)?.checked_mul(1_000_000)?,
            PART_TIME_HR => state.timestamp_us = hr_to_us(part_u64(body)?),
            PART_INTERVAL => state.interval_s = part_u64(body)?,
            PART_INTERVAL_HR => state.interval_s = part_u64(body)? >> 30,
            PART_SEVERITY => state.severity = part_u64(body)?,
            PART_VALUES => decode_values(body, &state, &mut records)?,
            PART_SIGNATURE | PART_ENCRYPTION => return None,
            _ => return None,
        }
        offset += part_len;
    }

    if records.is_empty() {
        None
    } else {
        Some(records)
    }
}

fn part_string(body: &[u8]) -> Option<String> {
    let (last, content) = body.split_last()?;
    if *last != 0 {
        return None;
    }
    String::from_utf8(content.to_vec()).ok()
}

fn part_u64(body: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = body.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// 2^-30 second units to microseconds, keeping sub-second precision.
fn hr_to_us(hr: u64) -> u64 {
    ((hr as u128 * 1_000_000) >> 30) as u64
}

fn decode_values(body: &[u8], state: &PacketState, records: &mut Vec<Record>) -> Option<()> {
    let count = u16::from_be_bytes([*body.first()?, *body.get(1)?]) as usize;
    let ds_types = body.get(2..2 + count)?;
    let mut offset = 2 + count;

    for &ds_type in ds_types {
        let bytes: [u8; 8] = body.get(offset..offset + 8)?.try_into().ok()?;
        offset += 8;
        let (metric_type, value) = match ds_type {
            DS_GAUGE => ("gauge", Value::from(f64::from_le_bytes(bytes))),
            DS_COUNTER | DS_ABSOLUTE => ("counter", Value::from(u64::from_be_bytes(bytes))),
            DS_DERIVE => ("counter", Value::from(i64::from_be_bytes(bytes))),
            _ => return None,
        };
        records.push(state.record(metric_type, value));
    }

    // body must be exactly the count, one type byte and one 8-byte value each
    if offset == body.len() {
        Some(())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_part(part_type: u16, s: &str) -> Vec<u8> {
        let mut part = Vec::new();
        part.extend_from_slice(&part_type.to_be_bytes());
        part.extend_from_slice(&((s.len() + 5) as u16).to_be_bytes());
        part.extend_from_slice(s.as_bytes());
        part.push(0);
        part
    }

    fn numeric_part(part_type: u16, v: u64) -> Vec<u8> {
        let mut part = Vec::new();
        part.extend_from_slice(&part_type.to_be_bytes());
        part.extend_from_slice(&12u16.to_be_bytes());
        part.extend_from_slice(&v.to_be_bytes());
        part
    }

    fn values_part(values: &[(u8, [u8; 8])]) -> Vec<u8> {
        let mut part = Vec::new();
        part.extend_from_slice(&PART_VALUES.to_be_bytes());
        part.extend_from_slice(&((6 + values.len() * 9) as u16).to_be_bytes());
        part.extend_from_slice(&(values.len() as u16).to_be_bytes());
        for (ds, _) in values {
            part.push(*ds);
        }
        for (_, bytes) in values {
            part.extend_from_slice(bytes);
        }
        part
    }

    #[test]
    fn test_packet_with_two_values_yields_two_records() {
        let mut packet = Vec::new();
        packet.extend(string_part(PART_HOST, "web01"));
        packet.extend(string_part(PART_PLUGIN, "cpu"));
        packet.extend(string_part(PART_TYPE, "cpu"));
        packet.extend(string_part(PART_TYPE_INSTANCE, "idle"));
        packet.extend(numeric_part(PART_TIME, 1_700_000_000));
        packet.extend(values_part(&[
            (DS_COUNTER, 42u64.to_be_bytes()),
            (DS_GAUGE, 0.25f64.to_le_bytes()),
        ]));

        let records = decode(&packet).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0]["type"], "counter");
        assert_eq!(records[0]["name"], "collectd.cpu.cpu.idle");
        assert_eq!(records[0]["value"], 42);
        assert_eq!(records[0]["timestamp"], 1_700_000_000_000_000u64);
        assert_eq!(records[0]["labels"]["host"], "web01");

        assert_eq!(records[1]["type"], "gauge");
        assert_eq!(records[1]["value"], 0.25);
    }

    #[test]
    fn test_high_resolution_time() {
        let mut packet = Vec::new();
        packet.extend(string_part(PART_PLUGIN, "load"));
        // 3 seconds in 2^-30 units
        packet.extend(numeric_part(PART_TIME_HR, 3u64 << 30));
        packet.extend(values_part(&[(DS_GAUGE, 1.5f64.to_le_bytes())]));

        let records = decode(&packet).unwrap();
        assert_eq!(records[0]["timestamp"], 3_000_000u64);
    }

    #[test]
    fn test_derive_is_signed() {
        let mut packet = Vec::new();
        packet.extend(string_part(PART_PLUGIN, "net"));
        packet.extend(values_part(&[(DS_DERIVE, (-7i64).to_be_bytes())]));

        let records = decode(&packet).unwrap();
        assert_eq!(records[0]["type"], "counter");
        assert_eq!(records[0]["value"], -7);
    }

    #[test]
    fn test_signed_packets_declined() {
        let mut packet = string_part(PART_SIGNATURE, "hmac goes here");
        packet.extend(values_part(&[(DS_GAUGE, 1.0f64.to_le_bytes())]));
        assert!(decode(&packet).is_none());
    }

    #[test]
    fn test_garbage_and_truncation_declined() {
        assert!(decode(b"reqs:1|c").is_none());
        assert!(decode(br#"{"type": "gauge"}"#).is_none());
        assert!(decode(&[]).is_none());

        let mut packet = string_part(PART_HOST, "web01");
        packet.extend(values_part(&[(DS_GAUGE, 1.0f64.to_le_bytes())]));
        // chop the last value byte off
        packet.truncate(packet.len() - 1);
        assert!(decode(&packet).is_none());
    }
}
