// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Statsd line decoder: `name:value|type` with an optional `|@rate` suffix.
//!
//! Counters (`c`) are scaled up by the inverse sample rate. Gauges (`g`)
//! pass through. Timings (`ms`) are normalized to gauges carrying a
//! `unit: "ms"` label; the fabric has no separate timing kind.

use serde_json::Value;

use telfab_message::Record;

pub fn decode(buf: &[u8]) -> Option<Record> {
    let line = std::str::from_utf8(buf).ok()?.trim();
    let (name, rest) = line.split_once(':')?;
    if name.is_empty() {
        return None;
    }

    let mut fields = rest.split('|');
    let value: f64 = fields.next()?.trim().parse().ok()?;
    let metric_type = fields.next()?.trim();

    let mut sample_rate = None;
    for extra in fields {
        let rate: f64 = extra.strip_prefix('@')?.parse().ok()?;
        if !(rate > 0.0 && rate <= 1.0) {
            return None;
        }
        sample_rate = Some(rate);
    }

    match metric_type {
        "c" => {
            let scaled = match sample_rate {
                Some(rate) => value / rate,
                None => value,
            };
            Some(record("counter", name, scaled, None))
        }
        "g" => Some(record("gauge", name, value, None)),
        "ms" => {
            let mut labels = Record::new();
            labels.insert("unit".to_string(), Value::from("ms"));
            Some(record("gauge", name, value, Some(labels)))
        }
        _ => None,
    }
}

fn record(metric_type: &str, name: &str, value: f64, labels: Option<Record>) -> Record {
    let mut record = Record::new();
    record.insert("type".to_string(), Value::from(metric_type));
    record.insert("name".to_string(), Value::from(name));
    record.insert("value".to_string(), Value::from(value));
    if let Some(labels) = labels {
        record.insert("labels".to_string(), Value::Object(labels));
    }
    record
}
