// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Declarative message filters.
//!
//! A filter is a map from field name to a tagged rule: a literal that must
//! match exactly, `Present` (the field must exist, value ignored), or
//! `Absent` (the field must not exist). Three fields get special treatment:
//! `attn` is a subset test over the message's attention list, and `labels` /
//! `data` recurse into the nested map with the same flat algorithm.
//!
//! Filters are compiled once at registration time; a compiled filter is
//! immutable and matching is pure.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use telfab_message::kind::MessageKind;
use telfab_message::util::valid_uuid;
use telfab_message::Record;

/// Token pattern for filter names: word characters, dashes and dots only,
/// specifically to reject anything that looks like a regular expression.
static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // literal pattern
        Regex::new(r"\A[-\.\w]+\z").unwrap()
    })
}

/// Field names a filter registration may use.
const FILTER_KEYS: &[&str] = &["uuid", "type", "name", "value", "attn", "subject", "labels"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("bad key in syndicator filter: '{0}'")]
    BadKey(String),

    #[error("'uuid' must be a valid 36-byte hex UUID, got {0}")]
    BadUuid(String),

    #[error("'type' must be a known message kind name or numeric id, got {0}")]
    UnknownType(String),

    #[error("'name' must be a plain token of word characters, dashes and dots, got {0}")]
    BadName(String),

    #[error("'value' must be a string, number or boolean")]
    BadValue,

    #[error("'subject' must be a string or boolean")]
    BadSubject,

    #[error("'attn' must be true, false, or an array of strings")]
    BadAttn,

    #[error("'attn' and 'subject' only work for event messages")]
    AttnRequiresEvent,

    #[error("'labels' must be an object")]
    BadLabels,

    #[error("label '{0}' must have a string, number or boolean value")]
    BadLabelValue(String),
}

/// One compiled per-field rule.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRule {
    /// Field must exist and equal this value exactly.
    Equals(Value),
    /// Field must exist; value ignored.
    Present,
    /// Field must not exist.
    Absent,
}

/// The attention-list rule, evaluated as a subset test rather than flat
/// equality: every item named by the filter must appear in the message's
/// attn list; extra items in the message are allowed.
#[derive(Debug, Clone, PartialEq)]
pub enum AttnRule {
    /// Message must carry a non-empty attn field.
    Present,
    /// Message must not carry an attn field.
    Absent,
    /// Message's attn list must contain every one of these.
    Contains(Vec<String>),
}

pub type Rules = BTreeMap<String, FieldRule>;

/// A compiled, frozen filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    /// Flat field rules (uuid, type, name, value, subject).
    pub(crate) fields: Rules,
    pub(crate) attn: Option<AttnRule>,
    pub(crate) labels: Option<Rules>,
    /// Not reachable through registration (the key whitelist excludes it)
    /// but evaluated when set, for internally constructed filters.
    pub(crate) data: Option<Rules>,
}

impl Filter {
    /// Compile a registration options map into a filter. All-or-nothing:
    /// any violation fails the whole registration and no filter is created.
    pub fn compile(opts: &Map<String, Value>) -> Result<Filter, FilterError> {
        for key in opts.keys() {
            if !FILTER_KEYS.contains(&key.as_str()) {
                return Err(FilterError::BadKey(key.clone()));
            }
        }

        let mut filter = Filter::default();

        if let Some(v) = opts.get("uuid") {
            let rule = match v {
                Value::Bool(b) => presence(*b),
                Value::String(s) if valid_uuid(s) => FieldRule::Equals(v.clone()),
                other => return Err(FilterError::BadUuid(other.to_string())),
            };
            filter.fields.insert("uuid".to_string(), rule);
        }

        if let Some(v) = opts.get("type") {
            let kind = match v {
                Value::String(name) => MessageKind::from_name(name),
                Value::Number(n) => n
                    .as_u64()
                    .and_then(|id| u32::try_from(id).ok())
                    .and_then(MessageKind::from_type_id),
                _ => None,
            }
            .ok_or_else(|| FilterError::UnknownType(v.to_string()))?;
            filter
                .fields
                .insert("type".to_string(), FieldRule::Equals(Value::from(kind.name())));
        }

        if let Some(v) = opts.get("name") {
            let rule = match v {
                Value::Bool(b) => presence(*b),
                Value::String(s) if name_re().is_match(s) => FieldRule::Equals(v.clone()),
                other => return Err(FilterError::BadName(other.to_string())),
            };
            filter.fields.insert("name".to_string(), rule);
        }

        if let Some(v) = opts.get("value") {
            let rule = match v {
                Value::Bool(b) => presence(*b),
                Value::String(_) | Value::Number(_) => FieldRule::Equals(v.clone()),
                _ => return Err(FilterError::BadValue),
            };
            filter.fields.insert("value".to_string(), rule);
        }

        let mut forces_event = false;

        if let Some(v) = opts.get("subject") {
            let rule = match v {
                Value::Bool(b) => presence(*b),
                Value::String(_) => FieldRule::Equals(v.clone()),
                _ => return Err(FilterError::BadSubject),
            };
            forces_event |= rule != FieldRule::Absent;
            filter.fields.insert("subject".to_string(), rule);
        }

        if let Some(v) = opts.get("attn") {
            let rule = match v {
                Value::Bool(true) => AttnRule::Present,
                Value::Bool(false) => AttnRule::Absent,
                Value::Array(items) => {
                    let mut names = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::String(s) => names.push(s.clone()),
                            _ => return Err(FilterError::BadAttn),
                        }
                    }
                    AttnRule::Contains(names)
                }
                _ => return Err(FilterError::BadAttn),
            };
            forces_event |= rule != AttnRule::Absent;
            filter.attn = Some(rule);
        }

        // attn/subject only make sense on events; a conflicting explicit
        // type is a registration error, an unspecified type becomes event.
        if forces_event {
            let event = Value::from(MessageKind::Event.name());
            match filter.fields.get("type") {
                Some(FieldRule::Equals(t)) if *t != event => {
                    return Err(FilterError::AttnRequiresEvent)
                }
                _ => {}
            }
            filter.fields.insert("type".to_string(), FieldRule::Equals(event));
        }

        if let Some(v) = opts.get("labels") {
            let map = v.as_object().ok_or(FilterError::BadLabels)?;
            let mut rules = Rules::new();
            for (key, value) in map {
                let rule = match value {
                    Value::Bool(b) => presence(*b),
                    Value::String(_) | Value::Number(_) => FieldRule::Equals(value.clone()),
                    _ => return Err(FilterError::BadLabelValue(key.clone())),
                };
                rules.insert(key.clone(), rule);
            }
            filter.labels = Some(rules);
        }

        Ok(filter)
    }

    /// Evaluate this filter against a normalized message record. Pure:
    /// the same filter and record always yield the same result.
    pub fn matches(&self, record: &Record) -> bool {
        if !match_rules(&self.fields, record) {
            return false;
        }

        if let Some(attn) = &self.attn {
            if !match_attn(attn, record) {
                return false;
            }
        }

        if let Some(rules) = &self.labels {
            if !match_nested(rules, record, "labels") {
                return false;
            }
        }

        if let Some(rules) = &self.data {
            if !match_nested(rules, record, "data") {
                return false;
            }
        }

        true
    }
}

fn presence(required: bool) -> FieldRule {
    if required {
        FieldRule::Present
    } else {
        FieldRule::Absent
    }
}

/// Resolve a field by key, falling back to a case-insensitive scan so both
/// symbolic and string-keyed record producers resolve to the same field.
fn lookup_field<'a>(record: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some(v) = record.get(key) {
        return Some(v);
    }
    record
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// Exact-match equality with numeric coercion: decoders and user filters
/// may represent the same number as integer or float.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// The flat matching pass, shared by the top level and the nested
/// labels/data recursion.
fn match_rules(rules: &Rules, record: &Map<String, Value>) -> bool {
    for (key, rule) in rules {
        let field = lookup_field(record, key);
        let ok = match (rule, field) {
            (FieldRule::Absent, None) => true,
            (FieldRule::Absent, Some(_)) => false,
            (FieldRule::Present, Some(_)) => true,
            (FieldRule::Equals(expected), Some(actual)) => values_equal(expected, actual),
            (_, None) => false,
        };
        if !ok {
            return false;
        }
    }
    true
}

fn match_attn(rule: &AttnRule, record: &Record) -> bool {
    let field = lookup_field(record, "attn");
    match rule {
        AttnRule::Absent => field.is_none(),
        AttnRule::Present => match field {
            Some(Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
            None => false,
        },
        AttnRule::Contains(required) => {
            let present: Vec<&str> = match field {
                Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            };
            required.iter().all(|want| present.iter().any(|have| have == want))
        }
    }
}

fn match_nested(rules: &Rules, record: &Record, key: &str) -> bool {
    static EMPTY: OnceLock<Map<String, Value>> = OnceLock::new();
    let empty = EMPTY.get_or_init(Map::new);
    let nested = match lookup_field(record, key) {
        Some(Value::Object(map)) => map,
        // a non-object or missing sub-map only satisfies Absent rules
        _ => empty,
    };
    match_rules(rules, nested)
}
