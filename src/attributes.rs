//! Attribute encoder (C2, §4.2).
//!
//! Converts arbitrary host values into the flat, OTel-permitted shape spans
//! require: scalars or homogeneous arrays of scalars. Host values arrive as
//! [`HostValue`] — the SDK's value-agnostic stand-in for "whatever the
//! wrapped library handed us" (numbers, strings, bytes, bools, nested maps
//! and sequences, or an opaque string already produced by a handler).

use std::collections::BTreeMap;

use crate::error::EncodingError;
use crate::semconv;

/// Default cap on string attribute length before truncation (§4.2 rule 1).
pub const DEFAULT_STRING_CAP: usize = 32 * 1024;
/// Default cap on nesting depth before a subtree is summarized (§4.2 rule 4).
pub const DEFAULT_DEPTH_LIMIT: usize = 6;

/// A value as received from a host library, before encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Sequence(Vec<HostValue>),
    Map(Vec<(String, HostValue)>),
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::Str(value.to_string())
    }
}
impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::Str(value)
    }
}
impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        HostValue::Int(value)
    }
}
impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Float(value)
    }
}
impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

/// An OTel-permitted attribute value: a scalar or a homogeneous array.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    StrArray(Vec<String>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    BoolArray(Vec<bool>),
}

/// A flat attribute name -> value mapping, ordered for deterministic export
/// (a `BTreeMap` rather than a `HashMap`, which also makes attribute-set
/// assertions in tests stable).
pub type Attributes = BTreeMap<String, AttrValue>;

/// Hook a handler may supply to redact or rewrite attributes just before
/// they're merged onto a span. Returning `None` drops the pair entirely.
pub trait Redactor: Send + Sync {
    fn redact(&self, name: &str, value: AttrValue) -> Option<AttrValue>;
}

/// A `Redactor` that passes every attribute through unchanged.
pub struct NoRedaction;
impl Redactor for NoRedaction {
    fn redact(&self, _name: &str, value: AttrValue) -> Option<AttrValue> {
        Some(value)
    }
}

/// Configuration for one encoding pass; reused across many calls to amortize
/// allocation of the (usually absent) redactor.
pub struct Encoder<'a> {
    pub string_cap: usize,
    pub depth_limit: usize,
    pub redactor: &'a dyn Redactor,
}

impl<'a> Default for Encoder<'a> {
    fn default() -> Self {
        Encoder {
            string_cap: DEFAULT_STRING_CAP,
            depth_limit: DEFAULT_DEPTH_LIMIT,
            redactor: &NoRedaction,
        }
    }
}

impl<'a> Encoder<'a> {
    pub fn with_redactor(redactor: &'a dyn Redactor) -> Self {
        Encoder {
            redactor,
            ..Encoder::default()
        }
    }

    /// Encode `value` under semantic-name prefix `name` into `out`.
    ///
    /// Fails only when `value` is self-referential (which [`HostValue`]
    /// cannot actually represent, being an owned tree -- the error variant
    /// exists for handler-authored `HostValue` producers that build one from
    /// a cyclic host object and must bail rather than loop forever).
    pub fn encode(&self, name: &str, value: HostValue, out: &mut Attributes) -> Result<(), EncodingError> {
        self.encode_at_depth(name, value, 0, out)
    }

    fn encode_at_depth(
        &self,
        name: &str,
        value: HostValue,
        depth: usize,
        out: &mut Attributes,
    ) -> Result<(), EncodingError> {
        if depth > self.depth_limit {
            self.set(name, AttrValue::Str(semconv::meta::DEPTH_LIMITED_MARKER.to_string()), out);
            return Ok(());
        }

        match value {
            HostValue::Null => { /* rule 5: omitted, not set to empty string */ }
            HostValue::Bool(b) => self.set(name, AttrValue::Bool(b), out),
            HostValue::Int(i) => self.set(name, AttrValue::Int(i), out),
            HostValue::Float(f) => self.set(name, AttrValue::Float(f), out),
            HostValue::Str(s) => self.set_string(name, s, out),
            HostValue::Bytes(bytes) => {
                use base64::Engine;
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                self.set_string(name, encoded, out);
            }
            HostValue::Sequence(items) => self.encode_sequence(name, items, out),
            HostValue::Map(entries) => {
                for (key, inner) in entries {
                    let child_name = format!("{name}.{key}");
                    self.encode_at_depth(&child_name, inner, depth + 1, out)?;
                }
            }
        }
        Ok(())
    }

    fn encode_sequence(&self, name: &str, items: Vec<HostValue>, out: &mut Attributes) {
        if items.is_empty() {
            return;
        }
        // Homogeneous scalar arrays encode directly; anything else
        // (nested maps/sequences, or a mix of scalar kinds) is flattened
        // by index per §4.1, or coerced to strings per §4.2 rule 3.
        if items.iter().all(|i| matches!(i, HostValue::Str(_))) {
            let values = items
                .into_iter()
                .map(|i| match i {
                    HostValue::Str(s) => truncate(s, self.string_cap).0,
                    _ => unreachable!(),
                })
                .collect();
            self.set(name, AttrValue::StrArray(values), out);
        } else if items.iter().all(|i| matches!(i, HostValue::Int(_))) {
            let values = items
                .into_iter()
                .map(|i| match i {
                    HostValue::Int(v) => v,
                    _ => unreachable!(),
                })
                .collect();
            self.set(name, AttrValue::IntArray(values), out);
        } else if items.iter().all(|i| matches!(i, HostValue::Float(_))) {
            let values = items
                .into_iter()
                .map(|i| match i {
                    HostValue::Float(v) => v,
                    _ => unreachable!(),
                })
                .collect();
            self.set(name, AttrValue::FloatArray(values), out);
        } else if items.iter().all(|i| matches!(i, HostValue::Bool(_))) {
            let values = items
                .into_iter()
                .map(|i| match i {
                    HostValue::Bool(v) => v,
                    _ => unreachable!(),
                })
                .collect();
            self.set(name, AttrValue::BoolArray(values), out);
        } else if items
            .iter()
            .all(|i| matches!(i, HostValue::Map(_) | HostValue::Sequence(_)))
        {
            for (i, item) in items.into_iter().enumerate() {
                let child_name = format!("{name}.{i}");
                // best-effort: nested structural encode failures never abort the batch.
                let _ = self.encode_at_depth(&child_name, item, 1, out);
            }
        } else {
            // heterogeneous scalars: coerce to strings (§4.2 rule 3).
            let values: Vec<String> = items.into_iter().map(host_value_to_string).collect();
            self.set(name, AttrValue::StrArray(values), out);
        }
    }

    fn set_string(&self, name: &str, s: String, out: &mut Attributes) {
        let (truncated, was_truncated) = truncate(s, self.string_cap);
        self.set(name, AttrValue::Str(truncated), out);
        if was_truncated {
            let marker = format!("{name}{}", semconv::meta::TRUNCATED_SUFFIX);
            self.set(&marker, AttrValue::Bool(true), out);
        }
    }

    fn set(&self, name: &str, value: AttrValue, out: &mut Attributes) {
        if let Some(value) = self.redactor.redact(name, value) {
            out.insert(name.to_string(), value);
        }
    }
}

/// Run a handler-produced list of raw `(name, value)` pairs through a
/// default [`Encoder`] and return the resulting attribute map. The
/// convenience path for callers (wrap points, stream adapters) that don't
/// need a custom redactor or non-default caps.
pub fn encode_pairs(pairs: Vec<(String, HostValue)>) -> Attributes {
    let encoder = Encoder::default();
    let mut out = Attributes::new();
    for (name, value) in pairs {
        let _ = encoder.encode(&name, value, &mut out);
    }
    out
}

/// Truncate `s` to at most `cap` bytes at a char boundary, appending a
/// visible marker. Returns `(value, was_truncated)`. A string of exactly
/// `cap` bytes is left untouched (§8 boundary behavior).
fn truncate(s: String, cap: usize) -> (String, bool) {
    if s.len() <= cap {
        return (s, false);
    }
    let mut end = cap;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_string();
    truncated.push_str("…[truncated]");
    (truncated, true)
}

fn host_value_to_string(value: HostValue) -> String {
    match value {
        HostValue::Null => String::new(),
        HostValue::Bool(b) => b.to_string(),
        HostValue::Int(i) => i.to_string(),
        HostValue::Float(f) => f.to_string(),
        HostValue::Str(s) => s,
        HostValue::Bytes(b) => {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode(b)
        }
        HostValue::Sequence(_) | HostValue::Map(_) => semconv::meta::DEPTH_LIMITED_MARKER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_at_cap_is_not_truncated() {
        let s = "a".repeat(DEFAULT_STRING_CAP);
        let (out, was_truncated) = truncate(s.clone(), DEFAULT_STRING_CAP);
        assert_eq!(out, s);
        assert!(!was_truncated);
    }

    #[test]
    fn string_over_cap_is_truncated_with_marker() {
        let s = "a".repeat(DEFAULT_STRING_CAP + 1);
        let (out, was_truncated) = truncate(s, DEFAULT_STRING_CAP);
        assert!(was_truncated);
        assert!(out.len() < DEFAULT_STRING_CAP + 20);
        assert!(out.ends_with("[truncated]"));
    }

    #[test]
    fn null_is_omitted_not_empty_string() {
        let encoder = Encoder::default();
        let mut out = Attributes::new();
        encoder.encode("llm.request.temperature", HostValue::Null, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn nested_map_flattens_with_dot_path() {
        let encoder = Encoder::default();
        let mut out = Attributes::new();
        let value = HostValue::Map(vec![("role".into(), HostValue::from("user")), ("content".into(), HostValue::from("hi"))]);
        encoder
            .encode("llm.request.messages.0", value, &mut out)
            .unwrap();
        assert_eq!(out.get("llm.request.messages.0.role"), Some(&AttrValue::Str("user".into())));
        assert_eq!(out.get("llm.request.messages.0.content"), Some(&AttrValue::Str("hi".into())));
    }

    #[test]
    fn homogeneous_sequence_becomes_array_not_indexed() {
        let encoder = Encoder::default();
        let mut out = Attributes::new();
        let value = HostValue::Sequence(vec![HostValue::from(1i64), HostValue::from(2i64)]);
        encoder.encode("custom.ids", value, &mut out).unwrap();
        assert_eq!(out.get("custom.ids"), Some(&AttrValue::IntArray(vec![1, 2])));
    }

    #[test]
    fn heterogeneous_sequence_coerces_to_strings() {
        let encoder = Encoder::default();
        let mut out = Attributes::new();
        let value = HostValue::Sequence(vec![HostValue::from(1i64), HostValue::from("two")]);
        encoder.encode("custom.mixed", value, &mut out).unwrap();
        assert_eq!(out.get("custom.mixed"), Some(&AttrValue::StrArray(vec!["1".into(), "two".into()])));
    }

    #[test]
    fn depth_beyond_limit_is_summarized() {
        let encoder = Encoder {
            depth_limit: 1,
            ..Encoder::default()
        };
        let mut out = Attributes::new();
        let value = HostValue::Map(vec![(
            "a".into(),
            HostValue::Map(vec![("b".into(), HostValue::Map(vec![("c".into(), HostValue::from(1i64))]))]),
        )]);
        encoder.encode("custom.deep", value, &mut out).unwrap();
        assert_eq!(
            out.get("custom.deep.a.b"),
            Some(&AttrValue::Str(semconv::meta::DEPTH_LIMITED_MARKER.to_string()))
        );
    }

    struct DropEverything;
    impl Redactor for DropEverything {
        fn redact(&self, _name: &str, _value: AttrValue) -> Option<AttrValue> {
            None
        }
    }

    #[test]
    fn redactor_can_drop_a_pair() {
        let encoder = Encoder::with_redactor(&DropEverything);
        let mut out = Attributes::new();
        encoder.encode("custom.secret", HostValue::from("shh"), &mut out).unwrap();
        assert!(out.is_empty());
    }
}
