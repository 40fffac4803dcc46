//! Token extraction from upstream response bodies.
//!
//! The token endpoints are inconsistent about how they wrap the token. Each
//! known shape has its own extractor, and they run in a fixed priority order.
//! The first non-empty string wins:
//!
//! 1. bare string (`"abc"` or an unquoted text body)
//! 2. flat object: `Token`, `token` or `access_token`
//! 3. envelope: a boolean success flag plus `Token`
//!
//! A flat `Token` field wins over the flag, so `{"IsToken":false,"Token":"x"}`
//! still yields `x`.
//! 4. nested object under `data` or `result` holding shape 2 or 3
//! 5. non-empty array whose first element is a string or shape 2-4

use serde_json::{Map, Value};
use std::time::Duration;

const TOKEN_FIELDS: &[&str] = &["Token", "token", "access_token"];
const SUCCESS_FLAGS: &[&str] = &["IsToken", "success", "Success", "IsSuccess"];
const NESTED_FIELDS: &[&str] = &["data", "result"];
const TTL_FIELDS: &[&str] = &["expiresInSeconds", "ttlSeconds", "expires_in"];

/// A token pulled out of a response body, plus the TTL hint next to it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedToken {
    pub value: String,
    pub ttl: Option<Duration>,
}

type Extractor = fn(&Value) -> Option<ExtractedToken>;

const EXTRACTORS: &[Extractor] = &[
    bare_string,
    flat_fields,
    envelope,
    nested,
    first_of_sequence,
];

/// Parse a raw response body. Bodies that aren't JSON count as bare strings.
pub fn extract_token(body: &str) -> Option<ExtractedToken> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => extract_from_value(&value),
        Err(_) => bare_string(&Value::String(trimmed.to_string())),
    }
}

pub fn extract_from_value(value: &Value) -> Option<ExtractedToken> {
    EXTRACTORS.iter().find_map(|extract| extract(value))
}

fn bare_string(value: &Value) -> Option<ExtractedToken> {
    non_empty(value.as_str()?).map(|value| ExtractedToken { value, ttl: None })
}

fn flat_fields(value: &Value) -> Option<ExtractedToken> {
    token_field(value.as_object()?, TOKEN_FIELDS)
}

fn envelope(value: &Value) -> Option<ExtractedToken> {
    let obj = value.as_object()?;
    if !success_flag(obj)? {
        return None;
    }
    token_field(obj, TOKEN_FIELDS)
}

fn nested(value: &Value) -> Option<ExtractedToken> {
    let obj = value.as_object()?;
    let outer_ttl = ttl_hint(obj);
    NESTED_FIELDS.iter().find_map(|field| {
        let inner = obj.get(*field)?;
        let mut token = flat_fields(inner).or_else(|| envelope(inner))?;
        token.ttl = token.ttl.or(outer_ttl);
        Some(token)
    })
}

fn first_of_sequence(value: &Value) -> Option<ExtractedToken> {
    let first = value.as_array()?.first()?;
    bare_string(first)
        .or_else(|| flat_fields(first))
        .or_else(|| envelope(first))
        .or_else(|| nested(first))
}

fn token_field(obj: &Map<String, Value>, fields: &[&str]) -> Option<ExtractedToken> {
    fields.iter().find_map(|field| {
        let value = non_empty(obj.get(*field)?.as_str()?)?;
        Some(ExtractedToken {
            value,
            ttl: ttl_hint(obj),
        })
    })
}

/// `Some(flag)` if the object carries a boolean success flag.
fn success_flag(obj: &Map<String, Value>) -> Option<bool> {
    SUCCESS_FLAGS
        .iter()
        .find_map(|flag| obj.get(*flag).and_then(Value::as_bool))
}

/// Positive TTL in seconds, given as a number or a numeric string.
fn ttl_hint(obj: &Map<String, Value>) -> Option<Duration> {
    TTL_FIELDS.iter().find_map(|field| {
        let secs = match obj.get(*field)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        if secs.is_finite() && secs > 0.0 {
            Duration::try_from_secs_f64(secs).ok()
        } else {
            None
        }
    })
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
