use serde::Serialize;
use serde_json::Value;

use crate::override_definitions::OverrideType;

/// A typed override value. Serializes to a bare JSON bool, number or string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OverrideValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl OverrideValue {
    pub fn override_type(&self) -> OverrideType {
        match self {
            OverrideValue::Boolean(_) => OverrideType::Boolean,
            OverrideValue::Integer(_) => OverrideType::Integer,
            OverrideValue::Float(_) => OverrideType::Float,
            OverrideValue::String(_) => OverrideType::String,
        }
    }

    pub fn matches(&self, override_type: OverrideType) -> bool {
        self.override_type() == override_type
    }

    /// Reads a persisted JSON primitive as a value of `override_type`.
    /// Returns `None` when the primitive has the wrong shape; unlike `parse`
    /// nothing is coerced here.
    pub fn from_json(value: &Value, override_type: OverrideType) -> Option<OverrideValue> {
        match override_type {
            OverrideType::Boolean => value.as_bool().map(OverrideValue::Boolean),
            OverrideType::Integer => match value.as_i64() {
                Some(i) => Some(OverrideValue::Integer(i)),
                // JS has a single number type, so an integer may come back as 4.0
                None => value
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| OverrideValue::Integer(f as i64)),
            },
            OverrideType::Float => value.as_f64().map(OverrideValue::Float),
            OverrideType::String => value.as_str().map(|s| OverrideValue::String(s.to_string())),
        }
    }
}

/// Converts a raw query parameter (or form input) into a value of `override_type`.
///
/// Never fails: input that does not parse degrades to `false`, `0`, `0.0`.
/// Numbers are read the way the storefront reads them, from the longest
/// numeric prefix, so `"12px"` is 12.
pub fn parse(raw: &str, override_type: OverrideType) -> OverrideValue {
    match override_type {
        OverrideType::Boolean => OverrideValue::Boolean(raw.eq_ignore_ascii_case("true")),
        OverrideType::Integer => OverrideValue::Integer(parse_integer(raw)),
        OverrideType::Float => OverrideValue::Float(parse_float(raw)),
        OverrideType::String => OverrideValue::String(raw.to_string()),
    }
}

/// Renders a value as query parameter text. Strings are returned as-is;
/// escaping happens when the query string is assembled.
pub fn serialize(value: &OverrideValue) -> String {
    match value {
        OverrideValue::Boolean(b) => b.to_string(),
        OverrideValue::Integer(i) => i.to_string(),
        OverrideValue::Float(f) => serialize_float(*f),
        OverrideValue::String(s) => s.clone(),
    }
}

fn serialize_float(f: f64) -> String {
    if f.is_nan() {
        "0".to_string()
    } else if f == f64::INFINITY {
        "Infinity".to_string()
    } else if f == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        // Display gives the shortest text that reads back to the same f64
        // and drops the fraction for integral values (4.0 -> "4").
        f.to_string()
    }
}

fn count_digits(bytes: &[u8], start: usize) -> usize {
    bytes
        .get(start..)
        .map(|rest| rest.iter().take_while(|b| b.is_ascii_digit()).count())
        .unwrap_or(0)
}

fn sign_len(bytes: &[u8]) -> usize {
    usize::from(matches!(bytes.first(), Some(b'+' | b'-')))
}

fn parse_integer(raw: &str) -> i64 {
    let trimmed = raw.trim_start();
    let bytes = trimmed.as_bytes();

    let sign = sign_len(bytes);
    let digits = count_digits(bytes, sign);
    if digits == 0 {
        return 0;
    }

    // overflow counts as a failed parse
    trimmed[..sign + digits].parse::<i64>().unwrap_or(0)
}

fn parse_float(raw: &str) -> f64 {
    let trimmed = raw.trim_start();
    let bytes = trimmed.as_bytes();

    let sign = sign_len(bytes);
    if trimmed[sign..].starts_with("Infinity") {
        return if bytes.first() == Some(&b'-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }

    let mut end = sign;
    let int_digits = count_digits(bytes, end);
    end += int_digits;

    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = count_digits(bytes, end + 1);
        if int_digits > 0 || frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return 0.0;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let exp_start = end + 1 + sign_len(&bytes[end + 1..]);
        let exp_digits = count_digits(bytes, exp_start);
        if exp_digits > 0 {
            end = exp_start + exp_digits;
        }
    }

    match trimmed[..end].parse::<f64>() {
        Ok(f) if !f.is_nan() => f,
        _ => 0.0,
    }
}
