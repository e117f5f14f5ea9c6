//! Tolerant field decoding for model-produced JSON.
//!
//! Language models write numbers as strings ("5.4", "1,200", "120 mg"),
//! put numbers where text belongs and emit `""` for missing values.
//! These helpers accept all of that and fall back to `None`.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accepts a JSON number or a string starting with a number.
pub fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_f64))
}

/// Accepts strings, numbers and booleans; empty strings become `None`.
pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_string))
}

/// Like [`opt_string`] for mandatory-looking fields: missing becomes empty.
pub fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(opt_string(deserializer)?.unwrap_or_default())
}

pub fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_leading_number(s),
        _ => None,
    }
}

pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parses the numeric prefix of a string: "5.4 mmol/L" -> 5.4, "1,200" -> 1200.
pub fn parse_leading_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let mut end = 0;
    for (i, c) in trimmed.char_indices() {
        let allowed = c.is_ascii_digit() || c == '.' || c == ',' || (i == 0 && (c == '-' || c == '+'));
        if !allowed {
            break;
        }
        end = i + c.len_utf8();
    }
    let number = trimmed[..end].replace(',', "");
    if number.is_empty() || number == "-" || number == "+" {
        return None;
    }
    number.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Sample {
        #[serde(default, deserialize_with = "opt_f64")]
        value: Option<f64>,
        #[serde(default, deserialize_with = "opt_string")]
        unit: Option<String>,
        #[serde(default, deserialize_with = "string")]
        name: String,
    }

    #[test]
    fn numbers_from_strings() {
        let s: Sample = serde_json::from_str(r#"{"value": "5.4 mmol/L", "unit": "mmol/L"}"#).unwrap();
        assert_eq!(s.value, Some(5.4));
        assert_eq!(s.unit.as_deref(), Some("mmol/L"));
        assert_eq!(s.name, "");
    }

    #[test]
    fn empty_and_null_become_none() {
        let s: Sample = serde_json::from_str(r#"{"value": "", "unit": "  ", "name": null}"#).unwrap();
        assert_eq!(s.value, None);
        assert_eq!(s.unit, None);
        assert_eq!(s.name, "");
    }

    #[test]
    fn numeric_name_is_stringified() {
        let s: Sample = serde_json::from_str(r#"{"name": 42, "value": 7}"#).unwrap();
        assert_eq!(s.name, "42");
        assert_eq!(s.value, Some(7.0));
    }

    #[test]
    fn leading_number_parsing() {
        assert_eq!(parse_leading_number("1,200"), Some(1200.0));
        assert_eq!(parse_leading_number("-3.5"), Some(-3.5));
        assert_eq!(parse_leading_number("mg"), None);
        assert_eq!(parse_leading_number("-"), None);
    }
}
