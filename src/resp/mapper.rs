//! Mapping between document values and RESP replies

use serde_json::Value;

use super::protocol::RespValue;
use crate::config::KeyMode;

/// Render a stored value as a RESP reply.
///
/// Mappings flatten to `[field, value, ...]`; booleans become 1/0 and
/// non-integral numbers are sent as bulk strings.
pub fn to_resp(value: &Value) -> RespValue {
  match value {
    Value::Null => RespValue::null_bulk(),
    Value::Bool(b) => RespValue::integer(i64::from(*b)),
    Value::Number(n) => match n.as_i64() {
      Some(i) => RespValue::integer(i),
      None => RespValue::bulk(n.to_string()),
    },
    Value::String(s) => RespValue::bulk(s.as_str()),
    Value::Array(items) => RespValue::array(items.iter().map(to_resp).collect()),
    Value::Object(map) => RespValue::array(
      map
        .iter()
        .flat_map(|(k, v)| [RespValue::bulk(k.as_str()), to_resp(v)])
        .collect(),
    ),
  }
}

/// Text form of a scalar, as Redis string commands see it
pub fn scalar_text(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
    Value::Null => Some(String::new()),
    Value::Array(_) | Value::Object(_) => None,
  }
}

/// Redis type name of a stored value
pub fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Object(_) => "hash",
    Value::Array(_) => "list",
    _ => "string",
  }
}

/// Rewrite an inbound Redis key into a cache path
pub fn translate_key(key: &str, mode: KeyMode, delimiter: &str) -> String {
  match mode {
    KeyMode::Translate if delimiter != ":" => key.replace(':', delimiter),
    _ => key.to_string(),
  }
}

/// Rewrite a cache path back into Redis key form
pub fn untranslate_key(key: &str, mode: KeyMode, delimiter: &str) -> String {
  match mode {
    KeyMode::Translate if delimiter != ":" => key.replace(delimiter, ":"),
    _ => key.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_to_resp() {
    assert_eq!(to_resp(&json!(null)), RespValue::null_bulk());
    assert_eq!(to_resp(&json!("x")), RespValue::bulk("x"));
    assert_eq!(to_resp(&json!(7)), RespValue::integer(7));
    assert_eq!(to_resp(&json!(1.5)), RespValue::bulk("1.5"));
    assert_eq!(to_resp(&json!(true)), RespValue::integer(1));
    assert_eq!(
      to_resp(&json!(["a", 2])),
      RespValue::array(vec![RespValue::bulk("a"), RespValue::integer(2)])
    );
    assert_eq!(
      to_resp(&json!({"f": "v"})),
      RespValue::array(vec![RespValue::bulk("f"), RespValue::bulk("v")])
    );
  }

  #[test]
  fn test_key_translation() {
    assert_eq!(translate_key("user:1:name", KeyMode::Translate, "/"), "user/1/name");
    assert_eq!(translate_key("user:1", KeyMode::Preserve, "/"), "user:1");
    assert_eq!(untranslate_key("user/1", KeyMode::Translate, "/"), "user:1");
    assert_eq!(type_name(&json!([1])), "list");
    assert_eq!(scalar_text(&json!(12)), Some("12".to_string()));
    assert_eq!(scalar_text(&json!({})), None);
  }
}
