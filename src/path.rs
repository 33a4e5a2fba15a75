//! Key path handling
//!
//! Keys are plain strings split on a configurable delimiter. No escape
//! processing is done and empty segments are preserved, so `"/a//b"`
//! splits into `["", "a", "", "b"]`. A `*` segment matches exactly one
//! segment of a concrete key.

/// Default key delimiter
pub const DEFAULT_DELIMITER: &str = "/";

/// Segment that matches any single path segment
pub const WILDCARD: &str = "*";

/// Split a key into path tokens
pub fn split<'a>(key: &'a str, delimiter: &str) -> Vec<&'a str> {
  if delimiter.is_empty() {
    return vec![key];
  }
  key.split(delimiter).collect()
}

/// Join path tokens back into a key
pub fn join<S: AsRef<str>>(tokens: &[S], delimiter: &str) -> String {
  let mut out = String::new();
  for (i, token) in tokens.iter().enumerate() {
    if i > 0 {
      out.push_str(delimiter);
    }
    out.push_str(token.as_ref());
  }
  out
}

/// True when the key contains a wildcard character anywhere
pub fn has_wildcard(key: &str) -> bool {
  key.contains(WILDCARD)
}

/// Parse a token as an array index (decimal digits only)
pub fn as_index(token: &str) -> Option<usize> {
  if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  token.parse().ok()
}

/// Match a concrete key against a wildcard pattern.
///
/// Returns the segments bound by each `*` in order, or `None` when the
/// segment counts differ or a literal segment does not match.
pub fn match_wildcard(pattern: &str, key: &str, delimiter: &str) -> Option<Vec<String>> {
  let pattern_parts = split(pattern, delimiter);
  let key_parts = split(key, delimiter);

  if pattern_parts.len() != key_parts.len() {
    return None;
  }

  let mut captures = Vec::new();
  for (p, k) in pattern_parts.iter().zip(key_parts.iter()) {
    if *p == WILDCARD {
      captures.push((*k).to_string());
    } else if p != k {
      return None;
    }
  }
  Some(captures)
}
