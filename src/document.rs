//! Nested document store
//!
//! A document is a single owned [`Value`] tree (initially an empty
//! mapping). Paths are slices of tokens produced by [`crate::path::split`];
//! a token made of decimal digits addresses an element when the parent
//! is an array and a mapping key otherwise.
//!
//! The store does no locking of its own. Callers serialize access
//! through the owning cache's ownership token.

use serde_json::{Map, Value};

use crate::error::{CacheError, Result};
use crate::path::{self, WILDCARD};

/// Largest length `array_resize` will grow an array to
pub const MAX_ARRAY_LEN: i64 = 1 << 24;

/// Hierarchical value store backing one cache
#[derive(Debug, Clone)]
pub struct Document {
  root: Value,
  delimiter: String,
  revision: u64,
}

impl Default for Document {
  fn default() -> Self {
    Self::new(path::DEFAULT_DELIMITER)
  }
}

impl Document {
  pub fn new(delimiter: &str) -> Self {
    Self {
      root: Value::Object(Map::new()),
      delimiter: delimiter.to_string(),
      revision: 0,
    }
  }

  /// Build a document around existing data. Non-object roots are wrapped
  /// into an empty mapping so key addressing keeps working.
  pub fn from_value(root: Value, delimiter: &str) -> Self {
    let root = if root.is_object() {
      root
    } else {
      Value::Object(Map::new())
    };
    Self {
      root,
      delimiter: delimiter.to_string(),
      revision: 0,
    }
  }

  pub fn delimiter(&self) -> &str {
    &self.delimiter
  }

  /// Counter bumped by every mutating call
  pub fn revision(&self) -> u64 {
    self.revision
  }

  /// Resolve a path to its value
  pub fn get(&self, path: &[&str]) -> Result<&Value> {
    let mut current = &self.root;
    for token in path {
      current = match current {
        Value::Object(map) => map.get(*token),
        Value::Array(items) => path::as_index(token).and_then(|i| items.get(i)),
        _ => None,
      }
      .ok_or_else(|| self.not_found(path))?;
    }
    Ok(current)
  }

  fn get_mut(&mut self, path: &[&str]) -> Result<&mut Value> {
    let delimiter = self.delimiter.clone();
    let mut current = &mut self.root;
    for token in path {
      current = match current {
        Value::Object(map) => map.get_mut(*token),
        Value::Array(items) => path::as_index(token).and_then(move |i| items.get_mut(i)),
        _ => None,
      }
      .ok_or_else(|| CacheError::KeyNotFound(path::join(path, &delimiter)))?;
    }
    Ok(current)
  }

  /// Write a value, creating intermediate mappings as needed.
  ///
  /// Scalars standing in the way of the path are replaced by mappings.
  /// Array segments must address an existing element.
  pub fn set(&mut self, path: &[&str], value: Value) -> Result<()> {
    self.revision += 1;
    let Some((last, parents)) = path.split_last() else {
      self.root = value;
      return Ok(());
    };

    let full = path::join(path, &self.delimiter);
    let mut current = &mut self.root;
    for token in parents {
      current = descend_or_create(current, token, &full)?;
    }

    match current {
      Value::Array(items) => {
        let len = items.len();
        match path::as_index(last) {
          Some(i) if i < len => {
            items[i] = value;
            Ok(())
          }
          _ => Err(CacheError::IndexOutOfBounds {
            key: full,
            index: last.parse().unwrap_or(-1),
          }),
        }
      }
      Value::Object(map) => {
        map.insert((*last).to_string(), value);
        Ok(())
      }
      other => {
        let mut map = Map::new();
        map.insert((*last).to_string(), value);
        *other = Value::Object(map);
        Ok(())
      }
    }
  }

  /// Remove the value at a path. Missing paths are ignored; a numeric
  /// last segment under an array removes that element.
  pub fn delete(&mut self, path: &[&str]) {
    self.revision += 1;
    let Some((last, parents)) = path.split_last() else {
      return;
    };
    let Ok(parent) = self.get_mut(parents) else {
      return;
    };
    match parent {
      Value::Object(map) => {
        map.remove(*last);
      }
      Value::Array(items) => {
        if let Some(i) = path::as_index(last) {
          if i < items.len() {
            items.remove(i);
          }
        }
      }
      _ => {}
    }
  }

  /// Remove one element from the array at `parent`
  pub fn array_remove(&mut self, parent: &[&str], index: i64) -> Result<()> {
    self.revision += 1;
    let key = path::join(parent, &self.delimiter);
    match self.get_mut(parent)? {
      Value::Array(items) => {
        if index < 0 || index as usize >= items.len() {
          return Err(CacheError::IndexOutOfBounds { key, index });
        }
        items.remove(index as usize);
        Ok(())
      }
      _ => Err(CacheError::NotAnArray(key)),
    }
  }

  /// Push a value onto the array at `path`
  pub fn array_append(&mut self, path: &[&str], value: Value) -> Result<()> {
    self.revision += 1;
    let key = path::join(path, &self.delimiter);
    match self.get_mut(path)? {
      Value::Array(items) => {
        items.push(value);
        Ok(())
      }
      _ => Err(CacheError::NotAnArray(key)),
    }
  }

  /// Truncate or null-pad the array at `path` to `size` elements
  pub fn array_resize(&mut self, path: &[&str], size: i64) -> Result<()> {
    if !(0..=MAX_ARRAY_LEN).contains(&size) {
      return Err(CacheError::InvalidSize(size));
    }
    self.revision += 1;
    let key = path::join(path, &self.delimiter);
    match self.get_mut(path)? {
      Value::Array(items) => {
        items.resize(size as usize, Value::Null);
        Ok(())
      }
      _ => Err(CacheError::NotAnArray(key)),
    }
  }

  pub fn exists(&self, path: &[&str]) -> bool {
    self.get(path).is_ok()
  }

  /// Snapshot of the whole tree
  pub fn data(&self) -> Value {
    self.root.clone()
  }

  /// Replace the whole tree
  pub fn set_data(&mut self, root: Value) {
    self.revision += 1;
    self.root = if root.is_object() {
      root
    } else {
      Value::Object(Map::new())
    };
  }

  /// Concrete keys of every node matching a wildcard pattern.
  ///
  /// Mapping children are visited in key order and array children in
  /// index order, so the result is stable for a given tree.
  pub fn wild_keys(&self, pattern: &str) -> Vec<String> {
    let tokens = path::split(pattern, &self.delimiter);
    let mut out = Vec::new();
    let mut prefix = Vec::with_capacity(tokens.len());
    self.walk(&self.root, &tokens, &mut prefix, &mut out);
    out
  }

  fn walk(&self, node: &Value, tokens: &[&str], prefix: &mut Vec<String>, out: &mut Vec<String>) {
    let Some((head, rest)) = tokens.split_first() else {
      out.push(path::join(prefix, &self.delimiter));
      return;
    };

    if *head == WILDCARD {
      match node {
        Value::Object(map) => {
          for (key, child) in map {
            prefix.push(key.clone());
            self.walk(child, rest, prefix, out);
            prefix.pop();
          }
        }
        Value::Array(items) => {
          for (i, child) in items.iter().enumerate() {
            prefix.push(i.to_string());
            self.walk(child, rest, prefix, out);
            prefix.pop();
          }
        }
        _ => {}
      }
      return;
    }

    let child = match node {
      Value::Object(map) => map.get(*head),
      Value::Array(items) => path::as_index(head).and_then(|i| items.get(i)),
      _ => None,
    };
    if let Some(child) = child {
      prefix.push((*head).to_string());
      self.walk(child, rest, prefix, out);
      prefix.pop();
    }
  }

  /// Estimated size of the document in bytes (its JSON encoding)
  pub fn size_bytes(&self) -> usize {
    serde_json::to_vec(&self.root).map(|v| v.len()).unwrap_or(0)
  }

  fn not_found(&self, path: &[&str]) -> CacheError {
    CacheError::KeyNotFound(path::join(path, &self.delimiter))
  }
}

fn descend_or_create<'v>(node: &'v mut Value, token: &str, full: &str) -> Result<&'v mut Value> {
  match node {
    Value::Array(items) => {
      let len = items.len();
      match path::as_index(token) {
        Some(i) if i < len => Ok(&mut items[i]),
        _ => Err(CacheError::IndexOutOfBounds {
          key: full.to_string(),
          index: token.parse().unwrap_or(-1),
        }),
      }
    }
    Value::Object(map) => Ok(
      map
        .entry(token.to_string())
        .or_insert_with(|| Value::Object(Map::new())),
    ),
    other => {
      let mut map = Map::new();
      map.insert(token.to_string(), Value::Object(Map::new()));
      *other = Value::Object(map);
      match other {
        Value::Object(map) => map
          .get_mut(token)
          .ok_or_else(|| CacheError::Internal(format!("failed to create {}", full))),
        _ => Err(CacheError::Internal(format!("failed to create {}", full))),
      }
    }
  }
}

/// Coerce a numeric value to `f64`
pub fn to_f64(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64(),
    _ => None,
  }
}

/// Store an arithmetic result, keeping integral results as integers
pub fn number_value(f: f64) -> Value {
  if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
    Value::from(f as i64)
  } else {
    Value::from(f)
  }
}

/// Render a value as text the way templates and the RESP surface show it
pub fn render(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => "null".to_string(),
    other => other.to_string(),
  }
}
