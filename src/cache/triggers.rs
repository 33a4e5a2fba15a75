//! Trigger registration and dispatch
//!
//! Triggers are kept per pattern in insertion order; patterns are
//! visited in lexicographic order so dispatch is stable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::CacheGuard;
use crate::command::{Command, ExecContext};
use crate::error::{CacheError, Result};
use crate::path;

/// Maximum number of nested trigger frames on one mutation path
pub const MAX_TRIGGER_DEPTH: usize = 10;

/// A command bound to a key pattern
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
  pub id: String,
  pub key: String,
  pub command: Command,
}

impl CacheGuard<'_> {
  /// Register a trigger and return its id
  pub fn create_trigger(&mut self, pattern: &str, command: Command) -> Result<String> {
    if pattern.is_empty() {
      return Err(CacheError::InvalidKey(pattern.to_string()));
    }
    let id = uuid::Uuid::new_v4().to_string();
    self
      .state
      .triggers
      .entry(pattern.to_string())
      .or_default()
      .push(Trigger {
        id: id.clone(),
        key: pattern.to_string(),
        command,
      });
    tracing::debug!(cache = %self.cache.name, pattern, id = %id, "Trigger created");
    Ok(id)
  }

  /// Remove a trigger by id. Unknown ids are ignored.
  pub fn delete_trigger(&mut self, id: &str) -> Result<()> {
    for triggers in self.state.triggers.values_mut() {
      triggers.retain(|t| t.id != id);
    }
    self.state.triggers.retain(|_, triggers| !triggers.is_empty());
    Ok(())
  }

  /// Swap the trigger with `id` for `trigger`, keeping the id.
  ///
  /// The replacement moves to `trigger.key` when the pattern changes.
  pub fn replace_trigger(&mut self, id: &str, trigger: Trigger) -> Result<()> {
    let mut found = None;
    for (pattern, triggers) in self.state.triggers.iter_mut() {
      if let Some(pos) = triggers.iter().position(|t| t.id == id) {
        found = Some((pattern.clone(), pos));
        break;
      }
    }
    let Some((pattern, pos)) = found else {
      return Err(CacheError::TriggerNotFound(id.to_string()));
    };

    let replacement = Trigger {
      id: id.to_string(),
      ..trigger
    };

    if replacement.key == pattern {
      if let Some(slot) = self
        .state
        .triggers
        .get_mut(&pattern)
        .and_then(|t| t.get_mut(pos))
      {
        *slot = replacement;
      }
      return Ok(());
    }

    if let Some(list) = self.state.triggers.get_mut(&pattern) {
      list.remove(pos);
      if list.is_empty() {
        self.state.triggers.remove(&pattern);
      }
    }
    self
      .state
      .triggers
      .entry(replacement.key.clone())
      .or_default()
      .push(replacement);
    Ok(())
  }

  /// Snapshot of registered triggers by pattern
  pub fn triggers(&self) -> BTreeMap<String, Vec<Trigger>> {
    self.state.triggers.clone()
  }

  /// Register a trigger with a known id (restore path)
  pub(crate) fn insert_trigger(&mut self, trigger: Trigger) {
    self
      .state
      .triggers
      .entry(trigger.key.clone())
      .or_default()
      .push(trigger);
  }

  /// Patterns matching `key`, each with the segments bound by its wildcards
  fn matching_triggers(&self, key: &str) -> Vec<(Vec<String>, Trigger)> {
    let delimiter = self.delimiter();
    let mut matched = Vec::new();
    for (pattern, triggers) in &self.state.triggers {
      let captures = if !path::has_wildcard(pattern) {
        if pattern != key {
          continue;
        }
        Vec::new()
      } else {
        match path::match_wildcard(pattern, key, delimiter) {
          Some(captures) if self.exists(key) => captures,
          _ => continue,
        }
      };
      for trigger in triggers {
        matched.push((captures.clone(), trigger.clone()));
      }
    }
    matched
  }

  /// Run every trigger whose pattern matches the mutated key
  pub(crate) fn on_change(
    &mut self,
    ctx: &ExecContext,
    key: &str,
    old: &Value,
    new: &Value,
  ) -> Result<()> {
    let matched = self.matching_triggers(key);
    if matched.is_empty() {
      return Ok(());
    }

    if ctx.depth() >= MAX_TRIGGER_DEPTH {
      tracing::warn!(
        cache = %self.cache.name,
        key,
        depth = ctx.depth(),
        "Trigger recursion limit reached"
      );
      return Err(CacheError::RecursionLimit(MAX_TRIGGER_DEPTH));
    }

    for (captures, trigger) in matched {
      ctx.check_deadline()?;
      let nested = ctx.for_trigger(old.clone(), new.clone());
      tracing::debug!(
        cache = %self.cache.name,
        key,
        trigger = %trigger.id,
        depth = nested.depth(),
        "Firing trigger"
      );
      trigger.command.with_captures(&captures).execute(self, &nested)?;
    }
    Ok(())
  }
}
