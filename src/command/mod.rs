//! Command language
//!
//! Commands are a small tree evaluated against a held [`CacheGuard`]. The
//! JSON form is tagged by `"type"`:
//!
//! ```json
//! {"type": "IF", "condition": "${{n}} > 1",
//!  "if_true": {"type": "RETURN", "key": "big"},
//!  "if_false": {"type": "NOOP"}}
//! ```

mod context;
mod exec;
pub mod expr;
pub mod interpolate;

pub use context::ExecContext;
pub use exec::PRINT_TARGET;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::cache::CacheGuard;
use crate::error::{CacheError, Result};
use interpolate::substitute_captures;

/// Outcome of executing a command: its value, or the first error
pub type CmdResult = Result<Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
  #[serde(rename = "NOOP")]
  Noop,

  #[serde(rename = "GET")]
  Get {
    #[serde(alias = "key", deserialize_with = "one_or_many")]
    keys: Vec<String>,
  },

  #[serde(rename = "REPLACE")]
  Replace { key: String, value: Value },

  #[serde(rename = "DELETE")]
  Delete { key: String },

  #[serde(rename = "INC")]
  Inc { key: String, value: f64 },

  #[serde(rename = "PRINT")]
  Print { messages: Vec<String> },

  /// Strings are interpolated; any other value is returned unchanged
  #[serde(rename = "RETURN")]
  Return { key: Value },

  #[serde(rename = "IF")]
  If {
    condition: String,
    if_true: Box<Command>,
    if_false: Box<Command>,
  },

  #[serde(rename = "FOR")]
  For {
    loop_expr: String,
    commands: Vec<Command>,
  },

  #[serde(rename = "COMMANDS")]
  Commands { commands: Vec<Command> },
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum OneOrMany {
    One(String),
    Many(Vec<String>),
  }

  Ok(match OneOrMany::deserialize(deserializer)? {
    OneOrMany::One(key) => vec![key],
    OneOrMany::Many(keys) => keys,
  })
}

impl Command {
  pub fn get(key: impl Into<String>) -> Self {
    Command::Get {
      keys: vec![key.into()],
    }
  }

  pub fn replace(key: impl Into<String>, value: impl Into<Value>) -> Self {
    Command::Replace {
      key: key.into(),
      value: value.into(),
    }
  }

  pub fn delete(key: impl Into<String>) -> Self {
    Command::Delete { key: key.into() }
  }

  pub fn inc(key: impl Into<String>, value: f64) -> Self {
    Command::Inc {
      key: key.into(),
      value,
    }
  }

  pub fn print<S: Into<String>>(messages: impl IntoIterator<Item = S>) -> Self {
    Command::Print {
      messages: messages.into_iter().map(Into::into).collect(),
    }
  }

  pub fn ret(value: impl Into<Value>) -> Self {
    Command::Return { key: value.into() }
  }

  pub fn if_else(condition: impl Into<String>, if_true: Command, if_false: Command) -> Self {
    Command::If {
      condition: condition.into(),
      if_true: Box::new(if_true),
      if_false: Box::new(if_false),
    }
  }

  pub fn for_each(loop_expr: impl Into<String>, commands: Vec<Command>) -> Self {
    Command::For {
      loop_expr: loop_expr.into(),
      commands,
    }
  }

  pub fn group(commands: Vec<Command>) -> Self {
    Command::Commands { commands }
  }

  /// Decode one command from its JSON form
  pub fn from_json(value: Value) -> Result<Command> {
    serde_json::from_value(value).map_err(|e| CacheError::InvalidCommand(e.to_string()))
  }

  /// Decode a command list, naming the position of the first bad entry
  pub fn list_from_json(values: Vec<Value>) -> Result<Vec<Command>> {
    values
      .into_iter()
      .enumerate()
      .map(|(i, value)| {
        serde_json::from_value::<Command>(value)
          .map_err(|e| CacheError::InvalidCommand(format!("#{}: {}", i, e)))
      })
      .collect()
  }

  /// Name of the variant as it appears in the `"type"` tag
  pub fn type_name(&self) -> &'static str {
    match self {
      Command::Noop => "NOOP",
      Command::Get { .. } => "GET",
      Command::Replace { .. } => "REPLACE",
      Command::Delete { .. } => "DELETE",
      Command::Inc { .. } => "INC",
      Command::Print { .. } => "PRINT",
      Command::Return { .. } => "RETURN",
      Command::If { .. } => "IF",
      Command::For { .. } => "FOR",
      Command::Commands { .. } => "COMMANDS",
    }
  }

  /// Rewrite `${{N}}` placeholders in every string argument.
  ///
  /// A nested `FOR` only has its loop expression rewritten; its body
  /// binds the captures of its own loop.
  pub fn with_captures(&self, captures: &[String]) -> Command {
    if captures.is_empty() {
      return self.clone();
    }
    let sub = |s: &str| substitute_captures(s, captures);
    match self {
      Command::Noop => Command::Noop,
      Command::Get { keys } => Command::Get {
        keys: keys.iter().map(|k| sub(k)).collect(),
      },
      Command::Replace { key, value } => Command::Replace {
        key: sub(key),
        value: match value {
          Value::String(s) => Value::String(sub(s)),
          other => other.clone(),
        },
      },
      Command::Delete { key } => Command::Delete { key: sub(key) },
      Command::Inc { key, value } => Command::Inc {
        key: sub(key),
        value: *value,
      },
      Command::Print { messages } => Command::Print {
        messages: messages.iter().map(|m| sub(m)).collect(),
      },
      Command::Return { key } => Command::Return {
        key: match key {
          Value::String(s) => Value::String(sub(s)),
          other => other.clone(),
        },
      },
      Command::If {
        condition,
        if_true,
        if_false,
      } => Command::If {
        condition: sub(condition),
        if_true: Box::new(if_true.with_captures(captures)),
        if_false: Box::new(if_false.with_captures(captures)),
      },
      Command::For {
        loop_expr,
        commands,
      } => Command::For {
        loop_expr: sub(loop_expr),
        commands: commands.clone(),
      },
      Command::Commands { commands } => Command::Commands {
        commands: commands.iter().map(|c| c.with_captures(captures)).collect(),
      },
    }
  }

  /// Run the command against the held cache
  pub fn execute(&self, guard: &mut CacheGuard<'_>, ctx: &ExecContext) -> CmdResult {
    ctx.check_deadline()?;
    tracing::trace!(command = self.type_name(), "Executing command");
    match self {
      Command::Noop => Ok(Value::Null),
      Command::Get { keys } => exec::get(guard, ctx, keys),
      Command::Replace { key, value } => exec::replace(guard, ctx, key, value),
      Command::Delete { key } => exec::delete(guard, ctx, key),
      Command::Inc { key, value } => exec::inc(guard, ctx, key, *value),
      Command::Print { messages } => exec::print(guard, ctx, messages),
      Command::Return { key } => exec::ret(guard, ctx, key),
      Command::If {
        condition,
        if_true,
        if_false,
      } => exec::branch(guard, ctx, condition, if_true, if_false),
      Command::For {
        loop_expr,
        commands,
      } => exec::for_each(guard, ctx, loop_expr, commands),
      Command::Commands { commands } => execute_all(commands, guard, ctx),
    }
  }
}

/// Run `commands` in order as an implicit `COMMANDS`, stopping at the
/// first error. Returns the list of results.
pub fn execute_all(
  commands: &[Command],
  guard: &mut CacheGuard<'_>,
  ctx: &ExecContext,
) -> CmdResult {
  let mut values = Vec::with_capacity(commands.len());
  for command in commands {
    values.push(command.execute(guard, ctx)?);
  }
  Ok(Value::Array(values))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_malformed_commands_are_invalid() {
    let err = Command::from_json(json!({"type": "EXPLODE"})).unwrap_err();
    assert!(matches!(err, CacheError::InvalidCommand(_)));
    assert_eq!(err.kind(), crate::error::ErrorKind::Validation);

    let err = Command::list_from_json(vec![json!({"type": "NOOP"}), json!({"type": "INC"})])
      .unwrap_err();
    assert!(err.to_string().contains("#1"), "{}", err);

    let cmd = Command::from_json(json!({"type": "INC", "key": "n", "value": 2})).unwrap();
    assert_eq!(cmd.type_name(), "INC");
  }

  #[test]
  fn test_json_round_trip_shape() {
    let cmd = Command::if_else(
      "${{n}} > 1",
      Command::ret("big"),
      Command::group(vec![Command::Noop, Command::inc("n", 1.0)]),
    );
    let encoded = serde_json::to_value(&cmd).unwrap();
    assert_eq!(encoded["type"], "IF");
    assert_eq!(encoded["if_true"], json!({"type": "RETURN", "key": "big"}));
    assert_eq!(encoded["if_false"]["commands"][1], json!({"type": "INC", "key": "n", "value": 1.0}));
    let decoded: Command = serde_json::from_value(encoded).unwrap();
    assert_eq!(decoded, cmd);
  }

  #[test]
  fn test_get_accepts_single_key() {
    let one: Command = serde_json::from_value(json!({"type": "GET", "key": "a"})).unwrap();
    assert_eq!(one, Command::get("a"));
    let many: Command = serde_json::from_value(json!({"type": "GET", "keys": ["a", "b"]})).unwrap();
    assert_eq!(
      many,
      Command::Get {
        keys: vec!["a".into(), "b".into()]
      }
    );
  }

  #[test]
  fn test_unknown_type_is_rejected() {
    assert!(serde_json::from_value::<Command>(json!({"type": "EXPLODE"})).is_err());
    assert!(serde_json::from_value::<Command>(json!({"type": "INC", "key": "a"})).is_err());
  }

  #[test]
  fn test_with_captures_rewrites_nested_arguments() {
    let cmd = Command::group(vec![
      Command::if_else(
        "${{jobs/${{1}}/n}} == 0",
        Command::replace("jobs/${{1}}/done", "${{1}}"),
        Command::print(["job ${{1}}"]),
      ),
      Command::for_each("${{jobs/${{1}}/*}}", vec![Command::inc("x/${{1}}", 1.0)]),
    ]);
    let rewritten = cmd.with_captures(&["j7".to_string()]);
    let Command::Commands { commands } = rewritten else {
      panic!("expected COMMANDS");
    };
    assert_eq!(
      commands[0],
      Command::if_else(
        "${{jobs/j7/n}} == 0",
        Command::replace("jobs/j7/done", "j7"),
        Command::print(["job j7"]),
      )
    );
    assert_eq!(
      commands[1],
      Command::for_each("${{jobs/j7/*}}", vec![Command::inc("x/${{1}}", 1.0)])
    );
  }
}
