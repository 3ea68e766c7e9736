//! Parser output: the structured plan for one input line.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How the classifier categorised an input line.
///
/// A `mixed` line (a pipeline with at least one scripted segment) is
/// promoted to `scripted` before the plan leaves the parser, so downstream
/// code only ever sees `traditional` or `scripted`. The variant is kept so
/// the promotion is observable in the plan itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    Traditional,
    Scripted,
    Mixed,
}

/// A flag value: `--k=v` carries a string, bare `--k` and short flags carry
/// `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Str(String),
}

impl FlagValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::Str(s) => Some(s),
            FlagValue::Bool(_) => None,
        }
    }

    pub fn is_set(&self) -> bool {
        match self {
            FlagValue::Bool(b) => *b,
            FlagValue::Str(_) => true,
        }
    }
}

/// One command of a plan: name, positional args, flags, background marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<String>,
    pub flags: BTreeMap<String, FlagValue>,
    pub background: bool,
    /// The unparsed segment text this command came from.
    pub raw: String,
}

impl ParsedCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            flags: BTreeMap::new(),
            background: false,
            raw: String::new(),
        }
    }

    /// True when the given flag is present and truthy.
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).is_some_and(FlagValue::is_set)
    }
}

/// The parser's output for one input line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedInput {
    pub original: String,
    pub mode: InputMode,
    pub commands: Vec<ParsedCommand>,
    /// Set when `mode == Scripted`: the full text handed to the evaluator.
    pub script: Option<String>,
}

impl ParsedInput {
    /// An empty traditional plan (blank input line).
    pub fn empty() -> Self {
        Self {
            original: String::new(),
            mode: InputMode::Traditional,
            commands: Vec::new(),
            script: None,
        }
    }

    pub fn is_pipeline(&self) -> bool {
        self.commands.len() > 1
    }

    pub fn is_scripted(&self) -> bool {
        self.mode == InputMode::Scripted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_value_untagged_serde() {
        let v: FlagValue = serde_json::from_str("\"out.txt\"").unwrap();
        assert_eq!(v.as_str(), Some("out.txt"));
        let b: FlagValue = serde_json::from_str("true").unwrap();
        assert!(b.is_set());
    }

    #[test]
    fn parsed_command_flag_lookup() {
        let mut cmd = ParsedCommand::new("ls");
        cmd.flags.insert("all".into(), FlagValue::Bool(true));
        cmd.flags
            .insert("output".into(), FlagValue::Str("x".into()));
        assert!(cmd.flag("all"));
        assert!(cmd.flag("output"));
        assert!(!cmd.flag("missing"));
    }
}
