//! Input parsing for NexusShell: mode classification, tokenisation, command
//! planning, completion, and highlight tokens.
//!
//! The parser is the single source of truth for how a raw line is read.
//! Classification never evaluates the line; it only inspects syntax outside
//! quoted strings.

pub mod classify;
pub mod complete;
pub mod highlight;
mod pipeline;
pub mod tokenize;

use std::collections::BTreeSet;

use nexus_types::{FlagValue, InputMode, NexusError, ParsedCommand, ParsedInput};

pub use complete::SURFACE_METHODS;
pub use highlight::{HighlightKind, HighlightSpan};
pub use tokenize::{tokenize, Token};

/// The parser/classifier. Holds the set of known command names used for
/// completion; everything else is stateless.
#[derive(Debug, Default)]
pub struct Parser {
    known_commands: BTreeSet<String>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the completion vocabulary with registered built-in names.
    pub fn register_command_names<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_commands.extend(names.into_iter().map(Into::into));
    }

    /// Parse one raw input line (possibly multi-line) into a plan.
    ///
    /// Total: every input yields a plan or a `SyntaxError` whose offset is
    /// within `[0, len]`.
    pub fn parse(&self, input: &str) -> Result<ParsedInput, NexusError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(ParsedInput::empty());
        }

        if classify::is_scripted(input)? {
            return Ok(ParsedInput {
                original: input.to_string(),
                mode: InputMode::Scripted,
                commands: Vec::new(),
                script: Some(input.to_string()),
            });
        }

        let segments = pipeline::split_pipeline(input)?;
        let mut commands = Vec::with_capacity(segments.len());
        for segment in &segments {
            // A pipeline segment that classifies as scripted promotes the
            // whole plan; no per-segment splicing.
            if classify::is_scripted(&segment.text)? {
                return Ok(ParsedInput {
                    original: input.to_string(),
                    mode: InputMode::Scripted,
                    commands: Vec::new(),
                    script: Some(input.to_string()),
                });
            }
            if let Some(cmd) = parse_command(&segment.text, segment.offset)? {
                commands.push(cmd);
            }
        }

        if commands.is_empty() {
            return Ok(ParsedInput::empty());
        }

        Ok(ParsedInput {
            original: input.to_string(),
            mode: InputMode::Traditional,
            commands,
            script: None,
        })
    }

    /// Complete the word under the cursor: built-in command names plus
    /// registered surface method paths when the word is a dotted path.
    /// Ordering: exact match first, then alphabetical.
    pub fn completions(&self, line: &str, cursor: usize) -> Vec<String> {
        complete::completions(&self.known_commands, line, cursor)
    }

    /// Produce colouring spans for the line. The terminal UI only colours;
    /// this is the single source of truth for what means what.
    pub fn highlight(&self, line: &str) -> Vec<HighlightSpan> {
        highlight::highlight(line)
    }
}

/// Parse one pipeline segment into a command. `base_offset` anchors error
/// offsets back into the full line. Returns `None` for a blank segment.
fn parse_command(segment: &str, base_offset: usize) -> Result<Option<ParsedCommand>, NexusError> {
    let mut tokens = tokenize::tokenize_at(segment, base_offset)?;
    if tokens.is_empty() {
        return Ok(None);
    }

    // Trailing unquoted `&` marks background execution.
    let mut background = false;
    if let Some(last) = tokens.last() {
        if !last.quoted && last.text == "&" {
            background = true;
            tokens.pop();
        } else if !last.quoted && last.text.len() > 1 && last.text.ends_with('&') {
            background = true;
            let trimmed = last.text[..last.text.len() - 1].to_string();
            tokens.last_mut().expect("token present").text = trimmed;
        }
    }
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut cmd = ParsedCommand::new(tokens[0].text.clone());
    cmd.raw = segment.trim().to_string();
    cmd.background = background;

    for token in &tokens[1..] {
        let text = &token.text;
        if let Some(rest) = text.strip_prefix("--") {
            if rest.is_empty() || rest.starts_with('=') {
                cmd.args.push(text.clone());
            } else if let Some(eq) = rest.find('=') {
                let (key, value) = rest.split_at(eq);
                cmd.flags
                    .insert(key.to_string(), FlagValue::Str(value[1..].to_string()));
            } else {
                cmd.flags.insert(rest.to_string(), FlagValue::Bool(true));
            }
        } else if text.len() > 1 && text.starts_with('-') {
            for short in text[1..].chars() {
                cmd.flags.insert(short.to_string(), FlagValue::Bool(true));
            }
        } else {
            cmd.args.push(text.clone());
        }
    }

    Ok(Some(cmd))
}
