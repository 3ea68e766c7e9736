//! Single-pass tokeniser: a state machine over characters with states
//! `normal`, `in-single-quote`, `in-double-quote`, and `escape`.
//!
//! Whitespace separates tokens in `normal`. Quotes preserve their content
//! verbatim, except that a backslash inside double quotes escapes the next
//! character. Adjacent quoted and unquoted runs merge into one token, so
//! `"a b".txt` is the single token `a b.txt`.

use nexus_types::NexusError;

/// One token with its span in the original line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Unquoted, unescaped text.
    pub text: String,
    /// Byte offset of the token's first character in the line.
    pub start: usize,
    /// Byte offset one past the token's last character.
    pub end: usize,
    /// True when any part of the token was quoted.
    pub quoted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    Single,
    Double,
    /// Backslash seen; `bool` is whether we return to Double or Normal.
    Escape(bool),
}

/// Tokenise `input`, reporting error offsets relative to the line itself.
pub fn tokenize(input: &str) -> Result<Vec<Token>, NexusError> {
    tokenize_at(input, 0)
}

/// Tokenise a segment of a larger line; `base_offset` shifts spans and
/// error offsets back into the full line.
pub fn tokenize_at(input: &str, base_offset: usize) -> Result<Vec<Token>, NexusError> {
    let mut tokens = Vec::new();
    let mut state = State::Normal;
    let mut current = String::new();
    let mut token_start = 0usize;
    let mut token_quoted = false;
    let mut in_token = false;
    let mut quote_open_at = 0usize;

    for (pos, ch) in input.char_indices() {
        if ch != '\t' && ch != '\n' && ch != '\r' && ch.is_control() {
            return Err(NexusError::syntax(
                format!("stray control character {:#x}", ch as u32),
                base_offset + pos,
            ));
        }

        match state {
            State::Normal => match ch {
                '\'' => {
                    if !in_token {
                        token_start = pos;
                        in_token = true;
                    }
                    token_quoted = true;
                    quote_open_at = pos;
                    state = State::Single;
                }
                '"' => {
                    if !in_token {
                        token_start = pos;
                        in_token = true;
                    }
                    token_quoted = true;
                    quote_open_at = pos;
                    state = State::Double;
                }
                '\\' => {
                    if !in_token {
                        token_start = pos;
                        in_token = true;
                    }
                    state = State::Escape(false);
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(Token {
                            text: std::mem::take(&mut current),
                            start: base_offset + token_start,
                            end: base_offset + pos,
                            quoted: token_quoted,
                        });
                        in_token = false;
                        token_quoted = false;
                    }
                }
                c => {
                    if !in_token {
                        token_start = pos;
                        in_token = true;
                    }
                    current.push(c);
                }
            },
            State::Single => match ch {
                '\'' => state = State::Normal,
                c => current.push(c),
            },
            State::Double => match ch {
                '"' => state = State::Normal,
                '\\' => state = State::Escape(true),
                c => current.push(c),
            },
            State::Escape(in_double) => {
                current.push(ch);
                state = if in_double { State::Double } else { State::Normal };
            }
        }
    }

    match state {
        State::Single | State::Double => {
            return Err(NexusError::syntax(
                "unterminated quote",
                base_offset + quote_open_at,
            ));
        }
        State::Escape(_) => {
            return Err(NexusError::syntax(
                "trailing escape",
                base_offset + input.len().saturating_sub(1),
            ));
        }
        State::Normal => {}
    }

    if in_token {
        tokens.push(Token {
            text: current,
            start: base_offset + token_start,
            end: base_offset + input.len(),
            quoted: token_quoted,
        });
    }

    Ok(tokens)
}
