//! Highlight token production. The terminal UI colours these spans; the
//! parser decides what each region of the line is.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{classify, tokenize};

/// What a highlighted region of the line is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightKind {
    Command,
    Flag,
    Argument,
    String,
    Keyword,
    Method,
    Operator,
    Comment,
}

/// A highlighted span: byte offset, byte length, kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightSpan {
    pub offset: usize,
    pub length: usize,
    pub kind: HighlightKind,
}

fn script_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(const|let|var|function|async|await|return|if|for|while|try)\b")
            .expect("static regex")
    })
}

fn script_method_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z_][A-Za-z0-9_]*\.[A-Za-z_][A-Za-z0-9_]*").expect("static regex")
    })
}

fn script_string_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#).expect("static regex"))
}

/// Produce highlight spans for a line in either mode.
pub fn highlight(line: &str) -> Vec<HighlightSpan> {
    if classify::is_scripted(line).unwrap_or(false) {
        highlight_scripted(line)
    } else {
        highlight_traditional(line)
    }
}

fn highlight_scripted(line: &str) -> Vec<HighlightSpan> {
    let mut spans = Vec::new();

    for m in script_string_re().find_iter(line) {
        spans.push(HighlightSpan {
            offset: m.start(),
            length: m.len(),
            kind: HighlightKind::String,
        });
    }
    let inside_string =
        |pos: usize, spans: &[HighlightSpan]| -> bool {
            spans
                .iter()
                .any(|s| s.kind == HighlightKind::String && pos >= s.offset && pos < s.offset + s.length)
        };

    for m in script_keyword_re().find_iter(line) {
        if !inside_string(m.start(), &spans) {
            spans.push(HighlightSpan {
                offset: m.start(),
                length: m.len(),
                kind: HighlightKind::Keyword,
            });
        }
    }
    for m in script_method_re().find_iter(line) {
        if !inside_string(m.start(), &spans) {
            spans.push(HighlightSpan {
                offset: m.start(),
                length: m.len(),
                kind: HighlightKind::Method,
            });
        }
    }
    if let Some(pos) = line.find("=>") {
        if !inside_string(pos, &spans) {
            spans.push(HighlightSpan {
                offset: pos,
                length: 2,
                kind: HighlightKind::Operator,
            });
        }
    }

    spans.sort_by_key(|s| s.offset);
    spans
}

fn highlight_traditional(line: &str) -> Vec<HighlightSpan> {
    let mut spans = Vec::new();

    // Comment tail: unquoted `#` to end of line.
    let comment_start = find_unquoted_hash(line);
    let effective = comment_start.unwrap_or(line.len());

    let mut first_in_segment = true;
    if let Ok(tokens) = tokenize::tokenize(&line[..effective]) {
        // Re-scan for pipe operators to reset "command position".
        let mut pipe_positions: Vec<usize> = Vec::new();
        if let Ok(segments) = crate::pipeline::split_pipeline(&line[..effective]) {
            for seg in segments.iter().skip(1) {
                pipe_positions.push(seg.offset - 1);
                spans.push(HighlightSpan {
                    offset: seg.offset - 1,
                    length: 1,
                    kind: HighlightKind::Operator,
                });
            }
        }

        let mut boundary = 0usize;
        for token in &tokens {
            while boundary < pipe_positions.len() && token.start > pipe_positions[boundary] {
                boundary += 1;
                first_in_segment = true;
            }
            let kind = if token.quoted {
                HighlightKind::String
            } else if first_in_segment {
                HighlightKind::Command
            } else if token.text.starts_with('-') && token.text.len() > 1 {
                HighlightKind::Flag
            } else {
                HighlightKind::Argument
            };
            // A quoted first token still occupies the command position.
            if first_in_segment {
                first_in_segment = false;
            }
            spans.push(HighlightSpan {
                offset: token.start,
                length: token.end - token.start,
                kind,
            });
        }
    }

    if let Some(start) = comment_start {
        spans.push(HighlightSpan {
            offset: start,
            length: line.len() - start,
            kind: HighlightKind::Comment,
        });
    }

    spans.sort_by_key(|s| s.offset);
    spans
}

fn find_unquoted_hash(line: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (pos, ch) in line.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if q == '"' && ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                '#' => return Some(pos),
                _ => {}
            },
        }
    }
    None
}
