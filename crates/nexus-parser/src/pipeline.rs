//! Quote-aware pipeline splitting.

use nexus_types::NexusError;

/// One pipeline segment: its text and the byte offset where it starts in
/// the full line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub offset: usize,
}

/// Split a traditional line on unquoted `|`. `||` and `&&` are logical
/// operators the shell does not support and are rejected outright.
pub fn split_pipeline(input: &str) -> Result<Vec<Segment>, NexusError> {
    let mut segments = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut seg_start = 0usize;

    let bytes: Vec<(usize, char)> = input.char_indices().collect();
    let mut i = 0;
    while i < bytes.len() {
        let (pos, ch) = bytes[i];
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
                '|' => {
                    if let Some((_, next)) = bytes.get(i + 1).copied() {
                        if next == '|' {
                            return Err(NexusError::syntax(
                                "logical operator '||' is not supported",
                                pos,
                            ));
                        }
                    }
                    segments.push(Segment {
                        text: input[seg_start..pos].to_string(),
                        offset: seg_start,
                    });
                    seg_start = pos + 1;
                }
                '&' => {
                    if let Some((_, next)) = bytes.get(i + 1).copied() {
                        if next == '&' {
                            return Err(NexusError::syntax(
                                "logical operator '&&' is not supported",
                                pos,
                            ));
                        }
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }

    segments.push(Segment {
        text: input[seg_start..].to_string(),
        offset: seg_start,
    });

    Ok(segments)
}
