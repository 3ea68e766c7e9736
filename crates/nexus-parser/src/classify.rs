//! Mode classification: is a line traditional shell or scripted?
//!
//! Classification never evaluates the line. All rules are applied to a
//! masked copy of the input in which quoted regions are blanked out, so
//! `echo "let x"` stays traditional.

use std::sync::OnceLock;

use regex::Regex;

use nexus_types::NexusError;

/// `ident.ident(` -- a scripted method call such as `fs.readFile(`.
fn method_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z_][A-Za-z0-9_]*\.[A-Za-z_][A-Za-z0-9_]*\s*\(").expect("static regex")
    })
}

/// Bare scripted keywords.
fn keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(const|let|var|function|async|await|return)\b").expect("static regex")
    })
}

/// `if (`, `for (`, `while (`, `try {`.
fn block_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:(?:if|for|while)\s*\(|try\s*\{)").expect("static regex"))
}

/// Replace quoted regions (and their delimiters) with spaces so pattern
/// checks only see unquoted syntax. Quote errors are left for the
/// tokeniser; an unterminated quote masks to end of line here.
fn mask_quotes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for ch in input.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if q == '"' && ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
                out.push(if ch == '\n' { '\n' } else { ' ' });
            }
            None => {
                if ch == '\'' || ch == '"' {
                    quote = Some(ch);
                    out.push(' ');
                } else {
                    out.push(ch);
                }
            }
        }
    }
    out
}

/// Count whether open delimiters outstrip closers anywhere in the masked
/// text. A multi-line input left unbalanced is scripted source being
/// continued, not a pipeline.
fn has_unbalanced_open(masked: &str) -> bool {
    let mut paren = 0i32;
    let mut bracket = 0i32;
    let mut brace = 0i32;
    for ch in masked.chars() {
        match ch {
            '(' => paren += 1,
            ')' => paren -= 1,
            '[' => bracket += 1,
            ']' => bracket -= 1,
            '{' => brace += 1,
            '}' => brace -= 1,
            _ => {}
        }
    }
    paren > 0 || bracket > 0 || brace > 0
}

/// Classification predicate for scripted mode. Errors are reserved for
/// inputs no mode could accept (none currently arise here; quote problems
/// surface from the tokeniser on the traditional path).
pub fn is_scripted(input: &str) -> Result<bool, NexusError> {
    let masked = mask_quotes(input);

    if method_call_re().is_match(&masked)
        || masked.contains("=>")
        || keyword_re().is_match(&masked)
        || block_keyword_re().is_match(&masked)
    {
        return Ok(true);
    }

    if masked.contains('\n') && has_unbalanced_open(&masked) {
        return Ok(true);
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted(s: &str) -> bool {
        is_scripted(s).unwrap()
    }

    #[test]
    fn method_calls_are_scripted() {
        assert!(scripted("fs.readFile(\"/etc/hosts\")"));
        assert!(scripted("proc.list()"));
        assert!(scripted("utils.hash(x, \"sha256\")"));
    }

    #[test]
    fn arrow_functions_are_scripted() {
        assert!(scripted("xs.map(x => x + 1)"));
    }

    #[test]
    fn keywords_are_scripted() {
        assert!(scripted("const total = 1"));
        assert!(scripted("await fetch_things()"));
        assert!(scripted("if (ready) { go() }"));
        assert!(scripted("try { risky() } catch {}"));
    }

    #[test]
    fn plain_commands_are_not_scripted() {
        assert!(!scripted("ls -la /tmp"));
        assert!(!scripted("echo hello | wc -c"));
        assert!(!scripted("git status"));
    }

    #[test]
    fn quoted_syntax_does_not_classify() {
        assert!(!scripted("echo \"const x = 1\""));
        assert!(!scripted("echo 'f => f.size'"));
        assert!(!scripted("grep \"if (\" main.c"));
    }

    #[test]
    fn dotted_filenames_are_not_method_calls() {
        // No trailing `(` means no method call.
        assert!(!scripted("cat archive.tar.gz"));
    }

    #[test]
    fn multiline_unbalanced_brace_is_scripted() {
        assert!(scripted("proc\n  .x {"));
        assert!(!scripted("echo {a}"));
    }

    #[test]
    fn ifconfig_is_not_an_if_keyword() {
        assert!(!scripted("ifconfig eth0"));
    }
}
