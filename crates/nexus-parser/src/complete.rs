//! Prefix completion over built-in command names and surface method paths.

use std::collections::BTreeSet;

/// The fixed scripted-surface method paths offered for dotted prefixes.
pub const SURFACE_METHODS: &[&str] = &[
    "fs.readFile",
    "fs.writeFile",
    "fs.listDir",
    "fs.stat",
    "fs.watch",
    "fs.find",
    "proc.exec",
    "proc.list",
    "proc.kill",
    "proc.info",
    "proc.monitor",
    "net.get",
    "net.post",
    "net.download",
    "utils.sleep",
    "utils.uuid",
    "utils.hash",
    "utils.formatBytes",
    "utils.retry",
    "utils.deepMerge",
    "utils.deepClone",
];

/// Extract the word containing/preceding `cursor`.
fn word_at(line: &str, cursor: usize) -> &str {
    let cursor = cursor.min(line.len());
    let head = &line[..cursor];
    match head.rfind(char::is_whitespace) {
        Some(ws) => &head[ws + 1..],
        None => head,
    }
}

/// Candidates whose prefix matches the word under the cursor. An exact
/// match sorts first; the rest are alphabetical.
pub fn completions(known_commands: &BTreeSet<String>, line: &str, cursor: usize) -> Vec<String> {
    let word = word_at(line, cursor);
    if word.is_empty() {
        return Vec::new();
    }

    let mut matches: Vec<String> = Vec::new();
    for name in known_commands {
        if name.starts_with(word) {
            matches.push(name.clone());
        }
    }
    if word.contains('.') || SURFACE_METHODS.iter().any(|m| m.starts_with(word)) {
        for method in SURFACE_METHODS {
            if method.starts_with(word) {
                matches.push((*method).to_string());
            }
        }
    }

    matches.sort();
    matches.dedup();
    if let Some(idx) = matches.iter().position(|m| m == word) {
        let exact = matches.remove(idx);
        matches.insert(0, exact);
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands() -> BTreeSet<String> {
        ["ls", "cd", "cat", "cp", "pwd", "echo"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn completes_command_prefix() {
        let out = completions(&commands(), "c", 1);
        assert_eq!(out, vec!["cat", "cd", "cp"]);
    }

    #[test]
    fn completes_dotted_surface_paths() {
        let out = completions(&commands(), "fs.w", 4);
        assert_eq!(out, vec!["fs.watch", "fs.writeFile"]);
    }

    #[test]
    fn exact_match_sorts_first() {
        let out = completions(&commands(), "proc.list", 9);
        assert_eq!(out[0], "proc.list");
    }

    #[test]
    fn word_is_taken_at_cursor() {
        // Cursor inside the second word completes that word only.
        let out = completions(&commands(), "echo c", 6);
        assert_eq!(out, vec!["cat", "cd", "cp"]);
    }

    #[test]
    fn empty_word_completes_nothing() {
        assert!(completions(&commands(), "ls ", 3).is_empty());
    }
}
