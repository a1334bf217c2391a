//! Repository and branch pattern matching.
//!
//! Patterns are compared case-insensitively. A pattern containing glob
//! metacharacters (`*`, `?`, `[...]`) is evaluated as a shell-style glob where
//! `*` also crosses `/`; any other pattern is compared for equality. There is
//! no implicit substring matching.
//!
//! The glob dialect is fnmatch's: braces are plain characters and a `[`
//! without a closing `]` matches itself.

use globset::GlobBuilder;

/// Characters that switch a pattern from equality to glob evaluation.
const GLOB_META: [char; 3] = ['*', '?', '['];

/// Whether `value` matches `pattern`.
///
/// Returns `false` when either side is empty. The lone pattern `*` matches
/// every non-empty value.
pub fn match_pattern(value: &str, pattern: &str) -> bool {
    if value.is_empty() || pattern.is_empty() {
        return false;
    }

    let value = value.to_lowercase();
    let pattern = pattern.to_lowercase();

    if pattern == "*" {
        return true;
    }

    if pattern.contains(GLOB_META) {
        if let Ok(glob) = GlobBuilder::new(&to_glob(&pattern))
            .literal_separator(false)
            .backslash_escape(false)
            .build()
        {
            return glob.compile_matcher().is_match(&value);
        }
    }

    value == pattern
}

/// Rewrite an fnmatch pattern into globset syntax.
fn to_glob(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            c @ ('{' | '}') => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    out.extend(&chars[i..=end]);
                    i = end;
                }
                None => out.push_str("[[]"),
            },
            c => out.push(c),
        }
        i += 1;
    }
    out
}

/// Index of the `]` closing the class opened at `start`. A `]` right after
/// `[` or `[!` belongs to the class.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut first = start + 1;
    if chars.get(first) == Some(&'!') {
        first += 1;
    }
    if chars.get(first) == Some(&']') {
        first += 1;
    }
    chars
        .get(first..)?
        .iter()
        .position(|&c| c == ']')
        .map(|offset| first + offset)
}

/// Whether `value` matches any of `patterns`.
pub fn match_any<S: AsRef<str>>(value: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|p| match_pattern(value, p.as_ref()))
}
