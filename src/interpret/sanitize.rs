//! Textual repair of string literals in almost-JSON.
//!
//! Models regularly emit raw newlines and tabs inside string values (scripts
//! in `eval` actions are the usual culprit) and stray backslashes from regex
//! or Windows paths. This is a heuristic, not a JSON grammar: it only rewrites
//! the inside of quoted literals and leaves everything else alone.
//!
//! Known limitation: a lone backslash is always doubled, so text that relied
//! on a non-JSON escape (`\d`, `\'` inside double quotes) keeps the backslash
//! as a literal character instead of its intended meaning.

use regex::{Captures, Regex};
use std::sync::OnceLock;

fn literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#).expect("literal regex is valid")
    })
}

/// Escape raw CR/LF/TAB and lone backslashes inside every `"..."` or `'...'`
/// literal. Idempotent.
pub fn sanitize_literals(text: &str) -> String {
    literal_re()
        .replace_all(text, |caps: &Captures| {
            let literal = &caps[0];
            let quote = literal.as_bytes()[0] as char;
            let inner = &literal[1..literal.len() - 1];
            let mut out = String::with_capacity(literal.len() + 8);
            out.push(quote);
            out.push_str(&repair(inner, quote));
            out.push(quote);
            out
        })
        .into_owned()
}

fn repair(inner: &str, quote: char) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.peek().map(|&(_, n)| n) {
                Some(n) if n == quote || is_simple_escape(n) => {
                    out.push('\\');
                    out.push(n);
                    chars.next();
                }
                Some('u') if is_unicode_escape(&inner[i + 1..]) => {
                    out.push('\\');
                }
                _ => out.push_str("\\\\"),
            },
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }

    out
}

fn is_simple_escape(c: char) -> bool {
    matches!(c, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't')
}

/// `rest` starts at the `u` of a `\uXXXX` sequence.
fn is_unicode_escape(rest: &str) -> bool {
    let hex = rest.as_bytes().get(1..5);
    matches!(hex, Some(digits) if digits.iter().all(u8::is_ascii_hexdigit))
}
