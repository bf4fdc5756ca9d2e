//! Readable approximation of `HostRegexp` patterns.

use super::ANY_HOST;
use once_cell::sync::Lazy;
use regex::Regex;

/// Traefik v2 named group `{name:pattern}`.
static NAMED_GROUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{[A-Za-z_][A-Za-z0-9_]*:([^{}]*)\}").expect("named group regex is valid")
});

/// Reduce a host pattern to something a human recognizes as a host.
///
/// `.+` or `.*` (anchored or not) is the catch-all and maps to [`ANY_HOST`]. Anything
/// else is approximated: anchors dropped, named groups reduced to their
/// pattern, escaped dots kept as dots, character classes and wildcards
/// collapsed to `x`, alternation shown as `-`, other metacharacters removed.
pub fn simplify_host_regexp(pattern: &str) -> String {
    let pattern = pattern.trim();
    let unanchored = pattern.strip_prefix('^').unwrap_or(pattern);
    let unanchored = unanchored.strip_suffix('$').unwrap_or(unanchored);
    if matches!(unanchored, ".+" | ".*") {
        return ANY_HOST.to_string();
    }

    let reduced = NAMED_GROUP.replace_all(unanchored, "$1");
    let mut out = String::with_capacity(reduced.len());
    let mut chars = reduced.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('d' | 'w' | 'D' | 'W') => out.push('x'),
                Some('s' | 'S' | 'b' | 'B') | None => {}
                Some(escaped) => out.push(escaped),
            },
            '[' => {
                while let Some(inner) = chars.next() {
                    match inner {
                        '\\' => {
                            chars.next();
                        }
                        ']' => break,
                        _ => {}
                    }
                }
                out.push('x');
            }
            '{' => {
                for inner in chars.by_ref() {
                    if inner == '}' {
                        break;
                    }
                }
            }
            '.' if matches!(chars.peek(), Some('+' | '*')) => {
                chars.next();
                out.push('x');
            }
            '(' => {
                if chars.peek() == Some(&'?') {
                    chars.next();
                    if chars.peek() == Some(&':') {
                        chars.next();
                    }
                }
            }
            '|' => out.push('-'),
            '^' | '$' | ')' | '*' | '+' | '?' => {}
            other => out.push(other),
        }
    }

    out.trim().to_string()
}
