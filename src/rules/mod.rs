//! # Rule Parser
//!
//! Extracts the routed host from proxy rule expressions such as
//! ``Host(`app.example.com`) && PathPrefix(`/api`)``.
//!
//! Extraction never fails. Input that carries no recognizable host yields an
//! empty string and callers skip the route.

mod regexp;

use once_cell::sync::Lazy;
use regex::Regex;

pub use regexp::simplify_host_regexp;

/// Sentinel for rules that match any host (`HostRegexp(`.+`)`, `HostSNI(`*`)`).
pub const ANY_HOST: &str = "*";

/// One quoted argument in any of the three accepted delimiters.
macro_rules! quoted_call {
    ($name:literal) => {
        concat!(r"\b", $name, r"\(\s*(?:`([^`]*)`|", "\"", r#"([^"]*)"#, "\"", r"|'([^']*)')")
    };
}

static HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(quoted_call!("Host")).expect("Host rule regex is valid"));
static HOST_REGEXP: Lazy<Regex> =
    Lazy::new(|| Regex::new(quoted_call!("HostRegexp")).expect("HostRegexp rule regex is valid"));
static LEGACY_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bHost:\s*([^\s,)]+)").expect("legacy Host rule regex is valid"));
static HOST_SNI: Lazy<Regex> =
    Lazy::new(|| Regex::new(quoted_call!("HostSNI")).expect("HostSNI rule regex is valid"));
static HOST_SNI_REGEXP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(quoted_call!("HostSNIRegexp")).expect("HostSNIRegexp rule regex is valid")
});

struct Matchers {
    exact: &'static Lazy<Regex>,
    pattern: &'static Lazy<Regex>,
    legacy: Option<&'static Lazy<Regex>>,
}

static HTTP_MATCHERS: Matchers = Matchers {
    exact: &HOST,
    pattern: &HOST_REGEXP,
    legacy: Some(&LEGACY_HOST),
};

static SNI_MATCHERS: Matchers = Matchers {
    exact: &HOST_SNI,
    pattern: &HOST_SNI_REGEXP,
    legacy: None,
};

/// Host matched by an HTTP router rule, or `""`.
pub fn extract_host(rule: &str) -> String {
    extract_with(rule, &HTTP_MATCHERS)
}

/// Server name matched by a TCP router rule, or `""`.
pub fn extract_sni(rule: &str) -> String {
    extract_with(rule, &SNI_MATCHERS)
}

fn extract_with(rule: &str, matchers: &Matchers) -> String {
    let rule = rule.trim();
    if rule.is_empty() {
        return String::new();
    }

    if let Some(host) = first_argument(matchers.exact, rule) {
        let host = host.trim();
        if !host.is_empty() {
            return host.to_string();
        }
    }

    if let Some(pattern) = first_argument(matchers.pattern, rule) {
        let host = simplify_host_regexp(&pattern);
        if !host.is_empty() {
            return host;
        }
    }

    if let Some(legacy) = matchers.legacy {
        if let Some(host) = legacy.captures(rule).and_then(|caps| caps.get(1)) {
            return host.as_str().to_string();
        }
    }

    let operands = split_and(rule);
    if operands.len() > 1 {
        for operand in operands {
            let host = extract_with(strip_outer_parens(operand), matchers);
            if !host.is_empty() {
                return host;
            }
        }
    }

    String::new()
}

fn first_argument(regex: &Regex, rule: &str) -> Option<String> {
    let caps = regex.captures(rule)?;
    (1..=3).find_map(|i| caps.get(i)).map(|m| m.as_str().to_string())
}

/// Split on `&&` at paren depth zero, ignoring quoted text.
fn split_and(rule: &str) -> Vec<&str> {
    let bytes = rule.as_bytes();
    let mut operands = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'`' | b'"' | b'\'' => quote = Some(b),
                b'(' => depth += 1,
                b')' => depth -= 1,
                b'&' if depth == 0 && bytes.get(i + 1) == Some(&b'&') => {
                    operands.push(rule[start..i].trim());
                    i += 2;
                    start = i;
                    continue;
                }
                _ => {}
            },
        }
        i += 1;
    }
    operands.push(rule[start..].trim());
    operands
}

/// `(a && b)` -> `a && b`, only when the outer pair encloses the whole operand.
fn strip_outer_parens(mut operand: &str) -> &str {
    loop {
        let trimmed = operand.trim();
        if !(trimmed.starts_with('(') && trimmed.ends_with(')')) || !encloses(trimmed) {
            return trimmed;
        }
        operand = &trimmed[1..trimmed.len() - 1];
    }
}

fn encloses(s: &str) -> bool {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != s.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}
