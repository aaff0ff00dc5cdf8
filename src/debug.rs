//! Debug-request detection.
//!
//! Debug mode (line-annotated, uncompressed, never-cached output) can be
//! requested two ways:
//!
//! - a `debug` parameter anywhere in the query string, or
//! - a `combinifyDebug` cookie holding whitespace-separated URI patterns
//!   (with `*`/`?` wildcards), letting a developer flip debug output on for
//!   chosen asset URLs site-wide without touching markup.

const DEBUG_COOKIE: &str = "combinifyDebug";

/// Whether this request asked for debug output.
pub fn should_debug_request(
    query: Option<&str>,
    cookie_header: Option<&str>,
    request_uri: &str,
) -> bool {
    if let Some(query) = query
        && query
            .split('&')
            .any(|pair| pair.split('=').next() == Some("debug"))
    {
        return true;
    }
    if let Some(patterns) = cookie_header.and_then(cookie_value) {
        return patterns
            .split_whitespace()
            .any(|pattern| uri_matches(pattern, request_uri));
    }
    false
}

/// Value of the debug cookie within a `Cookie` header, if present.
fn cookie_value(header: &str) -> Option<&str> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == DEBUG_COOKIE && !value.is_empty()).then_some(value)
    })
}

/// Case-insensitive wildcard match of `pattern` against any part of `uri`
/// (`*` = any run, `?` = any one character).
fn uri_matches(pattern: &str, uri: &str) -> bool {
    let pattern: Vec<char> = format!("*{}*", pattern.to_lowercase()).chars().collect();
    let uri: Vec<char> = uri.to_lowercase().chars().collect();
    glob_match(&pattern, &uri)
}

/// Iterative wildcard matcher: backtracks to the most recent `*` on
/// mismatch.
fn glob_match(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
