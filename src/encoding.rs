//! Content-encoding negotiation and gzip compression.
//!
//! The orchestrator either honors a forced encoding from options or
//! negotiates against the client's `Accept-Encoding`, with one quirk carried
//! over from years of production traffic: early IE6 (pre-XP-SP2, no `SV1`
//! token) and older advertise gzip support they don't reliably have, so
//! known-buggy clients always get identity bytes and no `Vary` header.
//!
//! Internally the method name is always `"gzip"`; the *wire* name echoes the
//! client's spelling (`x-gzip` stays `x-gzip`) so strict user agents accept
//! the `Content-Encoding` they asked for.

use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;

/// Output encoding applied to the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Gzip,
}

impl Encoding {
    /// Internal method name; feeds the ETag so encoded and identity variants
    /// validate independently.
    pub fn method(self) -> &'static str {
        match self {
            Encoding::Identity => "",
            Encoding::Gzip => "gzip",
        }
    }
}

/// Pick an encoding from the request headers.
///
/// Returns the internal encoding plus the wire `Content-Encoding` value
/// (empty for identity). Known-buggy clients are pinned to identity here,
/// before any header parsing.
pub fn negotiate(
    accept_encoding: Option<&str>,
    user_agent: Option<&str>,
) -> (Encoding, &'static str) {
    if is_buggy_ie(user_agent) {
        return (Encoding::Identity, "");
    }
    let Some(header) = accept_encoding else {
        return (Encoding::Identity, "");
    };
    if accepts(header, "gzip") {
        (Encoding::Gzip, "gzip")
    } else if accepts(header, "x-gzip") {
        (Encoding::Gzip, "x-gzip")
    } else {
        (Encoding::Identity, "")
    }
}

/// Whether the client is an IE version with broken gzip handling: IE 5.x,
/// or IE 6 without the XP-SP2 `SV1` token. Opera masquerading as IE is fine.
pub fn is_buggy_ie(user_agent: Option<&str>) -> bool {
    let Some(ua) = user_agent else {
        return false;
    };
    if ua.contains("Opera") {
        return false;
    }
    let Some(rest) = ua.strip_prefix("Mozilla/4.0 (compatible; MSIE ") else {
        return false;
    };
    let Some(major) = rest.chars().next().and_then(|c| c.to_digit(10)) else {
        return false;
    };
    major < 6 || (major == 6 && !ua.contains("SV1"))
}

/// One `Accept-Encoding` member matching `token` with a non-zero q-value.
fn accepts(header: &str, token: &str) -> bool {
    header.split(',').any(|member| {
        let mut pieces = member.trim().split(';');
        let name = pieces.next().unwrap_or("").trim();
        if !name.eq_ignore_ascii_case(token) {
            return false;
        }
        for param in pieces {
            if let Some(q) = param.trim().strip_prefix("q=") {
                return q.trim().parse::<f32>().map(|v| v > 0.0).unwrap_or(true);
            }
        }
        true
    })
}

/// Gzip-encode `bytes` at `level` (0-9, clamped).
pub fn gzip(bytes: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(bytes.len() / 2),
        Compression::new(level.min(9)),
    );
    encoder.write_all(bytes)?;
    encoder.finish()
}
