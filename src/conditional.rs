//! Conditional-GET negotiation.
//!
//! Decides whether a request can be answered with `304 Not Modified` and
//! produces the cache-validation header set for both outcomes, so callers
//! that only need headers never trigger body generation.
//!
//! The ETag is a digest over `(last_modified_time, encoding)`. Folding the
//! encoding in gives the gzip and identity variants *distinct* validators: a
//! client that cached the gzip body can never get its cache revalidated
//! against identity bytes (or vice versa) by a proxy that ignores `Vary`.
//!
//! Validator semantics: `If-None-Match` wins when both validators are
//! supplied; `If-Modified-Since` uses ≤ semantics (the client's copy is
//! fresh when its timestamp is at least the server's). The `invalidate`
//! flag (debug mode) forces a full response no matter what the client sent.

use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Inputs to the negotiation, resolved by the orchestrator.
pub struct ConditionalSpec<'a> {
    /// Freshness watermark, epoch seconds.
    pub last_modified: u64,
    /// `Cache-Control: public` vs `private`.
    pub is_public: bool,
    /// Internal encoding method (`""` for identity); part of the ETag.
    pub encoding: &'a str,
    /// Freshness lifetime; `0` means revalidate every request.
    pub max_age: u64,
    /// Force a full response regardless of request validators (debug mode
    /// must never serve a 304).
    pub invalidate: bool,
}

/// Outcome of the negotiation plus the headers to attach either way.
pub struct ConditionalGet {
    /// `true`: the client's cached copy is fresh — emit 304, no body.
    pub cache_is_valid: bool,
    headers: Vec<(String, String)>,
}

impl ConditionalGet {
    /// Evaluate request validators against the spec.
    pub fn new(
        spec: &ConditionalSpec<'_>,
        if_none_match: Option<&str>,
        if_modified_since: Option<&str>,
    ) -> Self {
        let etag = compute_etag(spec.last_modified, spec.encoding);
        let headers = build_headers(spec, &etag);
        let cache_is_valid = if spec.invalidate {
            false
        } else {
            client_cache_is_fresh(spec, &etag, if_none_match, if_modified_since)
        };
        Self {
            cache_is_valid,
            headers,
        }
    }

    /// Full header set: `Cache-Control`, `Last-Modified`, `ETag`, and
    /// `Expires` when a max-age is configured. Valid for both the 304 and
    /// the 200 outcome.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn into_headers(self) -> Vec<(String, String)> {
        self.headers
    }
}

fn client_cache_is_fresh(
    spec: &ConditionalSpec<'_>,
    etag: &str,
    if_none_match: Option<&str>,
    if_modified_since: Option<&str>,
) -> bool {
    // ETag comparison takes precedence when the client sent one.
    if let Some(candidates) = if_none_match {
        return etag_matches(etag, candidates);
    }
    if let Some(since) = if_modified_since {
        // IE appends "; length=..." to If-Modified-Since; ignore it.
        let since = since.split(';').next().unwrap_or(since).trim();
        if let Ok(client_time) = httpdate::parse_http_date(since) {
            let server_time = UNIX_EPOCH + Duration::from_secs(spec.last_modified);
            return client_time >= server_time;
        }
    }
    false
}

fn etag_matches(etag: &str, if_none_match: &str) -> bool {
    if_none_match.split(',').map(str::trim).any(|candidate| {
        candidate == "*"
            || candidate == etag
            || candidate.trim_matches('"') == etag.trim_matches('"')
    })
}

/// Digest over (last-modified, encoding), quoted per RFC 9110.
fn compute_etag(last_modified: u64, encoding: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"etag\0");
    hasher.update(last_modified.to_le_bytes());
    hasher.update(encoding.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("\"{}\"", &digest[..16])
}

fn build_headers(spec: &ConditionalSpec<'_>, etag: &str) -> Vec<(String, String)> {
    let mut headers = Vec::with_capacity(4);
    let scope = if spec.is_public { "public" } else { "private" };
    if spec.invalidate {
        headers.push(("Cache-Control".to_string(), "no-cache".to_string()));
    } else {
        headers.push((
            "Cache-Control".to_string(),
            format!("{}, max-age={}", scope, spec.max_age),
        ));
        if spec.max_age > 0 {
            let expires = SystemTime::now() + Duration::from_secs(spec.max_age);
            headers.push(("Expires".to_string(), httpdate::fmt_http_date(expires)));
        }
    }
    let last_modified = UNIX_EPOCH + Duration::from_secs(spec.last_modified);
    headers.push((
        "Last-Modified".to_string(),
        httpdate::fmt_http_date(last_modified),
    ));
    headers.push(("ETag".to_string(), etag.to_string()));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    const LM: u64 = 1_700_000_000;

    fn spec(encoding: &str) -> ConditionalSpec<'_> {
        ConditionalSpec {
            last_modified: LM,
            is_public: true,
            encoding,
            max_age: 1800,
            invalidate: false,
        }
    }

    fn header<'a>(cg: &'a ConditionalGet, name: &str) -> Option<&'a str> {
        cg.headers()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn http_date(epoch: u64) -> String {
        httpdate::fmt_http_date(UNIX_EPOCH + Duration::from_secs(epoch))
    }

    // =========================================================================
    // ETag
    // =========================================================================

    #[test]
    fn etag_differs_per_encoding() {
        assert_ne!(compute_etag(LM, ""), compute_etag(LM, "gzip"));
    }

    #[test]
    fn etag_differs_per_timestamp() {
        assert_ne!(compute_etag(LM, "gzip"), compute_etag(LM + 1, "gzip"));
    }

    #[test]
    fn matching_etag_yields_304() {
        let etag = compute_etag(LM, "gzip");
        let cg = ConditionalGet::new(&spec("gzip"), Some(&etag), None);
        assert!(cg.cache_is_valid);
    }

    #[test]
    fn etag_for_other_encoding_yields_200() {
        // Client cached the gzip variant; identity request must not 304.
        let gzip_etag = compute_etag(LM, "gzip");
        let cg = ConditionalGet::new(&spec(""), Some(&gzip_etag), None);
        assert!(!cg.cache_is_valid);
    }

    #[test]
    fn etag_list_and_wildcard_match() {
        let etag = compute_etag(LM, "");
        let list = format!("\"stale\", {etag}");
        assert!(ConditionalGet::new(&spec(""), Some(&list), None).cache_is_valid);
        assert!(ConditionalGet::new(&spec(""), Some("*"), None).cache_is_valid);
    }

    #[test]
    fn etag_mismatch_beats_fresh_date() {
        // If-None-Match takes precedence: a stale ETag forces a 200 even
        // when If-Modified-Since alone would validate.
        let cg = ConditionalGet::new(&spec(""), Some("\"stale\""), Some(&http_date(LM + 100)));
        assert!(!cg.cache_is_valid);
    }

    // =========================================================================
    // If-Modified-Since
    // =========================================================================

    #[test]
    fn ims_equal_or_newer_yields_304() {
        assert!(ConditionalGet::new(&spec(""), None, Some(&http_date(LM))).cache_is_valid);
        assert!(ConditionalGet::new(&spec(""), None, Some(&http_date(LM + 60))).cache_is_valid);
    }

    #[test]
    fn ims_older_yields_200() {
        assert!(!ConditionalGet::new(&spec(""), None, Some(&http_date(LM - 1))).cache_is_valid);
    }

    #[test]
    fn ims_with_ie_length_suffix_parses() {
        let value = format!("{}; length=2048", http_date(LM));
        assert!(ConditionalGet::new(&spec(""), None, Some(&value)).cache_is_valid);
    }

    #[test]
    fn unparseable_ims_yields_200() {
        assert!(!ConditionalGet::new(&spec(""), None, Some("yesterday-ish")).cache_is_valid);
    }

    #[test]
    fn no_validators_yields_200() {
        assert!(!ConditionalGet::new(&spec(""), None, None).cache_is_valid);
    }

    // =========================================================================
    // Invalidate (debug)
    // =========================================================================

    #[test]
    fn invalidate_forces_200_despite_matching_validators() {
        let etag = compute_etag(LM, "");
        let spec = ConditionalSpec {
            invalidate: true,
            ..self::spec("")
        };
        let cg = ConditionalGet::new(&spec, Some(&etag), Some(&http_date(LM)));
        assert!(!cg.cache_is_valid);
        assert_eq!(header(&cg, "Cache-Control"), Some("no-cache"));
    }

    // =========================================================================
    // Header set
    // =========================================================================

    #[test]
    fn headers_cover_full_set_with_max_age() {
        let cg = ConditionalGet::new(&spec(""), None, None);
        assert_eq!(header(&cg, "Cache-Control"), Some("public, max-age=1800"));
        assert!(header(&cg, "Expires").is_some());
        assert_eq!(header(&cg, "Last-Modified"), Some(http_date(LM).as_str()));
        assert!(header(&cg, "ETag").unwrap().starts_with('"'));
    }

    #[test]
    fn no_expires_without_max_age() {
        let spec = ConditionalSpec {
            max_age: 0,
            is_public: false,
            ..self::spec("")
        };
        let cg = ConditionalGet::new(&spec, None, None);
        assert_eq!(header(&cg, "Cache-Control"), Some("private, max-age=0"));
        assert!(header(&cg, "Expires").is_none());
    }
}
