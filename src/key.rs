//! Server-cache key derivation.
//!
//! A key must be a pure function of the request's (sources, options) so that
//! identical requests — across processes and restarts — land on the same
//! cache slot, and *any* change to a source identity or a key-relevant
//! option moves to a fresh slot. There is no partial-staleness window: the
//! old entry simply stops being addressed.
//!
//! Keys stay debuggable and filesystem-safe: a sanitized, length-capped
//! rendering of the source selection is kept as a human-legible prefix, with
//! the real identity carried by a SHA-256 digest. Total length never exceeds
//! [`MAX_KEY_LEN`].
//!
//! ```text
//! combinify_js.app.js.lib.js_3f5a…  (≤ 100 chars)
//! ```

use crate::options::ServeOptions;
use crate::source::Source;
use sha2::{Digest, Sha256};

/// Bump to invalidate all existing cache entries when the key computation or
/// the combined-output format changes.
pub const KEY_FORMAT_VERSION: u32 = 2;

/// Maximum total key length. Keys double as file names in [`FileCache`]
/// (plus a `.gz` suffix), so they stay well under common filename limits.
///
/// [`FileCache`]: crate::cache::FileCache
pub const MAX_KEY_LEN: usize = 100;

const PREFIX: &str = "combinify";
const DIGEST_HEX_LEN: usize = 32;

/// Derive the cache key for a (sources, options) combination.
pub fn derive_key(sources: &[Box<dyn Source>], options: &ServeOptions) -> String {
    let name_budget = MAX_KEY_LEN - DIGEST_HEX_LEN - PREFIX.len() - 2;
    let mut name = sanitize_selection_id(&selection_id(sources));
    name.truncate(name_budget);

    let mut hasher = Sha256::new();
    hasher.update(b"combinify-key\0");
    hasher.update(KEY_FORMAT_VERSION.to_le_bytes());
    for source in sources {
        hasher.update(source.cache_fingerprint());
        hasher.update(b"\0");
    }
    // BTreeMap iteration order makes this serialization canonical.
    hasher.update(b"minifiers\0");
    for (content_type, minifier) in &options.minifiers {
        hasher.update(content_type.mime());
        hasher.update(b"=");
        hasher.update(minifier);
        hasher.update(b";");
    }
    hasher.update(b"minifier_options\0");
    for (content_type, minify_options) in &options.minifier_options {
        hasher.update(content_type.mime());
        hasher.update(b"{");
        for (key, value) in minify_options {
            hasher.update(key);
            hasher.update(b"=");
            hasher.update(value.to_string());
            hasher.update(b";");
        }
        hasher.update(b"}");
    }
    hasher.update(b"postprocessor\0");
    if let Some(postprocessor) = &options.postprocessor {
        hasher.update(postprocessor);
    }
    hasher.update(b"\0bubble\0");
    hasher.update([options.bubble_css_imports as u8]);

    let digest = format!("{:x}", hasher.finalize());
    format!("{}_{}_{}", PREFIX, name, &digest[..DIGEST_HEX_LEN])
}

/// Concatenated source identities, the raw material of the legible prefix.
fn selection_id(sources: &[Box<dyn Source>]) -> String {
    sources
        .iter()
        .map(|s| s.id().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Strip everything but `[a-zA-Z0-9.=_,]` and collapse runs of dots, so the
/// prefix is safe as a file name and still recognizable.
fn sanitize_selection_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    let mut last_was_dot = false;
    for c in id.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '=' | '_' | ',') {
            out.push(c);
            last_was_dot = false;
        } else if c == '.' {
            if !last_was_dot {
                out.push('.');
            }
            last_was_dot = true;
        }
    }
    out
}
