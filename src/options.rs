//! Resolved per-request serve options.
//!
//! [`ServeOptions`] is the flat configuration structure the orchestrator works
//! from: controller defaults merged with whatever the caller overrides. All
//! fields have defaults, so embedders only set what they care about:
//!
//! ```
//! use combinify::options::{ContentType, ServeOptions};
//!
//! let options = ServeOptions {
//!     content_type: ContentType::Css,
//!     max_age: 86_400,
//!     ..ServeOptions::default()
//! };
//! assert!(options.is_public);
//! ```
//!
//! ## Invariants
//!
//! - `last_modified_time` must reflect the maximum modification time across
//!   all sources, otherwise stale cache entries are served. Leave it at `0`
//!   and the orchestrator derives it from the sources.
//! - `max_age = 0` means "revalidate every request": the conditional
//!   negotiator emits `max-age=0` and no `Expires` header.

use crate::minifier::MinifyOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content type of the combined output.
///
/// Serialized form matches the wire MIME type so options maps keyed by
/// content type are stable across processes (they feed the cache key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "text/css")]
    Css,
    #[serde(rename = "application/x-javascript")]
    Js,
    #[serde(rename = "text/html")]
    Html,
}

impl ContentType {
    /// MIME type sent in `Content-Type`.
    pub fn mime(self) -> &'static str {
        match self {
            ContentType::Css => "text/css",
            ContentType::Js => "application/x-javascript",
            ContentType::Html => "text/html",
        }
    }

    /// Separator used when joining sources and group outputs.
    ///
    /// JS gets `"\n;"` so a statement terminator and line break sit between
    /// files: a file ending in a `//` comment or an unterminated statement
    /// cannot swallow the start of the next file. CSS and HTML concatenate
    /// directly.
    pub fn join_separator(self) -> &'static str {
        match self {
            ContentType::Js => "\n;",
            ContentType::Css | ContentType::Html => "",
        }
    }

    /// Guess a content type from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "css" => Some(ContentType::Css),
            "js" | "mjs" => Some(ContentType::Js),
            "html" | "htm" => Some(ContentType::Html),
            _ => None,
        }
    }
}

/// Warning comment prepended to combined CSS when an `@import` appears after
/// the first rule block (browsers silently ignore such imports). Set
/// [`ServeOptions::import_warning`] to an empty string to disable.
pub const DEFAULT_IMPORT_WARNING: &str =
    "/* Combined CSS contains an @import after a rule block; most browsers will ignore it. \
     See https://github.com/arthur-debert/combinify/wiki/css-imports */\n";

/// Documentation URL referenced by error page bodies.
pub const URL_DEBUG: &str = "https://github.com/arthur-debert/combinify/wiki/debugging";

/// Resolved configuration for one serve call.
///
/// Unknown keys are rejected when deserialized so embedders catch typos in
/// option maps early.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServeOptions {
    /// Content type of the combined output.
    pub content_type: ContentType,
    /// Whether output may be content-encoded at all. `false` forces identity.
    pub encode_output: bool,
    /// Forced encoding method (`"gzip"` or `""` for identity). `None` means
    /// negotiate against the client's `Accept-Encoding`.
    pub encode_method: Option<String>,
    /// Gzip compression level (0-9).
    pub encode_level: u32,
    /// Max modification time across sources, epoch seconds. `0` = derive
    /// from the sources.
    pub last_modified_time: u64,
    /// `Cache-Control: public` vs `private`.
    pub is_public: bool,
    /// Freshness lifetime in seconds; `0` = unset (revalidate every request).
    pub max_age: u64,
    /// Debug mode: line-annotated pass-through output, never cached.
    pub debug: bool,
    /// Bypass minification: pure concatenation (JS) or uncompressed
    /// pass-through with import handling (CSS).
    pub concat_only: bool,
    /// Inject each CSS source's directory as `currentDir` minify-option
    /// context for relative-URI rewriting.
    pub rewrite_css_uris: bool,
    /// Hoist CSS `@import` statements to the top of the combined output.
    pub bubble_css_imports: bool,
    /// Default minifier registry name per content type. Missing entry =
    /// pass-through.
    pub minifiers: BTreeMap<ContentType, String>,
    /// Default minifier options per content type.
    pub minifier_options: BTreeMap<ContentType, MinifyOptions>,
    /// Registry name of a postprocessor applied to the final combined text.
    pub postprocessor: Option<String>,
    /// Status line written for an invalid request (no resolvable sources).
    pub bad_request_header: String,
    /// Status line written when the pipeline fails.
    pub error_header: String,
    /// Charset appended to `Content-Type`; `None` omits it.
    pub content_type_charset: Option<String>,
    /// Warning comment for late CSS `@import`s; empty string disables.
    pub import_warning: String,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            content_type: ContentType::Js,
            encode_output: true,
            encode_method: None,
            encode_level: 9,
            last_modified_time: 0,
            is_public: true,
            max_age: 1800,
            debug: false,
            concat_only: false,
            rewrite_css_uris: true,
            bubble_css_imports: false,
            minifiers: BTreeMap::new(),
            minifier_options: BTreeMap::new(),
            postprocessor: None,
            bad_request_header: "HTTP/1.0 400 Bad Request".to_string(),
            error_header: "HTTP/1.0 500 Internal Server Error".to_string(),
            content_type_charset: Some("utf-8".to_string()),
            import_warning: DEFAULT_IMPORT_WARNING.to_string(),
        }
    }
}

impl ServeOptions {
    /// Default minifier name for the request's content type.
    pub fn default_minifier(&self) -> Option<&str> {
        self.minifiers.get(&self.content_type).map(String::as_str)
    }

    /// Default minifier options for the request's content type.
    pub fn default_minifier_options(&self) -> MinifyOptions {
        self.minifier_options
            .get(&self.content_type)
            .cloned()
            .unwrap_or_default()
    }

    /// `Content-Type` header value, charset included when configured.
    pub fn content_type_header(&self) -> String {
        match &self.content_type_charset {
            Some(charset) => format!("{}; charset={}", self.content_type.mime(), charset),
            None => self.content_type.mime().to_string(),
        }
    }
}

/// Parse the status code out of a status line like `HTTP/1.0 400 Bad Request`.
///
/// Falls back to `fallback` when the line is malformed so a bad template can
/// never turn a client error into a success.
pub fn status_code_of(header: &str, fallback: u16) -> u16 {
    header
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(fallback)
}
