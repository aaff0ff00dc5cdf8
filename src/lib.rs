//! # Combinify
//!
//! An HTTP asset-serving library that combines, minifies, caches, and
//! conditionally serves groups of CSS and JavaScript files as single
//! responses. One request names a list of source files; the response is the
//! concatenated, minified, optionally gzip-encoded result, with the full
//! cache-validation header set.
//!
//! # Architecture: One Request, One Pass
//!
//! Serving is a single synchronous pass through independent stages, each its
//! own module, each short-circuiting when it can:
//!
//! ```text
//! 1. Conditional  If-None-Match / If-Modified-Since  →  304, no body work
//! 2. Cache        derived key, mtime-validated       →  cached bytes
//! 3. Pipeline     group → minify → join → imports    →  fresh content
//! 4. Encoding     negotiated or forced gzip          →  wire bytes
//! ```
//!
//! This ordering exists for one reason: the expensive step (minification)
//! runs only when both the client's cache and the server's cache miss. A
//! warm deployment answers nearly every request from step 1 or 2.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`serve`] | The orchestrator — [`serve::Server`] composes everything below into one response |
//! | [`source`] | The [`source::Source`] trait plus file and in-memory implementations |
//! | [`pipeline`] | Grouped minification: adjacent same-treatment sources share one minifier call |
//! | [`minifier`] | [`minifier::Minifier`] / [`minifier::Postprocessor`] traits and the name registry |
//! | [`key`] | Deterministic cache-key derivation from sources and content-affecting options |
//! | [`cache`] | The [`cache::CacheStore`] trait with file-backed and in-memory stores |
//! | [`conditional`] | ETag / Last-Modified validation and the cache-header set |
//! | [`encoding`] | `Accept-Encoding` negotiation and gzip compression |
//! | [`debug`] | Debug-request detection via query parameter or site-wide cookie patterns |
//! | [`options`] | [`options::ServeOptions`] — the per-request configuration surface |
//!
//! # Design Decisions
//!
//! ## No Global State
//!
//! Everything is request-scoped. A [`serve::Server`] borrows its
//! [`minifier::MinifierRegistry`] and optional [`cache::CacheStore`];
//! concurrent requests with different options never interfere. Hosts that
//! want shared caching share a store, nothing else.
//!
//! ## Minifiers by Name
//!
//! Sources and options refer to minifiers by registry name, not by function
//! value. Names are comparable, so the pipeline can group adjacent sources
//! with identical treatment, and they feed the cache key, so two option sets
//! that minify identically share a cache slot.
//!
//! ## Structured Results
//!
//! [`serve::Server::serve`] returns a [`serve::ServeResult`] — status,
//! headers, body — and never writes to any output itself.
//! [`serve::Server::serve_to`] is a thin adapter that emits that result
//! CGI-style; embedders map the result into their own server's response
//! type instead.

pub mod cache;
pub mod conditional;
pub mod debug;
pub mod encoding;
pub mod key;
pub mod minifier;
pub mod options;
pub mod pipeline;
pub mod serve;
pub mod source;
