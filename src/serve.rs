//! Serve orchestrator: one call, one fully resolved HTTP response.
//!
//! [`Server::serve`] composes the whole pipeline — request validation,
//! debug overrides, encoding negotiation, conditional GET, cache
//! consultation, grouped minification, gzip — into a structured
//! [`ServeResult`]. [`Server::serve_to`] is the direct-emission adapter: it
//! writes the status line, headers, and body of that same result to a sink
//! (CGI-style), never a second code path with divergent logic.
//!
//! The call is request-scoped and synchronous: no internal concurrency, no
//! cross-request state beyond the optionally shared [`CacheStore`]. Order
//! matters and is load-bearing:
//!
//! 1. empty source list → bad request, before anything else
//! 2. conditional GET → a 304 short-circuits *before* any cache lookup or
//!    minification (the primary cost-avoidance path)
//! 3. server cache → a valid entry skips minification entirely
//! 4. pipeline → runs at most once per distinct (sources, options) per
//!    cache slot
//!
//! Failure policy: pipeline errors are logged and propagated to the caller
//! (`serve_to` additionally writes the configured generic error page first —
//! clients never see internal messages). Cache write failures are logged
//! and swallowed: a full disk must not take the response down with it.

use crate::cache::CacheStore;
use crate::conditional::{ConditionalGet, ConditionalSpec};
use crate::encoding::{self, Encoding};
use crate::key;
use crate::minifier::{MinifierRegistry, MinifyOptions};
use crate::options::{ContentType, ServeOptions, URL_DEBUG, status_code_of};
use crate::pipeline::{self, CombineRequest, PipelineError, PlannedSource};
use crate::source::{Source, max_last_modified};
use log::{error, warn};
use serde_json::Value;
use std::io::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// Options name a postprocessor nobody registered. Failing loudly beats
    /// serving unprocessed output under a cache key that claims otherwise.
    #[error("unknown postprocessor {0:?}")]
    UnknownPostprocessor(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The request headers the pipeline cares about. Hosts map their server's
/// request type into this; everything is optional.
#[derive(Debug, Clone, Default)]
pub struct ClientRequest {
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
    pub accept_encoding: Option<String>,
    pub user_agent: Option<String>,
}

/// Structured response: the universal contract. Direct HTTP emission is an
/// adapter over this, never a separate path.
#[derive(Debug)]
pub struct ServeResult {
    pub success: bool,
    pub status_code: u16,
    pub content: Vec<u8>,
    /// Ordered response headers.
    pub headers: Vec<(String, String)>,
}

/// The serve orchestrator. Borrows its collaborators — no process-wide
/// mutable state.
pub struct Server<'a> {
    registry: &'a MinifierRegistry,
    cache: Option<&'a dyn CacheStore>,
}

impl<'a> Server<'a> {
    pub fn new(registry: &'a MinifierRegistry) -> Self {
        Self {
            registry,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: &'a dyn CacheStore) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Resolve one request into a structured response.
    ///
    /// Returns `Ok` with `success = false` for an invalid request (empty
    /// source list) — that is a client error, not a server failure. Pipeline
    /// and postprocessor problems come back as `Err`.
    pub fn serve(
        &self,
        sources: &[Box<dyn Source>],
        options: &ServeOptions,
        request: &ClientRequest,
    ) -> Result<ServeResult, ServeError> {
        if sources.is_empty() {
            return Ok(ServeResult {
                success: false,
                status_code: status_code_of(&options.bad_request_header, 400),
                content: Vec::new(),
                headers: Vec::new(),
            });
        }

        let mut options = options.clone();
        if options.last_modified_time == 0 {
            options.last_modified_time = max_last_modified(sources);
        }
        if options.debug {
            // Debug output must never be treated as cacheable downstream.
            options.max_age = 0;
        }

        let (enc, wire_encoding, send_vary) = resolve_encoding(&options, request);

        let conditional = ConditionalGet::new(
            &ConditionalSpec {
                last_modified: options.last_modified_time,
                is_public: options.is_public,
                encoding: enc.method(),
                max_age: options.max_age,
                invalidate: options.debug,
            },
            request.if_none_match.as_deref(),
            request.if_modified_since.as_deref(),
        );
        if conditional.cache_is_valid {
            // Client cache is fresh: no cache lookup, no minification.
            return Ok(ServeResult {
                success: true,
                status_code: 304,
                content: Vec::new(),
                headers: conditional.into_headers(),
            });
        }
        let mut headers = conditional.into_headers();

        let wants_gzip = enc == Encoding::Gzip;
        let body = if let (Some(cache), false) = (self.cache, options.debug) {
            let base_key = key::derive_key(sources, &options);
            let full_key = if wants_gzip {
                format!("{base_key}.gz")
            } else {
                base_key.clone()
            };
            let cached = if cache.is_valid(&full_key, options.last_modified_time) {
                match cache.fetch(&full_key) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        // Fall through to recomputation; a broken read must
                        // not break the response.
                        warn!("cache read failed for {full_key}: {e}");
                        None
                    }
                }
            } else {
                None
            };
            match cached {
                Some(bytes) => bytes,
                None => {
                    let raw = self.run_pipeline(sources, &options)?.into_bytes();
                    if let Err(e) = cache.store(&base_key, &raw) {
                        warn!("cache write failed for {base_key}: {e}");
                    }
                    if wants_gzip {
                        let encoded = encoding::gzip(&raw, options.encode_level)?;
                        if let Err(e) = cache.store(&full_key, &encoded) {
                            warn!("cache write failed for {full_key}: {e}");
                        }
                        encoded
                    } else {
                        raw
                    }
                }
            }
        } else {
            let raw = self.run_pipeline(sources, &options)?.into_bytes();
            if wants_gzip {
                encoding::gzip(&raw, options.encode_level)?
            } else {
                raw
            }
        };

        headers.push(("Content-Length".to_string(), body.len().to_string()));
        headers.push(("Content-Type".to_string(), options.content_type_header()));
        if !wire_encoding.is_empty() {
            headers.push(("Content-Encoding".to_string(), wire_encoding));
        }
        if options.encode_output && send_vary {
            headers.push(("Vary".to_string(), "Accept-Encoding".to_string()));
        }

        Ok(ServeResult {
            success: true,
            status_code: 200,
            content: body,
            headers,
        })
    }

    /// Direct-emission adapter: write the response (status line, headers,
    /// blank line, body) to `out`.
    ///
    /// Invalid requests and pipeline failures become minimal HTML error
    /// pages referencing the documentation URL; the underlying error is
    /// still returned so hosts and tests can observe it.
    pub fn serve_to(
        &self,
        out: &mut dyn Write,
        sources: &[Box<dyn Source>],
        options: &ServeOptions,
        request: &ClientRequest,
    ) -> Result<ServeResult, ServeError> {
        match self.serve(sources, options, request) {
            Ok(result) if !result.success => {
                write_error_page(out, &options.bad_request_header)?;
                Ok(result)
            }
            Ok(result) => {
                let status_line = match result.status_code {
                    304 => "HTTP/1.0 304 Not Modified",
                    _ => "HTTP/1.0 200 OK",
                };
                write!(out, "{status_line}\r\n")?;
                for (name, value) in &result.headers {
                    write!(out, "{name}: {value}\r\n")?;
                }
                write!(out, "\r\n")?;
                out.write_all(&result.content)?;
                Ok(result)
            }
            Err(e) => {
                if let Err(io_err) = write_error_page(out, &options.error_header) {
                    warn!("failed to write error page: {io_err}");
                }
                Err(e)
            }
        }
    }

    /// Combine and minify without serving: no cache, no encoding, no
    /// conditional negotiation. For build scripts and the CLI.
    pub fn combine(
        &self,
        sources: &[Box<dyn Source>],
        options: &ServeOptions,
    ) -> Result<String, ServeError> {
        let options = ServeOptions {
            encode_output: false,
            ..options.clone()
        };
        let uncached = Server {
            registry: self.registry,
            cache: None,
        };
        let result = uncached.serve(sources, &options, &ClientRequest::default())?;
        Ok(String::from_utf8_lossy(&result.content).into_owned())
    }

    /// Run the minify pipeline over the planned sources, logging failures
    /// before propagating them.
    fn run_pipeline(
        &self,
        sources: &[Box<dyn Source>],
        options: &ServeOptions,
    ) -> Result<String, ServeError> {
        let planned = plan_sources(sources, options);
        let postprocessor = match &options.postprocessor {
            Some(name) => Some(
                self.registry
                    .get_postprocessor(name)
                    .ok_or_else(|| ServeError::UnknownPostprocessor(name.clone()))?
                    .as_ref(),
            ),
            None => None,
        };
        let strip_default = options.concat_only && options.content_type == ContentType::Js;
        let default_options = options.default_minifier_options();
        let request = CombineRequest {
            content_type: options.content_type,
            default_minifier: if strip_default {
                None
            } else {
                options.default_minifier()
            },
            default_options: &default_options,
            bubble_css_imports: options.bubble_css_imports,
            import_warning: &options.import_warning,
            postprocessor,
        };
        pipeline::combine(self.registry, &planned, &request).map_err(|e| {
            error!("combine failed: {e}");
            ServeError::Pipeline(e)
        })
    }
}

/// Resolve the per-source minify plan from the request options.
///
/// Debug mode swaps every minifier for the line annotator; concat-only
/// strips JS minification and pins CSS to uncompressed pass-through; CSS
/// URI rewriting injects each file's directory as `currentDir` context for
/// the (external) CSS minifier.
fn plan_sources<'s>(sources: &'s [Box<dyn Source>], options: &ServeOptions) -> Vec<PlannedSource<'s>> {
    let mut planned: Vec<PlannedSource<'s>> = sources
        .iter()
        .map(|s| PlannedSource::from_source(s.as_ref()))
        .collect();

    if options.debug {
        for item in &mut planned {
            item.minifier = Some("lines".to_string());
            let id = item
                .source
                .file_path()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| item.source.id().to_string());
            let mut debug_options = MinifyOptions::new();
            debug_options.insert("id".to_string(), Value::String(id));
            item.minify_options = Some(debug_options);
        }
    }

    if options.concat_only {
        for item in &mut planned {
            match options.content_type {
                ContentType::Js => item.minifier = None,
                ContentType::Css => {
                    item.minifier = Some("identity".to_string());
                    item.minify_options
                        .get_or_insert_with(MinifyOptions::new)
                        .insert("compress".to_string(), Value::Bool(false));
                }
                ContentType::Html => {}
            }
        }
    }

    if options.content_type == ContentType::Css && options.rewrite_css_uris {
        for item in &mut planned {
            let has_dir_context = item.minify_options.as_ref().is_some_and(|o| {
                o.contains_key("currentDir") || o.contains_key("prependRelativePath")
            });
            if let (Some(path), false) = (item.source.file_path(), has_dir_context)
                && let Some(dir) = path.parent()
            {
                item.minify_options
                    .get_or_insert_with(MinifyOptions::new)
                    .insert(
                        "currentDir".to_string(),
                        Value::String(dir.to_string_lossy().into_owned()),
                    );
            }
        }
    }

    planned
}

/// Encoding choice: forced by options, or negotiated from the request.
/// Returns (encoding, wire `Content-Encoding` value, whether to send
/// `Vary: Accept-Encoding`). Forced encodings never add `Vary`.
fn resolve_encoding(options: &ServeOptions, request: &ClientRequest) -> (Encoding, String, bool) {
    if !options.encode_output {
        return (Encoding::Identity, String::new(), false);
    }
    if let Some(method) = &options.encode_method {
        return match method.as_str() {
            "gzip" | "x-gzip" => (Encoding::Gzip, method.clone(), false),
            _ => (Encoding::Identity, String::new(), false),
        };
    }
    let (enc, wire) = encoding::negotiate(
        request.accept_encoding.as_deref(),
        request.user_agent.as_deref(),
    );
    let send_vary = !encoding::is_buggy_ie(request.user_agent.as_deref());
    (enc, wire.to_string(), send_vary)
}

fn write_error_page(out: &mut dyn Write, status_line: &str) -> std::io::Result<()> {
    let reason = status_line.split_once(' ').map(|(_, r)| r).unwrap_or("Error");
    write!(
        out,
        "{status_line}\r\nContent-Type: text/html; charset=utf-8\r\n\r\n\
         <h1>{reason}</h1><p>Please see <a href=\"{URL_DEBUG}\">{URL_DEBUG}</a>.</p>"
    )
}
