//! Grouped minification pipeline.
//!
//! Combines an ordered list of sources into one output string. Neither naive
//! strategy works: minifying the full concatenation in one shot loses
//! per-source minifier/option overrides (and feeds CSS minifiers
//! pathologically large blobs — several upstream compressors have
//! regex-engine size limits), while minifying every source separately breaks
//! JS statement boundaries between files. So the pipeline walks the list
//! once, accumulating *maximal contiguous runs* of sources that share the
//! same effective minifier and options, and minifies each run as a unit.
//!
//! CSS is the exception: every CSS source is its own group even when
//! settings match, keeping each minifier invocation to a single file.
//!
//! Join separators are type-specific (see
//! [`ContentType::join_separator`]): `"\n;"` for JS so
//! automatic-semicolon-insertion edge cases at file boundaries can't merge
//! two statements, empty for CSS/HTML.
//!
//! After all groups are flushed, CSS output gets `@import` handling (bubble
//! or warn — imports below the first rule block are ignored by browsers),
//! and a configured postprocessor gets the final say.

use crate::minifier::{MinifierRegistry, MinifyOptions, Postprocessor};
use crate::options::ContentType;
use crate::source::{Source, SourceError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("source read failed: {0}")]
    Source(#[from] SourceError),
    /// A minifier raised. The name and original message are kept for the
    /// server log; clients only ever see a generic error status.
    #[error("minifier {name:?} failed: {message}")]
    Minifier { name: String, message: String },
    /// Options referenced a minifier nobody registered.
    #[error("unknown minifier {0:?}")]
    UnknownMinifier(String),
}

/// A source plus its per-source overrides as resolved by the orchestrator
/// (debug mode, concat-only mode, and CSS URI context all adjust these
/// without mutating the source itself).
pub struct PlannedSource<'a> {
    pub source: &'a dyn Source,
    /// Minifier registry name; `None` falls back to the request default.
    pub minifier: Option<String>,
    /// Options merged *over* the request defaults, override wins.
    pub minify_options: Option<MinifyOptions>,
}

impl<'a> PlannedSource<'a> {
    /// Plan a source with the overrides it carries itself.
    pub fn from_source(source: &'a dyn Source) -> Self {
        Self {
            minifier: source.minifier().map(str::to_string),
            minify_options: source.minify_options().cloned(),
            source,
        }
    }
}

/// Everything `combine` needs besides the sources.
pub struct CombineRequest<'a> {
    pub content_type: ContentType,
    /// Default minifier for sources without an override; `None` passes text
    /// through untouched.
    pub default_minifier: Option<&'a str>,
    pub default_options: &'a MinifyOptions,
    pub bubble_css_imports: bool,
    /// Warning comment for late CSS imports; empty disables the check.
    pub import_warning: &'a str,
    pub postprocessor: Option<&'a dyn Postprocessor>,
}

/// Combine and minify `planned` into a single output string.
pub fn combine(
    registry: &MinifierRegistry,
    planned: &[PlannedSource<'_>],
    request: &CombineRequest<'_>,
) -> Result<String, PipelineError> {
    let separator = request.content_type.join_separator();

    let mut outputs: Vec<String> = Vec::new();
    let mut group: Vec<String> = Vec::new();
    let mut group_minifier: Option<String> = None;
    let mut group_options = MinifyOptions::new();

    for item in planned {
        let minifier = item
            .minifier
            .as_deref()
            .or(request.default_minifier)
            .map(str::to_string);
        let options = merge_options(request.default_options, item.minify_options.as_ref());
        let body = item.source.content()?;

        // Flush the accumulated run when this source can't join it. CSS is
        // always flushed per source.
        let boundary = !group.is_empty()
            && (request.content_type == ContentType::Css
                || minifier != group_minifier
                || options != group_options);
        if boundary {
            outputs.push(flush_group(
                registry,
                &group.join(separator),
                group_minifier.as_deref(),
                &group_options,
            )?);
            group.clear();
        }

        group.push(body);
        group_minifier = minifier;
        group_options = options;
    }
    if !group.is_empty() {
        outputs.push(flush_group(
            registry,
            &group.join(separator),
            group_minifier.as_deref(),
            &group_options,
        )?);
    }

    let mut text = outputs.join(separator);

    if request.content_type == ContentType::Css && text.contains("@import") {
        text = handle_css_imports(&text, request.bubble_css_imports, request.import_warning);
    }

    if let Some(postprocessor) = request.postprocessor {
        text = postprocessor.postprocess(text, request.content_type);
    }

    Ok(text)
}

/// Minify one group's joined text, or pass it through when no minifier is
/// assigned.
fn flush_group(
    registry: &MinifierRegistry,
    joined: &str,
    minifier: Option<&str>,
    options: &MinifyOptions,
) -> Result<String, PipelineError> {
    let Some(name) = minifier else {
        return Ok(joined.to_string());
    };
    let implementation = registry
        .get(name)
        .ok_or_else(|| PipelineError::UnknownMinifier(name.to_string()))?;
    implementation
        .minify(joined, options)
        .map_err(|e| PipelineError::Minifier {
            name: name.to_string(),
            message: e.to_string(),
        })
}

/// Defaults merged with a per-source override map; override wins on
/// key collision.
fn merge_options(defaults: &MinifyOptions, overrides: Option<&MinifyOptions>) -> MinifyOptions {
    let mut merged = defaults.clone();
    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Bubble `@import`s to the top, or prepend a warning when one appears after
/// the first rule block.
fn handle_css_imports(css: &str, bubble: bool, warning: &str) -> String {
    if bubble {
        let (imports, rest) = extract_imports(css);
        let mut out = String::with_capacity(css.len());
        out.push_str(&imports);
        out.push_str(&rest);
        out
    } else if !warning.is_empty() {
        // Strip comments first so a `{` inside one isn't mistaken for a
        // rule block.
        let stripped = strip_block_comments(css);
        let warn = match (stripped.find('{'), stripped.rfind("@import")) {
            (Some(first_block), Some(last_import)) => first_block < last_import,
            _ => false,
        };
        if warn {
            format!("{warning}{css}")
        } else {
            css.to_string()
        }
    } else {
        css.to_string()
    }
}

/// Split CSS into its `@import … ;` statements (in original order) and the
/// remaining text with those statements removed. An import whose terminating
/// `;` sits on a later line is left in place, matching the single-line match
/// the original warning tooling used.
fn extract_imports(css: &str) -> (String, String) {
    let mut imports = String::new();
    let mut rest = String::new();
    let mut cursor = 0;
    while let Some(found) = css[cursor..].find("@import") {
        let start = cursor + found;
        let Some(semi) = css[start..].find(';') else {
            break;
        };
        let end = start + semi + 1;
        if css[start..end].contains('\n') {
            rest.push_str(&css[cursor..end]);
        } else {
            rest.push_str(&css[cursor..start]);
            imports.push_str(&css[start..end]);
        }
        cursor = end;
    }
    rest.push_str(&css[cursor..]);
    (imports, rest)
}

/// Remove `/* … */` spans. An unterminated comment swallows the tail, which
/// is how browsers treat it too.
fn strip_block_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minifier::tests::{FailingMinifier, RecordingMinifier};
    use crate::source::MemorySource;
    use serde_json::Value;
    use std::sync::Arc;

    fn plain_request(content_type: ContentType) -> CombineRequest<'static> {
        static EMPTY: MinifyOptions = MinifyOptions::new();
        CombineRequest {
            content_type,
            default_minifier: None,
            default_options: &EMPTY,
            bubble_css_imports: false,
            import_warning: "",
            postprocessor: None,
        }
    }

    fn combine_sources(
        registry: &MinifierRegistry,
        sources: &[MemorySource],
        request: &CombineRequest<'_>,
    ) -> Result<String, PipelineError> {
        let planned: Vec<PlannedSource<'_>> = sources
            .iter()
            .map(|s| PlannedSource::from_source(s))
            .collect();
        combine(registry, &planned, request)
    }

    // =========================================================================
    // Grouping
    // =========================================================================

    #[test]
    fn js_sources_with_same_settings_form_one_group() {
        let registry = {
            let mut r = MinifierRegistry::new();
            r.register("rec", Arc::new(RecordingMinifier::new("|")));
            r
        };
        let sources = [
            MemorySource::new("a.js", "var a = 1;"),
            MemorySource::new("b.js", "var b = 2;"),
        ];
        let mut request = plain_request(ContentType::Js);
        request.default_minifier = Some("rec");

        let out = combine_sources(&registry, &sources, &request).unwrap();
        assert_eq!(out, "|var a = 1;\n;var b = 2;|");
    }

    #[test]
    fn minifier_change_splits_groups() {
        let shared = Arc::new(RecordingMinifier::new(""));
        let other = Arc::new(RecordingMinifier::new(""));
        let mut registry = MinifierRegistry::new();
        registry.register("x", shared.clone());
        registry.register("y", other.clone());

        // [A(min=X), B(min=X), C(min=Y)] → X called once on join(A,B),
        // Y called once on C.
        let sources = [
            MemorySource::new("a.js", "A"),
            MemorySource::new("b.js", "B"),
            MemorySource::new("c.js", "C").with_minifier("y"),
        ];
        let mut request = plain_request(ContentType::Js);
        request.default_minifier = Some("x");

        combine_sources(&registry, &sources, &request).unwrap();

        assert_eq!(shared.calls().len(), 1);
        assert_eq!(shared.calls()[0].0, "A\n;B");
        assert_eq!(other.calls().len(), 1);
        assert_eq!(other.calls()[0].0, "C");
    }

    #[test]
    fn options_change_splits_groups() {
        let rec = Arc::new(RecordingMinifier::new(""));
        let mut registry = MinifierRegistry::new();
        registry.register("rec", rec.clone());

        let mut level_opts = MinifyOptions::new();
        level_opts.insert("level".to_string(), Value::from(2));
        let sources = [
            MemorySource::new("a.js", "A"),
            MemorySource::new("b.js", "B").with_minify_options(level_opts),
        ];
        let mut request = plain_request(ContentType::Js);
        request.default_minifier = Some("rec");

        combine_sources(&registry, &sources, &request).unwrap();
        assert_eq!(rec.call_count(), 2);
    }

    #[test]
    fn structurally_equal_override_does_not_split() {
        let rec = Arc::new(RecordingMinifier::new(""));
        let mut registry = MinifierRegistry::new();
        registry.register("rec", rec.clone());

        // Source B restates the default option with an identical value: the
        // merged maps compare equal, so A and B stay one group.
        let mut defaults = MinifyOptions::new();
        defaults.insert("compress".to_string(), Value::Bool(true));
        let mut restated = MinifyOptions::new();
        restated.insert("compress".to_string(), Value::Bool(true));

        let sources = [
            MemorySource::new("a.js", "A"),
            MemorySource::new("b.js", "B").with_minify_options(restated),
        ];
        let request = CombineRequest {
            content_type: ContentType::Js,
            default_minifier: Some("rec"),
            default_options: &defaults,
            bubble_css_imports: false,
            import_warning: "",
            postprocessor: None,
        };

        combine_sources(&registry, &sources, &request).unwrap();
        assert_eq!(rec.call_count(), 1);
    }

    #[test]
    fn css_always_minified_per_source() {
        let rec = Arc::new(RecordingMinifier::new(""));
        let mut registry = MinifierRegistry::new();
        registry.register("rec", rec.clone());

        let sources = [
            MemorySource::new("a.css", "a{}"),
            MemorySource::new("b.css", "b{}"),
            MemorySource::new("c.css", "c{}"),
        ];
        let mut request = plain_request(ContentType::Css);
        request.default_minifier = Some("rec");

        combine_sources(&registry, &sources, &request).unwrap();
        assert_eq!(rec.call_count(), 3);
        for (text, _) in rec.calls() {
            assert!(text.len() <= 3); // one file per invocation
        }
    }

    #[test]
    fn no_minifier_passes_text_through() {
        let registry = MinifierRegistry::new();
        let sources = [
            MemorySource::new("a.js", "var a;"),
            MemorySource::new("b.js", "var b;"),
        ];
        let out = combine_sources(&registry, &sources, &plain_request(ContentType::Js)).unwrap();
        assert_eq!(out, "var a;\n;var b;");
    }

    #[test]
    fn css_concatenates_without_separator() {
        let registry = MinifierRegistry::new();
        let sources = [
            MemorySource::new("a.css", "a{}"),
            MemorySource::new("b.css", "b{}"),
        ];
        let out = combine_sources(&registry, &sources, &plain_request(ContentType::Css)).unwrap();
        assert_eq!(out, "a{}b{}");
    }

    // =========================================================================
    // Errors
    // =========================================================================

    #[test]
    fn minifier_failure_is_wrapped_with_name() {
        let mut registry = MinifierRegistry::new();
        registry.register("broken", Arc::new(FailingMinifier));
        let sources = [MemorySource::new("a.js", "x")];
        let mut request = plain_request(ContentType::Js);
        request.default_minifier = Some("broken");

        let err = combine_sources(&registry, &sources, &request).unwrap_err();
        match err {
            PipelineError::Minifier { name, message } => {
                assert_eq!(name, "broken");
                assert!(message.contains("regex engine exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_minifier_is_reported() {
        let registry = MinifierRegistry::new();
        let sources = [MemorySource::new("a.js", "x").with_minifier("nope")];
        let err = combine_sources(&registry, &sources, &plain_request(ContentType::Js)).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownMinifier(name) if name == "nope"));
    }

    // =========================================================================
    // CSS @import handling
    // =========================================================================

    #[test]
    fn bubble_moves_imports_to_front() {
        let out = handle_css_imports("body{color:red} @import 'x.css';", true, "");
        assert_eq!(out, "@import 'x.css';body{color:red} ");
    }

    #[test]
    fn bubble_preserves_import_order() {
        let out = handle_css_imports("a{} @import 'one.css'; b{} @import 'two.css';", true, "");
        assert_eq!(out, "@import 'one.css';@import 'two.css';a{} b{} ");
    }

    #[test]
    fn warning_prepended_when_block_precedes_import() {
        let warning = "/* late imports are ignored */\n";
        let out = handle_css_imports("body{color:red} @import 'x.css';", false, warning);
        assert!(out.starts_with(warning));
        assert!(out.ends_with("@import 'x.css';"));
    }

    #[test]
    fn no_warning_when_imports_lead() {
        let out = handle_css_imports("@import 'x.css'; body{}", false, "/* warn */\n");
        assert_eq!(out, "@import 'x.css'; body{}");
    }

    #[test]
    fn brace_inside_comment_does_not_trigger_warning() {
        let css = "/* a { fake block } */ @import 'x.css'; body{}";
        let out = handle_css_imports(css, false, "/* warn */\n");
        assert_eq!(out, css);
    }

    #[test]
    fn empty_warning_disables_check() {
        let css = "body{} @import 'x.css';";
        assert_eq!(handle_css_imports(css, false, ""), css);
    }

    #[test]
    fn import_handling_skipped_without_import_token() {
        let registry = MinifierRegistry::new();
        let sources = [MemorySource::new("a.css", "body{color:red}")];
        let mut request = plain_request(ContentType::Css);
        request.bubble_css_imports = true;
        let out = combine_sources(&registry, &sources, &request).unwrap();
        assert_eq!(out, "body{color:red}");
    }

    // =========================================================================
    // Postprocessing
    // =========================================================================

    struct Uppercase;

    impl Postprocessor for Uppercase {
        fn postprocess(&self, text: String, _content_type: ContentType) -> String {
            text.to_uppercase()
        }
    }

    #[test]
    fn postprocessor_replaces_final_text() {
        let registry = MinifierRegistry::new();
        let sources = [MemorySource::new("a.css", "body{}")];
        let mut request = plain_request(ContentType::Css);
        request.postprocessor = Some(&Uppercase);
        let out = combine_sources(&registry, &sources, &request).unwrap();
        assert_eq!(out, "BODY{}");
    }

    // =========================================================================
    // Comment stripping
    // =========================================================================

    #[test]
    fn strip_block_comments_basic() {
        assert_eq!(strip_block_comments("a /* b */ c"), "a  c");
        assert_eq!(strip_block_comments("/* x *//* y */z"), "z");
        assert_eq!(strip_block_comments("plain"), "plain");
    }

    #[test]
    fn strip_block_comments_unterminated() {
        assert_eq!(strip_block_comments("a /* never ends"), "a ");
    }
}
