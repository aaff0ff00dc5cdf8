//! Minifier capability trait and registry.
//!
//! The serve pipeline never calls a concrete compressor directly. Sources and
//! options carry a *registry name* (`"css"`, `"jsmin"`, …) and the
//! [`MinifierRegistry`] maps names to implementations. This keeps the cache
//! key a pure function of serializable data: two processes configured with
//! the same names derive the same key, no function pointers involved.
//!
//! Real compressors are registered by the embedding application. The crate
//! ships the two pass-throughs the pipeline itself needs:
//!
//! - `"identity"`: returns its input unchanged (concat-only CSS mode).
//! - `"lines"`: debug annotator — prefixes each line with its number and the
//!   source id, so combined debug output maps back to the original files.
//!
//! Options are a [`MinifyOptions`] map of JSON values. Equality is
//! structural, which the grouping pass relies on: two sources minified with
//! `{"compress": true}` built in different places still land in one group.

use crate::options::ContentType;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Options passed to a minifier invocation. Ordered map so serialized forms
/// (and therefore cache keys) are deterministic.
pub type MinifyOptions = BTreeMap<String, Value>;

#[derive(Error, Debug)]
pub enum MinifyError {
    /// An underlying minifier raised. The message is logged server-side and
    /// never leaks to the client.
    #[error("minifier failure: {0}")]
    Failed(String),
}

/// A single text-transform capability.
///
/// Implementations must be pure with respect to `(text, options)` — the
/// server cache assumes identical inputs produce identical outputs.
pub trait Minifier: Send + Sync {
    fn minify(&self, text: &str, options: &MinifyOptions) -> Result<String, MinifyError>;
}

/// Applied to the final combined text (URL rewriting, source-map comments).
/// The returned string replaces the text verbatim.
pub trait Postprocessor: Send + Sync {
    fn postprocess(&self, text: String, content_type: ContentType) -> String;
}

/// Pass-through minifier. Registered as `"identity"`.
pub struct IdentityMinifier;

impl Minifier for IdentityMinifier {
    fn minify(&self, text: &str, _options: &MinifyOptions) -> Result<String, MinifyError> {
        Ok(text.to_string())
    }
}

/// Debug line annotator. Registered as `"lines"`.
///
/// Output starts with a banner naming the source (the `id` option), then each
/// input line prefixed with its 1-based number in a block comment:
///
/// ```text
/// /* app.js */
/// /* 1 */ function a() {
/// /* 2 */ }
/// ```
///
/// Block comments are valid in both CSS and JS, so the annotated output still
/// parses. A `*/` inside the source text is left alone — debug output is for
/// eyeballs, not re-minification.
pub struct LinesMinifier;

impl Minifier for LinesMinifier {
    fn minify(&self, text: &str, options: &MinifyOptions) -> Result<String, MinifyError> {
        let id = options
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("(unknown source)");
        let line_count = text.lines().count();
        let width = line_count.max(1).to_string().len();
        let mut out = String::with_capacity(text.len() + line_count * (width + 8) + id.len() + 8);
        out.push_str(&format!("/* {} */\n", id));
        for (n, line) in text.lines().enumerate() {
            out.push_str(&format!("/* {:>width$} */ {}\n", n + 1, line));
        }
        Ok(out)
    }
}

/// Name → implementation registry for minifiers and postprocessors.
#[derive(Clone)]
pub struct MinifierRegistry {
    minifiers: HashMap<String, Arc<dyn Minifier>>,
    postprocessors: HashMap<String, Arc<dyn Postprocessor>>,
}

impl MinifierRegistry {
    /// Registry pre-populated with the built-in `"identity"` and `"lines"`
    /// pass-throughs.
    pub fn new() -> Self {
        let mut registry = Self {
            minifiers: HashMap::new(),
            postprocessors: HashMap::new(),
        };
        registry.register("identity", Arc::new(IdentityMinifier));
        registry.register("lines", Arc::new(LinesMinifier));
        registry
    }

    pub fn register(&mut self, name: &str, minifier: Arc<dyn Minifier>) {
        self.minifiers.insert(name.to_string(), minifier);
    }

    pub fn register_postprocessor(&mut self, name: &str, postprocessor: Arc<dyn Postprocessor>) {
        self.postprocessors.insert(name.to_string(), postprocessor);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Minifier>> {
        self.minifiers.get(name)
    }

    pub fn get_postprocessor(&self, name: &str) -> Option<&Arc<dyn Postprocessor>> {
        self.postprocessors.get(name)
    }
}

impl Default for MinifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Counting minifier that records every invocation. Used across the test
    /// suite to observe how often (and with what) the pipeline calls out.
    pub struct RecordingMinifier {
        pub calls: Mutex<Vec<(String, MinifyOptions)>>,
        pub wrap: &'static str,
    }

    impl RecordingMinifier {
        pub fn new(wrap: &'static str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                wrap,
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls(&self) -> Vec<(String, MinifyOptions)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Minifier for RecordingMinifier {
        fn minify(&self, text: &str, options: &MinifyOptions) -> Result<String, MinifyError> {
            self.calls
                .lock()
                .unwrap()
                .push((text.to_string(), options.clone()));
            Ok(format!("{}{}{}", self.wrap, text, self.wrap))
        }
    }

    /// Minifier that always fails, for error-path tests.
    pub struct FailingMinifier;

    impl Minifier for FailingMinifier {
        fn minify(&self, _text: &str, _options: &MinifyOptions) -> Result<String, MinifyError> {
            Err(MinifyError::Failed("regex engine exploded".to_string()))
        }
    }

    #[test]
    fn identity_returns_input() {
        let out = IdentityMinifier
            .minify("a { color: red }", &MinifyOptions::new())
            .unwrap();
        assert_eq!(out, "a { color: red }");
    }

    #[test]
    fn lines_annotates_each_line() {
        let mut options = MinifyOptions::new();
        options.insert("id".to_string(), Value::String("app.js".to_string()));
        let out = LinesMinifier
            .minify("var a = 1;\nvar b = 2;", &options)
            .unwrap();
        assert_eq!(out, "/* app.js */\n/* 1 */ var a = 1;\n/* 2 */ var b = 2;\n");
    }

    #[test]
    fn lines_pads_numbers_to_common_width() {
        let text = (0..12).map(|_| "x;").collect::<Vec<_>>().join("\n");
        let out = LinesMinifier.minify(&text, &MinifyOptions::new()).unwrap();
        assert!(out.contains("/*  1 */ x;"));
        assert!(out.contains("/* 12 */ x;"));
    }

    #[test]
    fn registry_resolves_builtins() {
        let registry = MinifierRegistry::new();
        assert!(registry.get("identity").is_some());
        assert!(registry.get("lines").is_some());
        assert!(registry.get("closure-compiler").is_none());
    }

    #[test]
    fn registry_custom_registration() {
        let mut registry = MinifierRegistry::new();
        registry.register("rec", Arc::new(RecordingMinifier::new("|")));
        let out = registry
            .get("rec")
            .unwrap()
            .minify("x", &MinifyOptions::new())
            .unwrap();
        assert_eq!(out, "|x|");
    }

    #[test]
    fn options_equality_is_structural() {
        let mut a = MinifyOptions::new();
        a.insert("compress".into(), Value::Bool(true));
        a.insert("level".into(), Value::from(3));
        let mut b = MinifyOptions::new();
        b.insert("level".into(), Value::from(3));
        b.insert("compress".into(), Value::Bool(true));
        assert_eq!(a, b);
    }
}
