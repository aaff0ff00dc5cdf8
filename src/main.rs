use clap::{Parser, Subcommand};
use combinify::cache::FileCache;
use combinify::minifier::MinifierRegistry;
use combinify::options::{ContentType, ServeOptions};
use combinify::serve::{ClientRequest, Server};
use combinify::source::{Source, resolve_files};
use combinify::{debug, key};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Shared flags for commands that read a group of source files.
#[derive(clap::Args, Clone)]
struct SourceArgs {
    /// Source files, combined in order
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Override the detected content type
    #[arg(long, value_parser = parse_content_type)]
    content_type: Option<ContentType>,
}

fn parse_content_type(value: &str) -> Result<ContentType, String> {
    ContentType::from_extension(value)
        .ok_or_else(|| format!("unknown content type {value:?} (expected css, js, or html)"))
}

#[derive(Parser)]
#[command(name = "combinify")]
#[command(about = "Combine, minify, and serve CSS/JS file groups")]
#[command(long_about = "\
Combine, minify, and serve CSS/JS file groups

A group of source files becomes one output: concatenated in order, minified
per the configured minifiers, CSS @imports hoisted when requested. The
`serve` command speaks HTTP/1.0 over stdin/stdout environment conventions
(CGI-style): it honors If-None-Match / If-Modified-Since with 304 responses,
negotiates gzip from Accept-Encoding, and keeps a server-side file cache
keyed by content-affecting options.

Debug output (line-annotated, uncached) is requested per-URL with a `debug`
query parameter, or site-wide with a `combinifyDebug` cookie holding
whitespace-separated URI wildcards.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Combine and minify files to stdout (or a file)
    Combine {
        #[command(flatten)]
        sources: SourceArgs,

        /// Concatenate only: skip JS minification, keep CSS uncompressed
        #[arg(long)]
        concat_only: bool,

        /// Hoist CSS @import statements to the top of the combined output
        #[arg(long)]
        bubble_css_imports: bool,

        /// Line-annotated debug output instead of minification
        #[arg(long)]
        debug: bool,

        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Print the server-side cache key for a file group
    CacheKey {
        #[command(flatten)]
        sources: SourceArgs,
    },
    /// Serve one CGI-style request: files from QUERY_STRING, headers from
    /// HTTP_* environment variables, response on stdout
    Serve {
        /// Directory requested paths are resolved against
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,

        /// Server-side cache directory (caching disabled when omitted)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Gzip compression level (0-9)
        #[arg(long, default_value_t = 9)]
        encode_level: u32,

        /// Client cache lifetime in seconds
        #[arg(long, default_value_t = 1800)]
        max_age: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Combine {
            sources,
            concat_only,
            bubble_css_imports,
            debug,
            output,
        } => {
            let (resolved, detected) = resolve_files(&sources.files)?;
            let options = ServeOptions {
                content_type: content_type_for(&sources, detected),
                concat_only,
                bubble_css_imports,
                debug,
                ..ServeOptions::default()
            };
            let registry = MinifierRegistry::new();
            let combined = Server::new(&registry).combine(&resolved, &options)?;
            match output {
                Some(path) => std::fs::write(path, combined)?,
                None => print!("{combined}"),
            }
        }
        Command::CacheKey { sources } => {
            let (resolved, detected) = resolve_files(&sources.files)?;
            let options = ServeOptions {
                content_type: content_type_for(&sources, detected),
                ..ServeOptions::default()
            };
            println!("{}", key::derive_key(&resolved, &options));
        }
        Command::Serve {
            base_dir,
            cache_dir,
            encode_level,
            max_age,
        } => {
            serve_cgi(&base_dir, cache_dir.as_deref(), encode_level, max_age)?;
        }
    }

    Ok(())
}

fn content_type_for(args: &SourceArgs, detected: Option<ContentType>) -> ContentType {
    args.content_type
        .or(detected)
        .unwrap_or(ContentType::Css)
}

/// Serve one request from CGI environment variables.
///
/// `QUERY_STRING` carries `f=` with a comma-separated file list; request
/// headers arrive as `HTTP_*` variables per the CGI spec. The full HTTP/1.0
/// response (status line, headers, body) goes to stdout.
fn serve_cgi(
    base_dir: &Path,
    cache_dir: Option<&Path>,
    encode_level: u32,
    max_age: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let env = |name: &str| std::env::var(name).ok();
    let query = env("QUERY_STRING");

    let request = ClientRequest {
        if_none_match: env("HTTP_IF_NONE_MATCH"),
        if_modified_since: env("HTTP_IF_MODIFIED_SINCE"),
        accept_encoding: env("HTTP_ACCEPT_ENCODING"),
        user_agent: env("HTTP_USER_AGENT"),
    };

    let registry = MinifierRegistry::new();
    let file_cache = match cache_dir {
        Some(dir) => Some(FileCache::new(dir)?),
        None => None,
    };
    let mut server = Server::new(&registry);
    if let Some(cache) = &file_cache {
        server = server.with_cache(cache);
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    // An unusable file list is the client's fault: emit the 400 page the
    // same way an empty source list would.
    let (sources, detected) = match requested_sources(query.as_deref(), base_dir) {
        Ok(resolved) => resolved,
        Err(reason) => {
            log::warn!("rejecting request: {reason}");
            (Vec::new(), None)
        }
    };

    let options = ServeOptions {
        content_type: detected.unwrap_or(ContentType::Css),
        encode_level,
        max_age,
        debug: debug::should_debug_request(
            query.as_deref(),
            env("HTTP_COOKIE").as_deref(),
            env("REQUEST_URI").as_deref().unwrap_or(""),
        ),
        ..ServeOptions::default()
    };

    server.serve_to(&mut out, &sources, &options, &request)?;
    out.flush()?;
    Ok(())
}

/// Resolve the `f=` file list from the query string against `base_dir`.
///
/// Paths must be relative, must not climb out of the base directory, and
/// must carry a recognized extension.
fn requested_sources(
    query: Option<&str>,
    base_dir: &Path,
) -> Result<(Vec<Box<dyn Source>>, Option<ContentType>), String> {
    let query = query.ok_or("no query string")?;
    let list = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("f="))
        .ok_or("no f= parameter")?;

    let mut paths = Vec::new();
    for name in list.split(',').filter(|n| !n.is_empty()) {
        let path = Path::new(name);
        if path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(format!("illegal path {name:?}"));
        }
        let recognized = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ContentType::from_extension)
            .is_some();
        if !recognized {
            return Err(format!("unrecognized extension in {name:?}"));
        }
        paths.push(base_dir.join(path));
    }
    if paths.is_empty() {
        return Err("empty f= parameter".to_string());
    }

    resolve_files(&paths).map_err(|e| e.to_string())
}
