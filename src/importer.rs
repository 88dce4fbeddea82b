//! Import flattening: inlines `@import`ed files into one stream

use crate::error::{line_and_column, CrushError, Diagnostic, Location};
use crate::process::Process;
use crate::stream::{check_balance, Imbalance, Pair};
use crate::tokens::{OffsetMap, TokenKind, TokenTable, Trace, URL_RE};
use crate::types::{RewriteUrls, MAX_IMPORT_DEPTH, MAX_LOOP_ITERATIONS};
use crate::url::{normalize_path, relative_path, to_slash, UrlKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

static IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@import\s*(\?u\d+\?)\s*([^;{}]*);").unwrap());

const CAPTURED_KINDS: &[TokenKind] = &[TokenKind::Comment, TokenKind::String, TokenKind::Url];

/// One successfully inlined file
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRecord {
    pub url: String,
    pub media: Option<String>,
    pub path: PathBuf,
    pub mtime: u64,
    pub content: String,
}

/// Recursive import resolver for one run
pub struct Importer<'p, 'c> {
    process: &'p mut Process<'c>,
    /// Files currently being inlined, host first
    chain: Vec<PathBuf>,
    host_dir: PathBuf,
}

impl<'p, 'c> Importer<'p, 'c> {
    pub fn new(process: &'p mut Process<'c>, host_dir: &Path) -> Self {
        Self {
            process,
            chain: Vec::new(),
            host_dir: normalize_path(host_dir),
        }
    }

    /// Flatten the host source. Returns `None` when the host itself is
    /// structurally broken, which is recorded as an error.
    pub fn flatten(&mut self, source: &str, name: &str, path: Option<&Path>) -> Option<String> {
        if let Some(path) = path {
            self.chain.push(normalize_path(path));
        }
        let host_dir = self.host_dir.clone();
        let flattened = self.process_file(source, name, &host_dir, 0, true);
        self.chain.clear();
        flattened
    }

    fn process_file(
        &mut self,
        raw: &str,
        name: &str,
        dir: &Path,
        depth: usize,
        is_host: bool,
    ) -> Option<String> {
        let text = normalize_source(raw);

        if let Some(location) = precheck(&text, name) {
            let message = format!("Unbalanced brackets in {}", name);
            if is_host {
                self.process.report(Diagnostic::error(message).at(location));
            } else {
                self.process
                    .report(Diagnostic::warning(format!("{}; import skipped", message)).at(location));
            }
            return None;
        }

        let source_index = self.process.sources.len();
        self.process.sources.push(name.to_string());

        let captured = self.process.tokens.capture(&text, CAPTURED_KINDS);
        let mut stream = captured.text;
        if self.process.options.source_map {
            stream = insert_traces(
                &stream,
                &captured.offsets,
                &text,
                source_index,
                &mut self.process.tokens,
            );
        }
        if !is_host {
            self.rewrite_urls(&stream, dir);
        }

        log::debug!("Resolving imports in {} (depth {})", name, depth);
        Some(self.resolve_imports(stream, dir, depth))
    }

    fn rewrite_urls(&mut self, stream: &str, dir: &Path) {
        let mode = self.process.options.rewrite_import_urls;
        let doc_root = self.process.options.doc_root.clone();
        for found in URL_RE.find_iter(stream) {
            let Some(url) = self.process.tokens.url_mut(found.as_str()) else {
                continue;
            };
            if url.is_import {
                continue;
            }
            match (mode, &doc_root) {
                (RewriteUrls::Relative, _) => url.rebase(dir, &self.host_dir),
                (RewriteUrls::Absolute, Some(root)) => url.root(dir, root),
                (RewriteUrls::Absolute, None) | (RewriteUrls::Off, _) => {}
            }
        }
    }

    fn resolve_imports(&mut self, mut stream: String, dir: &Path, depth: usize) -> String {
        let mut offset = 0;
        for _ in 0..MAX_LOOP_ITERATIONS {
            let Some(caps) = IMPORT_RE.captures_at(&stream, offset) else {
                return stream;
            };
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let label = caps[1].to_string();
            let media = caps[2].trim().to_string();
            drop(caps);

            let Some(url) = self.process.tokens.url(&label).cloned() else {
                offset = whole.end;
                continue;
            };
            let path = match url.kind {
                UrlKind::Absolute | UrlKind::Data => {
                    offset = whole.end;
                    continue;
                }
                UrlKind::Relative => dir.join(url.path_part()),
                UrlKind::Rooted => match &self.process.options.doc_root {
                    Some(root) => root.join(url.path_part().trim_start_matches('/')),
                    None => {
                        offset = whole.end;
                        continue;
                    }
                },
            };
            let path = normalize_path(&path);

            let replacement = self
                .inline(&url.value, &path, &media, depth)
                .unwrap_or_default();
            stream.replace_range(whole.clone(), &replacement);
            offset = whole.start + replacement.len();
        }
        log::warn!("Import resolution hit the iteration cap");
        stream
    }

    /// Read and flatten one imported file; `None` removes the statement
    fn inline(&mut self, url: &str, path: &Path, media: &str, depth: usize) -> Option<String> {
        let display = self.display_name(path);
        if self.chain.iter().any(|p| p == path) {
            self.process.report(
                CrushError::import(format!("Circular import of '{}' skipped", display)).into(),
            );
            return None;
        }
        if depth + 1 > MAX_IMPORT_DEPTH {
            log::warn!("Import of '{}' skipped", display);
            self.process.report(CrushError::limit("import depth", MAX_IMPORT_DEPTH).into());
            return None;
        }

        let fs = self.process.compiler.fs.clone();
        let raw = match fs.read(path) {
            Ok(raw) => raw,
            Err(e) => {
                self.process.report(
                    CrushError::import(format!("Import file '{}' not found: {}", display, e)).into(),
                );
                return None;
            }
        };
        let mtime = fs.mtime(path).unwrap_or(0);
        let file_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        self.chain.push(path.to_path_buf());
        let content = self.process_file(&raw, &display, &file_dir, depth + 1, false);
        self.chain.pop();
        let content = content?;

        log::debug!("Inlined import '{}' ({} bytes)", display, content.len());
        self.process.imports.push(ImportRecord {
            url: url.to_string(),
            media: (!media.is_empty()).then(|| media.to_string()),
            path: path.to_path_buf(),
            mtime,
            content: content.clone(),
        });

        Some(if media.is_empty() {
            content
        } else {
            format!("@media {}{{{}}}", media, content)
        })
    }

    fn display_name(&self, path: &Path) -> String {
        to_slash(&relative_path(&self.host_dir, path))
    }
}

/// Strip a byte-order mark and normalize line endings to `\n`
pub fn normalize_source(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

/// Location of the first unbalanced `{}` or `()` outside comments and strings
pub fn precheck(text: &str, name: &str) -> Option<Location> {
    let mut scratch = TokenTable::new();
    let captured = scratch.capture(text, CAPTURED_KINDS);
    let imbalance = check_balance(&captured.text, Pair::Braces)
        .or_else(|| check_balance(&captured.text, Pair::Parens))?;
    let offset = captured.offsets.to_source(imbalance.offset());
    let location = Location::from_offset(name, text, offset);
    match imbalance {
        Imbalance::UnexpectedClose(_) => log::warn!("Unexpected closing bracket at {}", location),
        Imbalance::Unclosed(_) => log::warn!("Unclosed bracket at {}", location),
    }
    Some(location)
}

/// Insert trace labels before each selector start, recording the original
/// 0-based line and column
fn insert_traces(
    stream: &str,
    offsets: &OffsetMap,
    original: &str,
    source: usize,
    tokens: &mut TokenTable,
) -> String {
    let bytes = stream.as_bytes();
    let mut starts: Vec<usize> = Vec::new();
    let candidates = std::iter::once(0).chain(
        bytes
            .iter()
            .enumerate()
            .filter(|(_, &b)| matches!(b, b';' | b'{' | b'}'))
            .map(|(i, _)| i + 1),
    );

    for candidate in candidates {
        let start = skip_trivia(stream, candidate);
        let next_delim = stream[start..].find([';', '{', '}']).map(|p| start + p);
        let is_selector = next_delim.map_or(false, |d| bytes[d] == b'{')
            && bytes.get(start).map_or(false, |&c| c != b'@');
        if is_selector && starts.last() != Some(&start) {
            starts.push(start);
        }
    }

    let mut out = String::with_capacity(stream.len() + starts.len() * 6);
    let mut last = 0;
    for start in starts {
        let (line, column) = line_and_column(original, offsets.to_source(start));
        let label = tokens.add_trace(Trace {
            source,
            line: line - 1,
            column: column - 1,
        });
        out.push_str(&stream[last..start]);
        out.push_str(&label);
        last = start;
    }
    out.push_str(&stream[last..]);
    out
}

/// Skip whitespace and comment labels
fn skip_trivia(stream: &str, mut at: usize) -> usize {
    loop {
        let rest = &stream[at..];
        let trimmed = rest.trim_start();
        at += rest.len() - trimmed.len();
        match crate::tokens::COMMENT_RE.find(trimmed) {
            Some(m) if m.start() == 0 => at += m.end(),
            _ => return at,
        }
    }
}

/// Flatten `source` into the process stream
pub fn flatten(process: &mut Process, source: &str, name: &str, path: Option<&Path>, dir: &Path) -> Option<String> {
    Importer::new(process, dir).flatten(source, name, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::filesystem::MemoryFs;
    use crate::types::Options;
    use std::sync::Arc;

    fn compiler_with(files: &[(&str, &str, u64)]) -> Compiler {
        let fs = MemoryFs::new();
        for (path, contents, mtime) in files {
            fs.insert(*path, *contents, *mtime);
        }
        Compiler::new().with_file_system(Arc::new(fs))
    }

    fn run<'c>(compiler: &'c Compiler, options: Options, source: &str) -> (Option<String>, Process<'c>) {
        let mut process = Process::new(compiler, options);
        let out = flatten(
            &mut process,
            source,
            "main.css",
            Some(Path::new("/site/css/main.css")),
            Path::new("/site/css"),
        );
        let restored = out.map(|s| process.tokens.restore(&s, CAPTURED_KINDS, false));
        (restored, process)
    }

    #[test]
    fn test_inlines_and_rebases_urls() {
        let compiler = compiler_with(&[(
            "/site/css/parts/a.css",
            ".a{background:url(img/a.png)}",
            7,
        )]);
        let (out, process) = run(&compiler, Options::default(), "@import \"parts/a.css\";\n.main{}");
        assert_eq!(out.unwrap(), ".a{background:url(parts/img/a.png)}\n.main{}");
        assert_eq!(process.imports.len(), 1);
        assert_eq!(process.imports[0].mtime, 7);
        assert_eq!(process.sources, vec!["main.css", "parts/a.css"]);
    }

    #[test]
    fn test_absolute_rewrite_mode() {
        let compiler = compiler_with(&[("/site/css/parts/a.css", ".a{background:url(img/a.png)}", 1)]);
        let options = Options {
            rewrite_import_urls: RewriteUrls::Absolute,
            doc_root: Some(PathBuf::from("/site")),
            ..Default::default()
        };
        let (out, _) = run(&compiler, options, "@import url(parts/a.css);");
        assert_eq!(out.unwrap(), ".a{background:url(/css/parts/img/a.png)}");
    }

    #[test]
    fn test_media_list_wraps_content() {
        let compiler = compiler_with(&[("/site/css/print.css", ".p{color:black}", 1)]);
        let (out, process) = run(&compiler, Options::default(), "@import 'print.css' print;");
        assert_eq!(out.unwrap(), "@media print{.p{color:black}}");
        assert_eq!(process.imports[0].media.as_deref(), Some("print"));
    }

    #[test]
    fn test_remote_imports_are_left_alone() {
        let compiler = compiler_with(&[]);
        let (out, process) = run(
            &compiler,
            Options::default(),
            "@import url(https://fonts.example.com/a.css);",
        );
        assert_eq!(out.unwrap(), "@import url(https://fonts.example.com/a.css);");
        assert!(process.diagnostics.is_empty());
    }

    #[test]
    fn test_missing_import_is_removed_with_warning() {
        let compiler = compiler_with(&[]);
        let (out, process) = run(&compiler, Options::default(), "@import 'nope.css';.a{}");
        assert_eq!(out.unwrap(), ".a{}");
        assert_eq!(process.diagnostics.len(), 1);
    }

    #[test]
    fn test_broken_nested_import_is_omitted() {
        let compiler = compiler_with(&[
            ("/site/css/a.css", "@import 'broken.css';.a{color:red}", 1),
            ("/site/css/broken.css", ".b{color:red", 2),
        ]);
        let (out, process) = run(&compiler, Options::default(), "@import 'a.css';");
        assert_eq!(out.unwrap(), ".a{color:red}");
        let paths: Vec<_> = process.imports.iter().map(|r| r.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/site/css/a.css")]);
        let warning = &process.diagnostics[0];
        assert_eq!(warning.location.as_ref().map(|l| (l.line, l.column)), Some((1, 3)));
    }

    #[test]
    fn test_circular_import_is_skipped() {
        let compiler = compiler_with(&[
            ("/site/css/a.css", "@import 'b.css';.a{}", 1),
            ("/site/css/b.css", "@import 'a.css';.b{}", 1),
        ]);
        let (out, process) = run(&compiler, Options::default(), "@import 'a.css';");
        assert_eq!(out.unwrap(), ".b{}.a{}");
        assert!(process.diagnostics[0].message.contains("Circular"));
    }

    #[test]
    fn test_unbalanced_host_fails() {
        let compiler = compiler_with(&[]);
        let (out, process) = run(&compiler, Options::default(), ".a{color:red;\n.b{}");
        assert!(out.is_none());
        assert_eq!(process.diagnostics[0].level, crate::error::Level::Error);
    }

    #[test]
    fn test_traces_mark_selectors_only() {
        let compiler = compiler_with(&[]);
        let options = Options {
            source_map: true,
            ..Default::default()
        };
        let mut process = Process::new(&compiler, options);
        let out = flatten(
            &mut process,
            "/* c */ .a{color:red}\n@media print{ .b{x:y} }",
            "main.css",
            None,
            Path::new("/site"),
        )
        .unwrap();
        assert_eq!(process.tokens.traces.len(), 2);
        let traces: Vec<_> = process.tokens.traces.values().map(|t| (t.line, t.column)).collect();
        assert_eq!(traces, vec![(0, 8), (1, 14)]);
        assert!(out.contains("?t2?.a{"));
    }

    #[test]
    fn test_normalize_source() {
        assert_eq!(normalize_source("\u{feff}a\r\nb\rc"), "a\nb\nc");
    }
}
