//! Placeholder tokens for comments, strings, URLs, rules and trace points
//!
//! Everything that later regex passes must not see is moved into a
//! [`TokenTable`] and replaced in the stream by a short label such as `?s3?`.
//! The `?` delimiter cannot occur in CSS outside the captured constructs, so
//! labels never collide with real stream content.

use crate::url::Url;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Matches any token label; group 1 is the kind tag, group 2 the counter
pub static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?([csurt])(\d+)\?").unwrap());

pub static TRACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?t\d+\?").unwrap());
pub static RULE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?r\d+\?").unwrap());
pub static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?u\d+\?").unwrap());
pub static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?c\d+\?").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Comment,
    String,
    Url,
    Rule,
    Trace,
}

impl TokenKind {
    pub fn tag(&self) -> char {
        match self {
            TokenKind::Comment => 'c',
            TokenKind::String => 's',
            TokenKind::Url => 'u',
            TokenKind::Rule => 'r',
            TokenKind::Trace => 't',
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "c" => Some(TokenKind::Comment),
            "s" => Some(TokenKind::String),
            "u" => Some(TokenKind::Url),
            "r" => Some(TokenKind::Rule),
            "t" => Some(TokenKind::Trace),
            _ => None,
        }
    }

    /// Kind of a complete label such as `?u12?`
    pub fn of_label(label: &str) -> Option<Self> {
        let caps = TOKEN_RE.captures(label)?;
        if caps.get(0)?.as_str().len() != label.len() {
            return None;
        }
        Self::from_tag(&caps[1])
    }
}

/// Original source position recorded for source maps (0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trace {
    pub source: usize,
    pub line: usize,
    pub column: usize,
}

/// Maps offsets in a captured stream back to offsets in the raw source
#[derive(Debug, Clone, Default)]
pub struct OffsetMap {
    anchors: Vec<(usize, usize)>,
}

impl OffsetMap {
    fn push(&mut self, stream_offset: usize, source_offset: usize) {
        self.anchors.push((stream_offset, source_offset));
    }

    /// Raw source offset of a stream offset; offsets inside a label map to
    /// the start of the captured construct
    pub fn to_source(&self, stream_offset: usize) -> usize {
        let index = self.anchors.partition_point(|&(s, _)| s <= stream_offset);
        match index.checked_sub(1).and_then(|i| self.anchors.get(i)) {
            Some(&(s, r)) => r + (stream_offset - s),
            None => stream_offset,
        }
    }
}

/// Result of a capture pass
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub text: String,
    pub offsets: OffsetMap,
}

/// Per-run table of captured values, keyed by label
#[derive(Debug, Default)]
pub struct TokenTable {
    counter: usize,
    pub comments: IndexMap<String, String>,
    pub strings: IndexMap<String, String>,
    pub urls: IndexMap<String, Url>,
    pub traces: IndexMap<String, Trace>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh, run-unique label for `kind`
    pub fn label(&mut self, kind: TokenKind) -> String {
        self.counter += 1;
        format!("?{}{}?", kind.tag(), self.counter)
    }

    pub fn add_comment(&mut self, text: impl Into<String>) -> String {
        let label = self.label(TokenKind::Comment);
        self.comments.insert(label.clone(), text.into());
        label
    }

    pub fn add_string(&mut self, text: impl Into<String>) -> String {
        let label = self.label(TokenKind::String);
        self.strings.insert(label.clone(), text.into());
        label
    }

    pub fn add_url(&mut self, url: Url) -> String {
        let label = self.label(TokenKind::Url);
        self.urls.insert(label.clone(), url);
        label
    }

    pub fn add_trace(&mut self, trace: Trace) -> String {
        let label = self.label(TokenKind::Trace);
        self.traces.insert(label.clone(), trace);
        label
    }

    pub fn url(&self, label: &str) -> Option<&Url> {
        self.urls.get(label)
    }

    pub fn url_mut(&mut self, label: &str) -> Option<&mut Url> {
        self.urls.get_mut(label)
    }

    /// Replace comments, strings and URL references with labels, in
    /// document order. Only the kinds listed in `kinds` are captured.
    pub fn capture(&mut self, source: &str, kinds: &[TokenKind]) -> Captured {
        let comments = kinds.contains(&TokenKind::Comment);
        let strings = kinds.contains(&TokenKind::String);
        let urls = kinds.contains(&TokenKind::Url);

        let bytes = source.as_bytes();
        let mut out = String::with_capacity(source.len());
        let mut offsets = OffsetMap::default();
        offsets.push(0, 0);
        let mut last = 0;
        let mut i = 0;

        while i < bytes.len() {
            let b = bytes[i];
            let (end, label) = if comments && b == b'/' && bytes.get(i + 1) == Some(&b'*') {
                let end = source[i + 2..]
                    .find("*/")
                    .map(|p| i + 2 + p + 2)
                    .unwrap_or(bytes.len());
                out.push_str(&source[last..i]);
                (end, self.add_comment(&source[i..end]))
            } else if (strings || urls) && (b == b'"' || b == b'\'') {
                let end = scan_string(bytes, i);
                out.push_str(&source[last..i]);
                let raw = &source[i..end];
                let label = if urls && follows_import(&out) {
                    self.add_url(Url::new(raw, true))
                } else if strings {
                    self.add_string(raw)
                } else {
                    i = end;
                    out.push_str(raw);
                    last = end;
                    continue;
                };
                (end, label)
            } else if urls && (b == b'u' || b == b'U') && starts_url(bytes, i) {
                let end = scan_url(bytes, i + 4);
                out.push_str(&source[last..i]);
                let inner_end = if bytes.get(end - 1) == Some(&b')') { end - 1 } else { end };
                let is_import = follows_import(&out);
                (end, self.add_url(Url::new(&source[i + 4..inner_end], is_import)))
            } else {
                i += 1;
                continue;
            };

            out.push_str(&label);
            offsets.push(out.len(), end);
            i = end;
            last = end;
        }
        out.push_str(&source[last..]);

        Captured { text: out, offsets }
    }

    /// Reinsert captured values for the listed kinds.
    ///
    /// Plain comments restore to nothing; only preserved `/*! */` comments
    /// survive. With `release`, restored values are dropped from the table.
    pub fn restore(&mut self, text: &str, kinds: &[TokenKind], release: bool) -> String {
        let mut released: Vec<String> = Vec::new();
        let restored = TOKEN_RE.replace_all(text, |caps: &Captures| {
            let label = &caps[0];
            let Some(kind) = TokenKind::from_tag(&caps[1]) else {
                return label.to_string();
            };
            if !kinds.contains(&kind) {
                return label.to_string();
            }
            let value = match kind {
                TokenKind::Comment => self.comments.get(label).map(|c| {
                    if c.starts_with("/*!") {
                        c.clone()
                    } else {
                        String::new()
                    }
                }),
                TokenKind::String => self.strings.get(label).cloned(),
                TokenKind::Url => self.urls.get(label).map(Url::to_css),
                TokenKind::Trace => Some(String::new()),
                TokenKind::Rule => None,
            };
            match value {
                Some(value) => {
                    if release {
                        released.push(label.to_string());
                    }
                    value
                }
                None => label.to_string(),
            }
        });
        let restored = restored.into_owned();
        for label in released {
            self.comments.shift_remove(&label);
            self.strings.shift_remove(&label);
            self.urls.shift_remove(&label);
        }
        restored
    }

    /// Value of a string token without its quotes
    pub fn string_value(&self, label: &str) -> Option<String> {
        self.strings.get(label).map(|s| crate::url::unquote(s))
    }
}

fn scan_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn starts_url(bytes: &[u8], i: usize) -> bool {
    let Some(head) = bytes.get(i..i + 4) else {
        return false;
    };
    if !head.eq_ignore_ascii_case(b"url(") {
        return false;
    }
    match i.checked_sub(1).map(|p| bytes[p]) {
        Some(prev) => !(prev.is_ascii_alphanumeric() || prev == b'-' || prev == b'_'),
        None => true,
    }
}

/// Offset one past the `)` closing a `url(` whose content starts at `start`;
/// nested parentheses (variable references) are skipped
fn scan_url(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    let mut depth = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = scan_string(bytes, i),
            b'\\' => i += 2,
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' if depth > 0 => {
                depth -= 1;
                i += 1;
            }
            b')' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn follows_import(out: &str) -> bool {
    let trimmed = out.trim_end();
    trimmed
        .len()
        .checked_sub(7)
        .and_then(|start| trimmed.get(start..))
        .map_or(false, |tail| tail.eq_ignore_ascii_case("@import"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::UrlKind;

    const ALL: &[TokenKind] = &[TokenKind::Comment, TokenKind::String, TokenKind::Url];

    #[test]
    fn test_capture_in_document_order() {
        let mut table = TokenTable::new();
        let captured = table.capture(
            r#"/* a */ .x { content: "}"; background: url(img/a.png) }"#,
            ALL,
        );
        assert_eq!(captured.text, "?c1? .x { content: ?s2?; background: ?u3? }");
        assert_eq!(table.strings["?s2?"], "\"}\"");
        assert_eq!(table.urls["?u3?"].value, "img/a.png");
    }

    #[test]
    fn test_comment_inside_string_is_not_a_comment() {
        let mut table = TokenTable::new();
        let captured = table.capture(r#"a { content: "/* not */" }"#, ALL);
        assert_eq!(captured.text, "a { content: ?s1? }");
        assert!(table.comments.is_empty());
    }

    #[test]
    fn test_import_targets_become_urls() {
        let mut table = TokenTable::new();
        let captured = table.capture("@import \"a.css\" screen;\n@import url('b.css');", ALL);
        assert_eq!(captured.text, "@import ?u1? screen;\n@import ?u2?;");
        assert!(table.urls["?u1?"].is_import);
        assert_eq!(table.urls["?u2?"].value, "b.css");
        assert_eq!(table.urls["?u2?"].kind, UrlKind::Relative);
    }

    #[test]
    fn test_restore_drops_plain_comments_and_keeps_preserved() {
        let mut table = TokenTable::new();
        let captured = table.capture("/* gone */a{}/*! kept */", ALL);
        let restored = table.restore(&captured.text, ALL, true);
        assert_eq!(restored, "a{}/*! kept */");
        assert!(table.comments.is_empty());
    }

    #[test]
    fn test_restore_round_trip() {
        let mut table = TokenTable::new();
        let source = r#"a { font-family: "Helvetica Neue", 'Arial'; background: url("a b.png") }"#;
        let captured = table.capture(source, ALL);
        let restored = table.restore(&captured.text, ALL, false);
        assert_eq!(
            restored,
            r#"a { font-family: "Helvetica Neue", 'Arial'; background: url("a b.png") }"#
        );
    }

    #[test]
    fn test_offset_map() {
        let mut table = TokenTable::new();
        let source = "/* long comment */\n.a{}";
        let captured = table.capture(source, ALL);
        let stream_offset = captured.text.find(".a").unwrap();
        assert_eq!(captured.offsets.to_source(stream_offset), source.find(".a").unwrap());
    }

    #[test]
    fn test_label_kind() {
        assert_eq!(TokenKind::of_label("?u12?"), Some(TokenKind::Url));
        assert_eq!(TokenKind::of_label("?u12? "), None);
        assert_eq!(TokenKind::of_label("plain"), None);
    }

    #[test]
    fn test_url_with_variable_reference() {
        let mut table = TokenTable::new();
        let captured = table.capture("a{b:url($(dir)/a.png) c}", ALL);
        assert_eq!(captured.text, "a{b:?u1? c}");
        assert_eq!(table.urls["?u1?"].value, "$(dir)/a.png");
    }

    #[test]
    fn test_vendor_url_function_is_not_a_url() {
        let mut table = TokenTable::new();
        let captured = table.capture("a{b:-x-url(foo)}", ALL);
        assert_eq!(captured.text, "a{b:-x-url(foo)}");
    }
}
