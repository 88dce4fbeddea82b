//! URL references captured from the source and path helpers

use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    /// Protocol-qualified (`http://`, `https://`) or protocol-relative (`//`)
    Absolute,
    /// Relative to the stylesheet location
    Relative,
    /// Rooted at the document root (`/path`)
    Rooted,
    /// Inline `data:` URI
    Data,
}

/// A captured `url(...)` or `@import` target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub value: String,
    pub kind: UrlKind,
    pub is_import: bool,
}

impl Url {
    /// Build from the raw text between the parentheses (or the import string)
    pub fn new(raw: &str, is_import: bool) -> Self {
        let value = unquote(raw.trim());
        let kind = classify(&value);
        Self {
            value,
            kind,
            is_import,
        }
    }

    /// Re-evaluate the kind after the value changed
    pub fn reclassify(&mut self) {
        self.value = unquote(self.value.trim());
        self.kind = classify(&self.value);
    }

    pub fn is_relative(&self) -> bool {
        self.kind == UrlKind::Relative
    }

    /// The path part of the value, without query string or fragment
    pub fn path_part(&self) -> &str {
        let end = self.value.find(['?', '#']).unwrap_or(self.value.len());
        &self.value[..end]
    }

    fn suffix_part(&self) -> &str {
        let end = self.value.find(['?', '#']).unwrap_or(self.value.len());
        &self.value[end..]
    }

    /// Make a relative URL written in `from_dir` valid when read from `to_dir`
    pub fn rebase(&mut self, from_dir: &Path, to_dir: &Path) {
        if !self.is_relative() || self.value.is_empty() {
            return;
        }
        let target = normalize_path(&from_dir.join(self.path_part()));
        let rebased = relative_path(&normalize_path(to_dir), &target);
        self.value = format!("{}{}", to_slash(&rebased), self.suffix_part());
        self.reclassify();
    }

    /// Make a relative URL written in `from_dir` rooted at `doc_root`
    pub fn root(&mut self, from_dir: &Path, doc_root: &Path) {
        if !self.is_relative() || self.value.is_empty() {
            return;
        }
        let target = normalize_path(&from_dir.join(self.path_part()));
        let rooted = relative_path(&normalize_path(doc_root), &target);
        self.value = format!("/{}{}", to_slash(&rooted), self.suffix_part());
        self.reclassify();
    }

    /// CSS text for this reference
    pub fn to_css(&self) -> String {
        let needs_quotes = self
            .value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '"' | ','));
        if needs_quotes {
            format!("url(\"{}\")", self.value.replace('"', "\\\""))
        } else {
            format!("url({})", self.value)
        }
    }
}

pub fn classify(value: &str) -> UrlKind {
    let lower = value.to_ascii_lowercase();
    if lower.starts_with("data:") {
        UrlKind::Data
    } else if lower.starts_with("//") || has_scheme(&lower) {
        UrlKind::Absolute
    } else if lower.starts_with('/') {
        UrlKind::Rooted
    } else {
        UrlKind::Relative
    }
}

fn has_scheme(value: &str) -> bool {
    match value.find(':') {
        Some(pos) if pos > 1 => value[..pos]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')),
        _ => false,
    }
}

/// Strip one level of matching quotes and unescape escaped quotes
pub fn unquote(raw: &str) -> String {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' || first == b'\'') && first == last {
            let inner = &raw[1..raw.len() - 1];
            return inner.replace(&format!("\\{}", first as char), &(first as char).to_string());
        }
    }
    raw.to_string()
}

/// Lexically resolve `.` and `..` components without touching the filesystem
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().map(|c| c.as_os_str()).collect()
}

/// Path of `target` relative to the directory `base`; both must be normalized
pub fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base: Vec<Component> = base.components().collect();
    let target: Vec<Component> = target.components().collect();
    let common = base
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut result = PathBuf::new();
    for _ in common..base.len() {
        result.push("..");
    }
    for component in &target[common..] {
        result.push(component.as_os_str());
    }
    result
}

pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
