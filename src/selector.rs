//! Selector normalization, pseudo-class aliases and `:any()` expansion

use crate::stream::{find_block, split_list, Pair};
use crate::types::MAX_SELECTOR_EXPANSION;
use indexmap::{IndexMap, IndexSet};

/// Built-in selector aliases available in every run
pub const BUILTIN_SELECTOR_ALIASES: &[(&str, &str)] = &[
    ("hocus", ":any(:hover,:focus)"),
    ("pocus", ":any(:hover,:focus,:active)"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub value: String,
    /// Whitespace-normalized lookup key
    pub readable: String,
}

impl Selector {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let readable = readable(&value);
        Self { value, readable }
    }

    /// Compact text used in minified output
    pub fn compact(&self) -> String {
        compact(&self.readable)
    }

    pub fn with_pseudo(&self, pseudo: &str) -> Self {
        Self::new(format!("{}{}", self.readable, pseudo))
    }
}

/// Collapse whitespace and put single spaces around top-level combinators
pub fn readable(selector: &str) -> String {
    let mut out = String::with_capacity(selector.len());
    let mut depth = 0i32;
    let mut pending_space = false;

    for c in selector.trim().chars() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth -= 1,
            _ => {}
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if depth == 0 && matches!(c, '>' | '+' | '~') {
            let trimmed = out.trim_end().len();
            out.truncate(trimmed);
            out.push(' ');
            out.push(c);
            out.push(' ');
            pending_space = false;
            continue;
        }
        if pending_space && !out.is_empty() && !out.ends_with(' ') && !out.ends_with('(') {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }
    out.trim().to_string()
}

/// Drop the spaces around top-level combinators and after commas
pub fn compact(readable: &str) -> String {
    let mut out = String::with_capacity(readable.len());
    let mut depth = 0i32;
    let chars: Vec<char> = readable.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth -= 1,
            _ => {}
        }
        if depth == 0 && matches!(c, '>' | '+' | '~' | ',') {
            let trimmed = out.trim_end().len();
            out.truncate(trimmed);
            out.push(c);
            i += 1;
            while i < chars.len() && chars[i] == ' ' {
                i += 1;
            }
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Replace `:name` pseudo-classes that have an alias with their expansion
pub fn apply_aliases(selector: &str, aliases: &IndexMap<String, String>) -> String {
    if aliases.is_empty() || !selector.contains(':') {
        return selector.to_string();
    }
    let mut out = String::with_capacity(selector.len());
    let bytes = selector.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let pseudo_element = bytes.get(i + 1) == Some(&b':')
            || i.checked_sub(1).map(|p| bytes[p]) == Some(b':');
        if bytes[i] == b':' && !pseudo_element {
            let start = i + 1;
            let end = start
                + bytes[start..]
                    .iter()
                    .take_while(|&&b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
                    .count();
            let followed_by_paren = bytes.get(end) == Some(&b'(');
            if end > start && !followed_by_paren {
                if let Some(expansion) = aliases.get(&selector[start..end]) {
                    out.push_str(expansion);
                    i = end;
                    continue;
                }
            }
        }
        let ch_len = selector[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&selector[i..i + ch_len]);
        i += ch_len;
    }
    out
}

/// Expand the first `:any(...)` group, recursively, into plain selectors
pub fn expand_any(selector: &str) -> Vec<String> {
    let lower = selector.to_ascii_lowercase();
    let Some(pos) = lower.find(":any(") else {
        return vec![selector.to_string()];
    };
    let Some(block) = find_block(selector, pos + 4, Pair::Parens) else {
        return vec![selector.to_string()];
    };
    let head = &selector[..pos];
    let tail = &selector[block.end..];
    let mut results: IndexSet<String> = IndexSet::new();
    for option in split_list(&selector[block.inner()]) {
        for expanded in expand_any(&format!("{}{}{}", head, option, tail)) {
            if results.len() >= MAX_SELECTOR_EXPANSION {
                log::warn!("Selector expansion of '{}' truncated", selector);
                return results.into_iter().collect();
            }
            results.insert(expanded);
        }
    }
    results.into_iter().collect()
}

/// Parse a selector list: apply aliases, expand `:any()`, de-duplicate by
/// readable value. At-rule headers such as `@font-face` are kept verbatim.
pub fn parse_list(text: &str, aliases: &IndexMap<String, String>) -> Vec<Selector> {
    let text = text.trim();
    if text.starts_with('@') {
        return vec![Selector::new(text)];
    }
    let mut seen: IndexSet<String> = IndexSet::new();
    let mut selectors = Vec::new();
    for item in split_list(text) {
        for expanded in expand_any(&apply_aliases(&item, aliases)) {
            let selector = Selector::new(expanded);
            if !selector.readable.is_empty() && seen.insert(selector.readable.clone()) {
                selectors.push(selector);
            }
        }
    }
    selectors
}

/// Combine every selector of `child` with every selector of `parent`;
/// `&` in the child marks where the parent goes. Each combined selector is
/// paired with the parent it was built from.
pub fn nest_pairs(parent: &str, child: &str) -> Vec<(String, String)> {
    let parents = split_list(parent);
    let mut out = Vec::new();
    for child in split_list(child) {
        for parent in &parents {
            let combined = if child.contains('&') {
                child.replace('&', parent)
            } else {
                format!("{} {}", parent, child)
            };
            out.push((combined, parent.clone()));
        }
    }
    out
}

pub fn nest(parent: &str, child: &str) -> String {
    nest_pairs(parent, child)
        .into_iter()
        .map(|(combined, _)| combined)
        .collect::<Vec<_>>()
        .join(", ")
}
