//! The mutable working buffer and nesting-safe bracket matching

use crate::types::MAX_LOOP_ITERATIONS;
use regex::{Captures, Regex};
use std::ops::Range;

/// Bracket pairs understood by the balanced matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pair {
    Braces,
    Parens,
}

impl Pair {
    pub fn open(&self) -> u8 {
        match self {
            Pair::Braces => b'{',
            Pair::Parens => b'(',
        }
    }

    pub fn close(&self) -> u8 {
        match self {
            Pair::Braces => b'}',
            Pair::Parens => b')',
        }
    }
}

/// A matched bracket span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Offset of the opening bracket
    pub open: usize,
    /// Offset one past the closing bracket
    pub end: usize,
}

impl Block {
    /// Range of the content between the brackets
    pub fn inner(&self) -> Range<usize> {
        self.open + 1..self.end - 1
    }

    pub fn outer(&self) -> Range<usize> {
        self.open..self.end
    }
}

/// Find the first `pair` opener at or after `offset` and its matching closer.
///
/// Returns `None` when there is no opener, or when the opener is never closed;
/// the latter is logged as a warning.
pub fn find_block(text: &str, offset: usize, pair: Pair) -> Option<Block> {
    let bytes = text.as_bytes();
    let open_at = offset + bytes.get(offset..)?.iter().position(|&b| b == pair.open())?;
    match_from(bytes, open_at, pair)
}

/// Match the bracket at `open_at`, which must be an opener
pub fn match_from(bytes: &[u8], open_at: usize, pair: Pair) -> Option<Block> {
    if bytes.get(open_at) != Some(&pair.open()) {
        return None;
    }
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open_at) {
        if b == pair.open() {
            depth += 1;
        } else if b == pair.close() {
            depth -= 1;
            if depth == 0 {
                return Some(Block {
                    open: open_at,
                    end: i + 1,
                });
            }
        }
    }
    log::warn!(
        "Unmatched '{}' at offset {}",
        pair.open() as char,
        open_at
    );
    None
}

/// Where a bracket count goes wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imbalance {
    /// A closer with no opener before it
    UnexpectedClose(usize),
    /// An opener that is never closed
    Unclosed(usize),
}

impl Imbalance {
    pub fn offset(&self) -> usize {
        match self {
            Imbalance::UnexpectedClose(offset) | Imbalance::Unclosed(offset) => *offset,
        }
    }
}

/// Check that every opener of `pair` has a matching closer, in order
pub fn check_balance(text: &str, pair: Pair) -> Option<Imbalance> {
    let mut openers: Vec<usize> = Vec::new();
    for (i, &b) in text.as_bytes().iter().enumerate() {
        if b == pair.open() {
            openers.push(i);
        } else if b == pair.close() && openers.pop().is_none() {
            return Some(Imbalance::UnexpectedClose(i));
        }
    }
    openers.first().map(|&offset| Imbalance::Unclosed(offset))
}

/// Split on `separator` where it is not nested inside brackets
pub fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ if c == separator && depth <= 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Split into trimmed, non-empty top-level comma separated items
pub fn split_list(text: &str) -> Vec<String> {
    split_top_level(text, ',')
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Mutable text buffer threaded through the pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stream {
    raw: String,
}

impl Stream {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn into_string(self) -> String {
        self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn slice(&self, range: Range<usize>) -> &str {
        &self.raw[range]
    }

    /// Replace `range` with `replacement`
    pub fn splice(&mut self, range: Range<usize>, replacement: &str) {
        self.raw.replace_range(range, replacement);
    }

    pub fn set(&mut self, raw: impl Into<String>) {
        self.raw = raw.into();
    }

    pub fn find_block(&self, offset: usize, pair: Pair) -> Option<Block> {
        find_block(&self.raw, offset, pair)
    }

    pub fn replace_all(&mut self, pattern: &Regex, replacement: &str) {
        if let std::borrow::Cow::Owned(s) = pattern.replace_all(&self.raw, replacement) {
            self.raw = s;
        }
    }

    pub fn replace_with<F>(&mut self, pattern: &Regex, mut replacer: F)
    where
        F: FnMut(&Captures) -> String,
    {
        if let std::borrow::Cow::Owned(s) =
            pattern.replace_all(&self.raw, |caps: &Captures| replacer(caps))
        {
            self.raw = s;
        }
    }

    /// Repeatedly find `pattern` followed by a `{...}` block and hand both to
    /// `transform`, splicing its result in place of the whole construct.
    ///
    /// The search resumes from the start of each replacement, so replacements
    /// that themselves contain the directive are processed again. Matches
    /// without a block are skipped.
    pub fn each_block_directive<F>(&mut self, pattern: &Regex, mut transform: F) -> usize
    where
        F: FnMut(&Captures, &str) -> String,
    {
        let mut offset = 0;
        let mut count = 0;
        for _ in 0..MAX_LOOP_ITERATIONS {
            let Some(caps) = pattern.captures_at(&self.raw, offset) else {
                return count;
            };
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let Some(block) = find_block(&self.raw, whole.end.saturating_sub(1), Pair::Braces)
                .filter(|b| b.open + 1 >= whole.end)
            else {
                offset = whole.end.max(offset + 1);
                continue;
            };
            let replacement = transform(&caps, &self.raw[block.inner()]);
            drop(caps);
            self.raw.replace_range(whole.start..block.end, &replacement);
            offset = whole.start;
            count += 1;
        }
        log::warn!("Directive loop for {} hit the iteration cap", pattern.as_str());
        count
    }
}
