//! Mixins and fragments: parameterized templates with `arg(N)` placeholders

use crate::process::Process;
use crate::rule::{parse_declarations, Declaration, Rule};
use crate::selector::readable;
use crate::stream::{find_block, match_from, split_list, Pair};
use crate::error::Diagnostic;
use crate::types::{MAX_FRAGMENT_DEPTH, MAX_LOOP_ITERATIONS, MAX_MIXIN_ARGS};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static MIXIN_DEF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)@mixin\s+([\w-]+)\s*\{").unwrap());

static FRAGMENT_DEF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@fragment\s+([\w-]+)\s*\{").unwrap());

static FRAGMENT_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@fragment\s+([\w-]+)\s*([(;])").unwrap());

static ARG_MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?a(\d+)\?").unwrap());

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    /// Body with `arg(N)` replaced by `?aN?` markers
    pub body: String,
    pub defaults: Vec<Option<String>>,
    /// Highest argument index plus one
    pub arg_count: usize,
    /// Problems found while reading the body
    pub warnings: Vec<String>,
}

impl Template {
    pub fn new(source: &str) -> Self {
        let mut template = Self::default();
        template.body = template.parameterize(source);
        template
    }

    /// Replace `arg(N[, default])` with markers, recording defaults
    fn parameterize(&mut self, text: &str) -> String {
        let bytes = text.as_bytes();
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut i = 0;
        while let Some(found) = text[i..].to_ascii_lowercase().find("arg(") {
            let start = i + found;
            let open = start + 3;
            let boundary = start
                .checked_sub(1)
                .map_or(true, |p| !(bytes[p].is_ascii_alphanumeric() || bytes[p] == b'_'));
            let Some(block) = match_from(bytes, open, Pair::Parens).filter(|_| boundary) else {
                i = open + 1;
                continue;
            };
            let inner = &text[block.inner()];
            let (index, default) = match inner.split_once(',') {
                Some((index, default)) => (index.trim(), Some(default.trim())),
                None => (inner.trim(), None),
            };
            let Ok(index) = index.parse::<usize>() else {
                i = open + 1;
                continue;
            };
            if index >= MAX_MIXIN_ARGS {
                log::warn!("arg({}) is out of range, left as written", index);
                self.warnings.push(format!(
                    "Argument index {} exceeds the limit of {}; left as written",
                    index, MAX_MIXIN_ARGS
                ));
                i = block.end;
                continue;
            }

            if index >= self.arg_count {
                self.arg_count = index + 1;
                self.defaults.resize(self.arg_count, None);
            }
            if let Some(default) = default {
                if self.defaults[index].is_none() {
                    let default = self.parameterize(default);
                    self.defaults[index] = Some(default);
                }
            }
            out.push_str(&text[last..start]);
            out.push_str(&format!("?a{}?", index));
            last = block.end;
            i = block.end;
        }
        out.push_str(&text[last..]);
        out
    }

    fn argument(&self, index: usize, args: &[String], depth: usize) -> String {
        if let Some(arg) = args.get(index).filter(|a| !a.is_empty()) {
            return arg.clone();
        }
        match self.defaults.get(index).and_then(Option::as_ref) {
            Some(default) if depth <= self.arg_count => ARG_MARKER_RE
                .replace_all(default, |caps: &Captures| {
                    let n: usize = caps[1].parse().unwrap_or(usize::MAX);
                    self.argument(n, args, depth + 1)
                })
                .into_owned(),
            _ => String::new(),
        }
    }

    /// Expand the body with positional `args`
    pub fn apply(&self, args: &[String]) -> String {
        let values: Vec<String> = (0..self.arg_count)
            .map(|i| self.argument(i, args, 0))
            .collect();
        ARG_MARKER_RE
            .replace_all(&self.body, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| values.get(n).cloned())
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

/// Split `name(args)` into the name and its argument list
pub fn parse_call(item: &str) -> (String, Vec<String>) {
    let item = item.trim();
    match item.find('(') {
        Some(open) => {
            let args = find_block(item, open, Pair::Parens)
                .map(|b| split_list(&item[b.inner()]))
                .unwrap_or_default();
            (item[..open].trim().to_string(), args)
        }
        None => (item.to_string(), Vec::new()),
    }
}

/// Remove `@mixin NAME { ... }` definitions into the process table
pub fn capture_mixins(process: &mut Process) {
    let mixins = &mut process.mixins;
    let diagnostics = &mut process.diagnostics;
    let count = process.stream.each_block_directive(&MIXIN_DEF_RE, |caps, body| {
        let template = Template::new(body);
        diagnostics.extend(
            template
                .warnings
                .iter()
                .map(|w| Diagnostic::warning(format!("Mixin '{}': {}", &caps[1], w))),
        );
        mixins.insert(caps[1].to_string(), template);
        String::new()
    });
    log::debug!("Captured {} mixins", count);
}

/// Remove `@fragment NAME { ... }` definitions into the process table
pub fn capture_fragments(process: &mut Process) {
    let fragments = &mut process.fragments;
    let diagnostics = &mut process.diagnostics;
    let count = process.stream.each_block_directive(&FRAGMENT_DEF_RE, |caps, body| {
        let template = Template::new(body);
        diagnostics.extend(
            template
                .warnings
                .iter()
                .map(|w| Diagnostic::warning(format!("Fragment '{}': {}", &caps[1], w))),
        );
        fragments.insert(caps[1].to_string(), template);
        String::new()
    });
    log::debug!("Captured {} fragments", count);
}

/// Expand `@fragment NAME(args);` invocations in `text`. `stack` holds the
/// fragments being expanded; re-entrant and too-deep calls are removed.
pub fn expand_fragments(
    text: &str,
    fragments: &IndexMap<String, Template>,
    stack: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> String {
    let mut out = text.to_string();
    let mut offset = 0;
    for _ in 0..MAX_LOOP_ITERATIONS {
        let Some(caps) = FRAGMENT_CALL_RE.captures_at(&out, offset) else {
            return out;
        };
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        let name = caps[1].to_string();
        let (args, end) = if &caps[2] == "(" {
            let Some(block) = match_from(out.as_bytes(), whole.end - 1, Pair::Parens) else {
                offset = whole.end;
                continue;
            };
            let rest = &out[block.end..];
            let semicolon = rest.len() - rest.trim_start().len();
            let end = if rest[semicolon..].starts_with(';') {
                block.end + semicolon + 1
            } else {
                block.end
            };
            (split_list(&out[block.inner()]), end)
        } else {
            (Vec::new(), whole.end)
        };
        drop(caps);

        let expansion = match fragments.get(&name) {
            None => {
                warnings.push(format!("Unknown fragment '{}'", name));
                String::new()
            }
            Some(_) if stack.contains(&name) => {
                warnings.push(format!("Fragment '{}' invokes itself; skipped", name));
                String::new()
            }
            Some(_) if stack.len() >= MAX_FRAGMENT_DEPTH => {
                warnings.push(format!("Fragment '{}' nested too deeply; skipped", name));
                String::new()
            }
            Some(template) => {
                stack.push(name.clone());
                let expanded = expand_fragments(&template.apply(&args), fragments, stack, warnings);
                stack.pop();
                expanded
            }
        };
        out.replace_range(whole.start..end, &expansion);
        offset = whole.start + expansion.len();
    }
    log::warn!("Fragment expansion hit the iteration cap");
    out
}

/// Lookup tables a mixin reference may resolve against
pub struct MixinScope<'a> {
    pub mixins: &'a IndexMap<String, Template>,
    pub rules: &'a [Rule],
    pub references: &'a HashMap<String, usize>,
    pub index: usize,
}

impl MixinScope<'_> {
    fn expand(&self, item: &str, stack: &mut Vec<String>, warnings: &mut Vec<String>) -> Vec<Declaration> {
        let (name, args) = parse_call(item);
        if stack.contains(&name) || stack.len() >= MAX_FRAGMENT_DEPTH {
            warnings.push(format!("Mixin '{}' is recursive; skipped", name));
            return Vec::new();
        }

        let declarations = if let Some(template) = self.mixins.get(&name) {
            parse_declarations(&template.apply(&args))
        } else {
            let key = self
                .references
                .get(&name)
                .or_else(|| self.references.get(&readable(&name)));
            match key {
                Some(&index) if index != self.index => self
                    .rules
                    .get(index)
                    .map(|rule| rule.declarations.clone())
                    .unwrap_or_default(),
                Some(_) => Vec::new(),
                None => {
                    warnings.push(format!("Unknown mixin '{}'", name));
                    return Vec::new();
                }
            }
        };

        stack.push(name);
        let flattened = self.flatten(declarations, stack, warnings);
        stack.pop();
        flattened
    }

    /// Replace `mixin:` declarations with the declarations they name
    pub fn flatten(
        &self,
        declarations: Vec<Declaration>,
        stack: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) -> Vec<Declaration> {
        let mut out = Vec::with_capacity(declarations.len());
        for declaration in declarations {
            if declaration.property.eq_ignore_ascii_case("mixin") {
                for item in split_list(&declaration.value) {
                    out.extend(self.expand(&item, stack, warnings));
                }
            } else {
                out.push(declaration);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Selector;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_template_arguments() {
        let template = Template::new("border: arg(0, 1px) solid arg(1, red); color: arg(1)");
        assert_eq!(template.arg_count, 2);
        assert_eq!(
            template.apply(&args(&["2px"])),
            "border: 2px solid red; color: red"
        );
        assert_eq!(
            template.apply(&args(&["", "blue"])),
            "border: 1px solid blue; color: blue"
        );
    }

    #[test]
    fn test_default_referencing_other_position() {
        let template = Template::new("margin: arg(0) arg(1, arg(0))");
        assert_eq!(template.apply(&args(&["5px"])), "margin: 5px 5px");
        assert_eq!(template.apply(&args(&["5px", "0"])), "margin: 5px 0");
    }

    #[test]
    fn test_self_referencing_default_terminates() {
        let template = Template::new("x: arg(0, arg(0))");
        assert_eq!(template.apply(&[]), "x: ");
    }

    #[test]
    fn test_out_of_range_index_is_left_alone() {
        let template = Template::new("width: arg(4000000000); height: arg(0)");
        assert_eq!(template.arg_count, 1);
        assert_eq!(template.warnings.len(), 1);
        assert_eq!(template.apply(&args(&["1px"])), "width: arg(4000000000); height: 1px");

        let overflow = Template::new("w: arg(18446744073709551615)");
        assert_eq!(overflow.arg_count, 0);
        assert_eq!(overflow.warnings.len(), 1);
    }

    #[test]
    fn test_parse_call() {
        assert_eq!(
            parse_call("shadow(1px, rgb(0,0,0))"),
            ("shadow".to_string(), args(&["1px", "rgb(0,0,0)"]))
        );
        assert_eq!(parse_call(".base"), (".base".to_string(), vec![]));
    }

    #[test]
    fn test_fragments() {
        let mut fragments = IndexMap::new();
        fragments.insert("box".to_string(), Template::new(".box-arg(0){width:arg(1, 10px)}"));
        fragments.insert("loop".to_string(), Template::new(".l{} @fragment loop;"));
        fragments.insert(
            "pair".to_string(),
            Template::new("@fragment box(a); @fragment box(b, 5px);"),
        );
        let mut warnings = Vec::new();

        let out = expand_fragments("@fragment pair;", &fragments, &mut Vec::new(), &mut warnings);
        assert_eq!(out, ".box-a{width:10px} .box-b{width:5px}");

        let out = expand_fragments("@fragment loop;", &fragments, &mut Vec::new(), &mut warnings);
        assert_eq!(out, ".l{} ");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_mixin_flatten() {
        let mut mixins = IndexMap::new();
        mixins.insert("pad".to_string(), Template::new("padding: arg(0, 1px); mixin: tone"));
        mixins.insert("tone".to_string(), Template::new("color: red"));
        let mut base = Rule::new("?r0?", vec![Selector::new(".base")]);
        base.declarations = parse_declarations("margin: 0");
        let rules = vec![base, Rule::default()];
        let references: HashMap<String, usize> = [(".base".to_string(), 0)].into();
        let scope = MixinScope {
            mixins: &mixins,
            rules: &rules,
            references: &references,
            index: 1,
        };
        let mut warnings = Vec::new();
        let declarations = parse_declarations("mixin: pad(2px), .base, nope; width: 1px");
        let flattened = scope.flatten(declarations, &mut Vec::new(), &mut warnings);
        let css: Vec<_> = flattened.iter().map(|d| d.to_css(true)).collect();
        assert_eq!(css, vec!["padding:2px", "color:red", "margin:0", "width:1px"]);
        assert_eq!(warnings, vec!["Unknown mixin 'nope'"]);
    }
}
