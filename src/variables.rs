//! Variable capture, resolution and substitution
//!
//! The effective table is merged from three layers (compiler globals,
//! in-file `@define` blocks, runtime `vars`), self-resolved, then used to
//! evaluate `@ifdefine` blocks and substitute `$(name)` / `var(name)`
//! references in the stream and in captured strings and URLs.

use crate::error::CrushError;
use crate::process::Process;
use crate::stream::{find_block, match_from, split_top_level, Pair};
use crate::tokens::{TokenKind, TOKEN_RE};
use crate::types::{MAX_LOOP_ITERATIONS, MAX_VARIABLE_PASSES};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::ops::Range;

static DEFINE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@(?:define|variables)\s*\{").unwrap());

static DEFINE_SINGLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)@define\s+([A-Za-z_][\w-]*)\s*:?\s*([^;{}]*);").unwrap()
});

static SETTINGS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)@settings\s*\{").unwrap());

static IFDEFINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)@ifdefine\s+(not\s+|!\s*)?([A-Za-z_][\w-]*)\s*\{").unwrap()
});

/// A `$(name[, default])` or `var(name[, default])` reference
#[derive(Debug, Clone, PartialEq)]
struct Reference {
    range: Range<usize>,
    name: String,
    default: Option<String>,
}

fn is_name(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Outermost references in document order
fn find_references(text: &str) -> Vec<Reference> {
    let bytes = text.as_bytes();
    let mut refs = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let open = if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'(') {
            i + 1
        } else if bytes[i..].len() >= 4
            && bytes[i..i + 4].eq_ignore_ascii_case(b"var(")
            && i.checked_sub(1).map_or(true, |p| {
                !(bytes[p].is_ascii_alphanumeric() || bytes[p] == b'-' || bytes[p] == b'_')
            })
        {
            i + 3
        } else {
            i += 1;
            continue;
        };
        let Some(block) = match_from(bytes, open, Pair::Parens) else {
            i += 1;
            continue;
        };
        let inner = &text[block.inner()];
        let mut parts = split_top_level(inner, ',').into_iter();
        let name = parts.next().unwrap_or("").trim();
        let rest: Vec<&str> = parts.collect();
        if !is_name(name) {
            i = open + 1;
            continue;
        }
        refs.push(Reference {
            range: i..block.end,
            name: name.to_string(),
            default: (!rest.is_empty()).then(|| rest.join(",").trim().to_string()),
        });
        i = block.end;
    }
    refs
}

pub fn has_references(text: &str) -> bool {
    !find_references(text).is_empty()
}

/// Replace references using `lookup`; unknown names fall back to their
/// default, then to the empty string
pub fn substitute<F>(text: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let refs = find_references(text);
    if refs.is_empty() {
        return text.to_string();
    }
    let mut out = text.to_string();
    for reference in refs.iter().rev() {
        let value = lookup(&reference.name)
            .or_else(|| reference.default.as_deref().map(|d| substitute(d, lookup)))
            .unwrap_or_default();
        out.replace_range(reference.range.clone(), &value);
    }
    out
}

/// Parse `name: value;` pairs from a block body
pub fn parse_pairs(body: &str) -> Vec<(String, String)> {
    split_top_level(body, ';')
        .into_iter()
        .filter_map(|item| {
            let (name, value) = item.split_once(':')?;
            let name = name.trim();
            is_name(name).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Remove `@settings` and `@define` blocks from the stream, collecting
/// settings and the in-file variable layer
pub fn capture(process: &mut Process) -> IndexMap<String, String> {
    let settings = &mut process.settings;
    process.stream.each_block_directive(&SETTINGS_RE, |_, body| {
        settings.extend(parse_pairs(body));
        String::new()
    });

    let mut in_file: IndexMap<String, String> = IndexMap::new();
    process.stream.each_block_directive(&DEFINE_BLOCK_RE, |_, body| {
        in_file.extend(parse_pairs(body));
        String::new()
    });
    process.stream.replace_with(&DEFINE_SINGLE_RE, |caps: &Captures| {
        in_file.insert(caps[1].to_string(), caps[2].trim().to_string());
        String::new()
    });
    log::debug!(
        "Captured {} settings and {} in-file variables",
        process.settings.len(),
        in_file.len()
    );
    in_file
}

/// Merge global < in-file < runtime layers. Global and runtime values come
/// from outside the stream, so they are tokenized first.
pub fn merge(process: &mut Process, in_file: IndexMap<String, String>) {
    let kinds = &[TokenKind::Comment, TokenKind::String, TokenKind::Url];
    let mut table = IndexMap::new();
    for (name, value) in process.compiler.globals.iter() {
        table.insert(name.clone(), process.tokens.capture(value, kinds).text);
    }
    table.extend(in_file);
    for (name, value) in process.options.vars.clone() {
        table.insert(name, process.tokens.capture(&value, kinds).text);
    }
    process.variables = table;
}

/// Resolve references between variables; leftover references after the
/// pass limit are cycles and resolve to their defaults
pub fn resolve(process: &mut Process) {
    let vars = &mut process.variables;
    for pass in 0..MAX_VARIABLE_PASSES {
        if !vars.values().any(|v| has_references(v)) {
            log::debug!("Variables resolved after {} passes", pass);
            return;
        }
        let snapshot = vars.clone();
        let lookup = |name: &str| snapshot.get(name).cloned();
        for value in vars.values_mut() {
            if has_references(value) {
                *value = substitute(value, &lookup);
            }
        }
        if *vars == snapshot {
            break;
        }
    }

    let unresolved: Vec<String> = vars
        .iter()
        .filter(|(_, v)| has_references(v))
        .map(|(k, _)| k.clone())
        .collect();
    for name in unresolved {
        if let Some(value) = process.variables.get_mut(&name) {
            *value = substitute(value, &|_: &str| None);
        }
        process.report(CrushError::variable(format!("Circular reference in variable '{}'", name)).into());
    }
}

/// Keep or drop `@ifdefine [not] NAME { ... }` blocks, innermost first
pub fn apply_conditionals(process: &mut Process) {
    for _ in 0..MAX_LOOP_ITERATIONS {
        let stream = process.stream.as_str();
        let Some(caps) = IFDEFINE_RE.captures_iter(stream).last() else {
            return;
        };
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        let negate = caps.get(1).is_some();
        let defined = process.variables.contains_key(&caps[2]);
        let Some(block) = find_block(stream, whole.end - 1, Pair::Braces) else {
            process.stream.splice(whole, "");
            continue;
        };
        let replacement = if defined != negate {
            stream[block.inner()].to_string()
        } else {
            String::new()
        };
        process.stream.splice(whole.start..block.end, &replacement);
    }
    log::warn!("@ifdefine evaluation hit the iteration cap");
}

/// Substitute resolved variables into the stream, captured strings and URLs
pub fn apply(process: &mut Process) {
    let vars = &process.variables;
    let stream = substitute(process.stream.as_str(), &|name: &str| vars.get(name).cloned());
    process.stream.set(stream);

    // Inside strings and URLs, string-token values are inlined unquoted
    let tokens = &process.tokens;
    let plain: IndexMap<String, String> = vars
        .iter()
        .map(|(name, value)| {
            let inlined = TOKEN_RE.replace_all(value, |caps: &Captures| {
                tokens
                    .string_value(&caps[0])
                    .unwrap_or_else(|| caps[0].to_string())
            });
            (name.clone(), inlined.into_owned())
        })
        .collect();
    let lookup = |name: &str| plain.get(name).cloned();

    for value in process.tokens.strings.values_mut() {
        if has_references(value) {
            *value = substitute(value, &lookup);
        }
    }
    for url in process.tokens.urls.values_mut() {
        if has_references(&url.value) {
            url.value = substitute(&url.value, &lookup);
            url.reclassify();
        }
    }
    let settings: Vec<(String, String)> = process
        .settings
        .iter()
        .map(|(k, v)| (k.clone(), substitute(v, &lookup)))
        .collect();
    process.settings.extend(settings);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::stream::Stream;
    use crate::types::Options;

    fn lookup_in<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_find_references() {
        let refs = find_references("a $(x) var(y, 1px) var(--native) $(z, var(q))");
        let names: Vec<_> = refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
        assert_eq!(refs[1].default.as_deref(), Some("1px"));
        assert_eq!(refs[2].default.as_deref(), Some("var(q)"));
    }

    #[test]
    fn test_substitute_defaults() {
        let lookup = lookup_in(&[("a", "1px"), ("q", "red")]);
        assert_eq!(substitute("$(a) $(b, 2px) $(c)", &lookup), "1px 2px ");
        assert_eq!(substitute("$(z, var(q))", &lookup), "red");
        assert_eq!(substitute("var(--x)", &lookup), "var(--x)");
    }

    #[test]
    fn test_parse_pairs() {
        assert_eq!(
            parse_pairs(" brand: #333 ; font: ?s1?; bad line; "),
            vec![
                ("brand".to_string(), "#333".to_string()),
                ("font".to_string(), "?s1?".to_string())
            ]
        );
    }

    fn process_with<'c>(compiler: &'c Compiler, options: Options, source: &str) -> Process<'c> {
        let mut process = Process::new(compiler, options);
        process.stream = Stream::new(source);
        let in_file = capture(&mut process);
        merge(&mut process, in_file);
        resolve(&mut process);
        apply_conditionals(&mut process);
        apply(&mut process);
        process
    }

    #[test]
    fn test_define_forms_and_runtime_override() {
        let compiler = Compiler::new();
        let source = "@define { a: 1px; b: $(a) } @define C 3px; .x{w:$(b) var(C)}";
        let process = process_with(&compiler, Options::default(), source);
        assert_eq!(process.stream.as_str().trim(), ".x{w:1px 3px}");

        let mut options = Options::default();
        options.vars.insert("a".to_string(), "2px".to_string());
        let process = process_with(&compiler, options, source);
        assert_eq!(process.stream.as_str().trim(), ".x{w:2px 3px}");
    }

    #[test]
    fn test_global_layer_is_lowest() {
        let mut compiler = Compiler::new();
        compiler.set_global("a", "global");
        compiler.set_global("g", "kept");
        let process = process_with(&compiler, Options::default(), "@define a local; $(a) $(g)");
        assert_eq!(process.stream.as_str().trim(), "local kept");
    }

    #[test]
    fn test_cycle_warns_and_uses_default() {
        let compiler = Compiler::new();
        let process = process_with(
            &compiler,
            Options::default(),
            "@define { a: $(b, x); b: $(a, y) } .x{w:$(a)}",
        );
        assert_eq!(process.diagnostics.len(), 2);
        assert!(process.diagnostics[0].message.contains("Circular"));
        assert!(!process.stream.as_str().contains('$'));
    }

    #[test]
    fn test_ifdefine() {
        let compiler = Compiler::new();
        let source = "@define on 1; @ifdefine on { .a{} @ifdefine not on { .b{} } } @ifdefine off { .c{} } @ifdefine !off { .d{} }";
        let process = process_with(&compiler, Options::default(), source);
        let out: String = process.stream.as_str().split_whitespace().collect();
        assert_eq!(out, ".a{}.d{}");
    }

    #[test]
    fn test_settings_captured() {
        let compiler = Compiler::new();
        let process = process_with(&compiler, Options::default(), "@settings { rem-base: 10 } .a{}");
        assert_eq!(process.settings.get("rem-base").map(String::as_str), Some("10"));
        assert_eq!(process.stream.as_str().trim(), ".a{}");
    }

    #[test]
    fn test_substitution_into_strings_and_urls() {
        let compiler = Compiler::new();
        let mut process = Process::new(&compiler, Options::default());
        let captured = process.tokens.capture(
            "@define { dir: \"img\"; } .a{background:url($(dir)/a.png);content:\"$(dir)\"}",
            &[TokenKind::Comment, TokenKind::String, TokenKind::Url],
        );
        process.stream = Stream::new(captured.text);
        let in_file = capture(&mut process);
        merge(&mut process, in_file);
        resolve(&mut process);
        apply(&mut process);
        let url = process.tokens.urls.values().next().unwrap();
        assert_eq!(url.value, "img/a.png");
        assert!(process.tokens.strings.values().any(|s| s == "\"img\""));
    }
}
