//! Rule parsing: selector aliases, abstract rules, `@in` blocks and the
//! single pass that turns `selector { declarations }` into rule tokens

use crate::extend::parse_extend_arg;
use crate::process::Process;
use crate::rule::{parse_declarations, Declaration, Rule};
use crate::selector::{nest_pairs, parse_list, readable};
use crate::stream::{find_block, split_list, Pair};
use crate::tokens::{TokenKind, COMMENT_RE, TOKEN_RE, TRACE_RE};
use crate::types::MAX_LOOP_ITERATIONS;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static SELECTOR_ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@selector-alias\s+:?([\w-]+)\s+([^;{}]+);").unwrap());

static ABSTRACT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@abstract\s+([^\s{};]+)\s*\{").unwrap());

static IN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)@in\s+([^{};]+)\{").unwrap());

static SELECTOR_HEAD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([^{};]*)\{").unwrap());

static RULE_BLOCK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([^{};]*)\{([^{}]*)\}").unwrap());

/// Split leading whitespace and comment, trace or rule labels off `text`
fn split_leading_labels(text: &str) -> (&str, &str) {
    let mut at = 0;
    loop {
        let rest = &text[at..];
        let trimmed = rest.trim_start();
        at += rest.len() - trimmed.len();
        match TOKEN_RE.captures(trimmed) {
            Some(caps) if caps.get(0).map_or(false, |m| m.start() == 0) && matches!(&caps[1], "c" | "t" | "r") => {
                at += caps[0].len();
            }
            _ => return (&text[..at], &text[at..]),
        }
    }
}

/// Take `name:` and `extends:` declarations off a rule
pub fn extract_directives(rule: &mut Rule) {
    let declarations = std::mem::take(&mut rule.declarations);
    let mut kept: Vec<Declaration> = Vec::with_capacity(declarations.len());
    for declaration in declarations {
        match declaration.property.to_ascii_lowercase().as_str() {
            "name" => rule.name = Some(declaration.value.trim().to_string()),
            "extends" | "extend" => rule
                .extend_args
                .extend(split_list(&declaration.value).iter().map(|item| parse_extend_arg(item))),
            _ => kept.push(declaration),
        }
    }
    rule.declarations = kept;
}

/// Remove `@selector-alias :name expansion;` definitions into the process
pub fn capture_selector_aliases(process: &mut Process) {
    let aliases = &mut process.selector_aliases;
    process.stream.replace_with(&SELECTOR_ALIAS_RE, |caps: &Captures| {
        let expansion = caps[2].trim();
        let expansion = if split_list(expansion).len() > 1 {
            format!(":any({})", expansion)
        } else {
            expansion.to_string()
        };
        aliases.insert(caps[1].to_ascii_lowercase(), expansion);
        String::new()
    });
}

/// Register `@abstract NAME { declarations }` blocks as abstract rules. The
/// rule label stays in the stream so extenders print at that position.
pub fn capture_abstracts(process: &mut Process) {
    let rules = &mut process.rules;
    let tokens = &mut process.tokens;
    let count = process.stream.each_block_directive(&ABSTRACT_RE, |caps, body| {
        let mut rule = Rule::new(String::new(), Vec::new());
        rule.is_abstract = true;
        rule.declarations = parse_declarations(&COMMENT_RE.replace_all(body, ""));
        extract_directives(&mut rule);
        rule.name = Some(caps[1].to_string());
        rules.add(rule, tokens)
    });
    log::debug!("Captured {} abstract rules", count);
}

/// Prefix every selector head inside an `@in` body with `parent`
fn prefix_selectors(body: &str, parent: &str, in_parents: &mut HashMap<String, String>) -> String {
    SELECTOR_HEAD_RE
        .replace_all(body, |caps: &Captures| {
            let (prefix, selector) = split_leading_labels(&caps[1]);
            if selector.trim().is_empty() || selector.trim_start().starts_with('@') {
                return caps[0].to_string();
            }
            let mut combined = Vec::new();
            for child in split_list(selector) {
                let inner_parent = in_parents.remove(&readable(&child));
                for (nested, own_parent) in nest_pairs(parent, &child) {
                    let parent_key = match &inner_parent {
                        Some(inner) => readable(&format!("{} {}", own_parent, inner)),
                        None => readable(&own_parent),
                    };
                    in_parents.insert(readable(&nested), parent_key);
                    combined.push(nested);
                }
            }
            format!("{}{}{{", prefix, combined.join(","))
        })
        .into_owned()
}

/// Flatten `@in SELECTOR { ... }` blocks, innermost first
pub fn flatten_in_blocks(process: &mut Process) {
    for _ in 0..MAX_LOOP_ITERATIONS {
        let Some((whole, parent)) = IN_RE
            .captures_iter(process.stream.as_str())
            .last()
            .and_then(|caps| Some((caps.get(0)?.range(), caps[1].to_string())))
        else {
            return;
        };
        let Some(block) = find_block(process.stream.as_str(), whole.end - 1, Pair::Braces) else {
            process.stream.splice(whole, "");
            continue;
        };
        let parent = COMMENT_RE.replace_all(&parent, "").trim().to_string();
        let body = process.stream.slice(block.inner()).to_string();
        let flattened = prefix_selectors(&body, &parent, &mut process.in_parents);
        process.stream.splice(whole.start..block.end, &flattened);
    }
    log::warn!("@in flattening hit the iteration cap");
}

/// Replace every innermost `selector { declarations }` block with a rule
/// token. Trace labels before the selector move onto the rule; comment
/// labels stay in the stream.
pub fn parse_rules(process: &mut Process) {
    let source = process.stream.as_str().to_string();
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    let mut count = 0;

    for caps in RULE_BLOCK_RE.captures_iter(&source) {
        let Some(whole) = caps.get(0) else { continue };
        let (prefix, selector_text) = split_leading_labels(&caps[1]);
        let trace = TRACE_RE.find_iter(prefix).last().map(|m| m.as_str().to_string());
        let kept_prefix = TRACE_RE.replace_all(prefix, "");

        let selector_text = COMMENT_RE.replace_all(selector_text, "");
        let mut rule = Rule::new(
            String::new(),
            parse_list(&selector_text, &process.selector_aliases),
        );
        rule.declarations = parse_declarations(&COMMENT_RE.replace_all(&caps[2], ""));
        rule.trace = trace;
        rule.parent = rule
            .selectors
            .first()
            .and_then(|s| process.in_parents.get(&s.readable))
            .cloned();
        extract_directives(&mut rule);

        let label = process.rules.add(rule, &mut process.tokens);
        out.push_str(&source[last..whole.start()]);
        out.push_str(&kept_prefix);
        out.push_str(&label);
        last = whole.end();
        count += 1;
    }
    out.push_str(&source[last..]);
    process.stream.set(out);
    log::debug!("Parsed {} rules", count);
}

/// Whether `label` names a rule token
pub fn is_rule_label(label: &str) -> bool {
    TokenKind::of_label(label) == Some(TokenKind::Rule)
}
