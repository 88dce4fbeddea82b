//! Custom value functions: math, percent, color adjustment and rule queries
//!
//! All registered names plus the nameless `( expr )` form are matched by one
//! combined pattern. Calls are evaluated innermost first; each receives its
//! raw argument text and may decline by returning `None`, which leaves the
//! call in place.

use crate::color::Color;
use crate::rule::Rule;
use crate::selector::readable;
use crate::stream::{match_from, split_list, Pair};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::Arc;

static NUMBER_UNIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d*\.?\d+)([a-zA-Z]+|%)?").unwrap());

static ARITHMETIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s\d.+\-*/()]+$").unwrap());

static OPERATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d)]\s*[-+*/]\s*[-\d.(]").unwrap());

static SIDE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(margin|padding|border)-(top|right|bottom|left)(-width|-color|-style)?$").unwrap()
});

/// State visible to a function call
pub struct FunctionContext<'a> {
    /// The rule being processed
    pub rule: &'a Rule,
    /// All rules in document order; the current one is a placeholder
    pub rules: &'a [Rule],
    pub references: &'a HashMap<String, usize>,
    pub index: usize,
    /// Property of the declaration being evaluated
    pub property: &'a str,
    pub warnings: Vec<String>,
}

impl<'a> FunctionContext<'a> {
    fn rule_at(&self, index: usize) -> Option<&'a Rule> {
        if index == self.index {
            Some(self.rule)
        } else {
            self.rules.get(index)
        }
    }

    fn find(&self, target: &str) -> Option<&'a Rule> {
        match target.to_ascii_lowercase().as_str() {
            "parent" => self
                .rule
                .parent
                .as_ref()
                .and_then(|p| self.references.get(p))
                .and_then(|&i| self.rule_at(i)),
            "previous" => self.rules[..self.index.min(self.rules.len())]
                .iter()
                .rev()
                .find(|r| !r.is_abstract && !r.declarations.is_empty()),
            "next" => self
                .rules
                .iter()
                .skip(self.index + 1)
                .find(|r| !r.is_abstract && !r.declarations.is_empty()),
            "top" => self
                .rules
                .iter()
                .enumerate()
                .find(|(i, r)| !r.is_abstract && (*i == self.index || !r.declarations.is_empty()))
                .and_then(|(i, _)| self.rule_at(i)),
            _ => self
                .references
                .get(target)
                .or_else(|| self.references.get(&readable(target)))
                .and_then(|&i| self.rule_at(i)),
        }
    }
}

pub type CustomFunction = Arc<dyn Fn(&str, &mut FunctionContext) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct FunctionRegistry {
    functions: IndexMap<String, CustomFunction>,
    pattern: Option<Regex>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FunctionRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            functions: IndexMap::new(),
            pattern: None,
        };
        let plain: [(&str, fn(&str) -> Option<String>); 7] = [
            ("math", math),
            ("percent", percent),
            ("h-adjust", |args| adjust(args, Channel::Hue)),
            ("s-adjust", |args| adjust(args, Channel::Saturation)),
            ("l-adjust", |args| adjust(args, Channel::Lightness)),
            ("a-adjust", |args| adjust(args, Channel::Alpha)),
            ("hsla-adjust", hsla_adjust),
        ];
        for (name, function) in plain {
            registry.register(
                name,
                Arc::new(move |args: &str, _: &mut FunctionContext| function(args)),
            );
        }
        registry.register("query", Arc::new(query));
        registry.register("this", Arc::new(this));
        registry
    }

    /// Register (or replace) a function and rebuild the combined pattern
    pub fn register(&mut self, name: &str, function: CustomFunction) {
        self.functions.insert(name.to_ascii_lowercase(), function);
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));
        let alternation: Vec<String> = names.iter().map(|n| regex::escape(n)).collect();
        self.pattern = Regex::new(&format!(r"(?i)(?:^|[^\w-])({})?\(", alternation.join("|"))).ok();
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Whether the bracket at `at` sits inside a call this registry does not
    /// own, such as `calc(` or `min(`. Nameless groups there stay as written.
    fn inside_native_call(&self, value: &str, at: usize) -> bool {
        let bytes = value.as_bytes();
        let mut depth = 0usize;
        for open in (0..at).rev() {
            match bytes[open] {
                b')' => depth += 1,
                b'(' if depth > 0 => depth -= 1,
                b'(' => {
                    let name_start = value[..open]
                        .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
                        .map_or(0, |p| p + 1);
                    let name = value[name_start..open].to_ascii_lowercase();
                    if !name.is_empty() {
                        return !self.functions.contains_key(&name);
                    }
                }
                _ => {}
            }
        }
        false
    }

    /// Evaluate every call in `value`, innermost first
    pub fn evaluate(&self, value: &str, ctx: &mut FunctionContext) -> String {
        let Some(pattern) = &self.pattern else {
            return value.to_string();
        };
        let mut calls: Vec<(usize, usize, Option<String>)> = Vec::new();
        let mut pos = 0;
        while let Some(caps) = pattern.captures_at(value, pos) {
            let Some(whole) = caps.get(0) else { break };
            let paren = whole.end() - 1;
            match caps.get(1) {
                Some(name) => calls.push((name.start(), paren, Some(name.as_str().to_ascii_lowercase()))),
                None if self.inside_native_call(value, paren) => {}
                None => calls.push((paren, paren, None)),
            }
            pos = paren.max(pos + 1);
        }
        if calls.is_empty() {
            return value.to_string();
        }

        let mut text = value.to_string();
        for (start, paren, name) in calls.into_iter().rev() {
            let Some(block) = match_from(text.as_bytes(), paren, Pair::Parens) else {
                continue;
            };
            let args = text[block.inner()].to_string();
            let result = match &name {
                Some(name) => self.functions.get(name).and_then(|f| f(&args, ctx)),
                None => nameless_math(&args),
            };
            if let Some(result) = result {
                text.replace_range(start..block.end, &result);
            }
        }
        text
    }
}

/// Format a number with at most five decimals and no trailing zeros
pub fn format_number(value: f64) -> String {
    let rounded = (value * 100_000.0).round() / 100_000.0;
    if rounded == 0.0 {
        "0".to_string()
    } else {
        format!("{}", rounded)
    }
}

/// Evaluate an arithmetic expression whose numbers may carry units
pub fn evaluate_expression(expr: &str, unit: Option<&str>) -> Option<String> {
    let mut first_unit: Option<String> = None;
    let stripped = NUMBER_UNIT_RE.replace_all(expr, |caps: &Captures| {
        if first_unit.is_none() {
            first_unit = caps.get(2).map(|u| u.as_str().to_string());
        }
        caps[1].to_string()
    });
    let result = meval::eval_str(stripped.as_ref()).ok()?;
    if !result.is_finite() {
        return None;
    }
    let unit = unit.map(str::to_string).or(first_unit).unwrap_or_default();
    Some(format!("{}{}", format_number(result), unit))
}

fn math(args: &str) -> Option<String> {
    let parts = split_list(args);
    let expr = parts.first()?;
    evaluate_expression(expr, parts.get(1).map(String::as_str))
}

fn nameless_math(args: &str) -> Option<String> {
    let without_units = NUMBER_UNIT_RE.replace_all(args, "$1");
    if !ARITHMETIC_RE.is_match(&without_units) || !OPERATOR_RE.is_match(&without_units) {
        return None;
    }
    let mut units = NUMBER_UNIT_RE
        .captures_iter(args)
        .filter_map(|caps| caps.get(2).map(|u| u.as_str().to_ascii_lowercase()));
    if let Some(first) = units.next() {
        if units.any(|unit| unit != first) {
            return None;
        }
    }
    evaluate_expression(args, None)
}

fn percent(args: &str) -> Option<String> {
    let parts = split_list(args);
    let a: f64 = parts.first()?.parse().ok()?;
    let b: f64 = parts.get(1)?.parse().ok()?;
    if b == 0.0 {
        return None;
    }
    let precision: i32 = parts.get(2).and_then(|p| p.parse().ok()).unwrap_or(5);
    let factor = 10f64.powi(precision.clamp(0, 10));
    let value = (a / b * 100.0 * factor).round() / factor;
    Some(format!("{}%", format_number(value)))
}

/// Split on top-level commas, or on top-level whitespace when there are none
pub fn split_args(args: &str) -> Vec<String> {
    let parts = split_list(args);
    if parts.len() != 1 {
        return parts;
    }
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in args.trim().chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if c.is_whitespace() && depth == 0 {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn parse_delta(text: &str) -> Option<f64> {
    text.trim()
        .trim_end_matches('%')
        .trim_end_matches("deg")
        .parse()
        .ok()
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Hue,
    Saturation,
    Lightness,
    Alpha,
}

fn adjust(args: &str, channel: Channel) -> Option<String> {
    let parts = split_args(args);
    let color = Color::parse(parts.first()?)?;
    let delta = parse_delta(parts.get(1)?)?;
    let adjusted = match channel {
        Channel::Hue => color.adjust(delta, 0.0, 0.0, 0.0),
        Channel::Saturation => color.adjust(0.0, delta, 0.0, 0.0),
        Channel::Lightness => color.adjust(0.0, 0.0, delta, 0.0),
        Channel::Alpha => {
            let delta = if delta.abs() > 1.0 { delta / 100.0 } else { delta };
            color.adjust(0.0, 0.0, 0.0, delta)
        }
    };
    Some(adjusted.to_css())
}

fn hsla_adjust(args: &str) -> Option<String> {
    let parts = split_args(args);
    let color = Color::parse(parts.first()?)?;
    let delta = |i: usize| parts.get(i).and_then(|p| parse_delta(p)).unwrap_or(0.0);
    Some(color.adjust(delta(1), delta(2), delta(3), delta(4)).to_css())
}

/// A property's value on `rule`, falling back from a missing side longhand
/// (`margin-top`) to the matching part of its shorthand (`margin`)
pub fn lookup_property(rule: &Rule, property: &str) -> Option<String> {
    if let Some(declaration) = rule.declaration(property) {
        return Some(declaration.value.clone());
    }
    let caps = SIDE_RE.captures(property)?;
    let shorthand = format!("{}{}", &caps[1], caps.get(3).map_or("", |m| m.as_str()));
    let value = &rule.declaration(&shorthand)?.value;
    let parts = split_args(value);
    let side = match &caps[2] {
        "top" => 0,
        "right" => 1,
        "bottom" => 2,
        _ => 3,
    };
    let pick = match (parts.len(), side) {
        (1, _) => 0,
        (2, 0) | (2, 2) => 0,
        (2, _) => 1,
        (3, 0) => 0,
        (3, 2) => 2,
        (3, _) => 1,
        (4, side) => side,
        _ => return None,
    };
    parts.get(pick).cloned()
}

fn query(args: &str, ctx: &mut FunctionContext) -> Option<String> {
    let parts = split_list(args);
    let target = parts.first()?;
    let property = parts
        .get(1)
        .filter(|p| !p.is_empty() && p.as_str() != "default")
        .cloned()
        .unwrap_or_else(|| ctx.property.to_string());
    let default = parts.get(2).cloned();

    let value = ctx.find(target).and_then(|rule| lookup_property(rule, &property));
    if value.is_none() && default.is_none() {
        ctx.warnings
            .push(format!("query({}) found no value for '{}'", target, property));
    }
    Some(value.or(default).unwrap_or_default())
}

fn this(args: &str, ctx: &mut FunctionContext) -> Option<String> {
    let parts = split_list(args);
    let property = parts.first()?;
    let value = lookup_property(ctx.rule, property);
    Some(value.or_else(|| parts.get(1).cloned()).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::parse_declarations;
    use crate::selector::Selector;

    fn rule(selector: &str, body: &str) -> Rule {
        let mut rule = Rule::new("?r0?", vec![Selector::new(selector)]);
        rule.declarations = parse_declarations(body);
        rule
    }

    fn eval(value: &str) -> String {
        let current = rule(".x", "width: 10px");
        let rules = vec![Rule::default()];
        let references = HashMap::new();
        let mut ctx = FunctionContext {
            rule: &current,
            rules: &rules,
            references: &references,
            index: 0,
            property: "width",
            warnings: Vec::new(),
        };
        FunctionRegistry::with_builtins().evaluate(value, &mut ctx)
    }

    #[test]
    fn test_math() {
        assert_eq!(eval("math(10px * 2)"), "20px");
        assert_eq!(eval("math(1/3, em)"), "0.33333em");
        assert_eq!(eval("math(math(2 + 2) * 2)"), "8");
        assert_eq!(eval("MATH(3 - 1)"), "2");
    }

    #[test]
    fn test_nameless_math() {
        assert_eq!(eval("(2px * 3) solid"), "6px solid");
        assert_eq!(eval("(1px)"), "(1px)");
        assert_eq!(eval("rgba(0,0,0,.5)"), "rgba(0,0,0,.5)");
        assert_eq!(eval("math((2 + 2) * 2)"), "8");
    }

    #[test]
    fn test_nameless_math_leaves_native_functions_alone() {
        assert_eq!(eval("calc((100% - 10px) / 3)"), "calc((100% - 10px) / 3)");
        assert_eq!(eval("min((2px * 3), 10vw)"), "min((2px * 3), 10vw)");
        assert_eq!(eval("clamp(1rem, (2 + 1) * 1vw, 3rem)"), "clamp(1rem, (2 + 1) * 1vw, 3rem)");
    }

    #[test]
    fn test_nameless_math_refuses_mixed_units() {
        assert_eq!(eval("(100% - 10px) solid"), "(100% - 10px) solid");
        assert_eq!(eval("(2em + 1em)"), "3em");
    }

    #[test]
    fn test_percent() {
        assert_eq!(eval("percent(1, 3, 2)"), "33.33%");
        assert_eq!(eval("percent(1, 0)"), "percent(1, 0)");
    }

    #[test]
    fn test_color_adjust() {
        assert_eq!(eval("l-adjust(#ff0000, -20)"), "#990000");
        assert_eq!(eval("h-adjust(red 120)"), "#00ff00");
        assert_eq!(eval("a-adjust(red, -0.5)"), "rgba(255,0,0,0.5)");
        assert_eq!(eval("hsla-adjust(#f00 0 0 -20)"), "#990000");
        assert_eq!(eval("l-adjust(notacolor, 5)"), "l-adjust(notacolor, 5)");
    }

    #[test]
    fn test_this() {
        assert_eq!(eval("this(width)"), "10px");
        assert_eq!(eval("this(height, auto)"), "auto");
    }

    #[test]
    fn test_query_targets() {
        let rules = vec![
            rule(".a", "margin: 1px 2px 3px"),
            Rule::default(),
            rule(".c", "color: blue"),
        ];
        let mut current = rule(".b", "color: red");
        current.parent = Some(".a".to_string());
        let references: HashMap<String, usize> =
            [(".a".to_string(), 0), (".c".to_string(), 2), ("named".to_string(), 2)].into();
        let mut ctx = FunctionContext {
            rule: &current,
            rules: &rules,
            references: &references,
            index: 1,
            property: "color",
            warnings: Vec::new(),
        };
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(registry.evaluate("query(next)", &mut ctx), "blue");
        assert_eq!(registry.evaluate("query(named)", &mut ctx), "blue");
        assert_eq!(registry.evaluate("query(previous, margin-bottom)", &mut ctx), "3px");
        assert_eq!(registry.evaluate("query(parent, margin-left)", &mut ctx), "2px");
        assert_eq!(registry.evaluate("query(.a, color, black)", &mut ctx), "black");
        assert_eq!(registry.evaluate("query(top, color)", &mut ctx), "");
        assert_eq!(ctx.warnings.len(), 1);
    }

    #[test]
    fn test_custom_function() {
        let mut registry = FunctionRegistry::with_builtins();
        registry.register(
            "double",
            Arc::new(|args: &str, _: &mut FunctionContext| Some(format!("{} {}", args, args))),
        );
        let current = rule(".x", "");
        let mut ctx = FunctionContext {
            rule: &current,
            rules: &[],
            references: &HashMap::new(),
            index: 0,
            property: "margin",
            warnings: Vec::new(),
        };
        assert_eq!(registry.evaluate("double(1px)", &mut ctx), "1px 1px");
    }
}
