//! Value-level optimization passes applied to rules before collation

use crate::color::{keyword_hex, shortest, compress_hex, Color};
use crate::rule::{Declaration, Rule};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::HashMap;

static LEADING_ZERO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[\s,(/:])(-?)0+(\.\d)").unwrap());

static ZERO_UNIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(^|[\s,(/:])-?(?:0+(?:\.0*)?|\.0+)(?:px|em|rem|ex|ch|pt|pc|in|cm|mm|q|vw|vh|vmin|vmax)\b")
        .unwrap()
});

static HEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#([0-9a-fA-F]{3,8})\b").unwrap());

static COLOR_FUNCTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(^|[^\w-])((?:rgb|hsl)a?\([^()]*\))").unwrap());

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]+").unwrap());

/// Properties whose values are 1-4 side values
const SIDE_SHORTHANDS: &[&str] = &[
    "margin",
    "padding",
    "border-width",
    "border-color",
    "border-style",
    "inset",
    "scroll-margin",
    "scroll-padding",
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationStats {
    pub optimizations_applied: Vec<String>,
    pub size_savings: HashMap<String, usize>,
    pub total_savings: usize,
}

#[derive(Debug, Default)]
pub struct Optimizer {
    optimizations_applied: Vec<String>,
    size_savings: HashMap<String, usize>,
}

impl Optimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decruft every declaration; with `advanced`, also shorten colors
    pub fn optimize(&mut self, rules: &mut [Rule], advanced: bool) {
        for rule in rules.iter_mut() {
            for declaration in rule.declarations.iter_mut() {
                self.pass(declaration, "decruft", decruft_value);
                if advanced {
                    self.pass(declaration, "colors", minify_colors);
                }
            }
        }
        log::debug!(
            "Optimized {} rules, saved {} bytes",
            rules.len(),
            self.total_savings()
        );
    }

    fn pass(&mut self, declaration: &mut Declaration, name: &str, f: fn(&str, &str) -> String) {
        let before = declaration.value.len();
        let value = f(&declaration.canonical_property, &declaration.value);
        if value.len() < before {
            *self.size_savings.entry(name.to_string()).or_insert(0) += before - value.len();
            if !self.optimizations_applied.iter().any(|n| n == name) {
                self.optimizations_applied.push(name.to_string());
            }
        }
        if value != declaration.value {
            declaration.value = value;
        }
    }

    pub fn total_savings(&self) -> usize {
        self.size_savings.values().sum()
    }

    pub fn get_optimization_stats(&self) -> OptimizationStats {
        OptimizationStats {
            optimizations_applied: self.optimizations_applied.clone(),
            size_savings: self.size_savings.clone(),
            total_savings: self.total_savings(),
        }
    }
}

/// Drop leading and unit zeros, reduce side shorthands, shorten hex colors
pub fn decruft_value(property: &str, value: &str) -> String {
    let value = ZERO_UNIT_RE.replace_all(value, "${1}0");
    let value = LEADING_ZERO_RE.replace_all(&value, "${1}${2}${3}");
    let value = HEX_RE.replace_all(&value, |caps: &Captures| match caps[1].len() {
        3 | 4 | 6 | 8 => compress_hex(&caps[0]),
        _ => caps[0].to_string(),
    });
    let value = value.into_owned();
    if SIDE_SHORTHANDS.contains(&property) {
        reduce_sides(&value)
    } else {
        value
    }
}

/// `1px 2px 1px 2px` to `1px 2px`, `0 0 0 0` to `0`
pub fn reduce_sides(value: &str) -> String {
    if value.contains(['(', ',', '/', '?']) {
        return value.to_string();
    }
    let mut parts: Vec<&str> = value.split_whitespace().collect();
    if parts.is_empty() || parts.len() > 4 {
        return value.to_string();
    }
    if parts.len() == 4 && parts[3] == parts[1] {
        parts.pop();
    }
    if parts.len() == 3 && parts[2] == parts[0] {
        parts.pop();
    }
    if parts.len() == 2 && parts[1] == parts[0] {
        parts.pop();
    }
    parts.join(" ")
}

fn takes_color_keywords(property: &str) -> bool {
    property.contains("color")
        || property.contains("shadow")
        || property.starts_with("background")
        || property.starts_with("border")
        || property.starts_with("outline")
        || property.starts_with("text-decoration")
        || property.starts_with("column-rule")
        || matches!(property, "fill" | "stroke")
}

/// Rewrite colors to their shortest equivalent form
pub fn minify_colors(property: &str, value: &str) -> String {
    let value = COLOR_FUNCTION_RE.replace_all(value, |caps: &Captures| {
        match Color::parse(&caps[2]).filter(|c| c.a >= 1.0) {
            Some(color) => format!("{}{}", &caps[1], shortest(&color)),
            None => caps[0].to_string(),
        }
    });
    let value = HEX_RE.replace_all(&value, |caps: &Captures| {
        match Color::parse(&caps[0]).filter(|c| c.a >= 1.0 && matches!(caps[1].len(), 3 | 6)) {
            Some(color) => shortest(&color),
            None => caps[0].to_string(),
        }
    });
    if !takes_color_keywords(property) {
        return value.into_owned();
    }

    let bytes = value.as_bytes();
    let mut out = String::with_capacity(value.len());
    let mut last = 0;
    for m in WORD_RE.find_iter(&value) {
        let before = m.start().checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(m.end()).copied();
        let standalone = !matches!(before, Some(b'-' | b'_' | b'#' | b'.' | b'?' | b'0'..=b'9'))
            && !matches!(after, Some(b'-' | b'_' | b'(' | b'?' | b'0'..=b'9'));
        if !standalone {
            continue;
        }
        if let Some(hex) = keyword_hex(m.as_str()) {
            let short = compress_hex(hex);
            if short.len() < m.as_str().len() {
                out.push_str(&value[last..m.start()]);
                out.push_str(&short);
                last = m.end();
            }
        }
    }
    out.push_str(&value[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::parse_declarations;
    use crate::selector::Selector;

    #[test]
    fn test_leading_and_unit_zeros() {
        assert_eq!(decruft_value("transition", "opacity 0.5s"), "opacity .5s");
        assert_eq!(decruft_value("top", "-0.25em"), "-.25em");
        assert_eq!(decruft_value("margin", "0px auto"), "0 auto");
        assert_eq!(decruft_value("width", "10.5px"), "10.5px");
        assert_eq!(decruft_value("transition-delay", "0s"), "0s");
    }

    #[test]
    fn test_side_shorthands() {
        assert_eq!(decruft_value("margin", "0 0 0 0"), "0");
        assert_eq!(decruft_value("padding", "1px 2px 1px 2px"), "1px 2px");
        assert_eq!(decruft_value("padding", "1px 2px 3px 2px"), "1px 2px 3px");
        assert_eq!(decruft_value("box-shadow", "1px 1px 1px 1px"), "1px 1px 1px 1px");
    }

    #[test]
    fn test_hex_shortening() {
        assert_eq!(decruft_value("color", "#AABBCC"), "#abc");
        assert_eq!(decruft_value("color", "#AABBCD"), "#aabbcd");
    }

    #[test]
    fn test_advanced_colors() {
        assert_eq!(minify_colors("color", "rgb(255, 0, 0)"), "red");
        assert_eq!(minify_colors("color", "#ff0000"), "red");
        assert_eq!(minify_colors("background", "white url(?u3?)"), "#fff url(?u3?)");
        assert_eq!(minify_colors("color", "rgba(0,0,0,.5)"), "rgba(0,0,0,.5)");
        assert_eq!(minify_colors("font-family", "Orange, white"), "Orange, white");
        assert_eq!(minify_colors("border", "1px solid black"), "1px solid #000");
    }

    #[test]
    fn test_optimizer_tracks_savings() {
        let mut rule = Rule::new("?r1?", vec![Selector::new(".a")]);
        rule.declarations = parse_declarations("margin: 0px 0px; color: #ffffff");
        let mut rules = vec![rule];
        let mut optimizer = Optimizer::new();
        optimizer.optimize(&mut rules, true);
        let css: Vec<_> = rules[0].declarations.iter().map(|d| d.to_css(true)).collect();
        assert_eq!(css, vec!["margin:0", "color:#fff"]);
        let stats = optimizer.get_optimization_stats();
        assert!(stats.total_savings > 0);
        assert!(stats.optimizations_applied.contains(&"decruft".to_string()));
    }
}
