//! Rules and declarations

use crate::selector::Selector;
use crate::stream::split_top_level;
use crate::tokens::{TokenKind, TokenTable};
use crate::types::KNOWN_VENDORS;
use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static FUNCTION_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(-?[A-Za-z_][\w-]*)\(").unwrap());

static IMPORTANT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*!\s*important\s*$").unwrap());

/// Split a vendor prefix off a property or function name:
/// `-webkit-box-shadow` gives `(Some("webkit"), "box-shadow")`
pub fn split_vendor(name: &str) -> (Option<String>, String) {
    if let Some(rest) = name.strip_prefix('-') {
        if let Some((vendor, canonical)) = rest.split_once('-') {
            let vendor = vendor.to_ascii_lowercase();
            if KNOWN_VENDORS.contains(&vendor.as_str()) && !canonical.is_empty() {
                return (Some(vendor), canonical.to_string());
            }
        }
    }
    (None, name.to_string())
}

/// Lowercased names of the functions called in `value`
pub fn function_names(value: &str) -> IndexSet<String> {
    FUNCTION_NAME_RE
        .captures_iter(value)
        .map(|caps| caps[1].to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub property: String,
    pub canonical_property: String,
    pub vendor: Option<String>,
    pub value: String,
    pub important: bool,
    pub functions: IndexSet<String>,
}

impl Declaration {
    pub fn new(property: &str, value: &str) -> Self {
        let property = property.trim().to_string();
        let (vendor, canonical) = if property.starts_with("--") {
            (None, property.clone())
        } else {
            split_vendor(&property.to_ascii_lowercase())
        };
        let mut declaration = Self {
            property,
            canonical_property: canonical,
            vendor,
            value: String::new(),
            important: false,
            functions: IndexSet::new(),
        };
        declaration.set_value(value);
        declaration
    }

    /// Parse `property: value`; `None` when there is no colon or no property
    pub fn parse(text: &str) -> Option<Self> {
        let (property, value) = text.split_once(':')?;
        let property = property.trim();
        if property.is_empty() || property.contains(char::is_whitespace) {
            return None;
        }
        Some(Self::new(property, value))
    }

    /// Set the value, extracting `!important` and the called functions
    pub fn set_value(&mut self, value: &str) {
        let value = value.trim();
        let stripped = IMPORTANT_RE.replace(value, "");
        if stripped.len() != value.len() {
            self.important = true;
        }
        self.value = stripped.trim().to_string();
        self.functions = function_names(&self.value);
    }

    pub fn set_property(&mut self, property: &str) {
        let value = self.value.clone();
        let important = self.important;
        *self = Self::new(property, &value);
        self.important = important;
    }

    /// Vendor-tagged copy with a different property and value
    pub fn variant(&self, property: &str, value: &str, vendor: Option<&str>) -> Self {
        let mut clone = Self::new(property, value);
        clone.important = self.important;
        if vendor.is_some() {
            clone.vendor = vendor.map(str::to_string);
        }
        clone
    }

    pub fn is_printable(&self) -> bool {
        !self.property.is_empty() && !self.value.is_empty()
    }

    pub fn to_css(&self, minify: bool) -> String {
        let important = match (self.important, minify) {
            (false, _) => "",
            (true, true) => "!important",
            (true, false) => " !important",
        };
        if minify {
            format!("{}:{}{}", self.property, self.value, important)
        } else {
            format!("{}: {}{}", self.property, self.value, important)
        }
    }
}

/// Parse a declaration block body; items without a colon are dropped
pub fn parse_declarations(body: &str) -> Vec<Declaration> {
    split_top_level(body, ';')
        .into_iter()
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| {
            let parsed = Declaration::parse(item);
            if parsed.is_none() {
                log::debug!("Skipping malformed declaration '{}'", item);
            }
            parsed
        })
        .collect()
}

/// An `extends:` target, optionally with a pseudo suffix (`.a:hover`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendArg {
    pub target: String,
    pub pseudo: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Rule {
    pub label: String,
    pub selectors: Vec<Selector>,
    pub declarations: Vec<Declaration>,
    pub name: Option<String>,
    pub extend_args: Vec<ExtendArg>,
    /// Selectors gained from rules that extend this one, keyed by readable
    pub extend_selectors: IndexMap<String, Selector>,
    pub vendor_context: Option<String>,
    pub trace: Option<String>,
    pub is_abstract: bool,
    /// Readable selector of the enclosing `@in` block
    pub parent: Option<String>,
}

impl Rule {
    pub fn new(label: impl Into<String>, selectors: Vec<Selector>) -> Self {
        Self {
            label: label.into(),
            selectors,
            ..Default::default()
        }
    }

    /// Whether the rule is an at-rule with a declaration body (`@font-face`)
    pub fn is_at_rule(&self) -> bool {
        self.selectors
            .first()
            .map_or(false, |s| s.value.starts_with('@'))
    }

    /// Own selectors (unless abstract) followed by extend selectors
    pub fn printable_selectors(&self) -> Vec<&Selector> {
        let mut seen: IndexSet<&str> = IndexSet::new();
        let own = self.selectors.iter().filter(|_| !self.is_abstract);
        own.chain(self.extend_selectors.values())
            .filter(|s| seen.insert(s.readable.as_str()))
            .collect()
    }

    pub fn should_emit(&self) -> bool {
        !self.printable_selectors().is_empty()
            && self.declarations.iter().any(Declaration::is_printable)
    }

    /// The last declaration of exactly `property`
    pub fn declaration(&self, property: &str) -> Option<&Declaration> {
        self.declarations
            .iter()
            .rev()
            .find(|d| d.property.eq_ignore_ascii_case(property))
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.declarations
            .iter()
            .any(|d| d.property.eq_ignore_ascii_case(property))
    }

    /// Keep only declarations that suit `vendor`
    pub fn retain_vendor(&mut self, vendor: &str) {
        self.declarations
            .retain(|d| d.vendor.as_deref().map_or(true, |v| v == vendor));
    }

    /// Add selectors of an extending rule
    pub fn add_extend_selectors<'a>(&mut self, selectors: impl IntoIterator<Item = &'a Selector>) {
        for selector in selectors {
            self.extend_selectors
                .entry(selector.readable.clone())
                .or_insert_with(|| selector.clone());
        }
    }

    /// Serialize with `indent` before each line (pretty) or compactly.
    /// `prefix` (a trace label) is placed before the selectors.
    pub fn to_css(&self, minify: bool, indent: &str, prefix: &str) -> String {
        let declarations: Vec<String> = self
            .declarations
            .iter()
            .filter(|d| d.is_printable())
            .map(|d| d.to_css(minify))
            .collect();

        if minify {
            let selectors: Vec<String> = self
                .printable_selectors()
                .iter()
                .map(|s| if self.is_at_rule() { s.value.clone() } else { s.compact() })
                .collect();
            format!("{}{}{{{}}}", prefix, selectors.join(","), declarations.join(";"))
        } else {
            let separator = format!(",\n{}", indent);
            let selectors: Vec<&str> = self
                .printable_selectors()
                .iter()
                .map(|s| s.readable.as_str())
                .collect();
            let mut out = format!("{}{}{} {{\n", indent, prefix, selectors.join(&separator));
            for declaration in declarations {
                out.push_str(&format!("{}    {};\n", indent, declaration));
            }
            out.push_str(indent);
            out.push('}');
            out
        }
    }
}

/// All rules of a run, addressable by label, readable selector or name
#[derive(Debug, Default)]
pub struct RuleTable {
    pub list: Vec<Rule>,
    /// Readable selectors and `name:` values to rule indices; first wins
    /// for selectors, names overwrite
    pub references: HashMap<String, usize>,
    labels: HashMap<String, usize>,
}

impl RuleTable {
    /// Store a rule under a fresh label and register its references
    pub fn add(&mut self, rule: Rule, tokens: &mut TokenTable) -> String {
        let label = self.add_unreferenced(rule, tokens);
        if let Some(index) = self.labels.get(&label).copied() {
            self.register(index);
        }
        label
    }

    /// Store a rule that selectors and names must not resolve to
    pub fn add_unreferenced(&mut self, mut rule: Rule, tokens: &mut TokenTable) -> String {
        let label = tokens.label(TokenKind::Rule);
        rule.label = label.clone();
        self.labels.insert(label.clone(), self.list.len());
        self.list.push(rule);
        label
    }

    /// Register the selectors and name of the rule at `index`
    pub fn register(&mut self, index: usize) {
        let Some(rule) = self.list.get(index) else {
            return;
        };
        if !rule.is_at_rule() {
            for selector in &rule.selectors {
                self.references.entry(selector.readable.clone()).or_insert(index);
            }
        }
        if let Some(name) = &rule.name {
            self.references.insert(name.clone(), index);
        }
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.get(label).copied()
    }

    pub fn get(&self, label: &str) -> Option<&Rule> {
        self.index_of(label).and_then(|i| self.list.get(i))
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_vendor() {
        assert_eq!(
            split_vendor("-webkit-box-shadow"),
            (Some("webkit".to_string()), "box-shadow".to_string())
        );
        assert_eq!(split_vendor("box-shadow"), (None, "box-shadow".to_string()));
        assert_eq!(split_vendor("-custom-thing"), (None, "-custom-thing".to_string()));
    }

    #[test]
    fn test_declaration_parse() {
        let d = Declaration::parse(" -moz-transition : opacity 1s !important ").unwrap();
        assert_eq!(d.property, "-moz-transition");
        assert_eq!(d.canonical_property, "transition");
        assert_eq!(d.vendor.as_deref(), Some("moz"));
        assert_eq!(d.value, "opacity 1s");
        assert!(d.important);
        assert_eq!(d.to_css(true), "-moz-transition:opacity 1s!important");
        assert_eq!(d.to_css(false), "-moz-transition: opacity 1s !important");
    }

    #[test]
    fn test_declaration_functions() {
        let d = Declaration::new("background", "linear-gradient(red, rgb(0,0,0))");
        let names: Vec<_> = d.functions.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["linear-gradient", "rgb"]);
    }

    #[test]
    fn test_parse_declarations_skips_garbage() {
        let decls = parse_declarations("color: red; nonsense; background: url(a;b)");
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[1].value, "url(a;b)");
    }

    #[test]
    fn test_rule_to_css() {
        let mut rule = Rule::new("?r1?", vec![Selector::new(".a"), Selector::new("ul >li")]);
        rule.declarations = parse_declarations("color: red; margin: 0");
        assert_eq!(rule.to_css(true, "", ""), ".a,ul>li{color:red;margin:0}");
        assert_eq!(
            rule.to_css(false, "", ""),
            ".a,\nul > li {\n    color: red;\n    margin: 0;\n}"
        );
    }

    #[test]
    fn test_abstract_rule_prints_only_extenders() {
        let mut rule = Rule::new("?r1?", vec![Selector::new(".base")]);
        rule.is_abstract = true;
        rule.declarations = parse_declarations("color: red");
        assert!(!rule.should_emit());
        rule.add_extend_selectors(&[Selector::new(".b")]);
        assert_eq!(rule.to_css(true, "", ""), ".b{color:red}");
    }

    #[test]
    fn test_empty_rule_is_not_emitted() {
        let rule = Rule::new("?r1?", vec![Selector::new(".a")]);
        assert!(!rule.should_emit());
    }

    #[test]
    fn test_rule_table_references() {
        let mut tokens = TokenTable::new();
        let mut table = RuleTable::default();
        let first = table.add(Rule::new("", vec![Selector::new(".a")]), &mut tokens);
        let mut named = Rule::new("", vec![Selector::new(".a"), Selector::new(".b")]);
        named.name = Some("base".to_string());
        table.add(named, &mut tokens);
        table.add_unreferenced(Rule::new("", vec![Selector::new(".c")]), &mut tokens);

        assert_eq!(table.references.get(".a"), Some(&0));
        assert_eq!(table.references.get(".b"), Some(&1));
        assert_eq!(table.references.get("base"), Some(&1));
        assert!(table.references.get(".c").is_none());
        assert_eq!(table.get(&first).map(|r| r.selectors[0].readable.as_str()), Some(".a"));
        assert_eq!(table.len(), 3);
    }
}
