//! Collation: turns the labeled stream back into CSS text

use crate::rule::RuleTable;
use crate::sourcemap::{extract_traces, Mapping};
use crate::stream::{match_from, Pair};
use crate::tokens::{TokenKind, TokenTable, TOKEN_RE};
use crate::types::Options;

const INDENT: &str = "    ";

/// Directives that never reach the output, even when left unprocessed
const DIRECTIVES: &[&str] = &[
    "@define",
    "@variables",
    "@settings",
    "@ifdefine",
    "@mixin",
    "@fragment",
    "@abstract",
    "@in",
    "@selector-alias",
    "@charset",
];

/// Output of a collation run
#[derive(Debug, Clone, Default)]
pub struct Collated {
    pub css: String,
    pub mappings: Vec<Mapping>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Rule(String),
    Comment(String),
    Statement(String),
    Block { head: String, children: Vec<Node> },
}

fn is_directive(text: &str) -> bool {
    let lower = text.trim_start().to_ascii_lowercase();
    DIRECTIVES.iter().any(|d| {
        lower.starts_with(d)
            && !lower[d.len()..].starts_with(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

/// Collapse whitespace; when minifying also drop it after `:` and `,`
fn clean_head(head: &str, minify: bool) -> String {
    let collapsed = head.split_whitespace().collect::<Vec<_>>().join(" ");
    if minify {
        collapsed.replace(": ", ":").replace(", ", ",")
    } else {
        collapsed
    }
}

/// Split a labeled stream into rule tokens, comments, statements and blocks
pub fn parse_nodes(text: &str) -> Vec<Node> {
    let bytes = text.as_bytes();
    let mut nodes = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let rest = &text[i..];
        i += rest.len() - rest.trim_start().len();
        if i >= bytes.len() {
            break;
        }

        if let Some(m) = TOKEN_RE.find(&text[i..]).filter(|m| m.start() == 0) {
            let label = m.as_str().to_string();
            let handled = match TokenKind::of_label(&label) {
                Some(TokenKind::Rule) => {
                    nodes.push(Node::Rule(label));
                    true
                }
                Some(TokenKind::Comment) => {
                    nodes.push(Node::Comment(label));
                    true
                }
                Some(TokenKind::Trace) => true,
                _ => false,
            };
            if handled {
                i += m.end();
                continue;
            }
        }

        let mut j = i;
        let mut parens = 0usize;
        while j < bytes.len() {
            match bytes[j] {
                b'(' => parens += 1,
                b')' => parens = parens.saturating_sub(1),
                b';' | b'{' | b'}' if parens == 0 => break,
                _ => {}
            }
            j += 1;
        }

        let head = text[i..j].trim().to_string();
        match bytes.get(j) {
            None => {
                if !head.is_empty() {
                    nodes.push(Node::Statement(head));
                }
                break;
            }
            Some(b'{') => match match_from(bytes, j, Pair::Braces) {
                Some(block) => {
                    nodes.push(Node::Block {
                        head,
                        children: parse_nodes(&text[block.inner()]),
                    });
                    i = block.end;
                }
                None => {
                    log::warn!("Unclosed block '{}' dropped from output", head);
                    break;
                }
            },
            Some(_) => {
                if !head.is_empty() {
                    nodes.push(Node::Statement(head));
                }
                i = j + 1;
            }
        }
    }
    nodes
}

pub struct CodeGenerator<'a> {
    rules: &'a RuleTable,
    tokens: &'a TokenTable,
    minify: bool,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(rules: &'a RuleTable, tokens: &'a TokenTable, options: &Options) -> Self {
        Self {
            rules,
            tokens,
            minify: options.minify,
        }
    }

    fn emits(&self, node: &Node) -> bool {
        match node {
            Node::Rule(label) => self.rules.get(label).map_or(false, |r| r.should_emit()),
            Node::Comment(label) => self
                .tokens
                .comments
                .get(label)
                .map_or(false, |c| c.starts_with("/*!")),
            Node::Statement(text) => text.starts_with('@') && !is_directive(text),
            Node::Block { head, children } => {
                !is_directive(head) && children.iter().any(|c| self.emits(c))
            }
        }
    }

    fn render_node(&self, node: &Node, depth: usize) -> String {
        let indent = if self.minify { String::new() } else { INDENT.repeat(depth) };
        match node {
            Node::Rule(label) => match self.rules.get(label) {
                Some(rule) => rule.to_css(self.minify, &indent, rule.trace.as_deref().unwrap_or("")),
                None => String::new(),
            },
            Node::Comment(label) if self.minify => format!("{}\n", label),
            Node::Comment(label) => format!("{}{}", indent, label),
            Node::Statement(text) => format!("{}{};", indent, clean_head(text, self.minify)),
            Node::Block { head, children } => {
                let head = clean_head(head, self.minify);
                let inner = self.render(children, depth + 1);
                if self.minify {
                    format!("{}{{{}}}", head, inner)
                } else {
                    format!("{}{} {{\n{}\n{}}}", indent, head, inner, indent)
                }
            }
        }
    }

    /// Render the emitting nodes; empty blocks and rules are pruned
    pub fn render(&self, nodes: &[Node], depth: usize) -> String {
        let parts: Vec<String> = nodes
            .iter()
            .filter(|node| self.emits(node))
            .map(|node| self.render_node(node, depth))
            .collect();
        let separator = match (self.minify, depth) {
            (true, _) => "",
            (false, 0) => "\n\n",
            (false, _) => "\n",
        };
        parts.join(separator)
    }

    /// Render a whole stream
    pub fn generate(&self, stream: &str) -> String {
        let mut css = self.render(&parse_nodes(stream), 0);
        if !self.minify && !css.is_empty() {
            css.push('\n');
        }
        css
    }
}

/// Produce final CSS: render, restore placeholders, prepend the charset and
/// boilerplate, convert newlines, then lift out trace markers
pub fn collate(
    stream: &str,
    rules: &RuleTable,
    tokens: &mut TokenTable,
    options: &Options,
    charset: Option<&str>,
    boilerplate: Option<&str>,
) -> Collated {
    let body = CodeGenerator::new(rules, tokens, options).generate(stream);

    let mut css = String::new();
    if let Some(charset) = charset {
        css.push_str(&format!("@charset {};\n", charset));
    }
    if let Some(boilerplate) = boilerplate {
        css.push_str(boilerplate);
        css.push('\n');
    }
    css.push_str(&body);

    let kinds = [TokenKind::Comment, TokenKind::String, TokenKind::Url];
    let mut css = tokens.restore(&css, &kinds, true);

    let newline = options.newlines.as_str();
    if newline != "\n" {
        css = css.replace('\n', newline);
    }

    let (css, mappings) = extract_traces(&css, &tokens.traces);
    Collated { css, mappings }
}

/// Wrap boilerplate text in a comment block, one ` * ` line each
pub fn boilerplate_comment(text: &str, version: &str) -> String {
    let text = text.replace("{{version}}", version);
    let mut out = String::from("/*!\n");
    for line in text.trim_end().lines() {
        if line.trim().is_empty() {
            out.push_str(" *\n");
        } else {
            out.push_str(&format!(" * {}\n", line.trim_end()));
        }
    }
    out.push_str(" */");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{parse_declarations, Rule};
    use crate::selector::Selector;

    fn table_with(tokens: &mut TokenTable, rules: &[(&str, &str)]) -> (RuleTable, Vec<String>) {
        let mut table = RuleTable::default();
        let labels = rules
            .iter()
            .map(|(selector, body)| {
                let mut rule = Rule::new("", vec![Selector::new(*selector)]);
                rule.declarations = parse_declarations(body);
                table.add(rule, tokens)
            })
            .collect();
        (table, labels)
    }

    #[test]
    fn test_parse_nodes() {
        let nodes = parse_nodes("@import url(x);?r1? @media print{?r2?}?c3?");
        assert_eq!(
            nodes,
            vec![
                Node::Statement("@import url(x)".into()),
                Node::Rule("?r1?".into()),
                Node::Block {
                    head: "@media print".into(),
                    children: vec![Node::Rule("?r2?".into())]
                },
                Node::Comment("?c3?".into()),
            ]
        );
    }

    #[test]
    fn test_minified_output_prunes_empty_blocks() {
        let mut tokens = TokenTable::new();
        let (rules, labels) = table_with(&mut tokens, &[(".a", "color:red"), (".b", "")]);
        let stream = format!(
            "{} @media  screen and (max-width: 10px) {{ {} }} @define x 1;",
            labels[0], labels[1]
        );
        let out = collate(&stream, &rules, &mut tokens, &Options::default(), None, None);
        assert_eq!(out.css, ".a{color:red}");
    }

    #[test]
    fn test_pretty_output() {
        let mut tokens = TokenTable::new();
        let (rules, labels) = table_with(&mut tokens, &[(".a", "color:red"), ("p", "margin:0")]);
        let stream = format!("{}@media print{{{}}}", labels[0], labels[1]);
        let out = collate(&stream, &rules, &mut tokens, &Options::pretty(), None, None);
        assert_eq!(
            out.css,
            ".a {\n    color: red;\n}\n\n@media print {\n    p {\n        margin: 0;\n    }\n}\n"
        );
    }

    #[test]
    fn test_preserved_comments_charset_and_newlines() {
        let mut tokens = TokenTable::new();
        let keep = tokens.add_comment("/*! keep */");
        let drop = tokens.add_comment("/* drop */");
        let charset = tokens.add_string("\"UTF-8\"");
        let (rules, labels) = table_with(&mut tokens, &[(".a", "b:c")]);
        let options = Options {
            newlines: crate::types::Newlines::Windows,
            ..Default::default()
        };
        let stream = format!("{}{}{}", keep, drop, labels[0]);
        let out = collate(&stream, &rules, &mut tokens, &options, Some(&charset), None);
        assert_eq!(out.css, "@charset \"UTF-8\";\r\n/*! keep */\r\n.a{b:c}");
    }

    #[test]
    fn test_boilerplate_comment() {
        assert_eq!(
            boilerplate_comment("Built by v{{version}}\n\nok", "1.0"),
            "/*!\n * Built by v1.0\n *\n * ok\n */"
        );
    }

    #[test]
    fn test_directive_detection() {
        assert!(is_directive("@define x 1"));
        assert!(is_directive("@in .a"));
        assert!(!is_directive("@import url(x)"));
        assert!(!is_directive("@include x"));
    }
}
