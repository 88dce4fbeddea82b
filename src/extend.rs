//! Extend resolution: rules that extend others lend them their selectors

use crate::rule::{ExtendArg, Rule};
use crate::selector::{readable, Selector};
use std::collections::{HashMap, HashSet};

/// A resolved ancestor edge: rule index plus pseudo suffix for the lent selectors
type Edge = (usize, Option<String>);

pub struct ExtendResolver {
    direct: Vec<Vec<Edge>>,
    resolution_cache: HashMap<usize, Vec<Edge>>,
}

impl ExtendResolver {
    /// Phase one: resolve every rule's `extends:` arguments to rule indices.
    /// Missing targets and self references are dropped.
    pub fn new(rules: &[Rule], references: &HashMap<String, usize>) -> Self {
        let direct = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                rule.extend_args
                    .iter()
                    .filter_map(|arg| {
                        let edge = lookup(arg, references);
                        if edge.is_none() {
                            log::debug!("Extend target '{}' not found, ignored", arg.target);
                        }
                        edge
                    })
                    .filter(|(target, _)| *target != index)
                    .collect()
            })
            .collect();
        Self {
            direct,
            resolution_cache: HashMap::new(),
        }
    }

    /// All ancestors of `index`, transitively. Each (ancestor, pseudo) pair
    /// is reached once, so one target can be lent under several pseudos.
    pub fn ancestors(&mut self, index: usize) -> Vec<Edge> {
        if let Some(cached) = self.resolution_cache.get(&index) {
            return cached.clone();
        }
        let max_depth = self.direct.len();
        let mut visited: HashSet<Edge> = HashSet::from([(index, None)]);
        let mut result = Vec::new();
        let mut stack: Vec<(Edge, usize)> = self
            .direct
            .get(index)
            .map(|edges| edges.iter().rev().map(|edge| (edge.clone(), 1)).collect())
            .unwrap_or_default();

        while let Some(((target, pseudo), depth)) = stack.pop() {
            // A path longer than the rule count is going round a cycle
            if target == index || depth > max_depth || !visited.insert((target, pseudo.clone())) {
                continue;
            }
            result.push((target, pseudo.clone()));
            if let Some(next) = self.direct.get(target) {
                for (ancestor, more) in next.iter().rev() {
                    let combined = match (&pseudo, more) {
                        (None, None) => None,
                        (a, b) => Some(format!(
                            "{}{}",
                            a.as_deref().unwrap_or(""),
                            b.as_deref().unwrap_or("")
                        )),
                    };
                    stack.push(((*ancestor, combined), depth + 1));
                }
            }
        }

        self.resolution_cache.insert(index, result.clone());
        result
    }

    /// Phase two: add each rule's selectors to all of its ancestors
    pub fn apply(&mut self, rules: &mut [Rule]) {
        for index in 0..rules.len() {
            let edges = self.ancestors(index);
            if edges.is_empty() {
                continue;
            }
            let own: Vec<Selector> = if rules[index].is_abstract {
                Vec::new()
            } else {
                rules[index].selectors.clone()
            };
            for (ancestor, pseudo) in edges {
                let lent: Vec<Selector> = match &pseudo {
                    Some(pseudo) => own.iter().map(|s| s.with_pseudo(pseudo)).collect(),
                    None => own.clone(),
                };
                rules[ancestor].add_extend_selectors(&lent);
            }
        }
    }
}

/// Resolve one argument. `.a:hover` targets a `.a:hover` rule when there
/// is one, otherwise `.a` with `:hover` appended to the lent selectors.
fn lookup(arg: &ExtendArg, references: &HashMap<String, usize>) -> Option<Edge> {
    if let Some(&index) = references.get(&arg.target) {
        return Some((index, arg.pseudo.clone()));
    }
    let pos = arg.target.rfind(':').filter(|&p| p > 0)?;
    let base = &arg.target[..pos];
    if base.ends_with(':') {
        return None;
    }
    let pseudo = format!("{}{}", &arg.target[pos..], arg.pseudo.as_deref().unwrap_or(""));
    references.get(base).map(|&index| (index, Some(pseudo)))
}

/// Parse one `extends:` item
pub fn parse_extend_arg(item: &str) -> ExtendArg {
    ExtendArg {
        target: readable(item),
        pseudo: None,
    }
}

/// Resolve all extends in one go
pub fn resolve_extends(rules: &mut [Rule], references: &HashMap<String, usize>) {
    let mut resolver = ExtendResolver::new(rules, references);
    resolver.apply(rules);
}
