//! Vendor alias tables and the aliasing passes applied to rules

use crate::error::{CrushError, Result};
use crate::process::Process;
use crate::rule::{split_vendor, Rule};
use crate::stream::{find_block, match_from, Pair};
use crate::tokens::RULE_RE;
use crate::types::{VendorTarget, MAX_LOOP_ITERATIONS};
use indexmap::{IndexMap, IndexSet};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// The alias tables shipped with the crate
pub const BUILTIN_ALIASES: &str = include_str!("aliases.toml");

/// Parallel find/replace lists applied to the arguments of an aliased call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindReplace {
    pub find: Vec<String>,
    pub replace: Vec<String>,
}

impl FindReplace {
    /// Apply all pairs in a single left-to-right scan, so a replacement is
    /// never rewritten by a later pair
    pub fn apply(&self, text: &str) -> String {
        let lower = text.to_ascii_lowercase();
        let mut out = String::with_capacity(text.len());
        let mut i = 0;
        'scan: while i < text.len() {
            for (find, replace) in self.find.iter().zip(self.replace.iter()) {
                if !find.is_empty() && lower[i..].starts_with(&find.to_ascii_lowercase()) {
                    out.push_str(replace);
                    i += find.len();
                    continue 'scan;
                }
            }
            let ch_len = text[i..].chars().next().map_or(1, char::len_utf8);
            out.push_str(&text[i..i + ch_len]);
            i += ch_len;
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionGroup {
    pub members: Vec<String>,
    pub vendors: IndexMap<String, FindReplace>,
}

/// One replacement declaration for a property/value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationAlias {
    pub property: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
}

impl DeclarationAlias {
    fn vendor(&self) -> Option<String> {
        self.vendor
            .clone()
            .or_else(|| split_vendor(&self.value).0)
            .or_else(|| split_vendor(&self.property).0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasTables {
    pub properties: IndexMap<String, Vec<String>>,
    pub functions: IndexMap<String, Vec<String>>,
    pub function_groups: IndexMap<String, FunctionGroup>,
    pub declarations: IndexMap<String, IndexMap<String, Vec<DeclarationAlias>>>,
    pub at_rules: IndexMap<String, Vec<String>>,
}

fn alias_vendor(alias: &str) -> Option<String> {
    split_vendor(alias).0
}

impl AliasTables {
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_ALIASES)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CrushError::config(format!("Invalid alias table: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Tables reduced to what `target` asks for
    pub fn for_target(&self, target: &VendorTarget) -> Self {
        if !target.aliases_enabled() {
            return Self::default();
        }
        let vendor = match target {
            VendorTarget::Vendor(vendor) => vendor.as_str(),
            _ => return self.clone(),
        };
        let keep = |aliases: &Vec<String>| -> Vec<String> {
            aliases
                .iter()
                .filter(|a| alias_vendor(a).as_deref() == Some(vendor))
                .cloned()
                .collect()
        };
        let filter_names = |table: &IndexMap<String, Vec<String>>| -> IndexMap<String, Vec<String>> {
            table
                .iter()
                .map(|(name, aliases)| (name.clone(), keep(aliases)))
                .filter(|(_, aliases)| !aliases.is_empty())
                .collect()
        };

        Self {
            properties: filter_names(&self.properties),
            functions: filter_names(&self.functions),
            function_groups: self
                .function_groups
                .iter()
                .map(|(id, group)| {
                    let mut group = group.clone();
                    group.vendors.retain(|v, _| v == vendor);
                    (id.clone(), group)
                })
                .collect(),
            declarations: self
                .declarations
                .iter()
                .map(|(property, values)| {
                    let values = values
                        .iter()
                        .map(|(value, list)| {
                            let list: Vec<DeclarationAlias> = list
                                .iter()
                                .filter(|a| a.vendor().as_deref() == Some(vendor))
                                .cloned()
                                .collect();
                            (value.clone(), list)
                        })
                        .filter(|(_, list)| !list.is_empty())
                        .collect();
                    (property.clone(), values)
                })
                .collect(),
            at_rules: self
                .at_rules
                .iter()
                .filter(|(_, vendors)| vendors.iter().any(|v| v == vendor))
                .map(|(name, _)| (name.clone(), vec![vendor.to_string()]))
                .collect(),
        }
    }

    /// Argument rewrites for `function` when aliased for `vendor`
    pub fn rewrite_for(&self, function: &str, vendor: &str) -> Option<&FindReplace> {
        self.function_groups
            .values()
            .find(|group| group.members.iter().any(|m| m == function))
            .and_then(|group| group.vendors.get(vendor))
    }

    fn function_alias(&self, function: &str, vendor: &str) -> Option<&String> {
        self.functions
            .get(function)?
            .iter()
            .find(|alias| alias_vendor(alias).as_deref() == Some(vendor))
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
            && self.functions.is_empty()
            && self.declarations.is_empty()
            && self.at_rules.is_empty()
    }
}

/// Insert prefixed copies of each aliasable property before the standard form
pub fn alias_properties(rule: &mut Rule, tables: &AliasTables) {
    if tables.properties.is_empty() {
        return;
    }
    let existing: HashSet<String> = rule
        .declarations
        .iter()
        .map(|d| d.property.to_ascii_lowercase())
        .collect();
    let mut out = Vec::with_capacity(rule.declarations.len());
    for declaration in std::mem::take(&mut rule.declarations) {
        if declaration.vendor.is_none() {
            if let Some(aliases) = tables.properties.get(&declaration.canonical_property) {
                for alias in aliases.iter().filter(|a| !existing.contains(*a)) {
                    out.push(declaration.variant(alias, &declaration.value, None));
                }
            }
        }
        out.push(declaration);
    }
    rule.declarations = out;
}

/// Rename calls to `name(` as `alias(`, rewriting their arguments
pub fn replace_function(
    value: &str,
    name: &str,
    alias: &str,
    rewrite: Option<&FindReplace>,
) -> String {
    let lower = value.to_ascii_lowercase();
    let needle = format!("{}(", name.to_ascii_lowercase());
    let mut out = String::with_capacity(value.len() + alias.len());
    let mut last = 0;
    let mut search = 0;

    while let Some(found) = lower[search..].find(&needle) {
        let start = search + found;
        let part_of_name = start > 0 && {
            let prev = lower.as_bytes()[start - 1];
            prev.is_ascii_alphanumeric() || prev == b'-' || prev == b'_'
        };
        if part_of_name {
            search = start + needle.len();
            continue;
        }
        let Some(block) = match_from(value.as_bytes(), start + name.len(), Pair::Parens) else {
            break;
        };
        let args = &value[block.inner()];
        out.push_str(&value[last..start]);
        out.push_str(alias);
        out.push('(');
        match rewrite {
            Some(rewrite) => out.push_str(&rewrite.apply(args)),
            None => out.push_str(args),
        }
        out.push(')');
        last = block.end;
        search = block.end;
    }
    out.push_str(&value[last..]);
    out
}

/// Clone unprefixed declarations once per vendor that has an alias for a
/// called function; rewrite prefixed declarations in place
pub fn alias_functions(rule: &mut Rule, tables: &AliasTables) {
    if tables.functions.is_empty() {
        return;
    }
    let existing: HashSet<(String, String)> = rule
        .declarations
        .iter()
        .map(|d| (d.property.to_ascii_lowercase(), d.value.to_ascii_lowercase()))
        .collect();
    let mut out = Vec::with_capacity(rule.declarations.len());
    for mut declaration in std::mem::take(&mut rule.declarations) {
        let aliasable: Vec<String> = declaration
            .functions
            .iter()
            .filter(|f| tables.functions.contains_key(*f))
            .cloned()
            .collect();
        if aliasable.is_empty() {
            out.push(declaration);
            continue;
        }

        let rewrite_for_vendor = |value: &str, vendor: &str| -> String {
            aliasable.iter().fold(value.to_string(), |value, function| {
                match tables.function_alias(function, vendor) {
                    Some(alias) => replace_function(
                        &value,
                        function,
                        alias,
                        tables.rewrite_for(function, vendor),
                    ),
                    None => value,
                }
            })
        };

        match declaration.vendor.clone() {
            Some(vendor) => {
                let value = rewrite_for_vendor(&declaration.value, &vendor);
                declaration.set_value(&value);
            }
            None => {
                let vendors: IndexSet<String> = aliasable
                    .iter()
                    .flat_map(|f| tables.functions[f].iter())
                    .filter_map(|alias| alias_vendor(alias))
                    .collect();
                for vendor in vendors {
                    let value = rewrite_for_vendor(&declaration.value, &vendor);
                    let key = (declaration.property.to_ascii_lowercase(), value.to_ascii_lowercase());
                    if existing.contains(&key) {
                        continue;
                    }
                    let mut clone = declaration.clone();
                    clone.set_value(&value);
                    clone.vendor = Some(vendor);
                    out.push(clone);
                }
            }
        }
        out.push(declaration);
    }
    rule.declarations = out;
}

/// Insert whole-declaration replacements (`display: flex` and friends)
pub fn alias_declarations(rule: &mut Rule, tables: &AliasTables) {
    if tables.declarations.is_empty() {
        return;
    }
    let existing: HashSet<(String, String)> = rule
        .declarations
        .iter()
        .map(|d| (d.property.to_ascii_lowercase(), d.value.to_ascii_lowercase()))
        .collect();
    let mut out = Vec::with_capacity(rule.declarations.len());
    for declaration in std::mem::take(&mut rule.declarations) {
        let aliases = declaration
            .vendor
            .is_none()
            .then(|| tables.declarations.get(&declaration.canonical_property))
            .flatten()
            .and_then(|values| values.get(&declaration.value.to_ascii_lowercase()));
        if let Some(aliases) = aliases {
            for alias in aliases {
                let key = (alias.property.to_ascii_lowercase(), alias.value.to_ascii_lowercase());
                if !existing.contains(&key) {
                    let vendor = alias.vendor();
                    out.push(declaration.variant(&alias.property, &alias.value, vendor.as_deref()));
                }
            }
        }
        out.push(declaration);
    }
    rule.declarations = out;
}

/// Run the three declaration-level aliasing passes in order
pub fn alias_rule(rule: &mut Rule, tables: &AliasTables) {
    alias_properties(rule, tables);
    alias_functions(rule, tables);
    alias_declarations(rule, tables);
}

/// Clone aliasable at-rule blocks (`@keyframes`) once per vendor, placing
/// the prefixed copies before the original. Rules inside each copy are
/// cloned with a vendor context and pruned to that vendor.
pub fn alias_at_rules(process: &mut Process) {
    if process.aliases.at_rules.is_empty() {
        return;
    }
    let names: Vec<String> = process
        .aliases
        .at_rules
        .keys()
        .map(|name| regex::escape(name))
        .collect();
    let Ok(pattern) = Regex::new(&format!(r"(?i)@({})\b([^{{;]*)\{{", names.join("|"))) else {
        return;
    };

    let mut offset = 0;
    for _ in 0..MAX_LOOP_ITERATIONS {
        let Some(caps) = pattern.captures_at(process.stream.as_str(), offset) else {
            return;
        };
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        let name = caps[1].to_ascii_lowercase();
        let prelude = caps[2].trim_end().to_string();
        let Some(block) = find_block(process.stream.as_str(), whole.end - 1, Pair::Braces) else {
            offset = whole.end;
            continue;
        };
        let body = process.stream.slice(block.inner()).to_string();
        let vendors = process.aliases.at_rules.get(&name).cloned().unwrap_or_default();

        let mut clones = String::new();
        for vendor in vendors {
            let cloned_body = RULE_RE.replace_all(&body, |caps: &Captures| {
                match process.clone_rule_for_vendor(&caps[0], &vendor) {
                    Some(label) => label,
                    None => caps[0].to_string(),
                }
            });
            clones.push_str(&format!("@-{}-{}{}{{{}}}", vendor, name, prelude, cloned_body));
        }
        log::debug!("Aliased @{} block at offset {}", name, whole.start);
        process.stream.splice(whole.start..whole.start, &clones);
        offset = block.end + clones.len();
    }
    log::warn!("At-rule aliasing hit the iteration cap");
}
