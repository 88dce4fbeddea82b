//! Plugin registry and the built-in plugins
//!
//! A plugin is a named set of callbacks attached to [`HookPoint`]s. Rule
//! hooks see one rule at a time; capture hooks see the whole stream.

use crate::rule::{Declaration, Rule};
use crate::stream::Stream;
use crate::types::Options;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::fmt;
use std::sync::Arc;

static REM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^\w.?-])(-?\d*\.?\d+)rem\b").unwrap());

/// Default root font size for the `rem` plugin
pub const DEFAULT_REM_BASE: f64 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// After comments, strings and URLs are captured
    CapturePhase1,
    /// After variables are substituted, before mixins and rules
    CapturePhase2,
    RulePreprocess,
    RulePrealias,
    RulePostalias,
    RulePostprocess,
}

impl HookPoint {
    pub fn is_rule_hook(&self) -> bool {
        !matches!(self, HookPoint::CapturePhase1 | HookPoint::CapturePhase2)
    }
}

/// Read-only state handed to callbacks
pub struct HookContext<'a> {
    pub settings: &'a IndexMap<String, String>,
    pub options: &'a Options,
}

impl HookContext<'_> {
    pub fn setting(&self, name: &str) -> Option<&str> {
        self.settings.get(name).map(String::as_str)
    }
}

pub type RuleHook = Arc<dyn Fn(&mut Rule, &HookContext) + Send + Sync>;
pub type StreamHook = Arc<dyn Fn(&mut Stream, &HookContext) + Send + Sync>;

#[derive(Clone)]
pub enum Callback {
    Rule(RuleHook),
    Stream(StreamHook),
}

#[derive(Clone)]
pub struct Plugin {
    pub name: String,
    pub description: String,
    hooks: Vec<(HookPoint, Callback)>,
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let points: Vec<HookPoint> = self.hooks.iter().map(|(point, _)| *point).collect();
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("hooks", &points)
            .finish()
    }
}

impl Plugin {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            hooks: Vec::new(),
        }
    }

    pub fn on_rule<F>(mut self, point: HookPoint, callback: F) -> Self
    where
        F: Fn(&mut Rule, &HookContext) + Send + Sync + 'static,
    {
        self.hooks.push((point, Callback::Rule(Arc::new(callback))));
        self
    }

    pub fn on_stream<F>(mut self, point: HookPoint, callback: F) -> Self
    where
        F: Fn(&mut Stream, &HookContext) + Send + Sync + 'static,
    {
        self.hooks.push((point, Callback::Stream(Arc::new(callback))));
        self
    }

    pub fn hook_points(&self) -> impl Iterator<Item = HookPoint> + '_ {
        self.hooks.iter().map(|(point, _)| *point)
    }
}

#[derive(Debug, Clone)]
pub struct PluginRegistry {
    plugins: IndexMap<String, Plugin>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl PluginRegistry {
    pub fn empty() -> Self {
        Self {
            plugins: IndexMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(rem_plugin());
        registry.register(property_sorter_plugin());
        registry
    }

    pub fn register(&mut self, plugin: Plugin) {
        log::debug!("Registered plugin '{}'", plugin.name);
        self.plugins.insert(plugin.name.clone(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<&Plugin> {
        self.plugins.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    fn enabled<'a>(&'a self, options: &'a Options) -> impl Iterator<Item = &'a Plugin> + 'a {
        self.plugins
            .values()
            .filter(move |plugin| options.plugin_enabled(&plugin.name))
    }

    /// Run the rule callbacks registered at `point` by enabled plugins
    pub fn run_rule(&self, point: HookPoint, rule: &mut Rule, ctx: &HookContext) {
        for plugin in self.enabled(ctx.options) {
            for (at, callback) in &plugin.hooks {
                if let (true, Callback::Rule(callback)) = (*at == point, callback) {
                    callback(rule, ctx);
                }
            }
        }
    }

    /// Run the stream callbacks registered at `point` by enabled plugins
    pub fn run_stream(&self, point: HookPoint, stream: &mut Stream, ctx: &HookContext) {
        for plugin in self.enabled(ctx.options) {
            for (at, callback) in &plugin.hooks {
                if let (true, Callback::Stream(callback)) = (*at == point, callback) {
                    callback(stream, ctx);
                }
            }
        }
    }
}

/// Replace every `rem` length in `value` with its pixel equivalent
pub fn rem_to_px(value: &str, base: f64) -> String {
    REM_RE
        .replace_all(value, |caps: &Captures| {
            let px = caps[2].parse::<f64>().map(|n| n * base).unwrap_or(0.0);
            format!("{}{}px", &caps[1], crate::functions::format_number(px))
        })
        .into_owned()
}

/// `rem`: insert a pixel fallback before declarations that use `rem`.
/// The base comes from the `rem-base` setting.
pub fn rem_plugin() -> Plugin {
    Plugin::new("rem", "Pixel fallbacks for rem lengths").on_rule(
        HookPoint::RulePostalias,
        |rule, ctx| {
            let base = ctx
                .setting("rem-base")
                .and_then(|b| b.trim().trim_end_matches("px").parse::<f64>().ok())
                .unwrap_or(DEFAULT_REM_BASE);
            let mut out: Vec<Declaration> = Vec::with_capacity(rule.declarations.len());
            for declaration in std::mem::take(&mut rule.declarations) {
                if REM_RE.is_match(&declaration.value) {
                    let fallback = rem_to_px(&declaration.value, base);
                    let duplicate = out
                        .last()
                        .map_or(false, |d| d.property == declaration.property && d.value == fallback);
                    if !duplicate {
                        let mut px = declaration.clone();
                        px.set_value(&fallback);
                        px.important = declaration.important;
                        out.push(px);
                    }
                }
                out.push(declaration);
            }
            rule.declarations = out;
        },
    )
}

const PROPERTY_ORDER: &[&str] = &[
    "content", "quotes", "display", "visibility", "position", "z-index", "top", "right", "bottom",
    "left", "box-sizing", "flex", "flex-direction", "flex-wrap", "flex-grow", "flex-shrink",
    "flex-basis", "justify-content", "align-items", "align-content", "align-self", "order",
    "float", "clear", "overflow", "overflow-x", "overflow-y", "width", "min-width", "max-width",
    "height", "min-height", "max-height", "margin", "margin-top", "margin-right", "margin-bottom",
    "margin-left", "padding", "padding-top", "padding-right", "padding-bottom", "padding-left",
    "border", "border-width", "border-style", "border-color", "border-top", "border-right",
    "border-bottom", "border-left", "border-radius", "outline", "table-layout", "border-collapse",
    "border-spacing", "list-style", "font", "font-family", "font-size", "font-weight",
    "font-style", "line-height", "letter-spacing", "text-align", "text-decoration",
    "text-indent", "text-transform", "white-space", "word-wrap", "color", "background",
    "background-color", "background-image", "background-repeat", "background-position",
    "background-size", "box-shadow", "opacity", "transform", "transition", "animation", "cursor",
];

fn sort_key(declaration: &Declaration) -> (usize, String, bool) {
    let rank = PROPERTY_ORDER
        .iter()
        .position(|p| *p == declaration.canonical_property)
        .unwrap_or(PROPERTY_ORDER.len());
    let name = if rank == PROPERTY_ORDER.len() {
        declaration.canonical_property.clone()
    } else {
        String::new()
    };
    (rank, name, declaration.vendor.is_none())
}

/// `property-sorter`: order declarations by a fixed property list; prefixed
/// variants stay before their standard form
pub fn property_sorter_plugin() -> Plugin {
    Plugin::new("property-sorter", "Sort declarations in a fixed order").on_rule(
        HookPoint::RulePostalias,
        |rule, _| rule.declarations.sort_by_cached_key(sort_key),
    )
}
