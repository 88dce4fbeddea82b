//! Per-run compilation state and the pipeline that drives it

use crate::aliases::{alias_at_rules, alias_rule, AliasTables};
use crate::codegen::{collate, Collated};
use crate::compiler::{Compiler, Stats};
use crate::error::{Diagnostic, Level};
use crate::extend::resolve_extends;
use crate::functions::FunctionContext;
use crate::importer::{self, ImportRecord};
use crate::mixins::{self, MixinScope, Template};
use crate::optimizer::Optimizer;
use crate::parser;
use crate::plugins::{HookContext, HookPoint};
use crate::rule::RuleTable;
use crate::selector::BUILTIN_SELECTOR_ALIASES;
use crate::stream::Stream;
use crate::tokens::TokenTable;
use crate::types::Options;
use crate::variables;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

static CHARSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@charset\s*(\?s\d+\?)\s*;").unwrap());

/// Everything one compilation run owns. Created per run and dropped with
/// its token table at the end.
pub struct Process<'c> {
    pub compiler: &'c Compiler,
    pub options: Options,
    /// Alias tables reduced to the vendor target of this run
    pub aliases: AliasTables,
    pub tokens: TokenTable,
    pub stream: Stream,
    /// Display names of the inlined files, host first; indices match traces
    pub sources: Vec<String>,
    pub imports: Vec<ImportRecord>,
    pub variables: IndexMap<String, String>,
    pub settings: IndexMap<String, String>,
    pub mixins: IndexMap<String, Template>,
    pub fragments: IndexMap<String, Template>,
    pub selector_aliases: IndexMap<String, String>,
    pub rules: RuleTable,
    /// Readable selectors produced by `@in` blocks mapped to their parent
    pub in_parents: HashMap<String, String>,
    /// String label of the first `@charset`
    pub charset: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: Stats,
}

impl<'c> Process<'c> {
    pub fn new(compiler: &'c Compiler, options: Options) -> Self {
        let aliases = compiler.aliases.for_target(&options.vendor_target);
        let selector_aliases = BUILTIN_SELECTOR_ALIASES
            .iter()
            .map(|(name, expansion)| (name.to_string(), expansion.to_string()))
            .collect();
        Self {
            compiler,
            options,
            aliases,
            tokens: TokenTable::new(),
            stream: Stream::default(),
            sources: Vec::new(),
            imports: Vec::new(),
            variables: IndexMap::new(),
            settings: IndexMap::new(),
            mixins: IndexMap::new(),
            fragments: IndexMap::new(),
            selector_aliases,
            rules: RuleTable::default(),
            in_parents: HashMap::new(),
            charset: None,
            diagnostics: Vec::new(),
            stats: Stats::default(),
        }
    }

    /// Log a diagnostic and keep it for the caller
    pub fn report(&mut self, diagnostic: Diagnostic) {
        match diagnostic.level {
            Level::Error => log::error!("{}", diagnostic),
            Level::Warning => log::warn!("{}", diagnostic),
            Level::Notice => log::info!("{}", diagnostic),
        }
        self.diagnostics.push(diagnostic);
    }

    fn report_warnings(&mut self, warnings: Vec<String>) {
        for warning in warnings {
            self.report(Diagnostic::warning(warning));
        }
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.level == Level::Error)
    }

    /// Clone the rule behind `label` for an at-rule copy prefixed for
    /// `vendor`; the clone keeps only declarations that suit the vendor
    pub fn clone_rule_for_vendor(&mut self, label: &str, vendor: &str) -> Option<String> {
        let mut clone = self.rules.get(label)?.clone();
        clone.vendor_context = Some(vendor.to_string());
        clone.retain_vendor(vendor);
        Some(self.rules.add_unreferenced(clone, &mut self.tokens))
    }

    fn run_stream_hooks(&mut self, point: HookPoint) {
        let ctx = HookContext {
            settings: &self.settings,
            options: &self.options,
        };
        let compiler = self.compiler;
        compiler.plugins.run_stream(point, &mut self.stream, &ctx);
    }

    /// Run the whole pipeline on `source`. `None` means the host file was
    /// rejected; the reason is in the diagnostics.
    pub fn compile(
        &mut self,
        source: &str,
        name: &str,
        path: Option<&Path>,
        dir: &Path,
        boilerplate: Option<&str>,
    ) -> Option<Collated> {
        let start = Instant::now();

        log::debug!("Phase 1: flattening imports of {}", name);
        let flattened = importer::flatten(self, source, name, path, dir)?;
        self.stream = Stream::new(flattened);
        self.extract_charset();
        self.run_stream_hooks(HookPoint::CapturePhase1);

        log::debug!("Phase 2: variables");
        let in_file = variables::capture(self);
        variables::merge(self, in_file);
        variables::resolve(self);
        variables::apply_conditionals(self);
        variables::apply(self);
        self.run_stream_hooks(HookPoint::CapturePhase2);

        log::debug!("Phase 3: mixins and fragments");
        mixins::capture_mixins(self);
        mixins::capture_fragments(self);
        self.expand_fragments();

        log::debug!("Phase 4: rules");
        parser::capture_selector_aliases(self);
        parser::capture_abstracts(self);
        parser::flatten_in_blocks(self);
        parser::parse_rules(self);
        self.process_rules();
        alias_at_rules(self);
        resolve_extends(&mut self.rules.list, &self.rules.references);

        log::debug!("Phase 5: collation");
        if self.options.minify {
            let mut optimizer = Optimizer::new();
            optimizer.optimize(&mut self.rules.list, self.options.advanced_minify);
        }
        self.record_stats(start);
        let charset = self.charset.clone();
        Some(collate(
            self.stream.as_str(),
            &self.rules,
            &mut self.tokens,
            &self.options,
            charset.as_deref(),
            boilerplate,
        ))
    }

    /// Remove every `@charset`, keeping the first one for the output
    fn extract_charset(&mut self) {
        let charset = &mut self.charset;
        self.stream.replace_with(&CHARSET_RE, |caps: &Captures| {
            if charset.is_none() {
                *charset = Some(caps[1].to_string());
            }
            String::new()
        });
    }

    fn expand_fragments(&mut self) {
        let mut warnings = Vec::new();
        let expanded = mixins::expand_fragments(
            self.stream.as_str(),
            &self.fragments,
            &mut Vec::new(),
            &mut warnings,
        );
        self.stream.set(expanded);
        self.report_warnings(warnings);
    }

    /// Per-rule processing in document order
    fn process_rules(&mut self) {
        let compiler = self.compiler;
        let plugins = &compiler.plugins;
        let functions = &compiler.functions;

        for index in 0..self.rules.list.len() {
            let mut rule = std::mem::take(&mut self.rules.list[index]);
            let mut warnings = Vec::new();

            let scope = MixinScope {
                mixins: &self.mixins,
                rules: &self.rules.list,
                references: &self.rules.references,
                index,
            };
            let declarations = std::mem::take(&mut rule.declarations);
            rule.declarations = scope.flatten(declarations, &mut Vec::new(), &mut warnings);
            parser::extract_directives(&mut rule);

            let ctx = HookContext {
                settings: &self.settings,
                options: &self.options,
            };
            plugins.run_rule(HookPoint::RulePreprocess, &mut rule, &ctx);

            for i in 0..rule.declarations.len() {
                if !rule.declarations[i].value.contains('(') {
                    continue;
                }
                let value = rule.declarations[i].value.clone();
                let property = rule.declarations[i].property.clone();
                let evaluated = {
                    let mut fctx = FunctionContext {
                        rule: &rule,
                        rules: &self.rules.list,
                        references: &self.rules.references,
                        index,
                        property: &property,
                        warnings: Vec::new(),
                    };
                    let evaluated = functions.evaluate(&value, &mut fctx);
                    warnings.append(&mut fctx.warnings);
                    evaluated
                };
                if evaluated != value {
                    rule.declarations[i].set_value(&evaluated);
                }
            }

            plugins.run_rule(HookPoint::RulePrealias, &mut rule, &ctx);
            alias_rule(&mut rule, &self.aliases);
            plugins.run_rule(HookPoint::RulePostalias, &mut rule, &ctx);

            let target = &self.options.vendor_target;
            rule.declarations.retain(|d| target.allows(d.vendor.as_deref()));
            if let Some(vendor) = rule.vendor_context.clone() {
                rule.retain_vendor(&vendor);
            }
            plugins.run_rule(HookPoint::RulePostprocess, &mut rule, &ctx);

            self.rules.list[index] = rule;
            self.rules.register(index);
            self.report_warnings(warnings);
        }
        log::debug!("Processed {} rules", self.rules.len());
    }

    fn record_stats(&mut self, start: Instant) {
        let emitted: Vec<_> = self.rules.list.iter().filter(|r| r.should_emit()).collect();
        let mut stats = Stats::default();
        if self.options.traces("selector_count") {
            stats.selector_count = Some(emitted.iter().map(|r| r.printable_selectors().len()).sum());
        }
        if self.options.traces("rule_count") {
            stats.rule_count = Some(emitted.len());
        }
        if self.options.traces("vars") {
            stats.vars = Some(self.variables.clone());
        }
        if self.options.traces("errors") {
            stats.errors = Some(
                self.diagnostics
                    .iter()
                    .filter(|d| d.level == Level::Error)
                    .map(|d| d.to_string())
                    .collect(),
            );
        }
        if self.options.traces("warnings") {
            stats.warnings = Some(
                self.diagnostics
                    .iter()
                    .filter(|d| d.level == Level::Warning)
                    .map(|d| d.to_string())
                    .collect(),
            );
        }
        if self.options.traces("compile_time") {
            stats.compile_time = Some(start.elapsed().as_secs_f64());
        }
        self.stats = stats;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VendorTarget;

    fn compile(source: &str, options: Options) -> (String, Vec<Diagnostic>) {
        let compiler = Compiler::new();
        let mut process = Process::new(&compiler, options);
        let css = process
            .compile(source, "main.css", None, Path::new("/"), None)
            .map(|c| c.css)
            .unwrap_or_default();
        (css, process.diagnostics)
    }

    fn plain() -> Options {
        Options {
            vendor_target: VendorTarget::None,
            ..Default::default()
        }
    }

    #[test]
    fn test_define_and_runtime_override() {
        let (css, _) = compile("@define X 1px; .a{w:var(X)}", plain());
        assert_eq!(css, ".a{w:1px}");

        let mut options = plain();
        options.vars.insert("X".to_string(), "2px".to_string());
        let (css, _) = compile("@define X 1px; .a{w:var(X)}", options);
        assert_eq!(css, ".a{w:2px}");
    }

    #[test]
    fn test_extends() {
        let (css, _) = compile(".a{color:red}.b{extends:.a, .missing}", plain());
        assert_eq!(css, ".a,.b{color:red}");
    }

    #[test]
    fn test_extends_target_defined_later() {
        let (css, _) = compile(".b { extends: .a; }\n.a{color:red}", plain());
        assert_eq!(css, ".a,.b{color:red}");
    }

    #[test]
    fn test_extends_same_target_with_pseudo() {
        let (css, _) = compile(".a{color:red}.b{extends:.a, .a:hover}", plain());
        assert_eq!(css, ".a,.b,.b:hover{color:red}");
    }

    #[test]
    fn test_mixins_and_functions() {
        let source = "@mixin pad { padding: arg(0, 2px); }\n\
                      .a { mixin: pad(4px); width: math(10 * 2, px); height: this(width); }";
        let (css, _) = compile(source, plain());
        assert_eq!(css, ".a{padding:4px;width:20px;height:20px}");
    }

    #[test]
    fn test_query_parent_of_in_block() {
        let source = ".nav{color:#fff}@in .nav{a{color:query(parent)}}";
        let (css, _) = compile(source, plain());
        assert_eq!(css, ".nav{color:#fff}.nav a{color:#fff}");
    }

    #[test]
    fn test_fragments_and_abstracts() {
        let source = "@fragment box { .box-arg(0) { width: arg(1, 1px) } }\n\
                      @fragment box(a, 5px);\n\
                      @abstract base { margin: 0 }\n\
                      .c { extends: base }";
        let (css, _) = compile(source, plain());
        assert_eq!(css, ".box-a{width:5px}.c{margin:0}");
    }

    #[test]
    fn test_abstract_followed_by_rule() {
        let (css, _) = compile("@abstract base { margin: 0 } .c { extends: base; color: red }", plain());
        assert_eq!(css, ".c{margin:0}.c{color:red}");
        assert!(!css.contains('?'));
    }

    #[test]
    fn test_huge_arg_index_warns() {
        let (css, diagnostics) = compile("@mixin m { width: arg(4000000000); } .a{mixin: m(1px)}", plain());
        assert_eq!(css, ".a{width:arg(4000000000)}");
        assert!(diagnostics.iter().any(|d| d.message.contains("4000000000")));
    }

    #[test]
    fn test_calc_with_nested_parens_is_kept() {
        let (css, _) = compile(".a{width:calc((100% - 10px) / 3)}", plain());
        assert_eq!(css, ".a{width:calc((100% - 10px) / 3)}");
    }

    #[test]
    fn test_ifdefine() {
        let source = "@define on 1; @ifdefine on { .a{b:c} } @ifdefine not on { .d{e:f} }";
        let (css, _) = compile(source, plain());
        assert_eq!(css, ".a{b:c}");
    }

    #[test]
    fn test_property_aliases_all_vendors() {
        let (css, _) = compile(".a{user-select:none}", Options::default());
        assert!(css.starts_with(".a{-webkit-user-select:none;"));
        assert!(css.ends_with("user-select:none}"));
    }

    #[test]
    fn test_single_vendor_target_prunes_other_prefixes() {
        let options = Options {
            vendor_target: VendorTarget::Vendor("moz".to_string()),
            ..Default::default()
        };
        let (css, _) = compile(".a{-webkit-box-sizing:border-box;-moz-box-sizing:border-box}", options);
        assert_eq!(css, ".a{-moz-box-sizing:border-box}");
    }

    #[test]
    fn test_keyframes_are_cloned_per_vendor() {
        let options = Options {
            vendor_target: VendorTarget::Vendor("webkit".to_string()),
            ..Default::default()
        };
        let (css, _) = compile("@keyframes spin{to{opacity:0}}", options);
        assert_eq!(css, "@-webkit-keyframes spin{to{opacity:0}}@keyframes spin{to{opacity:0}}");
    }

    #[test]
    fn test_charset_and_strings_survive() {
        let (css, _) = compile(
            "@charset \"UTF-8\";\n.a{content:\"{;}\"}@charset \"latin1\";",
            plain(),
        );
        assert_eq!(css, "@charset \"UTF-8\";\n.a{content:\"{;}\"}");
    }

    #[test]
    fn test_minify_is_idempotent() {
        let source = ".a { margin: 0px 0px; color: #FFFFFF }\n@media print { .b { padding: 0.5em } }";
        let (once, _) = compile(source, plain());
        let (twice, _) = compile(&once, plain());
        assert_eq!(once, ".a{margin:0;color:#fff}@media print{.b{padding:.5em}}");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_recompiling_aliased_output_is_stable() {
        let source = ".a { background: linear-gradient(to bottom, red, blue); user-select: none; display: flex }";
        let (once, _) = compile(source, Options::default());
        let (twice, _) = compile(&once, Options::default());
        assert_eq!(once.matches("-webkit-linear-gradient").count(), 1);
        assert!(once.contains("-webkit-user-select:none"));
        assert!(once.contains("display:-webkit-box"));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_pretty_round_trip_of_plain_css() {
        let source = "a:hover,\nb > i {\n    color: red;\n}\n\n@media print {\n    p {\n        margin: 0;\n    }\n}\n";
        let options = Options {
            minify: false,
            vendor_target: VendorTarget::None,
            ..Default::default()
        };
        let (css, _) = compile(source, options);
        assert_eq!(css, source);
    }

    #[test]
    fn test_unbalanced_host_gives_empty_output() {
        let (css, diagnostics) = compile(".a{", plain());
        assert!(css.is_empty());
        assert_eq!(diagnostics[0].level, Level::Error);
    }

    #[test]
    fn test_stats_follow_trace_option() {
        let compiler = Compiler::new();
        let options = Options {
            trace: vec!["rule_count".to_string(), "selector_count".to_string()],
            ..plain()
        };
        let mut process = Process::new(&compiler, options);
        process.compile(".a,.b{x:y}.c{}", "main.css", None, Path::new("/"), None);
        assert_eq!(process.stats.rule_count, Some(1));
        assert_eq!(process.stats.selector_count, Some(2));
        assert!(process.stats.compile_time.is_none());
    }
}
