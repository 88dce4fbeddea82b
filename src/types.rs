//! Core constants and compilation options

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// Recursion and iteration guards
pub const MAX_IMPORT_DEPTH: usize = 32;
pub const MAX_LOOP_ITERATIONS: usize = 10_000;
pub const MAX_VARIABLE_PASSES: usize = 20;
pub const MAX_FRAGMENT_DEPTH: usize = 16;
pub const MAX_MIXIN_ARGS: usize = 256;
pub const MAX_SELECTOR_EXPANSION: usize = 1024;

/// Suffix appended to the input stem when no output file name is given
pub const DEFAULT_OUTPUT_SUFFIX: &str = "compiled.css";

/// Name of the cache-metadata file written next to compiled outputs
pub const CACHE_FILE_NAME: &str = ".cssforge-cache.json";

/// Vendor prefixes recognised when splitting a property or function name
pub const KNOWN_VENDORS: &[&str] = &["webkit", "moz", "ms", "o", "khtml", "epub", "apple"];

/// Which vendor-prefixed variants the output should carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VendorTarget {
    All,
    None,
    Vendor(String),
}

impl VendorTarget {
    /// Whether a declaration tagged with `vendor` survives this target.
    ///
    /// Only a single-vendor build prunes; `none` just disables aliasing.
    pub fn allows(&self, vendor: Option<&str>) -> bool {
        match (self, vendor) {
            (VendorTarget::Vendor(target), Some(vendor)) => target == vendor,
            _ => true,
        }
    }

    /// Whether alias tables are consulted at all
    pub fn aliases_enabled(&self) -> bool {
        *self != VendorTarget::None
    }
}

impl Default for VendorTarget {
    fn default() -> Self {
        VendorTarget::All
    }
}

impl From<String> for VendorTarget {
    fn from(value: String) -> Self {
        let value = value.trim().trim_matches('-').to_ascii_lowercase();
        match value.as_str() {
            "" | "all" => VendorTarget::All,
            "none" => VendorTarget::None,
            _ => VendorTarget::Vendor(value),
        }
    }
}

impl From<VendorTarget> for String {
    fn from(value: VendorTarget) -> Self {
        value.to_string()
    }
}

impl fmt::Display for VendorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VendorTarget::All => write!(f, "all"),
            VendorTarget::None => write!(f, "none"),
            VendorTarget::Vendor(name) => write!(f, "{}", name),
        }
    }
}

/// How relative URLs inside imported files are rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RewriteUrlsRepr", into = "RewriteUrlsRepr")]
pub enum RewriteUrls {
    Off,
    Relative,
    Absolute,
}

impl Default for RewriteUrls {
    fn default() -> Self {
        RewriteUrls::Relative
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RewriteUrlsRepr {
    Flag(bool),
    Mode(String),
}

impl TryFrom<RewriteUrlsRepr> for RewriteUrls {
    type Error = String;

    fn try_from(value: RewriteUrlsRepr) -> std::result::Result<Self, Self::Error> {
        match value {
            RewriteUrlsRepr::Flag(true) => Ok(RewriteUrls::Relative),
            RewriteUrlsRepr::Flag(false) => Ok(RewriteUrls::Off),
            RewriteUrlsRepr::Mode(mode) => match mode.as_str() {
                "absolute" => Ok(RewriteUrls::Absolute),
                "relative" | "true" => Ok(RewriteUrls::Relative),
                "false" | "off" => Ok(RewriteUrls::Off),
                other => Err(format!("Unknown rewrite_import_urls mode '{}'", other)),
            },
        }
    }
}

impl From<RewriteUrls> for RewriteUrlsRepr {
    fn from(value: RewriteUrls) -> Self {
        match value {
            RewriteUrls::Off => RewriteUrlsRepr::Flag(false),
            RewriteUrls::Relative => RewriteUrlsRepr::Flag(true),
            RewriteUrls::Absolute => RewriteUrlsRepr::Mode("absolute".to_string()),
        }
    }
}

/// Boilerplate comment prepended to the output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Boilerplate {
    Enabled(bool),
    Template(PathBuf),
}

impl Default for Boilerplate {
    fn default() -> Self {
        Boilerplate::Enabled(false)
    }
}

/// Line-ending style of the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Newlines {
    Unix,
    Windows,
    Platform,
}

impl Default for Newlines {
    fn default() -> Self {
        Newlines::Unix
    }
}

impl Newlines {
    pub fn as_str(&self) -> &'static str {
        match self {
            Newlines::Unix => "\n",
            Newlines::Windows => "\r\n",
            Newlines::Platform => {
                if cfg!(windows) {
                    "\r\n"
                } else {
                    "\n"
                }
            }
        }
    }
}

/// Compilation options and settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Strip whitespace and decruft numeric values
    pub minify: bool,

    /// Also rewrite colors to their shortest form
    pub advanced_minify: bool,

    /// Append the output modification time to returned file paths
    pub versioning: bool,

    /// Prepend a boilerplate comment (built-in text or a template file)
    pub boilerplate: Boilerplate,

    /// Runtime variable overrides, highest precedence
    pub vars: IndexMap<String, String>,

    /// Skip recompilation when sources and options are unchanged
    pub cache: bool,

    /// Output file name (file mode only)
    pub output_file: Option<String>,

    /// Output directory (file mode only), defaults to the input directory
    pub output_dir: Option<PathBuf>,

    /// Root used when rewriting imported URLs in absolute mode
    pub doc_root: Option<PathBuf>,

    /// Vendor-prefixed variants to emit
    pub vendor_target: VendorTarget,

    /// Rewriting policy for URLs inside imported files
    pub rewrite_import_urls: RewriteUrls,

    /// Plugins to enable
    pub enable: Vec<String>,

    /// Plugins to disable, wins over `enable`
    pub disable: Vec<String>,

    /// Statistics to record
    pub trace: Vec<String>,

    /// Output line endings
    pub newlines: Newlines,

    /// Emit a source map next to file-mode output
    pub source_map: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            minify: true,
            advanced_minify: false,
            versioning: true,
            boilerplate: Boilerplate::default(),
            vars: IndexMap::new(),
            cache: true,
            output_file: None,
            output_dir: None,
            doc_root: None,
            vendor_target: VendorTarget::All,
            rewrite_import_urls: RewriteUrls::Relative,
            enable: Vec::new(),
            disable: Vec::new(),
            trace: Vec::new(),
            newlines: Newlines::Unix,
            source_map: false,
        }
    }
}

impl Options {
    /// Options producing readable, unprefixed output
    pub fn pretty() -> Self {
        Self {
            minify: false,
            ..Default::default()
        }
    }

    pub fn plugin_enabled(&self, name: &str) -> bool {
        self.enable.iter().any(|n| n == name) && !self.disable.iter().any(|n| n == name)
    }

    pub fn traces(&self, stat: &str) -> bool {
        self.trace.iter().any(|s| s == stat || s == "all")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_target_parsing() {
        assert_eq!(VendorTarget::from("all".to_string()), VendorTarget::All);
        assert_eq!(VendorTarget::from("none".to_string()), VendorTarget::None);
        assert_eq!(
            VendorTarget::from("-webkit-".to_string()),
            VendorTarget::Vendor("webkit".to_string())
        );
    }

    #[test]
    fn test_vendor_target_allows() {
        let target = VendorTarget::Vendor("moz".to_string());
        assert!(target.allows(None));
        assert!(target.allows(Some("moz")));
        assert!(!target.allows(Some("webkit")));
        assert!(VendorTarget::None.allows(Some("moz")));
        assert!(!VendorTarget::None.aliases_enabled());
    }

    #[test]
    fn test_options_from_json() {
        let json = r#"{
            "minify": false,
            "vendor_target": "webkit",
            "rewrite_import_urls": "absolute",
            "boilerplate": "header.txt",
            "vars": { "brand": "red" }
        }"#;
        let options: Options = serde_json::from_str(json).unwrap();
        assert!(!options.minify);
        assert_eq!(options.vendor_target, VendorTarget::Vendor("webkit".to_string()));
        assert_eq!(options.rewrite_import_urls, RewriteUrls::Absolute);
        assert_eq!(options.boilerplate, Boilerplate::Template(PathBuf::from("header.txt")));
        assert_eq!(options.vars.get("brand").map(String::as_str), Some("red"));
        assert!(options.cache);
    }

    #[test]
    fn test_options_from_toml() {
        let options: Options = toml::from_str("minify = true\nrewrite_import_urls = false\nboilerplate = true\n").unwrap();
        assert_eq!(options.rewrite_import_urls, RewriteUrls::Off);
        assert_eq!(options.boilerplate, Boilerplate::Enabled(true));
    }

    #[test]
    fn test_plugin_enabled_respects_disable() {
        let options = Options {
            enable: vec!["rem".to_string(), "property-sorter".to_string()],
            disable: vec!["rem".to_string()],
            ..Default::default()
        };
        assert!(!options.plugin_enabled("rem"));
        assert!(options.plugin_enabled("property-sorter"));
    }
}
