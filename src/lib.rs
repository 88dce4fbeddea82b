//! CSS Forge
//!
//! A CSS-to-CSS compiler. Sources may use variables, mixins, fragments,
//! conditional blocks, vendor aliasing, custom functions, selector
//! combinators and rule inheritance; the output is standard CSS,
//! optionally minified, with an optional source map.
//!
//! # Basic Usage
//!
//! ```rust
//! use cssforge::{compile_string, Options, VendorTarget};
//!
//! let options = Options {
//!     vendor_target: VendorTarget::None,
//!     ..Default::default()
//! };
//! let result = compile_string("@define accent #c00; .a { color: var(accent) }", &options);
//! assert_eq!(result.css, ".a{color:#c00}");
//! ```
//!
//! # Compilation Pipeline
//!
//! 1. **Phase 1**: Importer - Capture comments, strings and URLs, inline `@import`s
//! 2. **Phase 2**: Variables - `@define`, `@settings`, `@ifdefine`, substitution
//! 3. **Phase 3**: Mixins and fragments - Capture templates and expand calls
//! 4. **Phase 4**: Rules - Parse rules, run functions, alias, resolve extends
//! 5. **Phase 5**: Collation - Decruft, render, restore tokens, source map

pub mod types;
pub mod error;
pub mod tokens;
pub mod stream;
pub mod url;
pub mod filesystem;

pub mod importer;
pub mod variables;
pub mod functions;
pub mod color;
pub mod mixins;
pub mod selector;
pub mod rule;
pub mod parser;
pub mod aliases;
pub mod extend;
pub mod optimizer;
pub mod codegen;
pub mod sourcemap;
pub mod plugins;
pub mod process;
pub mod compiler;
pub mod cache;
pub mod html;
pub mod cli;

use std::path::Path;

// Re-export commonly used types and functions
pub use error::{CrushError, Diagnostic, Level, Location, Result};
pub use types::*;
pub use filesystem::{FileSystem, LocalFs, MemoryFs};
pub use compiler::{Compilation, Compiler, FileOutput, Stats};
pub use process::Process;
pub use rule::{Declaration, Rule};
pub use selector::Selector;
pub use aliases::AliasTables;
pub use functions::{CustomFunction, FunctionContext, FunctionRegistry};
pub use plugins::{HookContext, HookPoint, Plugin, PluginRegistry};
pub use optimizer::{OptimizationStats, Optimizer};
pub use sourcemap::{Mapping, SourceMap};
pub use html::{inline_tag, link_tag, string_tag, Attributes};
pub use cli::ForgeCli;

/// Compiler version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Compiler build information
pub const BUILD_INFO: CompilerInfo = CompilerInfo {
    version: VERSION,
    name: NAME,
    description: DESCRIPTION,
    supported_features: &[
        "imports",
        "variables",
        "conditionals",
        "mixins",
        "fragments",
        "extends",
        "vendor-aliases",
        "functions",
        "source-maps",
        "plugins",
    ],
};

#[derive(Debug, Clone)]
pub struct CompilerInfo {
    pub version: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub supported_features: &'static [&'static str],
}

/// Compile CSS text with a default [`Compiler`]
pub fn compile_string(source: &str, options: &Options) -> Compilation {
    Compiler::new().compile_string(source, options)
}

/// Compile a file with a default [`Compiler`]; returns the public path of
/// the output or an empty string on failure
pub fn compile_file(input: impl AsRef<Path>, options: &Options) -> String {
    Compiler::new().compile_file(input, options)
}

/// Compile a file, returning where the output went
pub fn compile_file_with_options(input: impl AsRef<Path>, options: &Options) -> Result<FileOutput> {
    Compiler::new().compile_file_with_output(input.as_ref(), options)
}
