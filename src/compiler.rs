//! Shared compiler configuration and the string/file entry points

use crate::aliases::AliasTables;
use crate::cache::{CacheRecord, CacheStore};
use crate::codegen::boilerplate_comment;
use crate::error::{CrushError, Diagnostic, Level, Result};
use crate::filesystem::{FileSystem, LocalFs};
use crate::functions::{CustomFunction, FunctionRegistry};
use crate::importer::ImportRecord;
use crate::plugins::{Plugin, PluginRegistry};
use crate::process::Process;
use crate::sourcemap::{mapping_url_comment, SourceMap};
use crate::types::{Boilerplate, Options, DEFAULT_OUTPUT_SUFFIX};
use crate::url::{normalize_path, relative_path, to_slash};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_BOILERPLATE: &str = "Generated by cssforge v{{version}}";

/// Statistics selected by the `trace` option
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_count: Option<usize>,
    /// Seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vars: Option<IndexMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

/// Result of one compilation run
#[derive(Debug, Clone, Default)]
pub struct Compilation {
    /// Compiled CSS; empty when the host source was rejected
    pub css: String,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: Stats,
    pub source_map: Option<SourceMap>,
    pub imports: Vec<ImportRecord>,
}

impl Compilation {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.level == Level::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.level == Level::Warning)
    }
}

/// Result of a file-mode run
#[derive(Debug, Clone)]
pub struct FileOutput {
    pub output_path: PathBuf,
    /// Path for stylesheet links, with `?mtime` when versioning
    pub public_path: String,
    /// `None` when the cached output was reused
    pub compilation: Option<Compilation>,
}

/// Read-only configuration shared by compilation runs
pub struct Compiler {
    pub fs: Arc<dyn FileSystem>,
    /// Lowest-precedence variables, overridden by in-file and runtime ones
    pub globals: IndexMap<String, String>,
    pub aliases: AliasTables,
    pub functions: FunctionRegistry,
    pub plugins: PluginRegistry,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("globals", &self.globals)
            .field("functions", &self.functions)
            .field("plugins", &self.plugins)
            .finish()
    }
}

impl Compiler {
    pub fn new() -> Self {
        let aliases = AliasTables::builtin().unwrap_or_else(|e| {
            log::error!("Built-in alias table rejected: {}", e);
            AliasTables::default()
        });
        Self {
            fs: Arc::new(LocalFs),
            globals: IndexMap::new(),
            aliases,
            functions: FunctionRegistry::with_builtins(),
            plugins: PluginRegistry::with_builtins(),
        }
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_aliases(mut self, aliases: AliasTables) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.globals.insert(name.into(), value.into());
    }

    pub fn register_function(&mut self, name: &str, function: CustomFunction) {
        self.functions.register(name, function);
    }

    pub fn register_plugin(&mut self, plugin: Plugin) {
        self.plugins.register(plugin);
    }

    /// Compile CSS text. Imports resolve against the current directory.
    pub fn compile_string(&self, source: &str, options: &Options) -> Compilation {
        self.run(source, "stdin", None, Path::new("."), options, "stdin.css")
    }

    /// Compile a file and write its output. Returns the public path of the
    /// output, or an empty string on failure.
    pub fn compile_file(&self, input: impl AsRef<Path>, options: &Options) -> String {
        match self.compile_file_with_output(input.as_ref(), options) {
            Ok(output) => output.public_path,
            Err(e) => {
                log::error!("{}", e);
                String::new()
            }
        }
    }

    pub fn compile_file_with_output(&self, input: &Path, options: &Options) -> Result<FileOutput> {
        let input = normalize_path(input);
        if !self.fs.exists(&input) || self.fs.is_dir(&input) {
            return Err(CrushError::FileNotFound {
                path: input.display().to_string(),
            });
        }
        let input_dir = input.parent().map(Path::to_path_buf).unwrap_or_default();
        let output_dir = options
            .output_dir
            .as_ref()
            .map(|dir| normalize_path(dir))
            .unwrap_or_else(|| input_dir.clone());
        let output_name = output_file_name(&input, options);
        let output_path = output_dir.join(&output_name);

        let mut cache = CacheStore::load(self.fs.as_ref(), &output_dir);
        if options.cache && cache.is_fresh(self.fs.as_ref(), &output_name, &output_path, options) {
            log::info!("{} is up to date", output_path.display());
            return Ok(FileOutput {
                public_path: self.public_path(&output_path, options),
                output_path,
                compilation: None,
            });
        }

        let source = self.fs.read(&input)?;
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.display().to_string());
        let mut compilation = self.run(&source, &name, Some(&input), &input_dir, options, &output_name);
        if compilation.css.is_empty() && compilation.has_errors() {
            let reason = compilation
                .diagnostics
                .iter()
                .find(|d| d.level == Level::Error)
                .map(|d| d.to_string())
                .unwrap_or_default();
            return Err(CrushError::InvalidFormat {
                message: format!("Could not compile {}: {}", input.display(), reason),
            });
        }

        if let Some(map) = &compilation.source_map {
            let map_name = format!("{}.map", output_name);
            self.fs.write(&output_dir.join(&map_name), &map.to_json()?)?;
            if !compilation.css.is_empty() && !compilation.css.ends_with('\n') {
                compilation.css.push('\n');
            }
            compilation.css.push_str(&mapping_url_comment(&map_name));
        }
        self.fs.write(&output_path, &compilation.css)?;
        log::info!("Wrote {} ({} bytes)", output_path.display(), compilation.css.len());

        if options.cache {
            let mut files = vec![input.clone()];
            files.extend(compilation.imports.iter().map(|record| record.path.clone()));
            cache.insert(output_name, CacheRecord::new(files, self.fs.as_ref(), options));
            if let Err(e) = cache.save(self.fs.as_ref()) {
                log::warn!("Cache not saved: {}", e);
            }
        }

        Ok(FileOutput {
            public_path: self.public_path(&output_path, options),
            output_path,
            compilation: Some(compilation),
        })
    }

    /// Compile a file without writing anything
    pub fn check_file(&self, input: &Path, options: &Options) -> Result<Compilation> {
        let input = normalize_path(input);
        let source = self.fs.read(&input).map_err(|e| CrushError::FileNotFound {
            path: format!("{}: {}", input.display(), e),
        })?;
        let dir = input.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = input.display().to_string();
        let output_name = output_file_name(&input, options);
        Ok(self.run(&source, &name, Some(&input), &dir, options, &output_name))
    }

    fn run(
        &self,
        source: &str,
        name: &str,
        path: Option<&Path>,
        dir: &Path,
        options: &Options,
        output_name: &str,
    ) -> Compilation {
        let mut process = Process::new(self, options.clone());
        let boilerplate = self.boilerplate(options, dir, &mut process);
        let collated = process.compile(source, name, path, dir, boilerplate.as_deref());

        let mut compilation = Compilation {
            diagnostics: std::mem::take(&mut process.diagnostics),
            stats: std::mem::take(&mut process.stats),
            imports: std::mem::take(&mut process.imports),
            ..Default::default()
        };
        if let Some(collated) = collated {
            if options.source_map {
                let sources = std::mem::take(&mut process.sources);
                compilation.source_map = Some(SourceMap::new(output_name, sources, &collated.mappings));
            }
            compilation.css = collated.css;
        }
        compilation
    }

    fn boilerplate(&self, options: &Options, dir: &Path, process: &mut Process) -> Option<String> {
        let text = match &options.boilerplate {
            Boilerplate::Enabled(false) => return None,
            Boilerplate::Enabled(true) => DEFAULT_BOILERPLATE.to_string(),
            Boilerplate::Template(path) => {
                let path = if path.is_absolute() { path.clone() } else { dir.join(path) };
                match self.fs.read(&path) {
                    Ok(text) => text,
                    Err(e) => {
                        process.report(Diagnostic::warning(format!(
                            "Boilerplate {} not readable: {}",
                            path.display(),
                            e
                        )));
                        return None;
                    }
                }
            }
        };
        Some(boilerplate_comment(&text, crate::VERSION))
    }

    /// Doc-root relative URL of `output` when it lies under the doc root
    fn public_path(&self, output: &Path, options: &Options) -> String {
        let mut public = match &options.doc_root {
            Some(root) if output.starts_with(normalize_path(root)) => {
                format!("/{}", to_slash(&relative_path(&normalize_path(root), output)))
            }
            _ => output.display().to_string(),
        };
        if options.versioning {
            if let Some(mtime) = self.fs.mtime(output) {
                public.push_str(&format!("?{}", mtime));
            }
        }
        public
    }
}

/// `output_file` when set, otherwise `<stem>.compiled.css`
pub fn output_file_name(input: &Path, options: &Options) -> String {
    match &options.output_file {
        Some(name) => name.clone(),
        None => {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "output".to_string());
            format!("{}.{}", stem, DEFAULT_OUTPUT_SUFFIX)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::MemoryFs;
    use crate::types::VendorTarget;
    use tempfile::TempDir;

    fn memory_compiler(files: &[(&str, &str, u64)]) -> (Compiler, Arc<MemoryFs>) {
        let fs = Arc::new(MemoryFs::new());
        for (path, contents, mtime) in files {
            fs.insert(*path, *contents, *mtime);
        }
        (Compiler::new().with_file_system(fs.clone()), fs)
    }

    fn plain() -> Options {
        Options {
            vendor_target: VendorTarget::None,
            versioning: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_compile_string() {
        let compiler = Compiler::new();
        let result = compiler.compile_string("@define c red; .a { color: var(c) }", &plain());
        assert_eq!(result.css, ".a{color:red}");
        assert!(!result.has_errors());
    }

    #[test]
    fn test_globals_are_lowest_precedence() {
        let mut compiler = Compiler::new();
        compiler.set_global("c", "blue");
        compiler.set_global("d", "green");
        let result = compiler.compile_string("@define c red; .a{color:var(c);background:var(d)}", &plain());
        assert_eq!(result.css, ".a{color:red;background:green}");
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name(Path::new("/a/site.css"), &plain()), "site.compiled.css");
        let options = Options {
            output_file: Some("out.css".to_string()),
            ..plain()
        };
        assert_eq!(output_file_name(Path::new("/a/site.css"), &options), "out.css");
    }

    #[test]
    fn test_compile_file_writes_output_and_cache() {
        let (compiler, fs) = memory_compiler(&[
            ("/site/css/main.css", "@import \"a.css\"; .m{x:y}", 3),
            ("/site/css/a.css", ".a{x:y}", 4),
        ]);
        let options = Options {
            doc_root: Some(PathBuf::from("/site")),
            ..plain()
        };
        let public = compiler.compile_file("/site/css/main.css", &options);
        assert_eq!(public, "/css/main.compiled.css");
        assert_eq!(fs.read(Path::new("/site/css/main.compiled.css")).unwrap(), ".a{x:y}.m{x:y}");

        let store = CacheStore::load(fs.as_ref(), Path::new("/site/css"));
        let record = store.get("main.compiled.css").unwrap();
        assert_eq!(record.imports.len(), 2);
        assert_eq!(record.datem_sum, 7);
    }

    #[test]
    fn test_cached_output_is_reused() {
        let (compiler, fs) = memory_compiler(&[("/css/main.css", ".a{x:y}", 3)]);
        let output = compiler.compile_file_with_output(Path::new("/css/main.css"), &plain()).unwrap();
        assert!(output.compilation.is_some());

        let again = compiler.compile_file_with_output(Path::new("/css/main.css"), &plain()).unwrap();
        assert!(again.compilation.is_none());

        fs.insert("/css/main.css", ".b{x:y}", 9);
        let changed = compiler.compile_file_with_output(Path::new("/css/main.css"), &plain()).unwrap();
        assert!(changed.compilation.is_some());
        assert_eq!(fs.read(Path::new("/css/main.compiled.css")).unwrap(), ".b{x:y}");
    }

    #[test]
    fn test_broken_import_is_left_out_of_cache() {
        let (compiler, fs) = memory_compiler(&[
            ("/css/main.css", "@import 'bad.css'; @import 'ok.css';", 1),
            ("/css/bad.css", ".x{", 1),
            ("/css/ok.css", ".ok{a:b}", 1),
        ]);
        let output = compiler.compile_file_with_output(Path::new("/css/main.css"), &plain()).unwrap();
        let compilation = output.compilation.unwrap();
        assert_eq!(compilation.css, ".ok{a:b}");
        assert_eq!(compilation.warnings().count(), 1);

        let store = CacheStore::load(fs.as_ref(), Path::new("/css"));
        let imports = &store.get("main.compiled.css").unwrap().imports;
        assert_eq!(imports, &vec![PathBuf::from("/css/main.css"), PathBuf::from("/css/ok.css")]);
    }

    #[test]
    fn test_missing_input_gives_empty_path() {
        let (compiler, _) = memory_compiler(&[]);
        assert_eq!(compiler.compile_file("/css/none.css", &plain()), "");
    }

    #[test]
    fn test_versioning_and_boilerplate() {
        let (compiler, fs) = memory_compiler(&[("/css/main.css", ".a{x:y}", 3)]);
        let options = Options {
            versioning: true,
            boilerplate: Boilerplate::Enabled(true),
            ..plain()
        };
        let public = compiler.compile_file("/css/main.css", &options);
        assert_eq!(public, "/css/main.compiled.css?1");
        let css = fs.read(Path::new("/css/main.compiled.css")).unwrap();
        assert!(css.starts_with("/*!\n * Generated by cssforge v"));
        assert!(css.ends_with(" */\n.a{x:y}"));
    }

    #[test]
    fn test_source_map_is_written_next_to_output() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("main.css");
        std::fs::write(&input, ".a{x:y}\n.b{x:z}").unwrap();
        let options = Options {
            source_map: true,
            ..plain()
        };
        let compiler = Compiler::new();
        let output = compiler.compile_file_with_output(&input, &options).unwrap();

        let css = std::fs::read_to_string(&output.output_path).unwrap();
        assert!(css.ends_with("/*# sourceMappingURL=main.compiled.css.map */"));
        let map_path = temp_dir.path().join("main.compiled.css.map");
        let map = SourceMap::from_json(&std::fs::read_to_string(map_path).unwrap()).unwrap();
        assert_eq!(map.file, "main.compiled.css");
        assert_eq!(map.sources, vec!["main.css"]);
        let mappings = map.decode().unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[1].original_line, 1);
    }
}
