// FILE: src/cli/handlers.rs
use crate::aliases::AliasTables;
use crate::compiler::{Compilation, Compiler};
use crate::error::{CrushError, Level, Result};
use crate::types::{Options, VendorTarget};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::Instant;

// --- COMPILE ---
pub fn handle_compile_command(cli: &super::ForgeCli, matches: &clap::ArgMatches) -> Result<()> {
    let input_path = required(matches, "input")?;
    let options = cli.build_options(matches)?;
    let compiler = Compiler::new();

    if matches.get_flag("watch") {
        watch_and_compile(&compiler, input_path, options)
    } else {
        compile_single_file(&compiler, input_path, &options, matches.get_flag("stats"))
    }
}

fn required<'a>(matches: &'a clap::ArgMatches, id: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .ok_or_else(|| CrushError::config(format!("Missing argument <{}>", id)))
}

fn compile_single_file(compiler: &Compiler, input_path: &str, options: &Options, show_stats: bool) -> Result<()> {
    println!("Compiling {}", input_path);

    let compile_start = Instant::now();
    let output = compiler.compile_file_with_output(Path::new(input_path), options)?;
    let compile_time = compile_start.elapsed();

    match &output.compilation {
        None => println!("Up to date: {}", output.public_path),
        Some(compilation) => {
            print_diagnostics(input_path, compilation);
            println!("Wrote {}", output.output_path.display());
            println!("   Output: {} bytes", compilation.css.len());
            println!("   Time: {}ms", compile_time.as_millis());
            if show_stats {
                print_stats(compilation)?;
            }
        }
    }
    Ok(())
}

fn print_diagnostics(input_path: &str, compilation: &Compilation) {
    for diagnostic in &compilation.diagnostics {
        eprintln!("{}: {}", input_path, diagnostic);
    }
}

fn print_stats(compilation: &Compilation) -> Result<()> {
    let json = serde_json::to_string_pretty(&compilation.stats).map_err(|e| CrushError::InvalidFormat {
        message: format!("JSON serialization error: {}", e),
    })?;
    println!("{}", json);
    Ok(())
}

/// Files to watch: the input and everything it imported last time
fn watched_files(input: &Path, compilation: Option<&Compilation>) -> Vec<PathBuf> {
    let mut files = vec![input.to_path_buf()];
    if let Some(compilation) = compilation {
        files.extend(compilation.imports.iter().map(|record| record.path.clone()));
    }
    files
}

fn watch_and_compile(compiler: &Compiler, input_path: &str, mut options: Options) -> Result<()> {
    println!("Watching {} for changes...", input_path);
    options.cache = false;
    let input = Path::new(input_path);

    let (tx, rx) = channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                if let Err(e) = tx.send(event) {
                    eprintln!("Watch error: {}", e);
                }
            }
        },
        notify::Config::default(),
    )
    .map_err(|e| CrushError::Io(std::io::Error::new(std::io::ErrorKind::Other, format!("Failed to create file watcher: {}", e))))?;

    let mut watching: Vec<PathBuf> = Vec::new();
    let mut rewatch = |watcher: &mut RecommendedWatcher, files: Vec<PathBuf>| -> Result<()> {
        for path in watching.drain(..) {
            let _ = watcher.unwatch(&path);
        }
        for path in files {
            watcher
                .watch(&path, RecursiveMode::NonRecursive)
                .map_err(|e| CrushError::Io(std::io::Error::new(std::io::ErrorKind::Other, format!("Failed to watch {}: {}", path.display(), e))))?;
            watching.push(path);
        }
        Ok(())
    };

    let compilation = match compiler.compile_file_with_output(input, &options) {
        Ok(output) => {
            println!("Initial compilation successful");
            output.compilation
        }
        Err(e) => {
            eprintln!("Initial compilation failed: {}", e);
            None
        }
    };
    rewatch(&mut watcher, watched_files(input, compilation.as_ref()))?;

    loop {
        match rx.recv() {
            Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                println!("File changed, recompiling...");
                let start = Instant::now();
                match compiler.compile_file_with_output(input, &options) {
                    Ok(output) => {
                        if let Some(compilation) = &output.compilation {
                            print_diagnostics(input_path, compilation);
                            println!(
                                "Recompiled successfully ({} bytes, {}ms)",
                                compilation.css.len(),
                                start.elapsed().as_millis()
                            );
                        }
                        rewatch(&mut watcher, watched_files(input, output.compilation.as_ref()))?;
                    }
                    Err(e) => eprintln!("Compilation failed: {}", e),
                }
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("Watch error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

// --- CHECK ---
pub fn handle_check_command(cli: &super::ForgeCli, matches: &clap::ArgMatches) -> Result<()> {
    let input_path = required(matches, "input")?;
    let recursive = matches.get_flag("recursive");
    let mut options = cli.config.clone().unwrap_or_default();
    if let Some(vendor) = matches.get_one::<String>("vendor") {
        options.vendor_target = VendorTarget::from(vendor.clone());
    }
    let compiler = Compiler::new();

    if recursive && Path::new(input_path).is_dir() {
        check_directory_recursive(&compiler, input_path, &options)
    } else {
        check_single_file(&compiler, Path::new(input_path), &options).map(|_| ())
    }
}

/// Returns whether the file compiled without errors
fn check_single_file(compiler: &Compiler, input: &Path, options: &Options) -> Result<bool> {
    let compilation = compiler.check_file(input, options)?;
    let errors = compilation.diagnostics.iter().filter(|d| d.level == Level::Error).count();
    let warnings = compilation.warnings().count();
    print_diagnostics(&input.display().to_string(), &compilation);
    if errors == 0 && warnings == 0 {
        println!("{} - No issues found", input.display());
    } else {
        println!("{} - {} errors, {} warnings", input.display(), errors, warnings);
    }
    Ok(errors == 0)
}

fn is_output_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.ends_with(crate::types::DEFAULT_OUTPUT_SUFFIX))
}

fn check_directory_recursive(compiler: &Compiler, dir_path: &str, options: &Options) -> Result<()> {
    let mut total_files = 0;
    let mut error_files = 0;

    for entry in walkdir::WalkDir::new(dir_path) {
        let entry = entry.map_err(|e| {
            CrushError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Directory traversal error: {}", e),
            ))
        })?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path.extension().map_or(false, |ext| ext == "css")
            && !is_output_file(path)
        {
            total_files += 1;
            match check_single_file(compiler, path, options) {
                Ok(true) => {}
                Ok(false) => error_files += 1,
                Err(e) => {
                    println!("{} - {}", path.display(), e);
                    error_files += 1;
                }
            }
        }
    }

    println!("\nCheck Summary:");
    println!("   Total files: {}", total_files);
    println!("   Files with errors: {}", error_files);

    if error_files > 0 {
        Err(CrushError::InvalidFormat {
            message: format!("{} files have errors", error_files),
        })
    } else {
        Ok(())
    }
}

// --- ALIASES ---
pub fn handle_aliases_command(matches: &clap::ArgMatches) -> Result<()> {
    let tables = match matches.get_one::<String>("file") {
        Some(file) => AliasTables::load(Path::new(file))?,
        None => AliasTables::builtin()?,
    };
    let target = matches
        .get_one::<String>("vendor")
        .map(|v| VendorTarget::from(v.clone()))
        .unwrap_or_default();
    let json = serde_json::to_string_pretty(&tables.for_target(&target)).map_err(|e| CrushError::InvalidFormat {
        message: format!("JSON serialization error: {}", e),
    })?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_directory() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("ok.css"), ".a{x:y}").unwrap();
        std::fs::write(temp_dir.path().join("ok.compiled.css"), ".a{").unwrap();
        let compiler = Compiler::new();
        let dir = temp_dir.path().to_str().unwrap();
        assert!(check_directory_recursive(&compiler, dir, &Options::default()).is_ok());

        std::fs::write(temp_dir.path().join("bad.css"), ".b{").unwrap();
        assert!(check_directory_recursive(&compiler, dir, &Options::default()).is_err());
    }

    #[test]
    fn test_watched_files_include_imports() {
        let temp_dir = TempDir::new().unwrap();
        let main = temp_dir.path().join("main.css");
        std::fs::write(&main, "@import 'a.css'; .m{x:y}").unwrap();
        std::fs::write(temp_dir.path().join("a.css"), ".a{x:y}").unwrap();
        let compilation = Compiler::new().check_file(&main, &Options::default()).unwrap();
        let files = watched_files(&main, Some(&compilation));
        assert_eq!(files.len(), 2);
        assert!(files[1].ends_with("a.css"));
    }
}
