// FILE: src/cli/mod.rs

mod config;
mod handlers;

use crate::error::{CrushError, Result};
use crate::types::{Boilerplate, Newlines, Options, VendorTarget};
use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ArgMatches, Command, ValueEnum};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone, ValueEnum)]
pub enum LineEndings {
    Unix,
    Windows,
    Platform,
}

pub struct ForgeCli {
    config: Option<Options>,
    start_time: Instant,
}

impl Default for ForgeCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ForgeCli {
    pub fn new() -> Self {
        Self {
            config: None,
            start_time: Instant::now(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        self.run_with(std::env::args_os())
    }

    pub fn run_with<I, T>(&mut self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        self.start_time = Instant::now();
        let matches = match build_cli().try_get_matches_from(args) {
            Ok(matches) => matches,
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                let _ = e.print();
                return Ok(());
            }
            Err(e) => return Err(CrushError::config(e.to_string())),
        };

        if let Some(config_path) = matches.get_one::<String>("config") {
            self.config = Some(config::load(config_path)?);
        }

        setup_logging(matches.get_count("verbose"));

        match matches.subcommand() {
            Some(("compile", sub_matches)) => handlers::handle_compile_command(self, sub_matches),
            Some(("check", sub_matches)) => handlers::handle_check_command(self, sub_matches),
            Some(("aliases", sub_matches)) => handlers::handle_aliases_command(sub_matches),
            _ => {
                println!("No subcommand specified. Use --help for usage information.");
                Ok(())
            }
        }
    }

    /// Options from the config file, overridden by command-line flags
    pub fn build_options(&self, matches: &ArgMatches) -> Result<Options> {
        let mut options = self.config.clone().unwrap_or_default();

        if matches.get_flag("minify") {
            options.minify = true;
        }
        if matches.get_flag("pretty") {
            options.minify = false;
        }
        if matches.get_flag("advanced-minify") {
            options.minify = true;
            options.advanced_minify = true;
        }
        if let Some(vendor) = matches.get_one::<String>("vendor") {
            options.vendor_target = VendorTarget::from(vendor.clone());
        }
        if matches.get_flag("source-map") {
            options.source_map = true;
        }
        if matches.contains_id("boilerplate") {
            options.boilerplate = match matches.get_one::<String>("boilerplate") {
                Some(path) => Boilerplate::Template(PathBuf::from(path)),
                None => Boilerplate::Enabled(true),
            };
        }
        if matches.get_flag("no-cache") {
            options.cache = false;
        }
        if let Some(newlines) = matches.get_one::<LineEndings>("newlines") {
            options.newlines = match newlines {
                LineEndings::Unix => Newlines::Unix,
                LineEndings::Windows => Newlines::Windows,
                LineEndings::Platform => Newlines::Platform,
            };
        }
        if let Some(defines) = matches.get_many::<String>("define") {
            for define in defines {
                match define.split_once('=') {
                    Some((key, value)) => {
                        options.vars.insert(key.trim().to_string(), value.trim().to_string());
                    }
                    None => {
                        return Err(CrushError::InvalidFormat {
                            message: format!("Invalid variable definition: {}. Use NAME=VALUE format.", define),
                        })
                    }
                }
            }
        }
        if let Some(names) = matches.get_many::<String>("enable") {
            options.enable.extend(names.cloned());
        }
        if let Some(names) = matches.get_many::<String>("disable") {
            options.disable.extend(names.cloned());
        }
        if matches.get_flag("stats") {
            options.trace = vec!["all".to_string()];
        }
        if let Some(output) = matches.get_one::<String>("output") {
            let output = PathBuf::from(output);
            options.output_file = output.file_name().map(|n| n.to_string_lossy().into_owned());
            options.output_dir = output
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from);
        }
        Ok(options)
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }
}

fn option_args(command: Command) -> Command {
    command
        .arg(Arg::new("minify").long("minify").help("Minify the output (default)").action(ArgAction::SetTrue))
        .arg(Arg::new("pretty").long("pretty").help("Readable output").action(ArgAction::SetTrue).conflicts_with("minify"))
        .arg(Arg::new("advanced-minify").long("advanced-minify").help("Also shorten colors").action(ArgAction::SetTrue))
        .arg(Arg::new("vendor").long("vendor").value_name("TARGET").help("Vendor target: all, none or a vendor name"))
        .arg(Arg::new("newlines").long("newlines").value_parser(clap::value_parser!(LineEndings)).help("Output line endings"))
        .arg(Arg::new("define").short('D').long("define").value_name("NAME=VALUE").help("Define a variable").action(ArgAction::Append))
        .arg(Arg::new("enable").long("enable").value_name("PLUGIN").help("Enable a plugin").action(ArgAction::Append))
        .arg(Arg::new("disable").long("disable").value_name("PLUGIN").help("Disable a plugin").action(ArgAction::Append))
}

pub fn build_cli() -> Command {
    Command::new(crate::NAME)
        .version(crate::VERSION)
        .about(crate::DESCRIPTION)
        .author("CSS Forge Development Team")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (.toml or .json)")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase verbosity (can be used multiple times)")
                .action(ArgAction::Count),
        )
        .subcommand(option_args(
            Command::new("compile")
                .about("Compile a stylesheet")
                .arg(Arg::new("input").help("Input CSS file").required(true).index(1))
                .arg(Arg::new("output").short('o').long("output").value_name("FILE").help("Output CSS file"))
                .arg(Arg::new("source-map").long("source-map").help("Write a source map next to the output").action(ArgAction::SetTrue))
                .arg(
                    Arg::new("boilerplate")
                        .long("boilerplate")
                        .value_name("FILE")
                        .num_args(0..=1)
                        .help("Prepend a boilerplate comment, optionally from a template file"),
                )
                .arg(Arg::new("no-cache").long("no-cache").help("Always recompile").action(ArgAction::SetTrue))
                .arg(Arg::new("stats").long("stats").help("Print compilation statistics").action(ArgAction::SetTrue))
                .arg(Arg::new("watch").short('w').long("watch").help("Watch for file changes and recompile").action(ArgAction::SetTrue)),
        ))
        .subcommand(
            Command::new("check")
                .about("Compile without writing and report problems")
                .arg(Arg::new("input").help("Input CSS file or directory").required(true).index(1))
                .arg(Arg::new("recursive").short('r').long("recursive").help("Check all CSS files in a directory recursively").action(ArgAction::SetTrue))
                .arg(Arg::new("vendor").long("vendor").value_name("TARGET").help("Vendor target: all, none or a vendor name")),
        )
        .subcommand(
            Command::new("aliases")
                .about("Print the effective alias table as JSON")
                .arg(Arg::new("vendor").long("vendor").value_name("TARGET").help("Vendor target: all, none or a vendor name"))
                .arg(Arg::new("file").long("file").value_name("FILE").help("Alias table to load instead of the built-in one")),
        )
}

fn setup_logging(verbose_count: u8) {
    let log_level = match verbose_count {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_secs()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_matches(args: &[&str]) -> ArgMatches {
        let mut full = vec!["cssforge", "compile", "in.css"];
        full.extend_from_slice(args);
        let matches = build_cli().try_get_matches_from(full).unwrap();
        matches.subcommand_matches("compile").unwrap().clone()
    }

    #[test]
    fn test_flags_build_options() {
        let cli = ForgeCli::new();
        let matches = compile_matches(&[
            "--pretty",
            "--vendor",
            "moz",
            "-D",
            "accent=#c00",
            "--enable",
            "rem",
            "--boilerplate",
            "--no-cache",
            "-o",
            "dist/site.css",
        ]);
        let options = cli.build_options(&matches).unwrap();
        assert!(!options.minify);
        assert_eq!(options.vendor_target, VendorTarget::Vendor("moz".to_string()));
        assert_eq!(options.vars.get("accent").map(String::as_str), Some("#c00"));
        assert_eq!(options.enable, vec!["rem"]);
        assert_eq!(options.boilerplate, Boilerplate::Enabled(true));
        assert!(!options.cache);
        assert_eq!(options.output_file.as_deref(), Some("site.css"));
        assert_eq!(options.output_dir, Some(PathBuf::from("dist")));
    }

    #[test]
    fn test_flags_override_config() {
        let cli = ForgeCli {
            config: Some(Options {
                minify: false,
                source_map: false,
                ..Default::default()
            }),
            start_time: Instant::now(),
        };
        let matches = compile_matches(&["--minify", "--source-map", "--boilerplate", "head.txt"]);
        let options = cli.build_options(&matches).unwrap();
        assert!(options.minify);
        assert!(options.source_map);
        assert_eq!(options.boilerplate, Boilerplate::Template(PathBuf::from("head.txt")));
    }

    #[test]
    fn test_bad_define() {
        let cli = ForgeCli::new();
        let matches = compile_matches(&["-D", "novalue"]);
        assert!(cli.build_options(&matches).is_err());
    }
}
