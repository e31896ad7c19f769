//! Weave a module in the text format and print the result.
//!
//! Reads the module from a file (or stdin when the path is `-`), weaves it
//! with the default return shapes and writes the woven module to stdout or
//! `--output`. Diagnostics go to stderr.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ilweave::{weave_with, Diagnostics, Module, Severity, WeaveConfig};

#[derive(Parser, Debug)]
#[command(name = "weave", version, about = "Marker-driven call injection for stack-machine modules")]
struct Args {
    /// Module to weave, `-` for stdin
    input: PathBuf,

    /// Write the woven module here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Record debug diagnostics (match misses, selections)
    #[arg(long, default_value_t = false)]
    debug_diagnostics: bool,

    /// Log verbosely (same as RUST_LOG=debug)
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Do not print the woven module to stdout; `--output` is still written
    #[arg(short, long, default_value_t = false)]
    quiet: bool,
}

fn read_input(path: &PathBuf) -> io::Result<String> {
    if path.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        fs::read_to_string(path)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let text = match read_input(&args.input) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", args.input.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let mut module = match Module::parse(&text) {
        Ok(module) => module,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut diagnostics = Diagnostics::new();
    let config = WeaveConfig::new().with_debug(args.debug_diagnostics);
    let summary = weave_with(&mut module, config, &mut diagnostics);
    for diagnostic in diagnostics.entries() {
        eprintln!("{}", diagnostic);
    }

    let woven = module.to_string();
    let written = match &args.output {
        Some(path) => fs::write(path, woven),
        None if args.quiet => Ok(()),
        None => {
            print!("{}", woven);
            Ok(())
        }
    };
    if let Err(e) = written {
        eprintln!("Error: cannot write output: {}", e);
        return ExitCode::FAILURE;
    }

    log::info!(
        "{} applied, {} missed, {} errors",
        summary.applied,
        summary.missed,
        diagnostics.count(Severity::Error)
    );
    if summary.aborted {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
