//! Thin CLI layer: parse args, styled output, and call into depshadow-core.
//! Crash-proof: panic caught and reported; all errors return Result.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use colored::Colorize;
use depshadow_core::{load_config, Config, PipelineOptions, PipelineReport, NUGET_ORG};
use indicatif::{ProgressBar, ProgressStyle};
use std::env;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

mod logging;

use logging::LogFormat;

// ---- UI helpers (no-op when stdout isn't a TTY) ----

fn use_color() -> bool {
    std::io::stdout().is_terminal() && env::var("NO_COLOR").unwrap_or_default().is_empty()
}

pub(crate) fn use_color_stderr() -> bool {
    std::io::stderr().is_terminal() && env::var("NO_COLOR").unwrap_or_default().is_empty()
}

fn success(msg: &str) {
    if use_color() {
        println!("{}", msg.green());
    } else {
        println!("{}", msg);
    }
}

fn error(msg: &str) {
    if use_color_stderr() {
        eprintln!("{}", msg.red());
    } else {
        eprintln!("{}", msg);
    }
}

fn info(msg: &str) {
    if use_color() {
        println!("{}", msg.cyan());
    } else {
        println!("{}", msg);
    }
}

fn dim(msg: &str) {
    if use_color() {
        println!("{}", msg.dimmed());
    } else {
        println!("{}", msg);
    }
}

/// Spinner on stderr for quiet runs; None otherwise.
fn start_spinner(message: &str, quiet: bool) -> Option<ProgressBar> {
    if !quiet {
        return None;
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⠈⠐⠠⠰⠸⠹")
        .template("{spinner:.dim} {msg}")
    {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    Some(spinner)
}

fn cli() -> Command {
    Command::new("depshadow")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Export a .NET solution's dependency shape, anonymize it, and rebuild a skeleton")
        .after_help(
            "Examples:\n  depshadow --solution-file App.sln --output-path out\n  depshadow --solution-file App.sln --output-path out --anonymize false\n  depshadow --output-path out",
        )
        .arg(
            Arg::new("solution-file")
                .long("solution-file")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Solution (.sln or .slnx) to export; omit to only import existing JSON"),
        )
        .arg(
            Arg::new("output-path")
                .long("output-path")
                .value_name("DIR")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Directory for the exported JSON and the rebuilt skeletons"),
        )
        .arg(
            Arg::new("anonymize")
                .long("anonymize")
                .value_name("BOOL")
                .value_parser(value_parser!(bool))
                .help("Replace private project and package names (default true)"),
        )
        .arg(
            Arg::new("public-packages-source")
                .long("public-packages-source")
                .value_name("URL|DIR")
                .help("Feed that decides which packages are public (default nuget.org)"),
        )
        .arg(
            Arg::new("source")
                .long("source")
                .value_name("URL|DIR")
                .action(ArgAction::Append)
                .help("Extra feed for dependency metadata; repeatable"),
        )
        .arg(
            Arg::new("concurrency")
                .long("concurrency")
                .value_name("N")
                .value_parser(value_parser!(u32).range(1..))
                .help("Parallel registry lookups and project loads (or set DEPSHADOW_CONCURRENCY)"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_parser(["pretty", "compact", "json"])
                .default_value("compact")
                .help("Log output format on stderr"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("More log output; repeat for debug and trace"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Minimal output; show spinner when busy"),
        )
}

/// Flags win over `.depshadowrc`; the file wins over built-in defaults.
fn pipeline_options(matches: &ArgMatches, config: Config) -> Result<PipelineOptions, String> {
    let output_path = matches
        .get_one::<PathBuf>("output-path")
        .cloned()
        .ok_or_else(|| "--output-path is required.".to_string())?;

    let mut options = PipelineOptions::new(output_path);
    options.solution_file = matches.get_one::<PathBuf>("solution-file").cloned();
    options.anonymize = matches
        .get_one::<bool>("anonymize")
        .copied()
        .or(config.anonymize)
        .unwrap_or(true);
    options.public_packages_source = matches
        .get_one::<String>("public-packages-source")
        .cloned()
        .or(config.public_packages_source)
        .unwrap_or_else(|| NUGET_ORG.to_string());

    let mut sources: Vec<String> = matches
        .get_many::<String>("source")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    sources.extend(config.sources);
    options.sources = sources;

    if let Some(n) = matches.get_one::<u32>("concurrency") {
        options.concurrency = *n as usize;
    } else if let Some(n) = config.concurrency {
        options.concurrency = n;
    }

    if let Some(solution) = &options.solution_file {
        if !solution.is_file() {
            return Err(format!("Solution file not found: {}", solution.display()));
        }
    }
    Ok(options)
}

fn print_report(report: &PipelineReport) {
    if !report.exported.is_empty() {
        success(&format!("Exported {} artifact(s).", report.exported.len()));
        for path in &report.exported {
            dim(&format!("  {}", path.display()));
        }
    }
    if report.imported.is_empty() {
        info("No JSON artifacts to import.");
        return;
    }
    for imported in &report.imported {
        let pins = if imported.central_pins > 0 {
            format!(", {} central pin(s)", imported.central_pins)
        } else {
            String::new()
        };
        success(&format!(
            "Rebuilt {} ({} project(s){})",
            imported.solution_name,
            imported.projects.len(),
            pins
        ));
        dim(&format!("  {}", imported.working_directory.display()));
    }
}

fn run() -> Result<(), String> {
    let matches = cli().get_matches();

    let quiet = matches.get_flag("quiet");
    let verbose = matches.get_count("verbose");
    let format = matches
        .get_one::<String>("log-format")
        .and_then(|s| LogFormat::parse(s))
        .unwrap_or(LogFormat::Compact);
    logging::init(format, verbose, quiet)?;

    let cwd = env::current_dir().map_err(|e| e.to_string())?;
    let options = pipeline_options(&matches, load_config(&cwd))?;
    tracing::debug!(?options, "resolved options");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Cannot start async runtime: {}", e))?;

    let message = if options.solution_file.is_some() {
        "Exporting and rebuilding…"
    } else {
        "Rebuilding from existing artifacts…"
    };
    if !quiet {
        info(message);
    }
    let spinner = start_spinner(message, quiet);
    let result = runtime.block_on(depshadow_core::run(&options));
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let report = result.map_err(|e| e.to_string())?;
    if quiet {
        success("Done.");
    } else {
        print_report(&report);
    }
    Ok(())
}

fn main() {
    if !use_color() {
        colored::control::set_override(false);
    }

    let code = match std::panic::catch_unwind(run) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            error(&e);
            1
        }
        Err(_) => {
            error("An unexpected error occurred. Please report this issue.");
            1
        }
    };
    std::process::exit(code);
}
