mod settings;
mod test_runner;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::diagnostic::Diagnostic;
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use runtime::{BlockTree, JitCompiler, RuntimeEvent, SimulationReport, simulate};
use wod::loader::Loader;

use settings::Settings;

const SUBCOMMANDS: &[&str] = &["run", "check", "test", "help"];

#[derive(Parser)]
#[command(name = "wod", version, about = "Workout compiler and simulator")]
struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// TOML file with [compiler] and [drive] settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a workout and simulate it on a logical clock
    Run(RunArgs),

    /// Load and compile a workout without running it
    Check(CheckArgs),

    /// Run .test.toml scenario files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Workout document (TOML)
    file: String,

    /// Clock step in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Work time for each effort, in seconds
    #[arg(long)]
    effort_secs: Option<f64>,

    /// Print the compiled block tree before running
    #[arg(long)]
    outline: bool,

    /// Only print the summary line
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::Args)]
struct CheckArgs {
    /// Workout document (TOML)
    file: String,

    /// Print the compiled block tree
    #[arg(long)]
    outline: bool,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.toml file or a directory containing them
    path: String,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,runtime=info,wod_cli=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    // `wod file.toml` works like `wod run file.toml`
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(pos) = first_positional(&args) {
        if !SUBCOMMANDS.contains(&args[pos].as_str()) {
            args.insert(pos, "run".to_string());
        }
    }

    let cli = Cli::parse_from(&args);
    init_logging();

    let settings = match &cli.config {
        Some(path) => match Settings::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(2);
            }
        },
        None => Settings::default(),
    };

    match cli.command {
        Command::Run(run_args) => do_run(run_args, settings, cli.no_color),
        Command::Check(check_args) => do_check(check_args, &settings, cli.no_color),
        Command::Test(test_args) => {
            let path = Path::new(&test_args.path);
            if test_args.list_categories {
                test_runner::list_categories(path);
                return;
            }
            let exit_code = test_runner::run_tests(path, cli.no_color, &test_args.category, &settings);
            process::exit(exit_code);
        }
    }
}

/// Index of the first argument that is neither a flag nor a flag's value.
fn first_positional(args: &[String]) -> Option<usize> {
    let mut index = 1;
    while index < args.len() {
        let arg = &args[index];
        if arg == "--config" {
            index += 2;
        } else if arg.starts_with('-') {
            index += 1;
        } else {
            return Some(index);
        }
    }
    None
}

fn color_choice(no_color: bool) -> ColorChoice {
    if no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    }
}

fn emit(files: &SimpleFiles<String, String>, diagnostics: &[Diagnostic<usize>], no_color: bool) {
    let writer = StandardStream::stderr(color_choice(no_color));
    let config = term::Config::default();
    for diagnostic in diagnostics {
        let _ = term::emit_to_write_style(&mut writer.lock(), &config, files, diagnostic);
    }
}

/// Read, load and compile `file`, reporting diagnostics and exiting on failure.
fn load_and_compile(file: &str, settings: &Settings, no_color: bool) -> BlockTree {
    let source = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", file, e);
            process::exit(1);
        }
    };

    let mut files = SimpleFiles::new();
    let file_id = files.add(file.to_string(), source.clone());

    let loaded = match Loader::new(source, file_id).load() {
        Ok(loaded) => loaded,
        Err(errors) => {
            let diagnostics: Vec<_> = errors.iter().map(|e| e.to_diagnostic()).collect();
            emit(&files, &diagnostics, no_color);
            process::exit(1);
        }
    };
    let warnings: Vec<_> = loaded.warnings.iter().map(|w| w.to_diagnostic()).collect();
    emit(&files, &warnings, no_color);

    let compiler = JitCompiler::new(settings.compiler.clone());
    match compiler.compile_workout(&loaded.workout) {
        Ok(tree) => {
            debug!(file, blocks = tree.len(), "compiled");
            tree
        }
        Err(error) => {
            emit(&files, &[error.to_diagnostic(file_id)], no_color);
            process::exit(1);
        }
    }
}

fn do_check(args: CheckArgs, settings: &Settings, no_color: bool) {
    let tree = load_and_compile(&args.file, settings, no_color);
    if args.outline {
        print!("{}", tree.outline());
    }
    eprintln!("ok: {} compiled into {} blocks", args.file, tree.len());
}

fn do_run(args: RunArgs, mut settings: Settings, no_color: bool) {
    if let Some(tick_ms) = args.tick_ms {
        settings.drive.tick_ms = tick_ms;
    }
    if let Some(effort_secs) = args.effort_secs {
        settings.drive.effort_secs = effort_secs;
    }

    let tree = load_and_compile(&args.file, &settings, no_color);
    if args.outline {
        print!("{}", tree.outline());
        println!();
    }

    let labels: Vec<String> = tree.iter().map(|b| b.label.clone()).collect();
    info!(file = %args.file, tick_ms = settings.drive.tick_ms, "simulating");
    let report = simulate(tree, &settings.drive);

    if !args.quiet {
        print_timeline(&report, &labels);
    }
    println!(
        "{} at {} after {} ticks, {} warning(s)",
        if report.completed { "finished" } else { "stopped" },
        report.end,
        report.ticks,
        report.warnings().len()
    );
    if !report.completed {
        process::exit(1);
    }
}

fn print_timeline(report: &SimulationReport, labels: &[String]) {
    let label = |index: usize| labels.get(index).map(String::as_str).unwrap_or("?");
    for event in &report.events {
        match event {
            RuntimeEvent::RoundStarted {
                block,
                round,
                total,
                at,
            } => {
                let total = total.map(|t| format!("/{}", t)).unwrap_or_default();
                println!("{:>10}  round {}{}  {}", at.to_string(), round, total, label(block.index()));
            }
            RuntimeEvent::TimerExpired { block, at } => {
                println!("{:>10}  timer     {}", at.to_string(), label(block.index()));
            }
            RuntimeEvent::SpanClosed(span) => {
                if let (Some(end), Some(outcome)) = (span.end, span.outcome) {
                    let metrics: Vec<String> = span
                        .metrics
                        .iter()
                        .map(|(name, value)| format!("{}={}", name, value))
                        .collect();
                    println!(
                        "{:>10}  {:<9} {} [{}]",
                        end.to_string(),
                        format!("{:?}", outcome).to_lowercase(),
                        span.label,
                        metrics.join(" ")
                    );
                }
            }
            RuntimeEvent::Warning(warning) => println!("{:>10}  warning   {}", "", warning),
            RuntimeEvent::StateChanged { .. } | RuntimeEvent::SpanOpened { .. } => {}
        }
    }
    for cue in &report.cues {
        println!("{:>10}  cue       {} ({})", cue.at.to_string(), cue.cue.id(), label(cue.block.index()));
    }
}
