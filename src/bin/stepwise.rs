//! Stepwise CLI tools (feature-gated).

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use stepwise::config::apply_env_overrides;
use stepwise::{
    ExplorationReport, ReplayReport, ScheduleStep, ScheduleTrace, StrategyKind, TestConfig,
    TestReport, TestingEngine, Workload,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stepwise", version, about = "Systematic concurrency testing")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbosity: u8,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value_t = OutputFormat::Human, global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Explore a sample workload under a strategy
    Run(RunArgs),

    /// Schedule trace utilities
    Trace(TraceArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Workload: fib, lock-cycle, locked-join
    workload: Workload,

    /// Strategy: dfs, random, greedy-random, pct, qlearning, probabilistic, delay-bounding
    #[arg(long = "strategy")]
    strategy: Option<StrategyKind>,

    /// Maximum number of iterations
    #[arg(long = "iterations")]
    iterations: Option<u64>,

    /// Seed for random decisions
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// PCT change points / delay-bounding delays / coin flips
    #[arg(long = "bound")]
    bound: Option<usize>,

    /// Step bound for both fair and unfair strategies (0 = unbounded)
    #[arg(long = "max-steps")]
    max_steps: Option<u64>,

    /// Write the first buggy trace to this file (.json or MessagePack)
    #[arg(long = "trace-out")]
    trace_out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TraceArgs {
    #[command(subcommand)]
    command: TraceCommand,
}

#[derive(Subcommand, Debug)]
enum TraceCommand {
    /// Show the decisions recorded in a trace file
    Show(TraceShowArgs),

    /// Replay a trace file against a workload
    Replay(TraceReplayArgs),
}

#[derive(Args, Debug)]
struct TraceShowArgs {
    /// Trace file path
    file: PathBuf,
}

#[derive(Args, Debug)]
struct TraceReplayArgs {
    /// Trace file path
    file: PathBuf,

    /// Workload the trace was recorded from
    workload: Workload,
}

#[derive(Debug, serde::Serialize)]
struct RunSummary {
    workload: String,
    strategy: String,
    iterations: usize,
    exhausted: bool,
    bug: Option<String>,
    trace_file: Option<String>,
    report: TestReport,
}

impl RunSummary {
    fn new(workload: Workload, exploration: &ExplorationReport, trace_file: Option<&Path>) -> Self {
        Self {
            workload: workload.to_string(),
            strategy: exploration.strategy.clone(),
            iterations: exploration.iterations(),
            exhausted: exploration.exhausted,
            bug: exploration
                .first_bug()
                .and_then(|run| run.bug.as_ref())
                .map(|bug| bug.message.clone()),
            trace_file: trace_file.map(|p| p.display().to_string()),
            report: exploration.report.clone(),
        }
    }

    fn human_format(&self) -> String {
        let report = &self.report;
        let mut lines = vec![
            format!("Workload: {}", self.workload),
            format!("Strategy: {}", self.strategy),
            format!("Iterations: {}", self.iterations),
        ];
        if self.exhausted {
            lines.push("Exploration exhausted".to_string());
        }
        lines.push(format!("Bugs found: {}", report.num_of_found_bugs));
        if let Some(bug) = &self.bug {
            lines.push(format!("First bug: {bug}"));
        }
        lines.push(format!(
            "Explored schedules: {} fair, {} unfair",
            report.num_of_explored_fair_schedules, report.num_of_explored_unfair_schedules
        ));
        if let Some(avg) = report.average_fair_steps() {
            lines.push(format!(
                "Fair steps: min {}, avg {avg:.1}, max {}",
                report.min_explored_fair_steps.unwrap_or(0),
                report.max_explored_fair_steps
            ));
        }
        if report.max_explored_unfair_steps > 0 {
            lines.push(format!(
                "Unfair steps: max {}",
                report.max_explored_unfair_steps
            ));
        }
        if let Some(file) = &self.trace_file {
            lines.push(format!("Trace written to {file}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
struct ReplaySummary {
    file: String,
    reproduced: bool,
    divergence: Option<String>,
    bug: Option<String>,
    recorded_steps: usize,
    replayed_steps: usize,
}

impl ReplaySummary {
    fn new(file: &Path, trace: &ScheduleTrace, replay: &ReplayReport) -> Self {
        Self {
            file: file.display().to_string(),
            reproduced: replay.reproduced,
            divergence: replay.divergence.as_ref().map(ToString::to_string),
            bug: replay.result.bug.as_ref().map(|bug| bug.message.clone()),
            recorded_steps: trace.len(),
            replayed_steps: replay.result.trace.len(),
        }
    }

    fn human_format(&self) -> String {
        let mut lines = vec![format!("File: {}", self.file)];
        lines.push(if self.reproduced {
            "Schedule reproduced".to_string()
        } else {
            "Schedule NOT reproduced".to_string()
        });
        lines.push(format!(
            "Steps: {} replayed / {} recorded",
            self.replayed_steps, self.recorded_steps
        ));
        if let Some(divergence) = &self.divergence {
            lines.push(format!("Divergence: {divergence}"));
        }
        if let Some(bug) = &self.bug {
            lines.push(format!("Bug: {bug}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug)]
struct CliError {
    message: String,
}

impl CliError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<stepwise::Error> for CliError {
    fn from(err: stepwise::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<stepwise::TraceError> for CliError {
    fn from(err: stepwise::TraceError) -> Self {
        Self::new(err.to_string())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbosity);

    match run(cli.command, cli.format) {
        Ok(found_bug) => {
            if found_bug {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("error: {}", err.message);
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .try_init();
}

/// Returns whether a bug was found.
fn run(command: Command, format: OutputFormat) -> Result<bool, CliError> {
    match command {
        Command::Run(args) => run_workload(args, format),
        Command::Trace(trace_args) => match trace_args.command {
            TraceCommand::Show(args) => {
                show_trace(&args.file, format)?;
                Ok(false)
            }
            TraceCommand::Replay(args) => replay_trace(&args.file, args.workload, format),
        },
    }
}

fn base_config() -> Result<TestConfig, CliError> {
    let mut config = TestConfig::default();
    apply_env_overrides(&mut config)?;
    Ok(config)
}

fn run_workload(args: RunArgs, format: OutputFormat) -> Result<bool, CliError> {
    let mut config = base_config()?;
    if let Some(strategy) = args.strategy {
        config = config.strategy(strategy);
    }
    if let Some(iterations) = args.iterations {
        config = config.iterations(iterations);
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(bound) = args.bound {
        config = config.strategy_bound(bound);
    }
    if let Some(steps) = args.max_steps {
        config = config.max_steps(steps);
    }

    let workload = args.workload;
    let mut engine = TestingEngine::new(config)?;
    let exploration = engine.run(move |rt| workload.run(rt));

    let trace_file = match (&args.trace_out, exploration.bug_trace()) {
        (Some(path), Some(trace)) => {
            trace.save(path)?;
            Some(path.as_path())
        }
        _ => None,
    };

    let summary = RunSummary::new(workload, &exploration, trace_file);
    match format {
        OutputFormat::Human => println!("{}", summary.human_format()),
        OutputFormat::Json => print_json(&summary)?,
    }
    Ok(exploration.has_bugs())
}

fn show_trace(path: &Path, format: OutputFormat) -> Result<(), CliError> {
    let trace = ScheduleTrace::load(path)?;
    match format {
        OutputFormat::Json => print_json(&trace),
        OutputFormat::Human => {
            let meta = &trace.metadata;
            println!("File: {}", path.display());
            println!("Schema: {}", meta.version);
            println!("Seed: {}", meta.seed);
            println!("Strategy: {}", meta.strategy);
            println!("Iteration: {}", meta.iteration);
            if meta.ended_on_bound {
                let outcome = if meta.bound_is_bug { "bug" } else { "stop" };
                println!("Ended on step bound: {} ({outcome})", meta.step_bound);
            }
            println!("Steps: {}", trace.len());
            for (index, step) in trace.iter().enumerate() {
                println!("#{index:05} {}", describe_step(step));
            }
            Ok(())
        }
    }
}

fn describe_step(step: &ScheduleStep) -> String {
    match step {
        ScheduleStep::Scheduled { source_id } => format!("schedule {source_id}"),
        ScheduleStep::Boolean { value } => format!("bool {value}"),
        ScheduleStep::FairBoolean { id, value } => format!("fair-bool {id} {value}"),
        ScheduleStep::Integer { value } => format!("int {value}"),
    }
}

fn replay_trace(path: &Path, workload: Workload, format: OutputFormat) -> Result<bool, CliError> {
    let trace = ScheduleTrace::load(path)?;
    let config = base_config()?;
    let replay = TestingEngine::replay(&config, &trace, move |rt| workload.run(rt))?;

    let summary = ReplaySummary::new(path, &trace, &replay);
    match format {
        OutputFormat::Human => println!("{}", summary.human_format()),
        OutputFormat::Json => print_json(&summary)?,
    }
    Ok(replay.result.bug.is_some())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("failed to encode output: {err}")))?;
    println!("{text}");
    Ok(())
}
