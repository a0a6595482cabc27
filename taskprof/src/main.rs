use std::path::PathBuf;

use clap::Parser;
use taskprof::config::Config;
use taskprof::pipeline;
use taskprof_trace::TraceError;

/// Analyze binary task-runtime traces: dependency graph, scheduling
/// statistics, critical path, Chrome-trace timeline.
#[derive(Parser, Debug)]
#[command(name = "taskprof", version)]
struct Cli {
    /// Directory containing the binary trace files
    #[arg(short, long, value_name = "DIR")]
    input: Option<PathBuf>,

    /// Prefix for the emitted artifacts
    #[arg(short, long, value_name = "PREFIX")]
    output: Option<String>,

    /// Show a progress indicator on stderr
    #[arg(short, long)]
    progress: bool,

    /// Also dump the repaired record log and the blocked-tasks log
    #[arg(short, long)]
    records: bool,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            return code;
        }
    };

    env_logger::init();

    let mut config = Config::load();
    if let Some(input) = cli.input {
        config.input = input;
    }
    if let Some(output) = cli.output {
        config.output = output;
    }
    config.progress |= cli.progress;
    config.records |= cli.records;

    match pipeline::run(&config) {
        Ok(_) => 0,
        Err(err) => {
            eprintln!("error: {err:#}");
            match err.downcast_ref::<TraceError>() {
                Some(trace_err) if trace_err.is_inconsistency() => 2,
                _ => 1,
            }
        }
    }
}
