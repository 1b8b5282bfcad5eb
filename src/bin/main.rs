//! sandbox-init CLI - run a workload under a PID-1 init supervisor

use std::io::Write;

use clap::Parser;
use console::style;
use env_logger::{Builder, Env};
use log::{Level, LevelFilter};
use sandbox_init::{InitSupervisor, WorkloadSpec, SUPERVISOR_FAILURE_CODE};

#[derive(Parser)]
#[command(name = "sandbox-init")]
#[command(version, about = "Minimal init process for sandboxed workloads", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Run a shell as the supervised workload
    sandbox-init /bin/sh

    # Pass workload flags after the program
    sandbox-init /usr/bin/server --port 8080

    # Fully controlled environment and working directory
    sandbox-init --clear-env --env PATH=/usr/bin:/bin --workdir /srv /usr/bin/server
")]
struct Cli {
    /// Program to run as the supervised workload
    #[arg(value_name = "PROGRAM")]
    program: String,

    /// Workload arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Environment entry for the workload (KEY=VALUE, repeatable)
    #[arg(short, long, value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Do not pass the supervisor's own environment through
    #[arg(long)]
    clear_env: bool,

    /// Workload working directory
    #[arg(short, long, value_name = "PATH")]
    workdir: Option<String>,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    init_logger(cli.verbose);

    let spec = match build_spec(&cli) {
        Ok(spec) => spec,
        Err(message) => {
            eprintln!("{} {}", style("error:").red().bold(), message);
            std::process::exit(SUPERVISOR_FAILURE_CODE);
        }
    };

    let mut supervisor = InitSupervisor::new();
    match supervisor.run(&spec) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            std::process::exit(SUPERVISOR_FAILURE_CODE);
        }
    }
}

fn build_spec(cli: &Cli) -> Result<WorkloadSpec, String> {
    let mut spec = WorkloadSpec::new(cli.program.as_str()).args(cli.args.iter().cloned());

    for entry in &cli.env {
        let (key, value) = parse_env_entry(entry)?;
        spec = spec.env(key, value);
    }

    if !cli.clear_env {
        spec = spec.inherit_env();
    }

    if let Some(workdir) = &cli.workdir {
        spec = spec.current_dir(workdir.as_str());
    }

    Ok(spec)
}

fn parse_env_entry(entry: &str) -> Result<(&str, &str), String> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => Err(format!(
            "invalid --env entry (expected KEY=VALUE): {}",
            entry
        )),
    }
}

/// Initialize logger based on verbose flag
fn init_logger(verbose: bool) {
    let env = Env::default().filter_or("RUST_LOG", if verbose { "debug" } else { "warn" });

    Builder::from_env(env)
        .format(|buf, record| {
            let level = match record.level() {
                Level::Error => format!("{}", style("ERROR").red().bold()),
                Level::Warn => format!("{}", style("WARN ").yellow().bold()),
                Level::Info => format!("{}", style("INFO ").green()),
                Level::Debug => format!("{}", style("DEBUG").cyan()),
                Level::Trace => format!("{}", style("TRACE").dim()),
            };
            writeln!(buf, "{} {}", level, record.args())
        })
        .filter_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .init();
}
