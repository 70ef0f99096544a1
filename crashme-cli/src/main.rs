//! CrashMe - Main entry point
//!
//! Runs the thread-affinity scenario battery against the enclave runtime and
//! narrates which thread performs each lifecycle step.

mod commands;

use clap::{Args, Parser, Subcommand};
use crashme_cli::{ProbeConfig, ProbeOverrides};
use crashme_enclave::{ForeignDestroy, ForeignUse};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crashme")]
#[command(version, about = "Probe the thread-affinity contract of an enclave runtime")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scenario battery (default)
    Run {
        /// Run only this scenario; repeat to select several, in order
        #[arg(long = "scenario", value_name = "NAME")]
        scenarios: Vec<String>,

        /// Run every scenario in its own child process so aborts are recorded
        #[arg(long)]
        isolate: bool,

        #[command(flatten)]
        probe: ProbeArgs,
    },

    /// List the canonical scenarios
    List,

    /// Run a single scenario and print its report line
    #[command(hide = true)]
    Child {
        #[arg(long)]
        scenario: String,

        #[command(flatten)]
        probe: ProbeArgs,
    },
}

/// Runtime and battery settings; override the CRASHME_* environment
#[derive(Args, Debug, Clone, Default)]
struct ProbeArgs {
    /// Invocations per scenario
    #[arg(long)]
    rounds: Option<usize>,

    /// Runtime reaction to calls from a non-owner thread: reject | allow
    #[arg(long, value_name = "POLICY")]
    foreign_use: Option<ForeignUse>,

    /// Runtime reaction to destroy from a non-owner thread: abort | reject | allow
    #[arg(long, value_name = "POLICY")]
    foreign_destroy: Option<ForeignDestroy>,

    /// Live instance limit of the runtime
    #[arg(long)]
    max_instances: Option<usize>,
}

impl From<&ProbeArgs> for ProbeOverrides {
    fn from(args: &ProbeArgs) -> Self {
        Self {
            rounds: args.rounds,
            foreign_use: args.foreign_use,
            foreign_destroy: args.foreign_destroy,
            max_instances: args.max_instances,
        }
    }
}

fn init_tracing(config: &ProbeConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    // stdout carries narration and child reports; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run {
        scenarios: Vec::new(),
        isolate: false,
        probe: ProbeArgs::default(),
    });

    let overrides = match &command {
        Commands::Run { probe, .. } | Commands::Child { probe, .. } => ProbeOverrides::from(probe),
        Commands::List => ProbeOverrides::default(),
    };
    let config = ProbeConfig::from_env()?.with_overrides(&overrides);
    init_tracing(&config);
    config.validate()?;

    match command {
        Commands::Run { scenarios, isolate, .. } => commands::run::handle(&config, &scenarios, isolate),
        Commands::List => commands::list::handle(&config),
        Commands::Child { scenario, .. } => commands::child::handle(&config, &scenario),
    }
}
