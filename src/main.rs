//! `consensus-fuzz`: generate script-verification vectors and diff two
//! verifiers over them.

use std::{
    num::NonZeroUsize,
    path::PathBuf,
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use consensus_fuzz::{
    CommandAdapter, Executor, ExecutorConfig, FlagSet, Generator, GeneratorConfig, Mode,
    VectorFormat,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "consensus-fuzz")]
#[command(about = "Differential fuzzing of Bitcoin script verifiers")]
#[command(version)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Unstructured scripts
    Verify,
    /// Satisfying spends of standard templates
    Less,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Verify => Mode::Verify,
            ModeArg::Less => Mode::Less,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write test vectors into a corpus directory
    Generate {
        #[arg(value_enum)]
        mode: ModeArg,

        /// Stamp vectors with the standard policy flags instead of the mandatory set
        #[arg(long, env = "CONSENSUS_FUZZ_STANDARD")]
        standard: bool,

        /// Write the pre-witness four-line format
        #[arg(long, env = "CONSENSUS_FUZZ_LEGACY")]
        legacy: bool,

        /// Corpus directory
        #[arg(short, long, default_value = "data", env = "CONSENSUS_FUZZ_OUT")]
        out: PathBuf,

        /// Stop after this many vectors (default: until interrupted)
        #[arg(short = 'n', long, env = "CONSENSUS_FUZZ_ITERATIONS")]
        iterations: Option<u64>,

        /// RNG seed for a reproducible corpus
        #[arg(long, env = "CONSENSUS_FUZZ_SEED")]
        seed: Option<u64>,
    },

    /// Run two verifiers over a corpus and report disagreements
    Detect {
        /// Corpus directory
        #[arg(default_value = "data", env = "CONSENSUS_FUZZ_CORPUS")]
        corpus: PathBuf,

        /// First verifier program
        #[arg(long, env = "CONSENSUS_FUZZ_LEFT")]
        left: PathBuf,

        /// Argument passed to the first verifier before the vector path
        #[arg(long = "left-arg", allow_hyphen_values = true)]
        left_args: Vec<String>,

        /// Second verifier program
        #[arg(long, env = "CONSENSUS_FUZZ_RIGHT")]
        right: PathBuf,

        /// Argument passed to the second verifier before the vector path
        #[arg(long = "right-arg", allow_hyphen_values = true)]
        right_args: Vec<String>,

        /// Vectors in flight at once (default: number of CPUs)
        #[arg(short = 'j', long, env = "CONSENSUS_FUZZ_CONCURRENCY")]
        concurrency: Option<NonZeroUsize>,

        /// Seconds between status lines
        #[arg(long, default_value = "5", env = "CONSENSUS_FUZZ_STATUS_INTERVAL")]
        status_interval: u64,

        /// Kill a verifier that runs longer than this many seconds
        #[arg(long, env = "CONSENSUS_FUZZ_TIMEOUT")]
        timeout: Option<u64>,
    },

    /// Verify one vector with libbitcoinconsensus (prints 1 or 0)
    #[cfg(feature = "libconsensus")]
    Verify {
        file: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Generate {
            mode,
            standard,
            legacy,
            out,
            iterations,
            seed,
        } => {
            let config = GeneratorConfig {
                mode: mode.into(),
                flags: FlagSet::from_standard(standard),
                format: if legacy {
                    VectorFormat::Legacy
                } else {
                    VectorFormat::Witness
                },
                out_dir: out,
                iterations,
                seed,
            };
            run_generate(config)
        }
        Commands::Detect {
            corpus,
            left,
            left_args,
            right,
            right_args,
            concurrency,
            status_interval,
            timeout,
        } => {
            let timeout = timeout.map(Duration::from_secs);
            let left = CommandAdapter::new(left)
                .with_args(left_args)
                .with_timeout(timeout);
            let right = CommandAdapter::new(right)
                .with_args(right_args)
                .with_timeout(timeout);
            let mut config = ExecutorConfig {
                status_interval: Duration::from_secs(status_interval),
                ..ExecutorConfig::default()
            };
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            run_detect(Executor::new(left, right, config), corpus)
        }
        #[cfg(feature = "libconsensus")]
        Commands::Verify { file } => Ok(run_verify(&file)),
    }
}

fn run_generate(config: GeneratorConfig) -> Result<ExitCode> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .context("failed to install Ctrl-C handler")?;

    let stats = Generator::new(config)
        .run(&shutdown)
        .context("vector generation failed")?;
    if shutdown.load(Ordering::SeqCst) {
        info!(iterations = stats.iterations, "interrupted");
    }
    Ok(ExitCode::SUCCESS)
}

fn run_detect(executor: Executor<CommandAdapter, CommandAdapter>, corpus: PathBuf) -> Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    info!(corpus = %corpus.display(), "scanning corpus");
    let report = runtime
        .block_on(executor.run(&corpus))
        .context("differential run aborted")?;

    if !report.mismatches.is_empty() {
        warn!(mismatches = report.mismatches.len(), "verifiers disagreed");
        for mismatch in &report.mismatches {
            println!("{}", mismatch.path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(feature = "libconsensus")]
fn run_verify(file: &std::path::Path) -> ExitCode {
    let bytes = match std::fs::read(file) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(path = %file.display(), %err, "cannot read vector");
            return ExitCode::from(2);
        }
    };
    let valid = consensus_fuzz::TestVector::parse(&bytes)
        .map(|vector| consensus_fuzz::libconsensus::verify_vector(&vector))
        .unwrap_or(false);
    print!("{}", consensus_fuzz::adapter::verdict_line(valid));
    if valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
