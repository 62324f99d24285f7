//! Command line surface: one [`Config`] flattens every mode's options, the way
//! [`maggma_distributed`]'s protocol flattens Manager/Worker traffic onto a single bus --
//! which mode actually runs is decided after parsing, not by a subcommand.

use clap::Parser;
use std::path::PathBuf;

/// Read by Store constructors that need a default credential and weren't given one
/// explicitly in their serialized `args` -- see [`crate::builtins::apply_default_credentials`].
pub const CREDENTIALS_ENV: &str = "MAGGMA_DEFAULT_CREDENTIALS";

#[derive(Debug, Parser)]
#[clap(
    name = "maggma",
    about = "Runs maggma Builders: local, as a distributed Manager, or as a distributed Worker",
    long_about = "Drives one or more serialized Builder descriptions to completion.\n\n\
    With neither --distributed-manager nor --distributed-worker, every description is run \
    locally against an embedded Executor. --distributed-manager splits the (first) \
    description into --num-chunks chunks and dispatches them to Workers connecting over TCP. \
    --distributed-worker connects to a running Manager and executes whatever chunks it is sent."
)]
pub struct Config {
    /// Serialized Builder description files, run in the order given. Ignored in
    /// `--distributed-worker` mode, where chunks arrive over the bus instead.
    pub builders: Vec<PathBuf>,

    /// Pool size for the embedded Executor (both local runs and each distributed Worker's
    /// own per-chunk run).
    #[clap(long, short = 'w', env = "MAGGMA_WORKERS", default_value = "1")]
    pub workers: usize,

    /// Increase log verbosity: unset is `warn`, `-v` is `info`, `-vv` or more is `debug`.
    /// `RUST_LOG` always overrides this.
    #[clap(short = 'v', long = "verbose", parse(from_occurrences))]
    pub verbosity: u8,

    /// Serialized Store description to persist BuildEvent lifecycle records to. Omit to run
    /// without a Reporter.
    #[clap(long, env = "MAGGMA_REPORTER")]
    pub reporter: Option<PathBuf>,

    /// Listen address to run as a distributed Manager, e.g. `0.0.0.0:7312`. Requires
    /// `--num-chunks`.
    #[clap(long, env = "MAGGMA_DISTRIBUTED_MANAGER")]
    pub distributed_manager: Option<String>,

    /// How many chunks to split the Manager's Builder into. Required by
    /// `--distributed-manager`.
    #[clap(long, env = "MAGGMA_NUM_CHUNKS")]
    pub num_chunks: Option<usize>,

    /// Manager address to dial to run as a distributed Worker, e.g. `10.0.0.4:7312`.
    #[clap(long, env = "MAGGMA_DISTRIBUTED_WORKER")]
    pub distributed_worker: Option<String>,

    /// Capture and report peak resident memory use for the run.
    #[clap(long)]
    pub memory_profiling: bool,

    /// Directory `--memory-profiling` writes its report into. Required if
    /// `--memory-profiling` is set.
    #[clap(long)]
    pub profiling_dir: Option<PathBuf>,
}

/// Which of the three roles this invocation plays, and the validated options that go with
/// it. Computed once from the raw flags so the rest of the Runner never re-checks them.
#[derive(Debug)]
pub enum Mode {
    Local,
    Manager { bind_addr: String, num_chunks: usize },
    Worker { manager_addr: String },
}

impl Config {
    /// Resolve the mode this invocation runs in, or a human-readable error if the flags
    /// given don't describe exactly one valid mode.
    pub fn mode(&self) -> Result<Mode, String> {
        match (&self.distributed_manager, &self.distributed_worker) {
            (Some(_), Some(_)) => {
                Err("--distributed-manager and --distributed-worker are mutually exclusive".to_string())
            }
            (Some(bind_addr), None) => {
                let num_chunks = self
                    .num_chunks
                    .ok_or_else(|| "--distributed-manager requires --num-chunks".to_string())?;
                if num_chunks == 0 {
                    return Err("--num-chunks must be at least 1".to_string());
                }
                Ok(Mode::Manager { bind_addr: bind_addr.clone(), num_chunks })
            }
            (None, Some(manager_addr)) => Ok(Mode::Worker { manager_addr: manager_addr.clone() }),
            (None, None) => Ok(Mode::Local),
        }
    }

    /// `--memory-profiling` requires `--profiling-dir` to name somewhere to write its report.
    pub fn validate_profiling(&self) -> Result<(), String> {
        if self.memory_profiling && self.profiling_dir.is_none() {
            return Err("--memory-profiling requires --profiling-dir".to_string());
        }
        Ok(())
    }
}
