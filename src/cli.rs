//! CLI argument parsing using clap v4

use clap::{Args, Parser, Subcommand};

/// fanout - run functions across many ephemeral workers
///
/// Splits input into partitions, runs a function on each one through a
/// compute backend with bounded concurrency, and prints ordered results.
#[derive(Parser, Debug)]
#[command(name = "fanout")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a function over JSON input and print ordered results
    Run(RunArgs),

    /// Execute one task payload from stdin and write its result to stdout
    ///
    /// Worker entry point used by the process backend.
    Handler,

    /// List the functions workers can run
    Functions,

    /// Display version and build information
    Version {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Arguments of `fanout run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Function to run on every partition
    pub function: String,

    /// JSON input; an array is mapped element-wise, anything else runs once
    #[arg(short, long, conflicts_with = "input_file")]
    pub input: Option<String>,

    /// Read JSON input from a file ("-" for stdin)
    #[arg(long)]
    pub input_file: Option<String>,

    /// Partition the files under this directory instead of JSON input
    #[arg(long, conflicts_with_all = ["input", "input_file", "chunk_size", "chunks"])]
    pub objects: Option<String>,

    /// Only files whose relative path starts with this prefix
    #[arg(long, requires = "objects")]
    pub prefix: Option<String>,

    /// Split every file into this many byte ranges
    #[arg(long, requires = "objects")]
    pub object_chunks: Option<usize>,

    /// Reduce the map results with this function
    #[arg(short, long)]
    pub reduce: Option<String>,

    /// One reducer per N map tasks instead of a single reducer
    #[arg(long, requires = "reduce")]
    pub reduce_every: Option<usize>,

    /// JSON value passed to every task as extra arguments
    #[arg(long)]
    pub args: Option<String>,

    /// Elements per task (default: one task per element)
    #[arg(long, conflicts_with = "chunks")]
    pub chunk_size: Option<usize>,

    /// Split the input into this many tasks
    #[arg(long)]
    pub chunks: Option<usize>,

    /// Backend kind: local, process, mock
    #[arg(short, long, env = "FANOUT_BACKEND")]
    pub backend: Option<String>,

    /// Activations in flight at once
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Give up on the job after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print every result slot (values and errors) as JSON
    #[arg(long)]
    pub json: bool,

    /// Print the job status after completion
    #[arg(long)]
    pub status: bool,

    /// Path to configuration file
    #[arg(short, long, env = "FANOUT_CONFIG")]
    pub config: Option<String>,
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}
