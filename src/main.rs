//! fanout command-line entry point
//!
//! `fanout run` drives a job on the configured backend and prints ordered
//! results; `fanout handler` is the worker side of the process backend.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;
use tracing::{debug, info};

use fanout::backend::BackendFactory;
use fanout::cli::{Cli, Commands, ConfigSubcommand, RunArgs};
use fanout::config::{self, FanoutConfig, LoggingSettings};
use fanout::error::{Error, Result};
use fanout::executor::{Executor, MapOptions, MapReduceOptions, ReducerGrouping};
use fanout::function::FunctionCatalog;
use fanout::partition::{Chunking, DiscoveryOptions, LocalObjectStore};
use fanout::types::JobKind;
use fanout::{handler, logging, version};

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Version { json } => {
            let info = version::build_info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print!("{}", info);
            }
            Ok(())
        }
        Commands::Functions => {
            for name in FunctionCatalog::with_builtins().names() {
                println!("{}", name);
            }
            Ok(())
        }
        Commands::Config { subcommand } => handle_config_command(subcommand),
        Commands::Handler => {
            let settings = LoggingSettings {
                level: "warn".to_string(),
                ..Default::default()
            };
            let _log_guards = logging::init_logging(&settings, cli.verbose, cli.quiet)?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| Error::Internal(format!("Failed to create runtime: {}", e)))?;
            runtime.block_on(handler::serve_stdio(&FunctionCatalog::with_builtins()))
        }
        Commands::Run(args) => {
            let mut config = FanoutConfig::load(args.config.as_deref())?;
            if let Some(kind) = &args.backend {
                config.backend.kind = kind.clone();
            }
            if let Some(concurrency) = args.concurrency {
                config.executor.max_in_flight = concurrency;
            }
            config.validate()?;

            // Guards must outlive the runtime so file logs are flushed
            let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;
            let build = version::build_info();
            debug!(version = %build.full_version(), target = %build.target, "Starting fanout");

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| Error::Internal(format!("Failed to create runtime: {}", e)))?;
            runtime.block_on(run_job(config, args))
        }
    }
}

/// Run one job and print its results to stdout
async fn run_job(config: FanoutConfig, args: RunArgs) -> Result<()> {
    let extra_args = args
        .args
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()?;

    let catalog = Arc::new(FunctionCatalog::with_builtins());
    let backend = BackendFactory::from_settings(&config.backend, Arc::clone(&catalog))?;
    let executor = Executor::new(config.to_executor_config(), backend, catalog)?;

    let chunking = match (args.chunk_size, args.chunks) {
        (Some(size), _) => Chunking::Size(size),
        (None, Some(count)) => Chunking::Count(count),
        (None, None) => Chunking::PerElement,
    };
    let map = MapOptions {
        chunking,
        extra_args,
        ..Default::default()
    };

    let grouping = args
        .reduce_every
        .map(ReducerGrouping::PerChunk)
        .unwrap_or_default();

    let handle = if let Some(root) = &args.objects {
        let store = LocalObjectStore::new(root);
        let prefix = args.prefix.as_deref().unwrap_or("");
        let discovery = DiscoveryOptions {
            chunk_number: args.object_chunks,
            ..Default::default()
        };
        match &args.reduce {
            Some(reducer) => {
                let options = MapReduceOptions {
                    map,
                    reducer: grouping,
                    reducer_args: None,
                };
                executor
                    .map_reduce_objects(&args.function, &store, prefix, discovery, reducer, options)
                    .await?
            }
            None => {
                executor
                    .map_objects(&args.function, &store, prefix, discovery, map)
                    .await?
            }
        }
    } else {
        match (read_input(&args)?, &args.reduce) {
            (Value::Array(items), Some(reducer)) => {
                let options = MapReduceOptions {
                    map,
                    reducer: grouping,
                    reducer_args: None,
                };
                executor.map_reduce(&args.function, items, reducer, options)?
            }
            (Value::Array(items), None) => executor.map(&args.function, items, map)?,
            (_, Some(_)) => {
                return Err(Error::partition("--reduce needs a JSON array as input"));
            }
            (value, None) => executor.call_async(&args.function, value)?,
        }
    };

    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .or(executor.config().job_timeout);
    let result = executor.get_result_timeout(&handle, timeout).await;

    if args.status {
        let status = executor.status(&handle)?;
        eprintln!("{}", serde_json::to_string_pretty(&status)?);
    }
    let report = executor.clean(&handle).await?;
    info!(
        job_id = %handle.id,
        peak_in_flight = executor.peak_in_flight(),
        deleted = report.deleted,
        "Run complete"
    );

    let result = result?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let values = result.raw_values()?;
    let single = handle.kind == JobKind::CallAsync
        || (handle.kind == JobKind::MapReduce && values.len() == 1);
    match values.as_slice() {
        [value] if single => println!("{}", value),
        values => println!("{}", Value::Array(values.to_vec())),
    }
    Ok(())
}

/// JSON input from --input, --input-file or nothing (null)
fn read_input(args: &RunArgs) -> Result<Value> {
    let text = match (&args.input, &args.input_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) if path == "-" => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            text
        }
        (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.into(),
            source: e,
        })?,
        (None, None) => return Ok(Value::Null),
    };
    Ok(serde_json::from_str(&text)?)
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = FanoutConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let path = config::init_config(path.as_deref(), force)?;
            println!("Configuration file created: {}", path.display());
        }
        ConfigSubcommand::Validate { config } => {
            FanoutConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
