//! Querygate command-line entry point.

use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use querygate_exec::config::{resolve_targets_path, ExecutorConfig};
use querygate_exec::registry::FileTargetRegistry;
use querygate_exec::QueryExecutor;

#[derive(Parser)]
#[command(
    name = "querygate",
    about = "Run mongo-shell style queries against named targets through one allow-listed path",
    version
)]
struct Cli {
    /// Path to the targets JSON file.
    #[arg(long, global = true)]
    targets: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Connection establishment timeout in milliseconds.
    #[arg(long, global = true)]
    connect_timeout_ms: Option<u64>,

    /// Per-query execution deadline in milliseconds.
    #[arg(long, global = true)]
    deadline_ms: Option<u64>,

    /// Result cap for find() without an explicit limit().
    #[arg(long, global = true)]
    default_limit: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a query and print the result as JSON.
    Run {
        /// Target id from the targets file.
        #[arg(short, long)]
        target: String,

        /// Query text, e.g. 'db.users.find({status: "active"}).limit(5)'.
        query: Option<String>,

        /// Read the query from a file instead.
        #[arg(short, long, conflicts_with = "query")]
        file: Option<String>,
    },

    /// Show what a query would run, without connecting.
    Inspect {
        /// Query text.
        query: String,
    },

    /// List registered targets.
    Targets,

    /// Connect to a target and list its collections.
    Probe {
        /// Target id from the targets file.
        #[arg(short, long)]
        target: String,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   querygate completions bash > ~/.local/share/bash-completion/completions/querygate
    ///   querygate completions zsh > ~/.zfunc/_querygate
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },

    /// Launch interactive REPL mode.
    Repl {
        /// Target to select on startup.
        #[arg(short, long)]
        target: Option<String>,
    },
}

impl Cli {
    fn executor_config(&self) -> ExecutorConfig {
        let mut config = ExecutorConfig::default();
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.deadline_ms {
            config.execution_deadline_ms = ms;
        }
        if let Some(limit) = self.default_limit {
            config.default_find_limit = limit;
        }
        config
    }

    fn load_registry(&self) -> anyhow::Result<FileTargetRegistry> {
        let path = resolve_targets_path(self.targets.as_deref());
        Ok(FileTargetRegistry::load_or_empty(path)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.executor_config();

    match &cli.command {
        Commands::Run {
            target,
            query,
            file,
        } => {
            let text = match (query, file) {
                (Some(q), _) => q.clone(),
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (None, None) => anyhow::bail!("provide a query or --file"),
            };
            let registry = Arc::new(cli.load_registry()?);
            let executor = QueryExecutor::with_mongo(registry, config);
            let result = executor.execute(target, &text).await;
            executor.close_all().await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success() {
                std::process::exit(1);
            }
        }

        Commands::Inspect { query } => {
            let registry = Arc::new(FileTargetRegistry::new());
            let executor = QueryExecutor::with_mongo(registry, config);
            match executor.inspect(query) {
                Ok(preview) => println!("{}", serde_json::to_string_pretty(&preview)?),
                Err(e) => {
                    eprintln!("Rejected: {e}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Targets => {
            let registry = cli.load_registry()?;
            if registry.is_empty() {
                eprintln!(
                    "No targets registered in {}",
                    resolve_targets_path(cli.targets.as_deref())
                );
            }
            for (id, target) in registry.iter() {
                println!(
                    "{id:<24} {:<40} {:<16} {}",
                    target.redacted_address(),
                    target.default_namespace,
                    if target.active { "active" } else { "inactive" }
                );
            }
        }

        Commands::Probe { target } => {
            let registry = Arc::new(cli.load_registry()?);
            let executor = QueryExecutor::with_mongo(registry, config);
            let probed = executor.probe_target(target).await;
            executor.close_all().await;
            match probed {
                Ok(names) => {
                    println!("Connected to '{target}' ({} collections)", names.len());
                    for name in names {
                        println!("  {name}");
                    }
                }
                Err(e) => {
                    eprintln!("Probe failed: {e}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "querygate", &mut std::io::stdout());
        }

        Commands::Repl { target } => {
            let registry = Arc::new(cli.load_registry()?);
            let executor = Arc::new(QueryExecutor::with_mongo(registry.clone(), config));
            let runtime = tokio::runtime::Handle::current();
            let target = target.clone();
            let repl_executor = executor.clone();
            tokio::task::spawn_blocking(move || {
                querygate_exec::repl::run(runtime, repl_executor, registry, target)
            })
            .await??;
            executor.close_all().await;
        }
    }

    Ok(())
}
