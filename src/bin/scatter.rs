use clap::{Parser, Subcommand};
use scatter::config::{ScatterConfig, load_config_from_yaml};
use scatter::dispatch::dispatcher::build_dispatcher;
use scatter::dispatch::http::HttpTransport;
use scatter::dispatch::loader::load_nodes_from_yaml;
use scatter::dispatch::operation::{EndpointMeta, Operation, Service};
use scatter::fanout::Outcome;
use scatter::runtime::registry::{TaskRegistry, set_current_correlation_id};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Result, bail};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call one operation on every node concurrently and print one line per node
    Call {
        /// YAML file listing the target nodes
        #[arg(long, short)]
        nodes: PathBuf,

        /// Service name
        #[arg(long, short)]
        service: String,

        /// Operation name
        #[arg(long, short)]
        operation: String,

        /// JSON arguments passed to every node
        #[arg(long, short, default_value = "null")]
        args: String,

        /// Overall timeout in seconds (overrides the config file)
        #[arg(long, short)]
        timeout: Option<f64>,

        /// Abort the whole call on the first failing node
        #[arg(long)]
        raise: bool,

        /// Continue an existing trace instead of starting a new one
        #[arg(long)]
        correlation_id: Option<String>,

        /// Optional runtime config (YAML)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Call { nodes, service, operation, args, timeout, raise, correlation_id, config } => {
            let config = match config {
                Some(path) => load_config_from_yaml(path)?,
                None => ScatterConfig::default(),
            };
            let mut options = config.join_options();
            if let Some(secs) = timeout {
                if !secs.is_finite() || secs < 0.0 {
                    bail!("invalid timeout: {}", secs);
                }
                options = options.timeout(Duration::from_secs_f64(secs));
            }
            if raise {
                options = options.raise_on_error(true);
            }

            let node_list = load_nodes_from_yaml(&nodes)?;
            if node_list.is_empty() {
                bail!("no nodes listed in {}", nodes.display());
            }
            let args: serde_json::Value = serde_json::from_str(&args)?;

            if let Some(id) = correlation_id {
                set_current_correlation_id(id);
            }
            let correlation_id = TaskRegistry::global().current_id();
            info!(correlation_id = %correlation_id, nodes = node_list.len(), "dispatching {}.{}", service, operation);

            // The template endpoint is replaced per node.
            let template = Operation::new(
                &operation,
                Service::new(&service, EndpointMeta::new("0.0.0.0", 0), Arc::new(HttpTransport::new())),
            );
            let dispatcher = build_dispatcher(template, node_list, options);
            let results = dispatcher.dispatch(args).await?;

            println!("correlation_id\t{}", correlation_id);

            for (node, outcome) in dispatcher.nodes().iter().zip(results) {
                match outcome {
                    Outcome::Value(value) => println!("{}\tok\t{}", node, value),
                    Outcome::Failed(failure) => println!("{}\terror\t{}", node, failure),
                    Outcome::TimedOut(timeout) => println!("{}\ttimeout\t{}", node, timeout),
                }
            }
        }
    }

    Ok(())
}
