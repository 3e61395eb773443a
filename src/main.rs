//! routekv command-line interface.
//!
//! # Architecture Overview
//!
//! ```text
//!   add / remove ──▶ TableStore ──▶ Persistence ──┬──▶ rules.toml (atomic replace)
//!   get / list   ──▶ snapshot                     └──▶ etcd / consul KV (per-route txns)
//!   keys         ──▶ routing (pure, no store)
//!   render-static ─▶ static_config ──▶ proxy static config file
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use routekv::config::{load_config, StoreConfig};
use routekv::observability::{logging, metrics};
use routekv::persistence::{self, static_config};
use routekv::routing::{decode, encode, generate_route_keys};
use routekv::table::TableStore;

#[derive(Parser)]
#[command(name = "routekv")]
#[command(about = "Maintain the dynamic routing table of an edge proxy", long_about = None)]
struct Cli {
    /// Configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add or replace a route
    Add {
        spec: String,
        target: String,
        /// Metadata stored with the route (JSON)
        #[arg(long, default_value = "null")]
        data: String,
    },
    /// Remove a route
    Remove { spec: String },
    /// Show one route
    Get { spec: String },
    /// List all routes
    List,
    /// Show the rule and keys a spec maps to, without touching the store
    Keys { spec: String },
    /// Write the proxy's static configuration
    RenderStatic {
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => {
            let mut config = StoreConfig::default();
            config.normalize();
            config
        }
    };

    logging::init_logging(&config.observability);
    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    match cli.command {
        Commands::Keys { spec } => {
            let routespec = decode(&spec);
            let rule = routekv::routing::compile_rule(&routespec)?;
            let keys = generate_route_keys(&routespec, &config.storage.designator, &config.key_schema());
            print_json(&json!({
                "routespec": routespec,
                "encoded": encode(&routespec),
                "rule": rule,
                "keys": keys,
            }))?;
        }
        Commands::RenderStatic { out } => {
            static_config::persist_static_config(&out, &static_config::render(&config))?;
            tracing::info!(path = %out.display(), "Static configuration written");
        }
        command => {
            let backend = persistence::connect(&config)?;
            let store = TableStore::open(backend).await?;
            run(&store, command).await?;
        }
    }

    Ok(())
}

async fn run(store: &TableStore, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Add { spec, target, data } => {
            let data: Value = serde_json::from_str(&data)?;
            let keys = store.add_route(&spec, &target, data).await?;
            print_json(&serde_json::to_value(keys)?)?;
        }
        Commands::Remove { spec } => {
            let removed = store.remove_route(&spec).await?;
            print_json(&json!({ "removed": removed }))?;
        }
        Commands::Get { spec } => match store.get_route(&spec) {
            Some(record) => print_json(&serde_json::to_value(record)?)?,
            None => {
                eprintln!("No route for '{}'", decode(&spec));
                std::process::exit(1);
            }
        },
        Commands::List => {
            print_json(&serde_json::to_value(store.list_routes())?)?;
        }
        Commands::Keys { .. } | Commands::RenderStatic { .. } => {}
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
