mod cmd;
mod output;
mod store;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Mutex;
use topo_core::types::TabletType;

#[derive(Parser)]
#[command(
    name = "vtagent",
    about = "Tablet lifecycle agent: runs queued administrative actions and publishes serving addresses",
    version,
    propagate_version = true
)]
struct Cli {
    /// Agent config file (YAML); every field is optional
    #[arg(long, global = true, env = "VT_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Write logs here instead of stderr; also handed to the action executor
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// etcd endpoints of the coordination store
    #[arg(
        long,
        global = true,
        env = "VT_ETCD_ENDPOINTS",
        value_delimiter = ','
    )]
    etcd: Vec<String>,

    /// Use an in-process store seeded from a JSON file mapping node paths to
    /// values, instead of etcd
    #[arg(long, global = true, conflicts_with = "etcd")]
    snapshot: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the tablet and process its action queue until interrupted
    Run {
        /// Tablet record path, e.g. /zk/c1/vt/tablets/0000000007
        #[arg(long)]
        tablet_path: String,
        /// Query service address; a blank host means this machine
        #[arg(long, default_value = ":6509")]
        bind_addr: String,
        /// Database address; a blank host means this machine
        #[arg(long, default_value = ":3306")]
        mysql_addr: String,
    },

    /// Show which executor binary and my.cnf the agent would use
    Resolve {
        #[arg(long)]
        uid: u32,
    },

    /// Publish the tablet's serving address once
    Publish {
        #[arg(long)]
        tablet_path: String,
    },

    /// List serving addresses for one (cell, keyspace, shard, type)
    Endpoints {
        #[arg(long)]
        cell: String,
        #[arg(long)]
        keyspace: String,
        #[arg(long)]
        shard: String,
        #[arg(long = "type")]
        tablet_type: TabletType,
        /// Named port to report
        #[arg(long, default_value = topo_core::naming::VTOCC_PORT)]
        service: String,
    },

    /// Append an action to a tablet's queue
    Enqueue {
        #[arg(long)]
        tablet_path: String,
        /// Action kind, e.g. Ping, ChangeType, Scrap
        #[arg(long)]
        action: String,
        /// Action arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    if let Err(e) = init_tracing(default_level, cli.log_file.as_ref()) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }

    let ctx = cmd::Context {
        config_path: cli.config,
        log_file: cli.log_file,
        etcd: cli.etcd,
        snapshot: cli.snapshot,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Run {
            tablet_path,
            bind_addr,
            mysql_addr,
        } => cmd::run::run(&ctx, &tablet_path, &bind_addr, &mysql_addr),
        Commands::Resolve { uid } => cmd::resolve::run(&ctx, uid),
        Commands::Publish { tablet_path } => cmd::publish::run(&ctx, &tablet_path),
        Commands::Endpoints {
            cell,
            keyspace,
            shard,
            tablet_type,
            service,
        } => cmd::endpoints::run(&ctx, &cell, &keyspace, &shard, tablet_type, &service),
        Commands::Enqueue {
            tablet_path,
            action,
            args,
        } => cmd::enqueue::run(&ctx, &tablet_path, &action, args.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(default_level: tracing::Level, log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("cannot open log file {}: {e}", path.display()))?;
            builder
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
